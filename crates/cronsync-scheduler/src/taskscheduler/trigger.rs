//! Translation of 5-field expressions into Task Scheduler calendar triggers.
//!
//! Only expressions with an exact native equivalent are accepted. Anything
//! else is rejected with [`SchedulerError::UnsupportedSchedule`]; nothing is
//! approximated.

use cronsync_manifest::{CronExpr, CronField};
use cronsync_protocols::SchedulerError;

/// Upper bound on separate daily start times for one task.
pub const MAX_TRIGGERS: usize = 48;

/// Which days a task may run on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaySelection {
    Daily,
    /// 0 = Sunday.
    Weekly { days: Vec<u8> },
    Monthly { days: Vec<u8>, months: Vec<u8> },
}

/// When during a selected day the task starts, in minutes after midnight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeOfDay {
    /// One calendar trigger per start time.
    At(Vec<u16>),
    /// One trigger at `start`, repeated every `interval` minutes for `duration` minutes.
    Repeat {
        start: u16,
        interval: u16,
        duration: u16,
    },
}

/// Native equivalent of one expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerPlan {
    pub days: DaySelection,
    pub times: TimeOfDay,
}

impl TriggerPlan {
    /// Start times of the first trigger occurrence on a selected day.
    pub fn start_times(&self) -> Vec<u16> {
        match &self.times {
            TimeOfDay::At(times) => times.clone(),
            TimeOfDay::Repeat { start, .. } => vec![*start],
        }
    }
}

pub fn translate(expr: &CronExpr) -> Result<TriggerPlan, SchedulerError> {
    let unsupported = |reason: &str| SchedulerError::UnsupportedSchedule {
        schedule: expr.as_str().to_string(),
        reason: reason.to_string(),
    };

    let month_restricted = !expr.is_full(CronField::Month);

    // cron ORs the day fields when neither starts with `*`, otherwise ANDs them.
    let (dom_restricted, dow_restricted) = if !expr.is_starred(CronField::DayOfMonth)
        && !expr.is_starred(CronField::DayOfWeek)
    {
        if expr.is_full(CronField::DayOfMonth) || expr.is_full(CronField::DayOfWeek) {
            (false, false)
        } else {
            return Err(unsupported(
                "day-of-month and day-of-week fire as a union",
            ));
        }
    } else {
        (
            !expr.is_full(CronField::DayOfMonth),
            !expr.is_full(CronField::DayOfWeek),
        )
    };

    if dom_restricted && dow_restricted {
        return Err(unsupported(
            "day-of-month and day-of-week are both restricted",
        ));
    }
    if dow_restricted && month_restricted {
        return Err(unsupported(
            "day-of-week cannot be combined with a month restriction",
        ));
    }

    let days = if dom_restricted || month_restricted {
        DaySelection::Monthly {
            days: expr.days_of_month().iter().copied().collect(),
            months: expr.months().iter().copied().collect(),
        }
    } else if dow_restricted {
        DaySelection::Weekly {
            days: expr.days_of_week().iter().copied().collect(),
        }
    } else {
        DaySelection::Daily
    };

    let offsets: Vec<u16> = expr
        .hours()
        .iter()
        .flat_map(|h| {
            expr.minutes()
                .iter()
                .map(move |m| u16::from(*h) * 60 + u16::from(*m))
        })
        .collect();

    let times = match offsets.as_slice() {
        [] => return Err(unsupported("expression never fires")),
        [single] => TimeOfDay::At(vec![*single]),
        [first, second, ..] => {
            let interval = second - first;
            let evenly_spaced = offsets.windows(2).all(|w| w[1] - w[0] == interval);
            let last = offsets[offsets.len() - 1];
            if evenly_spaced {
                TimeOfDay::Repeat {
                    start: *first,
                    interval,
                    duration: last - first + 1,
                }
            } else if offsets.len() <= MAX_TRIGGERS {
                TimeOfDay::At(offsets.clone())
            } else {
                return Err(unsupported(&format!(
                    "{} irregular start times per day exceed the limit of {}",
                    offsets.len(),
                    MAX_TRIGGERS
                )));
            }
        }
    };

    Ok(TriggerPlan { days, times })
}
