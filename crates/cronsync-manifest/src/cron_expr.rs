//! Five-field cron expressions.
//!
//! Grammar per field: `*`, a single value, `a-b`, `*/n`, `a-b/n`, and comma
//! lists of those. Names (`MON`, `JAN`), `@` macros and `L`/`W`/`#` are not
//! accepted.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::CronError;

/// Position of a field inside an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CronField {
    Minute,
    Hour,
    DayOfMonth,
    Month,
    DayOfWeek,
}

impl CronField {
    pub const ALL: [CronField; 5] = [
        CronField::Minute,
        CronField::Hour,
        CronField::DayOfMonth,
        CronField::Month,
        CronField::DayOfWeek,
    ];

    /// Inclusive bounds.
    pub fn range(self) -> (u8, u8) {
        match self {
            CronField::Minute => (0, 59),
            CronField::Hour => (0, 23),
            CronField::DayOfMonth => (1, 31),
            CronField::Month => (1, 12),
            CronField::DayOfWeek => (0, 6),
        }
    }
}

impl fmt::Display for CronField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CronField::Minute => "minute",
            CronField::Hour => "hour",
            CronField::DayOfMonth => "day-of-month",
            CronField::Month => "month",
            CronField::DayOfWeek => "day-of-week",
        };
        f.write_str(name)
    }
}

/// A parsed and expanded expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
    normalized: String,
    fields: [BTreeSet<u8>; 5],
    /// Fields written starting with `*`; decides the day-of-month/day-of-week rule.
    starred: [bool; 5],
}

impl CronExpr {
    pub fn parse(expr: &str) -> Result<Self, CronError> {
        let parts: Vec<&str> = expr.split_whitespace().collect();
        if parts.len() != 5 {
            return Err(CronError::FieldCount(parts.len()));
        }

        let mut fields: [BTreeSet<u8>; 5] = Default::default();
        let mut starred = [false; 5];
        for (i, (field, text)) in CronField::ALL.iter().zip(&parts).enumerate() {
            fields[i] = parse_field(*field, text)?;
            starred[i] = text.starts_with('*');
        }

        Ok(Self {
            normalized: parts.join(" "),
            fields,
            starred,
        })
    }

    /// The expression with single spaces between fields.
    pub fn as_str(&self) -> &str {
        &self.normalized
    }

    pub fn values(&self, field: CronField) -> &BTreeSet<u8> {
        &self.fields[index(field)]
    }

    pub fn minutes(&self) -> &BTreeSet<u8> {
        self.values(CronField::Minute)
    }

    pub fn hours(&self) -> &BTreeSet<u8> {
        self.values(CronField::Hour)
    }

    pub fn days_of_month(&self) -> &BTreeSet<u8> {
        self.values(CronField::DayOfMonth)
    }

    pub fn months(&self) -> &BTreeSet<u8> {
        self.values(CronField::Month)
    }

    pub fn days_of_week(&self) -> &BTreeSet<u8> {
        self.values(CronField::DayOfWeek)
    }

    /// Whether the field covers its whole range.
    pub fn is_full(&self, field: CronField) -> bool {
        let (min, max) = field.range();
        self.values(field).len() == usize::from(max - min + 1)
    }

    /// Whether the field was written as `*` or `*/n`.
    pub fn is_starred(&self, field: CronField) -> bool {
        self.starred[index(field)]
    }
}

impl FromStr for CronExpr {
    type Err = CronError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CronExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.normalized)
    }
}

fn index(field: CronField) -> usize {
    match field {
        CronField::Minute => 0,
        CronField::Hour => 1,
        CronField::DayOfMonth => 2,
        CronField::Month => 3,
        CronField::DayOfWeek => 4,
    }
}

fn parse_field(field: CronField, text: &str) -> Result<BTreeSet<u8>, CronError> {
    let (min, max) = field.range();
    let mut values = BTreeSet::new();

    for item in text.split(',') {
        let invalid = || CronError::InvalidValue {
            field,
            value: item.to_string(),
        };
        if item.is_empty() {
            return Err(invalid());
        }

        let (range_part, step) = match item.split_once('/') {
            Some((range, step)) => {
                let step = parse_number(step).ok_or_else(invalid)?;
                if step == 0 {
                    return Err(CronError::ZeroStep { field });
                }
                (range, Some(step))
            }
            None => (item, None),
        };

        let (start, end) = if range_part == "*" {
            (min, max)
        } else if let Some((a, b)) = range_part.split_once('-') {
            let start = bounded(field, parse_number(a).ok_or_else(invalid)?)?;
            let end = bounded(field, parse_number(b).ok_or_else(invalid)?)?;
            if start > end {
                return Err(CronError::ReversedRange { field, start, end });
            }
            (start, end)
        } else {
            let value = bounded(field, parse_number(range_part).ok_or_else(invalid)?)?;
            // `5/10` is not part of the grammar; only ranges and `*` take a step.
            if step.is_some() {
                return Err(invalid());
            }
            (value, value)
        };

        let step = step.unwrap_or(1) as usize;
        values.extend((start..=end).step_by(step));
    }

    Ok(values)
}

fn parse_number(text: &str) -> Option<u32> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

fn bounded(field: CronField, value: u32) -> Result<u8, CronError> {
    let (min, max) = field.range();
    if value < u32::from(min) || value > u32::from(max) {
        return Err(CronError::OutOfRange {
            field,
            value,
            min,
            max,
        });
    }
    Ok(value as u8)
}

#[cfg(test)]
#[path = "cron_expr_tests.rs"]
mod tests;
