//! Task definition documents.
//!
//! Only the handful of elements the agent writes or reads back are handled,
//! with plain string building and regex extraction.

use std::fmt::Write as _;
use std::sync::LazyLock;

use regex::Regex;
use uuid::Uuid;

use cronsync_protocols::{EntryMarker, EntrySpec};

use super::trigger::{DaySelection, TimeOfDay, TriggerPlan};

/// Prefix of the task Description written on managed tasks.
pub const MARKER_PREFIX: &str = "cronsync:";

/// Program every managed task runs; the command follows `/C`.
pub const SHELL: &str = "cmd.exe";
const SHELL_SWITCH: &str = "/C ";

const WEEKDAYS: [&str; 7] = [
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

const MONTHS: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

static DESCRIPTION_RE: LazyLock<Regex> = LazyLock::new(|| element_re("Description"));
static COMMAND_RE: LazyLock<Regex> = LazyLock::new(|| element_re("Command"));
static ARGUMENTS_RE: LazyLock<Regex> = LazyLock::new(|| element_re("Arguments"));
static MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^cronsync:id=([0-9A-Fa-f-]{36});ns=([^;]+);name=([^;]+)(?:;schedule=(.*))?$")
        .expect("marker pattern is valid")
});
static REGISTRATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<RegistrationInfo\s*/>|<RegistrationInfo>").expect("valid"));
static TASK_OPEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<Task(\s[^>]*)?>").expect("valid"));
static TRIGGERS_RE: LazyLock<Regex> = LazyLock::new(|| element_re("Triggers"));
static TRIGGER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<(\w+Trigger)(?:\s[^>]*)?(?:/>|>(.*?)</\w+Trigger>)").expect("valid")
});
static START_RE: LazyLock<Regex> = LazyLock::new(|| element_re("StartBoundary"));
static INTERVAL_RE: LazyLock<Regex> = LazyLock::new(|| element_re("Interval"));
static DURATION_RE: LazyLock<Regex> = LazyLock::new(|| element_re("Duration"));
static ENABLED_RE: LazyLock<Regex> = LazyLock::new(|| element_re("Enabled"));
static DAYS_INTERVAL_RE: LazyLock<Regex> = LazyLock::new(|| element_re("DaysInterval"));
static WEEKS_INTERVAL_RE: LazyLock<Regex> = LazyLock::new(|| element_re("WeeksInterval"));
static DAYS_OF_WEEK_RE: LazyLock<Regex> = LazyLock::new(|| element_re("DaysOfWeek"));
static DAYS_OF_MONTH_RE: LazyLock<Regex> = LazyLock::new(|| element_re("DaysOfMonth"));
static MONTHS_RE: LazyLock<Regex> = LazyLock::new(|| element_re("Months"));
static EMPTY_ELEMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<(\w+)\s*/>").expect("valid"));
static DAY_RE: LazyLock<Regex> = LazyLock::new(|| element_re("Day"));

fn element_re(name: &str) -> Regex {
    Regex::new(&format!(r"(?s)<{name}>(.*?)</{name}>")).expect("element pattern is valid")
}

pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

pub fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let Some(semi) = tail.find(';') else {
            out.push_str(tail);
            return out;
        };
        let entity = &tail[1..semi];
        let decoded = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            _ => entity
                .strip_prefix("#x")
                .or_else(|| entity.strip_prefix("#X"))
                .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                .or_else(|| entity.strip_prefix('#').and_then(|d| d.parse().ok()))
                .and_then(char::from_u32),
        };
        match decoded {
            Some(c) => {
                out.push(c);
                rest = &tail[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Description text identifying a managed task.
pub fn marker_text(marker: &EntryMarker, schedule: Option<&str>) -> String {
    let mut text = format!(
        "{}id={};ns={};name={}",
        MARKER_PREFIX, marker.id, marker.namespace, marker.name
    );
    if let Some(schedule) = schedule {
        let _ = write!(text, ";schedule={}", schedule);
    }
    text
}

/// Recover the marker and, when recorded, the schedule from a Description.
pub fn parse_marker(description: &str) -> Option<(EntryMarker, Option<String>)> {
    let caps = MARKER_RE.captures(description.trim())?;
    let id = Uuid::parse_str(&caps[1]).ok()?;
    Some((
        EntryMarker {
            id,
            namespace: caps[2].to_string(),
            name: caps[3].to_string(),
        },
        caps.get(4).map(|m| m.as_str().to_string()),
    ))
}

/// Fields the adapter reads back from an exported definition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskDetails {
    pub description: Option<String>,
    pub command: Option<String>,
    pub arguments: Option<String>,
}

impl TaskDetails {
    pub fn parse(document: &str) -> Self {
        let grab = |re: &Regex| re.captures(document).map(|c| unescape(&c[1]));
        Self {
            description: grab(&DESCRIPTION_RE),
            command: grab(&COMMAND_RE),
            arguments: grab(&ARGUMENTS_RE),
        }
    }

    /// The command as the agent wrote it, when the action has the managed shape.
    pub fn shell_command(&self) -> Option<String> {
        let program = self.command.as_deref()?.trim();
        if !program.eq_ignore_ascii_case(SHELL) {
            return None;
        }
        self.arguments
            .as_deref()
            .and_then(|a| a.strip_prefix(SHELL_SWITCH))
            .map(str::to_string)
    }

    /// `program arguments`, the way the task list shows it.
    pub fn command_line(&self) -> String {
        match (&self.command, &self.arguments) {
            (Some(c), Some(a)) if !a.is_empty() => format!("{} {}", c, a),
            (Some(c), _) => c.clone(),
            (None, _) => String::new(),
        }
    }
}

fn minutes_to_clock(minutes: u16) -> String {
    format!("{:02}:{:02}:00", minutes / 60, minutes % 60)
}

fn push_schedule(out: &mut String, days: &DaySelection) {
    match days {
        DaySelection::Daily => {
            out.push_str("      <ScheduleByDay>\n        <DaysInterval>1</DaysInterval>\n      </ScheduleByDay>\n");
        }
        DaySelection::Weekly { days } => {
            out.push_str("      <ScheduleByWeek>\n        <DaysOfWeek>\n");
            for day in days {
                let _ = writeln!(out, "          <{} />", WEEKDAYS[usize::from(*day) % 7]);
            }
            out.push_str("        </DaysOfWeek>\n        <WeeksInterval>1</WeeksInterval>\n      </ScheduleByWeek>\n");
        }
        DaySelection::Monthly { days, months } => {
            out.push_str("      <ScheduleByMonth>\n        <DaysOfMonth>\n");
            for day in days {
                let _ = writeln!(out, "          <Day>{}</Day>", day);
            }
            out.push_str("        </DaysOfMonth>\n        <Months>\n");
            for month in months {
                let index = usize::from(month.saturating_sub(1)) % 12;
                let _ = writeln!(out, "          <{} />", MONTHS[index]);
            }
            out.push_str("        </Months>\n      </ScheduleByMonth>\n");
        }
    }
}

fn push_triggers(out: &mut String, plan: &TriggerPlan) {
    out.push_str("  <Triggers>\n");
    for start in plan.start_times() {
        out.push_str("    <CalendarTrigger>\n");
        if let TimeOfDay::Repeat {
            interval, duration, ..
        } = plan.times
        {
            let _ = write!(
                out,
                "      <Repetition>\n        <Interval>PT{}M</Interval>\n        <Duration>PT{}M</Duration>\n        <StopAtDurationEnd>false</StopAtDurationEnd>\n      </Repetition>\n",
                interval, duration
            );
        }
        let _ = writeln!(
            out,
            "      <StartBoundary>2000-01-01T{}</StartBoundary>",
            minutes_to_clock(start)
        );
        out.push_str("      <Enabled>true</Enabled>\n");
        push_schedule(out, &plan.days);
        out.push_str("    </CalendarTrigger>\n");
    }
    out.push_str("  </Triggers>\n");
}

/// Whole minutes in an `xs:duration` such as `PT15M`, `PT23H46M` or `P1D`.
fn duration_minutes(text: &str) -> Option<u32> {
    let rest = text.trim().strip_prefix('P')?;
    let (date, time) = rest.split_once('T').unwrap_or((rest, ""));
    let mut seconds = 0u32;
    let fields = [
        (date, &[('D', 86_400)][..]),
        (time, &[('H', 3_600), ('M', 60), ('S', 1)][..]),
    ];
    for (part, units) in fields {
        let mut digits = String::new();
        for c in part.chars() {
            if c.is_ascii_digit() {
                digits.push(c);
                continue;
            }
            let (_, factor) = units.iter().find(|(unit, _)| *unit == c)?;
            let value: u32 = digits.parse().ok()?;
            seconds = seconds.checked_add(value.checked_mul(*factor)?)?;
            digits.clear();
        }
        if !digits.is_empty() {
            return None;
        }
    }
    Some(seconds / 60)
}

/// Normalized description of one trigger, independent of formatting.
fn trigger_signature(kind: &str, body: &str) -> String {
    let text = |re: &Regex| re.captures(body).map(|c| c[1].trim().to_string());
    let names = |re: &Regex| {
        let mut names: Vec<String> = text(re)
            .map(|block| {
                EMPTY_ELEMENT_RE
                    .captures_iter(&block)
                    .map(|c| c[1].to_string())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names.join(",")
    };

    let start: String = text(&START_RE)
        .and_then(|s| s.split_once('T').map(|(_, clock)| clock.chars().take(5).collect()))
        .unwrap_or_default();
    let interval = text(&INTERVAL_RE).and_then(|d| duration_minutes(&d));
    let duration = text(&DURATION_RE).and_then(|d| duration_minutes(&d));
    let enabled = text(&ENABLED_RE).is_none_or(|e| e.eq_ignore_ascii_case("true"));

    let days = if body.contains("<ScheduleByDay>") {
        format!("day/{}", text(&DAYS_INTERVAL_RE).unwrap_or_default())
    } else if body.contains("<ScheduleByWeek>") {
        format!(
            "week/{}:{}",
            text(&WEEKS_INTERVAL_RE).unwrap_or_default(),
            names(&DAYS_OF_WEEK_RE)
        )
    } else if body.contains("<ScheduleByMonth>") {
        let mut month_days: Vec<u8> = text(&DAYS_OF_MONTH_RE)
            .map(|block| {
                DAY_RE
                    .captures_iter(&block)
                    .filter_map(|c| c[1].trim().parse().ok())
                    .collect()
            })
            .unwrap_or_default();
        month_days.sort_unstable();
        format!("month:{:?}:{}", month_days, names(&MONTHS_RE))
    } else {
        String::new()
    };

    format!("{kind} {start} {interval:?} {duration:?} {enabled} {days}")
}

/// Sorted trigger signatures of a definition; `None` without a trigger block.
pub fn trigger_signatures(document: &str) -> Option<Vec<String>> {
    let block = TRIGGERS_RE.captures(document)?;
    let mut signatures: Vec<String> = TRIGGER_RE
        .captures_iter(&block[1])
        .map(|c| trigger_signature(&c[1], c.get(2).map_or("", |m| m.as_str())))
        .collect();
    signatures.sort();
    Some(signatures)
}

/// Whether the triggers of `document` are the ones `plan` renders.
pub fn triggers_match(plan: &TriggerPlan, document: &str) -> bool {
    let mut expected = String::new();
    push_triggers(&mut expected, plan);
    match (trigger_signatures(&expected), trigger_signatures(document)) {
        (Some(expected), Some(actual)) => expected == actual,
        _ => false,
    }
}

/// Full definition for one managed task.
pub fn render_task(path: &str, spec: &EntrySpec, plan: &TriggerPlan) -> String {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-16\"?>\n");
    out.push_str(
        "<Task version=\"1.2\" xmlns=\"http://schemas.microsoft.com/windows/2004/02/mit/task\">\n",
    );
    let _ = write!(
        out,
        "  <RegistrationInfo>\n    <Author>cronsync</Author>\n    <Description>{}</Description>\n    <URI>{}</URI>\n  </RegistrationInfo>\n",
        escape(&marker_text(&spec.marker, Some(&spec.schedule))),
        escape(path)
    );
    push_triggers(&mut out, plan);
    out.push_str(
        "  <Principals>\n    <Principal id=\"Author\">\n      <LogonType>S4U</LogonType>\n      <RunLevel>LeastPrivilege</RunLevel>\n    </Principal>\n  </Principals>\n",
    );
    out.push_str(
        "  <Settings>\n    <MultipleInstancesPolicy>IgnoreNew</MultipleInstancesPolicy>\n    <DisallowStartIfOnBatteries>false</DisallowStartIfOnBatteries>\n    <StopIfGoingOnBatteries>false</StopIfGoingOnBatteries>\n    <StartWhenAvailable>false</StartWhenAvailable>\n    <Enabled>true</Enabled>\n    <ExecutionTimeLimit>PT0S</ExecutionTimeLimit>\n  </Settings>\n",
    );
    let _ = write!(
        out,
        "  <Actions Context=\"Author\">\n    <Exec>\n      <Command>{}</Command>\n      <Arguments>{}</Arguments>\n    </Exec>\n  </Actions>\n",
        SHELL,
        escape(&format!("{}{}", SHELL_SWITCH, spec.command))
    );
    out.push_str("</Task>\n");
    out
}

/// Set the Description of an exported definition, leaving everything else alone.
pub fn with_description(document: &str, description: &str) -> String {
    let element = format!("<Description>{}</Description>", escape(description));
    if DESCRIPTION_RE.is_match(document) {
        return DESCRIPTION_RE
            .replace(document, regex::NoExpand(&element))
            .into_owned();
    }
    if let Some(m) = REGISTRATION_RE.find(document) {
        let replacement = format!("<RegistrationInfo>{}", element);
        let tail = if m.as_str().ends_with("/>") {
            "</RegistrationInfo>"
        } else {
            ""
        };
        return format!(
            "{}{}{}{}",
            &document[..m.start()],
            replacement,
            tail,
            &document[m.end()..]
        );
    }
    if let Some(m) = TASK_OPEN_RE.find(document) {
        return format!(
            "{}<RegistrationInfo>{}</RegistrationInfo>{}",
            &document[..m.end()],
            element,
            &document[m.end()..]
        );
    }
    document.to_string()
}

/// Task Scheduler reads definitions as UTF-16 with a byte order mark.
pub fn encode_utf16(document: &str) -> Vec<u8> {
    let mut bytes = vec![0xFF, 0xFE];
    for unit in document.encode_utf16() {
        bytes.extend_from_slice(&unit.to_le_bytes());
    }
    bytes
}

/// Inverse of [`encode_utf16`]; plain UTF-8 input is accepted too.
pub fn decode_document(bytes: &[u8]) -> String {
    match bytes {
        [0xFF, 0xFE, rest @ ..] => {
            let units: Vec<u16> = rest
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .collect();
            String::from_utf16_lossy(&units)
        }
        [0xEF, 0xBB, 0xBF, rest @ ..] => String::from_utf8_lossy(rest).into_owned(),
        _ => String::from_utf8_lossy(bytes).into_owned(),
    }
}
