//! In-memory model of one crontab, lossless for lines the agent does not own.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use cronsync_manifest::CronExpr;
use cronsync_protocols::{EntryMarker, EntrySpec, NativeHandle, SchedulerEntry, SchedulerError};

/// Prefix of the identity comment appended to managed lines.
pub const MARKER_PREFIX: &str = "# cronsync:";

static MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<body>.*?)\s+# cronsync:id=(?P<id>[0-9A-Fa-f-]{36});ns=(?P<ns>[^;\s]+);name=(?P<name>[^;\s]+)\s*$",
    )
    .expect("marker pattern is valid")
});

static ENV_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*[A-Za-z_][A-Za-z0-9_]*\s*=").expect("env pattern is valid"));

#[derive(Debug, Clone, PartialEq, Eq)]
enum Line {
    /// Blank lines, comments, variable assignments and anything unparseable.
    Other(String),
    /// A schedule line without a marker.
    Foreign {
        raw: String,
        schedule: String,
        command: String,
    },
    Managed {
        raw: String,
        marker: EntryMarker,
        schedule: String,
        command: String,
    },
}

impl Line {
    fn parse(raw: &str) -> Line {
        let text = raw.trim_end_matches('\r');
        let trimmed = text.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') || ENV_RE.is_match(text) {
            return Line::Other(raw.to_string());
        }

        if let Some(managed) = parse_managed(raw, text) {
            return managed;
        }

        let split = if trimmed.starts_with('@') {
            split_fields(trimmed, 1)
        } else {
            split_fields(trimmed, 5)
        };
        match split {
            Some((schedule, command)) => Line::Foreign {
                raw: raw.to_string(),
                schedule,
                command: command.to_string(),
            },
            None => Line::Other(raw.to_string()),
        }
    }

    fn raw(&self) -> &str {
        match self {
            Line::Other(raw) | Line::Foreign { raw, .. } | Line::Managed { raw, .. } => raw,
        }
    }

    fn managed_id(&self) -> Option<Uuid> {
        match self {
            Line::Managed { marker, .. } => Some(marker.id),
            _ => None,
        }
    }
}

fn parse_managed(raw: &str, text: &str) -> Option<Line> {
    let caps = MARKER_RE.captures(text)?;
    let id = Uuid::parse_str(&caps["id"]).ok()?;
    let (schedule, command) = split_fields(caps["body"].trim_start(), 5)?;
    Some(Line::Managed {
        raw: raw.to_string(),
        marker: EntryMarker {
            id,
            namespace: caps["ns"].to_string(),
            name: caps["name"].to_string(),
        },
        schedule,
        command: unescape_percent(command),
    })
}

/// Split off `count` whitespace-separated timing fields; the command keeps its spacing.
fn split_fields(text: &str, count: usize) -> Option<(String, &str)> {
    let mut fields = Vec::with_capacity(count);
    let mut rest = text;
    for _ in 0..count {
        rest = rest.trim_start();
        let end = rest.find(char::is_whitespace)?;
        fields.push(&rest[..end]);
        rest = &rest[end..];
    }
    let command = rest.trim_start();
    if command.is_empty() {
        return None;
    }
    Some((fields.join(" "), command))
}

/// cron turns a bare `%` into a newline; managed commands never want that.
fn escape_percent(command: &str) -> String {
    command.replace('%', "\\%")
}

fn unescape_percent(command: &str) -> String {
    command.replace("\\%", "%")
}

/// Render the line the agent writes for one managed entry.
pub fn render_line(spec: &EntrySpec) -> String {
    format!(
        "{} {} {}id={};ns={};name={}",
        spec.schedule,
        escape_percent(&spec.command),
        MARKER_PREFIX,
        spec.marker.id,
        spec.marker.namespace,
        spec.marker.name
    )
}

/// Handle of a managed line.
pub fn managed_handle(id: Uuid) -> NativeHandle {
    NativeHandle::new(format!("crontab:{}", id))
}

fn foreign_handle(raw: &str) -> String {
    let digest = hex::encode(Sha256::digest(raw.as_bytes()));
    format!("crontab:line:{}", &digest[..12])
}

fn validate_spec(spec: &EntrySpec) -> Result<(), SchedulerError> {
    CronExpr::parse(&spec.schedule).map_err(|e| {
        SchedulerError::InvalidEntry(format!("schedule '{}': {}", spec.schedule, e))
    })?;
    if spec.command.trim().is_empty() {
        return Err(SchedulerError::InvalidEntry("empty command".to_string()));
    }
    if spec.command.contains(['\n', '\r']) {
        return Err(SchedulerError::InvalidEntry(
            "command spans several lines".to_string(),
        ));
    }
    for value in [&spec.marker.namespace, &spec.marker.name] {
        if value.is_empty() || value.contains([';', ' ', '\t']) {
            return Err(SchedulerError::InvalidEntry(format!(
                "'{}' cannot be stored in a marker",
                value
            )));
        }
    }
    Ok(())
}

/// A parsed crontab.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrontabTable {
    lines: Vec<Line>,
}

impl CrontabTable {
    pub fn parse(text: &str) -> Self {
        let body = text.strip_suffix('\n').unwrap_or(text);
        if body.is_empty() {
            return Self::default();
        }
        Self {
            lines: body.split('\n').map(Line::parse).collect(),
        }
    }

    /// Text to install. Unchanged lines come back byte-for-byte.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            out.push_str(line.raw());
            out.push('\n');
        }
        out
    }

    /// Every schedule line, in file order.
    pub fn entries(&self) -> Vec<SchedulerEntry> {
        let mut seen: HashMap<String, usize> = HashMap::new();
        let mut unique = |base: String| {
            let count = seen.entry(base.clone()).or_insert(0);
            *count += 1;
            if *count == 1 {
                base
            } else {
                format!("{}#{}", base, count)
            }
        };

        self.lines
            .iter()
            .filter_map(|line| match line {
                Line::Other(_) => None,
                Line::Foreign {
                    raw,
                    schedule,
                    command,
                } => Some(SchedulerEntry {
                    handle: NativeHandle::new(unique(foreign_handle(raw))),
                    marker: None,
                    schedule: schedule.clone(),
                    command: command.clone(),
                }),
                Line::Managed {
                    marker,
                    schedule,
                    command,
                    ..
                } => Some(SchedulerEntry {
                    handle: NativeHandle::new(unique(managed_handle(marker.id).0)),
                    marker: Some(marker.clone()),
                    schedule: schedule.clone(),
                    command: command.clone(),
                }),
            })
            .collect()
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.lines.iter().any(|l| l.managed_id() == Some(id))
    }

    fn managed_line(spec: &EntrySpec) -> Line {
        let raw = render_line(spec);
        Line::Managed {
            raw,
            marker: spec.marker.clone(),
            schedule: spec.schedule.clone(),
            command: spec.command.clone(),
        }
    }

    /// Append a new managed line.
    pub fn insert(&mut self, spec: &EntrySpec) -> Result<(), SchedulerError> {
        validate_spec(spec)?;
        if self.contains(spec.id()) {
            return Err(SchedulerError::AlreadyExists(spec.id()));
        }
        self.lines.push(Self::managed_line(spec));
        Ok(())
    }

    /// Rewrite the first line carrying `id` in place and drop any others.
    pub fn replace(&mut self, id: Uuid, spec: &EntrySpec) -> Result<(), SchedulerError> {
        validate_spec(spec)?;
        let first = self
            .lines
            .iter()
            .position(|l| l.managed_id() == Some(id))
            .ok_or(SchedulerError::NotFound(id))?;

        self.lines[first] = Self::managed_line(spec);
        let mut index = 0;
        self.lines.retain(|line| {
            let keep = index == first || line.managed_id() != Some(id);
            index += 1;
            keep
        });
        Ok(())
    }

    /// Drop every line carrying `id`; returns how many were removed.
    pub fn remove(&mut self, id: Uuid) -> usize {
        let before = self.lines.len();
        self.lines.retain(|l| l.managed_id() != Some(id));
        before - self.lines.len()
    }

    /// Put a marker on the foreign line identified by `handle`.
    pub fn adopt(&mut self, handle: &NativeHandle, marker: &EntryMarker) -> Result<(), SchedulerError> {
        if self.contains(marker.id) {
            return Err(SchedulerError::AlreadyExists(marker.id));
        }

        let entries = self.entries();
        let position = entries
            .iter()
            .position(|e| &e.handle == handle)
            .ok_or_else(|| SchedulerError::InvalidEntry(format!("no crontab line {}", handle)))?;
        let entry = &entries[position];
        if entry.is_managed() {
            return Err(SchedulerError::InvalidEntry(format!(
                "{} is already managed",
                handle
            )));
        }
        if entry.schedule.starts_with('@') {
            return Err(SchedulerError::InvalidEntry(format!(
                "{} uses '{}', which has no 5-field form",
                handle, entry.schedule
            )));
        }
        if entry.command.replace("\\%", "").contains('%') {
            return Err(SchedulerError::InvalidEntry(format!(
                "{} feeds stdin through '%'",
                handle
            )));
        }

        let spec = EntrySpec {
            marker: marker.clone(),
            schedule: entry.schedule.clone(),
            command: unescape_percent(&entry.command),
        };
        validate_spec(&spec)?;

        // Entry order matches the order of schedule lines in the file.
        let line_index = self
            .lines
            .iter()
            .enumerate()
            .filter(|(_, l)| !matches!(l, Line::Other(_)))
            .nth(position)
            .map(|(i, _)| i)
            .ok_or_else(|| SchedulerError::InvalidEntry(format!("no crontab line {}", handle)))?;
        self.lines[line_index] = Self::managed_line(&spec);
        Ok(())
    }
}
