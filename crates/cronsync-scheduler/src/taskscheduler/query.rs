//! Parsing of `schtasks /Query /FO CSV /V` output.

use std::collections::HashSet;

use cronsync_protocols::SchedulerError;

const COL_NAME: &str = "TaskName";
const COL_TASK_TO_RUN: &str = "Task To Run";
const COL_COMMENT: &str = "Comment";
const COL_SCHEDULE_TYPE: &str = "Schedule Type";

/// One task from the verbose listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskRow {
    pub name: String,
    pub task_to_run: String,
    pub comment: String,
    pub schedule_type: String,
}

/// Split CSV text into records. Quoted fields may contain commas, doubled
/// quotes and line breaks.
pub fn parse_csv(text: &str) -> Vec<Vec<String>> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                c => field.push(c),
            }
            continue;
        }
        match c {
            '"' => in_quotes = true,
            ',' => record.push(std::mem::take(&mut field)),
            '\r' => {}
            '\n' => {
                record.push(std::mem::take(&mut field));
                if record.iter().any(|f| !f.is_empty()) {
                    records.push(std::mem::take(&mut record));
                } else {
                    record.clear();
                }
            }
            c => field.push(c),
        }
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }
    records
}

/// Tasks listed by `schtasks`, one row per task.
///
/// Verbose output repeats the header for every folder and a task once per
/// trigger; both are collapsed. Columns are located by their English header
/// names.
pub fn parse_task_list(text: &str) -> Result<Vec<TaskRow>, SchedulerError> {
    let mut records = parse_csv(text).into_iter();
    let Some(header) = records.next() else {
        return Ok(Vec::new());
    };

    let column = |name: &str| {
        header
            .iter()
            .position(|h| h.trim() == name)
            .ok_or_else(|| SchedulerError::Parse(format!("schtasks output has no '{}' column", name)))
    };
    let name_col = column(COL_NAME)?;
    let run_col = column(COL_TASK_TO_RUN)?;
    let comment_col = column(COL_COMMENT).ok();
    let schedule_col = column(COL_SCHEDULE_TYPE).ok();

    let mut seen = HashSet::new();
    let mut rows = Vec::new();
    for record in records {
        if record == header {
            continue;
        }
        let get = |col: Option<usize>| {
            col.and_then(|c| record.get(c))
                .map(|v| v.trim().to_string())
                .unwrap_or_default()
        };
        let name = get(Some(name_col));
        if name.is_empty() || !seen.insert(name.clone()) {
            continue;
        }
        rows.push(TaskRow {
            name,
            task_to_run: get(Some(run_col)),
            comment: get(comment_col),
            schedule_type: get(schedule_col),
        });
    }
    Ok(rows)
}

/// Render rows in the same shape `schtasks` prints. Used by the fake scheduler.
pub fn render_task_list(rows: &[TaskRow]) -> String {
    let quote = |v: &str| format!("\"{}\"", v.replace('"', "\"\""));
    let header = [
        "HostName",
        COL_NAME,
        COL_TASK_TO_RUN,
        COL_COMMENT,
        COL_SCHEDULE_TYPE,
    ];
    let header_line = header.iter().map(|h| quote(h)).collect::<Vec<_>>().join(",");

    let mut out = String::new();
    out.push_str(&header_line);
    out.push_str("\r\n");
    for row in rows {
        let fields = [
            "ENDPOINT",
            row.name.as_str(),
            row.task_to_run.as_str(),
            row.comment.as_str(),
            row.schedule_type.as_str(),
        ];
        out.push_str(&fields.iter().map(|f| quote(f)).collect::<Vec<_>>().join(","));
        out.push_str("\r\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "\"HostName\",\"TaskName\",\"Next Run Time\",\"Task To Run\",\"Comment\",\"Schedule Type\"\r\n\
\"PC\",\"\\Backup\",\"N/A\",\"C:\\bin\\backup.exe --all\",\"Nightly, \"\"full\"\"\",\"Daily \"\r\n\
\"PC\",\"\\Backup\",\"N/A\",\"C:\\bin\\backup.exe --all\",\"Nightly, \"\"full\"\"\",\"Weekly\"\r\n\
\r\n\
\"HostName\",\"TaskName\",\"Next Run Time\",\"Task To Run\",\"Comment\",\"Schedule Type\"\r\n\
\"PC\",\"\\CronSync\\ops\\job-1234abcd\",\"N/A\",\"cmd.exe /C echo hi\",\"cronsync:id=x\",\"Daily \"\r\n";

    #[test]
    fn test_parse_csv_quotes() {
        let records = parse_csv("a,\"b,c\",\"say \"\"hi\"\"\"\r\n\"multi\nline\",x\n");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], vec!["a", "b,c", "say \"hi\""]);
        assert_eq!(records[1], vec!["multi\nline", "x"]);
    }

    #[test]
    fn test_task_list_collapses_headers_and_triggers() {
        let rows = parse_task_list(LISTING).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].name, "\\Backup");
        assert_eq!(rows[0].task_to_run, "C:\\bin\\backup.exe --all");
        assert_eq!(rows[0].comment, "Nightly, \"full\"");
        assert_eq!(rows[0].schedule_type, "Daily");
        assert_eq!(rows[1].name, "\\CronSync\\ops\\job-1234abcd");
    }

    #[test]
    fn test_localized_headers_are_rejected() {
        let err = parse_task_list("\"Hostname\",\"Aufgabenname\"\r\n").unwrap_err();
        assert!(matches!(err, SchedulerError::Parse(_)));
    }

    #[test]
    fn test_empty_listing() {
        assert!(parse_task_list("").unwrap().is_empty());
    }

    #[test]
    fn test_rendered_listing_parses() {
        let rows = vec![TaskRow {
            name: "\\CronSync\\a".to_string(),
            task_to_run: "cmd.exe /C echo \"x\"".to_string(),
            comment: "c".to_string(),
            schedule_type: "Daily".to_string(),
        }];
        assert_eq!(parse_task_list(&render_task_list(&rows)).unwrap(), rows);
    }
}
