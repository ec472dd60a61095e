//! In-process stand-ins for `crontab` and `schtasks`.
//!
//! Both implement [`CommandRunner`], so the real adapters run unchanged
//! against them. Used by this crate's tests and by the reconciler and
//! daemon test suites.

use std::collections::BTreeMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use cronsync_protocols::{CommandOutput, CommandRunner, CommandSpec};

use crate::taskscheduler::{TaskDetails, TaskRow, decode_document, render_task_list};

fn unavailable(program: &str) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("{}: not available", program))
}

/// A single user's crontab.
#[derive(Default)]
pub struct FakeCrontab {
    table: Mutex<Option<String>>,
    installs: AtomicUsize,
    fail_next_install: AtomicBool,
    unavailable: AtomicBool,
}

impl FakeCrontab {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(text: impl Into<String>) -> Self {
        let fake = Self::default();
        fake.set_table(text);
        fake
    }

    /// Current table text; empty when none is installed.
    pub fn table(&self) -> String {
        self.table.lock().clone().unwrap_or_default()
    }

    /// Edit the table behind the agent's back.
    pub fn set_table(&self, text: impl Into<String>) {
        *self.table.lock() = Some(text.into());
    }

    /// Successful installs so far.
    pub fn installs(&self) -> usize {
        self.installs.load(Ordering::SeqCst)
    }

    /// Make the next install fail without touching the table.
    pub fn fail_next_install(&self) {
        self.fail_next_install.store(true, Ordering::SeqCst);
    }

    /// Make every invocation fail as if the binary were missing.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl CommandRunner for FakeCrontab {
    async fn run(&self, spec: &CommandSpec) -> io::Result<CommandOutput> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(unavailable(&spec.program));
        }

        // `-u <user>` is accepted and ignored.
        let mut args: &[String] = &spec.args;
        if args.first().map(String::as_str) == Some("-u") {
            args = &args[args.len().min(2)..];
        }
        let args: Vec<&str> = args.iter().map(String::as_str).collect();

        match args.as_slice() {
            ["-l"] => Ok(match self.table.lock().as_ref() {
                Some(text) => CommandOutput::ok(text.clone()),
                None => CommandOutput::failed(1, "no crontab for agent"),
            }),
            [path] => {
                let text = std::fs::read_to_string(path)?;
                if self.fail_next_install.swap(false, Ordering::SeqCst) {
                    return Ok(CommandOutput::failed(1, "crontab: cannot lock table"));
                }
                *self.table.lock() = Some(text);
                self.installs.fetch_add(1, Ordering::SeqCst);
                Ok(CommandOutput::ok(""))
            }
            _ => Ok(CommandOutput::failed(1, "usage: crontab [-u user] file | -l")),
        }
    }
}

#[derive(Debug, Clone)]
struct FakeTask {
    document: String,
    details: TaskDetails,
}

/// A Task Scheduler holding definitions keyed by task path.
#[derive(Default)]
pub struct FakeTaskScheduler {
    tasks: Mutex<BTreeMap<String, FakeTask>>,
    imports: AtomicUsize,
    fail_next_import: AtomicBool,
    unavailable: AtomicBool,
}

impl FakeTaskScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task the agent did not create.
    pub fn insert_foreign(&self, path: &str, command: &str, arguments: &str) {
        let document = format!(
            "<?xml version=\"1.0\" encoding=\"UTF-16\"?>\n<Task version=\"1.2\"><RegistrationInfo><Author>admin</Author></RegistrationInfo><Actions><Exec><Command>{}</Command><Arguments>{}</Arguments></Exec></Actions></Task>",
            command, arguments
        );
        self.store(path, document);
    }

    pub fn paths(&self) -> Vec<String> {
        self.tasks.lock().keys().cloned().collect()
    }

    /// The definition last imported at `path`.
    pub fn document(&self, path: &str) -> Option<String> {
        self.tasks.lock().get(path).map(|t| t.document.clone())
    }

    /// Replace a definition the way an operator editing it by hand would.
    pub fn set_document(&self, path: &str, document: impl Into<String>) {
        self.store(path, document.into());
    }

    pub fn imports(&self) -> usize {
        self.imports.load(Ordering::SeqCst)
    }

    pub fn fail_next_import(&self) {
        self.fail_next_import.store(true, Ordering::SeqCst);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn store(&self, path: &str, document: String) {
        let details = TaskDetails::parse(&document);
        self.tasks
            .lock()
            .insert(path.to_string(), FakeTask { document, details });
    }

    fn listing(&self) -> String {
        let rows: Vec<TaskRow> = self
            .tasks
            .lock()
            .iter()
            .map(|(path, task)| TaskRow {
                name: path.clone(),
                task_to_run: task.details.command_line(),
                comment: task.details.description.clone().unwrap_or_default(),
                schedule_type: "Daily".to_string(),
            })
            .collect();
        render_task_list(&rows)
    }
}

#[async_trait]
impl CommandRunner for FakeTaskScheduler {
    async fn run(&self, spec: &CommandSpec) -> io::Result<CommandOutput> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(unavailable(&spec.program));
        }

        let args: Vec<&str> = spec.args.iter().map(String::as_str).collect();
        let missing = |path: &str| {
            CommandOutput::failed(1, format!("ERROR: The system cannot find the file specified: {}", path))
        };

        match args.as_slice() {
            ["/Query", "/FO", "CSV", "/V"] => Ok(CommandOutput::ok(self.listing())),
            ["/Query", "/TN", path, "/XML"] => Ok(match self.document(path) {
                Some(document) => CommandOutput::ok(document),
                None => missing(*path),
            }),
            ["/Create", "/TN", path, "/XML", file, "/F"] => {
                let document = decode_document(&std::fs::read(file)?);
                if self.fail_next_import.swap(false, Ordering::SeqCst) {
                    return Ok(CommandOutput::failed(1, "ERROR: Access is denied."));
                }
                self.store(*path, document);
                self.imports.fetch_add(1, Ordering::SeqCst);
                Ok(CommandOutput::ok(format!(
                    "SUCCESS: The scheduled task \"{}\" has successfully been created.",
                    path
                )))
            }
            ["/Delete", "/TN", path, "/F"] => Ok(match self.tasks.lock().remove(*path) {
                Some(_) => CommandOutput::ok("SUCCESS"),
                None => missing(*path),
            }),
            _ => Ok(CommandOutput::failed(1, "ERROR: Invalid syntax.")),
        }
    }
}
