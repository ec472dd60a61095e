//! Windows Task Scheduler adapter.
//!
//! One task per managed job at `<folder>\<namespace>\<name>-<id8>`, driven
//! through `schtasks.exe`. Definitions are imported from generated XML so
//! the trigger set, principal and settings are fully controlled.

mod query;
mod trigger;
mod xml;

pub use query::{TaskRow, parse_csv, parse_task_list, render_task_list};
pub use trigger::{DaySelection, MAX_TRIGGERS, TimeOfDay, TriggerPlan, translate};
pub use xml::{
    TaskDetails, decode_document, encode_utf16, marker_text, parse_marker, render_task,
    trigger_signatures, triggers_match,
};

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use cronsync_manifest::CronExpr;
use cronsync_protocols::{
    CommandOutput, CommandRunner, CommandSpec, EntryMarker, EntrySpec, NativeHandle,
    SchedulerAdapter, SchedulerEntry, SchedulerError, SchedulerKind,
};

const SCHTASKS: &str = "schtasks";
const SYSTEM_FOLDER: &str = "\\Microsoft\\";

pub struct TaskSchedulerAdapter {
    runner: Arc<dyn CommandRunner>,
    folder: String,
    timeout: Duration,
    write_lock: Mutex<()>,
}

/// A managed task found in the listing.
struct ManagedTask {
    path: String,
    entry: SchedulerEntry,
}

impl TaskSchedulerAdapter {
    pub fn new(runner: Arc<dyn CommandRunner>, folder: impl Into<String>) -> Self {
        let folder = folder.into();
        let folder = format!("\\{}", folder.trim_matches('\\'));
        Self {
            runner,
            folder,
            timeout: Duration::from_secs(30),
            write_lock: Mutex::new(()),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn folder(&self) -> &str {
        &self.folder
    }

    /// Task path for a managed job.
    pub fn task_path(&self, marker: &EntryMarker) -> String {
        let id = marker.id.simple().to_string();
        format!(
            "{}\\{}\\{}-{}",
            self.folder,
            marker.namespace,
            marker.name,
            &id[..8]
        )
    }

    async fn schtasks<I, S>(&self, args: I) -> Result<CommandOutput, SchedulerError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let spec = CommandSpec::new(SCHTASKS).args(args).timeout(self.timeout);
        debug!("Running {}", spec.display());
        let output = self
            .runner
            .run(&spec)
            .await
            .map_err(|e| SchedulerError::Unavailable(format!("{}: {}", spec.display(), e)))?;
        if output.success() {
            Ok(output)
        } else {
            Err(SchedulerError::CommandFailed {
                command: spec.display(),
                code: output.code,
                stderr: output.stderr.trim().to_string(),
            })
        }
    }

    async fn export(&self, path: &str) -> Result<String, SchedulerError> {
        Ok(self.schtasks(["/Query", "/TN", path, "/XML"]).await?.stdout)
    }

    async fn import(&self, path: &str, document: &str) -> Result<(), SchedulerError> {
        let mut file = tempfile::Builder::new()
            .prefix("cronsync-task-")
            .suffix(".xml")
            .tempfile()?;
        file.write_all(&encode_utf16(document))?;
        file.flush()?;
        let file_path = file.path().to_string_lossy().into_owned();
        self.schtasks(["/Create", "/TN", path, "/XML", file_path.as_str(), "/F"])
            .await?;
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<(), SchedulerError> {
        self.schtasks(["/Delete", "/TN", path, "/F"]).await?;
        Ok(())
    }

    async fn rows(&self) -> Result<Vec<TaskRow>, SchedulerError> {
        let output = self
            .schtasks(["/Query", "/FO", "CSV", "/V"])
            .await
            .map_err(|e| match e {
                SchedulerError::CommandFailed { .. } => SchedulerError::Unavailable(e.to_string()),
                other => other,
            })?;
        Ok(parse_task_list(&output.stdout)?
            .into_iter()
            .filter(|row| !row.name.starts_with(SYSTEM_FOLDER))
            .collect())
    }

    async fn scan(&self) -> Result<(Vec<ManagedTask>, Vec<SchedulerEntry>), SchedulerError> {
        let mut managed = Vec::new();
        let mut foreign = Vec::new();

        for row in self.rows().await? {
            if parse_marker(&row.comment).is_none() {
                foreign.push(SchedulerEntry {
                    handle: NativeHandle::new(row.name.clone()),
                    marker: None,
                    schedule: row.schedule_type.clone(),
                    command: row.task_to_run.clone(),
                });
                continue;
            }

            // Only the definition keeps the action's program and arguments apart.
            let document = match self.export(&row.name).await {
                Ok(document) => Some(document),
                Err(e) => {
                    warn!("Could not export task {}: {}", row.name, e);
                    None
                }
            };
            let details = match document.as_deref() {
                Some(document) => TaskDetails::parse(document),
                None => TaskDetails {
                    description: Some(row.comment.clone()),
                    ..Default::default()
                },
            };
            let description = details.description.clone().unwrap_or(row.comment.clone());
            let Some((marker, recorded)) = parse_marker(&description) else {
                continue;
            };
            let command = details
                .shell_command()
                .unwrap_or_else(|| row.task_to_run.clone());

            // The recorded schedule only stands while the live triggers still render from it.
            let schedule = match (recorded, document.as_deref()) {
                (Some(recorded), Some(document)) if !recorded_triggers_match(&recorded, document) => {
                    debug!("Triggers of {} no longer match '{}'", row.name, recorded);
                    String::new()
                }
                (recorded, _) => recorded.unwrap_or_default(),
            };

            managed.push(ManagedTask {
                path: row.name.clone(),
                entry: SchedulerEntry {
                    handle: NativeHandle::new(row.name),
                    marker: Some(marker),
                    schedule,
                    command,
                },
            });
        }
        Ok((managed, foreign))
    }

    fn render(&self, entry: &EntrySpec) -> Result<(String, String), SchedulerError> {
        let expr = CronExpr::parse(&entry.schedule).map_err(|e| {
            SchedulerError::InvalidEntry(format!("schedule '{}': {}", entry.schedule, e))
        })?;
        if entry.command.contains(['\n', '\r']) {
            return Err(SchedulerError::InvalidEntry(
                "command spans several lines".to_string(),
            ));
        }
        let plan = translate(&expr)?;
        let path = self.task_path(&entry.marker);
        let document = render_task(&path, entry, &plan);
        Ok((path, document))
    }
}

fn recorded_triggers_match(schedule: &str, document: &str) -> bool {
    CronExpr::parse(schedule)
        .ok()
        .and_then(|expr| translate(&expr).ok())
        .is_some_and(|plan| triggers_match(&plan, document))
}

#[async_trait]
impl SchedulerAdapter for TaskSchedulerAdapter {
    fn kind(&self) -> SchedulerKind {
        SchedulerKind::TaskScheduler
    }

    async fn list(&self) -> Result<Vec<SchedulerEntry>, SchedulerError> {
        let (managed, foreign) = self.scan().await?;
        Ok(managed.into_iter().map(|t| t.entry).chain(foreign).collect())
    }

    async fn create(&self, entry: &EntrySpec) -> Result<(), SchedulerError> {
        let _guard = self.write_lock.lock().await;
        let (path, document) = self.render(entry)?;
        let (managed, _) = self.scan().await?;
        if managed.iter().any(|t| t.entry.managed_id() == Some(entry.id())) {
            return Err(SchedulerError::AlreadyExists(entry.id()));
        }
        self.import(&path, &document).await?;
        info!("Created task {}", path);
        Ok(())
    }

    async fn update(&self, id: Uuid, entry: &EntrySpec) -> Result<(), SchedulerError> {
        let _guard = self.write_lock.lock().await;
        let (path, document) = self.render(entry)?;
        let (managed, _) = self.scan().await?;
        let existing: Vec<&ManagedTask> = managed
            .iter()
            .filter(|t| t.entry.managed_id() == Some(id))
            .collect();
        if existing.is_empty() {
            return Err(SchedulerError::NotFound(id));
        }

        // /F overwrites in place, so the new definition lands before stale copies go.
        self.import(&path, &document).await?;
        for task in existing.iter().filter(|t| !t.path.eq_ignore_ascii_case(&path)) {
            self.remove(&task.path).await?;
            debug!("Removed superseded task {}", task.path);
        }
        info!("Updated task {}", path);
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<(), SchedulerError> {
        let _guard = self.write_lock.lock().await;
        let (managed, _) = self.scan().await?;
        for task in managed.iter().filter(|t| t.entry.managed_id() == Some(id)) {
            self.remove(&task.path).await?;
            info!("Deleted task {}", task.path);
        }
        Ok(())
    }

    async fn exists(&self, id: Uuid) -> Result<bool, SchedulerError> {
        let (managed, _) = self.scan().await?;
        Ok(managed.iter().any(|t| t.entry.managed_id() == Some(id)))
    }

    /// Writes the marker into the task's Description and re-imports it at
    /// the same path. Triggers and actions are kept; the first reconcile
    /// against a manifest moves the task into the managed folder.
    async fn adopt(&self, handle: &NativeHandle, marker: &EntryMarker) -> Result<(), SchedulerError> {
        let _guard = self.write_lock.lock().await;
        let (managed, foreign) = self.scan().await?;
        if managed.iter().any(|t| t.entry.managed_id() == Some(marker.id)) {
            return Err(SchedulerError::AlreadyExists(marker.id));
        }
        if managed.iter().any(|t| t.entry.handle == *handle) {
            return Err(SchedulerError::InvalidEntry(format!(
                "{} is already managed",
                handle
            )));
        }
        if !foreign.iter().any(|e| e.handle == *handle) {
            return Err(SchedulerError::InvalidEntry(format!("no task {}", handle)));
        }

        let document = self.export(handle.as_str()).await?;
        let updated = xml::with_description(&document, &marker_text(marker, None));
        self.import(handle.as_str(), &updated).await?;
        info!(
            "Adopted task {} as {}/{} ({})",
            handle, marker.namespace, marker.name, marker.id
        );
        Ok(())
    }
}

#[cfg(test)]
#[path = "taskscheduler_tests.rs"]
mod tests;
