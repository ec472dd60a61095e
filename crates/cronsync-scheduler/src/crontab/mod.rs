//! POSIX crontab adapter.
//!
//! The whole table is read with `crontab -l`, edited in memory, and installed
//! with a single `crontab <file>` call. Lines without the agent's marker are
//! carried through unchanged.

mod table;

pub use table::{CrontabTable, MARKER_PREFIX, managed_handle, render_line};

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use cronsync_protocols::{
    CommandRunner, CommandSpec, EntryMarker, EntrySpec, NativeHandle, PlanAction, SchedulerAdapter,
    SchedulerEntry, SchedulerError, SchedulerKind,
};

const CRONTAB: &str = "crontab";

pub struct CrontabAdapter {
    runner: Arc<dyn CommandRunner>,
    user: Option<String>,
    timeout: Duration,
    /// Serializes read-modify-install sequences issued by this process.
    write_lock: Mutex<()>,
}

impl CrontabAdapter {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            user: None,
            timeout: Duration::from_secs(30),
            write_lock: Mutex::new(()),
        }
    }

    /// Operate on another user's table (`crontab -u <user>`).
    pub fn with_user(mut self, user: Option<String>) -> Self {
        self.user = user.filter(|u| !u.trim().is_empty());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn command(&self) -> CommandSpec {
        let mut spec = CommandSpec::new(CRONTAB).timeout(self.timeout);
        if let Some(user) = &self.user {
            spec = spec.args(["-u", user.as_str()]);
        }
        spec
    }

    /// Read the current table. A user without a crontab has an empty one.
    pub async fn read(&self) -> Result<CrontabTable, SchedulerError> {
        let spec = self.command().arg("-l");
        let output = self
            .runner
            .run(&spec)
            .await
            .map_err(|e| SchedulerError::Unavailable(format!("{}: {}", spec.display(), e)))?;

        if output.success() {
            return Ok(CrontabTable::parse(&output.stdout));
        }

        let stderr = output.stderr.trim();
        if output.code == Some(1) && stderr.to_ascii_lowercase().contains("no crontab") {
            debug!("No crontab installed yet");
            return Ok(CrontabTable::default());
        }

        Err(SchedulerError::Unavailable(format!(
            "{} exited with {:?}: {}",
            spec.display(),
            output.code,
            stderr
        )))
    }

    /// Replace the whole table in one step.
    async fn install(&self, table: &CrontabTable) -> Result<(), SchedulerError> {
        let mut file = tempfile::Builder::new()
            .prefix("cronsync-crontab-")
            .tempfile()?;
        file.write_all(table.render().as_bytes())?;
        file.flush()?;

        let path = file.path().to_string_lossy().into_owned();
        let spec = self.command().arg(path);
        let output = self
            .runner
            .run(&spec)
            .await
            .map_err(|e| SchedulerError::Unavailable(format!("{}: {}", spec.display(), e)))?;

        if !output.success() {
            return Err(SchedulerError::CommandFailed {
                command: spec.display(),
                code: output.code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        debug!("Installed crontab ({} entries)", table.entries().len());
        Ok(())
    }

    /// Read, edit, and install only when `edit` changed something.
    async fn modify<F>(&self, edit: F) -> Result<(), SchedulerError>
    where
        F: FnOnce(&mut CrontabTable) -> Result<(), SchedulerError> + Send,
    {
        let _guard = self.write_lock.lock().await;
        let current = self.read().await?;
        let mut next = current.clone();
        edit(&mut next)?;
        if next != current {
            self.install(&next).await?;
        }
        Ok(())
    }
}

/// Copy an install failure onto every action that depended on it.
fn repeat_error(err: &SchedulerError) -> SchedulerError {
    match err {
        SchedulerError::Unavailable(msg) => SchedulerError::Unavailable(msg.clone()),
        SchedulerError::CommandFailed {
            command,
            code,
            stderr,
        } => SchedulerError::CommandFailed {
            command: command.clone(),
            code: *code,
            stderr: stderr.clone(),
        },
        other => SchedulerError::Unavailable(other.to_string()),
    }
}

#[async_trait]
impl SchedulerAdapter for CrontabAdapter {
    fn kind(&self) -> SchedulerKind {
        SchedulerKind::Crontab
    }

    async fn list(&self) -> Result<Vec<SchedulerEntry>, SchedulerError> {
        Ok(self.read().await?.entries())
    }

    async fn create(&self, entry: &EntrySpec) -> Result<(), SchedulerError> {
        self.modify(|table| table.insert(entry)).await?;
        info!(
            "Created crontab entry {}/{} ({})",
            entry.marker.namespace,
            entry.marker.name,
            entry.id()
        );
        Ok(())
    }

    async fn update(&self, id: Uuid, entry: &EntrySpec) -> Result<(), SchedulerError> {
        self.modify(|table| table.replace(id, entry)).await?;
        info!(
            "Updated crontab entry {}/{} ({})",
            entry.marker.namespace, entry.marker.name, id
        );
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<(), SchedulerError> {
        self.modify(|table| {
            let removed = table.remove(id);
            if removed == 0 {
                debug!("Crontab entry {} already absent", id);
            }
            Ok(())
        })
        .await?;
        info!("Deleted crontab entry {}", id);
        Ok(())
    }

    async fn exists(&self, id: Uuid) -> Result<bool, SchedulerError> {
        Ok(self.read().await?.contains(id))
    }

    async fn adopt(&self, handle: &NativeHandle, marker: &EntryMarker) -> Result<(), SchedulerError> {
        self.modify(|table| table.adopt(handle, marker)).await?;
        info!(
            "Adopted crontab line {} as {}/{} ({})",
            handle, marker.namespace, marker.name, marker.id
        );
        Ok(())
    }

    /// One read, every action validated against it, one install.
    ///
    /// Actions that fail validation are reported and left out; if the
    /// install itself fails the table is untouched and every action that
    /// would have changed it reports that failure.
    async fn apply_batch(&self, actions: &[PlanAction]) -> Vec<Result<(), SchedulerError>> {
        let _guard = self.write_lock.lock().await;

        let current = match self.read().await {
            Ok(table) => table,
            Err(e) => return actions.iter().map(|_| Err(repeat_error(&e))).collect(),
        };

        let mut next = current.clone();
        let mut results: Vec<Result<(), SchedulerError>> = actions
            .iter()
            .map(|action| match action {
                PlanAction::Create { spec } => next.insert(spec),
                PlanAction::Update { spec, .. } => next.replace(spec.id(), spec),
                PlanAction::Delete { marker } => {
                    next.remove(marker.id);
                    Ok(())
                }
                PlanAction::NoOp { .. } => Ok(()),
            })
            .collect();

        if next == current {
            return results;
        }

        if let Err(e) = self.install(&next).await {
            warn!("Crontab install failed, table left unchanged: {}", e);
            for (result, action) in results.iter_mut().zip(actions) {
                if result.is_ok() && action.is_mutation() {
                    *result = Err(repeat_error(&e));
                }
            }
        } else {
            info!(
                "Installed crontab with {} change(s)",
                actions.iter().filter(|a| a.is_mutation()).count()
            );
        }
        results
    }
}

#[cfg(test)]
#[path = "crontab_tests.rs"]
mod tests;
