//! Explicit promotion of a discovered entry to managed.
//!
//! Only ever reached from an operator command; discovery and the
//! reconciler never adopt on their own.

use tracing::info;

use cronsync_protocols::{EntryMarker, NativeHandle, SchedulerAdapter, SchedulerEntry};

use crate::error::AdoptError;

/// Attach `marker` to the foreign entry at `handle` and return the entry as
/// it now reads back.
///
/// The next cycle treats the entry like any other managed one: without a
/// manifest carrying `marker.id` it is deleted.
pub async fn adopt(
    adapter: &dyn SchedulerAdapter,
    handle: &NativeHandle,
    marker: &EntryMarker,
) -> Result<SchedulerEntry, AdoptError> {
    let entries = adapter.list().await?;
    let target = entries
        .iter()
        .find(|e| &e.handle == handle)
        .ok_or_else(|| AdoptError::UnknownHandle(handle.clone()))?;
    if target.is_managed() {
        return Err(AdoptError::AlreadyManaged(handle.clone()));
    }
    if entries.iter().any(|e| e.managed_id() == Some(marker.id)) {
        return Err(AdoptError::IdInUse(marker.id));
    }

    adapter.adopt(handle, marker).await?;

    let adopted = adapter
        .list()
        .await?
        .into_iter()
        .find(|e| e.marker.as_ref() == Some(marker))
        .ok_or_else(|| AdoptError::UnknownHandle(handle.clone()))?;
    info!(
        handle = %handle,
        job_id = %marker.id,
        job = %format!("{}/{}", marker.namespace, marker.name),
        "Adopted discovered entry"
    );
    Ok(adopted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cronsync_scheduler::CrontabAdapter;
    use cronsync_scheduler::testing::FakeCrontab;
    use std::sync::Arc;
    use uuid::Uuid;

    const TABLE: &str = "MAILTO=root\n30 4 * * * /usr/local/bin/rotate --all\n";

    fn marker() -> EntryMarker {
        EntryMarker {
            id: Uuid::new_v4(),
            namespace: "ops".to_string(),
            name: "rotate".to_string(),
        }
    }

    async fn foreign_handle(adapter: &CrontabAdapter) -> NativeHandle {
        adapter.list().await.unwrap()[0].handle.clone()
    }

    #[tokio::test]
    async fn test_adopt_marks_entry() {
        let fake = Arc::new(FakeCrontab::with_table(TABLE));
        let adapter = CrontabAdapter::new(fake.clone());
        let handle = foreign_handle(&adapter).await;
        let marker = marker();

        let entry = adopt(&adapter, &handle, &marker).await.unwrap();
        assert_eq!(entry.marker, Some(marker.clone()));
        assert_eq!(entry.schedule, "30 4 * * *");
        assert_eq!(entry.command, "/usr/local/bin/rotate --all");
        assert!(fake.table().starts_with("MAILTO=root\n"));
        assert!(fake.table().contains(&marker.id.to_string()));
    }

    #[tokio::test]
    async fn test_adopt_rejections() {
        let fake = Arc::new(FakeCrontab::with_table(TABLE));
        let adapter = CrontabAdapter::new(fake.clone());
        let handle = foreign_handle(&adapter).await;
        let marker = marker();

        let unknown = adopt(&adapter, &NativeHandle::new("crontab:line:nope"), &marker).await;
        assert!(matches!(unknown, Err(AdoptError::UnknownHandle(_))));

        let adopted = adopt(&adapter, &handle, &marker).await.unwrap();
        let again = adopt(&adapter, &adopted.handle, &marker).await;
        assert!(matches!(again, Err(AdoptError::AlreadyManaged(_))));

        fake.set_table(format!("{}15 * * * * /bin/other\n", fake.table()));
        let other = adapter
            .list()
            .await
            .unwrap()
            .into_iter()
            .find(|e| !e.is_managed())
            .unwrap();
        let reused = adopt(&adapter, &other.handle, &marker).await;
        assert!(matches!(reused, Err(AdoptError::IdInUse(id)) if id == marker.id));
    }
}
