//! One-shot subcommands: validate, discover, adopt, version.

use std::path::Path;

use chrono::Utc;
use uuid::Uuid;

use cronsync_config::Config;
use cronsync_daemon::local_adapter;
use cronsync_manifest::{ManifestParser, RevisionError};
use cronsync_protocols::{
    EntryMarker, InstanceSource, InstanceStatus, JobInstance, NativeHandle, Revision,
    SchedulerEntry,
};
use cronsync_reconcile::{CallbackInjector, discover};

/// Parse `dir` as a revision. Returns whether it would be accepted cleanly.
pub(crate) fn validate(dir: &Path) -> bool {
    let revision = Revision {
        path: dir.to_path_buf(),
        id: "local".to_string(),
    };
    match ManifestParser::parse(&revision) {
        Ok(parsed) => {
            for error in &parsed.errors {
                println!("error: {}", error);
            }
            println!(
                "{} valid manifest(s), {} file(s) with errors",
                parsed.manifests.len(),
                parsed.errors.len()
            );
            parsed.errors.is_empty()
        }
        Err(RevisionError::DuplicateIds { duplicates, .. }) => {
            for duplicate in &duplicates {
                let files: Vec<String> = duplicate
                    .files
                    .iter()
                    .map(|f| f.display().to_string())
                    .collect();
                println!("duplicate id {}: {}", duplicate.id, files.join(", "));
            }
            println!("revision rejected: {} id(s) used more than once", duplicates.len());
            false
        }
        Err(e) => {
            println!("error: {}", e);
            false
        }
    }
}

/// Managed entries with their unwrapped commands, then foreign entries.
fn local_inventory(entries: &[SchedulerEntry]) -> Vec<JobInstance> {
    let now = Utc::now();
    let mut instances: Vec<JobInstance> = entries
        .iter()
        .filter_map(|entry| {
            let marker = entry.marker.as_ref()?;
            let original = CallbackInjector::unwrap(&entry.command)
                .map(|w| w.original)
                .unwrap_or_else(|| entry.command.clone());
            Some(JobInstance {
                uuid: Some(marker.id),
                namespace: marker.namespace.clone(),
                job_name: marker.name.clone(),
                source: InstanceSource::Managed,
                status: InstanceStatus::Scheduled,
                last_seen: now,
                native_handle: Some(entry.handle.clone()),
                schedule: entry.schedule.clone(),
                original_command: original,
            })
        })
        .collect();
    instances.extend(discover(entries, now));
    instances
}

pub(crate) async fn discover_local(config: &Config, json: bool) -> anyhow::Result<()> {
    let adapter = local_adapter(config);
    let entries = adapter.list().await?;
    let instances = local_inventory(&entries);

    if json {
        println!("{}", serde_json::to_string_pretty(&instances)?);
        return Ok(());
    }

    println!(
        "{:<10} {:<28} {:<16} {:<30} COMMAND",
        "SOURCE", "HANDLE", "SCHEDULE", "NAME"
    );
    for instance in &instances {
        let source = match instance.source {
            InstanceSource::Managed => "managed",
            InstanceSource::Discovered => "discovered",
        };
        let handle = instance
            .native_handle
            .as_ref()
            .map(|h| h.as_str())
            .unwrap_or("-");
        println!(
            "{:<10} {:<28} {:<16} {:<30} {}",
            source,
            handle,
            instance.schedule,
            format!("{}/{}", instance.namespace, instance.job_name),
            instance.original_command
        );
    }
    Ok(())
}

pub(crate) async fn adopt_entry(
    config: &Config,
    handle: &str,
    id: Uuid,
    name: String,
    namespace: String,
) -> anyhow::Result<()> {
    let adapter = local_adapter(config);
    let marker = EntryMarker {
        id,
        namespace,
        name,
    };
    let entry = cronsync_reconcile::adopt(adapter.as_ref(), &NativeHandle::new(handle), &marker).await?;
    println!(
        "Adopted {} as {}/{} ({})",
        handle, marker.namespace, marker.name, marker.id
    );
    println!("New handle: {}", entry.handle.as_str());
    println!(
        "Commit a manifest with id {} or the next reconciliation cycle will remove this entry.",
        marker.id
    );
    Ok(())
}

pub(crate) fn print_version() {
    println!("cronsync-agent {}", env!("CARGO_PKG_VERSION"));
    println!("platform: {}/{}", std::env::consts::OS, std::env::consts::ARCH);
}
