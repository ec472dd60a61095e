//! Classification of native entries into job instances.

use std::collections::HashMap;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use cronsync_protocols::{
    DEFAULT_NAMESPACE, InstanceSource, InstanceStatus, JobInstance, JobManifest, SchedulerEntry,
};

use crate::callback::CallbackInjector;

static NAME_FLAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\bcheckin\b.*?--name[ =]['"]?([A-Za-z0-9][A-Za-z0-9._-]*)"#)
        .expect("name pattern is valid")
});
static NAMESPACE_FLAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\bcheckin\b.*?--namespace[ =]['"]?([A-Za-z0-9][A-Za-z0-9._-]*)"#)
        .expect("namespace pattern is valid")
});
/// `checkin "job" "namespace"` as written by hand or by older wrappers.
static POSITIONAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\bcheckin\s+['"]?([A-Za-z0-9][A-Za-z0-9._-]*)['"]?(?:\s+['"]?([A-Za-z0-9][A-Za-z0-9._-]*)['"]?)?"#)
        .expect("positional pattern is valid")
});

/// Name and namespace recovered from an embedded check-in invocation.
fn recover_name(command: &str) -> Option<(String, Option<String>)> {
    if let Some(wrapped) = CallbackInjector::unwrap(command) {
        return Some((wrapped.name, Some(wrapped.namespace)));
    }
    if let Some(name) = NAME_FLAG_RE.captures(command) {
        let namespace = NAMESPACE_FLAG_RE
            .captures(command)
            .map(|c| c[1].to_string());
        return Some((name[1].to_string(), namespace));
    }
    let caps = POSITIONAL_RE.captures(command)?;
    Some((caps[1].to_string(), caps.get(2).map(|m| m.as_str().to_string())))
}

/// Stable fallback name derived from the native handle.
fn fallback_name(entry: &SchedulerEntry) -> String {
    let digest = hex::encode(Sha256::digest(entry.handle.as_str().as_bytes()));
    format!("discovered-{}", &digest[..8])
}

/// Every entry without an identity marker, as a discovered instance.
///
/// Discovered instances carry no UUID and are never planned against.
pub fn discover(entries: &[SchedulerEntry], now: DateTime<Utc>) -> Vec<JobInstance> {
    entries
        .iter()
        .filter(|e| !e.is_managed())
        .map(|entry| {
            let (job_name, namespace) = match recover_name(&entry.command) {
                Some((name, namespace)) => (name, namespace),
                None => (fallback_name(entry), None),
            };
            let original_command = CallbackInjector::unwrap(&entry.command)
                .map(|w| w.original)
                .unwrap_or_else(|| entry.command.clone());
            JobInstance {
                uuid: None,
                namespace: namespace.unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
                job_name,
                source: InstanceSource::Discovered,
                status: InstanceStatus::Scheduled,
                last_seen: now,
                native_handle: Some(entry.handle.clone()),
                schedule: entry.schedule.clone(),
                original_command,
            }
        })
        .collect()
}

/// Managed and discovered instances as observed after a cycle.
///
/// Active manifests with a native entry are `scheduled`; paused manifests
/// are reported as `paused` with no handle. Active manifests whose entry is
/// missing (a failed create) are left out until it exists.
pub fn inventory(
    manifests: &[JobManifest],
    entries: &[SchedulerEntry],
    injector: &CallbackInjector,
    now: DateTime<Utc>,
) -> Vec<JobInstance> {
    let mut by_id: HashMap<Uuid, &SchedulerEntry> = HashMap::new();
    for entry in entries {
        if let Some(id) = entry.managed_id() {
            by_id.entry(id).or_insert(entry);
        }
    }

    let mut instances: Vec<JobInstance> = manifests
        .iter()
        .filter(|m| m.enabled)
        .filter_map(|manifest| {
            let (status, handle) = if manifest.paused {
                (InstanceStatus::Paused, None)
            } else {
                let entry = by_id.get(&manifest.id)?;
                (InstanceStatus::Scheduled, Some(entry.handle.clone()))
            };
            Some(JobInstance {
                uuid: Some(manifest.id),
                namespace: manifest.namespace.clone(),
                job_name: manifest.name.clone(),
                source: InstanceSource::Managed,
                status,
                last_seen: now,
                native_handle: handle,
                schedule: manifest.schedule.clone(),
                original_command: injector.original(manifest),
            })
        })
        .collect();

    instances.extend(discover(entries, now));
    instances
}

#[cfg(test)]
#[path = "discovery_tests.rs"]
mod tests;
