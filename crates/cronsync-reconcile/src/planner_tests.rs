use super::*;
use crate::callback::ShellFlavor;
use cronsync_protocols::{EntryMarker, NativeHandle};
use std::collections::BTreeMap;
use std::path::PathBuf;

fn reconciler() -> Reconciler {
    Reconciler::new(CallbackInjector::new(ShellFlavor::Posix, "/usr/bin/cronsync-agent"))
}

fn manifest(name: &str) -> JobManifest {
    JobManifest {
        id: Uuid::new_v4(),
        name: name.to_string(),
        namespace: "default".to_string(),
        schedule: "*/15 * * * *".to_string(),
        command: format!("/opt/{}.sh", name),
        args: vec![],
        env: BTreeMap::new(),
        enabled: true,
        paused: false,
        timezone: None,
        labels: BTreeMap::new(),
        revision: "r1".to_string(),
        source_file: PathBuf::from(format!("{}.yaml", name)),
    }
}

fn installed(reconciler: &Reconciler, manifest: &JobManifest) -> SchedulerEntry {
    let spec = reconciler.desired_spec(manifest);
    SchedulerEntry {
        handle: NativeHandle::new(format!("crontab:{}", manifest.id)),
        marker: Some(spec.marker),
        schedule: spec.schedule,
        command: spec.command,
    }
}

fn foreign(command: &str) -> SchedulerEntry {
    SchedulerEntry {
        handle: NativeHandle::new(format!("crontab:line:{}", command.len())),
        marker: None,
        schedule: "0 * * * *".to_string(),
        command: command.to_string(),
    }
}

#[test]
fn test_missing_entry_is_created() {
    let r = reconciler();
    let job = manifest("backup");
    let plan = r.plan(&[job.clone()], &[]);
    assert_eq!(plan.actions.len(), 1);
    match &plan.actions[0] {
        PlanAction::Create { spec } => {
            assert_eq!(spec.id(), job.id);
            assert!(spec.command.contains("checkin"));
            assert!(spec.command.contains(&job.id.to_string()));
        }
        other => panic!("expected create, got {other:?}"),
    }
}

#[test]
fn test_matching_entry_is_noop() {
    let r = reconciler();
    let job = manifest("backup");
    let plan = r.plan(&[job.clone()], &[installed(&r, &job)]);
    assert!(plan.is_empty());
    assert_eq!(plan.summary().noop, 1);
}

#[test]
fn test_drift_reasons() {
    let r = reconciler();
    let job = manifest("backup");
    let mut entry = installed(&r, &job);
    entry.schedule = "0 * * * *".to_string();
    entry.command = "/opt/backup.sh".to_string();
    if let Some(marker) = entry.marker.as_mut() {
        marker.name = "old-name".to_string();
    }

    let plan = r.plan(&[job], &[entry]);
    match &plan.actions[0] {
        PlanAction::Update { reasons, .. } => assert_eq!(
            reasons,
            &vec![DriftReason::Schedule, DriftReason::Command, DriftReason::Identity]
        ),
        other => panic!("expected update, got {other:?}"),
    }
}

#[test]
fn test_env_change_is_command_drift() {
    let r = reconciler();
    let mut job = manifest("backup");
    let entry = installed(&r, &job);
    job.env.insert("RETENTION".to_string(), "14".to_string());

    let plan = r.plan(&[job], &[entry]);
    assert!(matches!(
        &plan.actions[0],
        PlanAction::Update { reasons, .. } if reasons == &vec![DriftReason::Command]
    ));
}

#[test]
fn test_duplicates_collapse_through_update() {
    let r = reconciler();
    let job = manifest("backup");
    let first = installed(&r, &job);
    let mut second = installed(&r, &job);
    second.handle = NativeHandle::new(format!("crontab:{}#1", job.id));

    let plan = r.plan(&[job], &[first, second]);
    assert_eq!(plan.actions.len(), 1);
    assert!(matches!(
        &plan.actions[0],
        PlanAction::Update { reasons, .. } if reasons == &vec![DriftReason::Duplicate]
    ));
}

#[test]
fn test_removed_disabled_and_paused_are_deleted() {
    let r = reconciler();
    let gone = manifest("gone");
    let mut disabled = manifest("disabled");
    let mut paused = manifest("paused");
    let entries = vec![
        installed(&r, &gone),
        installed(&r, &disabled),
        installed(&r, &paused),
    ];
    disabled.enabled = false;
    paused.paused = true;

    let plan = r.plan(&[disabled.clone(), paused.clone()], &entries);
    let deleted: Vec<Uuid> = plan
        .actions
        .iter()
        .filter(|a| matches!(a, PlanAction::Delete { .. }))
        .map(PlanAction::id)
        .collect();
    assert_eq!(deleted.len(), 3);
    assert!(deleted.contains(&gone.id));
    assert!(deleted.contains(&disabled.id));
    assert!(deleted.contains(&paused.id));
}

#[test]
fn test_foreign_entries_never_planned() {
    let r = reconciler();
    let job = manifest("backup");
    let entries = vec![
        foreign("/usr/bin/poll --quiet"),
        foreign("/usr/bin/cronsync-agent checkin --name legacy -- /bin/true"),
    ];
    let plan = r.plan(&[job.clone()], &entries);
    assert_eq!(plan.actions.len(), 1);
    assert_eq!(plan.actions[0].id(), job.id);
    assert!(r.plan(&[], &entries).actions.is_empty());
}

#[test]
fn test_action_order() {
    let r = reconciler();
    let keep = manifest("keep");
    let mut changed = manifest("changed");
    let stale = manifest("stale");
    let new_b = manifest("new-b");
    let new_a = manifest("new-a");
    let entries = vec![
        installed(&r, &keep),
        installed(&r, &changed),
        installed(&r, &stale),
    ];
    changed.schedule = "5 * * * *".to_string();

    let plan = r.plan(&[new_b, keep, changed, new_a], &entries);
    let order: Vec<(&str, &str)> = plan
        .actions
        .iter()
        .map(|a| (a.kind(), a.marker().name.as_str()))
        .collect();
    assert_eq!(
        order,
        vec![
            ("delete", "stale"),
            ("update", "changed"),
            ("create", "new-a"),
            ("create", "new-b"),
            ("noop", "keep"),
        ]
    );
}

#[test]
fn test_first_manifest_wins_for_repeated_id() {
    let r = reconciler();
    let first = manifest("first");
    let mut second = manifest("second");
    second.id = first.id;

    let plan = r.plan(&[first.clone(), second], &[]);
    assert_eq!(plan.actions.len(), 1);
    assert_eq!(plan.actions[0].marker(), &EntryMarker {
        id: first.id,
        namespace: "default".to_string(),
        name: "first".to_string(),
    });
}
