//! Plan/apply cycles against the in-memory native schedulers.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use cronsync_protocols::{
    JobManifest, PlanAction, SchedulerAdapter, SchedulerEntry, SchedulerError,
};
use cronsync_reconcile::{CallbackInjector, Reconciler, ShellFlavor};
use cronsync_scheduler::testing::{FakeCrontab, FakeTaskScheduler};
use cronsync_scheduler::{CrontabAdapter, TaskSchedulerAdapter};
use uuid::Uuid;

const FOREIGN: &str = "SHELL=/bin/bash\n# nightly vendor sync\n0 3 * * * /opt/vendor/sync.sh >/dev/null 2>&1\n@reboot /usr/bin/warmup\n";

fn manifest(name: &str, schedule: &str) -> JobManifest {
    JobManifest {
        id: Uuid::new_v4(),
        name: name.to_string(),
        namespace: "production".to_string(),
        schedule: schedule.to_string(),
        command: format!("/usr/local/bin/{}.sh", name),
        args: vec!["--since".to_string(), "1 day ago".to_string()],
        env: BTreeMap::from([("RETENTION".to_string(), "7".to_string())]),
        enabled: true,
        paused: false,
        timezone: None,
        labels: BTreeMap::new(),
        revision: "c0ffee".to_string(),
        source_file: PathBuf::from(format!("production/{}.yaml", name)),
    }
}

fn posix_reconciler() -> Reconciler {
    Reconciler::new(
        CallbackInjector::new(ShellFlavor::Posix, "/usr/local/bin/cronsync-agent")
            .with_config_path(Some("/etc/cronsync/agent.toml".to_string())),
    )
}

fn count_with_id(entries: &[SchedulerEntry], id: Uuid) -> usize {
    entries.iter().filter(|e| e.managed_id() == Some(id)).count()
}

async fn cycle(
    reconciler: &Reconciler,
    adapter: &dyn SchedulerAdapter,
    desired: &[JobManifest],
) -> usize {
    let actual = adapter.list().await.unwrap();
    let plan = reconciler.plan(desired, &actual);
    reconciler.apply(adapter, &plan).await.len()
}

#[tokio::test]
async fn test_apply_then_replan_is_empty() {
    let fake = Arc::new(FakeCrontab::with_table(FOREIGN));
    let adapter = CrontabAdapter::new(fake.clone());
    let reconciler = posix_reconciler();
    let desired = vec![
        manifest("backup", "0 2 * * *"),
        manifest("report", "0 9-17 * * 1-5"),
        manifest("poll", "*/15 * * * *"),
    ];

    assert_eq!(cycle(&reconciler, &adapter, &desired).await, 0);
    assert_eq!(fake.installs(), 1);

    let actual = adapter.list().await.unwrap();
    assert!(reconciler.plan(&desired, &actual).is_empty());

    assert_eq!(cycle(&reconciler, &adapter, &desired).await, 0);
    assert_eq!(fake.installs(), 1);
}

#[tokio::test]
async fn test_foreign_lines_survive_every_cycle() {
    let fake = Arc::new(FakeCrontab::with_table(FOREIGN));
    let adapter = CrontabAdapter::new(fake.clone());
    let reconciler = posix_reconciler();
    let mut desired = vec![manifest("backup", "0 2 * * *")];

    cycle(&reconciler, &adapter, &desired).await;
    assert!(fake.table().starts_with(FOREIGN));

    desired[0].schedule = "30 2 * * *".to_string();
    let actual = adapter.list().await.unwrap();
    let plan = reconciler.plan(&desired, &actual);
    for action in plan.mutations() {
        assert_eq!(action.id(), desired[0].id);
    }
    reconciler.apply(&adapter, &plan).await;
    assert!(fake.table().starts_with(FOREIGN));

    cycle(&reconciler, &adapter, &[]).await;
    assert_eq!(fake.table(), FOREIGN);
}

#[tokio::test]
async fn test_hand_copied_duplicates_collapse_to_one() {
    let fake = Arc::new(FakeCrontab::with_table(FOREIGN));
    let adapter = CrontabAdapter::new(fake.clone());
    let reconciler = posix_reconciler();
    let desired = vec![manifest("backup", "0 2 * * *")];
    let id = desired[0].id;

    cycle(&reconciler, &adapter, &desired).await;
    let managed_line = fake
        .table()
        .lines()
        .find(|l| l.contains(&id.to_string()))
        .map(str::to_string)
        .unwrap();
    fake.set_table(format!("{}{}\n", fake.table(), managed_line));
    assert_eq!(count_with_id(&adapter.list().await.unwrap(), id), 2);

    let actual = adapter.list().await.unwrap();
    let plan = reconciler.plan(&desired, &actual);
    assert!(matches!(&plan.actions[0], PlanAction::Update { .. }));
    reconciler.apply(&adapter, &plan).await;

    let after = adapter.list().await.unwrap();
    assert_eq!(count_with_id(&after, id), 1);
    assert!(reconciler.plan(&desired, &after).is_empty());
}

#[tokio::test]
async fn test_failed_install_leaves_table_untouched() {
    let fake = Arc::new(FakeCrontab::with_table(FOREIGN));
    let adapter = CrontabAdapter::new(fake.clone());
    let reconciler = posix_reconciler();
    let desired = vec![manifest("backup", "0 2 * * *"), manifest("report", "0 9 * * *")];

    fake.fail_next_install();
    let failures = cycle(&reconciler, &adapter, &desired).await;
    assert_eq!(failures, 2);
    assert_eq!(fake.table(), FOREIGN);

    assert_eq!(cycle(&reconciler, &adapter, &desired).await, 0);
    let actual = adapter.list().await.unwrap();
    assert!(reconciler.plan(&desired, &actual).is_empty());
}

#[tokio::test]
async fn test_disabled_and_paused_jobs_are_removed() {
    let fake = Arc::new(FakeCrontab::new());
    let adapter = CrontabAdapter::new(fake.clone());
    let reconciler = posix_reconciler();
    let mut desired = vec![manifest("backup", "0 2 * * *"), manifest("report", "0 9 * * *")];
    cycle(&reconciler, &adapter, &desired).await;
    assert_eq!(adapter.list().await.unwrap().len(), 2);

    desired[0].enabled = false;
    desired[1].paused = true;
    assert_eq!(cycle(&reconciler, &adapter, &desired).await, 0);
    assert!(adapter.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unavailable_crontab_fails_every_action() {
    let fake = Arc::new(FakeCrontab::new());
    let adapter = CrontabAdapter::new(fake.clone());
    let reconciler = posix_reconciler();
    fake.set_unavailable(true);

    let err = adapter.list().await.unwrap_err();
    assert!(err.is_unavailable());

    let plan = reconciler.plan(&[manifest("backup", "0 2 * * *")], &[]);
    let errors = reconciler.apply(&adapter, &plan).await;
    assert_eq!(errors.len(), 1);
    assert!(errors[0].is_unavailable());
}

#[tokio::test]
async fn test_task_scheduler_rejects_inexact_schedule_and_applies_the_rest() {
    let fake = Arc::new(FakeTaskScheduler::new());
    fake.insert_foreign("\\Vendor\\Updater", "C:\\vendor\\update.exe", "/quiet");
    let adapter = TaskSchedulerAdapter::new(fake.clone(), "\\CronSync");
    let reconciler = Reconciler::new(CallbackInjector::new(
        ShellFlavor::Windows,
        "C:\\Program Files\\CronSync\\cronsync-agent.exe",
    ));

    let good = manifest("report", "0 9-17 * * 1-5");
    let bad = manifest("monthly", "0 9 1 * 1");
    let desired = vec![good.clone(), bad.clone()];

    let actual = adapter.list().await.unwrap();
    let plan = reconciler.plan(&desired, &actual);
    let errors = reconciler.apply(&adapter, &plan).await;
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].action.id(), bad.id);
    assert!(matches!(
        errors[0].source,
        SchedulerError::UnsupportedSchedule { .. }
    ));

    let after = adapter.list().await.unwrap();
    assert_eq!(count_with_id(&after, good.id), 1);
    assert_eq!(count_with_id(&after, bad.id), 0);
    assert!(after.iter().any(|e| e.handle.as_str() == "\\Vendor\\Updater"));

    let replan = reconciler.plan(&[good], &after);
    assert!(replan.is_empty());
}

#[tokio::test]
async fn test_hand_edited_task_trigger_is_reconciled_back() {
    let fake = Arc::new(FakeTaskScheduler::new());
    let adapter = TaskSchedulerAdapter::new(fake.clone(), "\\CronSync");
    let reconciler = Reconciler::new(CallbackInjector::new(
        ShellFlavor::Windows,
        "C:\\Program Files\\CronSync\\cronsync-agent.exe",
    ));
    let desired = vec![manifest("nightly", "0 2 * * *")];
    assert_eq!(cycle(&reconciler, &adapter, &desired).await, 0);

    let path = fake
        .paths()
        .into_iter()
        .find(|p| p.contains("nightly"))
        .unwrap();
    let edited = fake.document(&path).unwrap().replace("T02:00:00", "T05:00:00");
    fake.set_document(&path, edited);

    let replan = reconciler.plan(&desired, &adapter.list().await.unwrap());
    let mutations: Vec<&PlanAction> = replan.mutations().collect();
    assert_eq!(mutations.len(), 1);
    assert!(matches!(mutations[0], PlanAction::Update { .. }));

    assert_eq!(cycle(&reconciler, &adapter, &desired).await, 0);
    assert!(fake.document(&path).unwrap().contains("T02:00:00"));
    let settled = reconciler.plan(&desired, &adapter.list().await.unwrap());
    assert!(settled.is_empty());
}
