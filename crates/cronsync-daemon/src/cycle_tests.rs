use super::*;
use std::fs;

use cronsync_manifest::DirectorySource;
use cronsync_protocols::{InstanceStatus, JobInstance, SchedulerEntry};
use cronsync_reconcile::{CallbackInjector, ShellFlavor};
use cronsync_scheduler::CrontabAdapter;
use cronsync_scheduler::testing::FakeCrontab;
use parking_lot::Mutex as SyncMutex;
use tempfile::TempDir;
use uuid::Uuid;

use crate::error::ControlPlaneError;
use crate::control::HeartbeatRequest;

const BACKUP_ID: &str = "6f1c2e0a-3b9d-4c55-9a51-6a2b0c1d2e3f";
const REPORT_ID: &str = "0d9a8b7c-1111-4222-8333-944455566677";
const FOREIGN: &str = "MAILTO=ops@example.com\n15 1 * * * /usr/sbin/logrotate /etc/logrotate.conf\n";

fn manifest_yaml(id: &str, name: &str, schedule: &str) -> String {
    format!(
        r#"apiVersion: v1
kind: Job
metadata:
  id: {id}
  name: {name}
  namespace: production
spec:
  schedule: "{schedule}"
  command: /usr/local/bin/{name}.sh
"#
    )
}

fn write(dir: &TempDir, relative: &str, content: &str) {
    fs::write(dir.path().join(relative), content).unwrap();
}

#[derive(Default)]
struct RecordingReporter {
    instances: SyncMutex<Vec<Vec<JobInstance>>>,
    discovered: SyncMutex<Vec<DiscoveredJob>>,
}

#[async_trait::async_trait]
impl InstanceReporter for RecordingReporter {
    async fn heartbeat(&self, _request: &HeartbeatRequest) -> Result<(), ControlPlaneError> {
        Ok(())
    }

    async fn report_instances(&self, instances: &[JobInstance]) -> Result<(), ControlPlaneError> {
        self.instances.lock().push(instances.to_vec());
        Ok(())
    }

    async fn report_discovered(&self, jobs: &[DiscoveredJob]) -> Result<(), ControlPlaneError> {
        self.discovered.lock().extend_from_slice(jobs);
        Ok(())
    }
}

struct Harness {
    dir: TempDir,
    fake: Arc<FakeCrontab>,
    reporter: Arc<RecordingReporter>,
    signals: SignalHandler,
    runner: CycleRunner,
}

fn harness() -> Harness {
    let dir = TempDir::new().unwrap();
    let fake = Arc::new(FakeCrontab::with_table(FOREIGN));
    let reporter = Arc::new(RecordingReporter::default());
    let signals = SignalHandler::new();
    let reconciler = Reconciler::new(
        CallbackInjector::new(ShellFlavor::Posix, "/usr/local/bin/cronsync-agent")
            .with_config_path(Some("/etc/cronsync/agent.toml".to_string())),
    );
    let runner = CycleRunner::new(
        Arc::new(DirectorySource::new(dir.path())),
        Arc::new(CrontabAdapter::new(fake.clone())),
        reconciler,
        Arc::new(RwLock::new(AgentState::new())),
        signals.clone(),
    )
    .with_reporter(Some(reporter.clone() as Arc<dyn InstanceReporter>));
    Harness {
        dir,
        fake,
        reporter,
        signals,
        runner,
    }
}

async fn managed_ids(fake: &Arc<FakeCrontab>) -> Vec<Uuid> {
    let entries: Vec<SchedulerEntry> = CrontabAdapter::new(fake.clone()).list().await.unwrap();
    let mut ids: Vec<Uuid> = entries.iter().filter_map(|e| e.managed_id()).collect();
    ids.sort();
    ids
}

#[tokio::test]
async fn test_first_cycle_creates_and_second_is_quiet() {
    let h = harness();
    write(&h.dir, "backup.yaml", &manifest_yaml(BACKUP_ID, "backup", "0 2 * * *"));
    write(&h.dir, "report.yaml", &manifest_yaml(REPORT_ID, "report", "0 9-17 * * 1-5"));

    let report = h.runner.run_once().await.unwrap();
    assert_eq!(report.plan.create, 2);
    assert!(report.apply_errors.is_empty());
    assert!(report.revision.as_deref().unwrap().starts_with("sha256:"));
    assert_eq!(managed_ids(&h.fake).await.len(), 2);
    assert!(h.fake.table().contains("/usr/sbin/logrotate /etc/logrotate.conf"));

    let installs = h.fake.installs();
    let report = h.runner.run_once().await.unwrap();
    assert_eq!(report.plan.create, 0);
    assert_eq!(report.plan.noop, 2);
    assert_eq!(h.fake.installs(), installs);

    let state = h.runner.state().read().await;
    assert_eq!(state.phase(), Phase::Idle);
    assert_eq!(state.managed_count(), 2);
    assert_eq!(state.discovered_count(), 1);
}

#[tokio::test]
async fn test_duplicate_ids_keep_previous_revision() {
    let h = harness();
    write(&h.dir, "backup.yaml", &manifest_yaml(BACKUP_ID, "backup", "0 2 * * *"));
    let first = h.runner.run_once().await.unwrap();
    let table = h.fake.table();

    write(&h.dir, "copy.yaml", &manifest_yaml(BACKUP_ID, "backup-copy", "*/5 * * * *"));
    let second = h.runner.run_once().await.unwrap();
    assert_eq!(second.revision, first.revision);
    assert_eq!(second.plan.noop, 1);
    assert_eq!(h.fake.table(), table);
}

#[tokio::test]
async fn test_duplicate_ids_without_previous_revision() {
    let h = harness();
    write(&h.dir, "a.yaml", &manifest_yaml(BACKUP_ID, "a", "0 2 * * *"));
    write(&h.dir, "b.yaml", &manifest_yaml(BACKUP_ID, "b", "0 3 * * *"));

    let err = h.runner.run_once().await.unwrap_err();
    assert!(matches!(err, AgentError::NoAcceptedRevision(_)));
    assert_eq!(h.fake.installs(), 0);
}

#[tokio::test]
async fn test_missing_directory_without_previous_revision() {
    let h = harness();
    let runner = CycleRunner::new(
        Arc::new(DirectorySource::new(h.dir.path().join("absent"))),
        Arc::new(CrontabAdapter::new(h.fake.clone())),
        Reconciler::new(CallbackInjector::disabled(ShellFlavor::Posix)),
        Arc::new(RwLock::new(AgentState::new())),
        SignalHandler::new(),
    );
    let err = runner.run_once().await.unwrap_err();
    assert!(matches!(err, AgentError::NoRevision(_)));
    assert!(err.needs_backoff());
}

#[tokio::test]
async fn test_unavailable_scheduler_aborts_cycle() {
    let h = harness();
    write(&h.dir, "backup.yaml", &manifest_yaml(BACKUP_ID, "backup", "0 2 * * *"));
    h.fake.set_unavailable(true);

    let err = h.runner.run_once().await.unwrap_err();
    assert!(matches!(err, AgentError::SchedulerUnavailable(_)));
    assert_eq!(h.runner.state().read().await.phase(), Phase::Idle);

    h.fake.set_unavailable(false);
    let report = h.runner.run_once().await.unwrap();
    assert_eq!(report.plan.create, 1);
}

#[tokio::test]
async fn test_removed_manifest_reported_once() {
    let h = harness();
    write(&h.dir, "backup.yaml", &manifest_yaml(BACKUP_ID, "backup", "0 2 * * *"));
    write(&h.dir, "report.yaml", &manifest_yaml(REPORT_ID, "report", "0 9 * * *"));
    h.runner.run_once().await.unwrap();

    fs::remove_file(h.dir.path().join("report.yaml")).unwrap();
    let report = h.runner.run_once().await.unwrap();
    assert_eq!(report.plan.delete, 1);
    assert_eq!(managed_ids(&h.fake).await, vec![BACKUP_ID.parse::<Uuid>().unwrap()]);

    h.runner.run_once().await.unwrap();

    let batches = h.reporter.instances.lock();
    assert_eq!(batches.len(), 3);
    let removed_in = |batch: &Vec<JobInstance>| {
        batch
            .iter()
            .filter(|i| i.job_name == "report" && i.status == InstanceStatus::Removed)
            .count()
    };
    assert_eq!(removed_in(&batches[1]), 1);
    assert_eq!(removed_in(&batches[2]), 0);
    assert!(batches[2].iter().all(|i| i.job_name != "report"));
}

#[tokio::test]
async fn test_concurrent_cycle_is_busy() {
    let h = harness();
    let _held = h.runner.in_flight.try_lock().unwrap();
    let err = h.runner.run_once().await.unwrap_err();
    assert!(matches!(err, AgentError::Busy));
    assert!(!err.needs_backoff());
}

#[tokio::test]
async fn test_shutdown_skips_apply() {
    let h = harness();
    write(&h.dir, "backup.yaml", &manifest_yaml(BACKUP_ID, "backup", "0 2 * * *"));
    h.signals.request_shutdown();

    let err = h.runner.run_once().await.unwrap_err();
    assert!(matches!(err, AgentError::ShuttingDown));
    assert_eq!(h.fake.installs(), 0);
}

#[tokio::test]
async fn test_discovery_report_lists_foreign_entries() {
    let h = harness();
    let count = h.runner.report_discovery().await.unwrap();
    assert_eq!(count, 1);

    let discovered = h.reporter.discovered.lock();
    assert_eq!(discovered[0].command, "/usr/sbin/logrotate /etc/logrotate.conf");
    assert_eq!(discovered[0].schedule, "15 1 * * *");
}
