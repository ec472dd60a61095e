use super::*;
use crate::testing::FakeCrontab;
use cronsync_protocols::DriftReason;

const ID_A: &str = "6f1c2e0a-3b9d-4c55-9a51-6a2b0c1d2e3f";
const ID_B: &str = "0d9a8b7c-1111-4222-8333-944455566677";

const FOREIGN: &str = "# m h dom mon dow command\nMAILTO=ops@example.com\n\n@reboot /opt/agent/start.sh\n*/5  *  * * *   /usr/local/bin/poll   --quiet\n";

fn marker(id: &str, name: &str) -> EntryMarker {
    EntryMarker {
        id: Uuid::parse_str(id).unwrap(),
        namespace: "default".to_string(),
        name: name.to_string(),
    }
}

fn spec(id: &str, name: &str, schedule: &str, command: &str) -> EntrySpec {
    EntrySpec {
        marker: marker(id, name),
        schedule: schedule.to_string(),
        command: command.to_string(),
    }
}

fn adapter(fake: &Arc<FakeCrontab>) -> CrontabAdapter {
    CrontabAdapter::new(fake.clone())
}

#[test]
fn test_parse_preserves_foreign_lines() {
    let table = CrontabTable::parse(FOREIGN);
    assert_eq!(table.render(), FOREIGN);

    let entries = table.entries();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].schedule, "@reboot");
    assert_eq!(entries[0].command, "/opt/agent/start.sh");
    assert_eq!(entries[1].schedule, "*/5 * * * *");
    assert_eq!(entries[1].command, "/usr/local/bin/poll   --quiet");
    assert!(entries.iter().all(|e| !e.is_managed()));
    assert!(entries[1].handle.as_str().starts_with("crontab:line:"));
}

#[test]
fn test_managed_line_round_trip() {
    let spec = spec(ID_A, "report", "0 9-17 * * 1-5", "date +%Y-%m-%d >> /tmp/log");
    let line = render_line(&spec);
    assert!(line.contains("date +\\%Y-\\%m-\\%d"));
    assert!(line.ends_with(&format!("# cronsync:id={};ns=default;name=report", ID_A)));

    let table = CrontabTable::parse(&format!("{}\n", line));
    let entries = table.entries();
    assert_eq!(entries.len(), 1);
    assert!(spec.matches(&entries[0]));
    assert_eq!(entries[0].handle, managed_handle(spec.id()));
}

#[test]
fn test_identical_foreign_lines_get_distinct_handles() {
    let table = CrontabTable::parse("0 * * * * /bin/a\n0 * * * * /bin/a\n");
    let entries = table.entries();
    assert_ne!(entries[0].handle, entries[1].handle);
    assert!(entries[1].handle.as_str().ends_with("#2"));
}

#[test]
fn test_replace_collapses_duplicates() {
    let a = spec(ID_A, "job", "0 * * * *", "/bin/a");
    let text = format!("{}\n# keep\n{}\n", render_line(&a), render_line(&a));
    let mut table = CrontabTable::parse(&text);
    assert_eq!(table.entries().len(), 2);

    let changed = spec(ID_A, "job", "5 * * * *", "/bin/a");
    table.replace(changed.id(), &changed).unwrap();
    let entries = table.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].schedule, "5 * * * *");
    assert!(table.render().contains("# keep"));
}

#[test]
fn test_insert_rejects_bad_specs() {
    let mut table = CrontabTable::default();
    assert!(matches!(
        table.insert(&spec(ID_A, "x", "* * * *", "/bin/a")),
        Err(SchedulerError::InvalidEntry(_))
    ));
    assert!(matches!(
        table.insert(&spec(ID_A, "x", "* * * * *", "/bin/a\n/bin/b")),
        Err(SchedulerError::InvalidEntry(_))
    ));
    table.insert(&spec(ID_A, "x", "* * * * *", "/bin/a")).unwrap();
    assert!(matches!(
        table.insert(&spec(ID_A, "x", "* * * * *", "/bin/a")),
        Err(SchedulerError::AlreadyExists(_))
    ));
}

#[tokio::test]
async fn test_missing_crontab_lists_empty() {
    let fake = Arc::new(FakeCrontab::new());
    assert!(adapter(&fake).list().await.unwrap().is_empty());
}

/// `crontab -l` that fails with exit 1 and says nothing.
struct SilentFailure;

#[async_trait]
impl CommandRunner for SilentFailure {
    async fn run(&self, _spec: &CommandSpec) -> std::io::Result<cronsync_protocols::CommandOutput> {
        Ok(cronsync_protocols::CommandOutput::failed(1, ""))
    }
}

#[tokio::test]
async fn test_silent_read_failure_is_not_an_empty_table() {
    let adapter = CrontabAdapter::new(Arc::new(SilentFailure));
    let err = adapter.list().await.unwrap_err();
    assert!(err.is_unavailable());

    let err = adapter
        .create(&spec(ID_A, "a", "* * * * *", "/bin/a"))
        .await
        .unwrap_err();
    assert!(err.is_unavailable());
}

#[tokio::test]
async fn test_unavailable_binary() {
    let fake = Arc::new(FakeCrontab::new());
    fake.set_unavailable(true);
    let err = adapter(&fake).list().await.unwrap_err();
    assert!(err.is_unavailable());
}

#[tokio::test]
async fn test_create_update_delete() {
    let fake = Arc::new(FakeCrontab::with_table(FOREIGN));
    let adapter = adapter(&fake);
    let id = Uuid::parse_str(ID_A).unwrap();

    adapter
        .create(&spec(ID_A, "backup", "0 2 * * *", "/opt/backup.sh"))
        .await
        .unwrap();
    assert!(adapter.exists(id).await.unwrap());
    assert!(fake.table().starts_with(FOREIGN));

    adapter
        .update(id, &spec(ID_A, "backup", "30 2 * * *", "/opt/backup.sh --full"))
        .await
        .unwrap();
    let managed: Vec<_> = adapter
        .list()
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.is_managed())
        .collect();
    assert_eq!(managed.len(), 1);
    assert_eq!(managed[0].schedule, "30 2 * * *");
    assert_eq!(managed[0].command, "/opt/backup.sh --full");

    adapter.delete(id).await.unwrap();
    assert!(!adapter.exists(id).await.unwrap());
    assert_eq!(fake.table(), FOREIGN);
}

#[tokio::test]
async fn test_update_missing_and_delete_missing() {
    let fake = Arc::new(FakeCrontab::with_table(FOREIGN));
    let adapter = adapter(&fake);
    let id = Uuid::parse_str(ID_A).unwrap();

    let err = adapter
        .update(id, &spec(ID_A, "x", "* * * * *", "/bin/a"))
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::NotFound(_)));

    adapter.delete(id).await.unwrap();
    assert_eq!(fake.installs(), 0);
}

#[tokio::test]
async fn test_failed_install_leaves_table_untouched() {
    let fake = Arc::new(FakeCrontab::with_table(FOREIGN));
    fake.fail_next_install();
    let err = adapter(&fake)
        .create(&spec(ID_A, "x", "* * * * *", "/bin/a"))
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::CommandFailed { .. }));
    assert_eq!(fake.table(), FOREIGN);
}

#[tokio::test]
async fn test_apply_batch_installs_once() {
    let existing = spec(ID_B, "old", "0 * * * *", "/bin/old");
    let fake = Arc::new(FakeCrontab::with_table(format!(
        "{}{}\n",
        FOREIGN,
        render_line(&existing)
    )));
    let adapter = adapter(&fake);

    let actions = vec![
        PlanAction::Delete {
            marker: existing.marker.clone(),
        },
        PlanAction::Create {
            spec: spec(ID_A, "new", "*/15 * * * *", "/bin/new"),
        },
        PlanAction::Update {
            spec: spec(
                "11111111-2222-4333-8444-555555555555",
                "ghost",
                "* * * * *",
                "/bin/ghost",
            ),
            reasons: vec![DriftReason::Command],
        },
    ];
    let results = adapter.apply_batch(&actions).await;

    assert!(results[0].is_ok());
    assert!(results[1].is_ok());
    assert!(matches!(results[2], Err(SchedulerError::NotFound(_))));
    assert_eq!(fake.installs(), 1);

    let managed: Vec<_> = adapter
        .list()
        .await
        .unwrap()
        .into_iter()
        .filter_map(|e| e.managed_id())
        .collect();
    assert_eq!(managed, vec![Uuid::parse_str(ID_A).unwrap()]);
}

#[tokio::test]
async fn test_apply_batch_install_failure_fails_every_mutation() {
    let fake = Arc::new(FakeCrontab::with_table(FOREIGN));
    fake.fail_next_install();
    let actions = vec![
        PlanAction::Create {
            spec: spec(ID_A, "a", "* * * * *", "/bin/a"),
        },
        PlanAction::Create {
            spec: spec(ID_B, "b", "* * * * *", "/bin/b"),
        },
    ];
    let results = adapter(&fake).apply_batch(&actions).await;
    assert!(results.iter().all(|r| r.is_err()));
    assert_eq!(fake.table(), FOREIGN);
}

#[tokio::test]
async fn test_apply_batch_without_changes_skips_install() {
    let existing = spec(ID_A, "a", "* * * * *", "/bin/a");
    let fake = Arc::new(FakeCrontab::with_table(format!("{}\n", render_line(&existing))));
    let results = adapter(&fake)
        .apply_batch(&[PlanAction::NoOp {
            marker: existing.marker.clone(),
        }])
        .await;
    assert!(results[0].is_ok());
    assert_eq!(fake.installs(), 0);
}

#[tokio::test]
async fn test_adopt_foreign_line() {
    let fake = Arc::new(FakeCrontab::with_table(FOREIGN));
    let adapter = adapter(&fake);
    let poll = adapter
        .list()
        .await
        .unwrap()
        .into_iter()
        .find(|e| e.schedule == "*/5 * * * *")
        .unwrap();

    adapter.adopt(&poll.handle, &marker(ID_A, "poll")).await.unwrap();

    let adopted = adapter
        .list()
        .await
        .unwrap()
        .into_iter()
        .find(|e| e.managed_id() == Some(Uuid::parse_str(ID_A).unwrap()))
        .unwrap();
    assert_eq!(adopted.command, "/usr/local/bin/poll   --quiet");
    assert!(fake.table().contains("MAILTO=ops@example.com"));
    assert!(fake.table().contains("@reboot /opt/agent/start.sh"));
}

#[tokio::test]
async fn test_adopt_rejects_reboot_lines() {
    let fake = Arc::new(FakeCrontab::with_table(FOREIGN));
    let adapter = adapter(&fake);
    let reboot = adapter.list().await.unwrap().remove(0);
    let err = adapter
        .adopt(&reboot.handle, &marker(ID_A, "start"))
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidEntry(_)));
    assert_eq!(fake.installs(), 0);
}

#[tokio::test]
async fn test_crontab_user_flag() {
    let fake = Arc::new(FakeCrontab::new());
    let adapter = CrontabAdapter::new(fake.clone()).with_user(Some("batch".to_string()));
    adapter
        .create(&spec(ID_A, "a", "* * * * *", "/bin/a"))
        .await
        .unwrap();
    assert_eq!(fake.installs(), 1);
}
