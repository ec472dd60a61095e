use super::*;
use async_trait::async_trait;
use cronsync_protocols::{
    EntryMarker, EntrySpec, NativeHandle, SchedulerEntry, SchedulerError, SchedulerKind,
};
use mockall::mock;
use mockall::predicate::eq;
use uuid::Uuid;

mock! {
    pub Adapter {}

    #[async_trait]
    impl SchedulerAdapter for Adapter {
        fn kind(&self) -> SchedulerKind;
        async fn list(&self) -> Result<Vec<SchedulerEntry>, SchedulerError>;
        async fn create(&self, entry: &EntrySpec) -> Result<(), SchedulerError>;
        async fn update(&self, id: Uuid, entry: &EntrySpec) -> Result<(), SchedulerError>;
        async fn delete(&self, id: Uuid) -> Result<(), SchedulerError>;
        async fn exists(&self, id: Uuid) -> Result<bool, SchedulerError>;
        async fn adopt(&self, handle: &NativeHandle, marker: &EntryMarker) -> Result<(), SchedulerError>;
    }
}

fn spec(name: &str) -> EntrySpec {
    EntrySpec {
        marker: EntryMarker {
            id: Uuid::new_v4(),
            namespace: "default".to_string(),
            name: name.to_string(),
        },
        schedule: "0 * * * *".to_string(),
        command: format!("/opt/{}", name),
    }
}

#[tokio::test]
async fn test_failure_does_not_stop_remaining_actions() {
    let locked = spec("locked");
    let fine = spec("fine");
    let gone = spec("gone").marker;
    let locked_id = locked.id();
    let gone_id = gone.id;

    let mut adapter = MockAdapter::new();
    adapter
        .expect_delete()
        .with(eq(gone_id))
        .times(1)
        .returning(|_| Ok(()));
    adapter
        .expect_create()
        .withf(move |s| s.id() == locked_id)
        .times(1)
        .returning(|_| Err(SchedulerError::Io(std::io::Error::other("table locked"))));
    adapter
        .expect_create()
        .withf(move |s| s.id() != locked_id)
        .times(1)
        .returning(|_| Ok(()));

    let plan = ReconciliationPlan::new(vec![
        PlanAction::Delete { marker: gone },
        PlanAction::Create { spec: locked },
        PlanAction::Create { spec: fine },
    ]);
    let errors = apply(&adapter, &plan).await;

    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].action.id(), locked_id);
    assert!(errors[0].to_string().contains("table locked"));
}

#[tokio::test]
async fn test_noops_never_reach_the_adapter() {
    let adapter = MockAdapter::new();
    let plan = ReconciliationPlan::new(vec![PlanAction::NoOp {
        marker: spec("steady").marker,
    }]);
    assert!(apply(&adapter, &plan).await.is_empty());
}

#[tokio::test]
async fn test_update_uses_spec_id() {
    let job = spec("job");
    let id = job.id();

    let mut adapter = MockAdapter::new();
    adapter
        .expect_update()
        .withf(move |target, s| *target == id && s.command == "/opt/job")
        .times(1)
        .returning(|_, _| Ok(()));

    let plan = ReconciliationPlan::new(vec![PlanAction::Update {
        spec: job,
        reasons: vec![cronsync_protocols::DriftReason::Schedule],
    }]);
    assert!(apply(&adapter, &plan).await.is_empty());
}
