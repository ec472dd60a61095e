//! Adapter selection at startup.

use std::sync::Arc;

use tracing::info;

use cronsync_config::{SchedulerBackend, SchedulerConfig};
use cronsync_protocols::{CommandRunner, SchedulerAdapter, SchedulerKind};

use crate::crontab::CrontabAdapter;
use crate::taskscheduler::TaskSchedulerAdapter;

/// Resolve `auto` against the platform this binary was built for.
pub fn detect_kind(backend: SchedulerBackend) -> SchedulerKind {
    match backend {
        SchedulerBackend::Crontab => SchedulerKind::Crontab,
        SchedulerBackend::TaskScheduler => SchedulerKind::TaskScheduler,
        SchedulerBackend::Auto if cfg!(windows) => SchedulerKind::TaskScheduler,
        SchedulerBackend::Auto => SchedulerKind::Crontab,
    }
}

pub fn build_adapter(
    config: &SchedulerConfig,
    runner: Arc<dyn CommandRunner>,
) -> Arc<dyn SchedulerAdapter> {
    let kind = detect_kind(config.backend);
    info!("Using {} scheduler backend", kind);
    match kind {
        SchedulerKind::Crontab => Arc::new(
            CrontabAdapter::new(runner)
                .with_user(config.crontab_user.clone())
                .with_timeout(config.command_timeout()),
        ),
        SchedulerKind::TaskScheduler => Arc::new(
            TaskSchedulerAdapter::new(runner, &config.task_folder)
                .with_timeout(config.command_timeout()),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cronsync_protocols::SystemRunner;

    #[test]
    fn test_explicit_backend_wins() {
        assert_eq!(detect_kind(SchedulerBackend::Crontab), SchedulerKind::Crontab);
        assert_eq!(
            detect_kind(SchedulerBackend::TaskScheduler),
            SchedulerKind::TaskScheduler
        );
    }

    #[test]
    fn test_auto_follows_platform() {
        let expected = if cfg!(windows) {
            SchedulerKind::TaskScheduler
        } else {
            SchedulerKind::Crontab
        };
        assert_eq!(detect_kind(SchedulerBackend::Auto), expected);
    }

    #[test]
    fn test_build_adapter_kind() {
        let config = SchedulerConfig {
            backend: SchedulerBackend::TaskScheduler,
            ..Default::default()
        };
        let adapter = build_adapter(&config, Arc::new(SystemRunner));
        assert_eq!(adapter.kind(), SchedulerKind::TaskScheduler);
    }
}
