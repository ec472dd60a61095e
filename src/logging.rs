//! Tracing setup.

use std::path::Path;
use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use cronsync_config::LoggingConfig;

/// Keeps the file writer flushing until the process exits.
static GUARD: OnceLock<WorkerGuard> = OnceLock::new();

fn filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Console output plus, when a directory is configured, daily-rotated files.
pub(crate) fn init_tracing(config: &LoggingConfig) -> anyhow::Result<()> {
    let writer = match config.directory.as_deref() {
        Some(dir) => {
            let dir = Path::new(dir);
            std::fs::create_dir_all(dir)?;
            let appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix("cronsync-agent")
                .filename_suffix("log")
                .max_log_files(config.max_files)
                .build(dir)?;
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let _ = GUARD.set(guard);
            Some(non_blocking)
        }
        None => None,
    };

    let registry = tracing_subscriber::registry().with(filter(&config.level));
    if config.json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(writer.map(|w| fmt::layer().json().with_writer(w)))
            .try_init()?;
    } else {
        registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .with(writer.map(|w| fmt::layer().with_ansi(false).with_writer(w)))
            .try_init()?;
    }
    Ok(())
}

/// Stderr only. Used by one-shot commands so stdout stays clean.
pub(crate) fn init_stderr(level: &str) {
    let _ = tracing_subscriber::registry()
        .with(filter(level))
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .try_init();
}
