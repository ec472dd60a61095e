//! The `run` subcommand and shared config loading.

use std::path::Path;

use anyhow::Context;
use tracing::warn;

use cronsync_config::{Config, ConfigLoader, ConfigValidator, ValidationWarning};
use cronsync_daemon::Agent;

use crate::logging::init_tracing;

/// Load and validate the config file; warnings are returned, errors fail.
pub(crate) fn load_config(path: &Path) -> anyhow::Result<(Config, Vec<ValidationWarning>)> {
    let config = ConfigLoader::load(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    let warnings = ConfigValidator::validate(&config)
        .into_result()
        .with_context(|| format!("Invalid configuration in {}", path.display()))?;
    Ok((config, warnings))
}

/// Run the agent in the foreground until SIGTERM/SIGINT.
pub(crate) async fn run_agent(config_path: &Path) -> anyhow::Result<()> {
    let (config, warnings) = load_config(config_path)?;
    init_tracing(&config.logging)?;
    for warning in &warnings {
        warn!("Config {}: {}", warning.path, warning.message);
    }

    let agent = Agent::bootstrap(config, config_path).await?;
    agent.run().await?;
    Ok(())
}
