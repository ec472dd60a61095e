//! Agent assembly and the scheduler loop.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{RwLock, broadcast};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use cronsync_config::{Config, SourceKind};
use cronsync_manifest::{DirectorySource, GitSource};
use cronsync_protocols::{CommandRunner, ManifestSource, SchedulerAdapter, SystemRunner};
use cronsync_reconcile::{CallbackInjector, Reconciler, ShellFlavor};
use cronsync_scheduler::{build_adapter, detect_kind};

use crate::backoff::Backoff;
use crate::control::{ControlPlaneClient, EndpointReporter, EnrollRequest, InstanceReporter};
use crate::cycle::CycleRunner;
use crate::error::{AgentError, DaemonError};
use crate::heartbeat::HeartbeatReporter;
use crate::identity::EndpointIdentity;
use crate::pid::PidFile;
use crate::signal::{AgentSignal, SignalHandler};
use crate::state::AgentState;
use crate::token::{EndpointToken, TokenStore};

/// Name the check-in helper is invoked as when the binary path is unknown.
const HELPER_FALLBACK: &str = "cronsync-agent";

/// The long-running endpoint agent.
pub struct Agent {
    config: Config,
    identity: EndpointIdentity,
    signals: SignalHandler,
    runner: Arc<CycleRunner>,
    heartbeat: Option<HeartbeatReporter>,
    pid_file: Option<PidFile>,
}

impl Agent {
    /// Probe identity, enroll if needed and wire every component from `config`.
    pub async fn bootstrap(config: Config, config_path: &Path) -> Result<Self, DaemonError> {
        let commands: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
        let identity = EndpointIdentity::probe(&config.agent, commands.as_ref()).await;
        info!(
            name = %identity.name,
            hostname = %identity.hostname,
            platform = %identity.platform,
            "Starting cronsync agent {}",
            identity.version
        );

        let reporter: Option<Arc<dyn InstanceReporter>> = connect(&config, &identity)
            .await?
            .map(|r| Arc::new(r) as Arc<dyn InstanceReporter>);

        let source = build_source(&config, commands.clone())?;
        info!("Manifests from {}", source.describe());
        let adapter = build_adapter(&config.scheduler, commands);
        let reconciler = Reconciler::new(build_injector(&config, config_path));

        let signals = SignalHandler::new();
        let state = Arc::new(RwLock::new(AgentState::new()));
        let runner = CycleRunner::new(source, adapter, reconciler, state.clone(), signals.clone())
            .with_reporter(reporter.clone());
        let heartbeat = reporter.map(|r| {
            HeartbeatReporter::new(
                identity.clone(),
                r,
                state,
                config.cycle.heartbeat_interval(),
            )
        });
        let pid_file = config.agent.pid_file.as_deref().map(PidFile::new);

        Ok(Self {
            config,
            identity,
            signals,
            runner: Arc::new(runner),
            heartbeat,
            pid_file,
        })
    }

    pub fn identity(&self) -> &EndpointIdentity {
        &self.identity
    }

    pub fn signals(&self) -> &SignalHandler {
        &self.signals
    }

    pub fn cycle_runner(&self) -> &Arc<CycleRunner> {
        &self.runner
    }

    /// Run until SIGTERM/SIGINT. A cycle already applying is allowed to finish.
    pub async fn run(mut self) -> Result<(), DaemonError> {
        if let Some(pid_file) = self.pid_file.as_mut() {
            pid_file.acquire()?;
        }
        self.signals.setup_os_signals()?;

        let heartbeat = self
            .heartbeat
            .take()
            .map(|h| tokio::spawn(h.run(self.signals.clone())));
        if heartbeat.is_none() {
            info!("Upstream reporting disabled");
        }

        if let Err(e) = self.runner.report_discovery().await {
            warn!(error = %e, "Startup discovery failed");
        }

        self.scheduler_loop().await;

        self.signals.request_shutdown();
        if let Some(handle) = heartbeat {
            if let Err(e) = handle.await {
                error!("Heartbeat task failed: {}", e);
            }
        }
        if let Some(pid_file) = self.pid_file.as_mut() {
            pid_file.release()?;
        }
        info!("Agent stopped");
        Ok(())
    }

    async fn scheduler_loop(&self) {
        let mut receiver = self.signals.subscribe();
        let mut ticker = tokio::time::interval(self.config.cycle.sync_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut backoff = Backoff::new(
            self.config.cycle.backoff_initial(),
            self.config.cycle.backoff_max(),
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.runner.run_once().await {
                        Ok(_) => backoff.reset(),
                        Err(AgentError::ShuttingDown) => break,
                        Err(e) if e.needs_backoff() => {
                            let delay = backoff.next_delay();
                            warn!(
                                error = %e,
                                failures = backoff.failures(),
                                "Cycle failed, retrying in {:?}",
                                delay
                            );
                            if sleep_or_shutdown(&mut receiver, delay).await {
                                break;
                            }
                            ticker.reset();
                        }
                        Err(e) => debug!("{}", e),
                    }
                }
                signal = receiver.recv() => match signal {
                    Ok(AgentSignal::Shutdown) | Err(broadcast::error::RecvError::Closed) => break,
                    Ok(AgentSignal::Discover) => {
                        if let Err(e) = self.runner.report_discovery().await {
                            warn!(error = %e, "On-demand discovery failed");
                        }
                    }
                    Ok(AgentSignal::Reload) => {
                        info!("Reload requested; configuration is only read at startup, restart the agent to apply changes");
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Missed {} agent signal(s)", n);
                    }
                },
            }
            if self.signals.is_shutdown_requested() {
                break;
            }
        }
        info!("Scheduler loop stopped");
    }
}

/// Wait out a backoff delay. Returns `true` if shutdown arrived first.
async fn sleep_or_shutdown(receiver: &mut broadcast::Receiver<AgentSignal>, delay: Duration) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return false,
            signal = receiver.recv() => match signal {
                Ok(AgentSignal::Shutdown) | Err(broadcast::error::RecvError::Closed) => return true,
                _ => {}
            },
        }
    }
}

/// Endpoint credentials for upstream reporting, enrolling on first start.
///
/// `None` when no `api_url` is configured, or when the endpoint is not yet
/// enrolled and no enrollment token is available.
pub async fn connect(
    config: &Config,
    identity: &EndpointIdentity,
) -> Result<Option<EndpointReporter>, DaemonError> {
    let Some(client) = ControlPlaneClient::from_config(&config.backend)? else {
        return Ok(None);
    };
    let store = TokenStore::new(&config.agent.token_path);
    let token = match store.load()? {
        Some(token) => token,
        None => match config.backend.enrollment_token.as_deref() {
            Some(enrollment_token) => enroll(&client, &store, config, identity, enrollment_token).await?,
            None => {
                warn!(
                    "Endpoint not enrolled and no enrollment token configured; upstream reporting disabled"
                );
                return Ok(None);
            }
        },
    };
    debug!(endpoint_id = token.endpoint_id, "Using endpoint credentials");
    Ok(Some(EndpointReporter::new(client, token)))
}

async fn enroll(
    client: &ControlPlaneClient,
    store: &TokenStore,
    config: &Config,
    identity: &EndpointIdentity,
    enrollment_token: &str,
) -> Result<EndpointToken, DaemonError> {
    let request = EnrollRequest {
        git_repo_url: config.manifests.repo_url.clone(),
        git_branch: Some(config.manifests.branch.clone()),
        ..EnrollRequest::new(identity)
    };
    let token = client.enroll(enrollment_token, &request).await?;
    store.save(&token)?;
    info!(
        endpoint_id = token.endpoint_id,
        "Enrolled endpoint, credentials saved to {}",
        store.path().display()
    );
    Ok(token)
}

pub fn build_source(
    config: &Config,
    commands: Arc<dyn CommandRunner>,
) -> Result<Arc<dyn ManifestSource>, DaemonError> {
    match config.manifests.source {
        SourceKind::Git => GitSource::from_config(&config.manifests, commands)
            .map(|s| Arc::new(s) as Arc<dyn ManifestSource>)
            .ok_or_else(|| DaemonError::Config("git manifest source requires manifests.repo_url".to_string())),
        SourceKind::Directory => {
            let mut root = config.manifests.local_path();
            if let Some(sub) = config.manifests.subdirectory.as_deref() {
                root.push(sub);
            }
            Ok(Arc::new(DirectorySource::new(root)))
        }
    }
}

/// The injector every cycle renders managed commands with.
pub fn build_injector(config: &Config, config_path: &Path) -> CallbackInjector {
    let flavor = ShellFlavor::for_kind(detect_kind(config.scheduler.backend));
    if !config.scheduler.callbacks {
        return CallbackInjector::disabled(flavor);
    }
    let helper = config
        .scheduler
        .helper_path
        .clone()
        .or_else(|| {
            std::env::current_exe()
                .ok()
                .map(|p| p.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| HELPER_FALLBACK.to_string());
    let config_path: PathBuf =
        std::path::absolute(config_path).unwrap_or_else(|_| config_path.to_path_buf());
    CallbackInjector::new(flavor, helper)
        .with_config_path(Some(config_path.to_string_lossy().into_owned()))
}

/// Native scheduler adapter for one-shot CLI commands.
pub fn local_adapter(config: &Config) -> Arc<dyn SchedulerAdapter> {
    build_adapter(&config.scheduler, Arc::new(SystemRunner))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cronsync_config::ConfigLoader;

    const CONFIG: &str = r#"
[manifests]
source = "directory"
local_path = "/srv/jobs"
subdirectory = "prod"

[scheduler]
backend = "crontab"
helper_path = "/usr/local/bin/cronsync-agent"
"#;

    #[test]
    fn test_injector_uses_configured_helper() {
        let config = ConfigLoader::load_str(CONFIG).unwrap();
        let injector = build_injector(&config, Path::new("/etc/cronsync/agent.toml"));
        assert!(injector.is_enabled());
        assert_eq!(injector.flavor(), ShellFlavor::Posix);
    }

    #[test]
    fn test_callbacks_disabled() {
        let mut config = ConfigLoader::load_str(CONFIG).unwrap();
        config.scheduler.callbacks = false;
        let injector = build_injector(&config, Path::new("agent.toml"));
        assert!(!injector.is_enabled());
    }

    #[test]
    fn test_directory_source_joins_subdirectory() {
        let config = ConfigLoader::load_str(CONFIG).unwrap();
        let source = build_source(&config, Arc::new(SystemRunner)).unwrap();
        assert_eq!(source.describe(), "directory /srv/jobs/prod");
    }

    #[test]
    fn test_git_source_requires_repo_url() {
        let mut config = ConfigLoader::load_str(CONFIG).unwrap();
        config.manifests.source = SourceKind::Git;
        let err = build_source(&config, Arc::new(SystemRunner)).err().unwrap();
        assert!(err.to_string().contains("repo_url"));
    }

    #[tokio::test]
    async fn test_connect_without_api_url() {
        let config = ConfigLoader::load_str(CONFIG).unwrap();
        let identity = EndpointIdentity::probe(&config.agent, &SystemRunner).await;
        assert!(connect(&config, &identity).await.unwrap().is_none());
    }
}
