//! Periodic liveness reports.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::control::{HeartbeatRequest, InstanceReporter};
use crate::error::ControlPlaneError;
use crate::identity::EndpointIdentity;
use crate::signal::{AgentSignal, SignalHandler};
use crate::state::AgentState;

pub struct HeartbeatReporter {
    identity: EndpointIdentity,
    reporter: Arc<dyn InstanceReporter>,
    state: Arc<RwLock<AgentState>>,
    interval: Duration,
}

impl HeartbeatReporter {
    pub fn new(
        identity: EndpointIdentity,
        reporter: Arc<dyn InstanceReporter>,
        state: Arc<RwLock<AgentState>>,
        interval: Duration,
    ) -> Self {
        Self {
            identity,
            reporter,
            state,
            interval,
        }
    }

    /// Snapshot of identity and inventory counts.
    pub async fn request(&self) -> HeartbeatRequest {
        let state = self.state.read().await;
        HeartbeatRequest {
            status: "active".to_string(),
            platform: self.identity.platform.clone(),
            version: self.identity.version.clone(),
            hostname: self.identity.hostname.clone(),
            machine_id: self.identity.machine_id.clone(),
            revision: state.revision().map(str::to_string),
            managed_count: state.managed_count(),
            discovered_count: state.discovered_count(),
        }
    }

    pub async fn send_once(&self) -> Result<(), ControlPlaneError> {
        let request = self.request().await;
        self.reporter.heartbeat(&request).await?;
        debug!(
            managed = request.managed_count,
            discovered = request.discovered_count,
            "Heartbeat sent"
        );
        Ok(())
    }

    /// Beat every interval until shutdown. Failures wait for the next tick.
    pub async fn run(self, signals: SignalHandler) {
        let mut receiver = signals.subscribe();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("Heartbeat every {:?}", self.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.send_once().await {
                        warn!(error = %e, "Heartbeat failed");
                    }
                }
                signal = receiver.recv() => match signal {
                    Ok(AgentSignal::Shutdown) | Err(_) => break,
                    Ok(_) => {}
                },
            }
            if signals.is_shutdown_requested() {
                break;
            }
        }
        debug!("Heartbeat loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::DiscoveredJob;
    use async_trait::async_trait;
    use cronsync_protocols::JobInstance;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        beats: Mutex<Vec<HeartbeatRequest>>,
        fail: bool,
    }

    #[async_trait]
    impl InstanceReporter for Recorder {
        async fn heartbeat(&self, request: &HeartbeatRequest) -> Result<(), ControlPlaneError> {
            self.beats.lock().push(request.clone());
            if self.fail {
                return Err(ControlPlaneError::Network("connection refused".to_string()));
            }
            Ok(())
        }

        async fn report_instances(&self, _: &[JobInstance]) -> Result<(), ControlPlaneError> {
            Ok(())
        }

        async fn report_discovered(&self, _: &[DiscoveredJob]) -> Result<(), ControlPlaneError> {
            Ok(())
        }
    }

    fn identity() -> EndpointIdentity {
        EndpointIdentity {
            name: "db-02".to_string(),
            hostname: "db-02".to_string(),
            platform: "linux".to_string(),
            version: "0.1.0".to_string(),
            machine_id: None,
        }
    }

    #[tokio::test]
    async fn test_request_carries_state() {
        let state = Arc::new(RwLock::new(AgentState::new()));
        state.write().await.accept_revision("abc123", Vec::new());
        let reporter = HeartbeatReporter::new(
            identity(),
            Arc::new(Recorder::default()),
            state,
            Duration::from_secs(30),
        );

        let request = reporter.request().await;
        assert_eq!(request.status, "active");
        assert_eq!(request.revision.as_deref(), Some("abc123"));
        assert_eq!(request.managed_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_do_not_stop_the_loop() {
        let recorder = Arc::new(Recorder {
            fail: true,
            ..Recorder::default()
        });
        let reporter = HeartbeatReporter::new(
            identity(),
            recorder.clone(),
            Arc::new(RwLock::new(AgentState::new())),
            Duration::from_secs(30),
        );
        let signals = SignalHandler::new();
        let handle = tokio::spawn(reporter.run(signals.clone()));

        tokio::time::sleep(Duration::from_secs(65)).await;
        signals.request_shutdown();
        handle.await.unwrap();

        assert_eq!(recorder.beats.lock().len(), 3);
    }
}
