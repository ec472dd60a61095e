//! OS signal handling for the agent process.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::error::DaemonError;

/// Control events delivered to the loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentSignal {
    /// Graceful shutdown (SIGTERM, SIGINT, Ctrl+C).
    Shutdown,
    /// Report the native inventory now (SIGUSR1).
    Discover,
    /// SIGHUP. Configuration is only read at startup, so this is logged.
    Reload,
}

impl fmt::Display for AgentSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentSignal::Shutdown => write!(f, "SHUTDOWN"),
            AgentSignal::Discover => write!(f, "DISCOVER"),
            AgentSignal::Reload => write!(f, "RELOAD"),
        }
    }
}

/// Fan-out of [`AgentSignal`]s plus a sticky shutdown flag.
///
/// The flag lets a cycle in progress check for shutdown between phases
/// without holding a receiver.
#[derive(Clone)]
pub struct SignalHandler {
    sender: broadcast::Sender<AgentSignal>,
    shutdown_requested: Arc<AtomicBool>,
}

impl SignalHandler {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(16);
        Self {
            sender,
            shutdown_requested: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentSignal> {
        self.sender.subscribe()
    }

    pub fn send(&self, signal: AgentSignal) {
        debug!("Sending signal: {}", signal);
        if signal == AgentSignal::Shutdown {
            self.shutdown_requested.store(true, Ordering::SeqCst);
        }
        let _ = self.sender.send(signal);
    }

    pub fn request_shutdown(&self) {
        self.send(AgentSignal::Shutdown);
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    /// Install SIGTERM, SIGINT, SIGHUP and SIGUSR1 handlers.
    #[cfg(unix)]
    pub fn setup_os_signals(&self) -> Result<(), DaemonError> {
        use tokio::signal::unix::{SignalKind, signal};

        let bindings = [
            (SignalKind::terminate(), "SIGTERM", AgentSignal::Shutdown),
            (SignalKind::interrupt(), "SIGINT", AgentSignal::Shutdown),
            (SignalKind::hangup(), "SIGHUP", AgentSignal::Reload),
            (SignalKind::user_defined1(), "SIGUSR1", AgentSignal::Discover),
        ];

        for (kind, name, event) in bindings {
            let mut stream = signal(kind).map_err(|e| DaemonError::SignalSetup(e.to_string()))?;
            let handler = self.clone();
            tokio::spawn(async move {
                while stream.recv().await.is_some() {
                    info!("Received {}", name);
                    handler.send(event);
                }
            });
        }

        info!("OS signal handlers installed (SIGTERM, SIGINT, SIGHUP, SIGUSR1)");
        Ok(())
    }

    #[cfg(not(unix))]
    pub fn setup_os_signals(&self) -> Result<(), DaemonError> {
        let handler = self.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received Ctrl+C");
                handler.request_shutdown();
            }
        });

        info!("OS signal handlers installed (Ctrl+C only)");
        Ok(())
    }
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new()
    }
}
