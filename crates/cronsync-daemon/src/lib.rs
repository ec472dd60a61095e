//! # CronSync Daemon
//!
//! The long-running side of the agent.
//!
//! - [`Agent`] - startup wiring and the fixed-interval scheduler loop
//! - [`CycleRunner`] - one single-flight reconciliation cycle
//! - [`HeartbeatReporter`] - periodic liveness reports
//! - [`ControlPlaneClient`] - enrollment, reporting and check-ins
//! - [`PidFile`] / [`SignalHandler`] - process plumbing

pub mod agent;
pub mod backoff;
pub mod control;
pub mod cycle;
pub mod error;
pub mod heartbeat;
pub mod identity;
pub mod pid;
pub mod signal;
pub mod state;
pub mod token;

pub use agent::{Agent, build_injector, build_source, connect, local_adapter};
pub use backoff::Backoff;
pub use control::{
    CheckinRequest, ControlPlaneClient, DiscoveredJob, EndpointReporter, EnrollRequest,
    HeartbeatRequest, InstanceReporter,
};
pub use cycle::{CycleReport, CycleRunner};
pub use error::{AgentError, ControlPlaneError, DaemonError};
pub use heartbeat::HeartbeatReporter;
pub use identity::EndpointIdentity;
pub use pid::PidFile;
pub use signal::{AgentSignal, SignalHandler};
pub use state::{AgentState, Phase};
pub use token::{EndpointToken, TokenStore};
