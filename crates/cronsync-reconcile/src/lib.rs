//! # CronSync Reconcile
//!
//! Turns desired state and native scheduler truth into changes.
//!
//! - [`CallbackInjector`] - reversible wrapping of managed commands
//! - [`discover`] / [`inventory`] - classification into job instances
//! - [`Reconciler`] - `plan` and `apply`
//! - [`adopt`] - explicit promotion of a discovered entry

pub mod adopt;
pub mod apply;
pub mod callback;
pub mod discovery;
pub mod error;
pub mod planner;

pub use adopt::adopt;
pub use apply::apply;
pub use callback::{CallbackInjector, ShellFlavor, WrappedCommand};
pub use discovery::{discover, inventory};
pub use error::{AdoptError, ApplyError};
pub use planner::Reconciler;
