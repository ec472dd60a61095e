//! Data model shared across the agent.

mod entry;
mod instance;
mod manifest;

pub use entry::*;
pub use instance::*;
pub use manifest::*;
