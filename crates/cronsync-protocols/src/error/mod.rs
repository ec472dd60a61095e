//! Error types shared across crate boundaries.

mod fetch;
mod scheduler;

pub use fetch::*;
pub use scheduler::*;
