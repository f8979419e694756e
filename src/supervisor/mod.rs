//! Process supervisor
//!
//! Owns a registry of named processes, each either an external command or an
//! in-process async body. Every process gets its own run loop:
//!
//! - marked running: execute it; after a failure wait the restart delay and retry
//! - marked stopped: park until [`Supervisor::start`] wakes the loop
//!
//! [`Supervisor::stop`] cancels the in-flight execution. A cancelled execution
//! is never reported as a failure and never triggers the restart delay.

mod command;
mod manager;

pub use command::CommandSpec;
pub use manager::{ProcessStatus, Supervisor, DEFAULT_RESTART_DELAY};

use crate::error::Result;

/// Start/stop control over named processes
///
/// Both calls return [`AppError::AlreadyInState`](crate::error::AppError::AlreadyInState)
/// when the process is already in the requested state.
pub trait ProcessControl: Send + Sync {
    fn start(&self, id: &str) -> Result<()>;
    fn stop(&self, id: &str) -> Result<()>;
}
