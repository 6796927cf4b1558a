//! The runtime's closed error taxonomy (spec §7). Errors produced *inside*
//! a task are that task's own output type; this enum only covers failures
//! the scheduler itself can raise.

use thiserror::Error;

/// Errors returned by runtime-level operations (`spawn`, reactor
/// registration, timer scheduling).
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// `spawn` was called after `Runtime::stop()` began.
    #[error("spawn rejected: runtime shutdown already begun")]
    SpawnRejected,

    /// The OS rejected an I/O readiness registration.
    #[error("io registration failed: {0}")]
    IoRegistrationFailed(#[from] std::io::Error),

    /// A requested deadline is further out than the timer wheel's horizon.
    #[error("timer overflow: deadline exceeds wheel horizon")]
    TimerOverflow,
}

/// The outcome of awaiting a [`crate::join::JoinHandle`].
#[derive(Debug, Error)]
pub enum JoinError {
    /// The task was cancelled via `abort()` or runtime shutdown before
    /// completing.
    #[error("task was cancelled")]
    Cancelled,

    /// The task's `poll` panicked. The payload is the panic message, not
    /// the raw `Any` (which isn't meaningfully `Send`-storable without
    /// downcast machinery this core doesn't need).
    #[error("task panicked: {0}")]
    Panicked(String),
}
