//! Sendloop error taxonomy.
//!
//! `Validation` is rejected synchronously at the API layer and never reaches
//! the scheduler. `SessionTimeout` and `Worker` are raised during dispatch
//! and mapped to the `FailedWorkerError` message status by the completion
//! handler. A handled delivery failure is *not* an error — it is the
//! `DeliveryOutcome::Failed` value.

use thiserror::Error;

/// Convenience result type used across all Sendloop crates.
pub type Result<T> = std::result::Result<T, SendloopError>;

#[derive(Error, Debug)]
pub enum SendloopError {
    /// Malformed schedule request — rejected before a message is stored.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Session linking did not complete within the configured window.
    #[error("Session linking timed out: {0}")]
    SessionTimeout(String),

    /// The delivery attempt could not complete cleanly (automation surface
    /// unreachable, context lost mid-send, attempt deadline exceeded).
    #[error("Worker error: {0}")]
    Worker(String),

    /// Automation surface / transport failure.
    #[error("Channel error: {0}")]
    Channel(String),

    /// Configuration problem.
    #[error("Config error: {0}")]
    Config(String),

    /// Message store failure, including rejected status transitions.
    #[error("Store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
