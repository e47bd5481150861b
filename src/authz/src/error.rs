//! Error types for the authorization pipeline

use std::time::Duration;
use thiserror::Error;

/// Pipeline errors
///
/// Only [`PipelineError::QueueFull`] is ever surfaced to the admission caller.
/// Every other variant is converted into a decision or a counter inside the
/// pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Work queue is at capacity and no slot freed up in time
    #[error("Queue full: capacity {capacity} reached")]
    QueueFull { capacity: usize },

    /// Circuit breaker rejected the call without running it
    #[error("Circuit open for resource: {0}")]
    CircuitOpen(String),

    /// Authorization lookup exceeded its time budget
    #[error("Authorization timed out after {0:?}")]
    AuthorizationTimeout(Duration),

    /// ACL lookup failed
    #[error("ACL lookup failed: {0}")]
    AclLookup(String),

    /// Callback could not be delivered after all attempts
    #[error("Callback delivery failed after {attempts} attempts: {reason}")]
    CallbackDelivery { attempts: u32, reason: String },

    /// Audit record could not be persisted
    #[error("Audit write failed: {0}")]
    AuditWrite(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Metrics registration error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;
