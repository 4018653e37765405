//! Compute offload error types

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ComputeError {
    /// No response arrived in time; any late result is discarded
    #[error("{kind} job timed out after {timeout_ms}ms")]
    Timeout { kind: String, timeout_ms: u64 },

    /// The request queue is at capacity
    #[error("{kind} job rejected: request queue full")]
    QueueFull { kind: String },

    /// The job returned an error or panicked
    #[error("{kind} job failed: {reason}")]
    JobFailed { kind: String, reason: String },

    #[error("Compute pool is shut down")]
    Shutdown,

    #[error("Invalid compute settings: {0}")]
    InvalidSettings(String),

    #[error("Failed to start compute worker: {0}")]
    Startup(String),
}
