//! Compute offload manager
//!
//! CPU-heavy work runs on tokio's blocking threads, at most `workers` jobs at
//! a time, away from the cooperative ingestion path. Callers hand over an
//! owned [`ComputeJob`] and await its result; the only link between the two
//! sides is the correlation id keying the caller's result slot.

pub mod error;
pub mod pool;

pub use error::ComputeError;
pub use pool::{ComputeJob, ComputePool, PendingResult};

pub type Result<T> = std::result::Result<T, ComputeError>;
