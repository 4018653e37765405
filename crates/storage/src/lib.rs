//! Buffering and replay for the stream engine
//!
//! - [`RingBuffer`] - fixed-capacity, overwrite-oldest buffer
//! - [`ReplayStore`] - one ring per topic plus optional write-behind persistence
//! - [`PersistenceStore`] - contract for durable retention, with an in-memory implementation

pub mod error;
pub mod replay;
pub mod ring;
pub mod store;

pub use error::StorageError;
pub use replay::{ReplayOutcome, ReplayStore};
pub use ring::RingBuffer;
pub use store::{InMemoryPersistence, PersistenceStore, StoredRecord};

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;
