use async_trait::async_trait;
use common::{EventId, StreamEvent, TimestampMs, Topic};
use serde::{Deserialize, Serialize};

use crate::Result;

/// A stream event in durable form, payload as JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub event_id: EventId,
    pub topic: Topic,
    pub sequence: u64,
    pub timestamp: TimestampMs,
    pub payload: serde_json::Value,
}

impl StoredRecord {
    pub fn from_event<P: Serialize>(event: &StreamEvent<P>) -> Result<Self> {
        Ok(Self {
            event_id: event.id,
            topic: event.topic.clone(),
            sequence: event.sequence,
            timestamp: event.timestamp,
            payload: serde_json::to_value(&event.payload)?,
        })
    }

    pub fn into_event<P: serde::de::DeserializeOwned>(self) -> Result<StreamEvent<P>> {
        Ok(StreamEvent {
            id: self.event_id,
            timestamp: self.timestamp,
            topic: self.topic,
            sequence: self.sequence,
            payload: serde_json::from_value(self.payload)?,
        })
    }
}

/// Durable retention beyond the ring buffers, implemented outside the engine
///
/// Failures are reported as [`crate::StorageError::PersistenceUnavailable`];
/// retry and backoff are the implementation's concern.
#[async_trait]
pub trait PersistenceStore: Send + Sync {
    async fn save(&self, record: StoredRecord) -> Result<()>;

    /// Records on `topic` with `since <= timestamp < until`, by sequence
    async fn query_range(&self, topic: &Topic, since: TimestampMs, until: TimestampMs) -> Result<Vec<StoredRecord>>;

    /// Drop records older than `now - max_age_ms`, returning how many went
    async fn prune_older_than(&self, max_age_ms: u64, now: TimestampMs) -> Result<u64>;
}
