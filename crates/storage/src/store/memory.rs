use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use common::{TimestampMs, Topic};
use parking_lot::RwLock;

use crate::error::StorageError;
use crate::store::traits::{PersistenceStore, StoredRecord};
use crate::Result;

/// Process-local persistence, for tests and single-node deployments
pub struct InMemoryPersistence {
    records: RwLock<HashMap<Topic, Vec<StoredRecord>>>,
    available: AtomicBool,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate an outage: while unavailable every call fails
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.records.read().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::PersistenceUnavailable("in-memory store offline".to_string()))
        }
    }
}

impl Default for InMemoryPersistence {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PersistenceStore for InMemoryPersistence {
    async fn save(&self, record: StoredRecord) -> Result<()> {
        self.check_available()?;
        let mut records = self.records.write();
        let topic_records = records.entry(record.topic.clone()).or_default();
        // Keep sequence order even if writes arrive shuffled
        let pos = topic_records.partition_point(|r| r.sequence < record.sequence);
        match topic_records.get(pos) {
            Some(existing) if existing.sequence == record.sequence => topic_records[pos] = record,
            _ => topic_records.insert(pos, record),
        }
        Ok(())
    }

    async fn query_range(&self, topic: &Topic, since: TimestampMs, until: TimestampMs) -> Result<Vec<StoredRecord>> {
        self.check_available()?;
        let records = self.records.read();
        Ok(records
            .get(topic)
            .map(|rs| {
                rs.iter()
                    .filter(|r| r.timestamp >= since && r.timestamp < until)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn prune_older_than(&self, max_age_ms: u64, now: TimestampMs) -> Result<u64> {
        self.check_available()?;
        let cutoff = now.saturating_sub(i64::try_from(max_age_ms).unwrap_or(i64::MAX));
        let mut records = self.records.write();
        let mut removed = 0u64;
        for topic_records in records.values_mut() {
            let before = topic_records.len();
            topic_records.retain(|r| r.timestamp >= cutoff);
            removed += (before - topic_records.len()) as u64;
        }
        records.retain(|_, rs| !rs.is_empty());
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use common::EventId;

    fn record(topic: &Topic, sequence: u64, timestamp: TimestampMs) -> StoredRecord {
        StoredRecord {
            event_id: EventId::new(),
            topic: topic.clone(),
            sequence,
            timestamp,
            payload: serde_json::json!({ "seq": sequence }),
        }
    }

    #[tokio::test]
    async fn test_query_range_is_half_open_and_ordered() {
        let store = InMemoryPersistence::new();
        let topic = Topic::trade("AAPL");
        store.save(record(&topic, 2, 2_000)).await.unwrap();
        store.save(record(&topic, 1, 1_000)).await.unwrap();
        store.save(record(&topic, 3, 3_000)).await.unwrap();
        store.save(record(&Topic::trade("MSFT"), 1, 1_500)).await.unwrap();

        let got = store.query_range(&topic, 1_000, 3_000).await.unwrap();
        let seqs: Vec<u64> = got.iter().map(|r| r.sequence).collect();
        assert_eq!(seqs, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_prune_older_than() {
        let store = InMemoryPersistence::new();
        let topic = Topic::vwap("AAPL");
        for (seq, ts) in [(1, 1_000), (2, 5_000), (3, 9_000)] {
            store.save(record(&topic, seq, ts)).await.unwrap();
        }
        let removed = store.prune_older_than(5_000, 10_000).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_every_call() {
        let store = InMemoryPersistence::new();
        store.set_available(false);
        let topic = Topic::trade("AAPL");
        assert_matches!(
            store.save(record(&topic, 1, 0)).await,
            Err(StorageError::PersistenceUnavailable(_))
        );
        assert_matches!(
            store.query_range(&topic, 0, 10).await,
            Err(StorageError::PersistenceUnavailable(_))
        );
        store.set_available(true);
        assert!(store.save(record(&topic, 1, 0)).await.is_ok());
    }
}
