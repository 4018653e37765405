//! Per-topic replay buffers with optional write-behind persistence
//!
//! Every published event lands in a bounded ring for its topic. When a
//! [`PersistenceStore`] is attached, events are also handed to a background
//! writer through a bounded queue. A full queue or a failing store never
//! blocks ingestion: the write is dropped, counted and logged.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use common::{StreamEvent, TimestampMs, Topic};
use observability::EngineMetrics;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::StorageError;
use crate::ring::RingBuffer;
use crate::store::{PersistenceStore, StoredRecord};
use crate::Result;

/// Result of a replay that may reach past the ring buffer
#[derive(Debug, Clone)]
pub struct ReplayOutcome<P> {
    /// Events ordered by sequence, without duplicates
    pub events: Vec<Arc<StreamEvent<P>>>,
    /// False when events in the requested range may be missing
    pub complete: bool,
}

struct PersistenceLink {
    store: Arc<dyn PersistenceStore>,
    writer: mpsc::Sender<StoredRecord>,
}

pub struct ReplayStore<P> {
    capacity: usize,
    rings: Mutex<HashMap<Topic, RingBuffer<Arc<StreamEvent<P>>>>>,
    persistence: Option<PersistenceLink>,
    dropped_writes: Arc<AtomicU64>,
    /// The durable store holds nothing older than this
    pruned_before: AtomicI64,
    metrics: EngineMetrics,
}

impl<P> std::fmt::Debug for ReplayStore<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayStore")
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

impl<P> ReplayStore<P>
where
    P: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Ring buffers only
    pub fn new(capacity: usize, metrics: EngineMetrics) -> Result<Self> {
        if capacity == 0 {
            return Err(StorageError::InvalidCapacity(capacity));
        }
        Ok(Self {
            capacity,
            rings: Mutex::new(HashMap::new()),
            persistence: None,
            dropped_writes: Arc::new(AtomicU64::new(0)),
            pruned_before: AtomicI64::new(TimestampMs::MIN),
            metrics,
        })
    }

    /// Ring buffers plus a background writer feeding `store`
    ///
    /// Must be called from within a tokio runtime; the writer task runs
    /// until the returned store is dropped.
    pub fn with_persistence(
        capacity: usize,
        store: Arc<dyn PersistenceStore>,
        queue_capacity: usize,
        metrics: EngineMetrics,
    ) -> Result<(Self, JoinHandle<()>)> {
        if queue_capacity == 0 {
            return Err(StorageError::InvalidCapacity(queue_capacity));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| StorageError::PersistenceUnavailable(format!("no async runtime: {e}")))?;

        let mut replay = Self::new(capacity, metrics)?;
        let (tx, rx) = mpsc::channel(queue_capacity);
        let task = runtime.spawn(run_writer(
            Arc::clone(&store),
            rx,
            Arc::clone(&replay.dropped_writes),
            replay.metrics.clone(),
        ));
        replay.persistence = Some(PersistenceLink { store, writer: tx });
        Ok((replay, task))
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn has_persistence(&self) -> bool {
        self.persistence.is_some()
    }

    /// Writes that never reached the durable store
    pub fn dropped_writes(&self) -> u64 {
        self.dropped_writes.load(Ordering::Relaxed)
    }

    /// Buffer an event and queue it for persistence
    ///
    /// The event is always buffered. An error means only the durable write
    /// was lost.
    pub fn record(&self, event: &Arc<StreamEvent<P>>) -> Result<()> {
        {
            let mut rings = self.rings.lock();
            let ring = match rings.entry(event.topic.clone()) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => entry.insert(RingBuffer::new(self.capacity)?),
            };
            if ring.push(Arc::clone(event)).is_some() {
                self.metrics.buffer_evicted();
            }
        }

        let Some(link) = &self.persistence else {
            return Ok(());
        };
        let record = StoredRecord::from_event(event)?;
        link.writer.try_send(record).map_err(|e| {
            self.dropped_writes.fetch_add(1, Ordering::Relaxed);
            self.metrics.persistence_failed();
            let reason = match e {
                mpsc::error::TrySendError::Full(_) => "write queue full",
                mpsc::error::TrySendError::Closed(_) => "writer stopped",
            };
            warn!(topic = %event.topic, sequence = event.sequence, reason, "Persistence write dropped");
            StorageError::PersistenceUnavailable(reason.to_string())
        })
    }

    /// Buffered events on `topic` with `timestamp >= since`, by sequence
    pub fn replay(&self, topic: &Topic, since: TimestampMs) -> Vec<Arc<StreamEvent<P>>> {
        self.rings
            .lock()
            .get(topic)
            .map(|ring| ring.iter().filter(|e| e.timestamp >= since).cloned().collect())
            .unwrap_or_default()
    }

    /// The newest `n` buffered events on `topic`
    pub fn replay_last(&self, topic: &Topic, n: usize) -> Vec<Arc<StreamEvent<P>>> {
        self.rings
            .lock()
            .get(topic)
            .map(|ring| ring.get_last(n))
            .unwrap_or_default()
    }

    pub fn buffered_len(&self, topic: &Topic) -> usize {
        self.rings.lock().get(topic).map(RingBuffer::len).unwrap_or(0)
    }

    pub fn topics(&self) -> Vec<Topic> {
        let mut topics: Vec<Topic> = self.rings.lock().keys().cloned().collect();
        topics.sort();
        topics
    }

    /// Start of what the durable store still holds after pruning
    pub fn pruned_before(&self) -> Option<TimestampMs> {
        match self.pruned_before.load(Ordering::Acquire) {
            TimestampMs::MIN => None,
            horizon => Some(horizon),
        }
    }

    /// Replay `[since, until)` from the ring and, if attached, the durable store
    ///
    /// Events found in both are merged by sequence. The outcome is marked
    /// incomplete when older events were evicted from the ring and the
    /// durable store could not vouch for them: it was unreachable, lost
    /// writes, or has pruned part of the range.
    pub async fn replay_with_history(
        &self,
        topic: &Topic,
        since: TimestampMs,
        until: TimestampMs,
    ) -> ReplayOutcome<P> {
        let (buffered, ring_covers_range) = {
            let rings = self.rings.lock();
            match rings.get(topic) {
                Some(ring) => {
                    let buffered: Vec<_> = ring
                        .iter()
                        .filter(|e| e.timestamp >= since && e.timestamp < until)
                        .cloned()
                        .collect();
                    let covers = ring.evicted_count() == 0
                        || ring.iter().next().map(|e| e.timestamp < since).unwrap_or(false);
                    (buffered, covers)
                }
                None => (Vec::new(), true),
            }
        };

        let mut merged: BTreeMap<u64, Arc<StreamEvent<P>>> = BTreeMap::new();
        let mut complete = ring_covers_range;

        if let Some(link) = &self.persistence {
            match link.store.query_range(topic, since, until).await {
                Ok(records) => {
                    let mut decoded_all = true;
                    for record in records {
                        let sequence = record.sequence;
                        match record.into_event::<P>() {
                            Ok(event) => {
                                merged.insert(event.sequence, Arc::new(event));
                            }
                            Err(e) => {
                                decoded_all = false;
                                warn!(%topic, sequence, error = %e, "Skipping undecodable record");
                            }
                        }
                    }
                    let pruned = self.pruned_before().is_some_and(|horizon| since < horizon);
                    if decoded_all && self.dropped_writes() == 0 && !pruned {
                        complete = true;
                    }
                }
                Err(e) => {
                    warn!(%topic, error = %e, "Durable replay unavailable, serving buffer only");
                }
            }
        }

        // Buffered copies win over decoded ones
        for event in buffered {
            merged.insert(event.sequence, event);
        }

        ReplayOutcome {
            events: merged.into_values().collect(),
            complete,
        }
    }

    /// Prune the durable store. Without one there is nothing to prune.
    pub async fn prune_persistence(&self, max_age_ms: u64, now: TimestampMs) -> Result<u64> {
        match &self.persistence {
            Some(link) => {
                let removed = link.store.prune_older_than(max_age_ms, now).await?;
                let horizon = now.saturating_sub(i64::try_from(max_age_ms).unwrap_or(i64::MAX));
                self.pruned_before.fetch_max(horizon, Ordering::AcqRel);
                debug!(removed, max_age_ms, horizon, "Pruned durable records");
                Ok(removed)
            }
            None => Ok(0),
        }
    }
}

async fn run_writer(
    store: Arc<dyn PersistenceStore>,
    mut rx: mpsc::Receiver<StoredRecord>,
    dropped: Arc<AtomicU64>,
    metrics: EngineMetrics,
) {
    while let Some(record) = rx.recv().await {
        let topic = record.topic.clone();
        let sequence = record.sequence;
        if let Err(e) = store.save(record).await {
            dropped.fetch_add(1, Ordering::Relaxed);
            metrics.persistence_failed();
            warn!(%topic, sequence, error = %e, "Persistence write failed");
        }
    }
    debug!("Persistence writer stopped");
}
