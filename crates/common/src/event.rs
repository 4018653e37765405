//! Canonical stream event envelope
//!
//! Events are created once, at publish time, and never mutated afterwards.
//! Components share them behind an `Arc`.

use serde::{Deserialize, Serialize};

use crate::topic::Topic;
use crate::types::{EventId, TimestampMs};

/// An event routed by the dispatcher
///
/// `sequence` is assigned per topic by the dispatcher and is strictly
/// increasing within that topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent<P> {
    /// Unique event id
    pub id: EventId,
    /// Event time in epoch milliseconds
    pub timestamp: TimestampMs,
    /// Topic the event was published on
    pub topic: Topic,
    /// Per-topic sequence number, starting at 1
    pub sequence: u64,
    /// Event body
    pub payload: P,
}

impl<P> StreamEvent<P> {
    /// Build an event envelope
    pub fn new(topic: Topic, sequence: u64, timestamp: TimestampMs, payload: P) -> Self {
        Self {
            id: EventId::new(),
            timestamp,
            topic,
            sequence,
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_round_trip_json() {
        let event = StreamEvent::new(Topic::trade("AAPL"), 7, 1_700_000_000_000, 42u32);
        let json = serde_json::to_string(&event).unwrap();
        let back: StreamEvent<u32> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
        assert!(json.contains("\"topic\":\"trade:AAPL\""));
    }
}
