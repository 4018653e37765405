//! In-process publish/subscribe router
//!
//! Sequence numbers are assigned per topic at publish time and events are
//! delivered in that order. Publishing from inside a handler only enqueues
//! the event; the outer publish call drains the queue once the current
//! event has reached every subscriber, so no handler ever sees a topic out
//! of order.

use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use common::{StreamEvent, SubscriptionToken, TimestampMs, Topic, TopicFilter};
use observability::EngineMetrics;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error};

/// Subscriber callback. Errors are logged and never stop delivery.
pub type Handler<P> = Arc<dyn Fn(&StreamEvent<P>) -> anyhow::Result<()> + Send + Sync>;

struct Subscription<P> {
    token: SubscriptionToken,
    filter: TopicFilter,
    handler: Handler<P>,
}

struct DeliveryQueue<P> {
    sequences: HashMap<Topic, u64>,
    pending: VecDeque<Arc<StreamEvent<P>>>,
    draining: bool,
}

/// Event router with an explicit, token-keyed subscriber registry
pub struct EventDispatcher<P> {
    subscribers: RwLock<Vec<Subscription<P>>>,
    queue: Mutex<DeliveryQueue<P>>,
    next_token: AtomicU64,
    metrics: EngineMetrics,
}

impl<P: Send + Sync + 'static> EventDispatcher<P> {
    pub fn new(metrics: EngineMetrics) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            queue: Mutex::new(DeliveryQueue {
                sequences: HashMap::new(),
                pending: VecDeque::new(),
                draining: false,
            }),
            next_token: AtomicU64::new(1),
            metrics,
        }
    }

    /// Register a handler; it sees events published from now on
    pub fn subscribe<F>(&self, filter: TopicFilter, handler: F) -> SubscriptionToken
    where
        F: Fn(&StreamEvent<P>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let token = SubscriptionToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        let mut subscribers = self.subscribers.write();
        debug!(%token, filter = %filter, "Subscriber registered");
        subscribers.push(Subscription {
            token,
            filter,
            handler: Arc::new(handler),
        });
        self.metrics.set_subscribers(subscribers.len());
        token
    }

    /// Subscribe with a textual filter: `*`, `candle:*` or an exact topic
    pub fn subscribe_pattern<F>(&self, pattern: &str, handler: F) -> common::Result<SubscriptionToken>
    where
        F: Fn(&StreamEvent<P>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let filter = TopicFilter::parse(pattern)?;
        Ok(self.subscribe(filter, handler))
    }

    /// Remove a handler. Returns false for an unknown token.
    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|s| s.token != token);
        let removed = subscribers.len() != before;
        if removed {
            debug!(%token, "Subscriber removed");
            self.metrics.set_subscribers(subscribers.len());
        }
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Last sequence assigned on `topic` (0 if nothing was published)
    pub fn last_sequence(&self, topic: &Topic) -> u64 {
        self.queue.lock().sequences.get(topic).copied().unwrap_or(0)
    }

    /// Assign the next sequence for `topic` and deliver the event
    pub fn publish(&self, topic: Topic, timestamp: TimestampMs, payload: P) -> Arc<StreamEvent<P>> {
        let event = self.enqueue(topic, timestamp, payload);
        self.flush();
        event
    }

    /// Assign the next sequence for `topic` and queue the event undelivered
    ///
    /// Lets a caller queue several events while holding its own lock and
    /// deliver them with [`flush`](Self::flush) after releasing it.
    pub fn enqueue(&self, topic: Topic, timestamp: TimestampMs, payload: P) -> Arc<StreamEvent<P>> {
        let mut queue = self.queue.lock();
        let sequence = queue.sequences.entry(topic.clone()).or_insert(0);
        *sequence += 1;
        let event = Arc::new(StreamEvent::new(topic, *sequence, timestamp, payload));
        queue.pending.push_back(Arc::clone(&event));
        event
    }

    /// Deliver everything queued
    pub fn flush(&self) {
        {
            let mut queue = self.queue.lock();
            if queue.draining {
                // An outer call is delivering; it will pick these up
                return;
            }
            queue.draining = true;
        }
        self.drain();
    }

    fn drain(&self) {
        loop {
            let next = {
                let mut queue = self.queue.lock();
                match queue.pending.pop_front() {
                    Some(event) => event,
                    None => {
                        queue.draining = false;
                        return;
                    }
                }
            };
            self.deliver(&next);
        }
    }

    fn deliver(&self, event: &StreamEvent<P>) {
        let family = event.topic.family().to_string();
        self.metrics.event_published(&family);

        // Snapshot so handlers may (un)subscribe while we deliver
        let handlers: Vec<(SubscriptionToken, Handler<P>)> = self
            .subscribers
            .read()
            .iter()
            .filter(|s| s.filter.matches(&event.topic))
            .map(|s| (s.token, Arc::clone(&s.handler)))
            .collect();

        for (token, handler) in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    self.metrics.handler_failed(&family);
                    error!(
                        %token,
                        topic = %event.topic,
                        sequence = event.sequence,
                        error = %e,
                        "Subscriber failed"
                    );
                }
                Err(_) => {
                    self.metrics.handler_failed(&family);
                    error!(
                        %token,
                        topic = %event.topic,
                        sequence = event.sequence,
                        "Subscriber panicked"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatcher() -> Arc<EventDispatcher<u32>> {
        Arc::new(EventDispatcher::new(EngineMetrics::new("test")))
    }

    fn recorder() -> (Arc<Mutex<Vec<(String, u64, u32)>>>, impl Fn(&StreamEvent<u32>) -> anyhow::Result<()>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |e: &StreamEvent<u32>| {
            sink.lock().push((e.topic.to_string(), e.sequence, e.payload));
            Ok(())
        })
    }

    #[test]
    fn test_sequences_are_per_topic() {
        let d = dispatcher();
        assert_eq!(d.publish(Topic::trade("AAPL"), 0, 1).sequence, 1);
        assert_eq!(d.publish(Topic::trade("AAPL"), 0, 2).sequence, 2);
        assert_eq!(d.publish(Topic::trade("MSFT"), 0, 3).sequence, 1);
        assert_eq!(d.last_sequence(&Topic::trade("AAPL")), 2);
        assert_eq!(d.last_sequence(&Topic::vwap("AAPL")), 0);
    }

    #[test]
    fn test_exact_and_wildcard_delivery() {
        let d = dispatcher();
        let (exact, exact_handler) = recorder();
        let (all, all_handler) = recorder();
        d.subscribe(TopicFilter::from(Topic::trade("AAPL")), exact_handler);
        d.subscribe(TopicFilter::All, all_handler);

        d.publish(Topic::trade("AAPL"), 0, 1);
        d.publish(Topic::quote("AAPL"), 0, 2);
        d.publish(Topic::trade("AAPL"), 0, 3);

        assert_eq!(
            *exact.lock(),
            vec![("trade:AAPL".to_string(), 1, 1), ("trade:AAPL".to_string(), 2, 3)]
        );
        let order: Vec<u32> = all.lock().iter().map(|(_, _, p)| *p).collect();
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[test]
    fn test_prefix_subscription() {
        let d = dispatcher();
        let (seen, handler) = recorder();
        d.subscribe_pattern("candle:*", handler).unwrap();
        d.publish(Topic::candle("1m", "AAPL"), 0, 1);
        d.publish(Topic::vwap("AAPL"), 0, 2);
        assert_eq!(seen.lock().len(), 1);
        assert!(d.subscribe_pattern("bad*", |_| Ok(())).is_err());
    }

    #[test]
    fn test_unsubscribe() {
        let d = dispatcher();
        let (seen, handler) = recorder();
        let token = d.subscribe(TopicFilter::All, handler);
        d.publish(Topic::trade("AAPL"), 0, 1);
        assert!(d.unsubscribe(token));
        assert!(!d.unsubscribe(token));
        d.publish(Topic::trade("AAPL"), 0, 2);
        assert_eq!(seen.lock().len(), 1);
        assert_eq!(d.subscriber_count(), 0);
    }

    #[test]
    fn test_failing_handlers_are_isolated() {
        let d = dispatcher();
        d.subscribe(TopicFilter::All, |_| Err(anyhow::anyhow!("boom")));
        d.subscribe(TopicFilter::All, |_| panic!("handler panic"));
        let (seen, handler) = recorder();
        d.subscribe(TopicFilter::All, handler);

        d.publish(Topic::trade("AAPL"), 0, 1);
        d.publish(Topic::trade("AAPL"), 0, 2);
        assert_eq!(seen.lock().len(), 2);
    }

    #[test]
    fn test_reentrant_publish_keeps_topic_order() {
        let d = dispatcher();
        let inner = Arc::clone(&d);
        d.subscribe(TopicFilter::from(Topic::trade("AAPL")), move |e| {
            inner.publish(Topic::vwap("AAPL"), e.timestamp, e.payload * 10);
            Ok(())
        });
        let (seen, handler) = recorder();
        d.subscribe(TopicFilter::All, handler);

        d.publish(Topic::trade("AAPL"), 0, 1);
        d.publish(Topic::trade("AAPL"), 0, 2);

        let seen = seen.lock();
        let payloads: Vec<u32> = seen.iter().map(|(_, _, p)| *p).collect();
        // Each derived event follows the trade that produced it
        assert_eq!(payloads, vec![1, 10, 2, 20]);
        let vwap_seqs: Vec<u64> = seen
            .iter()
            .filter(|(t, _, _)| t == "vwap:AAPL")
            .map(|(_, s, _)| *s)
            .collect();
        assert_eq!(vwap_seqs, vec![1, 2]);
    }

    #[test]
    fn test_enqueued_events_wait_for_flush() {
        let d = dispatcher();
        let (seen, handler) = recorder();
        d.subscribe(TopicFilter::All, handler);

        let first = d.enqueue(Topic::trade("AAPL"), 0, 1);
        d.enqueue(Topic::vwap("AAPL"), 0, 2);
        assert_eq!(first.sequence, 1);
        assert!(seen.lock().is_empty());

        d.flush();
        let payloads: Vec<u32> = seen.lock().iter().map(|(_, _, p)| *p).collect();
        assert_eq!(payloads, vec![1, 2]);
        d.flush();
        assert_eq!(seen.lock().len(), 2);
    }
}
