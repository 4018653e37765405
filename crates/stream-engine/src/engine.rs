//! Engine facade: wires ingest, dispatch, aggregation, risk, replay and compute
//!
//! # Event flow
//!
//! ```text
//! RawRecord -> Normalizer -> pipeline (trades) -> vwap / candle / indicators / stats / session
//!                         -> dispatcher -> replay buffer (every topic)
//!                                       -> risk      (trade, quote, option) -> pl:<id> / greeks:portfolio
//!                                       -> user subscribers
//! ```
//!
//! A trade is folded into the pipeline before it is published, so one a
//! window refuses is rejected whole: no aggregate moves and nothing is
//! published. The record and what it derived are queued together under the
//! pipeline lock and delivered after the lock is released; risk events are
//! published from inside a dispatcher handler and queue behind their cause.
//! No component lock is held while handlers run.

use std::sync::{Arc, Weak};
use std::time::Duration;

use common::{StreamEvent, SubscriptionToken, TimestampMs, Topic, TopicFilter};
use compute::ComputePool;
use config::StreamConfig;
use market_data::{
    Candle, CandleInterval, EventDispatcher, NormalizedRecord, Normalizer, RawRecord, SymbolMeta, TradePoint,
};
use observability::EngineMetrics;
use parking_lot::Mutex;
use risk_engine::{PortfolioGreeks, Position, PositionFeed, PositionPnl, PositionRisk, RiskEngine};
use storage::{PersistenceStore, ReplayOutcome, ReplayStore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::EngineError;
use crate::jobs::{EngineJob, JobOutput};
use crate::payload::EventPayload;
use crate::pipeline::{Derived, Pipeline};
use crate::Result;

pub type EngineEvent = StreamEvent<EventPayload>;

type Dispatcher = EventDispatcher<EventPayload>;

/// Builder for [`StreamEngine`]
pub struct StreamEngineBuilder {
    config: StreamConfig,
    clock: Arc<dyn Clock>,
    persistence: Option<Arc<dyn PersistenceStore>>,
    metrics: Option<EngineMetrics>,
}

impl StreamEngineBuilder {
    pub fn new(config: StreamConfig) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
            persistence: None,
            metrics: None,
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Attach a durable store behind the replay buffers (needs a tokio runtime)
    pub fn persistence(mut self, store: Arc<dyn PersistenceStore>) -> Self {
        self.persistence = Some(store);
        self
    }

    pub fn metrics(mut self, metrics: EngineMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> Result<StreamEngine> {
        let report = config::validate_config(&self.config);
        if !report.is_valid() {
            let errors: Vec<String> = report.errors.iter().map(ToString::to_string).collect();
            return Err(EngineError::InvalidConfig(errors.join("; ")));
        }

        let config = self.config;
        let metrics = self
            .metrics
            .unwrap_or_else(|| EngineMetrics::new(&config.engine.name));

        let (replay, persistence_task) = match self.persistence {
            Some(store) => {
                let (replay, task) = ReplayStore::with_persistence(
                    config.buffer.capacity_per_topic,
                    store,
                    config.buffer.persistence_queue_capacity,
                    metrics.clone(),
                )?;
                (replay, Some(task))
            }
            None => (ReplayStore::new(config.buffer.capacity_per_topic, metrics.clone())?, None),
        };

        let dispatcher: Arc<Dispatcher> = Arc::new(EventDispatcher::new(metrics.clone()));
        let pipeline = Arc::new(Mutex::new(Pipeline::new(&config, metrics.clone())?));
        let risk = Arc::new(Mutex::new(RiskEngine::new(&config.risk)));
        let replay = Arc::new(replay);
        let compute = ComputePool::new(&config.compute, metrics.clone())?;

        // Registration order is delivery order: the replay tap sees every
        // event before anything derived from it is published
        let internal = vec![
            subscribe_replay_tap(&dispatcher, Arc::clone(&replay)),
            subscribe_risk(&dispatcher, Arc::clone(&risk)),
        ];

        info!(
            engine = %config.engine.name,
            intervals = ?config.windows.candle_intervals,
            buffer_capacity = config.buffer.capacity_per_topic,
            compute_workers = config.compute.workers,
            persistence = replay.has_persistence(),
            "Stream engine started"
        );

        Ok(StreamEngine {
            normalizer: Mutex::new(Normalizer::new(&config.normalizer).with_risk_free_rate(config.risk.risk_free_rate)),
            config,
            clock: self.clock,
            dispatcher,
            pipeline,
            risk,
            replay,
            compute,
            persistence_task,
            internal,
            metrics,
        })
    }
}

/// Real-time market data engine
///
/// All methods take `&self`; the engine can be shared behind an `Arc`
/// between an ingest loop and readers.
pub struct StreamEngine {
    config: StreamConfig,
    clock: Arc<dyn Clock>,
    dispatcher: Arc<Dispatcher>,
    normalizer: Mutex<Normalizer>,
    pipeline: Arc<Mutex<Pipeline>>,
    risk: Arc<Mutex<RiskEngine>>,
    replay: Arc<ReplayStore<EventPayload>>,
    compute: ComputePool<EngineJob>,
    persistence_task: Option<JoinHandle<()>>,
    internal: Vec<SubscriptionToken>,
    metrics: EngineMetrics,
}

impl std::fmt::Debug for StreamEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamEngine").finish_non_exhaustive()
    }
}

impl StreamEngine {
    pub fn builder(config: StreamConfig) -> StreamEngineBuilder {
        StreamEngineBuilder::new(config)
    }

    /// Engine with the system clock and no durable store
    pub fn new(config: StreamConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn now(&self) -> TimestampMs {
        self.clock.now_ms()
    }

    // --- ingest ---

    /// Normalize one raw record and publish it on its topic
    ///
    /// Trades are applied to the aggregation pipeline first; a trade one of
    /// its windows refuses is returned as [`EngineError::Window`] and never
    /// published. A rejected record is counted and logged; the engine keeps
    /// running.
    pub fn ingest(&self, raw: &RawRecord) -> Result<Arc<EngineEvent>> {
        let received_at = self.clock.now_ms();
        let normalized = self.normalizer.lock().normalize(raw, received_at);
        let record = match normalized {
            Ok(record) => record,
            Err(e) => return Err(self.reject(EngineError::from(e))),
        };

        let event = {
            // Pipeline order is queue order
            let mut pipeline = self.pipeline.lock();
            let derived = match &record {
                NormalizedRecord::Trade(trade) => match pipeline.on_trade(trade) {
                    Ok(derived) => derived,
                    Err(e) => return Err(self.reject(EngineError::Window(e))),
                },
                _ => Vec::new(),
            };
            self.normalizer.lock().observe(&record);

            let topic = match &record {
                NormalizedRecord::Trade(t) => Topic::trade(&t.symbol),
                NormalizedRecord::Quote(q) => Topic::quote(&q.symbol),
                NormalizedRecord::Option(o) => Topic::option(&o.symbol),
            };
            let timestamp = record.timestamp();
            let event = self.dispatcher.enqueue(topic, timestamp, EventPayload::from(record));
            enqueue_all(&self.dispatcher, derived);
            event
        };

        self.dispatcher.flush();
        Ok(event)
    }

    /// Parse one JSON object and ingest it
    pub fn ingest_json(&self, line: &str) -> Result<Arc<EngineEvent>> {
        match serde_json::from_str::<RawRecord>(line) {
            Ok(raw) => self.ingest(&raw),
            Err(e) => Err(self.reject(EngineError::MalformedEvent(format!("invalid JSON: {e}")))),
        }
    }

    fn reject(&self, err: EngineError) -> EngineError {
        self.metrics.ingest_rejected(err.reason());
        warn!(error = %err, "Input record rejected");
        err
    }

    /// Register contract metadata (multiplier, underlying) for a symbol
    pub fn register_symbol(&self, meta: SymbolMeta) {
        self.normalizer.lock().register_symbol(meta);
    }

    // --- time ---

    /// Fire window timers due at the clock's current time
    pub fn tick(&self) -> usize {
        self.advance_to(self.clock.now_ms())
    }

    /// Fire window timers due at or before `now`; returns events published
    pub fn advance_to(&self, now: TimestampMs) -> usize {
        let published = {
            let mut pipeline = self.pipeline.lock();
            enqueue_all(&self.dispatcher, pipeline.advance(now))
        };
        self.dispatcher.flush();
        published
    }

    /// Close every open window (end of input)
    pub fn finish(&self) -> usize {
        let published = {
            let mut pipeline = self.pipeline.lock();
            enqueue_all(&self.dispatcher, pipeline.flush_all())
        };
        self.dispatcher.flush();
        info!(published, "Open windows flushed");
        published
    }

    // --- subscriptions ---

    /// Subscribe with `*`, `family:*` or an exact topic
    pub fn subscribe<F>(&self, pattern: &str, handler: F) -> Result<SubscriptionToken>
    where
        F: Fn(&EngineEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Ok(self.dispatcher.subscribe_pattern(pattern, handler)?)
    }

    pub fn subscribe_filter<F>(&self, filter: TopicFilter, handler: F) -> SubscriptionToken
    where
        F: Fn(&EngineEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.dispatcher.subscribe(filter, handler)
    }

    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        if self.internal.contains(&token) {
            return false;
        }
        self.dispatcher.unsubscribe(token)
    }

    /// Last sequence published on `topic`
    pub fn last_sequence(&self, topic: &str) -> Result<u64> {
        Ok(self.dispatcher.last_sequence(&Topic::parse(topic)?))
    }

    // --- positions and risk ---

    pub fn upsert_position(&self, position: Position) -> Result<()> {
        let id = position.id.clone();
        self.risk.lock().upsert_position(position)?;
        publish_risk(&self.dispatcher, &self.risk, &[id], self.clock.now_ms());
        Ok(())
    }

    pub fn remove_position(&self, id: &str) -> Option<Position> {
        let removed = self.risk.lock().remove_position(id);
        if removed.is_some() {
            publish_risk(&self.dispatcher, &self.risk, &[], self.clock.now_ms());
        }
        removed
    }

    /// Replace the position book with a feed snapshot
    pub async fn sync_positions(&self, feed: &dyn PositionFeed) -> Result<usize> {
        let positions = feed.fetch_positions().await?;
        let ids: Vec<String> = positions.iter().map(|p| p.id.clone()).collect();
        let count = self.risk.lock().sync_positions(positions)?;
        publish_risk(&self.dispatcher, &self.risk, &ids, self.clock.now_ms());
        Ok(count)
    }

    pub fn positions(&self) -> Vec<Position> {
        self.risk.lock().positions().into_iter().cloned().collect()
    }

    pub fn position_pnl(&self, id: &str) -> Result<PositionPnl> {
        Ok(self.risk.lock().position_pnl(id)?)
    }

    pub fn total_unrealized_pnl(&self) -> f64 {
        self.risk.lock().total_unrealized_pnl()
    }

    pub fn position_greeks(&self, id: &str) -> Result<PositionRisk> {
        let now = self.clock.now_ms();
        Ok(self.risk.lock().position_greeks(id, now)?)
    }

    /// Portfolio Greeks valued at the clock's current time
    pub fn portfolio_greeks(&self) -> PortfolioGreeks {
        let now = self.clock.now_ms();
        self.risk.lock().portfolio_greeks(now)
    }

    // --- aggregates ---

    /// Closed candles followed by the in-progress one, newest `limit` (0 = all)
    pub fn candles(&self, symbol: &str, interval: &str, limit: usize) -> Result<Vec<Candle>> {
        let interval = CandleInterval::parse(interval)?;
        let symbol = common::normalize_symbol(symbol);
        Ok(self.pipeline.lock().candles().get_candles(&symbol, interval, limit))
    }

    pub fn latest_candle(&self, symbol: &str, interval: &str) -> Result<Option<Candle>> {
        let interval = CandleInterval::parse(interval)?;
        let symbol = common::normalize_symbol(symbol);
        Ok(self.pipeline.lock().candles().latest_candle(&symbol, interval))
    }

    pub fn vwap(&self, symbol: &str) -> Option<f64> {
        self.pipeline.lock().vwap(&common::normalize_symbol(symbol))
    }

    // --- replay ---

    /// Buffered events on `topic` with timestamp at or after `since`
    pub fn replay(&self, topic: &str, since: TimestampMs) -> Result<Vec<Arc<EngineEvent>>> {
        Ok(self.replay.replay(&Topic::parse(topic)?, since))
    }

    pub fn replay_last(&self, topic: &str, n: usize) -> Result<Vec<Arc<EngineEvent>>> {
        Ok(self.replay.replay_last(&Topic::parse(topic)?, n))
    }

    /// Replay `[since, until)` from the buffer and the durable store
    pub async fn replay_with_history(
        &self,
        topic: &str,
        since: TimestampMs,
        until: TimestampMs,
    ) -> Result<ReplayOutcome<EventPayload>> {
        let topic = Topic::parse(topic)?;
        Ok(self.replay.replay_with_history(&topic, since, until).await)
    }

    /// Drop durable records older than the configured retention
    pub async fn prune_persistence(&self) -> Result<u64> {
        let now = self.clock.now_ms();
        Ok(self
            .replay
            .prune_persistence(self.config.buffer.retention_ms, now)
            .await?)
    }

    /// Writes the durable store never received
    pub fn dropped_writes(&self) -> u64 {
        self.replay.dropped_writes()
    }

    // --- compute offload ---

    /// Run any engine job on the compute pool
    pub async fn calculate(&self, job: EngineJob, timeout: Duration) -> Result<JobOutput> {
        Ok(self.compute.calculate(job, timeout).await?)
    }

    /// Portfolio Greeks computed off the ingest path
    ///
    /// Works on a snapshot taken now; later updates are not reflected.
    pub async fn greeks_batch(&self) -> Result<PortfolioGreeks> {
        let as_of = self.clock.now_ms();
        let (positions, inputs) = self.risk.lock().snapshot();
        let job = EngineJob::GreeksBatch {
            positions,
            inputs,
            as_of,
        };
        let output = self.compute.calculate_default(job).await?;
        unexpected_output(output.into_greeks(), "greeks_batch")
    }

    /// Rebuild candles for `symbol` from the trades still in the replay buffer
    pub async fn rebuild_candles(&self, symbol: &str, interval: &str) -> Result<Vec<Candle>> {
        let interval = CandleInterval::parse(interval)?;
        let symbol = common::normalize_symbol(symbol);
        let trades: Vec<TradePoint> = self
            .replay
            .replay(&Topic::trade(&symbol), TimestampMs::MIN)
            .iter()
            .filter_map(|event| event.payload.as_trade().map(|t| t.point()))
            .collect();
        debug!(%symbol, %interval, trades = trades.len(), "Rebuilding candles");

        let job = EngineJob::CandleRebuild {
            symbol,
            interval,
            trades,
        };
        let output = self.compute.calculate_default(job).await?;
        unexpected_output(output.into_candles(), "candle_rebuild")
    }

    /// Stop the compute workers and release the replay buffers
    ///
    /// Returns the durable writer task, which finishes once its queue is
    /// drained; await it to be sure every accepted write was attempted.
    pub fn shutdown(self) -> Option<JoinHandle<()>> {
        let Self {
            dispatcher,
            compute,
            persistence_task,
            internal,
            ..
        } = self;
        for token in internal {
            dispatcher.unsubscribe(token);
        }
        compute.shutdown();
        info!("Stream engine stopped");
        persistence_task
    }
}

fn unexpected_output<T>(output: Option<T>, kind: &str) -> Result<T> {
    output.ok_or_else(|| {
        EngineError::Compute(compute::ComputeError::JobFailed {
            kind: kind.to_string(),
            reason: "unexpected output variant".to_string(),
        })
    })
}

/// Queue derived events; the caller flushes once its locks are released
fn enqueue_all(dispatcher: &Dispatcher, derived: Vec<Derived>) -> usize {
    let count = derived.len();
    for event in derived {
        dispatcher.enqueue(event.topic, event.timestamp, event.payload);
    }
    count
}

/// Publish P&L for `ids` (those with a price) and refreshed portfolio Greeks
fn publish_risk(dispatcher: &Dispatcher, risk: &Mutex<RiskEngine>, ids: &[String], now: TimestampMs) {
    let (pnls, greeks) = {
        let mut risk = risk.lock();
        let pnls: Vec<PositionPnl> = ids.iter().filter_map(|id| risk.position_pnl(id).ok()).collect();
        (pnls, risk.portfolio_greeks(now))
    };

    for pnl in pnls {
        dispatcher.publish(Topic::pl(&pnl.position_id), now, EventPayload::PositionPnl(pnl));
    }
    dispatcher.publish(Topic::greeks_portfolio(), now, EventPayload::PortfolioGreeks(greeks));
}

fn subscribe_replay_tap(dispatcher: &Arc<Dispatcher>, replay: Arc<ReplayStore<EventPayload>>) -> SubscriptionToken {
    dispatcher.subscribe(TopicFilter::All, move |event| {
        if let Err(e) = replay.record(&Arc::new(event.clone())) {
            // The event is buffered either way; only the durable copy is missing
            debug!(topic = %event.topic, sequence = event.sequence, error = %e, "Durable write skipped");
        }
        Ok(())
    })
}

fn subscribe_risk(dispatcher: &Arc<Dispatcher>, risk: Arc<Mutex<RiskEngine>>) -> SubscriptionToken {
    let weak: Weak<Dispatcher> = Arc::downgrade(dispatcher);
    dispatcher.subscribe(TopicFilter::All, move |event| {
        let price = match &event.payload {
            EventPayload::Trade(t) => Some((t.symbol.as_str(), t.price)),
            EventPayload::Quote(q) if !q.inverted => Some((q.symbol.as_str(), q.mid)),
            EventPayload::Option(o) => o.market_price().map(|p| (o.symbol.as_str(), p)),
            _ => None,
        };
        let implied_vol = match &event.payload {
            EventPayload::Option(o) => o.implied_vol.map(|vol| (o.symbol.as_str(), vol)),
            _ => None,
        };
        if price.is_none() && implied_vol.is_none() {
            return Ok(());
        }

        let affected = {
            let mut risk = risk.lock();
            let mut affected = match price {
                Some((symbol, price)) => risk.update_price(symbol, price, event.timestamp),
                None => Vec::new(),
            };
            if let Some((symbol, vol)) = implied_vol {
                affected.extend(risk.update_implied_vol(symbol, vol));
                affected.sort();
                affected.dedup();
            }
            affected
        };
        if affected.is_empty() {
            return Ok(());
        }
        if let Some(dispatcher) = weak.upgrade() {
            publish_risk(&dispatcher, &risk, &affected, event.timestamp);
        }
        Ok(())
    })
}
