//! Per-symbol aggregation fed by trades
//!
//! Every trade updates VWAP, the candle windows, the sliding statistics
//! window and the activity session of its symbol. The pipeline only
//! computes; it hands back the derived events for the engine to publish.
//!
//! A trade is applied to all of these or to none: it is checked against
//! every window of its symbol before anything is folded in.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use common::{TimestampMs, Topic};
use config::{LateEventPolicy, StreamConfig};
use market_data::{
    Candle, CandleAggregator, CandleInterval, IndicatorSet, IndicatorSnapshot, NormalizedTrade, RollingStats,
    SessionSummary, SessionWindow, SlidingWindow, TradePoint, VwapState, VwapUpdate, WindowError, WindowFlush,
};
use market_data::windows::WindowResult;
use observability::EngineMetrics;
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::payload::EventPayload;
use crate::Result;

/// An event the pipeline wants published
#[derive(Debug, Clone, PartialEq)]
pub struct Derived {
    pub topic: Topic,
    pub timestamp: TimestampMs,
    pub payload: EventPayload,
}

impl Derived {
    fn new(topic: Topic, timestamp: TimestampMs, payload: EventPayload) -> Self {
        Self {
            topic,
            timestamp,
            payload,
        }
    }
}

type TradeFlush = WindowFlush<Vec<(TimestampMs, TradePoint)>>;

pub struct Pipeline {
    config: StreamConfig,
    candles: CandleAggregator,
    indicator_interval: Option<CandleInterval>,
    vwap: HashMap<String, VwapState>,
    indicators: HashMap<String, IndicatorSet>,
    sliding: HashMap<String, SlidingWindow<TradePoint>>,
    sessions: HashMap<String, SessionWindow<TradePoint>>,
    metrics: EngineMetrics,
}

impl Pipeline {
    /// Build the pipeline, rejecting window or indicator settings that could
    /// never produce output
    pub fn new(config: &StreamConfig, metrics: EngineMetrics) -> Result<Self> {
        let candles = CandleAggregator::from_settings(&config.windows)?;
        let indicator_interval = config
            .effective_indicator_interval()
            .map(CandleInterval::parse)
            .transpose()?;

        // Build once so bad sizes fail at construction, not per symbol
        SlidingWindow::<TradePoint>::new(config.windows.sliding_size_ms, config.windows.slide_interval_ms)
            .map_err(|e| EngineError::InvalidConfig(e.to_string()))?;
        SessionWindow::<TradePoint>::new(config.windows.session_gap_ms)
            .map_err(|e| EngineError::InvalidConfig(e.to_string()))?;
        IndicatorSet::from_settings(&config.indicators).map_err(|e| EngineError::InvalidConfig(e.to_string()))?;

        Ok(Self {
            config: config.clone(),
            candles,
            indicator_interval,
            vwap: HashMap::new(),
            indicators: HashMap::new(),
            sliding: HashMap::new(),
            sessions: HashMap::new(),
            metrics,
        })
    }

    /// Check a trade against every window of its symbol without applying it
    ///
    /// Returns the timestamp the windows should see. A trade older than a
    /// sliding or session floor is refused under `Drop` and moved up to the
    /// newest such floor under `MergeIntoCurrent`; candle windows apply the
    /// same policy on their own.
    pub fn admit(&self, trade: &NormalizedTrade) -> WindowResult<TimestampMs> {
        let symbol = trade.symbol.as_str();
        self.candles.check_trade(symbol, trade.timestamp)?;

        let checks = [
            self.sliding.get(symbol).map(|w| (w.check(trade.timestamp), w.floor())),
            self.sessions.get(symbol).map(|w| (w.check(trade.timestamp), w.floor())),
        ];

        let mut timestamp = trade.timestamp;
        for (result, floor) in checks.into_iter().flatten() {
            if let Err(e) = result {
                match self.config.windows.late_event_policy {
                    LateEventPolicy::Drop => return Err(e),
                    LateEventPolicy::MergeIntoCurrent => {
                        timestamp = timestamp.max(floor.unwrap_or(timestamp));
                    }
                }
            }
        }
        Ok(timestamp)
    }

    /// Fold one trade into every aggregate of its symbol
    ///
    /// A refused trade is counted and leaves VWAP and every window as it was.
    pub fn on_trade(&mut self, trade: &NormalizedTrade) -> WindowResult<Vec<Derived>> {
        let mut out = Vec::new();
        let symbol = trade.symbol.as_str();

        let timestamp = match self.admit(trade) {
            Ok(timestamp) => timestamp,
            Err(e) => {
                self.window_rejected(symbol, e.kind().as_str(), &e);
                return Err(e);
            }
        };
        if timestamp != trade.timestamp {
            debug!(symbol, timestamp = trade.timestamp, merged_at = timestamp, "Late trade merged into open windows");
        }
        let point = TradePoint {
            timestamp,
            ..trade.point()
        };

        let vwap = self.vwap.entry(symbol.to_string()).or_default();
        match vwap.update(point.price, point.size) {
            Ok(Some(value)) => out.push(Derived::new(
                Topic::vwap(symbol),
                point.timestamp,
                EventPayload::Vwap(VwapUpdate {
                    symbol: symbol.to_string(),
                    vwap: value,
                    cumulative_notional: vwap.cumulative_notional(),
                    cumulative_volume: vwap.cumulative_volume(),
                    timestamp: point.timestamp,
                }),
            )),
            Ok(None) => {}
            Err(e) => warn!(symbol, error = %e, "VWAP reset"),
        }

        let update = self.candles.add_trade(symbol, point);
        for (interval, error) in &update.rejected {
            self.window_rejected(symbol, &interval.label(), error);
        }
        for candle in update.closed {
            self.emit_candle(candle, &mut out);
        }

        let sliding = self.sliding_window(symbol);
        match sliding.and_then(|w| w.add(point.timestamp, point)) {
            Ok(flushes) => {
                for flush in flushes {
                    self.emit_stats(symbol, &flush, &mut out);
                }
            }
            Err(e) => self.window_rejected(symbol, "sliding", &e),
        }

        let session = self.session_window(symbol);
        match session.and_then(|w| w.add(point.timestamp, point)) {
            Ok(Some(flush)) => self.emit_session(symbol, &flush, &mut out),
            Ok(None) => {}
            Err(e) => self.window_rejected(symbol, "session", &e),
        }

        Ok(out)
    }

    /// Fire every window timer due at or before `now`
    pub fn advance(&mut self, now: TimestampMs) -> Vec<Derived> {
        let mut out = Vec::new();

        for candle in self.candles.advance(now) {
            self.emit_candle(candle, &mut out);
        }

        for symbol in sorted_keys(&self.sliding) {
            let flushes = match self.sliding.get_mut(&symbol) {
                Some(window) => window.advance(now),
                None => continue,
            };
            for flush in flushes {
                self.emit_stats(&symbol, &flush, &mut out);
            }
        }

        for symbol in sorted_keys(&self.sessions) {
            let flush = self.sessions.get_mut(&symbol).and_then(|w| w.advance(now));
            if let Some(flush) = flush {
                self.emit_session(&symbol, &flush, &mut out);
            }
        }

        out
    }

    /// Close every open window (end of stream)
    pub fn flush_all(&mut self) -> Vec<Derived> {
        let mut out = Vec::new();

        for candle in self.candles.flush_all() {
            self.emit_candle(candle, &mut out);
        }
        for symbol in sorted_keys(&self.sliding) {
            let flush = self.sliding.get_mut(&symbol).and_then(|w| w.flush());
            if let Some(flush) = flush {
                self.emit_stats(&symbol, &flush, &mut out);
            }
        }
        for symbol in sorted_keys(&self.sessions) {
            let flush = self.sessions.get_mut(&symbol).and_then(|w| w.flush());
            if let Some(flush) = flush {
                self.emit_session(&symbol, &flush, &mut out);
            }
        }

        out
    }

    pub fn candles(&self) -> &CandleAggregator {
        &self.candles
    }

    pub fn vwap(&self, symbol: &str) -> Option<f64> {
        self.vwap.get(symbol).and_then(VwapState::value)
    }

    fn sliding_window(&mut self, symbol: &str) -> WindowResult<&mut SlidingWindow<TradePoint>> {
        Ok(match self.sliding.entry(symbol.to_string()) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => e.insert(SlidingWindow::new(
                self.config.windows.sliding_size_ms,
                self.config.windows.slide_interval_ms,
            )?),
        })
    }

    fn session_window(&mut self, symbol: &str) -> WindowResult<&mut SessionWindow<TradePoint>> {
        Ok(match self.sessions.entry(symbol.to_string()) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => e.insert(SessionWindow::new(self.config.windows.session_gap_ms)?),
        })
    }

    fn emit_candle(&mut self, candle: Candle, out: &mut Vec<Derived>) {
        self.metrics.window_flushed("tumbling");
        let timeframe = candle.interval.label();
        let timestamp = candle.window_end;

        if self.indicator_interval == Some(candle.interval) {
            match self.indicator_snapshot(&candle) {
                Ok(snapshot) => {
                    out.push(Derived::new(Topic::candle(&timeframe, &candle.symbol), timestamp, EventPayload::Candle(candle.clone())));
                    out.push(Derived::new(
                        Topic::indicators(&timeframe, &snapshot.symbol),
                        timestamp,
                        EventPayload::Indicators(snapshot),
                    ));
                    return;
                }
                Err(e) => warn!(symbol = %candle.symbol, error = %e, "Indicators reset"),
            }
        }

        out.push(Derived::new(Topic::candle(&timeframe, &candle.symbol), timestamp, EventPayload::Candle(candle)));
    }

    fn indicator_snapshot(&mut self, candle: &Candle) -> Result<IndicatorSnapshot> {
        let set = match self.indicators.entry(candle.symbol.clone()) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => e.insert(IndicatorSet::from_settings(&self.config.indicators)?),
        };
        Ok(set.update(
            &candle.symbol,
            &candle.interval.label(),
            candle.window_end,
            candle.ohlc.close(),
        )?)
    }

    fn emit_stats(&self, symbol: &str, flush: &TradeFlush, out: &mut Vec<Derived>) {
        if let Some(stats) = RollingStats::from_flush(symbol, flush) {
            self.metrics.window_flushed("sliding");
            out.push(Derived::new(Topic::stats(symbol), flush.end, EventPayload::Stats(stats)));
        }
    }

    fn emit_session(&self, symbol: &str, flush: &TradeFlush, out: &mut Vec<Derived>) {
        if let Some(summary) = SessionSummary::from_flush(symbol, flush) {
            self.metrics.window_flushed("session");
            out.push(Derived::new(Topic::session(symbol), flush.end, EventPayload::Session(summary)));
        }
    }

    fn window_rejected(&self, symbol: &str, window: &str, error: &WindowError) {
        self.metrics.window_rejected(window, error.reason());
        warn!(symbol, window, error = %error, "Trade rejected by window");
    }
}

fn sorted_keys<V>(map: &HashMap<String, V>) -> Vec<String> {
    let mut keys: Vec<String> = map.keys().cloned().collect();
    keys.sort();
    keys
}
