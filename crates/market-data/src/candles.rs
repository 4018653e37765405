use std::collections::{HashMap, VecDeque};

use common::TimestampMs;
use config::{interval_to_millis, LateEventPolicy, WindowSettings};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::MarketDataError;
use crate::types::TradePoint;
use crate::windows::{align_down, Accumulator, TumblingWindow, WindowError, WindowFlush};
use crate::Result;

const MINUTE_MS: i64 = 60_000;
const HOUR_MS: i64 = 60 * MINUTE_MS;
const DAY_MS: i64 = 24 * HOUR_MS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CandleInterval {
    OneMinute,
    FiveMinutes,
    FifteenMinutes,
    OneHour,
    FourHours,
    OneDay,
    /// Any other positive length, in milliseconds
    Custom(i64),
}

impl CandleInterval {
    pub fn as_millis(&self) -> i64 {
        match self {
            CandleInterval::OneMinute => MINUTE_MS,
            CandleInterval::FiveMinutes => 5 * MINUTE_MS,
            CandleInterval::FifteenMinutes => 15 * MINUTE_MS,
            CandleInterval::OneHour => HOUR_MS,
            CandleInterval::FourHours => 4 * HOUR_MS,
            CandleInterval::OneDay => DAY_MS,
            CandleInterval::Custom(ms) => *ms,
        }
    }

    pub fn from_millis(ms: i64) -> Self {
        match ms {
            MINUTE_MS => CandleInterval::OneMinute,
            ms if ms == 5 * MINUTE_MS => CandleInterval::FiveMinutes,
            ms if ms == 15 * MINUTE_MS => CandleInterval::FifteenMinutes,
            HOUR_MS => CandleInterval::OneHour,
            ms if ms == 4 * HOUR_MS => CandleInterval::FourHours,
            DAY_MS => CandleInterval::OneDay,
            other => CandleInterval::Custom(other),
        }
    }

    /// Parse `1m`, `5m`, `4h`, `30s`, `250ms`, ...
    pub fn parse(s: &str) -> Result<Self> {
        interval_to_millis(s)
            .and_then(|ms| i64::try_from(ms).ok())
            .map(Self::from_millis)
            .ok_or_else(|| MarketDataError::InvalidInterval(s.to_string()))
    }

    /// Timeframe label used in topic names, e.g. `candle:5m:AAPL`
    pub fn label(&self) -> String {
        match self {
            CandleInterval::OneMinute => "1m".to_string(),
            CandleInterval::FiveMinutes => "5m".to_string(),
            CandleInterval::FifteenMinutes => "15m".to_string(),
            CandleInterval::OneHour => "1h".to_string(),
            CandleInterval::FourHours => "4h".to_string(),
            CandleInterval::OneDay => "1d".to_string(),
            CandleInterval::Custom(ms) => {
                let ms = *ms;
                if ms % DAY_MS == 0 {
                    format!("{}d", ms / DAY_MS)
                } else if ms % HOUR_MS == 0 {
                    format!("{}h", ms / HOUR_MS)
                } else if ms % MINUTE_MS == 0 {
                    format!("{}m", ms / MINUTE_MS)
                } else if ms % 1_000 == 0 {
                    format!("{}s", ms / 1_000)
                } else {
                    format!("{}ms", ms)
                }
            }
        }
    }
}

impl std::fmt::Display for CandleInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.label())
    }
}

impl std::str::FromStr for CandleInterval {
    type Err = MarketDataError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for CandleInterval {
    type Error = MarketDataError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<CandleInterval> for String {
    fn from(interval: CandleInterval) -> Self {
        interval.label()
    }
}

/// Open/high/low/close summary
///
/// Fields are only written through `first`/`update`, which keep
/// `low <= open, close <= high` true after every trade. `open` never
/// changes once set. Decoding goes through the same check.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "OhlcFields")]
pub struct Ohlc {
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
    trade_count: u64,
}

impl Ohlc {
    /// Seed from the first trade of a window
    pub fn first(price: f64, quantity: f64) -> Self {
        Self {
            open: price,
            high: price,
            low: price,
            close: price,
            volume: quantity,
            trade_count: 1,
        }
    }

    /// Zero-volume bar carrying a previous close
    pub fn flat(close: f64) -> Self {
        Self {
            open: close,
            high: close,
            low: close,
            close,
            volume: 0.0,
            trade_count: 0,
        }
    }

    pub fn update(&mut self, price: f64, quantity: f64) {
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
        self.volume += quantity;
        self.trade_count += 1;
        debug_assert!(self.is_consistent(), "OHLC ordering violated: {:?}", self);
    }

    pub fn is_consistent(&self) -> bool {
        self.high >= self.open.max(self.close).max(self.low)
            && self.low <= self.open.min(self.close).min(self.high)
    }

    pub fn open(&self) -> f64 {
        self.open
    }

    pub fn high(&self) -> f64 {
        self.high
    }

    pub fn low(&self) -> f64 {
        self.low
    }

    pub fn close(&self) -> f64 {
        self.close
    }

    pub fn volume(&self) -> f64 {
        self.volume
    }

    pub fn trade_count(&self) -> u64 {
        self.trade_count
    }
}

/// Wire shape of [`Ohlc`] before validation
#[derive(Deserialize)]
struct OhlcFields {
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
    trade_count: u64,
}

impl TryFrom<OhlcFields> for Ohlc {
    type Error = MarketDataError;

    fn try_from(f: OhlcFields) -> Result<Self> {
        let ohlc = Ohlc {
            open: f.open,
            high: f.high,
            low: f.low,
            close: f.close,
            volume: f.volume,
            trade_count: f.trade_count,
        };
        let finite = [ohlc.open, ohlc.high, ohlc.low, ohlc.close, ohlc.volume]
            .iter()
            .all(|v| v.is_finite());
        if !finite || ohlc.volume < 0.0 || !ohlc.is_consistent() {
            return Err(MarketDataError::InvalidInput(format!(
                "inconsistent OHLC: open={} high={} low={} close={} volume={}",
                ohlc.open, ohlc.high, ohlc.low, ohlc.close, ohlc.volume
            )));
        }
        Ok(ohlc)
    }
}

impl Accumulator for Option<Ohlc> {
    type Item = TradePoint;

    fn open(_window_start: TimestampMs) -> Self {
        None
    }

    fn accumulate(&mut self, _timestamp: TimestampMs, trade: TradePoint) {
        match self {
            Some(ohlc) => ohlc.update(trade.price, trade.size),
            None => *self = Some(Ohlc::first(trade.price, trade.size)),
        }
    }

    fn is_empty(&self) -> bool {
        self.is_none()
    }
}

/// One OHLC bar for a symbol and interval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub interval: CandleInterval,
    pub window_start: TimestampMs,
    pub window_end: TimestampMs,
    #[serde(flatten)]
    pub ohlc: Ohlc,
}

impl Candle {
    pub fn with_price(symbol: &str, interval: CandleInterval, window_start: TimestampMs, price: f64, quantity: f64) -> Self {
        Self {
            symbol: symbol.to_string(),
            interval,
            window_start,
            window_end: window_start + interval.as_millis(),
            ohlc: Ohlc::first(price, quantity),
        }
    }

    pub fn update(&mut self, price: f64, quantity: f64) {
        self.ohlc.update(price, quantity);
    }

    pub fn is_closed(&self, now: TimestampMs) -> bool {
        now >= self.window_end
    }
}

/// Result of folding one trade into every interval
#[derive(Debug, Default)]
pub struct CandleUpdate {
    /// Candles closed by the trade, oldest first
    pub closed: Vec<Candle>,
    /// Intervals that refused the trade
    pub rejected: Vec<(CandleInterval, WindowError)>,
}

/// Builds candles per symbol and interval on tumbling windows
#[derive(Debug)]
pub struct CandleAggregator {
    intervals: Vec<CandleInterval>,
    history_limit: usize,
    emit_empty: bool,
    late_policy: LateEventPolicy,
    windows: HashMap<(String, CandleInterval), TumblingWindow<Option<Ohlc>>>,
    history: HashMap<(String, CandleInterval), VecDeque<Candle>>,
}

impl CandleAggregator {
    pub fn new(
        intervals: Vec<CandleInterval>,
        history_limit: usize,
        emit_empty: bool,
        late_policy: LateEventPolicy,
    ) -> Self {
        Self {
            intervals,
            history_limit,
            emit_empty,
            late_policy,
            windows: HashMap::new(),
            history: HashMap::new(),
        }
    }

    pub fn from_settings(settings: &WindowSettings) -> Result<Self> {
        let intervals = settings
            .candle_intervals
            .iter()
            .map(|s| CandleInterval::parse(s))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(
            intervals,
            settings.candle_history,
            settings.emit_empty_windows,
            settings.late_event_policy,
        ))
    }

    pub fn intervals(&self) -> &[CandleInterval] {
        &self.intervals
    }

    /// Test a trade against every open interval of `symbol` without applying it
    pub fn check_trade(&self, symbol: &str, timestamp: TimestampMs) -> std::result::Result<(), WindowError> {
        for interval in &self.intervals {
            if let Some(window) = self.windows.get(&(symbol.to_string(), *interval)) {
                window.check(timestamp)?;
            }
        }
        Ok(())
    }

    pub fn add_trade(&mut self, symbol: &str, trade: TradePoint) -> CandleUpdate {
        let mut update = CandleUpdate::default();

        for interval in self.intervals.clone() {
            let key = (symbol.to_string(), interval);
            if !self.windows.contains_key(&key) {
                match TumblingWindow::new(interval.as_millis() as u64, self.emit_empty, self.late_policy) {
                    Ok(window) => {
                        self.windows.insert(key.clone(), window);
                    }
                    Err(e) => {
                        update.rejected.push((interval, e));
                        continue;
                    }
                }
            }

            let result = match self.windows.get_mut(&key) {
                Some(window) => window.add(trade.timestamp, trade),
                None => continue,
            };

            match result {
                Ok(flushes) => {
                    for flush in flushes {
                        if let Some(candle) = self.record_close(symbol, interval, flush) {
                            update.closed.push(candle);
                        }
                    }
                }
                Err(e) => update.rejected.push((interval, e)),
            }
        }

        update
    }

    fn record_close(
        &mut self,
        symbol: &str,
        interval: CandleInterval,
        flush: WindowFlush<Option<Ohlc>>,
    ) -> Option<Candle> {
        let key = (symbol.to_string(), interval);
        let history = self.history.entry(key).or_default();

        let ohlc = match flush.state {
            Some(ohlc) => ohlc,
            None => {
                // Empty window: flat bar at the previous close, if there is one
                let previous = history.back()?;
                Ohlc::flat(previous.ohlc.close())
            }
        };

        let candle = Candle {
            symbol: symbol.to_string(),
            interval,
            window_start: flush.start,
            window_end: flush.end,
            ohlc,
        };

        history.push_back(candle.clone());
        while history.len() > self.history_limit {
            history.pop_front();
        }

        debug!(
            symbol,
            interval = %interval,
            window_start = candle.window_start,
            close = candle.ohlc.close(),
            "Candle closed"
        );
        Some(candle)
    }

    /// Close every candle whose window ended at or before `now`
    pub fn advance(&mut self, now: TimestampMs) -> Vec<Candle> {
        let mut keys: Vec<_> = self.windows.keys().cloned().collect();
        keys.sort();

        let mut closed = Vec::new();
        for (symbol, interval) in keys {
            let flushes = match self.windows.get_mut(&(symbol.clone(), interval)) {
                Some(window) => window.advance(now),
                None => continue,
            };
            for flush in flushes {
                if let Some(candle) = self.record_close(&symbol, interval, flush) {
                    closed.push(candle);
                }
            }
        }
        closed
    }

    /// Close every open candle (end of stream)
    pub fn flush_all(&mut self) -> Vec<Candle> {
        let mut keys: Vec<_> = self.windows.keys().cloned().collect();
        keys.sort();

        let mut closed = Vec::new();
        for (symbol, interval) in keys {
            let flush = self
                .windows
                .get_mut(&(symbol.clone(), interval))
                .and_then(|w| w.flush());
            if let Some(flush) = flush {
                if let Some(candle) = self.record_close(&symbol, interval, flush) {
                    closed.push(candle);
                }
            }
        }
        closed
    }

    /// The in-progress candle, if the current window has trades
    pub fn latest_candle(&self, symbol: &str, interval: CandleInterval) -> Option<Candle> {
        let window = self.windows.get(&(symbol.to_string(), interval))?;
        let start = window.current_start()?;
        let ohlc = (*window.current()?)?;
        Some(Candle {
            symbol: symbol.to_string(),
            interval,
            window_start: start,
            window_end: start + interval.as_millis(),
            ohlc,
        })
    }

    /// Closed candles followed by the in-progress one, newest `limit` (0 = all)
    pub fn get_candles(&self, symbol: &str, interval: CandleInterval, limit: usize) -> Vec<Candle> {
        let key = (symbol.to_string(), interval);
        let mut result: Vec<Candle> = self
            .history
            .get(&key)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default();

        if let Some(current) = self.latest_candle(symbol, interval) {
            result.push(current);
        }

        if limit > 0 && result.len() > limit {
            result.drain(..result.len() - limit);
        }
        result
    }

    pub fn candle_count(&self, symbol: &str, interval: CandleInterval) -> usize {
        self.history
            .get(&(symbol.to_string(), interval))
            .map(VecDeque::len)
            .unwrap_or(0)
    }
}

/// Rebuild candles from a batch of trades, independent of any live state
///
/// Trades may arrive in any order; they are bucketed by event time.
pub fn rebuild_candles(symbol: &str, interval: CandleInterval, trades: &[TradePoint]) -> Vec<Candle> {
    let size = interval.as_millis();
    if size <= 0 {
        return Vec::new();
    }

    let mut sorted = trades.to_vec();
    sorted.sort_by_key(|t| t.timestamp);

    let mut candles: Vec<Candle> = Vec::new();
    for trade in sorted {
        let start = align_down(trade.timestamp, size);
        match candles.last_mut() {
            Some(candle) if candle.window_start == start => candle.update(trade.price, trade.size),
            _ => candles.push(Candle::with_price(symbol, interval, start, trade.price, trade.size)),
        }
    }
    candles
}
