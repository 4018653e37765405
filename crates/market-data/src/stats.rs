//! Summaries of sliding and session windows

use common::TimestampMs;
use serde::{Deserialize, Serialize};

use crate::candles::Ohlc;
use crate::types::TradePoint;
use crate::windows::WindowFlush;

/// Rolling statistics over a sliding window, published on `stats:<symbol>`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollingStats {
    pub symbol: String,
    pub window_start: TimestampMs,
    pub window_end: TimestampMs,
    pub trade_count: usize,
    pub volume: f64,
    pub vwap: Option<f64>,
    pub high: f64,
    pub low: f64,
}

impl RollingStats {
    /// `None` for an empty member set
    pub fn from_flush(symbol: &str, flush: &WindowFlush<Vec<(TimestampMs, TradePoint)>>) -> Option<Self> {
        let mut members = flush.state.iter().map(|(_, t)| t);
        let first = members.next()?;

        let mut stats = Self {
            symbol: symbol.to_string(),
            window_start: flush.start,
            window_end: flush.end,
            trade_count: 1,
            volume: first.size,
            vwap: None,
            high: first.price,
            low: first.price,
        };
        let mut notional = first.price * first.size;

        for trade in members {
            stats.trade_count += 1;
            stats.volume += trade.size;
            stats.high = stats.high.max(trade.price);
            stats.low = stats.low.min(trade.price);
            notional += trade.price * trade.size;
        }
        if stats.volume > 0.0 {
            stats.vwap = Some(notional / stats.volume);
        }
        Some(stats)
    }
}

/// One closed activity session, published on `session:<symbol>`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub symbol: String,
    pub start: TimestampMs,
    /// Last activity plus the inactivity gap
    pub end: TimestampMs,
    pub last_activity: TimestampMs,
    #[serde(flatten)]
    pub ohlc: Ohlc,
}

impl SessionSummary {
    pub fn from_flush(symbol: &str, flush: &WindowFlush<Vec<(TimestampMs, TradePoint)>>) -> Option<Self> {
        let mut trades = flush.state.iter();
        let (_, first) = trades.next()?;
        let mut ohlc = Ohlc::first(first.price, first.size);
        let mut last_activity = first.timestamp;
        for (ts, trade) in trades {
            ohlc.update(trade.price, trade.size);
            last_activity = *ts;
        }
        Some(Self {
            symbol: symbol.to_string(),
            start: flush.start,
            end: flush.end,
            last_activity,
            ohlc,
        })
    }
}
