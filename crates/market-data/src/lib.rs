//! Market data stream processing
//!
//! Everything on the ingestion path of the engine lives here.
//!
//! # Core Components
//!
//! - [`normalizer`] - raw feed records to canonical trades/quotes/options
//! - [`dispatcher`] - per-topic ordered publish/subscribe
//! - [`windows`] - tumbling, sliding and session windows
//! - [`vwap`], [`candles`], [`indicators`], [`stats`] - incremental aggregates
//! - [`black_scholes`] - option pricing and Greeks
//!
//! # Key Invariants
//!
//! - Events are immutable once published
//! - Within a topic, sequence numbers strictly increase
//! - A candle's low never exceeds its open/close and its high never falls below them
//! - Indicators report nothing rather than a guess until warmed up

pub mod black_scholes;
pub mod candles;
pub mod dispatcher;
pub mod error;
pub mod indicators;
pub mod normalizer;
pub mod stats;
pub mod types;
pub mod vwap;
pub mod windows;

pub use candles::{rebuild_candles, Candle, CandleAggregator, CandleInterval, Ohlc};
pub use dispatcher::{EventDispatcher, Handler};
pub use error::MarketDataError;
pub use indicators::{Bollinger, BollingerBands, Ema, Indicator, IndicatorSet, IndicatorSnapshot, Sma};
pub use normalizer::{NormalizedRecord, Normalizer};
pub use stats::{RollingStats, SessionSummary};
pub use types::{
    BSInputs, Greeks, Moneyness, NormalizedOption, NormalizedQuote, NormalizedTrade, OptionType,
    RawRecord, RawTimestamp, RecordKind, SymbolMeta, TradePoint,
};
pub use vwap::{VwapState, VwapUpdate};
pub use windows::{SessionWindow, SlidingWindow, TumblingWindow, WindowError, WindowFlush, WindowKind};

pub type Result<T> = std::result::Result<T, MarketDataError>;
