//! Real-time market data aggregation engine
//!
//! Raw trades, quotes and option quotes go in; normalized events and derived
//! analytics (candles, VWAP, indicators, rolling statistics, sessions,
//! position P&L and portfolio Greeks) come out on named topics.
//!
//! # Topics
//!
//! | Topic | Payload |
//! |---|---|
//! | `trade:<symbol>`, `quote:<symbol>`, `option:<symbol>` | normalized input |
//! | `candle:<tf>:<symbol>`, `indicators:<tf>:<symbol>` | closed bars and indicators |
//! | `vwap:<symbol>`, `stats:<symbol>`, `session:<symbol>` | running aggregates |
//! | `pl:<position>`, `greeks:portfolio` | risk |
//!
//! # Example
//!
//! ```ignore
//! let engine = StreamEngine::new(config)?;
//! engine.subscribe("candle:*", |event| {
//!     println!("{}", event.topic);
//!     Ok(())
//! })?;
//! engine.ingest(&RawRecord::trade("AAPL", 101.0, 10.0, ts))?;
//! engine.finish();
//! ```

pub mod clock;
pub mod engine;
pub mod error;
pub mod jobs;
pub mod payload;
pub mod pipeline;

pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{EngineEvent, StreamEngine, StreamEngineBuilder};
pub use error::EngineError;
pub use jobs::{EngineJob, JobOutput};
pub use payload::EventPayload;

pub type Result<T> = std::result::Result<T, EngineError>;
