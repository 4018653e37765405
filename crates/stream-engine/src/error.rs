//! Engine-level error type
//!
//! Component errors are folded into this enum at the engine boundary so
//! callers match on one taxonomy.

use compute::ComputeError;
use market_data::{MarketDataError, WindowError};
use risk_engine::RiskError;
use storage::StorageError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Raw input was rejected at ingest
    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    /// A window refused the event; nothing was applied or published
    #[error(transparent)]
    Window(#[from] WindowError),

    #[error(transparent)]
    MarketData(MarketDataError),

    #[error(transparent)]
    Risk(#[from] RiskError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Compute(#[from] ComputeError),
}

impl From<MarketDataError> for EngineError {
    fn from(err: MarketDataError) -> Self {
        match err {
            MarketDataError::MalformedEvent(msg) => Self::MalformedEvent(msg),
            MarketDataError::Window(e) => Self::Window(e),
            other => Self::MarketData(other),
        }
    }
}

// Topic parsing is the only place the engine meets the common error type
impl From<common::Error> for EngineError {
    fn from(err: common::Error) -> Self {
        match err {
            common::Error::InvalidTopic(msg) => Self::InvalidTopic(msg),
            other => Self::InvalidTopic(other.to_string()),
        }
    }
}

impl EngineError {
    /// Short label for metrics
    pub fn reason(&self) -> &'static str {
        match self {
            Self::MalformedEvent(_) => "malformed",
            Self::InvalidConfig(_) => "invalid_config",
            Self::InvalidTopic(_) => "invalid_topic",
            Self::Window(e) => e.reason(),
            Self::MarketData(_) => "market_data",
            Self::Risk(_) => "risk",
            Self::Storage(_) => "storage",
            Self::Compute(_) => "compute",
        }
    }
}
