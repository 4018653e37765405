//! Market data error types

use thiserror::Error;

/// Errors raised while normalizing and aggregating market data
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MarketDataError {
    /// Raw record is invalid or incomplete
    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    /// Unknown or unparsable candle interval
    #[error("Invalid interval: {0}")]
    InvalidInterval(String),

    /// Calculator received a value it cannot fold in; the calculator was reset
    #[error("Invalid calculator input: {0}")]
    InvalidInput(String),

    /// Windowed item was rejected
    #[error(transparent)]
    Window(#[from] crate::windows::WindowError),
}

impl MarketDataError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedEvent(msg.into())
    }
}
