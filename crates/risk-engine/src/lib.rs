//! Derived risk for the stream engine
//!
//! Combines prices observed on the stream with externally owned positions to
//! produce per-position unrealized P&L and portfolio Greeks.
//!
//! Greeks are reported per unit and, once aggregated, pre-scaled by
//! `quantity * multiplier * side sign`.

pub mod engine;
pub mod error;
pub mod feed;
pub mod greeks;
pub mod types;

pub use engine::RiskEngine;
pub use error::RiskError;
pub use feed::{PositionFeed, StaticPositionFeed};
pub use greeks::{compute_portfolio_greeks, per_unit_greeks, RiskInputs};
pub use types::{OptionContract, PortfolioGreeks, Position, PositionPnl, PositionRisk};

/// Result type for risk operations
pub type Result<T> = std::result::Result<T, RiskError>;
