//! Risk engine error types

use thiserror::Error;

/// Errors that can occur during risk calculations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RiskError {
    /// Position failed validation
    #[error("Invalid position: {0}")]
    InvalidPosition(String),

    /// No position with this id is tracked
    #[error("Unknown position: {0}")]
    UnknownPosition(String),

    /// A price needed for the calculation has not been observed yet
    #[error("No price for {0}")]
    MissingPrice(String),

    /// The position feed could not deliver positions
    #[error("Position feed error: {0}")]
    Feed(String),
}
