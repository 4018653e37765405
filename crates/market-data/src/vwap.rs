//! Volume-weighted average price

use common::TimestampMs;
use serde::{Deserialize, Serialize};

use crate::error::MarketDataError;
use crate::Result;

/// Running VWAP accumulator
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VwapState {
    cumulative_notional: f64,
    cumulative_volume: f64,
}

impl VwapState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold in one trade and return the updated VWAP
    ///
    /// Invalid input resets the accumulator and is reported as an error.
    pub fn update(&mut self, price: f64, volume: f64) -> Result<Option<f64>> {
        if !price.is_finite() || !volume.is_finite() || price < 0.0 || volume < 0.0 {
            self.reset();
            return Err(MarketDataError::InvalidInput(format!(
                "vwap cannot fold price={} volume={}",
                price, volume
            )));
        }

        self.cumulative_notional += price * volume;
        self.cumulative_volume += volume;
        Ok(self.value())
    }

    /// `None` while no volume has traded
    pub fn value(&self) -> Option<f64> {
        if self.cumulative_volume > 0.0 {
            Some(self.cumulative_notional / self.cumulative_volume)
        } else {
            None
        }
    }

    pub fn cumulative_notional(&self) -> f64 {
        self.cumulative_notional
    }

    pub fn cumulative_volume(&self) -> f64 {
        self.cumulative_volume
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Payload published on `vwap:<symbol>` after every trade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VwapUpdate {
    pub symbol: String,
    pub vwap: f64,
    pub cumulative_notional: f64,
    pub cumulative_volume: f64,
    pub timestamp: TimestampMs,
}
