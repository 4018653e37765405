use std::collections::BTreeMap;

use common::{PositionSide, TimestampMs};
use market_data::{Greeks, OptionType};
use serde::{Deserialize, Serialize};

use crate::error::RiskError;
use crate::Result;

fn default_multiplier() -> f64 {
    1.0
}

/// Option terms carried by a derivative position
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OptionContract {
    pub underlying: String,
    pub strike: f64,
    /// Expiration, epoch ms
    pub expiration: TimestampMs,
    pub option_type: OptionType,
    /// Falls back to the configured default when absent
    #[serde(default)]
    pub volatility: Option<f64>,
}

/// A position supplied by the caller; the engine only reads it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub id: String,
    pub symbol: String,
    pub quantity: f64,
    pub entry_price: f64,
    pub side: PositionSide,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default)]
    pub option: Option<OptionContract>,
}

impl Position {
    pub fn new(id: &str, symbol: &str, side: PositionSide, quantity: f64, entry_price: f64) -> Self {
        Self {
            id: id.to_string(),
            symbol: common::normalize_symbol(symbol),
            quantity,
            entry_price,
            side,
            multiplier: 1.0,
            option: None,
        }
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_option(mut self, mut contract: OptionContract) -> Self {
        contract.underlying = common::normalize_symbol(&contract.underlying);
        self.option = Some(contract);
        self
    }

    /// `quantity * multiplier * side sign`, the factor applied to per-unit figures
    pub fn scale(&self) -> f64 {
        self.quantity * self.multiplier * self.side.sign()
    }

    pub fn unrealized_pnl(&self, current_price: f64) -> f64 {
        (current_price - self.entry_price) * self.scale()
    }

    /// Symbol whose price drives this position's Greeks
    pub fn risk_symbol(&self) -> &str {
        match &self.option {
            Some(contract) => &contract.underlying,
            None => &self.symbol,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| -> Result<()> {
            Err(RiskError::InvalidPosition(format!("{}: {reason}", self.id)))
        };

        if self.id.trim().is_empty() {
            return Err(RiskError::InvalidPosition("empty position id".to_string()));
        }
        if self.symbol.trim().is_empty() {
            return invalid("empty symbol");
        }
        if !self.quantity.is_finite() || self.quantity < 0.0 {
            return invalid("quantity must be a non-negative number");
        }
        if !self.entry_price.is_finite() || self.entry_price < 0.0 {
            return invalid("entry price must be a non-negative number");
        }
        if !self.multiplier.is_finite() || self.multiplier <= 0.0 {
            return invalid("multiplier must be positive");
        }
        if let Some(contract) = &self.option {
            if contract.underlying.trim().is_empty() {
                return invalid("option without underlying");
            }
            if !contract.strike.is_finite() || contract.strike <= 0.0 {
                return invalid("strike must be positive");
            }
            if let Some(vol) = contract.volatility {
                if !vol.is_finite() || vol <= 0.0 {
                    return invalid("volatility must be positive");
                }
            }
        }
        Ok(())
    }
}

/// Unrealized P&L of one position at the latest price
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PositionPnl {
    pub position_id: String,
    pub symbol: String,
    pub side: PositionSide,
    pub quantity: f64,
    pub entry_price: f64,
    pub current_price: f64,
    pub unrealized_pnl: f64,
    pub timestamp: TimestampMs,
}

/// Greeks of one position
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PositionRisk {
    pub position_id: String,
    pub symbol: String,
    pub per_unit: Greeks,
    /// `per_unit` multiplied by the position scale
    pub scaled: Greeks,
    pub as_of: TimestampMs,
}

/// Portfolio-level sensitivities, already scaled and summed
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PortfolioGreeks {
    pub delta: f64,
    pub gamma: f64,
    pub vega: f64,
    pub theta: f64,
    pub rho: f64,
    /// Delta netted per risk symbol
    pub delta_by_underlying: BTreeMap<String, f64>,
    pub positions: usize,
    /// Positions left out because a required price is unknown
    pub unpriced: Vec<String>,
    pub as_of: TimestampMs,
}

impl PortfolioGreeks {
    /// Net directional exposure across the whole book
    pub fn net_delta(&self) -> f64 {
        self.delta
    }

    pub fn totals(&self) -> Greeks {
        Greeks {
            delta: self.delta,
            gamma: self.gamma,
            vega: self.vega,
            theta: self.theta,
            rho: self.rho,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_unrealized_pnl_by_side() {
        let long = Position::new("p1", "AAPL", PositionSide::Long, 10.0, 150.0).with_multiplier(100.0);
        assert!((long.unrealized_pnl(155.0) - 5000.0).abs() < 1e-9);

        let short = Position::new("p2", "AAPL", PositionSide::Short, 10.0, 150.0).with_multiplier(100.0);
        assert!((short.unrealized_pnl(155.0) + 5000.0).abs() < 1e-9);
    }

    #[test]
    fn test_risk_symbol_uses_underlying_for_options() {
        let stock = Position::new("s", "aapl", PositionSide::Long, 1.0, 1.0);
        assert_eq!(stock.risk_symbol(), "AAPL");

        let option = Position::new("o", "AAPL240621C00150000", PositionSide::Long, 1.0, 5.0).with_option(
            OptionContract {
                underlying: "aapl".to_string(),
                strike: 150.0,
                expiration: 0,
                option_type: OptionType::Call,
                volatility: None,
            },
        );
        assert_eq!(option.risk_symbol(), "AAPL");
    }

    #[test]
    fn test_validation() {
        let ok = Position::new("p", "AAPL", PositionSide::Long, 1.0, 10.0);
        assert!(ok.validate().is_ok());

        let negative = Position::new("p", "AAPL", PositionSide::Long, -1.0, 10.0);
        assert_matches!(negative.validate(), Err(RiskError::InvalidPosition(_)));

        let zero_mult = ok.clone().with_multiplier(0.0);
        assert_matches!(zero_mult.validate(), Err(RiskError::InvalidPosition(_)));

        let bad_strike = ok.with_option(OptionContract {
            underlying: "AAPL".to_string(),
            strike: 0.0,
            expiration: 0,
            option_type: OptionType::Put,
            volatility: None,
        });
        assert_matches!(bad_strike.validate(), Err(RiskError::InvalidPosition(_)));
    }

    #[test]
    fn test_position_json_defaults() {
        let json = r#"{"id":"p1","symbol":"AAPL","quantity":5,"entry_price":100.0,"side":"short"}"#;
        let pos: Position = serde_json::from_str(json).unwrap();
        assert_eq!(pos.multiplier, 1.0);
        assert_eq!(pos.side, PositionSide::Short);
        assert!(pos.option.is_none());
    }
}
