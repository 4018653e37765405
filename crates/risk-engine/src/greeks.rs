//! Per-position and portfolio Greeks
//!
//! Everything here is a pure function of its inputs so the same code runs
//! inline and on a compute worker.

use std::collections::HashMap;

use common::TimestampMs;
use market_data::black_scholes::{black_scholes_greeks, years_to_expiry};
use market_data::{BSInputs, Greeks};
use serde::{Deserialize, Serialize};

use crate::error::RiskError;
use crate::types::{PortfolioGreeks, Position, PositionRisk};
use crate::Result;

/// Market inputs for a Greeks calculation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiskInputs {
    /// Latest price per normalized symbol
    pub prices: HashMap<String, f64>,
    pub risk_free_rate: f64,
    pub default_volatility: f64,
    /// Volatility implied by the latest option quote, per option symbol
    #[serde(default)]
    pub implied_vols: HashMap<String, f64>,
}

impl RiskInputs {
    pub fn from_settings(settings: &config::RiskSettings) -> Self {
        Self {
            prices: HashMap::new(),
            risk_free_rate: settings.risk_free_rate,
            default_volatility: settings.default_volatility,
            implied_vols: HashMap::new(),
        }
    }

    pub fn price(&self, symbol: &str) -> Option<f64> {
        self.prices.get(symbol).copied()
    }

    /// Contract volatility, else the market's implied one, else the default
    pub fn volatility(&self, position: &Position, configured: Option<f64>) -> f64 {
        configured
            .or_else(|| self.implied_vols.get(&position.symbol).copied())
            .unwrap_or(self.default_volatility)
    }
}

/// Greeks for one unit of the position's instrument
///
/// A plain (non-option) position moves one-for-one with its own price, so it
/// has delta 1 and no other sensitivity.
pub fn per_unit_greeks(position: &Position, inputs: &RiskInputs, now: TimestampMs) -> Result<Greeks> {
    let Some(contract) = &position.option else {
        return Ok(Greeks {
            delta: 1.0,
            ..Greeks::zero()
        });
    };

    let spot = inputs
        .price(&contract.underlying)
        .ok_or_else(|| RiskError::MissingPrice(contract.underlying.clone()))?;

    Ok(black_scholes_greeks(BSInputs {
        spot,
        strike: contract.strike,
        time: years_to_expiry(contract.expiration, now),
        vol: inputs.volatility(position, contract.volatility),
        rate: inputs.risk_free_rate,
        option_type: contract.option_type,
    }))
}

pub fn position_risk(position: &Position, inputs: &RiskInputs, now: TimestampMs) -> Result<PositionRisk> {
    let per_unit = per_unit_greeks(position, inputs, now)?;
    Ok(PositionRisk {
        position_id: position.id.clone(),
        symbol: position.symbol.clone(),
        per_unit,
        scaled: per_unit.scale(position.scale()),
        as_of: now,
    })
}

/// Sum of scaled Greeks over `positions`
///
/// Positions whose underlying has no price yet are listed in
/// [`PortfolioGreeks::unpriced`] and contribute nothing.
pub fn compute_portfolio_greeks<'a>(
    positions: impl IntoIterator<Item = &'a Position>,
    inputs: &RiskInputs,
    now: TimestampMs,
) -> PortfolioGreeks {
    let mut portfolio = PortfolioGreeks {
        as_of: now,
        ..PortfolioGreeks::default()
    };
    let mut totals = Greeks::zero();

    for position in positions {
        match position_risk(position, inputs, now) {
            Ok(risk) => {
                totals = totals.add(&risk.scaled);
                *portfolio
                    .delta_by_underlying
                    .entry(position.risk_symbol().to_string())
                    .or_insert(0.0) += risk.scaled.delta;
                portfolio.positions += 1;
            }
            Err(_) => portfolio.unpriced.push(position.id.clone()),
        }
    }

    portfolio.delta = totals.delta;
    portfolio.gamma = totals.gamma;
    portfolio.vega = totals.vega;
    portfolio.theta = totals.theta;
    portfolio.rho = totals.rho;
    portfolio.unpriced.sort();
    portfolio
}
