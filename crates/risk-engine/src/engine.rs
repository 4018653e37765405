//! Position book and derived risk state

use std::collections::HashMap;

use common::TimestampMs;
use config::RiskSettings;
use tracing::{debug, info};

use crate::error::RiskError;
use crate::greeks::{compute_portfolio_greeks, position_risk, RiskInputs};
use crate::types::{PortfolioGreeks, Position, PositionPnl, PositionRisk};
use crate::Result;

struct CachedGreeks {
    version: u64,
    value: PortfolioGreeks,
}

/// Tracks positions and prices and derives P&L and Greeks from them
///
/// Every change to a position or a price bumps an input version. Portfolio
/// Greeks are cached against that version and the valuation time, so a
/// cached value is only served while nothing it depends on has moved.
pub struct RiskEngine {
    positions: HashMap<String, Position>,
    inputs: RiskInputs,
    price_times: HashMap<String, TimestampMs>,
    version: u64,
    cache: Option<CachedGreeks>,
}

impl RiskEngine {
    pub fn new(settings: &RiskSettings) -> Self {
        Self {
            positions: HashMap::new(),
            inputs: RiskInputs::from_settings(settings),
            price_times: HashMap::new(),
            version: 0,
            cache: None,
        }
    }

    fn invalidate(&mut self) {
        self.version += 1;
        self.cache = None;
    }

    /// Add or replace a position
    pub fn upsert_position(&mut self, mut position: Position) -> Result<()> {
        position.symbol = common::normalize_symbol(&position.symbol);
        if let Some(contract) = position.option.as_mut() {
            contract.underlying = common::normalize_symbol(&contract.underlying);
        }
        position.validate()?;

        if self.positions.get(&position.id) == Some(&position) {
            return Ok(());
        }
        debug!(
            position_id = %position.id,
            symbol = %position.symbol,
            quantity = position.quantity,
            side = %position.side,
            "Position updated"
        );
        self.positions.insert(position.id.clone(), position);
        self.invalidate();
        Ok(())
    }

    pub fn remove_position(&mut self, id: &str) -> Option<Position> {
        let removed = self.positions.remove(id);
        if removed.is_some() {
            debug!(position_id = id, "Position removed");
            self.invalidate();
        }
        removed
    }

    /// Replace the whole book, e.g. from a position feed snapshot
    ///
    /// Nothing changes unless every position is valid.
    pub fn sync_positions(&mut self, positions: Vec<Position>) -> Result<usize> {
        let mut staged = Self {
            positions: HashMap::new(),
            inputs: RiskInputs::default(),
            price_times: HashMap::new(),
            version: 0,
            cache: None,
        };
        for position in positions {
            staged.upsert_position(position)?;
        }
        let count = staged.positions.len();
        self.positions = staged.positions;
        self.invalidate();
        info!(positions = count, "Position book synchronized");
        Ok(count)
    }

    pub fn position(&self, id: &str) -> Option<&Position> {
        self.positions.get(id)
    }

    /// Positions ordered by id
    pub fn positions(&self) -> Vec<&Position> {
        let mut positions: Vec<&Position> = self.positions.values().collect();
        positions.sort_by(|a, b| a.id.cmp(&b.id));
        positions
    }

    pub fn position_count(&self) -> usize {
        self.positions.len()
    }

    /// Record the latest price of `symbol`
    ///
    /// Returns the ids of positions whose valuation depends on it, ordered
    /// by id.
    pub fn update_price(&mut self, symbol: &str, price: f64, timestamp: TimestampMs) -> Vec<String> {
        let symbol = common::normalize_symbol(symbol);
        if !price.is_finite() || price <= 0.0 {
            return Vec::new();
        }

        if self.inputs.price(&symbol) != Some(price) {
            self.inputs.prices.insert(symbol.clone(), price);
            self.invalidate();
        }
        self.price_times.insert(symbol.clone(), timestamp);

        let mut affected: Vec<String> = self
            .positions
            .values()
            .filter(|p| p.symbol == symbol || p.risk_symbol() == symbol)
            .map(|p| p.id.clone())
            .collect();
        affected.sort();
        affected
    }

    pub fn price(&self, symbol: &str) -> Option<f64> {
        self.inputs.price(symbol)
    }

    /// Record the volatility implied by an option quote
    ///
    /// Returns the option positions on `symbol` whose Greeks now use it,
    /// ordered by id. Contracts with their own volatility are unaffected.
    pub fn update_implied_vol(&mut self, symbol: &str, vol: f64) -> Vec<String> {
        let symbol = common::normalize_symbol(symbol);
        if !vol.is_finite() || vol <= 0.0 {
            return Vec::new();
        }

        if self.inputs.implied_vols.get(&symbol) != Some(&vol) {
            self.inputs.implied_vols.insert(symbol.clone(), vol);
            self.invalidate();
        }

        let mut affected: Vec<String> = self
            .positions
            .values()
            .filter(|p| p.symbol == symbol && p.option.as_ref().is_some_and(|c| c.volatility.is_none()))
            .map(|p| p.id.clone())
            .collect();
        affected.sort();
        affected
    }

    /// Unrealized P&L at the latest price of the position's own symbol
    pub fn position_pnl(&self, id: &str) -> Result<PositionPnl> {
        let position = self
            .positions
            .get(id)
            .ok_or_else(|| RiskError::UnknownPosition(id.to_string()))?;
        let current_price = self
            .inputs
            .price(&position.symbol)
            .ok_or_else(|| RiskError::MissingPrice(position.symbol.clone()))?;

        Ok(PositionPnl {
            position_id: position.id.clone(),
            symbol: position.symbol.clone(),
            side: position.side,
            quantity: position.quantity,
            entry_price: position.entry_price,
            current_price,
            unrealized_pnl: position.unrealized_pnl(current_price),
            timestamp: self.price_times.get(&position.symbol).copied().unwrap_or_default(),
        })
    }

    /// Sum of unrealized P&L over every position with a known price
    pub fn total_unrealized_pnl(&self) -> f64 {
        self.positions
            .keys()
            .filter_map(|id| self.position_pnl(id).ok())
            .map(|pnl| pnl.unrealized_pnl)
            .sum()
    }

    pub fn position_greeks(&self, id: &str, now: TimestampMs) -> Result<PositionRisk> {
        let position = self
            .positions
            .get(id)
            .ok_or_else(|| RiskError::UnknownPosition(id.to_string()))?;
        position_risk(position, &self.inputs, now)
    }

    /// Portfolio Greeks valued at `now`
    pub fn portfolio_greeks(&mut self, now: TimestampMs) -> PortfolioGreeks {
        if let Some(cached) = &self.cache {
            if cached.version == self.version && cached.value.as_of == now {
                return cached.value.clone();
            }
        }

        let value = compute_portfolio_greeks(self.positions.values(), &self.inputs, now);
        self.cache = Some(CachedGreeks {
            version: self.version,
            value: value.clone(),
        });
        value
    }

    /// Owned copy of the book and prices, for running a batch elsewhere
    pub fn snapshot(&self) -> (Vec<Position>, RiskInputs) {
        (self.positions().into_iter().cloned().collect(), self.inputs.clone())
    }

    /// Incremented on every input change
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn has_cached_greeks(&self) -> bool {
        self.cache.is_some()
    }
}
