//! Raw record normalization
//!
//! Turns heterogeneous feed records into canonical trades, quotes and
//! option quotes. Derived fields (`mid`, `spread`, intrinsic value,
//! moneyness, implied volatility) are always recomputed here and never
//! taken from the input.
//!
//! `normalize` does not change the normalizer; the caller hands accepted
//! records back through `observe` so a record rejected further down the
//! line never moves the tracked underlying prices.

use std::collections::HashMap;

use common::{normalize_symbol, TimestampMs};
use config::NormalizerSettings;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::black_scholes::{implied_volatility, intrinsic_value, years_to_expiry};
use crate::error::MarketDataError;
use crate::types::{
    BSInputs, Moneyness, NormalizedOption, NormalizedQuote, NormalizedTrade, OptionType,
    RawRecord, RecordKind, SymbolMeta,
};
use crate::Result;

/// Output of the normalizer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum NormalizedRecord {
    Trade(NormalizedTrade),
    Quote(NormalizedQuote),
    Option(NormalizedOption),
}

impl NormalizedRecord {
    pub fn symbol(&self) -> &str {
        match self {
            NormalizedRecord::Trade(t) => &t.symbol,
            NormalizedRecord::Quote(q) => &q.symbol,
            NormalizedRecord::Option(o) => &o.symbol,
        }
    }

    pub fn timestamp(&self) -> TimestampMs {
        match self {
            NormalizedRecord::Trade(t) => t.timestamp,
            NormalizedRecord::Quote(q) => q.timestamp,
            NormalizedRecord::Option(o) => o.timestamp,
        }
    }

    pub fn kind(&self) -> RecordKind {
        match self {
            NormalizedRecord::Trade(_) => RecordKind::Trade,
            NormalizedRecord::Quote(_) => RecordKind::Quote,
            NormalizedRecord::Option(_) => RecordKind::Option,
        }
    }
}

/// Classify a strike against the underlying price
///
/// Within `atm_threshold` (relative to strike) is at-the-money.
pub fn classify_moneyness(
    underlying_price: f64,
    strike: f64,
    option_type: OptionType,
    atm_threshold: f64,
) -> Moneyness {
    if strike > 0.0 && ((underlying_price - strike) / strike).abs() <= atm_threshold {
        return Moneyness::AtTheMoney;
    }
    let in_the_money = match option_type {
        OptionType::Call => underlying_price > strike,
        OptionType::Put => underlying_price < strike,
    };
    if in_the_money {
        Moneyness::InTheMoney
    } else {
        Moneyness::OutOfTheMoney
    }
}

/// Stateful normalizer: symbol metadata plus last known underlying prices
#[derive(Debug, Clone)]
pub struct Normalizer {
    atm_threshold: f64,
    default_multiplier: f64,
    /// Rate used when solving for implied volatility
    risk_free_rate: f64,
    symbols: HashMap<String, SymbolMeta>,
    underlying_prices: HashMap<String, f64>,
}

impl Normalizer {
    pub fn new(settings: &NormalizerSettings) -> Self {
        Self {
            atm_threshold: settings.atm_threshold,
            default_multiplier: settings.default_multiplier,
            risk_free_rate: 0.0,
            symbols: HashMap::new(),
            underlying_prices: HashMap::new(),
        }
    }

    pub fn with_risk_free_rate(mut self, rate: f64) -> Self {
        self.risk_free_rate = rate;
        self
    }

    pub fn register_symbol(&mut self, mut meta: SymbolMeta) {
        meta.symbol = normalize_symbol(&meta.symbol);
        meta.underlying = meta.underlying.as_deref().map(normalize_symbol);
        debug!(symbol = %meta.symbol, multiplier = meta.multiplier, "Registered symbol metadata");
        self.symbols.insert(meta.symbol.clone(), meta);
    }

    pub fn symbol_meta(&self, symbol: &str) -> Option<&SymbolMeta> {
        self.symbols.get(symbol)
    }

    /// Registered multiplier, else the configured default
    pub fn multiplier(&self, symbol: &str) -> f64 {
        self.symbols
            .get(symbol)
            .map(|m| m.multiplier)
            .unwrap_or(self.default_multiplier)
    }

    pub fn underlying_price(&self, symbol: &str) -> Option<f64> {
        self.underlying_prices.get(symbol).copied()
    }

    pub fn set_underlying_price(&mut self, symbol: &str, price: f64) {
        self.underlying_prices.insert(normalize_symbol(symbol), price);
    }

    /// Normalize one raw record
    ///
    /// `received_at` stands in for a missing timestamp.
    pub fn normalize(&self, raw: &RawRecord, received_at: TimestampMs) -> Result<NormalizedRecord> {
        let symbol = raw
            .symbol
            .as_deref()
            .map(normalize_symbol)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| MarketDataError::malformed("missing symbol"))?;

        let timestamp = match &raw.timestamp {
            Some(ts) => ts.to_millis().ok_or_else(|| {
                MarketDataError::malformed(format!("{}: unparsable timestamp {:?}", symbol, ts))
            })?,
            None => received_at,
        };
        if timestamp < 0 {
            return Err(MarketDataError::malformed(format!(
                "{}: negative timestamp {}",
                symbol, timestamp
            )));
        }

        let record = match classify(raw)? {
            RecordKind::Trade => NormalizedRecord::Trade(self.trade(raw, symbol, timestamp)?),
            RecordKind::Quote => NormalizedRecord::Quote(self.quote(raw, symbol, timestamp)?),
            RecordKind::Option => NormalizedRecord::Option(self.option(raw, symbol, timestamp)?),
        };
        Ok(record)
    }

    /// Track the prices an accepted record carries
    ///
    /// Trades set the last price of their symbol; quotes that are two-sided
    /// and not inverted set their mid.
    pub fn observe(&mut self, record: &NormalizedRecord) {
        match record {
            NormalizedRecord::Trade(t) => {
                self.underlying_prices.insert(t.symbol.clone(), t.price);
            }
            NormalizedRecord::Quote(q) if !q.inverted && q.bid > 0.0 && q.ask > 0.0 => {
                self.underlying_prices.insert(q.symbol.clone(), q.mid);
            }
            _ => {}
        }
    }

    fn trade(&self, raw: &RawRecord, symbol: String, timestamp: TimestampMs) -> Result<NormalizedTrade> {
        let price = number(&symbol, "price", raw.price)?
            .filter(|p| *p > 0.0)
            .ok_or_else(|| MarketDataError::malformed(format!("{}: trade without a positive price", symbol)))?;
        let size = number(&symbol, "size", raw.size)?.unwrap_or(0.0);

        Ok(NormalizedTrade {
            symbol,
            price,
            size,
            timestamp,
        })
    }

    fn quote(&self, raw: &RawRecord, symbol: String, timestamp: TimestampMs) -> Result<NormalizedQuote> {
        let bid = number(&symbol, "bid", raw.bid)?;
        let ask = number(&symbol, "ask", raw.ask)?;
        if bid.is_none() && ask.is_none() {
            return Err(MarketDataError::malformed(format!("{}: quote without bid or ask", symbol)));
        }
        let bid = bid.unwrap_or(0.0);
        let ask = ask.unwrap_or(0.0);

        let mid = (bid + ask) / 2.0;
        let spread = ask - bid;
        let spread_pct = (mid > 0.0).then(|| spread / mid * 100.0);
        let inverted = bid > 0.0 && ask > 0.0 && ask < bid;

        if inverted {
            warn!(symbol = %symbol, bid, ask, "Inverted quote");
        }

        Ok(NormalizedQuote {
            bid_size: number(&symbol, "bidSize", raw.bid_size)?.unwrap_or(0.0),
            ask_size: number(&symbol, "askSize", raw.ask_size)?.unwrap_or(0.0),
            last: number(&symbol, "last", raw.last)?,
            symbol,
            bid,
            ask,
            mid,
            spread,
            spread_pct,
            timestamp,
            inverted,
        })
    }

    fn option(&self, raw: &RawRecord, symbol: String, timestamp: TimestampMs) -> Result<NormalizedOption> {
        let strike = number(&symbol, "strike", raw.strike)?
            .filter(|k| *k > 0.0)
            .ok_or_else(|| MarketDataError::malformed(format!("{}: option without a positive strike", symbol)))?;
        let expiration = raw
            .expiration
            .as_ref()
            .and_then(|e| e.to_millis())
            .ok_or_else(|| MarketDataError::malformed(format!("{}: option without a valid expiration", symbol)))?;
        let option_type = raw
            .option_type
            .as_deref()
            .and_then(OptionType::parse)
            .ok_or_else(|| MarketDataError::malformed(format!("{}: option without call/put type", symbol)))?;

        let underlying = raw
            .underlying
            .as_deref()
            .map(normalize_symbol)
            .filter(|u| !u.is_empty())
            .or_else(|| self.symbols.get(&symbol).and_then(|m| m.underlying.clone()));

        let underlying_price = match number(&symbol, "underlyingPrice", raw.underlying_price)? {
            Some(p) if p > 0.0 => Some(p),
            _ => underlying.as_deref().and_then(|u| self.underlying_price(u)),
        };

        let bid = number(&symbol, "bid", raw.bid)?.unwrap_or(0.0);
        let ask = number(&symbol, "ask", raw.ask)?.unwrap_or(0.0);
        let last = number(&symbol, "last", raw.last.or(raw.price))?;

        let mut option = NormalizedOption {
            symbol,
            underlying,
            strike,
            expiration,
            option_type,
            bid,
            ask,
            mid: (bid + ask) / 2.0,
            last,
            underlying_price,
            intrinsic_value: None,
            extrinsic_value: None,
            moneyness: None,
            implied_vol: None,
            timestamp,
        };

        if let Some(spot) = underlying_price {
            let intrinsic = intrinsic_value(spot, strike, option_type);
            option.intrinsic_value = Some(intrinsic);
            option.extrinsic_value = option.market_price().map(|p| p - intrinsic);
            option.moneyness = Some(classify_moneyness(spot, strike, option_type, self.atm_threshold));
            option.implied_vol = self.implied_vol(&option, spot);
        }

        Ok(option)
    }

    /// Solve for volatility when the price carries time value before expiry
    fn implied_vol(&self, option: &NormalizedOption, spot: f64) -> Option<f64> {
        let price = option.market_price()?;
        let time = years_to_expiry(option.expiration, option.timestamp);
        if time <= 0.0 || option.extrinsic_value.unwrap_or(0.0) <= 0.0 {
            return None;
        }
        let input = BSInputs {
            spot,
            strike: option.strike,
            time,
            vol: 0.0,
            rate: self.risk_free_rate,
            option_type: option.option_type,
        };
        let vol = implied_volatility(price, input);
        if vol.is_none() {
            debug!(symbol = %option.symbol, price, spot, "Implied volatility did not converge");
        }
        vol
    }
}

fn classify(raw: &RawRecord) -> Result<RecordKind> {
    if let Some(kind) = raw.record_type.as_deref() {
        return match kind.trim().to_lowercase().as_str() {
            "trade" | "t" => Ok(RecordKind::Trade),
            "quote" | "q" => Ok(RecordKind::Quote),
            "option" | "o" | "option_quote" => Ok(RecordKind::Option),
            other => Err(MarketDataError::malformed(format!("unknown record type '{}'", other))),
        };
    }

    if raw.strike.is_some() || raw.option_type.is_some() {
        Ok(RecordKind::Option)
    } else if raw.bid.is_some() || raw.ask.is_some() {
        Ok(RecordKind::Quote)
    } else if raw.price.is_some() {
        Ok(RecordKind::Trade)
    } else {
        Err(MarketDataError::malformed("cannot determine record type"))
    }
}

/// Validate an optional numeric field: non-finite or negative is malformed
fn number(symbol: &str, field: &str, value: Option<f64>) -> Result<Option<f64>> {
    match value {
        Some(v) if !v.is_finite() => Err(MarketDataError::malformed(format!(
            "{}: {} is not a finite number",
            symbol, field
        ))),
        Some(v) if v < 0.0 => Err(MarketDataError::malformed(format!(
            "{}: {} is negative ({})",
            symbol, field, v
        ))),
        other => Ok(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RawTimestamp;
    use assert_matches::assert_matches;

    fn normalizer() -> Normalizer {
        Normalizer::new(&NormalizerSettings::default())
    }

    fn option_raw(strike: f64, right: &str, underlying_price: Option<f64>) -> RawRecord {
        RawRecord {
            record_type: Some("option".to_string()),
            symbol: Some("AAPL240119C150".to_string()),
            strike: Some(strike),
            expiration: Some(RawTimestamp::Text("2024-01-19".to_string())),
            option_type: Some(right.to_string()),
            underlying: Some("aapl".to_string()),
            underlying_price,
            bid: Some(4.0),
            ask: Some(6.0),
            ..Default::default()
        }
    }

    #[test]
    fn test_trade_normalized() {
        let mut n = normalizer();
        let record = n.normalize(&RawRecord::trade(" aapl ", 150.0, 10.0, 1_000), 0).unwrap();
        assert_matches!(record, NormalizedRecord::Trade(ref t) if t.symbol == "AAPL" && t.price == 150.0);
        assert_eq!(n.underlying_price("AAPL"), None);

        n.observe(&record);
        assert_eq!(n.underlying_price("AAPL"), Some(150.0));
    }

    #[test]
    fn test_quote_derived_fields() {
        let n = normalizer();
        let raw = RawRecord {
            bid_size: Some(3.0),
            ..RawRecord::quote("MSFT", 99.0, 101.0, 5)
        };
        let NormalizedRecord::Quote(q) = n.normalize(&raw, 0).unwrap() else {
            panic!("expected quote");
        };
        assert_eq!(q.mid, 100.0);
        assert_eq!(q.spread, 2.0);
        assert_eq!(q.spread_pct, Some(2.0));
        assert_eq!(q.bid_size, 3.0);
        assert_eq!(q.ask_size, 0.0);
        assert_eq!(q.last, None);
        assert!(!q.inverted);
    }

    #[test]
    fn test_inverted_quote_flagged_not_corrected() {
        let mut n = normalizer();
        let record = n.normalize(&RawRecord::quote("MSFT", 101.0, 99.0, 5), 0).unwrap();
        let NormalizedRecord::Quote(q) = &record else {
            panic!("expected quote");
        };
        assert!(q.inverted);
        assert_eq!(q.spread, -2.0);
        n.observe(&record);
        assert_eq!(n.underlying_price("MSFT"), None);
    }

    #[test]
    fn test_malformed_records() {
        let n = normalizer();
        assert_matches!(
            n.normalize(&RawRecord::trade("AAPL", f64::NAN, 1.0, 0), 0),
            Err(MarketDataError::MalformedEvent(_))
        );
        assert_matches!(
            n.normalize(&RawRecord::trade("", 1.0, 1.0, 0), 0),
            Err(MarketDataError::MalformedEvent(_))
        );
        assert_matches!(
            n.normalize(&RawRecord::trade("AAPL", 1.0, -1.0, 0), 0),
            Err(MarketDataError::MalformedEvent(_))
        );
        let no_sides = RawRecord {
            record_type: Some("quote".to_string()),
            symbol: Some("AAPL".to_string()),
            ..Default::default()
        };
        assert_matches!(n.normalize(&no_sides, 0), Err(MarketDataError::MalformedEvent(_)));
    }

    #[test]
    fn test_missing_timestamp_uses_receipt_time() {
        let n = normalizer();
        let raw = RawRecord {
            timestamp: None,
            ..RawRecord::trade("AAPL", 1.0, 1.0, 0)
        };
        assert_eq!(n.normalize(&raw, 777).unwrap().timestamp(), 777);
    }

    #[test]
    fn test_type_inferred_from_fields() {
        let n = normalizer();
        let raw: RawRecord = serde_json::from_str(r#"{"S":"TSLA","bp":10,"ap":11,"t":9}"#).unwrap();
        assert_eq!(n.normalize(&raw, 0).unwrap().kind(), RecordKind::Quote);
    }

    #[test]
    fn test_option_moneyness() {
        let n = normalizer();
        let NormalizedRecord::Option(atm) = n.normalize(&option_raw(150.0, "C", Some(152.0)), 0).unwrap() else {
            panic!("expected option");
        };
        assert_eq!(atm.moneyness, Some(Moneyness::AtTheMoney));
        assert_eq!(atm.intrinsic_value, Some(2.0));
        assert_eq!(atm.extrinsic_value, Some(3.0));
        assert_eq!(atm.underlying.as_deref(), Some("AAPL"));

        let NormalizedRecord::Option(itm) = n.normalize(&option_raw(150.0, "call", Some(160.0)), 0).unwrap() else {
            panic!("expected option");
        };
        assert_eq!(itm.moneyness, Some(Moneyness::InTheMoney));

        let NormalizedRecord::Option(otm) = n.normalize(&option_raw(150.0, "P", Some(160.0)), 0).unwrap() else {
            panic!("expected option");
        };
        assert_eq!(otm.moneyness, Some(Moneyness::OutOfTheMoney));
        assert_eq!(otm.intrinsic_value, Some(0.0));
    }

    #[test]
    fn test_option_uses_tracked_underlying_price() {
        let mut n = normalizer();
        let NormalizedRecord::Option(unknown) = n.normalize(&option_raw(150.0, "C", None), 0).unwrap() else {
            panic!("expected option");
        };
        assert_eq!(unknown.moneyness, None);
        assert_eq!(unknown.intrinsic_value, None);

        let trade = n.normalize(&RawRecord::trade("AAPL", 140.0, 1.0, 0), 0).unwrap();
        n.observe(&trade);
        let NormalizedRecord::Option(known) = n.normalize(&option_raw(150.0, "P", None), 0).unwrap() else {
            panic!("expected option");
        };
        assert_eq!(known.underlying_price, Some(140.0));
        assert_eq!(known.moneyness, Some(Moneyness::InTheMoney));
    }

    #[test]
    fn test_option_implied_vol_from_market_price() {
        let n = normalizer().with_risk_free_rate(0.05);
        let expiry = RawTimestamp::Text("2024-01-19".to_string()).to_millis().unwrap();
        let quoted_at = expiry - 90 * 24 * 3_600_000;
        let fair = crate::black_scholes::black_scholes_price(BSInputs {
            spot: 150.0,
            strike: 150.0,
            time: years_to_expiry(expiry, quoted_at),
            vol: 0.25,
            rate: 0.05,
            option_type: OptionType::Call,
        });

        let raw = RawRecord {
            timestamp: Some(RawTimestamp::Millis(quoted_at)),
            last: Some(fair),
            ..option_raw(150.0, "C", Some(150.0))
        };
        let NormalizedRecord::Option(option) = n.normalize(&raw, 0).unwrap() else {
            panic!("expected option");
        };
        let vol = option.implied_vol.unwrap();
        assert!((vol - 0.25).abs() < 1e-3, "implied vol {vol}");

        // Expired or no time value: nothing to solve for
        let expired = RawRecord {
            timestamp: Some(RawTimestamp::Millis(expiry + 1)),
            ..raw.clone()
        };
        let NormalizedRecord::Option(option) = n.normalize(&expired, 0).unwrap() else {
            panic!("expected option");
        };
        assert_eq!(option.implied_vol, None);

        let NormalizedRecord::Option(unknown) = n.normalize(&option_raw(150.0, "C", None), 0).unwrap() else {
            panic!("expected option");
        };
        assert_eq!(unknown.implied_vol, None);
    }

    #[test]
    fn test_multiplier_lookup() {
        let mut n = normalizer();
        n.register_symbol(SymbolMeta {
            symbol: "es".to_string(),
            multiplier: 50.0,
            underlying: None,
        });
        assert_eq!(n.multiplier("ES"), 50.0);
        assert_eq!(n.multiplier("AAPL"), 1.0);
    }
}
