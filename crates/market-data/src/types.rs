//! Shared types for Market Data

use chrono::{DateTime, NaiveDate};
use common::TimestampMs;
use serde::{Deserialize, Serialize};

/// Option type (Call or Put)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionType {
    Call,
    Put,
}

impl OptionType {
    /// Accepts `C`/`P`/`call`/`put` in any case
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "c" | "call" => Some(Self::Call),
            "p" | "put" => Some(Self::Put),
            _ => None,
        }
    }
}

/// Inputs for Black-Scholes pricing
#[derive(Debug, Clone, Copy)]
pub struct BSInputs {
    /// Spot price of the underlying
    pub spot: f64,
    /// Strike price
    pub strike: f64,
    /// Time to expiry (in years)
    pub time: f64,
    /// Volatility (as decimal, e.g., 0.5 = 50%)
    pub vol: f64,
    /// Risk-free rate
    pub rate: f64,
    /// Option type
    pub option_type: OptionType,
}

impl BSInputs {
    /// Validate and clamp inputs to safe ranges
    pub fn validate(&mut self) {
        self.time = self.time.max(crate::black_scholes::MIN_TIME);
        self.vol = self
            .vol
            .clamp(crate::black_scholes::MIN_VOL, crate::black_scholes::MAX_VOL);
        self.spot = self.spot.max(crate::black_scholes::MIN_PRICE);
        self.strike = self.strike.max(crate::black_scholes::MIN_PRICE);
    }
}

/// Option Greeks
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Greeks {
    /// Delta: ∂V/∂S (rate of change with spot)
    pub delta: f64,
    /// Gamma: ∂²V/∂S² (curvature of delta)
    pub gamma: f64,
    /// Vega: ∂V/∂σ (sensitivity to volatility)
    pub vega: f64,
    /// Theta: ∂V/∂t (time decay)
    pub theta: f64,
    /// Rho: ∂V/∂r (sensitivity to interest rate)
    pub rho: f64,
}

impl Greeks {
    pub fn zero() -> Self {
        Self::default()
    }

    /// Multiply every sensitivity by `factor`
    pub fn scale(&self, factor: f64) -> Self {
        Self {
            delta: self.delta * factor,
            gamma: self.gamma * factor,
            vega: self.vega * factor,
            theta: self.theta * factor,
            rho: self.rho * factor,
        }
    }

    /// Component-wise sum
    pub fn add(&self, other: &Greeks) -> Self {
        Self {
            delta: self.delta + other.delta,
            gamma: self.gamma + other.gamma,
            vega: self.vega + other.vega,
            theta: self.theta + other.theta,
            rho: self.rho + other.rho,
        }
    }
}

/// A timestamp as found in raw feeds: epoch millis, or text
///
/// Text may be RFC 3339, a plain `YYYY-MM-DD` date (midnight UTC) or a
/// number in a string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    Millis(i64),
    Fractional(f64),
    Text(String),
}

impl RawTimestamp {
    /// Resolve to epoch milliseconds
    pub fn to_millis(&self) -> Option<TimestampMs> {
        match self {
            RawTimestamp::Millis(ms) => Some(*ms),
            RawTimestamp::Fractional(ms) if ms.is_finite() => Some(ms.trunc() as i64),
            RawTimestamp::Fractional(_) => None,
            RawTimestamp::Text(text) => {
                let text = text.trim();
                if let Ok(ms) = text.parse::<i64>() {
                    return Some(ms);
                }
                if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
                    return Some(dt.timestamp_millis());
                }
                NaiveDate::parse_from_str(text, "%Y-%m-%d")
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
                    .map(|dt| dt.and_utc().timestamp_millis())
            }
        }
    }
}

/// A raw market record as handed to the engine
///
/// Field names follow the common feed spellings; aliases cover the short
/// forms (`p`, `bp`, `ap`, `ts`, ...). Every field is optional here and
/// checked by the normalizer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    #[serde(rename = "type", alias = "kind", alias = "ev", default)]
    pub record_type: Option<String>,
    #[serde(alias = "sym", alias = "S", alias = "ticker", default)]
    pub symbol: Option<String>,
    #[serde(alias = "p", default)]
    pub price: Option<f64>,
    #[serde(alias = "volume", alias = "qty", alias = "quantity", alias = "v", default)]
    pub size: Option<f64>,
    #[serde(alias = "bp", alias = "bidPrice", default)]
    pub bid: Option<f64>,
    #[serde(alias = "ap", alias = "askPrice", default)]
    pub ask: Option<f64>,
    #[serde(rename = "bidSize", alias = "bid_size", alias = "bs", default)]
    pub bid_size: Option<f64>,
    #[serde(rename = "askSize", alias = "ask_size", alias = "as", default)]
    pub ask_size: Option<f64>,
    #[serde(alias = "lastPrice", alias = "last_price", default)]
    pub last: Option<f64>,
    #[serde(alias = "ts", alias = "t", alias = "time", default)]
    pub timestamp: Option<RawTimestamp>,
    #[serde(alias = "strikePrice", alias = "strike_price", default)]
    pub strike: Option<f64>,
    #[serde(alias = "expiry", alias = "exp", alias = "expirationDate", default)]
    pub expiration: Option<RawTimestamp>,
    #[serde(rename = "optionType", alias = "option_type", alias = "right", alias = "cp", default)]
    pub option_type: Option<String>,
    #[serde(alias = "root", default)]
    pub underlying: Option<String>,
    #[serde(rename = "underlyingPrice", alias = "underlying_price", default)]
    pub underlying_price: Option<f64>,
}

impl RawRecord {
    /// Convenience constructor for a trade record
    pub fn trade(symbol: &str, price: f64, size: f64, timestamp: TimestampMs) -> Self {
        Self {
            record_type: Some("trade".to_string()),
            symbol: Some(symbol.to_string()),
            price: Some(price),
            size: Some(size),
            timestamp: Some(RawTimestamp::Millis(timestamp)),
            ..Default::default()
        }
    }

    /// Convenience constructor for a quote record
    pub fn quote(symbol: &str, bid: f64, ask: f64, timestamp: TimestampMs) -> Self {
        Self {
            record_type: Some("quote".to_string()),
            symbol: Some(symbol.to_string()),
            bid: Some(bid),
            ask: Some(ask),
            timestamp: Some(RawTimestamp::Millis(timestamp)),
            ..Default::default()
        }
    }
}

/// Kind of a raw record after classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Trade,
    Quote,
    Option,
}

/// Canonical trade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedTrade {
    pub symbol: String,
    pub price: f64,
    pub size: f64,
    pub timestamp: TimestampMs,
}

impl NormalizedTrade {
    pub fn point(&self) -> TradePoint {
        TradePoint {
            timestamp: self.timestamp,
            price: self.price,
            size: self.size,
        }
    }
}

/// Price and size at an instant, as held by per-symbol windows
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradePoint {
    pub timestamp: TimestampMs,
    pub price: f64,
    pub size: f64,
}

/// Canonical top-of-book quote
///
/// `mid` and `spread` are always derived from bid/ask. An inverted book
/// (`ask < bid`) keeps its negative spread and sets `inverted`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedQuote {
    pub symbol: String,
    pub bid: f64,
    pub ask: f64,
    pub bid_size: f64,
    pub ask_size: f64,
    pub mid: f64,
    pub spread: f64,
    /// `spread / mid * 100`, null when mid is not positive
    pub spread_pct: Option<f64>,
    pub last: Option<f64>,
    pub timestamp: TimestampMs,
    pub inverted: bool,
}

/// Strike relative to the underlying
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Moneyness {
    #[serde(rename = "ITM")]
    InTheMoney,
    #[serde(rename = "ATM")]
    AtTheMoney,
    #[serde(rename = "OTM")]
    OutOfTheMoney,
}

impl Moneyness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Moneyness::InTheMoney => "ITM",
            Moneyness::AtTheMoney => "ATM",
            Moneyness::OutOfTheMoney => "OTM",
        }
    }
}

/// Canonical option quote
///
/// Values derived from the underlying are null when no underlying price is
/// known yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedOption {
    pub symbol: String,
    pub underlying: Option<String>,
    pub strike: f64,
    pub expiration: TimestampMs,
    pub option_type: OptionType,
    pub bid: f64,
    pub ask: f64,
    pub mid: f64,
    pub last: Option<f64>,
    pub underlying_price: Option<f64>,
    pub intrinsic_value: Option<f64>,
    pub extrinsic_value: Option<f64>,
    pub moneyness: Option<Moneyness>,
    /// Black-Scholes volatility implied by the market price
    #[serde(default)]
    pub implied_vol: Option<f64>,
    pub timestamp: TimestampMs,
}

impl NormalizedOption {
    /// Observed option price: last trade, else mid
    pub fn market_price(&self) -> Option<f64> {
        match self.last {
            Some(last) if last > 0.0 => Some(last),
            _ if self.mid > 0.0 => Some(self.mid),
            _ => None,
        }
    }
}

/// Static metadata for a symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolMeta {
    pub symbol: String,
    /// Contract multiplier (shares per contract, point value, ...)
    pub multiplier: f64,
    /// Underlying symbol for derivatives
    #[serde(default)]
    pub underlying: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_option_type_parse() {
        assert_eq!(OptionType::parse("C"), Some(OptionType::Call));
        assert_eq!(OptionType::parse("put"), Some(OptionType::Put));
        assert_eq!(OptionType::parse("x"), None);
    }

    #[test]
    fn test_greeks_scale_and_add() {
        let g = Greeks {
            delta: 0.5,
            gamma: 0.01,
            vega: 2.0,
            theta: -1.0,
            rho: 0.1,
        };
        let total = g.scale(2.0).add(&g.scale(-1.0));
        assert!((total.delta - 0.5).abs() < 1e-12);
        assert!((total.theta + 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_raw_timestamp_forms() {
        assert_eq!(RawTimestamp::Millis(1_000).to_millis(), Some(1_000));
        assert_eq!(
            RawTimestamp::Text("1970-01-01T00:00:01Z".to_string()).to_millis(),
            Some(1_000)
        );
        assert_eq!(
            RawTimestamp::Text("1970-01-02".to_string()).to_millis(),
            Some(86_400_000)
        );
        assert_eq!(RawTimestamp::Text("soon".to_string()).to_millis(), None);
    }

    #[test]
    fn test_raw_record_aliases() {
        let raw: RawRecord =
            serde_json::from_str(r#"{"ev":"trade","sym":"aapl","p":101.5,"v":3,"ts":42}"#)
                .unwrap();
        assert_eq!(raw.record_type.as_deref(), Some("trade"));
        assert_eq!(raw.symbol.as_deref(), Some("aapl"));
        assert_eq!(raw.price, Some(101.5));
        assert_eq!(raw.size, Some(3.0));
        assert_eq!(raw.timestamp, Some(RawTimestamp::Millis(42)));
    }

    #[test]
    fn test_raw_record_option_fields() {
        let raw: RawRecord = serde_json::from_str(
            r#"{"type":"option","symbol":"AAPL240119C150","strike":150,"expiry":"2024-01-19","right":"C","underlying":"AAPL"}"#,
        )
        .unwrap();
        assert_eq!(raw.strike, Some(150.0));
        assert_eq!(raw.option_type.as_deref(), Some("C"));
        assert!(raw.expiration.and_then(|e| e.to_millis()).is_some());
    }
}
