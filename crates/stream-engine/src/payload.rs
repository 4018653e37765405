//! Payloads carried on engine topics

use market_data::{
    Candle, IndicatorSnapshot, NormalizedOption, NormalizedQuote, NormalizedRecord, NormalizedTrade,
    RollingStats, SessionSummary, VwapUpdate,
};
use risk_engine::{PortfolioGreeks, PositionPnl};
use serde::{Deserialize, Serialize};

/// Body of every [`common::StreamEvent`] the engine publishes
///
/// | Topic | Variant |
/// |---|---|
/// | `trade:<symbol>` | `Trade` |
/// | `quote:<symbol>` | `Quote` |
/// | `option:<symbol>` | `Option` |
/// | `candle:<timeframe>:<symbol>` | `Candle` |
/// | `vwap:<symbol>` | `Vwap` |
/// | `indicators:<timeframe>:<symbol>` | `Indicators` |
/// | `stats:<symbol>` | `Stats` |
/// | `session:<symbol>` | `Session` |
/// | `pl:<position id>` | `PositionPnl` |
/// | `greeks:portfolio` | `PortfolioGreeks` |
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EventPayload {
    Trade(NormalizedTrade),
    Quote(NormalizedQuote),
    Option(NormalizedOption),
    Candle(Candle),
    Vwap(VwapUpdate),
    Indicators(IndicatorSnapshot),
    Stats(RollingStats),
    Session(SessionSummary),
    PositionPnl(PositionPnl),
    PortfolioGreeks(PortfolioGreeks),
}

impl From<NormalizedRecord> for EventPayload {
    fn from(record: NormalizedRecord) -> Self {
        match record {
            NormalizedRecord::Trade(t) => Self::Trade(t),
            NormalizedRecord::Quote(q) => Self::Quote(q),
            NormalizedRecord::Option(o) => Self::Option(o),
        }
    }
}

impl EventPayload {
    pub fn as_trade(&self) -> Option<&NormalizedTrade> {
        match self {
            Self::Trade(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_candle(&self) -> Option<&Candle> {
        match self {
            Self::Candle(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_vwap(&self) -> Option<&VwapUpdate> {
        match self {
            Self::Vwap(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_session(&self) -> Option<&SessionSummary> {
        match self {
            Self::Session(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_pnl(&self) -> Option<&PositionPnl> {
        match self {
            Self::PositionPnl(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_portfolio_greeks(&self) -> Option<&PortfolioGreeks> {
        match self {
            Self::PortfolioGreeks(g) => Some(g),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_survives_json() {
        let payload = EventPayload::Trade(NormalizedTrade {
            symbol: "AAPL".to_string(),
            price: 101.5,
            size: 3.0,
            timestamp: 1_700_000_000_000,
        });
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["type"], "trade");
        let back: EventPayload = serde_json::from_value(value).unwrap();
        assert_eq!(back, payload);
    }
}
