//! Heavy calculations the engine hands to the compute pool

use common::TimestampMs;
use compute::ComputeJob;
use market_data::{rebuild_candles, Candle, CandleInterval, TradePoint};
use risk_engine::{compute_portfolio_greeks, PortfolioGreeks, Position, RiskInputs};

/// Work item for the engine's compute pool
///
/// Each variant owns a snapshot of everything it reads.
#[derive(Debug, Clone)]
pub enum EngineJob {
    /// Portfolio Greeks over a position snapshot
    GreeksBatch {
        positions: Vec<Position>,
        inputs: RiskInputs,
        as_of: TimestampMs,
    },
    /// Candles rebuilt from raw trades
    CandleRebuild {
        symbol: String,
        interval: CandleInterval,
        trades: Vec<TradePoint>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobOutput {
    Greeks(PortfolioGreeks),
    Candles(Vec<Candle>),
}

impl JobOutput {
    pub fn into_greeks(self) -> Option<PortfolioGreeks> {
        match self {
            Self::Greeks(g) => Some(g),
            _ => None,
        }
    }

    pub fn into_candles(self) -> Option<Vec<Candle>> {
        match self {
            Self::Candles(c) => Some(c),
            _ => None,
        }
    }
}

impl ComputeJob for EngineJob {
    type Output = JobOutput;

    fn kind(&self) -> &'static str {
        match self {
            Self::GreeksBatch { .. } => "greeks_batch",
            Self::CandleRebuild { .. } => "candle_rebuild",
        }
    }

    fn execute(self) -> anyhow::Result<JobOutput> {
        match self {
            Self::GreeksBatch {
                positions,
                inputs,
                as_of,
            } => Ok(JobOutput::Greeks(compute_portfolio_greeks(&positions, &inputs, as_of))),
            Self::CandleRebuild {
                symbol,
                interval,
                trades,
            } => Ok(JobOutput::Candles(rebuild_candles(&symbol, interval, &trades))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::PositionSide;

    #[test]
    fn test_greeks_batch_runs_inline() {
        let positions = vec![Position::new("p", "AAPL", PositionSide::Long, 3.0, 100.0)];
        let mut inputs = RiskInputs::default();
        inputs.prices.insert("AAPL".to_string(), 101.0);
        let job = EngineJob::GreeksBatch {
            positions,
            inputs,
            as_of: 0,
        };
        assert_eq!(job.kind(), "greeks_batch");
        let greeks = job.execute().unwrap().into_greeks().unwrap();
        assert_eq!(greeks.delta, 3.0);
    }

    #[test]
    fn test_candle_rebuild_buckets_trades() {
        let trades = vec![
            TradePoint {
                timestamp: 60_500,
                price: 11.0,
                size: 1.0,
            },
            TradePoint {
                timestamp: 1_000,
                price: 10.0,
                size: 2.0,
            },
        ];
        let job = EngineJob::CandleRebuild {
            symbol: "AAPL".to_string(),
            interval: CandleInterval::parse("1m").unwrap(),
            trades,
        };
        let candles = job.execute().unwrap().into_candles().unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].ohlc.close(), 10.0);
        assert_eq!(candles[1].window_start, 60_000);
    }
}
