//! End-to-end scenarios through the public engine API

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use common::{PositionSide, TimestampMs, Topic};
use config::{LateEventPolicy, StreamConfig};
use market_data::{RawRecord, WindowError};
use parking_lot::Mutex;
use risk_engine::{OptionContract, Position, StaticPositionFeed};
use storage::{InMemoryPersistence, PersistenceStore};

use stream_engine::{EngineError, EngineEvent, EventPayload, ManualClock, StreamEngine};

// Aligned to the minute
const T0: TimestampMs = 1_700_000_040_000;

fn config() -> StreamConfig {
    let mut config = StreamConfig::default();
    config.windows.candle_intervals = vec!["1m".to_string()];
    config.windows.session_gap_ms = 30_000;
    config.compute.workers = 2;
    config
}

fn engine_with(config: StreamConfig) -> (StreamEngine, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(T0));
    let engine = StreamEngine::builder(config).clock(clock.clone()).build().unwrap();
    (engine, clock)
}

fn collect(engine: &StreamEngine, pattern: &str) -> Arc<Mutex<Vec<EngineEvent>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    engine
        .subscribe(pattern, move |event| {
            sink.lock().push(event.clone());
            Ok(())
        })
        .unwrap();
    seen
}

fn trade(engine: &StreamEngine, symbol: &str, price: f64, size: f64, ts: TimestampMs) {
    engine.ingest(&RawRecord::trade(symbol, price, size, ts)).unwrap();
}

#[test]
fn test_one_minute_candle() {
    let (engine, _) = engine_with(config());
    let candles = collect(&engine, "candle:*");

    trade(&engine, "AAPL", 100.0, 5.0, T0);
    trade(&engine, "AAPL", 102.0, 5.0, T0 + 10_000);
    trade(&engine, "AAPL", 101.0, 10.0, T0 + 20_000);
    assert!(candles.lock().is_empty());
    engine.finish();

    let candles = candles.lock();
    assert_eq!(candles.len(), 1);
    let candle = candles[0].payload.as_candle().unwrap();
    assert_eq!(candle.window_start, T0);
    assert_eq!(candle.window_end, T0 + 60_000);
    assert_eq!(candle.ohlc.open(), 100.0);
    assert_eq!(candle.ohlc.high(), 102.0);
    assert_eq!(candle.ohlc.low(), 100.0);
    assert_eq!(candle.ohlc.close(), 101.0);
    assert_eq!(candle.ohlc.volume(), 20.0);
    assert_eq!(candle.ohlc.trade_count(), 3);
}

#[test]
fn test_vwap_running_value() {
    let (engine, _) = engine_with(config());
    let vwaps = collect(&engine, "vwap:AAPL");

    trade(&engine, "AAPL", 100.0, 10.0, T0);
    trade(&engine, "AAPL", 110.0, 10.0, T0 + 1_000);

    let vwaps = vwaps.lock();
    let values: Vec<f64> = vwaps.iter().filter_map(|e| e.payload.as_vwap()).map(|v| v.vwap).collect();
    assert_eq!(values, vec![100.0, 105.0]);
    assert_eq!(vwaps[1].sequence, 2);
}

#[test]
fn test_replay_keeps_newest_within_capacity() {
    let mut config = config();
    config.buffer.capacity_per_topic = 3;
    let (engine, _) = engine_with(config);

    for (i, price) in [10.0, 11.0, 12.0, 13.0].into_iter().enumerate() {
        trade(&engine, "AAPL", price, 1.0, T0 + i as i64);
    }

    let replayed = engine.replay("trade:AAPL", 0).unwrap();
    let prices: Vec<f64> = replayed.iter().filter_map(|e| e.payload.as_trade()).map(|t| t.price).collect();
    assert_eq!(prices, vec![11.0, 12.0, 13.0]);
    assert_eq!(engine.replay_last("trade:AAPL", 1).unwrap()[0].sequence, 4);
}

#[test]
fn test_session_closes_after_inactivity_gap() {
    let (engine, _) = engine_with(config());
    let sessions = collect(&engine, "session:*");

    trade(&engine, "AAPL", 100.0, 1.0, T0);
    trade(&engine, "AAPL", 101.0, 1.0, T0 + 20_000);
    trade(&engine, "AAPL", 99.0, 1.0, T0 + 60_000);

    let sessions = sessions.lock();
    assert_eq!(sessions.len(), 1);
    let session = sessions[0].payload.as_session().unwrap();
    assert_eq!(session.start, T0);
    assert_eq!(session.end, T0 + 50_000);
    assert_eq!(session.last_activity, T0 + 20_000);
    assert_eq!(session.ohlc.trade_count(), 2);
}

#[test]
fn test_tick_closes_idle_session() {
    let (engine, clock) = engine_with(config());
    let sessions = collect(&engine, "session:AAPL");

    trade(&engine, "AAPL", 100.0, 1.0, T0);
    clock.set(T0 + 29_999);
    engine.tick();
    assert!(sessions.lock().is_empty());
    clock.set(T0 + 30_000);
    engine.tick();
    assert_eq!(sessions.lock().len(), 1);
}

#[test]
fn test_position_pnl_long_and_short() {
    let (engine, _) = engine_with(config());
    let pnl = collect(&engine, "pl:*");

    engine
        .upsert_position(Position::new("long", "AAPL", PositionSide::Long, 10.0, 150.0).with_multiplier(100.0))
        .unwrap();
    engine
        .upsert_position(Position::new("short", "AAPL", PositionSide::Short, 10.0, 150.0).with_multiplier(100.0))
        .unwrap();
    // Nothing priced yet
    assert!(pnl.lock().is_empty());

    trade(&engine, "AAPL", 155.0, 1.0, T0);

    let pnl = pnl.lock();
    let values: Vec<(String, f64)> = pnl
        .iter()
        .filter_map(|e| e.payload.as_pnl())
        .map(|p| (p.position_id.clone(), p.unrealized_pnl))
        .collect();
    assert_eq!(values.len(), 2);
    assert_eq!(values[0].0, "long");
    assert!((values[0].1 - 5000.0).abs() < 1e-9);
    assert_eq!(values[1].0, "short");
    assert!((values[1].1 + 5000.0).abs() < 1e-9);
    assert!(engine.total_unrealized_pnl().abs() < 1e-9);
}

#[test]
fn test_malformed_record_does_not_stop_the_engine() {
    let (engine, _) = engine_with(config());
    let trades = collect(&engine, "trade:*");

    assert_matches!(engine.ingest_json(r#"{"type":"trade","symbol":"AAPL"}"#), Err(EngineError::MalformedEvent(_)));
    assert_matches!(engine.ingest_json("garbage"), Err(EngineError::MalformedEvent(_)));
    trade(&engine, "AAPL", 100.0, 1.0, T0);

    assert_eq!(trades.lock().len(), 1);
}

#[test]
fn test_late_trade_is_rejected_whole() {
    let mut config = config();
    config.windows.late_event_policy = LateEventPolicy::Drop;
    let (engine, _) = engine_with(config);
    let trades = collect(&engine, "trade:*");

    trade(&engine, "AAPL", 100.0, 10.0, T0 + 1_000);
    trade(&engine, "AAPL", 100.0, 10.0, T0 + 61_000);
    // The first minute is closed by now
    assert_matches!(
        engine.ingest(&RawRecord::trade("AAPL", 50.0, 20.0, T0 + 2_000)),
        Err(EngineError::Window(WindowError::LateEvent { .. }))
    );

    assert_eq!(trades.lock().len(), 2);
    assert_eq!(engine.vwap("AAPL"), Some(100.0));
    assert_eq!(engine.last_sequence("trade:AAPL").unwrap(), 2);

    engine.finish();
    let candles = engine.candles("AAPL", "1m", 0).unwrap();
    assert_eq!(candles.len(), 2);
    assert_eq!(candles[0].ohlc.low(), 100.0);
    assert!(candles.iter().all(|c| c.ohlc.trade_count() == 1));
    assert_eq!(engine.replay("trade:AAPL", 0).unwrap().len(), 2);
}

#[test]
fn test_indicators_follow_closed_candles() {
    let mut config = config();
    config.indicators.sma_period = 2;
    let (engine, _) = engine_with(config);
    let indicators = collect(&engine, "indicators:1m:AAPL");

    trade(&engine, "AAPL", 100.0, 1.0, T0);
    trade(&engine, "AAPL", 110.0, 1.0, T0 + 60_000);
    trade(&engine, "AAPL", 120.0, 1.0, T0 + 120_000);

    let snapshots: Vec<_> = indicators
        .lock()
        .iter()
        .filter_map(|e| match &e.payload {
            EventPayload::Indicators(s) => Some(s.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(snapshots.len(), 2);
    assert_eq!(snapshots[0].sma, None);
    assert_eq!(snapshots[1].sma, Some(105.0));
}

#[tokio::test]
async fn test_greeks_batch_matches_inline() {
    let (engine, _) = engine_with(config());
    engine
        .upsert_position(Position::new("stock", "AAPL", PositionSide::Long, 100.0, 150.0))
        .unwrap();
    engine
        .upsert_position(
            Position::new("call", "AAPL-C-160", PositionSide::Short, 5.0, 3.0)
                .with_multiplier(100.0)
                .with_option(OptionContract {
                    underlying: "AAPL".to_string(),
                    strike: 160.0,
                    expiration: T0 + 30 * 24 * 3_600_000,
                    option_type: market_data::OptionType::Call,
                    volatility: Some(0.3),
                }),
        )
        .unwrap();
    trade(&engine, "AAPL", 155.0, 1.0, T0);

    let inline = engine.portfolio_greeks();
    let batch = engine.greeks_batch().await.unwrap();
    assert_eq!(batch, inline);
    assert_eq!(batch.positions, 2);
    assert!(batch.delta < 100.0);
}

#[tokio::test]
async fn test_candle_rebuild_matches_live_candles() {
    let (engine, _) = engine_with(config());
    trade(&engine, "AAPL", 100.0, 1.0, T0);
    trade(&engine, "AAPL", 101.0, 2.0, T0 + 30_000);
    trade(&engine, "AAPL", 99.0, 1.0, T0 + 65_000);
    engine.finish();

    let live = engine.candles("AAPL", "1m", 0).unwrap();
    let rebuilt = engine.rebuild_candles("AAPL", "1m").await.unwrap();
    assert_eq!(live.len(), 2);
    assert_eq!(rebuilt, live);
}

#[tokio::test]
async fn test_sync_positions_from_feed() {
    let (engine, _) = engine_with(config());
    trade(&engine, "AAPL", 155.0, 1.0, T0);
    let feed = StaticPositionFeed::new(vec![Position::new("p1", "aapl", PositionSide::Long, 2.0, 150.0)]);

    assert_eq!(engine.sync_positions(&feed).await.unwrap(), 1);
    assert_eq!(engine.position_pnl("p1").unwrap().unrealized_pnl, 10.0);

    feed.set(Vec::new());
    assert_eq!(engine.sync_positions(&feed).await.unwrap(), 0);
    assert!(engine.positions().is_empty());
}

#[tokio::test]
async fn test_history_replay_reaches_past_the_ring() {
    let mut config = config();
    config.buffer.capacity_per_topic = 2;
    config.buffer.retention_ms = 60_000;
    let store = Arc::new(InMemoryPersistence::new());
    let clock = Arc::new(ManualClock::new(T0));
    let engine = StreamEngine::builder(config)
        .clock(clock.clone())
        .persistence(store.clone())
        .build()
        .unwrap();

    for i in 0..4 {
        trade(&engine, "AAPL", 100.0 + i as f64, 1.0, T0 + i * 1_000);
    }

    let topic = Topic::trade("AAPL");
    for _ in 0..100 {
        if store.query_range(&topic, 0, TimestampMs::MAX).await.unwrap().len() == 4 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert_eq!(engine.replay("trade:AAPL", 0).unwrap().len(), 2);
    let outcome = engine.replay_with_history("trade:AAPL", T0, T0 + 10_000).await.unwrap();
    assert!(outcome.complete);
    let sequences: Vec<u64> = outcome.events.iter().map(|e| e.sequence).collect();
    assert_eq!(sequences, vec![1, 2, 3, 4]);

    clock.set(T0 + 120_000);
    assert!(engine.prune_persistence().await.unwrap() >= 4);
    assert!(store.query_range(&topic, 0, TimestampMs::MAX).await.unwrap().is_empty());
    // The ring still holds the newest two, but the older ones are gone for good
    let outcome = engine.replay_with_history("trade:AAPL", T0, T0 + 10_000).await.unwrap();
    assert!(!outcome.complete);
    let sequences: Vec<u64> = outcome.events.iter().map(|e| e.sequence).collect();
    assert_eq!(sequences, vec![3, 4]);

    if let Some(writer) = engine.shutdown() {
        writer.await.unwrap();
    }
}

#[test]
fn test_per_topic_sequences_are_gapless() {
    let (engine, _) = engine_with(config());
    let all = collect(&engine, "*");

    for i in 0..5 {
        trade(&engine, "AAPL", 100.0, 1.0, T0 + i * 1_000);
        trade(&engine, "MSFT", 300.0, 1.0, T0 + i * 1_000);
    }

    let all = all.lock();
    for topic in ["trade:AAPL", "trade:MSFT", "vwap:AAPL", "vwap:MSFT"] {
        let sequences: Vec<u64> = all
            .iter()
            .filter(|e| e.topic.as_str() == topic)
            .map(|e| e.sequence)
            .collect();
        assert_eq!(sequences, vec![1, 2, 3, 4, 5], "{topic}");
    }
}
