use serde::{Deserialize, Serialize};

pub mod defaults;
pub mod parser;
pub mod substitution;
pub mod validator;

pub use defaults::*;
pub use parser::*;
pub use substitution::*;
pub use validator::*;

/// Root configuration for one engine instance.
///
/// Every section falls back to its defaults when omitted from the YAML file.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StreamConfig {
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub windows: WindowSettings,
    #[serde(default)]
    pub indicators: IndicatorSettings,
    #[serde(default)]
    pub normalizer: NormalizerSettings,
    #[serde(default)]
    pub buffer: BufferSettings,
    #[serde(default)]
    pub risk: RiskSettings,
    #[serde(default)]
    pub compute: ComputeSettings,
}

impl StreamConfig {
    /// Interval the indicators are fed from.
    ///
    /// Falls back to the first configured candle interval when the configured
    /// source interval is not one of the built candles.
    pub fn effective_indicator_interval(&self) -> Option<&str> {
        let source = self.indicators.source_interval.as_str();
        if self.windows.candle_intervals.iter().any(|i| i == source) {
            Some(source)
        } else {
            self.windows.candle_intervals.first().map(String::as_str)
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineSettings {
    #[serde(default = "default_engine_name")]
    pub name: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    /// Prometheus exporter port. Metrics stay in-process when unset.
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            name: default_engine_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            metrics_port: None,
        }
    }
}

/// What happens to an event that arrives after its tumbling window flushed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LateEventPolicy {
    /// Reject the event with a late-event error
    #[default]
    Drop,
    /// Fold the event into the window that is currently open
    MergeIntoCurrent,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WindowSettings {
    /// Tumbling candle timeframes, e.g. `1m`, `5m`, `1h`
    #[serde(default = "default_candle_intervals")]
    pub candle_intervals: Vec<String>,
    #[serde(default = "default_sliding_size_ms")]
    pub sliding_size_ms: u64,
    #[serde(default = "default_slide_interval_ms")]
    pub slide_interval_ms: u64,
    #[serde(default = "default_session_gap_ms")]
    pub session_gap_ms: u64,
    /// Emit tumbling flushes for windows that saw no items
    #[serde(default)]
    pub emit_empty_windows: bool,
    #[serde(default)]
    pub late_event_policy: LateEventPolicy,
    /// Closed candles kept per symbol and interval
    #[serde(default = "default_candle_history")]
    pub candle_history: usize,
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            candle_intervals: default_candle_intervals(),
            sliding_size_ms: default_sliding_size_ms(),
            slide_interval_ms: default_slide_interval_ms(),
            session_gap_ms: default_session_gap_ms(),
            emit_empty_windows: false,
            late_event_policy: LateEventPolicy::default(),
            candle_history: default_candle_history(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IndicatorSettings {
    /// Candle interval whose closes feed SMA/EMA/Bollinger
    #[serde(default = "default_indicator_interval")]
    pub source_interval: String,
    #[serde(default = "default_sma_period")]
    pub sma_period: usize,
    #[serde(default = "default_ema_period")]
    pub ema_period: usize,
    #[serde(default = "default_bollinger_period")]
    pub bollinger_period: usize,
    #[serde(default = "default_bollinger_k")]
    pub bollinger_k: f64,
}

impl Default for IndicatorSettings {
    fn default() -> Self {
        Self {
            source_interval: default_indicator_interval(),
            sma_period: default_sma_period(),
            ema_period: default_ema_period(),
            bollinger_period: default_bollinger_period(),
            bollinger_k: default_bollinger_k(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NormalizerSettings {
    /// Relative distance from strike treated as at-the-money (0.02 = 2%)
    #[serde(default = "default_atm_threshold")]
    pub atm_threshold: f64,
    /// Contract multiplier for symbols without registered metadata
    #[serde(default = "default_multiplier")]
    pub default_multiplier: f64,
}

impl Default for NormalizerSettings {
    fn default() -> Self {
        Self {
            atm_threshold: default_atm_threshold(),
            default_multiplier: default_multiplier(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BufferSettings {
    /// Ring buffer capacity per topic
    #[serde(default = "default_buffer_capacity")]
    pub capacity_per_topic: usize,
    /// Pending durable writes before new ones are dropped
    #[serde(default = "default_persistence_queue_capacity")]
    pub persistence_queue_capacity: usize,
    /// Retention applied by `prune_persistence`
    #[serde(default = "default_retention_ms")]
    pub retention_ms: u64,
}

impl Default for BufferSettings {
    fn default() -> Self {
        Self {
            capacity_per_topic: default_buffer_capacity(),
            persistence_queue_capacity: default_persistence_queue_capacity(),
            retention_ms: default_retention_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RiskSettings {
    #[serde(default)]
    pub risk_free_rate: f64,
    /// Volatility used for option positions that do not carry their own
    #[serde(default = "default_volatility")]
    pub default_volatility: f64,
}

impl Default for RiskSettings {
    fn default() -> Self {
        Self {
            risk_free_rate: 0.0,
            default_volatility: default_volatility(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ComputeSettings {
    #[serde(default = "default_compute_workers")]
    pub workers: usize,
    #[serde(default = "default_compute_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_compute_timeout_ms")]
    pub default_timeout_ms: u64,
}

impl Default for ComputeSettings {
    fn default() -> Self {
        Self {
            workers: default_compute_workers(),
            queue_capacity: default_compute_queue_capacity(),
            default_timeout_ms: default_compute_timeout_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_yaml_uses_defaults() {
        let config: StreamConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.engine.name, "streamx");
        assert_eq!(config.windows.candle_intervals, vec!["1m", "5m"]);
        assert_eq!(config.windows.late_event_policy, LateEventPolicy::Drop);
        assert_eq!(config.buffer.capacity_per_topic, 1000);
        assert_eq!(config.compute.workers, 2);
    }

    #[test]
    fn test_partial_section() {
        let yaml = r#"
windows:
  session_gap_ms: 30000
  late_event_policy: merge_into_current
indicators:
  bollinger_k: 2.5
"#;
        let config: StreamConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.windows.session_gap_ms, 30000);
        assert_eq!(
            config.windows.late_event_policy,
            LateEventPolicy::MergeIntoCurrent
        );
        assert_eq!(config.windows.sliding_size_ms, 60_000);
        assert_eq!(config.indicators.bollinger_k, 2.5);
        assert_eq!(config.indicators.sma_period, 20);
    }

    #[test]
    fn test_effective_indicator_interval_falls_back() {
        let mut config = StreamConfig::default();
        assert_eq!(config.effective_indicator_interval(), Some("1m"));

        config.indicators.source_interval = "15m".to_string();
        assert_eq!(config.effective_indicator_interval(), Some("1m"));

        config.windows.candle_intervals.clear();
        assert_eq!(config.effective_indicator_interval(), None);
    }
}
