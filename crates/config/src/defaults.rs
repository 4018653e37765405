pub fn default_engine_name() -> String {
    "streamx".to_string()
}

pub fn default_log_level() -> String {
    "info".to_string()
}

pub fn default_log_format() -> String {
    "pretty".to_string()
}

pub fn default_candle_intervals() -> Vec<String> {
    vec!["1m".to_string(), "5m".to_string()]
}

pub fn default_sliding_size_ms() -> u64 {
    60_000
}

pub fn default_slide_interval_ms() -> u64 {
    5_000
}

pub fn default_session_gap_ms() -> u64 {
    30_000
}

pub fn default_candle_history() -> usize {
    500
}

pub fn default_indicator_interval() -> String {
    "1m".to_string()
}

pub fn default_sma_period() -> usize {
    20
}

pub fn default_ema_period() -> usize {
    20
}

pub fn default_bollinger_period() -> usize {
    20
}

pub fn default_bollinger_k() -> f64 {
    2.0
}

pub fn default_atm_threshold() -> f64 {
    0.02
}

pub fn default_multiplier() -> f64 {
    1.0
}

pub fn default_buffer_capacity() -> usize {
    1000
}

pub fn default_persistence_queue_capacity() -> usize {
    4096
}

pub fn default_retention_ms() -> u64 {
    24 * 60 * 60 * 1000
}

pub fn default_volatility() -> f64 {
    0.3
}

pub fn default_compute_workers() -> usize {
    2
}

pub fn default_compute_queue_capacity() -> usize {
    256
}

pub fn default_compute_timeout_ms() -> u64 {
    5_000
}
