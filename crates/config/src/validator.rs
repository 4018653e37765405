use crate::*;
use regex::Regex;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Engine name is required")]
    MissingEngineName,

    #[error("Invalid log format: {0}. Must be one of: pretty, json, compact")]
    InvalidLogFormat(String),

    #[error("No candle intervals defined")]
    NoCandleIntervals,

    #[error("Invalid interval '{0}'. Expected <number><unit> with unit one of ms, s, m, h, d")]
    InvalidInterval(String),

    #[error("Duplicate candle interval '{0}'")]
    DuplicateInterval(String),

    #[error("{field} must be a positive integer")]
    InvalidPositiveInteger { field: String },

    #[error("{field} must be a positive float")]
    InvalidPositiveFloat { field: String },

    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        field: String,
        min: f64,
        max: f64,
        value: f64,
    },
}

#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct DefaultApplied {
    pub field: String,
    pub value: String,
}

#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
    pub defaults_applied: Vec<DefaultApplied>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self {
            errors: Vec::new(),
            warnings: Vec::new(),
            defaults_applied: Vec::new(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, field: &str, message: &str) {
        self.warnings.push(ValidationWarning {
            field: field.to_string(),
            message: message.to_string(),
        });
    }

    pub fn add_default(&mut self, field: &str, value: &str) {
        self.defaults_applied.push(DefaultApplied {
            field: field.to_string(),
            value: value.to_string(),
        });
    }
}

impl Default for ValidationReport {
    fn default() -> Self {
        Self::new()
    }
}

/// Convert an interval such as `500ms`, `30s`, `1m`, `4h` or `1d` to milliseconds
pub fn interval_to_millis(interval: &str) -> Option<u64> {
    let re = Regex::new(r"^(\d+)(ms|s|m|h|d)$").ok()?;
    let caps = re.captures(interval.trim())?;
    let amount: u64 = caps.get(1)?.as_str().parse().ok()?;
    let unit = match caps.get(2)?.as_str() {
        "ms" => 1,
        "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        "d" => 86_400_000,
        _ => return None,
    };
    match amount.checked_mul(unit) {
        Some(0) | None => None,
        Some(ms) => Some(ms),
    }
}

pub fn validate_config(config: &StreamConfig) -> ValidationReport {
    let mut report = ValidationReport::new();

    validate_engine(&config.engine, &mut report);
    validate_windows(&config.windows, &mut report);
    validate_indicators(config, &mut report);
    validate_normalizer(&config.normalizer, &mut report);
    validate_buffer(&config.buffer, &mut report);
    validate_risk(&config.risk, &mut report);
    validate_compute(&config.compute, &mut report);

    report
}

fn require_positive(value: u64, field: &str, report: &mut ValidationReport) {
    if value == 0 {
        report.add_error(ValidationError::InvalidPositiveInteger {
            field: field.to_string(),
        });
    }
}

fn validate_engine(engine: &EngineSettings, report: &mut ValidationReport) {
    if engine.name.trim().is_empty() {
        report.add_error(ValidationError::MissingEngineName);
    }

    let valid_formats = ["pretty", "json", "compact"];
    if !valid_formats.contains(&engine.log_format.to_lowercase().as_str()) {
        report.add_error(ValidationError::InvalidLogFormat(engine.log_format.clone()));
    }

    if has_unresolved_env_vars(&engine.name) {
        report.add_warning("engine.name", "contains an unresolved environment variable");
    }
}

fn validate_windows(windows: &WindowSettings, report: &mut ValidationReport) {
    if windows.candle_intervals.is_empty() {
        report.add_error(ValidationError::NoCandleIntervals);
    }

    let mut seen = Vec::new();
    for interval in &windows.candle_intervals {
        match interval_to_millis(interval) {
            Some(ms) => {
                if seen.contains(&ms) {
                    report.add_error(ValidationError::DuplicateInterval(interval.clone()));
                }
                seen.push(ms);
            }
            None => report.add_error(ValidationError::InvalidInterval(interval.clone())),
        }
    }

    require_positive(windows.sliding_size_ms, "windows.sliding_size_ms", report);
    require_positive(windows.slide_interval_ms, "windows.slide_interval_ms", report);
    require_positive(windows.session_gap_ms, "windows.session_gap_ms", report);
    require_positive(windows.candle_history as u64, "windows.candle_history", report);

    if windows.slide_interval_ms > windows.sliding_size_ms {
        report.add_warning(
            "windows.slide_interval_ms",
            "slide interval is larger than the window size; some items will never be observed",
        );
    }
}

fn validate_indicators(config: &StreamConfig, report: &mut ValidationReport) {
    let indicators = &config.indicators;

    require_positive(indicators.sma_period as u64, "indicators.sma_period", report);
    require_positive(indicators.ema_period as u64, "indicators.ema_period", report);
    require_positive(
        indicators.bollinger_period as u64,
        "indicators.bollinger_period",
        report,
    );

    if !(indicators.bollinger_k.is_finite() && indicators.bollinger_k > 0.0) {
        report.add_error(ValidationError::InvalidPositiveFloat {
            field: "indicators.bollinger_k".to_string(),
        });
    }

    let source = indicators.source_interval.as_str();
    if !config.windows.candle_intervals.iter().any(|i| i == source) {
        if let Some(fallback) = config.effective_indicator_interval() {
            report.add_default("indicators.source_interval", fallback);
        }
    }
}

fn validate_normalizer(normalizer: &NormalizerSettings, report: &mut ValidationReport) {
    let threshold = normalizer.atm_threshold;
    if !(threshold.is_finite() && threshold > 0.0 && threshold <= 0.5) {
        report.add_error(ValidationError::OutOfRange {
            field: "normalizer.atm_threshold".to_string(),
            min: 0.0,
            max: 0.5,
            value: threshold,
        });
    }

    if !(normalizer.default_multiplier.is_finite() && normalizer.default_multiplier > 0.0) {
        report.add_error(ValidationError::InvalidPositiveFloat {
            field: "normalizer.default_multiplier".to_string(),
        });
    }
}

fn validate_buffer(buffer: &BufferSettings, report: &mut ValidationReport) {
    require_positive(buffer.capacity_per_topic as u64, "buffer.capacity_per_topic", report);
    require_positive(
        buffer.persistence_queue_capacity as u64,
        "buffer.persistence_queue_capacity",
        report,
    );
    require_positive(buffer.retention_ms, "buffer.retention_ms", report);

    if buffer.capacity_per_topic > 1_000_000 {
        report.add_warning(
            "buffer.capacity_per_topic",
            "very large ring buffers defeat the bounded-memory guarantee",
        );
    }
}

fn validate_risk(risk: &RiskSettings, report: &mut ValidationReport) {
    if !risk.risk_free_rate.is_finite() || risk.risk_free_rate.abs() > 1.0 {
        report.add_error(ValidationError::OutOfRange {
            field: "risk.risk_free_rate".to_string(),
            min: -1.0,
            max: 1.0,
            value: risk.risk_free_rate,
        });
    }

    if !(risk.default_volatility.is_finite() && risk.default_volatility > 0.0) {
        report.add_error(ValidationError::InvalidPositiveFloat {
            field: "risk.default_volatility".to_string(),
        });
    }
}

fn validate_compute(compute: &ComputeSettings, report: &mut ValidationReport) {
    require_positive(compute.workers as u64, "compute.workers", report);
    require_positive(compute.queue_capacity as u64, "compute.queue_capacity", report);
    require_positive(compute.default_timeout_ms, "compute.default_timeout_ms", report);

    if compute.workers > 64 {
        report.add_warning("compute.workers", "more than 64 compute workers configured");
    }
}
