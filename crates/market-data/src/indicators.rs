//! Trailing indicators over candle closes
//!
//! Each indicator yields `None` ("insufficient data") until it has seen
//! enough samples. A non-finite sample resets that indicator only.

use std::collections::VecDeque;

use common::TimestampMs;
use serde::{Deserialize, Serialize};

use crate::error::MarketDataError;
use crate::Result;

/// Incremental indicator fed one value at a time
pub trait Indicator {
    type Output;

    fn name(&self) -> &str;

    /// Fold in `value` and return the current reading
    fn update(&mut self, value: f64) -> Result<Option<Self::Output>>;

    fn reset(&mut self);
}

fn check_period(period: usize, name: &str) -> Result<()> {
    if period == 0 {
        return Err(MarketDataError::InvalidInput(format!(
            "{} period must be > 0",
            name
        )));
    }
    Ok(())
}

fn non_finite(name: &str, value: f64) -> MarketDataError {
    MarketDataError::InvalidInput(format!("{} received non-finite value {}", name, value))
}

/// Last `period` values with a running sum
///
/// The sum is rebuilt from the values once per `period` pushes so rounding
/// error from subtracting evicted values cannot accumulate.
#[derive(Debug, Clone)]
struct Trailing {
    period: usize,
    values: VecDeque<f64>,
    sum: f64,
    since_resum: usize,
}

impl Trailing {
    fn new(period: usize) -> Self {
        Self {
            period,
            values: VecDeque::with_capacity(period),
            sum: 0.0,
            since_resum: 0,
        }
    }

    fn push(&mut self, value: f64) {
        if self.values.len() == self.period {
            if let Some(oldest) = self.values.pop_front() {
                self.sum -= oldest;
            }
        }
        self.values.push_back(value);
        self.sum += value;
        self.since_resum += 1;
        if self.since_resum >= self.period {
            self.sum = self.values.iter().sum();
            self.since_resum = 0;
        }
    }

    fn is_full(&self) -> bool {
        self.values.len() == self.period
    }

    fn mean(&self) -> Option<f64> {
        self.is_full().then(|| self.sum / self.period as f64)
    }

    /// Population standard deviation around `mean`
    fn stddev(&self, mean: f64) -> f64 {
        let variance = self
            .values
            .iter()
            .map(|v| (v - mean) * (v - mean))
            .sum::<f64>()
            / self.period as f64;
        variance.sqrt()
    }

    fn clear(&mut self) {
        self.values.clear();
        self.sum = 0.0;
        self.since_resum = 0;
    }
}

/// Simple moving average
#[derive(Debug, Clone)]
pub struct Sma {
    name: String,
    window: Trailing,
}

impl Sma {
    pub fn new(period: usize) -> Result<Self> {
        check_period(period, "SMA")?;
        Ok(Self {
            name: format!("sma_{}", period),
            window: Trailing::new(period),
        })
    }

    pub fn period(&self) -> usize {
        self.window.period
    }
}

impl Indicator for Sma {
    type Output = f64;

    fn name(&self) -> &str {
        &self.name
    }

    fn update(&mut self, value: f64) -> Result<Option<f64>> {
        if !value.is_finite() {
            self.reset();
            return Err(non_finite(&self.name, value));
        }
        self.window.push(value);
        Ok(self.window.mean())
    }

    fn reset(&mut self) {
        self.window.clear();
    }
}

/// Exponential moving average, seeded by the first value
#[derive(Debug, Clone)]
pub struct Ema {
    name: String,
    period: usize,
    multiplier: f64,
    value: Option<f64>,
}

impl Ema {
    pub fn new(period: usize) -> Result<Self> {
        check_period(period, "EMA")?;
        Ok(Self {
            name: format!("ema_{}", period),
            period,
            multiplier: 2.0 / (period as f64 + 1.0),
            value: None,
        })
    }

    pub fn period(&self) -> usize {
        self.period
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }
}

impl Indicator for Ema {
    type Output = f64;

    fn name(&self) -> &str {
        &self.name
    }

    fn update(&mut self, value: f64) -> Result<Option<f64>> {
        if !value.is_finite() {
            self.reset();
            return Err(non_finite(&self.name, value));
        }
        let next = match self.value {
            Some(ema) => (value - ema) * self.multiplier + ema,
            None => value,
        };
        self.value = Some(next);
        Ok(Some(next))
    }

    fn reset(&mut self) {
        self.value = None;
    }
}

/// Bollinger band reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BollingerBands {
    pub middle: f64,
    pub upper: f64,
    pub lower: f64,
    /// `(upper - lower) / middle`; zero when the middle band is zero
    pub bandwidth: f64,
}

/// Bollinger bands: SMA(n) ± k population standard deviations
#[derive(Debug, Clone)]
pub struct Bollinger {
    name: String,
    k: f64,
    window: Trailing,
}

impl Bollinger {
    pub fn new(period: usize, k: f64) -> Result<Self> {
        check_period(period, "Bollinger")?;
        if !(k.is_finite() && k > 0.0) {
            return Err(MarketDataError::InvalidInput(format!(
                "Bollinger k must be positive, got {}",
                k
            )));
        }
        Ok(Self {
            name: format!("bb_{}_{}", period, k),
            k,
            window: Trailing::new(period),
        })
    }
}

impl Indicator for Bollinger {
    type Output = BollingerBands;

    fn name(&self) -> &str {
        &self.name
    }

    fn update(&mut self, value: f64) -> Result<Option<BollingerBands>> {
        if !value.is_finite() {
            self.reset();
            return Err(non_finite(&self.name, value));
        }
        self.window.push(value);

        let Some(middle) = self.window.mean() else {
            return Ok(None);
        };
        let width = self.k * self.window.stddev(middle);
        let bandwidth = if middle != 0.0 {
            2.0 * width / middle
        } else {
            0.0
        };

        Ok(Some(BollingerBands {
            middle,
            upper: middle + width,
            lower: middle - width,
            bandwidth,
        }))
    }

    fn reset(&mut self) {
        self.window.clear();
    }
}

/// Payload published on `indicators:<timeframe>:<symbol>` per closed candle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub symbol: String,
    pub timeframe: String,
    pub timestamp: TimestampMs,
    pub close: f64,
    pub sma: Option<f64>,
    pub ema: Option<f64>,
    pub bollinger: Option<BollingerBands>,
}

/// SMA, EMA and Bollinger for one symbol
#[derive(Debug, Clone)]
pub struct IndicatorSet {
    sma: Sma,
    ema: Ema,
    bollinger: Bollinger,
}

impl IndicatorSet {
    pub fn new(sma_period: usize, ema_period: usize, bollinger_period: usize, k: f64) -> Result<Self> {
        Ok(Self {
            sma: Sma::new(sma_period)?,
            ema: Ema::new(ema_period)?,
            bollinger: Bollinger::new(bollinger_period, k)?,
        })
    }

    pub fn from_settings(settings: &config::IndicatorSettings) -> Result<Self> {
        Self::new(
            settings.sma_period,
            settings.ema_period,
            settings.bollinger_period,
            settings.bollinger_k,
        )
    }

    /// Feed one close into all three indicators
    ///
    /// A failing indicator is reset and reported; the others still update.
    pub fn update(
        &mut self,
        symbol: &str,
        timeframe: &str,
        timestamp: TimestampMs,
        close: f64,
    ) -> Result<IndicatorSnapshot> {
        let sma = self.sma.update(close);
        let ema = self.ema.update(close);
        let bollinger = self.bollinger.update(close);

        Ok(IndicatorSnapshot {
            symbol: symbol.to_string(),
            timeframe: timeframe.to_string(),
            timestamp,
            close,
            sma: sma?,
            ema: ema?,
            bollinger: bollinger?,
        })
    }
}
