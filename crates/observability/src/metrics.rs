//! Prometheus metrics infrastructure
//!
//! Without an installed recorder every metric call below is a no-op, so the
//! engine can record unconditionally.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Initialize the Prometheus metrics exporter
///
/// Starts an HTTP listener on `port` that serves `/metrics`.
pub fn init_metrics(port: u16) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    tracing::info!(%addr, "Metrics server listening");
    Ok(())
}

/// Metrics for one engine instance
///
/// Every series carries an `engine` label so several instances can share a
/// recorder.
///
/// # Metrics
///
/// * `stream_events_published_total{family}` - events routed by the dispatcher
/// * `stream_handler_failures_total{family}` - subscriber errors and panics
/// * `stream_ingest_rejected_total{reason}` - malformed raw records
/// * `stream_window_flushes_total{kind}` - closed windows
/// * `stream_window_rejected_total{kind,reason}` - late or misaligned items
/// * `stream_buffer_evictions_total` - ring buffer overwrites
/// * `stream_persistence_failures_total` - durable writes that were dropped
/// * `stream_compute_requests_total{job}` / `stream_compute_timeouts_total{job}`
/// * `stream_compute_duration_seconds{job}` - time a job spent executing on a worker
/// * `stream_subscribers` - registered subscriptions
#[derive(Debug, Clone)]
pub struct EngineMetrics {
    engine: String,
}

impl EngineMetrics {
    /// Create metrics for a named engine instance
    pub fn new(engine_name: &str) -> Self {
        Self {
            engine: engine_name.to_string(),
        }
    }

    pub fn event_published(&self, family: &str) {
        counter!(
            "stream_events_published_total",
            "engine" => self.engine.clone(),
            "family" => family.to_string()
        )
        .increment(1);
    }

    pub fn handler_failed(&self, family: &str) {
        counter!(
            "stream_handler_failures_total",
            "engine" => self.engine.clone(),
            "family" => family.to_string()
        )
        .increment(1);
    }

    pub fn ingest_rejected(&self, reason: &str) {
        counter!(
            "stream_ingest_rejected_total",
            "engine" => self.engine.clone(),
            "reason" => reason.to_string()
        )
        .increment(1);
    }

    pub fn window_flushed(&self, kind: &str) {
        counter!(
            "stream_window_flushes_total",
            "engine" => self.engine.clone(),
            "kind" => kind.to_string()
        )
        .increment(1);
    }

    /// A windowed item was discarded (`late` or `misaligned`)
    pub fn window_rejected(&self, kind: &str, reason: &str) {
        counter!(
            "stream_window_rejected_total",
            "engine" => self.engine.clone(),
            "kind" => kind.to_string(),
            "reason" => reason.to_string()
        )
        .increment(1);
    }

    pub fn buffer_evicted(&self) {
        counter!("stream_buffer_evictions_total", "engine" => self.engine.clone()).increment(1);
    }

    pub fn persistence_failed(&self) {
        counter!("stream_persistence_failures_total", "engine" => self.engine.clone())
            .increment(1);
    }

    pub fn compute_requested(&self, job: &str) {
        counter!(
            "stream_compute_requests_total",
            "engine" => self.engine.clone(),
            "job" => job.to_string()
        )
        .increment(1);
    }

    pub fn compute_timed_out(&self, job: &str) {
        counter!(
            "stream_compute_timeouts_total",
            "engine" => self.engine.clone(),
            "job" => job.to_string()
        )
        .increment(1);
    }

    pub fn record_compute_latency(&self, job: &str, duration: Duration) {
        histogram!(
            "stream_compute_duration_seconds",
            "engine" => self.engine.clone(),
            "job" => job.to_string()
        )
        .record(duration.as_secs_f64());
    }

    pub fn set_subscribers(&self, count: usize) {
        gauge!("stream_subscribers", "engine" => self.engine.clone()).set(count as f64);
    }

    /// Get the engine name
    pub fn engine_name(&self) -> &str {
        &self.engine
    }
}

/// Records compute latency for a job when dropped
///
/// # Example
///
/// ```ignore
/// let metrics = EngineMetrics::new("streamx");
/// {
///     let _timer = ComputeTimer::new(&metrics, "greeks_batch");
///     // ... run the job ...
/// }
/// ```
pub struct ComputeTimer<'a> {
    metrics: &'a EngineMetrics,
    job: &'a str,
    start: Instant,
}

impl<'a> ComputeTimer<'a> {
    pub fn new(metrics: &'a EngineMetrics, job: &'a str) -> Self {
        Self {
            metrics,
            job,
            start: Instant::now(),
        }
    }
}

impl Drop for ComputeTimer<'_> {
    fn drop(&mut self) {
        self.metrics
            .record_compute_latency(self.job, self.start.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_metrics_without_recorder() {
        // No recorder installed: calls must be harmless
        let metrics = EngineMetrics::new("test");
        metrics.event_published("trade");
        metrics.window_rejected("tumbling", "late");
        {
            let _timer = ComputeTimer::new(&metrics, "greeks_batch");
        }
        assert_eq!(metrics.engine_name(), "test");
    }
}
