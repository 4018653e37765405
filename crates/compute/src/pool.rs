//! Bounded worker pool with correlation-id routing
//!
//! ```text
//!  submit ──try_acquire(admission)──▶ task ──acquire(worker)──▶ spawn_blocking(job)
//!    │                                                              │
//!    └── slot(id) ◀──────────── oneshot(result) ◀──── lookup(id) ───┘
//! ```
//!
//! Jobs run on tokio's blocking threads. One semaphore caps how many run at
//! once (`workers`), a second caps how many may be waiting or running
//! (`workers + queue_capacity`); a submit that finds no admission permit is
//! refused rather than queued. Jobs are moved into the pool and results moved
//! back out, so jobs never touch engine state. A caller that stops waiting
//! frees its slot; a result finishing for a freed slot is dropped.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use common::CorrelationId;
use config::ComputeSettings;
use observability::{ComputeTimer, EngineMetrics};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{oneshot, OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::{debug, info, warn};

use crate::error::ComputeError;
use crate::Result;

/// A self-contained unit of heavy work
///
/// Jobs own all of their inputs so they can run on another thread without
/// borrowing engine state.
pub trait ComputeJob: Send + 'static {
    type Output: Send + 'static;

    /// Short label used in logs and metrics
    fn kind(&self) -> &'static str;

    fn execute(self) -> anyhow::Result<Self::Output>;
}

type Slots<T> = Arc<Mutex<HashMap<CorrelationId, oneshot::Sender<Result<T>>>>>;

pub struct ComputePool<J: ComputeJob> {
    /// Waiting plus running jobs
    admission: Arc<Semaphore>,
    /// Running jobs
    workers: Arc<Semaphore>,
    slots: Slots<J::Output>,
    default_timeout: Duration,
    metrics: EngineMetrics,
}

impl<J: ComputeJob> std::fmt::Debug for ComputePool<J> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputePool")
            .field("default_timeout", &self.default_timeout)
            .finish_non_exhaustive()
    }
}

impl<J: ComputeJob> ComputePool<J> {
    /// Size the pool; nothing runs until the first submit
    pub fn new(settings: &ComputeSettings, metrics: EngineMetrics) -> Result<Self> {
        if settings.workers == 0 {
            return Err(ComputeError::InvalidSettings("workers must be at least 1".to_string()));
        }
        if settings.queue_capacity == 0 {
            return Err(ComputeError::InvalidSettings("queue_capacity must be at least 1".to_string()));
        }
        let admitted = settings
            .workers
            .checked_add(settings.queue_capacity)
            .filter(|n| *n <= Semaphore::MAX_PERMITS)
            .ok_or_else(|| ComputeError::InvalidSettings("workers + queue_capacity is too large".to_string()))?;

        info!(
            workers = settings.workers,
            queue_capacity = settings.queue_capacity,
            "Compute pool started"
        );

        Ok(Self {
            admission: Arc::new(Semaphore::new(admitted)),
            workers: Arc::new(Semaphore::new(settings.workers)),
            slots: Arc::new(Mutex::new(HashMap::new())),
            default_timeout: Duration::from_millis(settings.default_timeout_ms),
            metrics,
        })
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Requests awaiting a response
    pub fn in_flight(&self) -> usize {
        self.slots.lock().len()
    }

    /// Queue a job without waiting for it
    ///
    /// Fails fast with [`ComputeError::QueueFull`] rather than blocking the
    /// caller when the pool is saturated. Must be called from within a tokio
    /// runtime.
    pub fn submit(&self, job: J) -> Result<PendingResult<J::Output>> {
        let kind = job.kind();
        let runtime = Handle::try_current().map_err(|e| ComputeError::Startup(e.to_string()))?;

        let admitted = match Arc::clone(&self.admission).try_acquire_owned() {
            Ok(permit) => permit,
            Err(TryAcquireError::NoPermits) => {
                warn!(kind, "Compute queue full, rejecting job");
                return Err(ComputeError::QueueFull { kind: kind.to_string() });
            }
            Err(TryAcquireError::Closed) => return Err(ComputeError::Shutdown),
        };

        let id = CorrelationId::new();
        let (tx, rx) = oneshot::channel();
        self.slots.lock().insert(id, tx);

        runtime.spawn(run_job(
            id,
            job,
            admitted,
            Arc::clone(&self.workers),
            Arc::clone(&self.slots),
            self.metrics.clone(),
        ));

        self.metrics.compute_requested(kind);
        debug!(%id, kind, "Compute job queued");
        Ok(PendingResult {
            id,
            kind,
            rx,
            slots: Arc::clone(&self.slots),
            metrics: self.metrics.clone(),
        })
    }

    /// Run `job` on the pool and wait up to `timeout` for its result
    pub async fn calculate(&self, job: J, timeout: Duration) -> Result<J::Output> {
        self.submit(job)?.wait(timeout).await
    }

    /// [`Self::calculate`] with the configured default timeout
    pub async fn calculate_default(&self, job: J) -> Result<J::Output> {
        self.calculate(job, self.default_timeout).await
    }

    /// Stop accepting work; jobs already admitted still run and answer
    pub fn shutdown(self) {
        self.admission.close();
        info!(in_flight = self.in_flight(), "Compute pool stopped");
    }
}

impl<J: ComputeJob> Drop for ComputePool<J> {
    fn drop(&mut self) {
        self.admission.close();
    }
}

/// Handle to a submitted job
pub struct PendingResult<T> {
    id: CorrelationId,
    kind: &'static str,
    rx: oneshot::Receiver<Result<T>>,
    slots: Slots<T>,
    metrics: EngineMetrics,
}

impl<T> std::fmt::Debug for PendingResult<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingResult")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl<T> PendingResult<T> {
    pub fn correlation_id(&self) -> CorrelationId {
        self.id
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Wait for the response. On timeout the slot is released and whatever
    /// the job eventually produces is discarded.
    pub async fn wait(mut self, timeout: Duration) -> Result<T> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ComputeError::Shutdown),
            Err(_) => {
                self.metrics.compute_timed_out(self.kind);
                warn!(
                    id = %self.id,
                    kind = self.kind,
                    timeout_ms = timeout.as_millis() as u64,
                    "Compute job timed out"
                );
                Err(ComputeError::Timeout {
                    kind: self.kind.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }
}

impl<T> Drop for PendingResult<T> {
    fn drop(&mut self) {
        self.slots.lock().remove(&self.id);
    }
}

/// Wait for a worker permit, run the job on a blocking thread and route the
/// result to its slot
async fn run_job<J: ComputeJob>(
    id: CorrelationId,
    job: J,
    _admitted: OwnedSemaphorePermit,
    workers: Arc<Semaphore>,
    slots: Slots<J::Output>,
    metrics: EngineMetrics,
) {
    let kind = job.kind();
    let Ok(_running) = workers.acquire_owned().await else {
        return;
    };
    // Caller already gave up
    if !slots.lock().contains_key(&id) {
        debug!(%id, kind, "Skipping abandoned compute job");
        return;
    }

    let result = tokio::task::spawn_blocking(move || {
        let _timer = ComputeTimer::new(&metrics, kind);
        match catch_unwind(AssertUnwindSafe(|| job.execute())) {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(ComputeError::JobFailed {
                kind: kind.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(ComputeError::JobFailed {
                kind: kind.to_string(),
                reason: "job panicked".to_string(),
            }),
        }
    })
    .await
    .unwrap_or_else(|e| {
        Err(ComputeError::JobFailed {
            kind: kind.to_string(),
            reason: e.to_string(),
        })
    });

    let slot = slots.lock().remove(&id);
    match slot {
        Some(tx) => {
            if tx.send(result).is_err() {
                debug!(%id, "Caller went away, discarding compute response");
            }
        }
        None => debug!(%id, "Discarding late compute response"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::sync::mpsc::{self, Receiver};
    use std::thread;

    enum TestJob {
        Square(u64),
        Sleep(Duration),
        Fail,
        Panic,
        Gate {
            started: oneshot::Sender<()>,
            release: Receiver<()>,
        },
    }

    impl ComputeJob for TestJob {
        type Output = u64;

        fn kind(&self) -> &'static str {
            match self {
                TestJob::Square(_) => "square",
                TestJob::Sleep(_) => "sleep",
                TestJob::Fail => "fail",
                TestJob::Panic => "panic",
                TestJob::Gate { .. } => "gate",
            }
        }

        fn execute(self) -> anyhow::Result<u64> {
            match self {
                TestJob::Square(n) => Ok(n * n),
                TestJob::Sleep(d) => {
                    thread::sleep(d);
                    Ok(0)
                }
                TestJob::Fail => Err(anyhow::anyhow!("bad input")),
                TestJob::Panic => panic!("job exploded"),
                TestJob::Gate { started, release } => {
                    let _ = started.send(());
                    let _ = release.recv();
                    Ok(1)
                }
            }
        }
    }

    fn pool(workers: usize, queue_capacity: usize) -> ComputePool<TestJob> {
        let settings = ComputeSettings {
            workers,
            queue_capacity,
            default_timeout_ms: 1_000,
        };
        ComputePool::new(&settings, EngineMetrics::new("test")).unwrap()
    }

    #[tokio::test]
    async fn test_calculate_returns_result() {
        let pool = pool(2, 8);
        let out = pool.calculate(TestJob::Square(12), Duration::from_secs(1)).await;
        assert_eq!(out, Ok(144));
        assert_eq!(pool.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_many_jobs_each_get_their_own_result() {
        let pool = pool(3, 32);
        let pending: Vec<_> = (1..=10).map(|n| pool.submit(TestJob::Square(n)).unwrap()).collect();
        let mut results = Vec::new();
        for p in pending {
            results.push(p.wait(Duration::from_secs(1)).await.unwrap());
        }
        assert_eq!(results, (1..=10).map(|n| n * n).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_timeout_discards_late_response() {
        let pool = pool(1, 4);
        let result = pool
            .calculate(TestJob::Sleep(Duration::from_millis(200)), Duration::from_millis(20))
            .await;
        assert_matches!(result, Err(ComputeError::Timeout { ref kind, timeout_ms: 20 }) if kind == "sleep");
        assert_eq!(pool.in_flight(), 0);

        // The late response is dropped and the pool keeps serving
        let out = pool.calculate(TestJob::Square(3), Duration::from_secs(2)).await;
        assert_eq!(out, Ok(9));
    }

    #[tokio::test]
    async fn test_job_errors_and_panics_are_contained() {
        let pool = pool(1, 4);
        assert_matches!(
            pool.calculate(TestJob::Fail, Duration::from_secs(1)).await,
            Err(ComputeError::JobFailed { ref reason, .. }) if reason == "bad input"
        );
        assert_matches!(
            pool.calculate(TestJob::Panic, Duration::from_secs(1)).await,
            Err(ComputeError::JobFailed { .. })
        );
        assert_eq!(pool.calculate(TestJob::Square(4), Duration::from_secs(1)).await, Ok(16));
    }

    #[tokio::test]
    async fn test_full_queue_rejects_without_blocking() {
        let pool = pool(1, 1);
        let (started_tx, started_rx) = oneshot::channel();
        let (release_tx, release_rx) = mpsc::channel();

        let running = pool
            .submit(TestJob::Gate {
                started: started_tx,
                release: release_rx,
            })
            .unwrap();
        started_rx.await.unwrap();

        let queued = pool.submit(TestJob::Square(5)).unwrap();
        assert_matches!(
            pool.submit(TestJob::Square(6)),
            Err(ComputeError::QueueFull { ref kind }) if kind == "square"
        );

        release_tx.send(()).unwrap();
        assert_eq!(running.wait(Duration::from_secs(1)).await, Ok(1));
        assert_eq!(queued.wait(Duration::from_secs(1)).await, Ok(25));
    }

    #[test]
    fn test_invalid_settings() {
        let settings = ComputeSettings {
            workers: 0,
            queue_capacity: 1,
            default_timeout_ms: 10,
        };
        assert_matches!(
            ComputePool::<TestJob>::new(&settings, EngineMetrics::new("test")),
            Err(ComputeError::InvalidSettings(_))
        );
    }

    #[tokio::test]
    async fn test_shutdown_lets_admitted_work_finish() {
        let pool = pool(1, 4);
        let pending = pool.submit(TestJob::Square(7)).unwrap();
        pool.shutdown();
        assert_eq!(pending.wait(Duration::from_secs(1)).await, Ok(49));
    }

    #[tokio::test]
    async fn test_closed_pool_refuses_work() {
        let pool = pool(1, 4);
        pool.admission.close();
        assert_matches!(pool.submit(TestJob::Square(2)), Err(ComputeError::Shutdown));
        assert_eq!(pool.in_flight(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_workers_bound_concurrency() {
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = Arc::new(Mutex::new(release_rx));

        struct Blocker {
            started: mpsc::Sender<()>,
            release: Arc<Mutex<Receiver<()>>>,
        }
        impl ComputeJob for Blocker {
            type Output = ();
            fn kind(&self) -> &'static str {
                "blocker"
            }
            fn execute(self) -> anyhow::Result<()> {
                let _ = self.started.send(());
                let _ = self.release.lock().recv();
                Ok(())
            }
        }

        let settings = ComputeSettings {
            workers: 2,
            queue_capacity: 8,
            default_timeout_ms: 1_000,
        };
        let blockers: ComputePool<Blocker> = ComputePool::new(&settings, EngineMetrics::new("test")).unwrap();
        let pending: Vec<_> = (0..3)
            .map(|_| {
                blockers
                    .submit(Blocker {
                        started: started_tx.clone(),
                        release: Arc::clone(&release_rx),
                    })
                    .unwrap()
            })
            .collect();

        started_rx.recv_timeout(Duration::from_secs(1)).unwrap();
        started_rx.recv_timeout(Duration::from_secs(1)).unwrap();
        // Third job waits for a worker
        assert!(started_rx.recv_timeout(Duration::from_millis(50)).is_err());

        for _ in 0..3 {
            release_tx.send(()).unwrap();
        }
        for p in pending {
            assert_eq!(p.wait(Duration::from_secs(1)).await, Ok(()));
        }
        assert_eq!(blockers.in_flight(), 0);
    }

    #[test]
    fn test_submit_needs_a_runtime() {
        let pool = pool(1, 1);
        assert_matches!(pool.submit(TestJob::Square(2)), Err(ComputeError::Startup(_)));
    }
}
