use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// Execution events emitted by the batch engine.
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    RunStarted { files: usize },
    /// A file waited for an in-flight slot; `in_flight` counts it once admitted.
    ThrottleWaited {
        path: PathBuf,
        duration: Duration,
        in_flight: usize,
    },
    FileStarted { path: PathBuf },
    FileFinished {
        path: PathBuf,
        /// Schema the file matched, when it matched one.
        schema: Option<String>,
        records: usize,
        ok: bool,
    },
    RunFinished {
        elapsed: Duration,
        metrics: ExecutionMetricsSnapshot,
    },
}

/// Observer hook for execution events.
pub trait ExecutionObserver: Send + Sync {
    fn on_event(&self, event: &ExecutionEvent);
}

/// Logs execution events through `tracing` at debug level.
#[derive(Debug, Default)]
pub struct TracingExecutionObserver;

impl ExecutionObserver for TracingExecutionObserver {
    fn on_event(&self, event: &ExecutionEvent) {
        match event {
            ExecutionEvent::RunFinished { elapsed, metrics } => {
                tracing::info!(target: "csvx::execution", ?elapsed, %metrics, "batch finished");
            }
            other => tracing::debug!(target: "csvx::execution", event = ?other),
        }
    }
}

/// Real-time metrics for a batch run.
///
/// The engine updates these counters during execution; callers can snapshot them at any time.
pub struct ExecutionMetrics {
    run_id: AtomicU64,
    elapsed_ns: AtomicU64,

    records_processed: AtomicU64,
    files_started: AtomicU64,
    files_finished: AtomicU64,
    files_failed: AtomicU64,
    throttle_wait_ns: AtomicU64,

    active_files: AtomicUsize,
    max_active_files: AtomicUsize,
}

impl ExecutionMetrics {
    pub fn new() -> Self {
        Self {
            run_id: AtomicU64::new(0),
            elapsed_ns: AtomicU64::new(0),
            records_processed: AtomicU64::new(0),
            files_started: AtomicU64::new(0),
            files_finished: AtomicU64::new(0),
            files_failed: AtomicU64::new(0),
            throttle_wait_ns: AtomicU64::new(0),
            active_files: AtomicUsize::new(0),
            max_active_files: AtomicUsize::new(0),
        }
    }

    pub fn begin_run(&self) {
        let _ = self.run_id.fetch_add(1, Ordering::SeqCst);
        self.elapsed_ns.store(0, Ordering::SeqCst);
        self.records_processed.store(0, Ordering::SeqCst);
        self.files_started.store(0, Ordering::SeqCst);
        self.files_finished.store(0, Ordering::SeqCst);
        self.files_failed.store(0, Ordering::SeqCst);
        self.throttle_wait_ns.store(0, Ordering::SeqCst);
        self.active_files.store(0, Ordering::SeqCst);
        self.max_active_files.store(0, Ordering::SeqCst);
    }

    pub fn end_run(&self, elapsed: Duration) {
        self.elapsed_ns
            .store(elapsed.as_nanos().min(u64::MAX as u128) as u64, Ordering::SeqCst);
    }

    pub fn on_file_start(&self) {
        let _ = self.files_started.fetch_add(1, Ordering::SeqCst);
        let now = self.active_files.fetch_add(1, Ordering::SeqCst) + 1;
        update_max_usize(&self.max_active_files, now);
    }

    pub fn on_file_end(&self, records: usize, ok: bool) {
        let _ = self.records_processed.fetch_add(records as u64, Ordering::SeqCst);
        let _ = self.files_finished.fetch_add(1, Ordering::SeqCst);
        if !ok {
            let _ = self.files_failed.fetch_add(1, Ordering::SeqCst);
        }
        let _ = self.active_files.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn on_throttle_wait(&self, d: Duration) {
        let add = d.as_nanos().min(u64::MAX as u128) as u64;
        let _ = self.throttle_wait_ns.fetch_add(add, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> ExecutionMetricsSnapshot {
        let elapsed_ns = self.elapsed_ns.load(Ordering::SeqCst);
        ExecutionMetricsSnapshot {
            run_id: self.run_id.load(Ordering::SeqCst),
            elapsed: (elapsed_ns > 0).then(|| Duration::from_nanos(elapsed_ns)),
            records_processed: self.records_processed.load(Ordering::SeqCst),
            files_started: self.files_started.load(Ordering::SeqCst),
            files_finished: self.files_finished.load(Ordering::SeqCst),
            files_failed: self.files_failed.load(Ordering::SeqCst),
            throttle_wait: Duration::from_nanos(self.throttle_wait_ns.load(Ordering::SeqCst)),
            max_active_files: self.max_active_files.load(Ordering::SeqCst),
        }
    }
}

impl Default for ExecutionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn update_max_usize(dst: &AtomicUsize, now: usize) {
    let _ = dst.fetch_max(now, Ordering::SeqCst);
}

/// Immutable snapshot of [`ExecutionMetrics`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionMetricsSnapshot {
    pub run_id: u64,
    pub elapsed: Option<Duration>,
    pub records_processed: u64,
    pub files_started: u64,
    pub files_finished: u64,
    pub files_failed: u64,
    pub throttle_wait: Duration,
    pub max_active_files: usize,
}

impl fmt::Display for ExecutionMetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "run_id={}, records_processed={}, files={}/{}, failed={}, max_active_files={}, throttle_wait={:?}, elapsed={:?}",
            self.run_id,
            self.records_processed,
            self.files_finished,
            self.files_started,
            self.files_failed,
            self.max_active_files,
            self.throttle_wait,
            self.elapsed
        )
    }
}
