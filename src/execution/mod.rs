//! Batch validation of many input files with configurable parallelism.
//!
//! This module sits "above" [`crate::matching`] and provides:
//!
//! - Parallel validation of independent files (schemas are shared read-only)
//! - Resource limits / throttling (in-flight files)
//! - Real-time metrics + observer hooks for monitoring

mod observer;
mod throttle;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};

use crate::error::{CsvxError, CsvxResult};
use crate::matching::{MatchOptions, SchemaRegistry, SchemaSelection, ValidatedDataset};

pub use observer::{
    ExecutionEvent, ExecutionMetrics, ExecutionMetricsSnapshot, ExecutionObserver, TracingExecutionObserver,
};

use throttle::FileThrottle;

/// Configuration for the [`ExecutionEngine`].
#[derive(Debug, Clone)]
pub struct ExecutionOptions {
    /// Number of worker threads used by the engine.
    ///
    /// If `None`, uses the platform's available parallelism.
    pub num_threads: Option<usize>,
    /// Upper bound on files validated at the same time.
    ///
    /// This is an additional throttle on top of `num_threads`.
    pub max_in_flight_files: usize,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        let n = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        Self {
            num_threads: Some(n),
            max_in_flight_files: n.max(1),
        }
    }
}

/// Outcome of validating one file in a batch.
#[derive(Debug)]
pub struct FileOutcome {
    pub path: PathBuf,
    pub result: CsvxResult<ValidatedDataset>,
}

impl FileOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    /// Process exit status for this file: 0 when valid, otherwise the error category's.
    pub fn exit_code(&self) -> i32 {
        self.result.as_ref().map_or_else(CsvxError::exit_code, |_| 0)
    }
}

/// Validates batches of files against a shared [`SchemaRegistry`].
pub struct ExecutionEngine {
    pool: ThreadPool,
    opts: ExecutionOptions,
    observer: Option<Arc<dyn ExecutionObserver>>,
    metrics: Arc<ExecutionMetrics>,
}

impl ExecutionEngine {
    /// Create a new engine with the given options.
    ///
    /// # Panics
    ///
    /// Panics if `max_in_flight_files == 0` or `num_threads == Some(0)`.
    pub fn new(opts: ExecutionOptions) -> Result<Self, ThreadPoolBuildError> {
        assert!(opts.max_in_flight_files > 0, "max_in_flight_files must be > 0");
        if let Some(n) = opts.num_threads {
            assert!(n > 0, "num_threads must be > 0 when set");
        }

        let n_threads = opts
            .num_threads
            .unwrap_or_else(|| std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1))
            .max(1);

        let pool = ThreadPoolBuilder::new()
            .num_threads(n_threads)
            .thread_name(|i| format!("csvx-worker-{i}"))
            .build()?;

        Ok(Self {
            pool,
            opts,
            observer: None,
            metrics: Arc::new(ExecutionMetrics::new()),
        })
    }

    /// Attach an observer for execution events (metrics/logging).
    pub fn with_observer(mut self, observer: Arc<dyn ExecutionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Get a handle to real-time execution metrics.
    pub fn metrics(&self) -> Arc<ExecutionMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Validate every path in parallel. Outcomes are returned in input order.
    ///
    /// Each file is matched independently with
    /// [`SchemaRegistry::match_and_validate`]; one file failing does not affect the others.
    pub fn validate_files(
        &self,
        registry: &SchemaRegistry,
        paths: &[PathBuf],
        selection: &SchemaSelection,
        options: &MatchOptions,
    ) -> Vec<FileOutcome> {
        self.pool
            .install(|| self.validate_files_impl(registry, paths, selection, options))
    }

    fn validate_files_impl(
        &self,
        registry: &SchemaRegistry,
        paths: &[PathBuf],
        selection: &SchemaSelection,
        options: &MatchOptions,
    ) -> Vec<FileOutcome> {
        let start = Instant::now();
        self.metrics.begin_run();
        self.emit(ExecutionEvent::RunStarted { files: paths.len() });

        let throttle = FileThrottle::new(self.opts.max_in_flight_files);
        let outcomes: Vec<FileOutcome> = paths
            .par_iter()
            .map(|path| {
                let permit = throttle.admit();
                let waited = permit.waited();
                if waited > Duration::ZERO {
                    self.metrics.on_throttle_wait(waited);
                    self.emit(ExecutionEvent::ThrottleWaited {
                        path: path.clone(),
                        duration: waited,
                        in_flight: permit.in_flight(),
                    });
                }

                self.metrics.on_file_start();
                self.emit(ExecutionEvent::FileStarted { path: path.clone() });

                let result = registry.match_and_validate(path, selection, options);
                let (schema, records) = match &result {
                    Ok(ds) => (Some(ds.schema_id.clone()), ds.record_count()),
                    Err(_) => (None, 0),
                };

                self.emit(ExecutionEvent::FileFinished {
                    path: path.clone(),
                    schema,
                    records,
                    ok: result.is_ok(),
                });
                self.metrics.on_file_end(records, result.is_ok());
                drop(permit);
                FileOutcome {
                    path: path.clone(),
                    result,
                }
            })
            .collect();

        self.metrics.end_run(start.elapsed());
        self.emit(ExecutionEvent::RunFinished {
            elapsed: start.elapsed(),
            metrics: self.metrics.snapshot(),
        });

        outcomes
    }

    fn emit(&self, event: ExecutionEvent) {
        if let Some(obs) = &self.observer {
            obs.on_event(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ExecutionEngine, ExecutionOptions};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::execution::{ExecutionEvent, ExecutionObserver};
    use crate::matching::{MatchOptions, SchemaRegistry, SchemaSelection};
    use crate::schema::loader::load_schema_from_str;

    const SCHEMA: &str = r#"{
        "@id": "counts",
        "rows": {
            "0": { "@isIdentityRow": true, "cols": ["count"] },
            "1": { "@repeat": true, "cols": [{ "@datatype": "integer" }] }
        }
    }"#;

    fn registry() -> SchemaRegistry {
        let mut r = SchemaRegistry::new();
        r.insert(load_schema_from_str(SCHEMA).unwrap()).unwrap();
        r
    }

    fn write_inputs(dir: &tempfile::TempDir, n: usize) -> Vec<PathBuf> {
        (0..n)
            .map(|i| {
                let p = dir.path().join(format!("in{i}.csv"));
                let body = if i % 5 == 4 {
                    "count\nx\n".to_string()
                } else {
                    format!("count\n{i}\n{}\n", i + 1)
                };
                std::fs::write(&p, body).unwrap();
                p
            })
            .collect()
    }

    struct ConcurrencyObserver {
        active: AtomicUsize,
        max_active: AtomicUsize,
    }

    impl ExecutionObserver for ConcurrencyObserver {
        fn on_event(&self, event: &ExecutionEvent) {
            match event {
                ExecutionEvent::FileStarted { .. } => {
                    let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
                    let _ = self.max_active.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(std::time::Duration::from_millis(2));
                }
                ExecutionEvent::FileFinished { .. } => {
                    let _ = self.active.fetch_sub(1, Ordering::SeqCst);
                }
                _ => {}
            }
        }
    }

    #[test]
    fn outcomes_keep_input_order_and_report_failures() {
        let dir = tempfile::tempdir().unwrap();
        let paths = write_inputs(&dir, 10);
        let engine = ExecutionEngine::new(ExecutionOptions {
            num_threads: Some(4),
            max_in_flight_files: 4,
        })
        .unwrap();

        let out = engine.validate_files(&registry(), &paths, &SchemaSelection::Auto, &MatchOptions::default());
        assert_eq!(out.len(), 10);
        for (i, o) in out.iter().enumerate() {
            assert_eq!(o.path, paths[i]);
            assert_eq!(o.is_ok(), i % 5 != 4, "file {i}");
        }
        assert_eq!(out[4].exit_code(), 1);
        assert_eq!(out[0].exit_code(), 0);

        let snap = engine.metrics().snapshot();
        assert_eq!(snap.files_started, 10);
        assert_eq!(snap.files_finished, 10);
        assert_eq!(snap.files_failed, 2);
        assert_eq!(snap.records_processed, 8 * 3);
        assert!(snap.elapsed.is_some());
    }

    #[test]
    fn max_in_flight_files_throttles_concurrency() {
        let dir = tempfile::tempdir().unwrap();
        let paths = write_inputs(&dir, 12);
        let observer = Arc::new(ConcurrencyObserver {
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        });
        let obs_trait: Arc<dyn ExecutionObserver> = observer.clone();
        let engine = ExecutionEngine::new(ExecutionOptions {
            num_threads: Some(4),
            max_in_flight_files: 1,
        })
        .unwrap()
        .with_observer(obs_trait);

        let out = engine.validate_files(&registry(), &paths, &SchemaSelection::Auto, &MatchOptions::default());
        assert_eq!(out.len(), 12);
        assert_eq!(observer.max_active.load(Ordering::SeqCst), 1);
        assert_eq!(engine.metrics().snapshot().max_active_files, 1);
    }
}
