//! Export coordinator - orchestrates the parallel partition export
//!
//! The coordinator is responsible for:
//! - Checking credentials before any fetch
//! - Setting up the key queue, aggregator and workers
//! - Progress reporting and deadline enforcement
//! - Graceful shutdown on interrupt
//! - Freezing the column union and rendering the CSV

use crate::config::ExportConfig;
use crate::error::{ExportError, Result, WorkerError};
use crate::export::queue::KeyQueue;
use crate::export::worker::{aggregate_stats, FatalSlot, Worker, WorkerTotals};
use crate::keys::KeySource;
use crate::output::{write_csv, Aggregate, Aggregator, KeyStatus};
use crate::table::{
    PageFetcher, PartitionKey, RetryPolicy, ShutdownAwareSleeper, Sleeper, TableTransport,
    TokenProvider,
};
use chrono::Utc;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How often the coordinator polls workers and refreshes progress
const CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// Lifecycle of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Running,
    Draining,
    Rendering,
    Complete,
    Failed,
}

impl RunPhase {
    /// Check whether moving to `to` is allowed
    pub fn can_transition(self, to: RunPhase) -> bool {
        use RunPhase::*;
        matches!(
            (self, to),
            (Idle, Running)
                | (Running, Draining)
                | (Draining, Rendering)
                | (Rendering, Complete)
                | (Running | Draining | Rendering, Failed)
        )
    }
}

/// How a run that produced output ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Every key exported
    Complete,

    /// Output written, some keys failed or were partial
    CompletedWithErrors,

    /// Interrupted or past the deadline; output holds what was fetched
    Cancelled,
}

impl RunStatus {
    /// Process exit code for this status
    pub fn exit_code(self) -> u8 {
        match self {
            RunStatus::Complete => 0,
            RunStatus::CompletedWithErrors | RunStatus::Cancelled => 2,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            RunStatus::Complete => "complete",
            RunStatus::CompletedWithErrors => "completed with errors",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

/// Result of a finished export
#[derive(Debug, Clone)]
pub struct ExportReport {
    /// Distinct keys in the input
    pub total_keys: usize,

    pub succeeded: usize,

    pub partial: usize,

    pub failed: usize,

    pub not_attempted: usize,

    /// Keys that did not fully succeed, in input order
    pub problems: Vec<(PartitionKey, KeyStatus)>,

    /// Rows written
    pub entities_exported: u64,

    /// Columns in the header
    pub columns: usize,

    /// Pages fetched
    pub pages: u64,

    /// Retries across all calls
    pub retries: u64,

    /// Response bytes downloaded
    pub bytes: u64,

    /// Size of the CSV file
    pub output_bytes: u64,

    pub output_path: PathBuf,

    pub duration: Duration,

    pub status: RunStatus,
}

/// Progress information for display
#[derive(Debug, Clone, Default)]
pub struct ExportProgress {
    /// Distinct keys in the input
    pub total_keys: usize,

    /// Keys finished (any outcome)
    pub keys_done: u64,

    /// Keys that failed
    pub failures: u64,

    pub pages: u64,

    pub entities: u64,

    pub retries: u64,

    /// Response bytes downloaded
    pub bytes: u64,

    /// Keys still queued
    pub queued: usize,

    pub active_workers: usize,

    pub total_workers: usize,

    pub elapsed: Duration,
}

impl ExportProgress {
    /// Calculate entities per second rate
    pub fn entities_per_second(&self) -> f64 {
        rate(self.entities, self.elapsed)
    }

    /// Calculate keys per second rate
    pub fn keys_per_second(&self) -> f64 {
        rate(self.keys_done, self.elapsed)
    }
}

fn rate(count: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        count as f64 / secs
    } else {
        0.0
    }
}

type ProgressCallback = Box<dyn Fn(&ExportProgress)>;

/// Coordinates the parallel export
pub struct ExportCoordinator {
    /// Configuration
    config: Arc<ExportConfig>,

    transport: Arc<dyn TableTransport>,

    credentials: Arc<dyn TokenProvider>,

    /// Retry policy handed to the fetcher
    policy: RetryPolicy,

    /// Backoff sleeper handed to the fetcher
    sleeper: Arc<dyn Sleeper>,

    /// Worker threads
    workers: Vec<Worker>,

    /// Shutdown signal
    shutdown: Arc<AtomicBool>,

    /// First fatal worker error
    fatal: FatalSlot,

    /// Current lifecycle phase
    phase: RunPhase,

    /// Progress sink, called every check interval
    progress: Option<ProgressCallback>,
}

impl ExportCoordinator {
    /// Create a new export coordinator
    pub fn new(
        config: ExportConfig,
        transport: Arc<dyn TableTransport>,
        credentials: Arc<dyn TokenProvider>,
    ) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let policy = config.retry_policy();

        Self {
            config: Arc::new(config),
            transport,
            credentials,
            policy,
            sleeper: Arc::new(ShutdownAwareSleeper::new(Arc::clone(&shutdown))),
            workers: Vec::new(),
            shutdown,
            fatal: FatalSlot::default(),
            phase: RunPhase::Idle,
            progress: None,
        }
    }

    /// Replace the retry policy derived from the configuration
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Replace the backoff sleeper
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Receive a progress snapshot every check interval
    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(&ExportProgress) + 'static,
    {
        self.progress = Some(Box::new(callback));
        self
    }

    /// Get a clone of the shutdown flag (for signal handlers)
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Run the export
    pub fn run(mut self, keys: KeySource) -> Result<ExportReport> {
        let start_time = Instant::now();
        self.transition(RunPhase::Running)?;

        info!(
            table = %self.config.table_url.to_display_string(),
            workers = self.config.worker_count,
            keys = keys.len(),
            "Starting export"
        );

        // Credentials must work before anything is fetched
        if let Err(e) = self
            .credentials
            .token()
            .and_then(|token| token.validate(Utc::now()))
        {
            return self.fail(e);
        }

        let keys = keys.into_keys();
        let total_keys = keys.len();

        let aggregator = match Aggregator::spawn(keys.clone(), self.config.worker_count * 4) {
            Ok(aggregator) => aggregator,
            Err(e) => return self.fail(e),
        };
        let queue = KeyQueue::new(&keys);

        if let Err(e) = self.spawn_workers(&queue, &aggregator) {
            self.shutdown.store(true, Ordering::SeqCst);
            self.join_workers();
            let _ = aggregator.finish();
            return self.fail(e);
        }

        let completed = self.wait_for_completion(&queue, total_keys, start_time);

        self.transition(RunPhase::Draining)?;
        let totals = self.join_workers();
        debug!(
            keys_taken = queue.stats().dequeued(),
            keys_left = queue.len(),
            "Key queue drained"
        );

        let aggregate = match aggregator.finish() {
            Ok(aggregate) => aggregate,
            Err(e) => return self.fail(e),
        };

        let fatal = self.fatal.lock().take();
        if let Some(error) = fatal {
            return self.fail(error);
        }

        let tally = Tally::from_aggregate(&aggregate);
        if !completed {
            warn!(
                not_attempted = tally.not_attempted,
                "Export cancelled, writing what was fetched"
            );
        } else if tally.succeeded == 0 && tally.partial == 0 && tally.failed > 0 {
            let first = tally
                .problems
                .first()
                .map(|(key, status)| format!("{}: {}", key, status.reason().unwrap_or_default()))
                .unwrap_or_default();
            return self.fail(ExportError::AllKeysFailed {
                count: tally.failed,
                first,
            });
        }

        self.transition(RunPhase::Rendering)?;
        let columns = aggregate.freeze_columns().freeze();
        let written = match write_csv(&self.config.output_path, &columns, aggregate.rows()) {
            Ok(written) => written,
            Err(e) => return self.fail(e),
        };
        self.transition(RunPhase::Complete)?;

        let status = if !completed {
            RunStatus::Cancelled
        } else if tally.failed > 0 || tally.partial > 0 {
            RunStatus::CompletedWithErrors
        } else {
            RunStatus::Complete
        };

        let duration = start_time.elapsed();
        info!(
            keys = total_keys,
            succeeded = tally.succeeded,
            failed = tally.failed,
            rows = written.rows,
            columns = written.columns,
            duration_secs = duration.as_secs(),
            status = status.label(),
            "Export finished"
        );

        Ok(ExportReport {
            total_keys,
            succeeded: tally.succeeded,
            partial: tally.partial,
            failed: tally.failed,
            not_attempted: tally.not_attempted,
            problems: tally.problems,
            entities_exported: written.rows,
            columns: written.columns,
            pages: totals.pages,
            retries: totals.retries,
            bytes: totals.bytes,
            output_bytes: written.bytes,
            output_path: self.config.output_path.clone(),
            duration,
            status,
        })
    }

    /// Move to the next phase, rejecting out-of-order transitions
    fn transition(&mut self, to: RunPhase) -> Result<()> {
        if !self.phase.can_transition(to) {
            return Err(WorkerError::InvalidTransition {
                from: self.phase,
                to,
            }
            .into());
        }
        debug!(from = ?self.phase, to = ?to, "Run phase");
        self.phase = to;
        Ok(())
    }

    /// Enter the failed phase and return the error
    fn fail<T>(&mut self, error: impl Into<ExportError>) -> Result<T> {
        let error = error.into();
        if self.phase.can_transition(RunPhase::Failed) {
            self.phase = RunPhase::Failed;
        }
        Err(error)
    }

    /// Spawn worker threads
    fn spawn_workers(&mut self, queue: &KeyQueue, aggregator: &Aggregator) -> Result<()> {
        let fetcher = Arc::new(PageFetcher::new(
            Arc::clone(&self.transport),
            Arc::clone(&self.credentials),
            self.policy.clone(),
            Arc::clone(&self.sleeper),
            self.config.timeout,
            Arc::clone(&self.shutdown),
        ));

        for id in 0..self.config.worker_count {
            let worker = Worker::spawn(
                id,
                queue.receiver(),
                Arc::clone(&fetcher),
                aggregator.handle(),
                Arc::clone(&self.fatal),
                Arc::clone(&self.shutdown),
            )?;

            self.workers.push(worker);
        }

        debug!(count = self.workers.len(), "Workers spawned");
        Ok(())
    }

    /// Wait for every worker to finish or for the run to be cancelled
    ///
    /// Returns false when shutdown was raised before the queue drained.
    fn wait_for_completion(&self, queue: &KeyQueue, total_keys: usize, start: Instant) -> bool {
        loop {
            self.report_progress(queue, total_keys, start.elapsed());

            if self.workers.iter().all(Worker::is_finished) {
                return !self.shutdown.load(Ordering::SeqCst);
            }

            if self.shutdown.load(Ordering::Relaxed) {
                info!("Shutdown signal received");
                return false;
            }

            if let Some(deadline) = self.config.deadline {
                if start.elapsed() >= deadline {
                    warn!(deadline_secs = deadline.as_secs(), "Deadline reached, cancelling");
                    self.shutdown.store(true, Ordering::SeqCst);
                    return false;
                }
            }

            thread::sleep(CHECK_INTERVAL);
        }
    }

    fn report_progress(&self, queue: &KeyQueue, total_keys: usize, elapsed: Duration) {
        let Some(callback) = &self.progress else {
            return;
        };

        let mut progress = ExportProgress {
            total_keys,
            queued: queue.len(),
            active_workers: queue.active_workers(),
            total_workers: self.workers.len(),
            elapsed,
            ..Default::default()
        };

        for worker in &self.workers {
            let stats = worker.stats();
            progress.keys_done += stats.keys.load(Ordering::Relaxed);
            progress.failures += stats.failures.load(Ordering::Relaxed);
            progress.pages += stats.pages.load(Ordering::Relaxed);
            progress.entities += stats.entities.load(Ordering::Relaxed);
            progress.retries += stats.retries.load(Ordering::Relaxed);
            progress.bytes += stats.bytes.load(Ordering::Relaxed);
        }

        callback(&progress);
    }

    /// Join all worker threads and collect final stats
    fn join_workers(&mut self) -> WorkerTotals {
        let totals = aggregate_stats(&self.workers);

        let workers = std::mem::take(&mut self.workers);
        for worker in workers {
            if let Err(e) = worker.join() {
                warn!(error = %e, "Worker failed to join cleanly");
            }
        }

        totals
    }
}

/// Per-status key counts
struct Tally {
    succeeded: usize,
    partial: usize,
    failed: usize,
    not_attempted: usize,
    problems: Vec<(PartitionKey, KeyStatus)>,
}

impl Tally {
    fn from_aggregate(aggregate: &Aggregate) -> Self {
        let mut tally = Tally {
            succeeded: 0,
            partial: 0,
            failed: 0,
            not_attempted: 0,
            problems: Vec::new(),
        };

        for buffer in aggregate.buffers() {
            let status = buffer.status();
            match status {
                KeyStatus::Succeeded => {
                    tally.succeeded += 1;
                    continue;
                }
                KeyStatus::Partial { .. } => tally.partial += 1,
                KeyStatus::Failed { .. } => tally.failed += 1,
                KeyStatus::NotAttempted => tally.not_attempted += 1,
            }
            tally.problems.push((buffer.key.clone(), status));
        }

        tally
    }
}
