//! Worker thread logic for parallel key export
//!
//! Each worker:
//! - Pulls partition keys from the shared key queue
//! - Fetches every page of the key through the shared [`PageFetcher`]
//! - Forwards pages to the aggregator as they arrive
//! - Reports one outcome per key and moves on, whatever happened

use crate::error::{AuthError, FetchError, KeyFailure, KeyOutcome, WorkerError};
use crate::export::queue::{KeyReceiver, KeyTask, Next, WorkGuard};
use crate::output::AggregatorHandle;
use crate::table::{FetchSummary, PageFetcher};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Slot for the first run-aborting error raised by any worker
pub type FatalSlot = Arc<Mutex<Option<AuthError>>>;

/// How long a worker waits on the queue before rechecking shutdown
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Statistics collected by a worker
#[derive(Debug, Default)]
pub struct WorkerStats {
    /// Keys finished (any outcome)
    pub keys: AtomicU64,

    /// Pages received
    pub pages: AtomicU64,

    /// Entities received
    pub entities: AtomicU64,

    /// Retries spent
    pub retries: AtomicU64,

    /// Keys that ended in a failure
    pub failures: AtomicU64,

    /// Response bytes downloaded
    pub bytes: AtomicU64,
}

impl WorkerStats {
    fn record_page(&self, entities: u64) {
        self.pages.fetch_add(1, Ordering::Relaxed);
        self.entities.fetch_add(entities, Ordering::Relaxed);
    }

    fn record_success(&self, summary: &FetchSummary) {
        self.keys.fetch_add(1, Ordering::Relaxed);
        self.retries.fetch_add(summary.retries, Ordering::Relaxed);
        self.bytes.fetch_add(summary.bytes, Ordering::Relaxed);
    }

    fn record_failure(&self, failure: &KeyFailure) {
        self.keys.fetch_add(1, Ordering::Relaxed);
        self.failures.fetch_add(1, Ordering::Relaxed);
        self.retries.fetch_add(failure.retries, Ordering::Relaxed);
    }
}

/// Totals across all workers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerTotals {
    pub keys: u64,
    pub pages: u64,
    pub entities: u64,
    pub retries: u64,
    pub failures: u64,
    pub bytes: u64,
}

/// A worker thread that exports partition keys
pub struct Worker {
    /// Worker ID
    id: usize,

    /// Thread handle
    handle: Option<JoinHandle<Result<(), WorkerError>>>,

    /// Worker statistics
    stats: Arc<WorkerStats>,
}

impl Worker {
    /// Spawn a new worker thread
    pub fn spawn(
        id: usize,
        queue: KeyReceiver,
        fetcher: Arc<PageFetcher>,
        aggregator: AggregatorHandle,
        fatal: FatalSlot,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Self, WorkerError> {
        let stats = Arc::new(WorkerStats::default());
        let stats_clone = Arc::clone(&stats);

        let handle = thread::Builder::new()
            .name(format!("export-{}", id))
            .spawn(move || {
                worker_loop(id, queue, fetcher, aggregator, fatal, shutdown, stats_clone)
            })
            .map_err(|e| WorkerError::InitFailed {
                id,
                reason: e.to_string(),
            })?;

        Ok(Self {
            id,
            handle: Some(handle),
            stats,
        })
    }

    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    /// True once the thread has returned
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Wait for the worker to finish
    pub fn join(mut self) -> Result<(), WorkerError> {
        if let Some(handle) = self.handle.take() {
            match handle.join() {
                Ok(result) => result,
                Err(_) => Err(WorkerError::Panicked {
                    id: self.id,
                    message: "Worker thread panicked".into(),
                }),
            }
        } else {
            Ok(())
        }
    }
}

/// Main worker loop
fn worker_loop(
    id: usize,
    queue: KeyReceiver,
    fetcher: Arc<PageFetcher>,
    aggregator: AggregatorHandle,
    fatal: FatalSlot,
    shutdown: Arc<AtomicBool>,
    stats: Arc<WorkerStats>,
) -> Result<(), WorkerError> {
    debug!(worker = id, "Worker starting");

    while !shutdown.load(Ordering::Relaxed) {
        let task = match queue.recv_timeout(POLL_INTERVAL) {
            Next::Task(task) => task,
            Next::Idle => continue,
            Next::Drained => break,
        };

        let _guard = WorkGuard::new(&queue);
        export_key(id, &task, &fetcher, &aggregator, &fatal, &shutdown, &stats);
    }

    debug!(
        worker = id,
        keys = stats.keys.load(Ordering::Relaxed),
        entities = stats.entities.load(Ordering::Relaxed),
        "Worker shutting down"
    );

    Ok(())
}

/// Export a single key and report its outcome
fn export_key(
    worker_id: usize,
    task: &KeyTask,
    fetcher: &PageFetcher,
    aggregator: &AggregatorHandle,
    fatal: &FatalSlot,
    shutdown: &AtomicBool,
    stats: &WorkerStats,
) {
    let result = fetcher.fetch(&task.key, |page| {
        stats.record_page(page.entities.len() as u64);
        if let Err(e) = aggregator.send_page(task.index, page.entities) {
            error!(worker = worker_id, key = %task.key, error = %e, "Failed to forward page");
        }
    });

    match &result {
        Ok(summary) => {
            stats.record_success(summary);
            trace!(
                worker = worker_id,
                key = %task.key,
                pages = summary.pages,
                entities = summary.entities,
                "Key exported"
            );
        }
        // Stopped before any call went out: leave it as not attempted
        Err(failure) if is_untouched(failure) => {
            debug!(worker = worker_id, key = %task.key, "Key cancelled before first page");
            return;
        }
        Err(failure) => {
            stats.record_failure(failure);
            if let FetchError::Auth(auth) = &failure.error {
                error!(
                    worker = worker_id,
                    key = %task.key,
                    error = %auth,
                    "Credentials rejected, aborting run"
                );
                let mut slot = fatal.lock();
                if slot.is_none() {
                    *slot = Some(auth.clone());
                }
                drop(slot);
                shutdown.store(true, Ordering::SeqCst);
            } else {
                warn!(
                    worker = worker_id,
                    key = %task.key,
                    pages = failure.pages,
                    error = %failure.error,
                    "Partition key failed"
                );
            }
        }
    }

    let outcome = KeyOutcome::from_result(&task.key, &result);
    if let Err(e) = aggregator.finish_key(task.index, outcome) {
        error!(worker = worker_id, key = %task.key, error = %e, "Failed to record key outcome");
    }
}

/// Cancelled before the first page and without spending any retries
fn is_untouched(failure: &KeyFailure) -> bool {
    matches!(failure.error, FetchError::Cancelled) && failure.pages == 0 && failure.retries == 0
}

/// Aggregate statistics from multiple workers
pub fn aggregate_stats(workers: &[Worker]) -> WorkerTotals {
    let mut totals = WorkerTotals::default();

    for worker in workers {
        totals.keys += worker.stats.keys.load(Ordering::Relaxed);
        totals.pages += worker.stats.pages.load(Ordering::Relaxed);
        totals.entities += worker.stats.entities.load(Ordering::Relaxed);
        totals.retries += worker.stats.retries.load(Ordering::Relaxed);
        totals.failures += worker.stats.failures.load(Ordering::Relaxed);
        totals.bytes += worker.stats.bytes.load(Ordering::Relaxed);
    }

    info!(
        keys = totals.keys,
        entities = totals.entities,
        failures = totals.failures,
        "Workers finished"
    );
    totals
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::types::PartitionKey;

    #[test]
    fn test_worker_stats() {
        let stats = WorkerStats::default();

        stats.record_page(10);
        stats.record_page(5);
        stats.record_success(&FetchSummary {
            pages: 2,
            entities: 15,
            retries: 1,
            bytes: 2048,
        });
        stats.record_failure(&KeyFailure {
            key: PartitionKey::new("B"),
            error: FetchError::Malformed("bad".into()),
            pages: 0,
            entities: 0,
            retries: 3,
        });

        assert_eq!(stats.keys.load(Ordering::Relaxed), 2);
        assert_eq!(stats.pages.load(Ordering::Relaxed), 2);
        assert_eq!(stats.entities.load(Ordering::Relaxed), 15);
        assert_eq!(stats.retries.load(Ordering::Relaxed), 4);
        assert_eq!(stats.failures.load(Ordering::Relaxed), 1);
        assert_eq!(stats.bytes.load(Ordering::Relaxed), 2048);
    }

    #[test]
    fn test_cancelled_key_classification() {
        let cancelled = |pages, retries| KeyFailure {
            key: PartitionKey::new("A"),
            error: FetchError::Cancelled,
            pages,
            entities: 0,
            retries,
        };

        assert!(is_untouched(&cancelled(0, 0)));
        assert!(!is_untouched(&cancelled(0, 2)));
        assert!(!is_untouched(&cancelled(1, 0)));

        let mut rejected = cancelled(0, 0);
        rejected.error = FetchError::Malformed("bad".into());
        assert!(!is_untouched(&rejected));
    }
}
