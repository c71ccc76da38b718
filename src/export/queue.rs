//! Partition key work queue
//!
//! Every key is pushed up front and the sending side is dropped, so the
//! channel disconnects once the last key is taken. Workers tell "nothing
//! yet" apart from "nothing ever again" through [`Next`].

use crate::table::types::PartitionKey;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// A key to export, tagged with its input position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyTask {
    /// Position in the deduplicated input
    pub index: usize,

    pub key: PartitionKey,
}

/// Statistics for the key queue
#[derive(Debug, Default)]
pub struct QueueStats {
    /// Keys taken by workers
    pub dequeued: AtomicU64,
}

impl QueueStats {
    pub fn dequeued(&self) -> u64 {
        self.dequeued.load(Ordering::Relaxed)
    }
}

/// Result of polling the queue
#[derive(Debug)]
pub enum Next {
    Task(KeyTask),

    /// Timed out, keys may still be in flight elsewhere
    Idle,

    /// Every key has been handed out
    Drained,
}

/// Seeded, closed queue of partition keys
pub struct KeyQueue {
    receiver: Receiver<KeyTask>,
    active_workers: Arc<AtomicUsize>,
    stats: Arc<QueueStats>,
}

impl KeyQueue {
    /// Create a queue holding every key, in order
    pub fn new(keys: &[PartitionKey]) -> Self {
        let (sender, receiver) = bounded(keys.len().max(1));
        // Capacity covers every key and the receiver is alive
        let mut seeded = 0usize;
        for (index, key) in keys.iter().enumerate() {
            let task = KeyTask {
                index,
                key: key.clone(),
            };
            if sender.try_send(task).is_ok() {
                seeded += 1;
            }
        }
        debug!(keys = seeded, "Key queue seeded");

        Self {
            receiver,
            active_workers: Arc::new(AtomicUsize::new(0)),
            stats: Arc::new(QueueStats::default()),
        }
    }

    /// Get a receiver for this queue (clone for each worker)
    pub fn receiver(&self) -> KeyReceiver {
        KeyReceiver {
            receiver: self.receiver.clone(),
            active_workers: Arc::clone(&self.active_workers),
            stats: Arc::clone(&self.stats),
        }
    }

    pub fn stats(&self) -> Arc<QueueStats> {
        Arc::clone(&self.stats)
    }

    /// Keys not yet taken
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Workers currently exporting a key
    pub fn active_workers(&self) -> usize {
        self.active_workers.load(Ordering::SeqCst)
    }
}

/// Handle for taking keys from the queue
#[derive(Clone)]
pub struct KeyReceiver {
    receiver: Receiver<KeyTask>,
    active_workers: Arc<AtomicUsize>,
    stats: Arc<QueueStats>,
}

impl KeyReceiver {
    /// Wait up to `timeout` for the next key
    pub fn recv_timeout(&self, timeout: Duration) -> Next {
        match self.receiver.recv_timeout(timeout) {
            Ok(task) => {
                self.stats.dequeued.fetch_add(1, Ordering::Relaxed);
                Next::Task(task)
            }
            Err(RecvTimeoutError::Timeout) => Next::Idle,
            Err(RecvTimeoutError::Disconnected) => Next::Drained,
        }
    }

    fn begin_work(&self) {
        self.active_workers.fetch_add(1, Ordering::SeqCst);
    }

    fn end_work(&self) {
        self.active_workers.fetch_sub(1, Ordering::SeqCst);
    }
}

/// RAII guard for marking work as active
pub struct WorkGuard<'a> {
    receiver: &'a KeyReceiver,
}

impl<'a> WorkGuard<'a> {
    pub fn new(receiver: &'a KeyReceiver) -> Self {
        receiver.begin_work();
        Self { receiver }
    }
}

impl<'a> Drop for WorkGuard<'a> {
    fn drop(&mut self) {
        self.receiver.end_work();
    }
}
