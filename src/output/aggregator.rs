//! Single-owner aggregation of fetched entities
//!
//! Workers never touch merge state directly. They send pages and per-key
//! outcomes over a bounded channel to a dedicated thread, which buffers
//! entities per key and grows each key's column set.
//!
//! Buffers are indexed by the key's position in the input, and the final
//! column union is merged in that order, so the output does not depend on
//! which worker finished first.

use crate::error::{KeyOutcome, OutputError, OutputResult};
use crate::output::columns::ColumnSet;
use crate::table::types::{Entity, PartitionKey};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// Message types sent to the aggregator thread
#[derive(Debug)]
pub enum AggregatorMessage {
    /// Entities from one page of a key
    Page {
        key_index: usize,
        entities: Vec<Entity>,
    },

    /// A key is done (successfully or not)
    KeyFinished { key_index: usize, outcome: KeyOutcome },

    /// Drain and stop
    Shutdown,
}

/// Statistics about aggregation
#[derive(Debug, Default)]
pub struct AggregatorStats {
    /// Entities buffered
    pub entities_received: AtomicU64,

    /// Pages received
    pub pages_received: AtomicU64,

    /// Keys with a recorded outcome
    pub keys_finished: AtomicU64,
}

impl AggregatorStats {
    pub fn entities_received(&self) -> u64 {
        self.entities_received.load(Ordering::Relaxed)
    }

    pub fn keys_finished(&self) -> u64 {
        self.keys_finished.load(Ordering::Relaxed)
    }
}

/// Handle for sending messages to the aggregator
#[derive(Clone)]
pub struct AggregatorHandle {
    sender: Sender<AggregatorMessage>,
    stats: Arc<AggregatorStats>,
}

impl AggregatorHandle {
    /// Forward one page of entities
    pub fn send_page(&self, key_index: usize, entities: Vec<Entity>) -> OutputResult<()> {
        self.sender
            .send(AggregatorMessage::Page {
                key_index,
                entities,
            })
            .map_err(|_| OutputError::ChannelClosed)
    }

    /// Record the outcome of a key
    pub fn finish_key(&self, key_index: usize, outcome: KeyOutcome) -> OutputResult<()> {
        self.sender
            .send(AggregatorMessage::KeyFinished { key_index, outcome })
            .map_err(|_| OutputError::ChannelClosed)
    }

    pub fn stats(&self) -> &AggregatorStats {
        &self.stats
    }
}

/// Final state of a key in the summary
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyStatus {
    Succeeded,
    Partial { reason: String },
    Failed { reason: String },
    NotAttempted,
}

impl KeyStatus {
    pub fn reason(&self) -> Option<&str> {
        match self {
            KeyStatus::Partial { reason } | KeyStatus::Failed { reason } => Some(reason),
            _ => None,
        }
    }
}

/// Everything buffered for one key
#[derive(Debug, Clone)]
pub struct KeyBuffer {
    pub key: PartitionKey,
    pub entities: Vec<Entity>,
    pub columns: ColumnSet,
    pub outcome: Option<KeyOutcome>,
}

impl KeyBuffer {
    fn new(key: PartitionKey) -> Self {
        Self {
            key,
            entities: Vec::new(),
            columns: ColumnSet::new(),
            outcome: None,
        }
    }

    pub fn status(&self) -> KeyStatus {
        match &self.outcome {
            None => KeyStatus::NotAttempted,
            Some(KeyOutcome::Success { .. }) => KeyStatus::Succeeded,
            Some(KeyOutcome::Partial { error, .. }) => KeyStatus::Partial {
                reason: error.to_string(),
            },
            Some(KeyOutcome::Failed { error, .. }) => KeyStatus::Failed {
                reason: error.to_string(),
            },
        }
    }
}

/// Drained aggregation state, ready to render
#[derive(Debug, Clone)]
pub struct Aggregate {
    buffers: Vec<KeyBuffer>,
}

impl Aggregate {
    pub fn new(keys: Vec<PartitionKey>) -> Self {
        Self {
            buffers: keys.into_iter().map(KeyBuffer::new).collect(),
        }
    }

    /// Apply one message; returns false on shutdown
    pub fn apply(&mut self, message: AggregatorMessage) -> bool {
        match message {
            AggregatorMessage::Page {
                key_index,
                entities,
            } => match self.buffers.get_mut(key_index) {
                Some(buffer) => {
                    for entity in &entities {
                        buffer.columns.observe(entity);
                    }
                    buffer.entities.extend(entities);
                }
                None => warn!(key_index = key_index, "Page for unknown key index dropped"),
            },
            AggregatorMessage::KeyFinished { key_index, outcome } => {
                match self.buffers.get_mut(key_index) {
                    Some(buffer) => buffer.outcome = Some(outcome),
                    None => warn!(key_index = key_index, "Outcome for unknown key index dropped"),
                }
            }
            AggregatorMessage::Shutdown => return false,
        }
        true
    }

    /// Column union, merged in input key order
    pub fn freeze_columns(&self) -> ColumnSet {
        let mut columns = ColumnSet::new();
        for buffer in &self.buffers {
            columns.merge(&buffer.columns);
        }
        columns
    }

    /// Buffered entities in input key order
    pub fn rows(&self) -> impl Iterator<Item = &Entity> {
        self.buffers.iter().flat_map(|b| b.entities.iter())
    }

    pub fn buffers(&self) -> &[KeyBuffer] {
        &self.buffers
    }

    pub fn entity_count(&self) -> u64 {
        self.buffers.iter().map(|b| b.entities.len() as u64).sum()
    }
}

/// Aggregator that runs in its own thread
pub struct Aggregator {
    /// Thread handle
    handle: Option<JoinHandle<Aggregate>>,

    /// Handle for sending messages
    aggregator_handle: AggregatorHandle,
}

impl Aggregator {
    /// Spawn the aggregator thread for the given keys
    pub fn spawn(keys: Vec<PartitionKey>, channel_size: usize) -> OutputResult<Self> {
        let (sender, receiver) = bounded(channel_size.max(1));
        let stats = Arc::new(AggregatorStats::default());

        let aggregator_handle = AggregatorHandle {
            sender,
            stats: Arc::clone(&stats),
        };

        let state = Aggregate::new(keys);
        let handle = thread::Builder::new()
            .name("export-aggregator".into())
            .spawn(move || aggregator_thread(state, receiver, stats))
            .map_err(|e| OutputError::SpawnFailed(e.to_string()))?;

        Ok(Self {
            handle: Some(handle),
            aggregator_handle,
        })
    }

    /// Get a handle for sending messages to the aggregator
    pub fn handle(&self) -> AggregatorHandle {
        self.aggregator_handle.clone()
    }

    /// Drain pending messages and return the buffered state
    pub fn finish(mut self) -> OutputResult<Aggregate> {
        self.aggregator_handle
            .sender
            .send(AggregatorMessage::Shutdown)
            .map_err(|_| OutputError::ChannelClosed)?;

        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| OutputError::Panicked),
            None => Err(OutputError::ChannelClosed),
        }
    }
}

fn aggregator_thread(
    mut state: Aggregate,
    receiver: Receiver<AggregatorMessage>,
    stats: Arc<AggregatorStats>,
) -> Aggregate {
    while let Ok(message) = receiver.recv() {
        match &message {
            AggregatorMessage::Page { entities, .. } => {
                stats.pages_received.fetch_add(1, Ordering::Relaxed);
                stats
                    .entities_received
                    .fetch_add(entities.len() as u64, Ordering::Relaxed);
            }
            AggregatorMessage::KeyFinished { .. } => {
                stats.keys_finished.fetch_add(1, Ordering::Relaxed);
            }
            AggregatorMessage::Shutdown => {}
        }

        if !state.apply(message) {
            break;
        }
    }

    debug!(
        entities = stats.entities_received(),
        keys = stats.keys_finished(),
        "Aggregator drained"
    );
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::table::types::Value;

    fn entity(pk: &str, rk: &str, field: &str) -> Entity {
        Entity::new()
            .with("PartitionKey", Value::String(pk.into()))
            .with("RowKey", Value::String(rk.into()))
            .with(field, Value::Int(1))
    }

    fn keys(names: &[&str]) -> Vec<PartitionKey> {
        names.iter().map(|n| PartitionKey::new(*n)).collect()
    }

    #[test]
    fn test_columns_independent_of_arrival_order() {
        let build = |order: &[usize]| {
            let mut agg = Aggregate::new(keys(&["A", "B", "C"]));
            for &i in order {
                let field = ["Alpha", "Beta", "Gamma"][i];
                let pk = ["A", "B", "C"][i];
                agg.apply(AggregatorMessage::Page {
                    key_index: i,
                    entities: vec![entity(pk, "1", field)],
                });
            }
            agg
        };

        let forward = build(&[0, 1, 2]);
        let reverse = build(&[2, 1, 0]);

        assert_eq!(forward.freeze_columns(), reverse.freeze_columns());
        assert_eq!(
            reverse.freeze_columns().freeze(),
            vec!["PartitionKey", "RowKey", "Alpha", "Beta", "Gamma"]
        );

        let rows: Vec<_> = reverse.rows().cloned().collect();
        let expected: Vec<_> = forward.rows().cloned().collect();
        assert_eq!(rows, expected);
    }

    #[test]
    fn test_key_status() {
        let mut agg = Aggregate::new(keys(&["A", "B", "C", "D"]));
        agg.apply(AggregatorMessage::KeyFinished {
            key_index: 0,
            outcome: KeyOutcome::Success {
                key: PartitionKey::new("A"),
                pages: 1,
                entities: 0,
            },
        });
        agg.apply(AggregatorMessage::KeyFinished {
            key_index: 1,
            outcome: KeyOutcome::Partial {
                key: PartitionKey::new("B"),
                entities: 3,
                error: FetchError::Cancelled,
            },
        });
        agg.apply(AggregatorMessage::KeyFinished {
            key_index: 2,
            outcome: KeyOutcome::Failed {
                key: PartitionKey::new("C"),
                error: FetchError::Malformed("x".into()),
            },
        });

        let statuses: Vec<_> = agg.buffers().iter().map(|b| b.status()).collect();
        assert_eq!(statuses[0], KeyStatus::Succeeded);
        assert!(matches!(statuses[1], KeyStatus::Partial { .. }));
        assert_eq!(statuses[2].reason(), Some("Malformed response: x"));
        assert_eq!(statuses[3], KeyStatus::NotAttempted);
    }

    #[test]
    fn test_unknown_index_ignored() {
        let mut agg = Aggregate::new(keys(&["A"]));
        assert!(agg.apply(AggregatorMessage::Page {
            key_index: 9,
            entities: vec![entity("Z", "1", "X")],
        }));
        assert_eq!(agg.entity_count(), 0);
        assert!(!agg.apply(AggregatorMessage::Shutdown));
    }

    #[test]
    fn test_threaded_aggregator_drains_concurrent_senders() {
        let names: Vec<String> = (0..8).map(|i| format!("K{}", i)).collect();
        let aggregator =
            Aggregator::spawn(names.iter().map(PartitionKey::new).collect(), 4).unwrap();

        let senders: Vec<_> = (0..8)
            .map(|i| {
                let handle = aggregator.handle();
                let pk = names[i].clone();
                thread::spawn(move || {
                    for row in 0..10 {
                        handle
                            .send_page(i, vec![entity(&pk, &row.to_string(), "V")])
                            .unwrap();
                    }
                })
            })
            .collect();
        for s in senders {
            s.join().unwrap();
        }

        let handle = aggregator.handle();
        let aggregate = aggregator.finish().unwrap();
        assert_eq!(aggregate.entity_count(), 80);
        assert_eq!(handle.stats().entities_received(), 80);
        assert_eq!(
            aggregate.freeze_columns().freeze(),
            vec!["PartitionKey", "RowKey", "V"]
        );
    }
}
