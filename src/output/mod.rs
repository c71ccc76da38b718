//! Merging and rendering exported entities
//!
//! ```text
//! worker ──┐
//! worker ──┼──► bounded channel ──► Aggregator thread ──► Aggregate
//! worker ──┘                        (per-key buffers)        │
//!                                                            ▼
//!                                              freeze columns (key order)
//!                                                            │
//!                                                            ▼
//!                                              CSV (.partial, then rename)
//! ```

pub mod aggregator;
pub mod columns;
pub mod csv_writer;

pub use aggregator::{Aggregate, Aggregator, AggregatorHandle, AggregatorMessage, KeyStatus};
pub use columns::ColumnSet;
pub use csv_writer::{write_csv, WriteSummary};
