//! table-export - Bulk partition export from a cloud table store
//!
//! Given a list of partition keys, fetches every entity of every partition
//! in parallel and writes them to a single CSV whose header is the union of
//! all observed fields.
//!
//! # Features
//!
//! - **Parallel Fetch**: A fixed pool of worker threads, one key at a time
//!   per worker, each key paged to completion through continuation tokens.
//!
//! - **Retry With Backoff**: Throttling, server errors and network failures
//!   are retried with capped exponential backoff and jitter, honoring
//!   `Retry-After`.
//!
//! - **Failure Isolation**: A key that fails permanently is reported in the
//!   summary and the remaining keys still export.
//!
//! - **Deterministic Output**: Columns and rows are frozen in input key
//!   order, so any worker count yields the same file.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Table Store                              │
//! │             GET <table>()?$filter=PartitionKey eq '…'           │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               │ pages + continuation tokens
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Worker Threads                              │
//! │  ┌─────────┐  ┌─────────┐  ┌─────────┐         ┌─────────┐     │
//! │  │export-0 │  │export-1 │  │export-2 │  ...    │export-N │     │
//! │  └────┬────┘  └────┬────┘  └────┬────┘         └────┬────┘     │
//! │       └────────────┼────────────┼────────────────────┘          │
//! │                    ▼            ▼                               │
//! │            ┌──────────────────────────┐                         │
//! │            │   Aggregator thread      │                         │
//! │            │  - per-key buffers       │                         │
//! │            │  - column union          │                         │
//! │            └──────────────────────────┘                         │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               ▼
//!                    ┌──────────────────┐
//!                    │   export.csv     │
//!                    └──────────────────┘
//! ```
//!
//! # Example
//!
//! ```bash
//! table-export --table-url https://acct.table.core.windows.net/Orders \
//!     -i keys.csv -o orders.csv -w 16
//! ```

pub mod config;
pub mod error;
pub mod export;
pub mod keys;
pub mod output;
pub mod progress;
pub mod table;

pub use config::{CliArgs, ExportConfig, TableUrl};
pub use error::{ExportError, Result};
pub use export::{ExportCoordinator, ExportReport, RunStatus};
pub use keys::KeySource;
