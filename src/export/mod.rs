//! Parallel export engine
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────┐
//! │        KeyQueue          │  seeded with every key, then closed
//! └────────────┬─────────────┘
//!              │
//!   ┌──────────┼──────────┐
//!   ▼          ▼          ▼
//! ┌────────┐ ┌────────┐ ┌────────┐
//! │export-0│ │export-1│ │export-N│  PageFetcher per key
//! └───┬────┘ └───┬────┘ └───┬────┘
//!     └──────────┼──────────┘
//!                ▼
//! ┌──────────────────────────┐
//! │   Aggregator thread      │  pages + outcomes
//! └────────────┬─────────────┘
//!              ▼
//! ┌──────────────────────────┐
//! │  ExportCoordinator       │  freeze columns, write CSV, report
//! └──────────────────────────┘
//! ```

pub mod coordinator;
pub mod queue;
pub mod worker;

pub use coordinator::{ExportCoordinator, ExportProgress, ExportReport, RunPhase, RunStatus};
pub use queue::{KeyQueue, KeyTask};
pub use worker::{Worker, WorkerStats, WorkerTotals};
