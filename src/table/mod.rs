//! Remote table store access
//!
//! This module talks to the partitioned table store: one paginated
//! list-entities query per partition key, wrapped in a retry policy.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                    PageFetcher                       │
//! │  - One key at a time, pages in server order         │
//! │  - Threads continuation tokens, detects cycles      │
//! └──────────────┬───────────────────────┬──────────────┘
//!                │                       │
//!                ▼                       ▼
//! ┌──────────────────────────┐ ┌─────────────────────────┐
//! │       RetryPolicy        │ │     TokenProvider       │
//! │  - 429/5xx/network only  │ │  - static or Azure CLI  │
//! │  - backoff + jitter      │ └─────────────────────────┘
//! └──────────────┬───────────┘
//!                ▼
//! ┌─────────────────────────────────────────────────────┐
//! │           TableTransport (HttpTableClient)           │
//! │  - GET <table>()?$filter=PartitionKey eq '...'      │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod auth;
pub mod client;
pub mod fetcher;
pub mod retry;
pub mod types;

pub use auth::{AccessToken, AzureCliTokenProvider, StaticTokenProvider, TokenProvider};
pub use client::{HttpTableClient, PageRequest, RawResponse, TableTransport, DEFAULT_API_VERSION};
pub use fetcher::{FetchSummary, PageFetcher};
pub use retry::{Failure, RetryDecision, RetryPolicy, RetryState, ShutdownAwareSleeper, Sleeper};
pub use types::{ContinuationToken, Entity, Page, PartitionKey, Value};
