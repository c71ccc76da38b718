//! Error types for table-export
//!
//! This module defines the error hierarchy for an export run:
//! - Configuration and input errors (fatal, detected before any fetch)
//! - Credential errors (fatal)
//! - Per-key fetch errors (recorded in the summary, the run continues)
//! - Output and worker errors
//!
//! Transient remote failures never show up here: they are absorbed by the
//! retry policy and only surface as [`FetchError::RetriesExhausted`].

use crate::table::types::PartitionKey;
use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for an export run
#[derive(Error, Debug)]
pub enum ExportError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Credentials unavailable or unusable
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Output rendering errors
    #[error("Output error: {0}")]
    Output(#[from] OutputError),

    /// Worker/concurrency errors
    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    /// Every attempted key failed
    #[error("All {count} partition keys failed (first: {first})")]
    AllKeysFailed { count: usize, first: String },
}

/// Configuration and CLI errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Invalid worker count
    #[error("Invalid worker count {count}: must be between 1 and {max}")]
    InvalidWorkerCount { count: usize, max: usize },

    /// Invalid table URL
    #[error("Invalid table URL '{url}': {reason}")]
    InvalidTableUrl { url: String, reason: String },

    /// Invalid duration value
    #[error("Invalid {name} '{value}': {reason}")]
    InvalidDuration {
        name: &'static str,
        value: String,
        reason: String,
    },

    /// Input file missing
    #[error("Input file not found: '{path}'")]
    InputNotFound { path: PathBuf },

    /// Input file could not be parsed
    #[error("Failed to read partition keys from '{path}': {reason}")]
    InvalidInput { path: PathBuf, reason: String },

    /// Key source produced nothing to export
    #[error("No PartitionKey values found in input")]
    NoKeys,

    /// Output path error
    #[error("Invalid output path '{path}': {reason}")]
    InvalidOutputPath { path: PathBuf, reason: String },
}

/// Credential provider errors
#[derive(Error, Debug, Clone)]
pub enum AuthError {
    /// No credential source configured or reachable
    #[error("No credentials available: {0}")]
    Unavailable(String),

    /// Provider returned an empty token
    #[error("Credential provider returned an empty token")]
    EmptyToken,

    /// Token already expired
    #[error("Access token expired at {expires_on}")]
    Expired { expires_on: String },

    /// Provider output could not be understood
    #[error("Failed to parse credential provider output: {0}")]
    InvalidResponse(String),
}

/// Transport-level failures (connection, timeout, body read)
///
/// All of these are transient from the retry policy's point of view.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The call exceeded the per-call timeout
    #[error("Request timed out")]
    Timeout,

    /// Could not connect to the endpoint
    #[error("Connection failed: {0}")]
    Connect(String),

    /// Any other network failure
    #[error("Request failed: {0}")]
    Other(String),
}

/// Terminal errors for a single partition key
#[derive(Error, Debug, Clone)]
pub enum FetchError {
    /// Remote rejected the request (non-retryable 4xx)
    #[error("HTTP {status}: {message}")]
    Rejected { status: u16, message: String },

    /// Transient failures persisted past the retry budget
    #[error("Gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    /// Response body could not be interpreted as a page of entities
    #[error("Malformed response: {0}")]
    Malformed(String),

    /// The server handed back a continuation token already seen for this key
    #[error("Continuation token repeated: {0}")]
    ContinuationCycle(String),

    /// Run cancelled before this key completed
    #[error("Cancelled")]
    Cancelled,

    /// Credentials unusable
    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl FetchError {
    /// Check if this error must abort the whole run
    pub fn is_fatal(&self) -> bool {
        matches!(self, FetchError::Auth(_))
    }
}

/// A terminal error tagged with the key that produced it
#[derive(Error, Debug, Clone)]
#[error("PartitionKey={key}: {error}")]
pub struct KeyFailure {
    /// The offending key
    pub key: PartitionKey,

    /// Why the fetch stopped
    pub error: FetchError,

    /// Pages successfully delivered before the failure
    pub pages: u64,

    /// Entities successfully delivered before the failure
    pub entities: u64,

    /// Retries performed across all calls for this key
    pub retries: u64,
}

/// Output rendering errors
#[derive(Error, Debug)]
pub enum OutputError {
    /// CSV encoding error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Failed to create or replace the output file
    #[error("Failed to write '{path}': {reason}")]
    WriteFailed { path: PathBuf, reason: String },

    /// Aggregator channel closed unexpectedly
    #[error("Aggregator channel closed unexpectedly")]
    ChannelClosed,

    /// The aggregator thread could not be started
    #[error("Failed to spawn aggregator thread: {0}")]
    SpawnFailed(String),

    /// Aggregator thread panicked
    #[error("Aggregator thread panicked")]
    Panicked,
}

/// Worker thread errors
#[derive(Error, Debug)]
pub enum WorkerError {
    /// Worker panicked
    #[error("Worker {id} panicked: {message}")]
    Panicked { id: usize, message: String },

    /// Worker initialization failed
    #[error("Failed to initialize worker {id}: {reason}")]
    InitFailed { id: usize, reason: String },

    /// Run phase machine misuse
    #[error("Invalid run transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: crate::export::RunPhase,
        to: crate::export::RunPhase,
    },
}

/// Result type alias for ExportError
pub type Result<T> = std::result::Result<T, ExportError>;

/// Result type alias for OutputError
pub type OutputResult<T> = std::result::Result<T, OutputError>;

/// Represents the outcome of exporting a single partition key
#[derive(Debug, Clone)]
pub enum KeyOutcome {
    /// Every page fetched
    Success {
        key: PartitionKey,
        pages: u64,
        entities: u64,
    },

    /// Some pages delivered before a terminal error
    Partial {
        key: PartitionKey,
        entities: u64,
        error: FetchError,
    },

    /// Nothing delivered
    Failed { key: PartitionKey, error: FetchError },
}

impl KeyOutcome {
    /// Build the outcome from a fetch result
    pub fn from_result(
        key: &PartitionKey,
        result: &std::result::Result<crate::table::FetchSummary, KeyFailure>,
    ) -> Self {
        match result {
            Ok(summary) => KeyOutcome::Success {
                key: key.clone(),
                pages: summary.pages,
                entities: summary.entities,
            },
            Err(failure) if failure.pages > 0 => KeyOutcome::Partial {
                key: key.clone(),
                entities: failure.entities,
                error: failure.error.clone(),
            },
            Err(failure) => KeyOutcome::Failed {
                key: key.clone(),
                error: failure.error.clone(),
            },
        }
    }

    /// Returns true if this outcome represents success
    pub fn is_success(&self) -> bool {
        matches!(self, KeyOutcome::Success { .. })
    }

    /// Returns the key associated with this outcome
    pub fn key(&self) -> &PartitionKey {
        match self {
            KeyOutcome::Success { key, .. } => key,
            KeyOutcome::Partial { key, .. } => key,
            KeyOutcome::Failed { key, .. } => key,
        }
    }

    /// Returns the error, if any
    pub fn error(&self) -> Option<&FetchError> {
        match self {
            KeyOutcome::Success { .. } => None,
            KeyOutcome::Partial { error, .. } | KeyOutcome::Failed { error, .. } => Some(error),
        }
    }
}
