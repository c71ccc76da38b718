//! Configuration types for table-export
//!
//! This module defines:
//! - CLI argument parsing using clap derive macros (with env fallbacks)
//! - Runtime configuration with validation
//! - Table URL parsing

use crate::error::ConfigError;
use crate::table::client::DEFAULT_API_VERSION;
use crate::table::retry::{RetryPolicy, DEFAULT_JITTER};
use clap::Parser;
use regex::Regex;
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

/// Maximum reasonable worker count
const MAX_WORKERS: usize = 512;

/// Regex for table URLs: scheme://host[/path...]/<table>
static TABLE_URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(https?://[^\s/]+(?:/[^\s/]+)*)/([A-Za-z][A-Za-z0-9]{2,62})$")
        .expect("Invalid table URL regex")
});

/// Bulk export table entities to CSV by partition key
#[derive(Parser, Debug, Clone)]
#[command(
    name = "table-export",
    version,
    about = "Bulk export table storage entities to CSV by partition key",
    long_about = "Reads PartitionKey values from a file, queries every partition concurrently \
                  (following continuation tokens and retrying throttled or failed calls), and \
                  writes a single CSV whose columns are the union of all entity fields.",
    after_help = "EXAMPLES:\n    \
        table-export --table-url https://acct.table.core.windows.net/Orders \
            -i keys.csv -o out.csv\n    \
        table-export -i keys.txt -o out.csv --max-workers 12 --timeout 60\n    \
        AZ_TABLE_TOKEN=... table-export -i keys.csv -o out.csv --deadline 600"
)]
pub struct CliArgs {
    /// Table endpoint (https://<account>.table.core.windows.net/<table>)
    #[arg(long, env = "AZ_TABLE_URL", value_name = "URL")]
    pub table_url: String,

    /// Entra ID tenant used when acquiring a token through the Azure CLI
    #[arg(long, env = "AZ_TENANT_ID", value_name = "TENANT")]
    pub tenant_id: Option<String>,

    /// REST API version sent as x-ms-version
    #[arg(long, env = "AZ_TABLE_API_VERSION", default_value = DEFAULT_API_VERSION)]
    pub api_version: String,

    /// Bearer token (skips Azure CLI token acquisition)
    #[arg(long, env = "AZ_TABLE_TOKEN", hide_env_values = true, value_name = "TOKEN")]
    pub token: Option<String>,

    /// File containing PartitionKey values (CSV or one per line)
    #[arg(short, long, value_name = "FILE")]
    pub input: PathBuf,

    /// Output CSV path
    #[arg(short, long, value_name = "FILE")]
    pub output: PathBuf,

    /// Number of concurrent workers
    #[arg(short = 'w', long, env = "AZ_MAX_WORKERS", default_value = "10", value_name = "NUM")]
    pub max_workers: usize,

    /// Per-call timeout in seconds
    #[arg(long, env = "AZ_TIMEOUT_SEC", default_value = "60", value_name = "SECS")]
    pub timeout: u64,

    /// Retries for throttled (429), 5xx and network failures
    #[arg(long, env = "AZ_MAX_RETRIES", default_value = "5", value_name = "NUM")]
    pub max_retries: u32,

    /// First retry delay in seconds (doubles per retry)
    #[arg(long, env = "AZ_INITIAL_BACKOFF", default_value = "1.0", value_name = "SECS")]
    pub initial_backoff: f64,

    /// Upper bound for any single retry delay in seconds
    #[arg(long, default_value = "60", value_name = "SECS")]
    pub max_backoff: f64,

    /// Stop the whole run after this many seconds, keeping partial results
    #[arg(long, value_name = "SECS")]
    pub deadline: Option<u64>,

    /// Quiet mode - suppress progress output
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Verbose output (per-key and retry logging)
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

/// Parsed table URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableUrl {
    /// Service root (scheme, host and any account path)
    pub service: String,

    /// Table name
    pub table: String,
}

impl TableUrl {
    /// Parse a table URL, trimming surrounding whitespace and trailing slashes
    pub fn parse(url: &str) -> Result<Self, ConfigError> {
        let trimmed = url.trim().trim_end_matches('/');

        let caps = TABLE_URL_REGEX
            .captures(trimmed)
            .ok_or_else(|| ConfigError::InvalidTableUrl {
                url: url.to_string(),
                reason: "Expected format: https://<account>.table.core.windows.net/<table>".into(),
            })?;

        Ok(Self {
            service: caps[1].to_string(),
            table: caps[2].to_string(),
        })
    }

    /// Full URL of the table
    pub fn to_display_string(&self) -> String {
        format!("{}/{}", self.service, self.table)
    }

    /// Query-entities endpoint (`<table>()`)
    pub fn query_endpoint(&self) -> String {
        format!("{}/{}()", self.service, self.table)
    }
}

/// Validated runtime configuration
#[derive(Debug, Clone)]
pub struct ExportConfig {
    /// Parsed table URL
    pub table_url: TableUrl,

    /// x-ms-version header value
    pub api_version: String,

    /// Tenant for Azure CLI token acquisition
    pub tenant_id: Option<String>,

    /// Explicit bearer token
    pub token: Option<String>,

    /// Partition key input file
    pub input_path: PathBuf,

    /// Output CSV path
    pub output_path: PathBuf,

    /// Number of worker threads
    pub worker_count: usize,

    /// Per-call timeout
    pub timeout: Duration,

    /// Retry count for transient errors
    pub max_retries: u32,

    /// First retry delay
    pub initial_backoff: Duration,

    /// Cap on any single retry delay
    pub max_backoff: Duration,

    /// Run-level deadline
    pub deadline: Option<Duration>,

    /// Show progress indicator
    pub show_progress: bool,

    /// Verbose logging
    pub verbose: bool,
}

impl ExportConfig {
    /// Create and validate configuration from CLI arguments
    ///
    /// Creates the output directory if needed, so an unwritable output
    /// location fails here rather than after the fetch.
    pub fn from_args(args: CliArgs) -> Result<Self, ConfigError> {
        let table_url = TableUrl::parse(&args.table_url)?;

        // Validate worker count
        if args.max_workers == 0 || args.max_workers > MAX_WORKERS {
            return Err(ConfigError::InvalidWorkerCount {
                count: args.max_workers,
                max: MAX_WORKERS,
            });
        }

        let timeout = seconds("timeout", args.timeout as f64)?;
        if timeout.is_zero() {
            return Err(ConfigError::InvalidDuration {
                name: "timeout",
                value: args.timeout.to_string(),
                reason: "must be at least 1 second".into(),
            });
        }
        let initial_backoff = seconds("initial backoff", args.initial_backoff)?;
        let max_backoff = seconds("max backoff", args.max_backoff)?;
        let deadline = args.deadline.map(Duration::from_secs);

        if !args.input.exists() {
            return Err(ConfigError::InputNotFound { path: args.input });
        }

        // Ensure the output location is usable before any remote work
        if let Some(parent) = args.output.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| ConfigError::InvalidOutputPath {
                    path: args.output.clone(),
                    reason: format!("Cannot create directory '{}': {}", parent.display(), e),
                })?;
            }
        }
        if args.output.is_dir() {
            return Err(ConfigError::InvalidOutputPath {
                path: args.output.clone(),
                reason: "Path is a directory".into(),
            });
        }

        let token = args.token.filter(|t| !t.trim().is_empty());
        let tenant_id = args.tenant_id.filter(|t| !t.trim().is_empty());

        Ok(Self {
            table_url,
            api_version: args.api_version.trim().to_string(),
            tenant_id,
            token,
            input_path: args.input,
            output_path: args.output,
            worker_count: args.max_workers,
            timeout,
            max_retries: args.max_retries,
            initial_backoff,
            max_backoff,
            deadline,
            show_progress: !args.quiet,
            verbose: args.verbose,
        })
    }

    /// Retry policy described by this configuration
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.initial_backoff)
            .with_max_backoff(self.max_backoff)
            .with_jitter(DEFAULT_JITTER)
    }
}

fn seconds(name: &'static str, value: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(value).map_err(|e| ConfigError::InvalidDuration {
        name,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_table_url_standard() {
        let url = TableUrl::parse("https://acct.table.core.windows.net/Orders/").unwrap();
        assert_eq!(url.service, "https://acct.table.core.windows.net");
        assert_eq!(url.table, "Orders");
        assert_eq!(
            url.query_endpoint(),
            "https://acct.table.core.windows.net/Orders()"
        );
    }

    #[test]
    fn test_parse_table_url_emulator() {
        let url = TableUrl::parse("http://127.0.0.1:10002/devstoreaccount1/events2024").unwrap();
        assert_eq!(url.service, "http://127.0.0.1:10002/devstoreaccount1");
        assert_eq!(url.table, "events2024");
    }

    #[test]
    fn test_parse_invalid_table_url() {
        assert!(TableUrl::parse("").is_err());
        assert!(TableUrl::parse("acct.table.core.windows.net/Orders").is_err());
        assert!(TableUrl::parse("https://acct.table.core.windows.net").is_err());
        assert!(TableUrl::parse("https://acct.table.core.windows.net/1bad").is_err());
        assert!(TableUrl::parse("https://acct.table.core.windows.net/ab").is_err());
    }

    fn args(dir: &std::path::Path, extra: &[&str]) -> CliArgs {
        let input = dir.join("keys.txt");
        std::fs::write(&input, "PK_1\n").unwrap();
        let output = dir.join("nested/out/export.csv");

        let mut argv = vec![
            "table-export".to_string(),
            "--table-url".into(),
            "https://acct.table.core.windows.net/Orders".into(),
            "--input".into(),
            input.display().to_string(),
            "--output".into(),
            output.display().to_string(),
        ];
        argv.extend(extra.iter().map(|s| s.to_string()));
        CliArgs::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_config_defaults_and_output_dir() {
        let dir = tempdir().unwrap();
        let config = ExportConfig::from_args(args(dir.path(), &[])).unwrap();

        assert_eq!(config.worker_count, 10);
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.initial_backoff, Duration::from_secs(1));
        assert_eq!(config.max_backoff, Duration::from_secs(60));
        assert_eq!(config.api_version, DEFAULT_API_VERSION);
        assert!(config.deadline.is_none());
        assert!(dir.path().join("nested/out").is_dir());
    }

    #[test]
    fn test_config_rejects_bad_values() {
        let dir = tempdir().unwrap();

        let err = ExportConfig::from_args(args(dir.path(), &["--max-workers", "0"])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidWorkerCount { count: 0, .. }));

        let err =
            ExportConfig::from_args(args(dir.path(), &["--initial-backoff=-1"])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDuration { .. }));

        let err = ExportConfig::from_args(args(dir.path(), &["--timeout", "0"])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDuration { .. }));
    }

    #[test]
    fn test_config_missing_input() {
        let dir = tempdir().unwrap();
        let mut cli = args(dir.path(), &[]);
        cli.input = dir.path().join("missing.csv");
        assert!(matches!(
            ExportConfig::from_args(cli),
            Err(ConfigError::InputNotFound { .. })
        ));
    }

    #[test]
    fn test_retry_policy_from_config() {
        let dir = tempdir().unwrap();
        let config = ExportConfig::from_args(args(
            dir.path(),
            &["--max-retries", "2", "--initial-backoff", "0.5", "--max-backoff", "4"],
        ))
        .unwrap();

        let policy = config.retry_policy();
        assert_eq!(policy.max_retries, 2);
        assert_eq!(policy.base_delay(1), Duration::from_millis(500));
        assert_eq!(policy.base_delay(10), Duration::from_secs(4));
    }
}
