//! Partition key input
//!
//! Keys come from a file that is either CSV (first column, optional
//! `PartitionKey` header) or plain text with one key per line. Blank values
//! and `#` comments are skipped, duplicates are dropped keeping the first
//! occurrence.

use crate::error::ConfigError;
use crate::table::types::{PartitionKey, PARTITION_KEY};
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

/// Bytes inspected when deciding between CSV and plain text
const SNIFF_LEN: usize = 2048;

/// Ordered, deduplicated partition keys
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySource {
    keys: Vec<PartitionKey>,
}

impl KeySource {
    /// Read keys from a file
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::InputNotFound {
                path: path.to_path_buf(),
            });
        }

        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::InvalidInput {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        Self::parse(&text).map_err(|e| match e {
            ConfigError::InvalidInput { reason, .. } => ConfigError::InvalidInput {
                path: path.to_path_buf(),
                reason,
            },
            other => other,
        })
    }

    /// Parse keys from file contents
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);

        let raw = match sniff_delimiter(text) {
            Some(delimiter) => read_csv(text, delimiter)?,
            None => text.lines().map(str::to_string).collect(),
        };

        let mut seen = HashSet::new();
        let mut keys = Vec::new();
        let mut duplicates = 0usize;
        let mut first = true;

        for value in raw {
            let value = value.trim();
            if value.is_empty() || value.starts_with('#') {
                continue;
            }
            if std::mem::take(&mut first) && value.eq_ignore_ascii_case(PARTITION_KEY) {
                continue;
            }
            if seen.insert(value.to_string()) {
                keys.push(PartitionKey::new(value));
            } else {
                duplicates += 1;
            }
        }

        if keys.is_empty() {
            return Err(ConfigError::NoKeys);
        }

        debug!(keys = keys.len(), duplicates = duplicates, "Partition keys loaded");
        Ok(Self { keys })
    }

    pub fn keys(&self) -> &[PartitionKey] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn into_keys(self) -> Vec<PartitionKey> {
        self.keys
    }
}

/// CSV delimiter if the input looks like CSV, `None` for plain text
///
/// `;` is a legal key character, so it only splits records when the file
/// opens with a `PartitionKey;...` header.
fn sniff_delimiter(text: &str) -> Option<u8> {
    let mut end = text.len().min(SNIFF_LEN);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    let sample = &text[..end];

    if semicolon_header(sample) {
        Some(b';')
    } else if sample.contains(',') || sample.contains(PARTITION_KEY) {
        Some(b',')
    } else {
        None
    }
}

fn semicolon_header(sample: &str) -> bool {
    let first = sample
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or_default();

    first
        .split_once(';')
        .is_some_and(|(cell, _)| cell.trim().eq_ignore_ascii_case(PARTITION_KEY))
}

/// First cell of each record
fn read_csv(text: &str, delimiter: u8) -> Result<Vec<String>, ConfigError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(text.as_bytes());

    let mut values = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| ConfigError::InvalidInput {
            path: Default::default(),
            reason: e.to_string(),
        })?;

        if let Some(first) = record.get(0) {
            values.push(first.to_string());
        }
    }

    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(text: &str) -> Vec<String> {
        KeySource::parse(text)
            .unwrap()
            .keys()
            .iter()
            .map(|k| k.to_string())
            .collect()
    }

    #[test]
    fn test_plain_text() {
        assert_eq!(
            keys("PK_001\n\nPK_002\r\n  PK_003  \n"),
            vec!["PK_001", "PK_002", "PK_003"]
        );
    }

    #[test]
    fn test_csv_with_header() {
        assert_eq!(
            keys("PartitionKey,Note\nA,first\nB,second\n"),
            vec!["A", "B"]
        );
        assert_eq!(keys("partitionkey\nA\nB\n"), vec!["A", "B"]);
    }

    #[test]
    fn test_semicolon_in_plain_keys_preserved() {
        assert_eq!(
            keys("tenant;123\ntenant;456\n"),
            vec!["tenant;123", "tenant;456"]
        );
        assert_eq!(keys("a;1,note\nb;2,note\n"), vec!["a;1", "b;2"]);
    }

    #[test]
    fn test_semicolon_csv_with_header() {
        assert_eq!(keys("PartitionKey;Note\nA;x\nB;y\n"), vec!["A", "B"]);
    }

    #[test]
    fn test_quoted_csv_value() {
        assert_eq!(keys("\"a,b\",1\nc,2\n"), vec!["a,b", "c"]);
    }

    #[test]
    fn test_dedup_preserves_first_order() {
        assert_eq!(keys("B\nA\nB\nC\nA\n"), vec!["B", "A", "C"]);
    }

    #[test]
    fn test_comments_and_blanks_skipped() {
        assert_eq!(keys("# exported 2024-01-01\nA\n   \n#B\nC\n"), vec!["A", "C"]);
        assert_eq!(keys("PartitionKey,x\n,1\n# c,2\nD,3\n"), vec!["D"]);
    }

    #[test]
    fn test_header_only_is_no_keys() {
        assert!(matches!(
            KeySource::parse("PartitionKey\n"),
            Err(ConfigError::NoKeys)
        ));
        assert!(matches!(KeySource::parse(""), Err(ConfigError::NoKeys)));
        assert!(matches!(KeySource::parse("\n\n# only\n"), Err(ConfigError::NoKeys)));
    }

    #[test]
    fn test_bom_stripped() {
        assert_eq!(keys("\u{feff}PartitionKey\nA\n"), vec!["A"]);
    }

    #[test]
    fn test_missing_file() {
        let err = KeySource::from_path(Path::new("/definitely/not/here.csv")).unwrap_err();
        assert!(matches!(err, ConfigError::InputNotFound { .. }));
    }
}
