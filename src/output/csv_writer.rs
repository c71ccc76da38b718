//! CSV rendering of the frozen export
//!
//! The file is written to a sibling `.partial` path and renamed over the
//! destination once fully flushed, so a crashed run never leaves a
//! truncated CSV at the output path.

use crate::error::{OutputError, OutputResult};
use crate::table::types::Entity;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// What was written
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub rows: u64,
    pub columns: usize,
    pub bytes: u64,
}

/// Render one entity against the header; missing fields become empty cells
pub fn render_row(header: &[String], entity: &Entity) -> Vec<String> {
    header
        .iter()
        .map(|column| entity.get(column).map(|v| v.render()).unwrap_or_default())
        .collect()
}

/// Write header and rows to any writer
pub fn write_rows<'a, W, I>(writer: W, header: &[String], rows: I) -> OutputResult<u64>
where
    W: Write,
    I: IntoIterator<Item = &'a Entity>,
{
    let mut csv = csv::WriterBuilder::new().has_headers(false).from_writer(writer);

    // A record with no fields cannot be represented in CSV
    if header.is_empty() {
        csv.flush().map_err(csv::Error::from)?;
        return Ok(0);
    }

    csv.write_record(header)?;

    let mut count = 0u64;
    for entity in rows {
        csv.write_record(render_row(header, entity))?;
        count += 1;
    }

    csv.flush().map_err(csv::Error::from)?;
    Ok(count)
}

/// Write the export to `path`, replacing any existing file
pub fn write_csv<'a, I>(path: &Path, header: &[String], rows: I) -> OutputResult<WriteSummary>
where
    I: IntoIterator<Item = &'a Entity>,
{
    let partial = partial_path(path);
    let write_failed = |reason: String| OutputError::WriteFailed {
        path: path.to_path_buf(),
        reason,
    };

    let file = fs::File::create(&partial).map_err(|e| write_failed(e.to_string()))?;
    let result = write_rows(std::io::BufWriter::new(file), header, rows);

    let rows = match result {
        Ok(rows) => rows,
        Err(e) => {
            let _ = fs::remove_file(&partial);
            return Err(e);
        }
    };

    fs::rename(&partial, path).map_err(|e| {
        let _ = fs::remove_file(&partial);
        write_failed(e.to_string())
    })?;

    let bytes = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    debug!(path = %path.display(), rows = rows, bytes = bytes, "CSV written");

    Ok(WriteSummary {
        rows,
        columns: header.len(),
        bytes,
    })
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".partial");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::types::Value;
    use tempfile::tempdir;

    fn header(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_missing_fields_render_empty() {
        let entity = Entity::new()
            .with("PartitionKey", Value::String("A".into()))
            .with("Age", Value::Int(7));

        assert_eq!(
            render_row(&header(&["PartitionKey", "RowKey", "Age"]), &entity),
            vec!["A", "", "7"]
        );
    }

    #[test]
    fn test_quoting() {
        let entity = Entity::new()
            .with("Name", Value::String("Smith, \"J\"".into()))
            .with("Note", Value::String("two\nlines".into()));

        let mut out = Vec::new();
        write_rows(&mut out, &header(&["Name", "Note"]), [&entity]).unwrap();

        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Name,Note\n\"Smith, \"\"J\"\"\",\"two\nlines\"\n"
        );
    }

    #[test]
    fn test_empty_header_writes_nothing() {
        let mut out = Vec::new();
        let rows = write_rows(&mut out, &[], [&Entity::new()]).unwrap();
        assert_eq!(rows, 0);
        assert!(out.is_empty());
    }

    #[test]
    fn test_write_csv_replaces_existing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.csv");
        fs::write(&path, "stale").unwrap();

        let entity = Entity::new().with("PartitionKey", Value::String("A".into()));
        let summary = write_csv(&path, &header(&["PartitionKey"]), [&entity]).unwrap();

        assert_eq!(summary.rows, 1);
        assert_eq!(summary.columns, 1);
        assert_eq!(fs::read_to_string(&path).unwrap(), "PartitionKey\nA\n");
        assert!(!partial_path(&path).exists());
    }

    #[test]
    fn test_unwritable_destination() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing").join("out.csv");

        let err = write_csv(&path, &header(&["A"]), std::iter::empty()).unwrap_err();
        assert!(matches!(err, OutputError::WriteFailed { .. }));
    }
}
