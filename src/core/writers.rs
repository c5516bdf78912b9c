//! Report writers.
//!
//! Copy stages can record every decision they made; this module writes
//! those records as CSV with the columns `source,destination,outcome`.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;

use thiserror::Error;

use super::files::CopyReport;

/// Errors that can occur during write operations.
#[derive(Error, Debug)]
pub enum WriteError {
    /// Failed to create parent directories.
    #[error("failed to create parent directories for '{path}': {source}")]
    CreateDirectory {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to create or open file for writing.
    #[error("failed to create file '{path}': {source}")]
    CreateFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// CSV writing error.
    #[error("CSV write error for '{path}': {source}")]
    CsvError {
        path: String,
        #[source]
        source: csv::Error,
    },
}

/// Result type for write operations.
pub type Result<T> = std::result::Result<T, WriteError>;

/// Creates parent directories for a file path if they don't exist.
fn ensure_parent_dirs(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| WriteError::CreateDirectory {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
    }
    Ok(())
}

/// Write a copy report as CSV.
///
/// One row per copy decision, in the order the stage made them. Parent
/// directories are created if needed.
pub fn write_copy_report(path: &Path, report: &CopyReport) -> Result<()> {
    ensure_parent_dirs(path)?;

    let file = File::create(path).map_err(|e| WriteError::CreateFile {
        path: path.display().to_string(),
        source: e,
    })?;
    let mut writer = csv::Writer::from_writer(BufWriter::new(file));
    let csv_err = |e: csv::Error| WriteError::CsvError {
        path: path.display().to_string(),
        source: e,
    };

    for record in &report.records {
        writer.serialize(record).map_err(csv_err)?;
    }
    writer.flush().map_err(|e| csv_err(e.into()))?;

    Ok(())
}
