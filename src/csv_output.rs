//! CSV export of the busiest seconds
//!
//! Flat file for spreadsheet analysis: a `TIMESTAMP,COUNT` header followed by
//! one row per reported second, in report order.

use crate::error::PersistenceError;
use crate::sink::ResultSink;
use crate::top_k::TopKEntry;
use std::path::{Path, PathBuf};

/// CSV formatter for the top-K report
#[derive(Debug, Default)]
pub struct CsvTopKOutput {
    rows: Vec<TopKEntry>,
}

impl CsvTopKOutput {
    /// Create a new CSV formatter
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a reported second
    pub fn add_entry(&mut self, entry: TopKEntry) {
        self.rows.push(entry);
    }

    fn header() -> &'static str {
        "TIMESTAMP,COUNT"
    }

    /// Generate CSV output as string
    pub fn to_csv(&self) -> String {
        let mut output = String::new();

        output.push_str(Self::header());
        output.push('\n');

        for entry in &self.rows {
            output.push_str(&entry.epoch.to_string());
            output.push(',');
            output.push_str(&entry.count.to_string());
            output.push('\n');
        }

        output
    }
}

impl From<&[TopKEntry]> for CsvTopKOutput {
    fn from(entries: &[TopKEntry]) -> Self {
        Self {
            rows: entries.to_vec(),
        }
    }
}

/// Sink that writes the top-K report to a CSV file
#[derive(Debug)]
pub struct CsvSink {
    path: PathBuf,
}

impl CsvSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ResultSink for CsvSink {
    fn name(&self) -> &str {
        "csv"
    }

    fn persist_top_k(&mut self, entries: &[TopKEntry]) -> Result<(), PersistenceError> {
        std::fs::write(&self.path, CsvTopKOutput::from(entries).to_csv())?;
        tracing::debug!(path = %self.path.display(), rows = entries.len(), "csv written");
        Ok(())
    }
}
