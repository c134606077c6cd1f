//! JSON output format for the concurrency report
//!
//! `--format json` emits one document with the busiest seconds and the run
//! summary, for machine parsing.

use crate::pipeline::RunReport;
use crate::top_k::TopKEntry;
use serde::{Deserialize, Serialize};

/// Counts describing what happened to the fetched records
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonRunSummary {
    /// Records returned by the provider
    pub fetched: usize,
    /// Trunking calls that did not fail
    pub eligible: usize,
    /// Calls that contributed to the histogram
    pub counted: usize,
    /// Calls whose end precedes their start
    pub rejected_intervals: usize,
    /// Eligible calls without usable timestamps
    pub unusable_records: usize,
    /// Zero-duration calls left out of the histogram
    pub skipped_zero_duration: usize,
    /// Distinct seconds with at least one active call
    pub seconds_touched: usize,
    pub peak_concurrency: u32,
}

/// Complete JSON report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonReport {
    pub window_start: String,
    pub top_seconds: Vec<TopKEntry>,
    pub summary: JsonRunSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub csv: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub persistence_errors: Vec<String>,
}

impl JsonRunSummary {
    pub fn from_run(report: &RunReport) -> Self {
        Self {
            fetched: report.fetched,
            eligible: report.eligible,
            counted: report.outcome.counted,
            rejected_intervals: report.outcome.rejected.len(),
            unusable_records: report.unusable.len(),
            skipped_zero_duration: report.outcome.skipped_zero_duration,
            seconds_touched: report.outcome.histogram.len(),
            peak_concurrency: report.outcome.histogram.max_count(),
        }
    }
}

impl JsonReport {
    pub fn from_run(report: &RunReport) -> Self {
        Self {
            window_start: report.window_start.to_string(),
            top_seconds: report.top_k.clone(),
            summary: JsonRunSummary::from_run(report),
            database: None,
            csv: None,
            persistence_errors: report
                .persistence_failures
                .iter()
                .map(|f| format!("{} ({}): {}", f.sink, f.stage, f.error))
                .collect(),
        }
    }

    pub fn with_artifacts(mut self, database: Option<String>, csv: Option<String>) -> Self {
        self.database = database;
        self.csv = csv;
        self
    }

    /// Serialize to pretty-printed JSON string
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
