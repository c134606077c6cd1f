//! Error taxonomy for a concurrency report run
//!
//! Each stage of the run fails with its own type so callers can tell a bad
//! date from rejected credentials from a provider outage from a bad record.

use thiserror::Error;

/// A call interval whose end precedes its start
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid interval for call {id}: end {end_epoch} precedes start {start_epoch}")]
pub struct InvalidIntervalError {
    pub id: String,
    pub start_epoch: i64,
    pub end_epoch: i64,
}

/// Errors raised while pulling call records from the provider
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Provider rejected credentials (HTTP {status})")]
    Unauthorized { status: u16 },

    #[error("Provider rate limit still exceeded after {attempts} attempts")]
    RateLimited { attempts: u32 },

    #[error("Provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to decode provider response: {0}")]
    Decode(String),

    #[error("Fetch did not complete within {0:?}")]
    Timeout(std::time::Duration),
}

/// Errors raised by a result sink
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that abort a report run
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Invalid start date '{input}': expected a real date in YYYY-MM-DD format")]
    InvalidDate { input: String },

    #[error("Credential error: {0}")]
    Credential(String),

    #[error("Failed to retrieve call logs: {0}")]
    Fetch(FetchError),

    #[error("Failed to persist results: {0}")]
    Persistence(#[from] PersistenceError),
}

impl From<FetchError> for ReportError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Unauthorized { status } => ReportError::Credential(format!(
                "provider rejected the account SID / auth token (HTTP {})",
                status
            )),
            other => ReportError::Fetch(other),
        }
    }
}

impl ReportError {
    /// Process exit code for this failure
    pub fn exit_code(&self) -> u8 {
        match self {
            ReportError::InvalidDate { .. } => 2,
            ReportError::Credential(_) => 3,
            ReportError::Fetch(_) => 4,
            ReportError::Persistence(_) => 5,
        }
    }
}

/// Result type for report runs
pub type Result<T> = std::result::Result<T, ReportError>;
