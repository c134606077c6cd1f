//! Run configuration
//!
//! Everything a run needs is carried here explicitly and handed to the
//! pipeline; nothing is read from process-wide state after parsing.

use crate::error::{ReportError, Result};
use crate::histogram::ZeroDurationPolicy;
use crate::top_k::DEFAULT_TOP_K;
use chrono::{Days, Local, NaiveDate, NaiveDateTime};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Public provider API endpoint
pub const DEFAULT_API_BASE_URL: &str = "https://api.twilio.com";

/// Date format accepted for the window start
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Account identifier and secret token for the provider API
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub account_sid: String,
    pub auth_token: String,
}

impl Credentials {
    /// Both halves must be present and non-blank
    pub fn from_parts(account_sid: Option<&str>, auth_token: Option<&str>) -> Result<Self> {
        fn present(v: Option<&str>) -> Option<&str> {
            v.map(str::trim).filter(|v| !v.is_empty())
        }

        match (present(account_sid), present(auth_token)) {
            (Some(sid), Some(token)) => Ok(Self {
                account_sid: sid.to_string(),
                auth_token: token.to_string(),
            }),
            (None, _) => Err(ReportError::Credential(
                "missing account SID; pass --account-sid".to_string(),
            )),
            (_, None) => Err(ReportError::Credential(
                "missing auth token; pass --auth-token".to_string(),
            )),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("account_sid", &self.account_sid)
            .field("auth_token", &"<redacted>")
            .finish()
    }
}

/// How the provider API is reached
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub base_url: String,
    pub credentials: Credentials,
    /// Per-request timeout
    pub request_timeout: Duration,
    /// Retries after an HTTP 429 before giving up
    pub max_retries: u32,
    /// First backoff delay; doubled on every retry
    pub retry_base_delay: Duration,
}

impl ProviderConfig {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            base_url: DEFAULT_API_BASE_URL.to_string(),
            credentials,
            request_timeout: Duration::from_secs(60),
            max_retries: 3,
            retry_base_delay: Duration::from_millis(500),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, base_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_base_delay = base_delay;
        self
    }
}

/// Where run artifacts land
#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub directory: PathBuf,
    /// Write the top-K CSV next to the database
    pub export_csv: bool,
    /// Persist every eligible call to the `calls` table
    pub verbose: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("."),
            export_csv: true,
            verbose: false,
        }
    }
}

/// Configuration of one report run
#[derive(Debug, Clone)]
pub struct ReportConfig {
    /// Calls starting after this date are fetched
    pub window_start: NaiveDate,
    pub provider: ProviderConfig,
    pub output: OutputConfig,
    pub top_k: usize,
    pub zero_duration: ZeroDurationPolicy,
    /// Deadline for the whole fetch stage
    pub fetch_timeout: Duration,
    /// Local time the run started; names the output files
    pub run_at: NaiveDateTime,
}

impl ReportConfig {
    pub fn new(window_start: NaiveDate, provider: ProviderConfig) -> Self {
        Self {
            window_start,
            provider,
            output: OutputConfig::default(),
            top_k: DEFAULT_TOP_K,
            zero_duration: ZeroDurationPolicy::default(),
            fetch_timeout: Duration::from_secs(300),
            run_at: Local::now().naive_local(),
        }
    }

    /// `{account_sid}_{YYYY-MM-DD}_run_at_{HH.MM.SS}.db`
    pub fn database_file_name(&self) -> String {
        format!(
            "{}_{}.db",
            self.provider.credentials.account_sid,
            self.run_at.format("%Y-%m-%d_run_at_%H.%M.%S")
        )
    }

    pub fn database_path(&self) -> PathBuf {
        self.output.directory.join(self.database_file_name())
    }

    /// CSV export sits next to the database: `{database file}.csv`
    pub fn csv_path(&self) -> PathBuf {
        self.output
            .directory
            .join(format!("{}.csv", self.database_file_name()))
    }
}

/// Parse a `YYYY-MM-DD` window start, defaulting to yesterday
pub fn resolve_window_start(input: Option<&str>, today: NaiveDate) -> Result<NaiveDate> {
    match input {
        Some(raw) => NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT).map_err(|_| {
            ReportError::InvalidDate {
                input: raw.to_string(),
            }
        }),
        None => today
            .checked_sub_days(Days::new(1))
            .ok_or_else(|| ReportError::InvalidDate {
                input: today.to_string(),
            }),
    }
}
