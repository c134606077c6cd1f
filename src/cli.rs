//! CLI argument parsing for trunkpeak

use crate::config::{
    resolve_window_start, Credentials, OutputConfig, ProviderConfig, ReportConfig,
    DEFAULT_API_BASE_URL,
};
use crate::error::Result;
use crate::histogram::ZeroDurationPolicy;
use chrono::Local;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

/// Output format for the stdout report
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table (default)
    Text,
    /// JSON document for machine parsing
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "trunkpeak")]
#[command(version)]
#[command(
    about = "Find the seconds with the most concurrent SIP trunking calls",
    long_about = None
)]
pub struct Cli {
    /// Day the report should start from, YYYY-MM-DD (default: yesterday)
    #[arg(long = "date-start", alias = "datestart", value_name = "DATE")]
    pub date_start: Option<String>,

    /// Account SID from the provider console
    #[arg(long = "account-sid", alias = "account_sid", value_name = "SID")]
    pub account_sid: Option<String>,

    /// Auth token from the provider console
    #[arg(long = "auth-token", alias = "auth_token", value_name = "TOKEN")]
    pub auth_token: Option<String>,

    /// Do not export a CSV file
    #[arg(long = "no-csv", alias = "nocsv")]
    pub no_csv: bool,

    /// Print every trunking call and store it in the calls table
    #[arg(short, long)]
    pub verbose: bool,

    /// Number of busiest seconds to report
    #[arg(long = "top", value_name = "N", default_value = "25")]
    pub top: usize,

    /// Count zero-duration calls at their single second instead of dropping them
    #[arg(long = "count-zero-duration")]
    pub count_zero_duration: bool,

    /// Output format (text or json)
    #[arg(long = "format", value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Directory for the database and CSV files
    #[arg(long = "output-dir", value_name = "DIR", default_value = ".")]
    pub output_dir: PathBuf,

    /// Seconds allowed for fetching the call log
    #[arg(long = "timeout", value_name = "SECS", default_value = "300")]
    pub timeout: u64,

    /// Retries after the provider rate-limits a request
    #[arg(long = "max-retries", value_name = "N", default_value = "3")]
    pub max_retries: u32,

    /// Enable debug logging on stderr
    #[arg(long)]
    pub debug: bool,

    /// Provider API base URL
    #[arg(long = "api-base-url", hide = true, default_value = DEFAULT_API_BASE_URL)]
    pub api_base_url: String,
}

impl Cli {
    /// Validate flags into a run configuration
    ///
    /// The date is checked before credentials so a typo fails fast.
    pub fn to_config(&self) -> Result<ReportConfig> {
        let now = Local::now().naive_local();
        let window_start = resolve_window_start(self.date_start.as_deref(), now.date())?;
        let credentials =
            Credentials::from_parts(self.account_sid.as_deref(), self.auth_token.as_deref())?;

        let timeout = Duration::from_secs(self.timeout);
        let provider = ProviderConfig::new(credentials)
            .with_base_url(self.api_base_url.clone())
            .with_request_timeout(timeout)
            .with_retries(self.max_retries, Duration::from_millis(500));

        let mut config = ReportConfig::new(window_start, provider);
        config.output = OutputConfig {
            directory: self.output_dir.clone(),
            export_csv: !self.no_csv,
            verbose: self.verbose,
        };
        config.top_k = self.top;
        config.zero_duration = if self.count_zero_duration {
            ZeroDurationPolicy::CountSingleSecond
        } else {
            ZeroDurationPolicy::Exclude
        };
        config.fetch_timeout = timeout;
        config.run_at = now;
        Ok(config)
    }
}
