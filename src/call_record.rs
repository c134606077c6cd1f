//! Raw call detail records as delivered by the provider
//!
//! A record is only counted when it is a trunking call that did not fail and
//! carries both a start and an end timestamp.

use crate::interval::CallInterval;
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Direction substring marking an Elastic SIP Trunking call
pub const TRUNKING_MARKER: &str = "trunking";

/// Status of calls excluded from counting
pub const FAILED_STATUS: &str = "failed";

/// One call detail record from the provider's `Calls` resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallRecord {
    pub sid: String,
    #[serde(default)]
    pub date_created: Option<String>,
    #[serde(default)]
    pub start_time: Option<String>,
    /// Absent while the call is still in progress
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub to_formatted: Option<String>,
    #[serde(default)]
    pub from_formatted: Option<String>,
    pub direction: String,
    /// Duration in seconds, as a decimal string
    #[serde(default)]
    pub duration: Option<String>,
    pub status: String,
}

/// A record that passed the eligibility filter but cannot become an interval
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UnusableRecord {
    #[error("call {sid} has no {field}")]
    MissingTimestamp { sid: String, field: &'static str },

    #[error("call {sid} has unparseable {field} '{value}'")]
    BadTimestamp {
        sid: String,
        field: &'static str,
        value: String,
    },
}

impl CallRecord {
    /// Trunking direction and a status other than failed
    pub fn is_eligible(&self) -> bool {
        self.direction.contains(TRUNKING_MARKER) && self.status != FAILED_STATUS
    }

    /// Convert start/end timestamps into an epoch-second interval
    ///
    /// No ordering check happens here; the counter rejects inverted intervals.
    pub fn to_interval(&self) -> Result<CallInterval, UnusableRecord> {
        let start = self.epoch_of("start_time", self.start_time.as_deref())?;
        let end = self.epoch_of("end_time", self.end_time.as_deref())?;
        Ok(CallInterval::new(self.sid.clone(), start, end))
    }

    fn epoch_of(&self, field: &'static str, value: Option<&str>) -> Result<i64, UnusableRecord> {
        let value = value
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| UnusableRecord::MissingTimestamp {
                sid: self.sid.clone(),
                field,
            })?;

        parse_provider_timestamp(value).ok_or_else(|| UnusableRecord::BadTimestamp {
            sid: self.sid.clone(),
            field,
            value: value.to_string(),
        })
    }
}

/// Parse a provider timestamp (RFC 2822, falling back to RFC 3339) to epoch seconds
pub fn parse_provider_timestamp(value: &str) -> Option<i64> {
    DateTime::parse_from_rfc2822(value)
        .or_else(|_| DateTime::parse_from_rfc3339(value))
        .ok()
        .map(|dt| dt.timestamp())
}
