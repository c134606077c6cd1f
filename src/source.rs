//! Call record sources
//!
//! A source turns a window start date into a lazy, single-pass sequence of
//! call records. Pagination, authentication and rate-limit retries stay
//! behind this boundary, and all of them respect the caller's
//! [`FetchDeadline`].

use crate::call_record::{parse_provider_timestamp, CallRecord};
use crate::config::{ProviderConfig, DATE_FORMAT};
use crate::error::FetchError;
use chrono::NaiveDate;
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::{Duration, Instant};

/// Lazy stream of records; ends after the first error
pub type RecordStream<'a> = Box<dyn Iterator<Item = Result<CallRecord, FetchError>> + 'a>;

/// Point in time after which a fetch is abandoned
#[derive(Debug, Clone, Copy)]
pub struct FetchDeadline {
    /// `None` when the budget is too large to represent
    at: Option<Instant>,
    budget: Duration,
}

impl FetchDeadline {
    /// Deadline `budget` from now
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now().checked_add(budget),
            budget,
        }
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Time left before the deadline, `None` once it has passed
    pub fn remaining(&self) -> Option<Duration> {
        match self.at {
            Some(at) => at.checked_duration_since(Instant::now()).filter(|d| !d.is_zero()),
            None => Some(Duration::MAX),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_none()
    }

    /// Fail with [`FetchError::Timeout`] once the deadline has passed
    pub fn check(&self) -> Result<Duration, FetchError> {
        self.remaining().ok_or(FetchError::Timeout(self.budget))
    }
}

/// Something that can list the calls of a reporting window
pub trait IntervalSource {
    /// Start a fresh pass over calls that started after `window_start`
    ///
    /// Sources that block (network, retries) must give up with
    /// [`FetchError::Timeout`] once `deadline` passes.
    fn fetch(&self, window_start: NaiveDate, deadline: FetchDeadline) -> RecordStream<'_>;
}

/// Records held in memory, e.g. replayed from an earlier export
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    records: Vec<CallRecord>,
}

impl MemorySource {
    pub fn new(records: Vec<CallRecord>) -> Self {
        Self { records }
    }
}

impl IntervalSource for MemorySource {
    fn fetch(&self, window_start: NaiveDate, _deadline: FetchDeadline) -> RecordStream<'_> {
        let cutoff = window_start.and_time(chrono::NaiveTime::MIN).and_utc().timestamp();
        Box::new(
            self.records
                .iter()
                .filter(move |record| {
                    // Undated records pass through and are reported as unusable later
                    record
                        .start_time
                        .as_deref()
                        .and_then(parse_provider_timestamp)
                        .map_or(true, |start| start >= cutoff)
                })
                .cloned()
                .map(Ok),
        )
    }
}

/// One page of the provider's `Calls` list
#[derive(Debug, Deserialize)]
struct CallPage {
    #[serde(default)]
    calls: Vec<CallRecord>,
    #[serde(default)]
    next_page_uri: Option<String>,
}

/// Page size requested from the provider (its maximum)
const PAGE_SIZE: &str = "1000";

/// Twilio REST API call log
#[derive(Debug)]
pub struct TwilioSource {
    client: Client,
    config: ProviderConfig,
}

impl TwilioSource {
    pub fn new(config: ProviderConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("trunkpeak/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, config })
    }

    fn base_url(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    fn calls_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Calls.json",
            self.base_url(),
            self.config.credentials.account_sid
        )
    }

    /// `next_page_uri` is relative to the API host
    fn resolve(&self, uri: &str) -> String {
        if uri.starts_with("http://") || uri.starts_with("https://") {
            uri.to_string()
        } else {
            format!("{}{}", self.base_url(), uri)
        }
    }

    fn load_page(
        &self,
        request: &PageRequest,
        deadline: FetchDeadline,
    ) -> Result<CallPage, FetchError> {
        // A request may never outlive the fetch deadline
        let transport = |err: reqwest::Error| {
            if deadline.is_expired() {
                FetchError::Timeout(deadline.budget())
            } else {
                FetchError::Http(err)
            }
        };

        let mut attempt: u32 = 0;
        loop {
            let remaining = deadline.check()?;
            attempt += 1;
            let builder = match request {
                PageRequest::First(window_start) => self.client.get(self.calls_url()).query(&[
                    ("StartTime>", window_start.format(DATE_FORMAT).to_string()),
                    ("PageSize", PAGE_SIZE.to_string()),
                ]),
                PageRequest::Next(uri) => self.client.get(self.resolve(uri)),
            };

            let response = builder
                .basic_auth(
                    &self.config.credentials.account_sid,
                    Some(&self.config.credentials.auth_token),
                )
                .timeout(self.config.request_timeout.min(remaining))
                .send()
                .map_err(transport)?;

            let status = response.status();
            match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    return Err(FetchError::Unauthorized {
                        status: status.as_u16(),
                    });
                }
                StatusCode::TOO_MANY_REQUESTS => {
                    if attempt > self.config.max_retries {
                        return Err(FetchError::RateLimited { attempts: attempt });
                    }
                    let delay = retry_after(&response)
                        .unwrap_or_else(|| backoff_delay(self.config.retry_base_delay, attempt));
                    let delay = delay.min(deadline.check()?);
                    tracing::warn!(attempt, ?delay, "provider rate limit hit, backing off");
                    std::thread::sleep(delay);
                    continue;
                }
                s if !s.is_success() => {
                    let body = response.text().unwrap_or_default();
                    return Err(FetchError::Status {
                        status: s.as_u16(),
                        body,
                    });
                }
                _ => {}
            }

            let body = response.text().map_err(transport)?;
            let page: CallPage =
                serde_json::from_str(&body).map_err(|e| FetchError::Decode(e.to_string()))?;
            tracing::debug!(
                calls = page.calls.len(),
                has_next = page.next_page_uri.is_some(),
                "fetched call log page"
            );
            return Ok(page);
        }
    }
}

impl IntervalSource for TwilioSource {
    fn fetch(&self, window_start: NaiveDate, deadline: FetchDeadline) -> RecordStream<'_> {
        Box::new(PagedCalls {
            source: self,
            deadline,
            buffered: Vec::new().into_iter(),
            next: Some(PageRequest::First(window_start)),
        })
    }
}

#[derive(Debug)]
enum PageRequest {
    First(NaiveDate),
    Next(String),
}

/// Iterator that requests the next page only once the current one is drained
struct PagedCalls<'a> {
    source: &'a TwilioSource,
    deadline: FetchDeadline,
    buffered: std::vec::IntoIter<CallRecord>,
    next: Option<PageRequest>,
}

impl Iterator for PagedCalls<'_> {
    type Item = Result<CallRecord, FetchError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.buffered.next() {
                return Some(Ok(record));
            }
            let request = self.next.take()?;
            match self.source.load_page(&request, self.deadline) {
                Ok(page) => {
                    self.buffered = page.calls.into_iter();
                    self.next = page
                        .next_page_uri
                        .filter(|uri| !uri.is_empty())
                        .map(PageRequest::Next);
                }
                Err(err) => return Some(Err(err)),
            }
        }
    }
}

/// Exponential backoff: base, 2*base, 4*base, ...
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(1u32 << attempt.saturating_sub(1).min(16))
}

/// Honour an integer `Retry-After` header
fn retry_after(response: &reqwest::blocking::Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
