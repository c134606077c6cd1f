//! Report run: fetch -> filter -> count -> select -> persist
//!
//! Stages run strictly in sequence. Each stage is a separate method so a
//! caller can stop between any two of them; [`ReportPipeline::run`] chains
//! them all.

use crate::call_record::{CallRecord, UnusableRecord};
use crate::config::ReportConfig;
use crate::error::{FetchError, PersistenceError, ReportError};
use crate::histogram::{ConcurrencyCounter, CountOutcome};
use crate::interval::CallInterval;
use crate::sink::ResultSink;
use crate::source::{FetchDeadline, IntervalSource};
use crate::top_k::{select_top, TopKEntry};
use chrono::NaiveDate;
use std::time::Duration;

/// Eligible calls pulled from a source
#[derive(Debug, Default)]
pub struct FetchedCalls {
    /// Records seen, eligible or not
    pub fetched: usize,
    pub intervals: Vec<CallInterval>,
    /// Eligible raw records; only kept when records are persisted
    pub records: Vec<CallRecord>,
    /// Eligible records without usable timestamps
    pub unusable: Vec<UnusableRecord>,
}

impl FetchedCalls {
    /// Eligible records, usable or not
    pub fn eligible(&self) -> usize {
        self.intervals.len() + self.unusable.len()
    }
}

/// A sink write that failed
#[derive(Debug)]
pub struct SinkFailure {
    pub sink: String,
    pub stage: &'static str,
    pub error: PersistenceError,
}

/// Everything a finished run produced
#[derive(Debug)]
pub struct RunReport {
    pub window_start: NaiveDate,
    pub fetched: usize,
    pub eligible: usize,
    pub unusable: Vec<UnusableRecord>,
    pub records: Vec<CallRecord>,
    pub outcome: CountOutcome,
    pub top_k: Vec<TopKEntry>,
    pub persistence_failures: Vec<SinkFailure>,
}

impl RunReport {
    /// Assemble the report from the outputs of each stage
    pub fn new(
        window_start: NaiveDate,
        fetched: FetchedCalls,
        outcome: CountOutcome,
        top_k: Vec<TopKEntry>,
        persistence_failures: Vec<SinkFailure>,
    ) -> Self {
        Self {
            window_start,
            fetched: fetched.fetched,
            eligible: fetched.eligible(),
            unusable: fetched.unusable,
            records: fetched.records,
            outcome,
            top_k,
            persistence_failures,
        }
    }

    /// True when every sink accepted every write
    pub fn fully_persisted(&self) -> bool {
        self.persistence_failures.is_empty()
    }

    /// First sink failure as a run error, if any
    pub fn persistence_error(&mut self) -> Option<ReportError> {
        if self.persistence_failures.is_empty() {
            return None;
        }
        let failure = self.persistence_failures.remove(0);
        Some(ReportError::Persistence(failure.error))
    }
}

/// Stateless driver for one report run
#[derive(Debug, Clone)]
pub struct ReportPipeline {
    window_start: NaiveDate,
    counter: ConcurrencyCounter,
    top_k: usize,
    fetch_timeout: Duration,
    keep_records: bool,
}

impl ReportPipeline {
    pub fn new(window_start: NaiveDate) -> Self {
        Self {
            window_start,
            counter: ConcurrencyCounter::default(),
            top_k: crate::top_k::DEFAULT_TOP_K,
            fetch_timeout: Duration::from_secs(300),
            keep_records: false,
        }
    }

    pub fn from_config(config: &ReportConfig) -> Self {
        Self {
            window_start: config.window_start,
            counter: ConcurrencyCounter::new(config.zero_duration),
            top_k: config.top_k,
            fetch_timeout: config.fetch_timeout,
            keep_records: config.output.verbose,
        }
    }

    pub fn with_top_k(mut self, k: usize) -> Self {
        self.top_k = k;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn with_records(mut self, keep: bool) -> Self {
        self.keep_records = keep;
        self
    }

    /// Pull the window's calls and keep the eligible ones
    ///
    /// Aborts on the first fetch error or once the fetch timeout elapses,
    /// including while the source is waiting on the provider.
    pub fn fetch_eligible(&self, source: &dyn IntervalSource) -> Result<FetchedCalls, FetchError> {
        let deadline = FetchDeadline::after(self.fetch_timeout);
        let mut fetched = FetchedCalls::default();

        for item in source.fetch(self.window_start, deadline) {
            let record = item?;
            deadline.check()?;
            fetched.fetched += 1;

            if !record.is_eligible() {
                continue;
            }
            match record.to_interval() {
                Ok(interval) => fetched.intervals.push(interval),
                Err(unusable) => {
                    tracing::warn!("{}; not counted", unusable);
                    fetched.unusable.push(unusable);
                }
            }
            if self.keep_records {
                fetched.records.push(record);
            }
        }

        tracing::info!(
            fetched = fetched.fetched,
            eligible = fetched.eligible(),
            unusable = fetched.unusable.len(),
            "call log fetched"
        );
        Ok(fetched)
    }

    /// Build the histogram and pick the busiest seconds
    pub fn compute(&self, intervals: &[CallInterval]) -> (CountOutcome, Vec<TopKEntry>) {
        let outcome = self.counter.count(intervals);
        let top = select_top(&outcome.histogram, self.top_k);
        (outcome, top)
    }

    /// Hand results to every sink, collecting failures instead of stopping
    pub fn persist(
        &self,
        records: &[CallRecord],
        outcome: &CountOutcome,
        top: &[TopKEntry],
        sinks: &mut [Box<dyn ResultSink>],
    ) -> Vec<SinkFailure> {
        let mut failures = Vec::new();

        for sink in sinks.iter_mut() {
            let mut check = |stage: &'static str, result: Result<(), PersistenceError>, name: &str| {
                if let Err(error) = result {
                    tracing::error!(sink = name, stage, "persist failed: {}", error);
                    failures.push(SinkFailure {
                        sink: name.to_string(),
                        stage,
                        error,
                    });
                }
            };

            let name = sink.name().to_string();
            if self.keep_records {
                check("records", sink.persist_records(records), &name);
            }
            check("histogram", sink.persist_histogram(&outcome.histogram), &name);
            check("top_k", sink.persist_top_k(top), &name);
        }

        failures
    }

    /// Run every stage in order
    pub fn run(
        &self,
        source: &dyn IntervalSource,
        sinks: Vec<Box<dyn ResultSink>>,
    ) -> Result<RunReport, ReportError> {
        self.run_with(source, move || (sinks, Vec::new()))
    }

    /// Run every stage, opening the sinks only once the fetch succeeded
    ///
    /// `open_sinks` returns the sinks it could open and a failure for each
    /// one it could not. Sinks are dropped before the report is returned.
    pub fn run_with<F>(
        &self,
        source: &dyn IntervalSource,
        open_sinks: F,
    ) -> Result<RunReport, ReportError>
    where
        F: FnOnce() -> (Vec<Box<dyn ResultSink>>, Vec<SinkFailure>),
    {
        let fetched = self.fetch_eligible(source)?;
        let (outcome, top) = self.compute(&fetched.intervals);

        let (mut sinks, mut failures) = open_sinks();
        failures.extend(self.persist(&fetched.records, &outcome, &top, &mut sinks));
        drop(sinks);

        Ok(RunReport::new(self.window_start, fetched, outcome, top, failures))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::histogram::OccupancyHistogram;
    use crate::source::MemorySource;

    fn call(sid: &str, direction: &str, status: &str, start: &str, end: Option<&str>) -> CallRecord {
        CallRecord {
            sid: sid.to_string(),
            date_created: None,
            start_time: Some(format!("Mon, 01 Jul 2019 {} +0000", start)),
            end_time: end.map(|e| format!("Mon, 01 Jul 2019 {} +0000", e)),
            to_formatted: None,
            from_formatted: None,
            direction: direction.to_string(),
            duration: None,
            status: status.to_string(),
        }
    }

    fn window() -> NaiveDate {
        NaiveDate::from_ymd_opt(2019, 7, 1).unwrap()
    }

    const T0: i64 = 1_561_939_200;

    struct FailingSink;

    impl ResultSink for FailingSink {
        fn name(&self) -> &str {
            "failing"
        }

        fn persist_top_k(&mut self, _entries: &[TopKEntry]) -> Result<(), PersistenceError> {
            Err(PersistenceError::Io(std::io::Error::other("disk full")))
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        records: usize,
        histogram: Option<OccupancyHistogram>,
        top: Vec<TopKEntry>,
    }

    impl ResultSink for RecordingSink {
        fn name(&self) -> &str {
            "recording"
        }

        fn persist_record(&mut self, _record: &CallRecord) -> Result<(), PersistenceError> {
            self.records += 1;
            Ok(())
        }

        fn persist_histogram(&mut self, histogram: &OccupancyHistogram) -> Result<(), PersistenceError> {
            self.histogram = Some(histogram.clone());
            Ok(())
        }

        fn persist_top_k(&mut self, entries: &[TopKEntry]) -> Result<(), PersistenceError> {
            self.top = entries.to_vec();
            Ok(())
        }
    }

    fn sample_source() -> MemorySource {
        MemorySource::new(vec![
            call("CA1", "trunking-originating", "completed", "00:00:00", Some("00:00:02")),
            call("CA2", "trunking-terminating", "completed", "00:00:01", Some("00:00:03")),
            call("CA3", "trunking-terminating", "failed", "00:00:01", Some("00:00:03")),
            call("CA4", "inbound", "completed", "00:00:01", Some("00:00:03")),
            call("CA5", "trunking-originating", "in-progress", "00:00:02", None),
        ])
    }

    #[test]
    fn test_fetch_applies_eligibility() {
        let fetched = ReportPipeline::new(window())
            .fetch_eligible(&sample_source())
            .unwrap();
        assert_eq!(fetched.fetched, 5);
        assert_eq!(fetched.intervals.len(), 2);
        assert_eq!(fetched.unusable.len(), 1);
        assert_eq!(fetched.eligible(), 3);
        assert!(fetched.records.is_empty());
    }

    #[test]
    fn test_run_counts_and_selects() {
        let pipeline = ReportPipeline::new(window()).with_top_k(2);
        let report = pipeline.run(&sample_source(), Vec::new()).unwrap();

        assert_eq!(report.outcome.histogram.get(T0), 1);
        assert_eq!(report.outcome.histogram.get(T0 + 1), 2);
        assert_eq!(report.outcome.histogram.get(T0 + 2), 2);
        assert_eq!(report.outcome.histogram.get(T0 + 3), 1);
        assert_eq!(
            report.top_k,
            vec![TopKEntry::new(T0 + 1, 2), TopKEntry::new(T0 + 2, 2)]
        );
        assert!(report.fully_persisted());
    }

    #[test]
    fn test_records_forwarded_when_kept() {
        let pipeline = ReportPipeline::new(window()).with_records(true);
        let sinks: Vec<Box<dyn ResultSink>> = vec![Box::new(RecordingSink::default())];
        let report = pipeline.run(&sample_source(), sinks).unwrap();
        assert_eq!(report.records.len(), 3);
    }

    #[test]
    fn test_sink_failure_keeps_results() {
        let pipeline = ReportPipeline::new(window());
        let sinks: Vec<Box<dyn ResultSink>> = vec![Box::new(FailingSink)];
        let mut report = pipeline.run(&sample_source(), sinks).unwrap();

        assert!(!report.fully_persisted());
        assert_eq!(report.persistence_failures[0].sink, "failing");
        assert_eq!(report.persistence_failures[0].stage, "top_k");
        assert_eq!(report.outcome.histogram.len(), 4);
        assert!(!report.top_k.is_empty());
        assert!(matches!(
            report.persistence_error(),
            Some(ReportError::Persistence(_))
        ));
    }

    #[test]
    fn test_fetch_error_aborts() {
        struct Broken;
        impl IntervalSource for Broken {
            fn fetch(
                &self,
                _window_start: NaiveDate,
                _deadline: FetchDeadline,
            ) -> crate::source::RecordStream<'_> {
                Box::new(std::iter::once(Err(FetchError::Status {
                    status: 500,
                    body: "oops".to_string(),
                })))
            }
        }

        let err = ReportPipeline::new(window()).run(&Broken, Vec::new()).unwrap_err();
        assert!(matches!(err, ReportError::Fetch(FetchError::Status { status: 500, .. })));
    }

    #[test]
    fn test_zero_fetch_timeout_aborts() {
        let pipeline = ReportPipeline::new(window()).with_fetch_timeout(Duration::ZERO);
        let err = pipeline.fetch_eligible(&sample_source());
        assert!(matches!(err, Err(FetchError::Timeout(_))));
    }

    #[test]
    fn test_sinks_not_opened_when_fetch_fails() {
        let pipeline = ReportPipeline::new(window()).with_fetch_timeout(Duration::ZERO);
        let mut opened = false;
        let result = pipeline.run_with(&sample_source(), || {
            opened = true;
            (Vec::new(), Vec::new())
        });
        assert!(matches!(result, Err(ReportError::Fetch(FetchError::Timeout(_)))));
        assert!(!opened);
    }

    #[test]
    fn test_open_failures_reported_with_results() {
        let report = ReportPipeline::new(window())
            .run_with(&sample_source(), || {
                let failure = SinkFailure {
                    sink: "sqlite".to_string(),
                    stage: "open",
                    error: PersistenceError::Io(std::io::Error::other("read-only")),
                };
                (vec![Box::new(RecordingSink::default()) as Box<dyn ResultSink>], vec![failure])
            })
            .unwrap();
        assert_eq!(report.persistence_failures.len(), 1);
        assert_eq!(report.persistence_failures[0].stage, "open");
        assert_eq!(report.outcome.histogram.len(), 4);
    }

    #[test]
    fn test_empty_source() {
        let report = ReportPipeline::new(window())
            .run(&MemorySource::default(), Vec::new())
            .unwrap();
        assert!(report.outcome.histogram.is_empty());
        assert!(report.top_k.is_empty());
        assert_eq!(report.fetched, 0);
    }
}
