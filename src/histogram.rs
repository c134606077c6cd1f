//! Per-second concurrency counting
//!
//! Turns call intervals into a sparse occupancy histogram: for every epoch
//! second covered by at least one call, the number of calls active during it.
//! Intervals are inclusive at both ends, so a call from second 10 to second 12
//! occupies buckets 10, 11 and 12.
//!
//! Counting uses a sparse difference array: +1 at each start, -1 one second
//! past each end, then a single sweep over the sorted boundaries. Cost is
//! O(n log n + distinct seconds touched) instead of O(total call seconds).
//! Boundaries are kept as `i128` so a call ending at `i64::MAX` still closes.
//! Bucket counts saturate at `u32::MAX` in both counters.

use crate::error::InvalidIntervalError;
use crate::interval::CallInterval;
use std::collections::BTreeMap;

/// What to do with calls whose start and end fall on the same second
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ZeroDurationPolicy {
    /// Drop them; they never reach the histogram
    #[default]
    Exclude,
    /// Count them at their single second
    CountSingleSecond,
}

/// Sparse mapping from epoch second to number of concurrently active calls
///
/// Only seconds with a non-zero count are stored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OccupancyHistogram {
    counts: BTreeMap<i64, u32>,
}

impl OccupancyHistogram {
    /// Build from (epoch, count) pairs, dropping zero counts
    pub fn from_counts(counts: impl IntoIterator<Item = (i64, u32)>) -> Self {
        Self {
            counts: counts.into_iter().filter(|&(_, c)| c > 0).collect(),
        }
    }

    /// Count at a second (0 when no call covers it)
    pub fn get(&self, epoch: i64) -> u32 {
        self.counts.get(&epoch).copied().unwrap_or(0)
    }

    /// Number of distinct seconds touched
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Entries in ascending epoch order
    pub fn iter(&self) -> impl Iterator<Item = (i64, u32)> + '_ {
        self.counts.iter().map(|(&epoch, &count)| (epoch, count))
    }

    /// Highest concurrency observed
    pub fn max_count(&self) -> u32 {
        self.counts.values().copied().max().unwrap_or(0)
    }
}

/// Result of one counting pass
#[derive(Debug, Clone, Default)]
pub struct CountOutcome {
    pub histogram: OccupancyHistogram,
    /// Intervals rejected for ending before they start
    pub rejected: Vec<InvalidIntervalError>,
    /// Zero-duration intervals dropped under [`ZeroDurationPolicy::Exclude`]
    pub skipped_zero_duration: usize,
    /// Intervals that contributed to the histogram
    pub counted: usize,
}

/// Builds occupancy histograms from call intervals
#[derive(Debug, Clone, Copy, Default)]
pub struct ConcurrencyCounter {
    zero_duration: ZeroDurationPolicy,
}

impl ConcurrencyCounter {
    pub fn new(zero_duration: ZeroDurationPolicy) -> Self {
        Self { zero_duration }
    }

    /// Count concurrency with the difference-array sweep
    ///
    /// Inverted intervals are rejected one by one (logged and returned in the
    /// outcome); the remaining intervals are still counted.
    pub fn count<'a>(&self, intervals: impl IntoIterator<Item = &'a CallInterval>) -> CountOutcome {
        let mut outcome = CountOutcome::default();
        let mut boundaries: BTreeMap<i128, i64> = BTreeMap::new();

        for interval in intervals {
            if !self.admit(interval, &mut outcome) {
                continue;
            }
            *boundaries.entry(i128::from(interval.start_epoch)).or_default() += 1;
            *boundaries
                .entry(i128::from(interval.end_epoch) + 1)
                .or_default() -= 1;
        }

        let mut counts = Vec::new();
        let mut active: i64 = 0;
        let mut sweep = boundaries.into_iter().peekable();
        while let Some((at, delta)) = sweep.next() {
            active += delta;
            if active <= 0 {
                continue;
            }
            // The last boundary always closes every open interval, so a
            // positive count always has a successor.
            if let Some(&(next, _)) = sweep.peek() {
                let count = u32::try_from(active).unwrap_or(u32::MAX);
                // Open spans never reach past i64::MAX + 1, so every second fits
                counts.extend((at..next).filter_map(|second| {
                    i64::try_from(second).ok().map(|second| (second, count))
                }));
            }
        }

        outcome.histogram = OccupancyHistogram {
            counts: counts.into_iter().collect(),
        };
        tracing::debug!(
            counted = outcome.counted,
            rejected = outcome.rejected.len(),
            seconds = outcome.histogram.len(),
            "concurrency histogram built"
        );
        outcome
    }

    /// Count concurrency by incrementing every covered second
    ///
    /// O(total call seconds). Produces the same outcome as [`Self::count`];
    /// kept as the reference implementation.
    pub fn count_naive<'a>(
        &self,
        intervals: impl IntoIterator<Item = &'a CallInterval>,
    ) -> CountOutcome {
        let mut outcome = CountOutcome::default();
        let mut counts: BTreeMap<i64, u32> = BTreeMap::new();

        for interval in intervals {
            if !self.admit(interval, &mut outcome) {
                continue;
            }
            for second in interval.start_epoch..=interval.end_epoch {
                let bucket = counts.entry(second).or_default();
                *bucket = bucket.saturating_add(1);
            }
        }

        outcome.histogram = OccupancyHistogram { counts };
        outcome
    }

    /// Apply validation and the zero-duration policy
    fn admit(&self, interval: &CallInterval, outcome: &mut CountOutcome) -> bool {
        if let Err(err) = interval.validate() {
            tracing::warn!("{}; skipping", err);
            outcome.rejected.push(err);
            return false;
        }
        if interval.is_zero_duration() && self.zero_duration == ZeroDurationPolicy::Exclude {
            tracing::trace!(id = %interval.id, "zero-duration call excluded");
            outcome.skipped_zero_duration += 1;
            return false;
        }
        outcome.counted += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iv(id: &str, start: i64, end: i64) -> CallInterval {
        CallInterval::new(id, start, end)
    }

    fn as_pairs(histogram: &OccupancyHistogram) -> Vec<(i64, u32)> {
        histogram.iter().collect()
    }

    #[test]
    fn test_overlapping_pair_inclusive_ends() {
        let intervals = vec![iv("a", 10, 12), iv("b", 11, 13)];
        let outcome = ConcurrencyCounter::default().count(&intervals);
        assert_eq!(
            as_pairs(&outcome.histogram),
            vec![(10, 1), (11, 2), (12, 2), (13, 1)]
        );
        assert_eq!(outcome.counted, 2);
        assert!(outcome.rejected.is_empty());
    }

    #[test]
    fn test_empty_input() {
        let intervals: Vec<CallInterval> = Vec::new();
        let outcome = ConcurrencyCounter::default().count(&intervals);
        assert!(outcome.histogram.is_empty());
        assert_eq!(outcome.counted, 0);
        assert_eq!(outcome.histogram.max_count(), 0);
    }

    #[test]
    fn test_gap_between_calls_has_no_keys() {
        let intervals = vec![iv("a", 0, 1), iv("b", 5, 6)];
        let outcome = ConcurrencyCounter::default().count(&intervals);
        assert_eq!(as_pairs(&outcome.histogram), vec![(0, 1), (1, 1), (5, 1), (6, 1)]);
        assert_eq!(outcome.histogram.get(3), 0);
    }

    #[test]
    fn test_adjacent_calls_share_boundary_second() {
        let intervals = vec![iv("a", 0, 2), iv("b", 2, 4)];
        let outcome = ConcurrencyCounter::default().count(&intervals);
        assert_eq!(outcome.histogram.get(2), 2);
        assert_eq!(outcome.histogram.get(1), 1);
        assert_eq!(outcome.histogram.get(3), 1);
    }

    #[test]
    fn test_inverted_interval_rejected_rest_counted() {
        let intervals = vec![iv("good", 100, 101), iv("bad", 50, 40), iv("good2", 101, 102)];
        let outcome = ConcurrencyCounter::default().count(&intervals);

        assert_eq!(outcome.rejected.len(), 1);
        assert_eq!(outcome.rejected[0].id, "bad");
        assert_eq!(outcome.counted, 2);
        assert_eq!(as_pairs(&outcome.histogram), vec![(100, 1), (101, 2), (102, 1)]);
        for second in 40..=50 {
            assert_eq!(outcome.histogram.get(second), 0);
        }
    }

    #[test]
    fn test_zero_duration_excluded_by_default() {
        let intervals = vec![iv("zero", 7, 7), iv("a", 9, 10)];
        let outcome = ConcurrencyCounter::default().count(&intervals);
        assert_eq!(outcome.skipped_zero_duration, 1);
        assert_eq!(outcome.counted, 1);
        assert_eq!(outcome.histogram.get(7), 0);
        assert_eq!(outcome.histogram.len(), 2);
    }

    #[test]
    fn test_zero_duration_counted_when_configured() {
        let intervals = vec![iv("zero", 7, 7), iv("a", 7, 8)];
        let counter = ConcurrencyCounter::new(ZeroDurationPolicy::CountSingleSecond);
        let outcome = counter.count(&intervals);
        assert_eq!(outcome.skipped_zero_duration, 0);
        assert_eq!(as_pairs(&outcome.histogram), vec![(7, 2), (8, 1)]);
    }

    #[test]
    fn test_counting_is_repeatable() {
        let intervals = vec![iv("a", 1, 9), iv("b", 3, 4), iv("c", 4, 12)];
        let counter = ConcurrencyCounter::default();
        assert_eq!(counter.count(&intervals).histogram, counter.count(&intervals).histogram);
    }

    #[test]
    fn test_naive_matches_sweep() {
        let intervals = vec![
            iv("a", 1, 9),
            iv("b", 3, 4),
            iv("c", 4, 12),
            iv("d", 4, 4),
            iv("e", 20, 19),
        ];
        let counter = ConcurrencyCounter::default();
        let fast = counter.count(&intervals);
        let slow = counter.count_naive(&intervals);
        assert_eq!(fast.histogram, slow.histogram);
        assert_eq!(fast.rejected, slow.rejected);
        assert_eq!(fast.skipped_zero_duration, slow.skipped_zero_duration);
    }

    #[test]
    fn test_histogram_summaries() {
        let intervals = vec![iv("a", 0, 3), iv("b", 2, 3)];
        let histogram = ConcurrencyCounter::default().count(&intervals).histogram;
        assert_eq!(histogram.max_count(), 2);
        assert_eq!(as_pairs(&histogram), vec![(0, 1), (1, 1), (2, 2), (3, 2)]);
    }

    #[test]
    fn test_call_ending_at_last_representable_second() {
        let intervals = vec![iv("edge", i64::MAX - 2, i64::MAX), iv("b", i64::MAX - 1, i64::MAX)];
        let counter = ConcurrencyCounter::default();
        let fast = counter.count(&intervals);
        assert_eq!(
            as_pairs(&fast.histogram),
            vec![(i64::MAX - 2, 1), (i64::MAX - 1, 2), (i64::MAX, 2)]
        );
        assert_eq!(fast.histogram, counter.count_naive(&intervals).histogram);
    }

    #[test]
    fn test_call_starting_at_first_representable_second() {
        let intervals = vec![iv("edge", i64::MIN, i64::MIN + 1)];
        let counter = ConcurrencyCounter::default();
        let fast = counter.count(&intervals);
        assert_eq!(as_pairs(&fast.histogram), vec![(i64::MIN, 1), (i64::MIN + 1, 1)]);
        assert_eq!(fast.histogram, counter.count_naive(&intervals).histogram);
    }

    #[test]
    fn test_from_counts_drops_zero() {
        let histogram = OccupancyHistogram::from_counts([(1, 0), (2, 4)]);
        assert_eq!(histogram.len(), 1);
        assert_eq!(histogram.get(2), 4);
    }
}
