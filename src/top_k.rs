//! Busiest-second selection over an occupancy histogram

use crate::histogram::OccupancyHistogram;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Default number of seconds reported
pub const DEFAULT_TOP_K: usize = 25;

/// One reported second and its concurrency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopKEntry {
    pub epoch: i64,
    pub count: u32,
}

impl TopKEntry {
    pub fn new(epoch: i64, count: u32) -> Self {
        Self { epoch, count }
    }
}

/// Report order: count descending, then epoch ascending
fn report_order(a: &TopKEntry, b: &TopKEntry) -> Ordering {
    b.count.cmp(&a.count).then(a.epoch.cmp(&b.epoch))
}

/// Select the `k` busiest seconds
///
/// Returns fewer than `k` entries when the histogram has fewer distinct
/// seconds. Ties on count are broken by the earlier second.
pub fn select_top(histogram: &OccupancyHistogram, k: usize) -> Vec<TopKEntry> {
    if k == 0 || histogram.is_empty() {
        return Vec::new();
    }

    let mut entries: Vec<TopKEntry> = histogram
        .iter()
        .map(|(epoch, count)| TopKEntry::new(epoch, count))
        .collect();

    if k < entries.len() {
        entries.select_nth_unstable_by(k - 1, report_order);
        entries.truncate(k);
    }
    entries.sort_unstable_by(report_order);
    entries
}
