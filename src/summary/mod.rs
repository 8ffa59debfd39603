//! Cycle summaries and the running accumulator behind them
//!
//! Drivers feed the [`SummaryAccumulator`] while a cycle runs; at cycle end
//! `summarize()` freezes the totals into an immutable [`CycleSummary`] value
//! that is handed to the summary handler and broadcast on the event bus.

pub(crate) mod fail_counter;

use std::collections::BTreeSet;
use std::time::Instant;

use serde::Serialize;

pub(crate) use fail_counter::FailCounter;

// ============================================================================
// Summary Value Types
// ============================================================================

/// The immutable result of one cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleSummary {
    /// Whether the cycle ran to its natural end within the failure budgets
    pub completed: bool,
    /// Counters and timings collected over the cycle
    pub stats: CycleStats,
}

/// Counters collected over one cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleStats {
    /// Total pages of the source (resolved total, discovered last page, or
    /// the number of pages allocated when neither was learned)
    pub total_page_count: i64,
    /// Sorted, deduplicated page identifiers that exhausted their retries
    pub failed_page_list: Vec<i64>,
    /// Every fetch or resolve failure, including retried attempts
    pub total_error_count: u64,
    /// Wall-clock timings
    pub timings: CycleTimings,
}

/// Wall-clock timings for one cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleTimings {
    /// Cycle start as milliseconds since the Unix epoch
    pub started_at: i64,
    /// Total cycle duration in milliseconds
    pub total: u64,
    /// Mean per-attempt durations in milliseconds
    pub avg: AverageTimings,
}

/// Arithmetic mean attempt durations; a category with no samples reports 0
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AverageTimings {
    pub all: u64,
    pub successful: u64,
    pub failed: u64,
}

// ============================================================================
// Accumulator
// ============================================================================

#[derive(Debug, Default)]
struct TimingPair {
    sum: u64,
    count: u64,
}

impl TimingPair {
    fn add(&mut self, ms: u64) {
        self.sum += ms;
        self.count += 1;
    }

    fn average(&self) -> u64 {
        if self.count == 0 {
            0
        } else {
            self.sum / self.count
        }
    }
}

/// Mutable running totals for the cycle in flight
pub(crate) struct SummaryAccumulator {
    started_at: i64,
    started: Instant,
    total: Option<u64>,
    total_page_count: i64,
    failed_pages: BTreeSet<i64>,
    total_error_count: u64,
    all: TimingPair,
    successful: TimingPair,
    failed: TimingPair,
}

impl SummaryAccumulator {
    pub(crate) fn new() -> Self {
        Self {
            started_at: chrono::Utc::now().timestamp_millis(),
            started: Instant::now(),
            total: None,
            total_page_count: 0,
            failed_pages: BTreeSet::new(),
            total_error_count: 0,
            all: TimingPair::default(),
            successful: TimingPair::default(),
            failed: TimingPair::default(),
        }
    }

    /// Record one attempt's duration under `all` plus its outcome bucket
    pub(crate) fn record_attempt(&mut self, success: bool, elapsed_ms: u64) {
        self.all.add(elapsed_ms);
        if success {
            self.successful.add(elapsed_ms);
        } else {
            self.failed.add(elapsed_ms);
        }
    }

    /// Count one fetch or resolve failure (terminal or not)
    pub(crate) fn record_error(&mut self) {
        self.total_error_count += 1;
    }

    /// Record a page that exhausted its retries
    pub(crate) fn record_failed_page(&mut self, page: i64) {
        self.failed_pages.insert(page);
    }

    pub(crate) fn set_total_page_count(&mut self, count: i64) {
        self.total_page_count = count;
    }

    /// Freeze the totals into an immutable summary. The total duration is
    /// fixed on first call.
    pub(crate) fn summarize(&mut self, completed: bool) -> CycleSummary {
        let elapsed = self.started.elapsed().as_millis() as u64;
        let total = *self.total.get_or_insert(elapsed);
        CycleSummary {
            completed,
            stats: CycleStats {
                total_page_count: self.total_page_count,
                failed_page_list: self.failed_pages.iter().copied().collect(),
                total_error_count: self.total_error_count,
                timings: CycleTimings {
                    started_at: self.started_at,
                    total,
                    avg: AverageTimings {
                        all: self.all.average(),
                        successful: self.successful.average(),
                        failed: self.failed.average(),
                    },
                },
            },
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_cycle_reports_zero_averages() {
        let mut acc = SummaryAccumulator::new();
        let summary = acc.summarize(true);
        assert!(summary.completed);
        assert_eq!(summary.stats.timings.avg, AverageTimings::default());
        assert!(summary.stats.failed_page_list.is_empty());
        assert_eq!(summary.stats.total_error_count, 0);
    }

    #[test]
    fn test_averages_are_arithmetic_means() {
        let mut acc = SummaryAccumulator::new();
        acc.record_attempt(true, 10);
        acc.record_attempt(true, 20);
        acc.record_attempt(false, 60);
        let summary = acc.summarize(false);
        assert_eq!(summary.stats.timings.avg.all, 30);
        assert_eq!(summary.stats.timings.avg.successful, 15);
        assert_eq!(summary.stats.timings.avg.failed, 60);
    }

    #[test]
    fn test_failed_pages_are_sorted_and_deduplicated() {
        let mut acc = SummaryAccumulator::new();
        acc.record_failed_page(5);
        acc.record_failed_page(2);
        acc.record_failed_page(5);
        acc.record_failed_page(-1);
        let summary = acc.summarize(false);
        assert_eq!(summary.stats.failed_page_list, vec![-1, 2, 5]);
    }

    #[test]
    fn test_total_is_frozen_on_first_summarize() {
        let mut acc = SummaryAccumulator::new();
        let first = acc.summarize(true);
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = acc.summarize(true);
        assert_eq!(first.stats.timings.total, second.stats.timings.total);
    }

    #[test]
    fn test_error_count_includes_intermediate_attempts() {
        let mut acc = SummaryAccumulator::new();
        acc.record_error();
        acc.record_error();
        acc.record_error();
        let summary = acc.summarize(false);
        assert_eq!(summary.stats.total_error_count, 3);
    }

    #[test]
    fn test_started_at_is_not_in_the_future() {
        let mut acc = SummaryAccumulator::new();
        let summary = acc.summarize(true);
        assert!(summary.stats.timings.started_at <= chrono::Utc::now().timestamp_millis());
    }
}
