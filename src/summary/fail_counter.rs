//! Per-cycle failure timeline and budget checks
//!
//! The counter records terminal page failures as they happen and answers two
//! questions: mid-cycle, "may we still skip another page?", and at cycle
//! end, "was the whole cycle within the configured budgets?". Successes
//! insert separators so consecutive-failure runs can be recomputed later.

use crate::options::ErrorHandlingPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimelineEntry {
    /// A terminal page failure; the page identifier when the strategy has one
    Fail(Option<i64>),
    /// Marks the end of a failure run
    Separator,
}

/// Tracks terminal page failures over one cycle
#[derive(Debug)]
pub struct FailCounter {
    skip_page_if_possible: bool,
    max_total: i64,
    max_consecutive: i64,
    timeline: Vec<TimelineEntry>,
    total_fails: i64,
    consecutive_fails: i64,
}

impl FailCounter {
    pub(crate) fn new(policy: &ErrorHandlingPolicy) -> Self {
        Self {
            skip_page_if_possible: policy.skip_page_if_possible,
            max_total: policy.max_total_page_fails,
            max_consecutive: policy.max_consecutive_page_fails,
            timeline: Vec::new(),
            total_fails: 0,
            consecutive_fails: 0,
        }
    }

    /// Record a page success: resets the consecutive counter and closes any
    /// open failure run.
    pub(crate) fn success(&mut self) {
        self.consecutive_fails = 0;
        if matches!(self.timeline.last(), Some(TimelineEntry::Fail(_))) {
            self.timeline.push(TimelineEntry::Separator);
        }
    }

    /// Record a terminal page failure.
    ///
    /// Returns `true` when the cycle may not skip any more pages: either
    /// skipping is disabled or a budget is exhausted. The caller is expected
    /// to end the cycle on `true`.
    pub(crate) fn fail(&mut self, page: Option<i64>) -> bool {
        self.timeline.push(TimelineEntry::Fail(page));
        self.total_fails += 1;
        self.consecutive_fails += 1;
        !(self.skip_page_if_possible
            && self.total_fails <= self.max_total
            && self.consecutive_fails <= self.max_consecutive)
    }

    /// Decide whether the finished cycle counts as completed.
    ///
    /// When `last_page` is known, failures recorded for pages beyond it are
    /// overshoot from concurrent allocation and do not count. A cycle with no
    /// counted failures is always within limits; otherwise the budgets apply
    /// and skipping must have been allowed.
    pub(crate) fn complete(&self, last_page: Option<i64>) -> bool {
        let mut total = 0i64;
        let mut run = 0i64;
        let mut max_run = 0i64;
        for entry in &self.timeline {
            match entry {
                TimelineEntry::Separator => run = 0,
                TimelineEntry::Fail(page) => {
                    let counted = match (last_page, page) {
                        (Some(last), Some(p)) => *p <= last,
                        _ => true,
                    };
                    if counted {
                        total += 1;
                        run += 1;
                        max_run = max_run.max(run);
                    }
                }
            }
        }
        if total == 0 {
            return true;
        }
        self.skip_page_if_possible && total <= self.max_total && max_run <= self.max_consecutive
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(skip: bool, max_total: i64, max_consecutive: i64) -> ErrorHandlingPolicy {
        ErrorHandlingPolicy {
            skip_page_if_possible: skip,
            max_total_page_fails: max_total,
            max_consecutive_page_fails: max_consecutive,
            ..ErrorHandlingPolicy::default()
        }
    }

    #[test]
    fn test_fail_with_skip_disabled_cannot_skip() {
        let mut counter = FailCounter::new(&policy(false, i64::MAX, i64::MAX));
        assert!(counter.fail(Some(1)));
    }

    #[test]
    fn test_fail_within_budgets_may_skip() {
        let mut counter = FailCounter::new(&policy(true, 3, 2));
        assert!(!counter.fail(Some(1)));
        assert!(!counter.fail(Some(2)));
        // Third consecutive failure exceeds the consecutive budget.
        assert!(counter.fail(Some(3)));
    }

    #[test]
    fn test_success_resets_consecutive_run() {
        let mut counter = FailCounter::new(&policy(true, 10, 2));
        assert!(!counter.fail(Some(1)));
        assert!(!counter.fail(Some(2)));
        counter.success();
        assert!(!counter.fail(Some(3)));
        assert!(!counter.fail(Some(4)));
        assert!(counter.fail(Some(5)));
    }

    #[test]
    fn test_zero_total_budget_terminates_on_first_failure() {
        let mut counter = FailCounter::new(&policy(true, 0, i64::MAX));
        assert!(counter.fail(Some(1)));
    }

    #[test]
    fn test_negative_budget_terminates_on_first_failure() {
        let mut counter = FailCounter::new(&policy(true, -1, i64::MAX));
        assert!(counter.fail(Some(1)));
    }

    #[test]
    fn test_complete_with_no_failures_is_always_true() {
        let counter = FailCounter::new(&policy(false, 0, 0));
        assert!(counter.complete(None));
    }

    #[test]
    fn test_complete_applies_budgets() {
        let mut counter = FailCounter::new(&policy(true, 2, 2));
        counter.fail(Some(1));
        counter.success();
        counter.fail(Some(3));
        assert!(counter.complete(None));

        let mut counter = FailCounter::new(&policy(false, i64::MAX, i64::MAX));
        counter.fail(Some(1));
        assert!(!counter.complete(None));
    }

    #[test]
    fn test_complete_ignores_overshoot_pages() {
        let mut counter = FailCounter::new(&policy(true, 1, 1));
        counter.fail(Some(2));
        counter.fail(Some(9));
        counter.fail(Some(10));
        // Pages 9 and 10 overshoot a discovered last page of 5.
        assert!(counter.complete(Some(5)));
        // Without the restriction the same timeline busts the budget.
        assert!(!counter.complete(None));
    }

    #[test]
    fn test_complete_counts_unidentified_failures() {
        let mut counter = FailCounter::new(&policy(false, i64::MAX, i64::MAX));
        counter.fail(None);
        assert!(!counter.complete(Some(5)));
    }
}
