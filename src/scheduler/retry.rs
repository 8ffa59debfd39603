//! Pending-retry queue and retry-to-flow assignment
//!
//! Failed units wait here between dispatch ticks. Assignment runs in one of
//! two modes: plain FIFO, or *distinct flows*, where each retry is matched
//! to a free flow it has not visited yet. The distinct matching is greedy
//! with single-step reassignment: a later retry may take a claimed flow only
//! when the earlier claimant still has another option.

use std::collections::{HashMap, HashSet, VecDeque};

/// A failed unit queued for another attempt
#[derive(Debug)]
pub(crate) struct PendingRetry<P> {
    /// Driver-specific state needed to re-run the unit
    pub payload: P,
    /// Attempts remaining after this retry executes
    pub attempts_left: u32,
    /// Slot indices this unit has already been dispatched on
    pub attempted_flows: HashSet<usize>,
}

/// Ordered queue of pending retries
pub(crate) struct RetryQueue<P> {
    entries: VecDeque<PendingRetry<P>>,
}

impl<P> RetryQueue<P> {
    pub(crate) fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    pub(crate) fn push(&mut self, retry: PendingRetry<P>) {
        self.entries.push_back(retry);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Assign up to `capacity` retries onto the given free slots.
    ///
    /// Assigned retries leave the queue; unsatisfiable retries stay for a
    /// later tick. `slot_count` is the number of usable slots overall, used
    /// to detect retries that have visited every flow.
    pub(crate) fn assign(
        &mut self,
        free: &[usize],
        slot_count: usize,
        capacity: usize,
        distinct: bool,
    ) -> Vec<(usize, PendingRetry<P>)> {
        if capacity == 0 || free.is_empty() {
            return Vec::new();
        }
        if distinct {
            self.assign_distinct(free, slot_count, capacity)
        } else {
            self.assign_fifo(free, capacity)
        }
    }

    fn assign_fifo(&mut self, free: &[usize], capacity: usize) -> Vec<(usize, PendingRetry<P>)> {
        let mut assigned = Vec::new();
        for &slot in free.iter().take(capacity) {
            match self.entries.pop_front() {
                Some(retry) => assigned.push((slot, retry)),
                None => break,
            }
        }
        assigned
    }

    fn assign_distinct(
        &mut self,
        free: &[usize],
        slot_count: usize,
        capacity: usize,
    ) -> Vec<(usize, PendingRetry<P>)> {
        // slot -> queue position of its claimant
        let mut claims: HashMap<usize, usize> = HashMap::new();

        for position in 0..self.entries.len() {
            if claims.len() >= capacity {
                break;
            }
            // A retry that has visited every flow starts over unrestricted.
            if self.entries[position].attempted_flows.len() >= slot_count {
                self.entries[position].attempted_flows.clear();
            }
            let available: Vec<usize> = free
                .iter()
                .copied()
                .filter(|slot| !self.entries[position].attempted_flows.contains(slot))
                .collect();

            if let Some(&slot) = available.iter().find(|slot| !claims.contains_key(slot)) {
                claims.insert(slot, position);
                continue;
            }

            // Every available slot is claimed; move an earlier claimant to
            // one of its other options, if it has any.
            for &slot in &available {
                let holder = claims[&slot];
                let alternative = free.iter().copied().find(|candidate| {
                    *candidate != slot
                        && !claims.contains_key(candidate)
                        && !self.entries[holder].attempted_flows.contains(candidate)
                });
                if let Some(alternative) = alternative {
                    claims.remove(&slot);
                    claims.insert(alternative, holder);
                    claims.insert(slot, position);
                    break;
                }
            }
            // No slot worked out: the retry stays queued.
        }

        // Pull claimed entries out back-to-front so positions stay valid.
        let mut picks: Vec<(usize, usize)> = claims
            .into_iter()
            .map(|(slot, position)| (position, slot))
            .collect();
        picks.sort_by(|a, b| b.0.cmp(&a.0));

        let mut assigned = Vec::with_capacity(picks.len());
        for (position, slot) in picks {
            if let Some(retry) = self.entries.remove(position) {
                assigned.push((slot, retry));
            }
        }
        assigned
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn retry(payload: i64, attempted: &[usize]) -> PendingRetry<i64> {
        PendingRetry {
            payload,
            attempts_left: 1,
            attempted_flows: attempted.iter().copied().collect(),
        }
    }

    fn slots_of(assigned: &[(usize, PendingRetry<i64>)]) -> HashMap<i64, usize> {
        assigned
            .iter()
            .map(|(slot, retry)| (retry.payload, *slot))
            .collect()
    }

    #[test]
    fn test_fifo_assignment_pops_in_order() {
        let mut queue = RetryQueue::new();
        queue.push(retry(1, &[]));
        queue.push(retry(2, &[]));
        queue.push(retry(3, &[]));
        let assigned = queue.assign(&[0, 1], 3, 2, false);
        let by_payload = slots_of(&assigned);
        assert_eq!(by_payload[&1], 0);
        assert_eq!(by_payload[&2], 1);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_distinct_avoids_attempted_flows() {
        let mut queue = RetryQueue::new();
        queue.push(retry(1, &[0]));
        queue.push(retry(2, &[]));
        let assigned = queue.assign(&[0, 1], 2, 2, true);
        let by_payload = slots_of(&assigned);
        assert_eq!(by_payload[&1], 1);
        assert_eq!(by_payload[&2], 0);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_distinct_steals_when_earlier_retry_has_options() {
        let mut queue = RetryQueue::new();
        // First retry can use either slot and initially claims slot 0;
        // second retry can only use slot 0.
        queue.push(retry(1, &[]));
        queue.push(retry(2, &[1]));
        let assigned = queue.assign(&[0, 1], 2, 2, true);
        let by_payload = slots_of(&assigned);
        assert_eq!(by_payload[&1], 1);
        assert_eq!(by_payload[&2], 0);
    }

    #[test]
    fn test_distinct_leaves_unsatisfiable_retry_queued() {
        let mut queue = RetryQueue::new();
        // Both retries need slot 0 and neither claimant can move.
        queue.push(retry(1, &[1]));
        queue.push(retry(2, &[1]));
        let assigned = queue.assign(&[0, 1], 3, 2, true);
        assert_eq!(assigned.len(), 1);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_distinct_resets_after_visiting_every_flow() {
        let mut queue = RetryQueue::new();
        queue.push(retry(1, &[0, 1]));
        let assigned = queue.assign(&[0, 1], 2, 1, true);
        assert_eq!(assigned.len(), 1);
        // The attempted set was cleared before assignment.
        assert!(assigned[0].1.attempted_flows.is_empty());
    }

    #[test]
    fn test_capacity_limits_assignments() {
        let mut queue = RetryQueue::new();
        queue.push(retry(1, &[]));
        queue.push(retry(2, &[]));
        queue.push(retry(3, &[]));
        let assigned = queue.assign(&[0, 1, 2], 3, 1, true);
        assert_eq!(assigned.len(), 1);
        assert_eq!(queue.len(), 2);
    }
}
