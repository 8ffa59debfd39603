//! Worker slot table
//!
//! One slot per flow context. A slot is *busy* while a worker task holds an
//! executor invocation for it; the table itself stays behind a `std` mutex
//! with short critical sections, which is the preemptive-runtime equivalent
//! of the cooperative single-mutator invariant.

use std::sync::Arc;
use std::time::Instant;

use crate::options::FlowCell;

/// One worker slot
pub(crate) struct FlowSlot<F> {
    /// The flow context shared with user callbacks
    pub context: FlowCell<F>,
    /// Whether an executor invocation is in flight on this slot
    pub busy: bool,
    /// Start instant of the slot's most recent execution this cycle
    pub last_exec: Option<Instant>,
}

impl<F> FlowSlot<F> {
    fn new(context: F) -> Self {
        Self {
            context: Arc::new(tokio::sync::Mutex::new(context)),
            busy: false,
            last_exec: None,
        }
    }
}

/// The set of worker slots for a scraper
pub(crate) struct SlotTable<F> {
    slots: Vec<FlowSlot<F>>,
    /// Set when `init_flow_context` returned a full list, pinning concurrency
    fixed_concurrency: bool,
}

impl<F> SlotTable<F> {
    pub(crate) fn new() -> Self {
        Self {
            slots: Vec::new(),
            fixed_concurrency: false,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn is_fixed(&self) -> bool {
        self.fixed_concurrency
    }

    /// Replace every slot with fresh contexts
    pub(crate) fn install(&mut self, contexts: Vec<F>, fixed: bool) {
        self.slots = contexts.into_iter().map(FlowSlot::new).collect();
        self.fixed_concurrency = fixed;
    }

    /// Append one context as a new slot
    pub(crate) fn push_context(&mut self, context: F) {
        self.slots.push(FlowSlot::new(context));
    }

    /// Drop slots beyond `len`; only valid between cycles when nothing is
    /// in flight
    pub(crate) fn truncate(&mut self, len: usize) {
        self.slots.truncate(len);
    }

    /// Drain every slot, returning the context cells in slot order
    pub(crate) fn take_contexts(&mut self) -> Vec<FlowCell<F>> {
        self.fixed_concurrency = false;
        self.slots.drain(..).map(|slot| slot.context).collect()
    }

    pub(crate) fn slot(&self, index: usize) -> &FlowSlot<F> {
        &self.slots[index]
    }

    pub(crate) fn set_busy(&mut self, index: usize, busy: bool) {
        self.slots[index].busy = busy;
    }

    pub(crate) fn set_last_exec(&mut self, index: usize, at: Instant) {
        self.slots[index].last_exec = Some(at);
    }

    /// Number of slots with an executor invocation in flight
    pub(crate) fn in_flight(&self) -> usize {
        self.slots.iter().filter(|slot| slot.busy).count()
    }

    /// Idle slot indices among the first `usable` slots
    pub(crate) fn free_indices(&self, usable: usize) -> Vec<usize> {
        self.slots
            .iter()
            .take(usable)
            .enumerate()
            .filter(|(_, slot)| !slot.busy)
            .map(|(index, _)| index)
            .collect()
    }

    /// Snapshot of every slot's context cell
    pub(crate) fn cells(&self) -> Vec<FlowCell<F>> {
        self.slots.iter().map(|slot| slot.context.clone()).collect()
    }

    /// Clear per-cycle execution state (busy flags, pacing timestamps)
    pub(crate) fn reset_cycle_state(&mut self) {
        for slot in &mut self.slots {
            slot.busy = false;
            slot.last_exec = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_and_free_indices() {
        let mut table = SlotTable::new();
        table.install(vec![1u32, 2, 3], false);
        assert_eq!(table.len(), 3);
        assert!(!table.is_fixed());
        assert_eq!(table.free_indices(3), vec![0, 1, 2]);
        assert_eq!(table.free_indices(2), vec![0, 1]);
    }

    #[test]
    fn test_busy_tracking() {
        let mut table = SlotTable::new();
        table.install(vec![0u32; 3], false);
        table.set_busy(1, true);
        assert_eq!(table.in_flight(), 1);
        assert_eq!(table.free_indices(3), vec![0, 2]);
        table.set_busy(1, false);
        assert_eq!(table.in_flight(), 0);
    }

    #[test]
    fn test_fixed_mode_cleared_on_drain() {
        let mut table = SlotTable::new();
        table.install(vec![0u32; 2], true);
        assert!(table.is_fixed());
        let cells = table.take_contexts();
        assert_eq!(cells.len(), 2);
        assert_eq!(table.len(), 0);
        assert!(!table.is_fixed());
    }

    #[test]
    fn test_reset_cycle_state() {
        let mut table = SlotTable::new();
        table.install(vec![0u32; 2], false);
        table.set_busy(0, true);
        table.set_last_exec(0, Instant::now());
        table.reset_cycle_state();
        assert_eq!(table.in_flight(), 0);
        assert!(table.slot(0).last_exec.is_none());
    }
}
