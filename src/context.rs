//! Flow context lifecycle
//!
//! Builds the worker slot table at cycle start (or on the first cycle),
//! migrates old contexts into the user's initializer, and tops the table up
//! on dispatch ticks. A context initializer that fails, returns an empty
//! list, or switches between scalar and list shapes is a fatal error; the
//! engine turns it into a forced stop.

use std::sync::{Arc, Mutex};

use crate::error::Error;
use crate::options::{FlowInit, InitFlowFn};
use crate::scheduler::SlotTable;

pub(crate) struct ContextUpdater<F> {
    init_flow: InitFlowFn<F>,
    concurrency: usize,
    reset_flow_context: bool,
    remove_redundant_flows: bool,
    table: Arc<Mutex<SlotTable<F>>>,
    initialized: bool,
}

impl<F> ContextUpdater<F> {
    pub(crate) fn new(
        init_flow: InitFlowFn<F>,
        concurrency: usize,
        reset_flow_context: bool,
        remove_redundant_flows: bool,
        table: Arc<Mutex<SlotTable<F>>>,
    ) -> Self {
        Self {
            init_flow,
            concurrency,
            reset_flow_context,
            remove_redundant_flows,
            table,
            initialized: false,
        }
    }

    /// Prepare the slot table for a new cycle.
    ///
    /// On the first cycle, or whenever `reset_flow_context` is set, the
    /// table is rebuilt through the initializer; each call receives the
    /// corresponding previous context so users can migrate state. Otherwise
    /// surplus slots are trimmed (unless `remove_redundant_flows` is off)
    /// and missing slots topped up.
    pub(crate) fn prepare_cycle(&mut self) -> Result<(), Error> {
        let mut table = self.table.lock().unwrap();
        if !self.initialized || self.reset_flow_context {
            self.rebuild(&mut table)?;
            self.initialized = true;
            return Ok(());
        }
        if !table.is_fixed() && self.remove_redundant_flows && table.len() > self.concurrency {
            table.truncate(self.concurrency);
        }
        self.top_up(&mut table)
    }

    /// Dispatch-tick refresh: top up missing slots, never shrink mid-cycle.
    pub(crate) fn refresh(&self) -> Result<(), Error> {
        let mut table = self.table.lock().unwrap();
        self.top_up(&mut table)
    }

    fn rebuild(&self, table: &mut SlotTable<F>) -> Result<(), Error> {
        // Recover owned contexts for migration. A cell the user is still
        // holding elsewhere cannot be unwrapped; its slot migrates nothing.
        let mut previous: Vec<Option<F>> = table
            .take_contexts()
            .into_iter()
            .map(|cell| Arc::try_unwrap(cell).ok().map(|m| m.into_inner()))
            .collect();

        let first_previous = previous.get_mut(0).and_then(Option::take);
        match (self.init_flow)(first_previous).map_err(Error::FlowContextInit)? {
            FlowInit::Many(contexts) => {
                if contexts.is_empty() {
                    return Err(Error::EmptyFlowContexts);
                }
                table.install(contexts, true);
            }
            FlowInit::One(first) => {
                let mut contexts = vec![first];
                for index in 1..self.concurrency {
                    let prev = previous.get_mut(index).and_then(Option::take);
                    match (self.init_flow)(prev).map_err(Error::FlowContextInit)? {
                        FlowInit::One(context) => contexts.push(context),
                        FlowInit::Many(_) => return Err(Error::InconsistentFlowInit),
                    }
                }
                table.install(contexts, false);
                if !self.remove_redundant_flows {
                    // Keep surplus contexts from the previous cycle parked.
                    for prev in previous.into_iter().skip(self.concurrency).flatten() {
                        table.push_context(prev);
                    }
                }
            }
        }
        Ok(())
    }

    fn top_up(&self, table: &mut SlotTable<F>) -> Result<(), Error> {
        if table.is_fixed() {
            return Ok(());
        }
        while table.len() < self.concurrency {
            match (self.init_flow)(None).map_err(Error::FlowContextInit)? {
                FlowInit::One(context) => table.push_context(context),
                FlowInit::Many(_) => return Err(Error::InconsistentFlowInit),
            }
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn shared_table() -> Arc<Mutex<SlotTable<u32>>> {
        Arc::new(Mutex::new(SlotTable::new()))
    }

    fn updater(
        init: impl Fn(Option<u32>) -> anyhow::Result<FlowInit<u32>> + Send + Sync + 'static,
        concurrency: usize,
        reset: bool,
        remove_redundant: bool,
        table: Arc<Mutex<SlotTable<u32>>>,
    ) -> ContextUpdater<u32> {
        ContextUpdater::new(Arc::new(init), concurrency, reset, remove_redundant, table)
    }

    #[test]
    fn test_scalar_mode_builds_one_context_per_slot() {
        let table = shared_table();
        let mut updater = updater(|_prev| Ok(FlowInit::One(7)), 3, false, true, table.clone());
        updater.prepare_cycle().unwrap();
        let table = table.lock().unwrap();
        assert_eq!(table.len(), 3);
        assert!(!table.is_fixed());
    }

    #[test]
    fn test_list_mode_pins_concurrency() {
        let table = shared_table();
        let mut updater = updater(
            |_prev| Ok(FlowInit::Many(vec![1, 2, 3, 4])),
            1,
            false,
            true,
            table.clone(),
        );
        updater.prepare_cycle().unwrap();
        let table = table.lock().unwrap();
        assert_eq!(table.len(), 4);
        assert!(table.is_fixed());
    }

    #[test]
    fn test_empty_list_is_fatal() {
        let table = shared_table();
        let mut updater = updater(|_prev| Ok(FlowInit::Many(vec![])), 2, false, true, table);
        assert!(matches!(
            updater.prepare_cycle(),
            Err(Error::EmptyFlowContexts)
        ));
    }

    #[test]
    fn test_initializer_error_is_fatal() {
        let table = shared_table();
        let mut updater = updater(|_prev| Err(anyhow::anyhow!("nope")), 2, false, true, table);
        assert!(matches!(
            updater.prepare_cycle(),
            Err(Error::FlowContextInit(_))
        ));
    }

    #[test]
    fn test_inconsistent_shape_is_fatal() {
        let table = shared_table();
        let calls = std::sync::atomic::AtomicUsize::new(0);
        let mut updater = updater(
            move |_prev| {
                if calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
                    Ok(FlowInit::One(1))
                } else {
                    Ok(FlowInit::Many(vec![2, 3]))
                }
            },
            2,
            false,
            true,
            table,
        );
        assert!(matches!(
            updater.prepare_cycle(),
            Err(Error::InconsistentFlowInit)
        ));
    }

    #[test]
    fn test_reset_migrates_previous_contexts() {
        let table = shared_table();
        let mut updater = updater(
            |prev| Ok(FlowInit::One(prev.map_or(100, |p| p + 1))),
            2,
            true,
            true,
            table.clone(),
        );
        updater.prepare_cycle().unwrap();
        // First cycle: both slots initialized without previous state.
        assert_eq!(table.lock().unwrap().len(), 2);
        updater.prepare_cycle().unwrap();
        // Second cycle: each slot migrated from its predecessor (100 -> 101).
        let cells = table.lock().unwrap().cells();
        for cell in cells {
            let value = *cell.blocking_lock();
            assert_eq!(value, 101);
        }
    }

    #[test]
    fn test_no_reset_keeps_contexts_and_tops_up() {
        let table = shared_table();
        let counter = std::sync::atomic::AtomicUsize::new(0);
        let mut updater = updater(
            move |_prev| {
                Ok(FlowInit::One(
                    counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst) as u32,
                ))
            },
            2,
            false,
            true,
            table.clone(),
        );
        updater.prepare_cycle().unwrap();
        updater.prepare_cycle().unwrap();
        // Without reset the second cycle reuses the same two contexts.
        let cells = table.lock().unwrap().cells();
        let values: Vec<u32> = cells.iter().map(|c| *c.blocking_lock()).collect();
        assert_eq!(values, vec![0, 1]);
    }

    #[test]
    fn test_preserved_tail_contexts_without_remove_redundant() {
        let table = shared_table();
        table.lock().unwrap().install(vec![10, 11, 12, 13], false);
        let mut updater = updater(
            |prev| Ok(FlowInit::One(prev.unwrap_or(0))),
            2,
            true,
            false,
            table.clone(),
        );
        // Mark as already initialized so this behaves like a later cycle.
        updater.initialized = true;
        updater.prepare_cycle().unwrap();
        let table = table.lock().unwrap();
        // Two rebuilt slots plus the two preserved tail contexts.
        assert_eq!(table.len(), 4);
    }
}
