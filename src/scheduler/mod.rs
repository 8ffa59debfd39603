//! Worker pool and flow scheduler: the concurrency core of one cycle
//!
//! The scheduler owns no pagination knowledge. It drives an opaque executor
//! closure across a bounded set of worker slots: admitting fresh tasks up to
//! the effective concurrency, pacing every worker by its interval, matching
//! retries to flows under the distinct-flows policy, and draining in-flight
//! work before resolving - exactly once - when the executor has signalled
//! done or the cycle was cancelled.
//!
//! Workers are spawned tokio tasks reporting back on an unbounded completion
//! channel; each completion re-enters the dispatch loop on a fresh tick, so
//! recursion depth stays flat and interleaving stays fair.

pub(crate) mod retry;
pub(crate) mod slots;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::options::FlowCell;
use crate::timing::sleep_cancellable;

pub(crate) use retry::{PendingRetry, RetryQueue};
pub(crate) use slots::SlotTable;

// ============================================================================
// Executor Contract
// ============================================================================

/// Idempotent done flag shared between the scheduler and the driver executor
#[derive(Clone)]
pub(crate) struct DoneSignal(Arc<AtomicBool>);

impl DoneSignal {
    pub(crate) fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub(crate) fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Arguments for one executor invocation
pub(crate) struct ExecArgs<F, P> {
    /// The worker's flow context
    pub flow: FlowCell<F>,
    /// Slot index, for diagnostics
    pub slot: usize,
    /// Attempts remaining after this one fails
    pub attempts_left: u32,
    /// Retry payload; `None` for a fresh task
    pub retry: Option<P>,
    /// Terminal-condition signal
    pub done: DoneSignal,
}

/// Executor result: `Some(payload)` asks for a retry, `None` finishes the
/// unit (success or terminal failure - the driver has already booked it)
pub(crate) struct ExecReturn<P> {
    pub retry: Option<P>,
}

/// The driver-supplied executor. Contractually never fails: drivers catch
/// every user error internally.
pub(crate) type Executor<F, P> =
    Arc<dyn Fn(ExecArgs<F, P>) -> BoxFuture<'static, ExecReturn<P>> + Send + Sync>;

/// Per-cycle callbacks the engine wires into the scheduler
pub(crate) struct CycleHooks<F> {
    /// Context-updater tick: top up flow contexts before dispatching
    pub refresh: Arc<dyn Fn() -> Result<(), Error> + Send + Sync>,
    /// Pre-execution pacing wait for a worker with a previous execution
    pub pacing: Arc<dyn Fn(&FlowCell<F>, Instant) -> u64 + Send + Sync>,
}

/// Static knobs for one cycle
pub(crate) struct SchedulerConfig {
    pub concurrency: usize,
    pub retry_limit: u32,
    pub retry_distinct_flows: bool,
    /// Hold concurrency at 1 until the first unit finishes (total-pages
    /// strategies that must learn the total before fanning out)
    pub gate_until_first_success: bool,
    /// Never run more than one worker at a time, even in fixed-concurrency
    /// mode (cursor and single-page strategies)
    pub sequential: bool,
}

// ============================================================================
// Completions
// ============================================================================

enum CompletionOutcome<P> {
    /// Pacing sleep was cancelled or the done-guard released the worker
    /// without executing
    Skipped,
    /// The executor ran; `retry` carries the requeue request, if any
    Finished { retry: Option<P> },
}

struct Completion<P> {
    slot: usize,
    executed_at: Option<Instant>,
    attempts_left: u32,
    attempted: HashSet<usize>,
    outcome: CompletionOutcome<P>,
}

struct Launch<F, P> {
    slot: usize,
    cell: FlowCell<F>,
    wait: u64,
    attempts_left: u32,
    payload: Option<P>,
    attempted: HashSet<usize>,
}

// ============================================================================
// Cycle Run
// ============================================================================

struct CycleRun<F, P> {
    table: Arc<Mutex<SlotTable<F>>>,
    config: SchedulerConfig,
    hooks: CycleHooks<F>,
    executor: Executor<F, P>,
    done: DoneSignal,
    cancel: CancellationToken,
    tx: mpsc::UnboundedSender<Completion<P>>,
    retries: RetryQueue<P>,
    first_page_ready: bool,
}

impl<F, P> CycleRun<F, P>
where
    F: Send + 'static,
    P: Send + 'static,
{
    /// One dispatch tick: place retries, then fresh tasks, onto idle slots.
    /// Returns the number of workers launched.
    fn dispatch(&mut self) -> usize {
        let mut launches: Vec<Launch<F, P>> = Vec::new();
        {
            let mut table = self.table.lock().unwrap();
            let usable = if table.is_fixed() {
                table.len()
            } else {
                table.len().min(self.config.concurrency)
            };
            let mut effective = if table.is_fixed() {
                table.len()
            } else if self.config.gate_until_first_success && !self.first_page_ready {
                1
            } else {
                usable
            };
            if self.config.sequential {
                effective = effective.min(1);
            }
            let in_flight = table.in_flight();
            let capacity = effective.saturating_sub(in_flight);
            if capacity == 0 {
                return 0;
            }
            let free = table.free_indices(usable);

            let assignments = self.retries.assign(
                &free,
                usable,
                capacity.min(free.len()),
                self.config.retry_distinct_flows,
            );
            let mut taken: HashSet<usize> = HashSet::new();
            for (slot, retry) in assignments {
                let (cell, wait) = {
                    let entry = table.slot(slot);
                    let wait = match entry.last_exec {
                        None => 0,
                        Some(at) => (self.hooks.pacing)(&entry.context, at),
                    };
                    (entry.context.clone(), wait)
                };
                table.set_busy(slot, true);
                taken.insert(slot);
                launches.push(Launch {
                    slot,
                    cell,
                    wait,
                    attempts_left: retry.attempts_left,
                    payload: Some(retry.payload),
                    attempted: retry.attempted_flows,
                });
            }

            if !self.done.is_set() {
                for &slot in &free {
                    if launches.len() >= capacity {
                        break;
                    }
                    if taken.contains(&slot) {
                        continue;
                    }
                    let (cell, wait) = {
                        let entry = table.slot(slot);
                        let wait = match entry.last_exec {
                            None => 0,
                            Some(at) => (self.hooks.pacing)(&entry.context, at),
                        };
                        (entry.context.clone(), wait)
                    };
                    table.set_busy(slot, true);
                    launches.push(Launch {
                        slot,
                        cell,
                        wait,
                        attempts_left: self.config.retry_limit,
                        payload: None,
                        attempted: HashSet::new(),
                    });
                }
            }
        }

        let launched = launches.len();
        for launch in launches {
            self.spawn_worker(launch);
        }
        launched
    }

    fn spawn_worker(&self, launch: Launch<F, P>) {
        let executor = self.executor.clone();
        let done = self.done.clone();
        let cancel = self.cancel.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let Launch {
                slot,
                cell,
                wait,
                attempts_left,
                payload,
                attempted,
            } = launch;
            let is_retry = payload.is_some();
            tracing::debug!(target: "windlass", slot, wait, is_retry, "worker dispatched");

            let cancelled = sleep_cancellable(wait, &cancel).await;
            if cancelled || (done.is_set() && !is_retry) {
                let _ = tx.send(Completion {
                    slot,
                    executed_at: None,
                    attempts_left,
                    attempted,
                    outcome: CompletionOutcome::Skipped,
                });
                return;
            }

            let executed_at = Instant::now();
            let result = executor(ExecArgs {
                flow: cell,
                slot,
                attempts_left,
                retry: payload,
                done,
            })
            .await;
            let _ = tx.send(Completion {
                slot,
                executed_at: Some(executed_at),
                attempts_left,
                attempted,
                outcome: CompletionOutcome::Finished {
                    retry: result.retry,
                },
            });
        });
    }

    fn process(&mut self, completion: Completion<P>) {
        {
            let mut table = self.table.lock().unwrap();
            table.set_busy(completion.slot, false);
            if let Some(at) = completion.executed_at {
                table.set_last_exec(completion.slot, at);
            }
        }
        match completion.outcome {
            CompletionOutcome::Skipped => {}
            CompletionOutcome::Finished { retry: None } => {
                self.first_page_ready = true;
            }
            CompletionOutcome::Finished {
                retry: Some(payload),
            } => {
                if completion.attempts_left > 0 {
                    let mut attempted = completion.attempted;
                    attempted.insert(completion.slot);
                    self.retries.push(PendingRetry {
                        payload,
                        attempts_left: completion.attempts_left - 1,
                        attempted_flows: attempted,
                    });
                }
            }
        }
    }
}

// ============================================================================
// Entry Point
// ============================================================================

/// Run one cycle to quiescence.
///
/// Resolves when no worker is in flight and either the executor signalled
/// done with no retries pending (`Ok(true)`, a natural finish) or the cycle
/// was cancelled (`Ok(false)`). A fatal context-updater error cancels the
/// cycle, drains in-flight workers and surfaces as `Err`.
pub(crate) async fn run<F, P>(
    table: Arc<Mutex<SlotTable<F>>>,
    config: SchedulerConfig,
    hooks: CycleHooks<F>,
    executor: Executor<F, P>,
    cancel: CancellationToken,
) -> Result<bool, Error>
where
    F: Send + 'static,
    P: Send + 'static,
{
    table.lock().unwrap().reset_cycle_state();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut run = CycleRun {
        table,
        config,
        hooks,
        executor,
        done: DoneSignal::new(),
        cancel,
        tx,
        retries: RetryQueue::new(),
        first_page_ready: false,
    };
    let mut fatal: Option<Error> = None;

    let natural = loop {
        let mut dispatched = 0;
        if fatal.is_none() && !run.cancel.is_cancelled() {
            match (run.hooks.refresh)() {
                Ok(()) => dispatched = run.dispatch(),
                Err(err) => {
                    run.cancel.cancel();
                    fatal = Some(err);
                }
            }
        }

        let in_flight = run.table.lock().unwrap().in_flight();
        if in_flight == 0 {
            if fatal.is_none() && run.done.is_set() && run.retries.is_empty() {
                break true;
            }
            if fatal.is_some() || run.cancel.is_cancelled() {
                break false;
            }
            if dispatched == 0 {
                // No work in flight and nothing dispatchable: bail rather
                // than spin.
                tracing::debug!(target: "windlass", "cycle stalled with no dispatchable work");
                break false;
            }
        }

        match rx.recv().await {
            Some(completion) => {
                run.process(completion);
                while let Ok(more) = rx.try_recv() {
                    run.process(more);
                }
            }
            None => break false,
        }
    };

    match fatal {
        Some(err) => Err(err),
        None => Ok(natural),
    }
}

// ============================================================================
// Tests
// ============================================================================
