//! Pagination drivers
//!
//! Each driver translates one page-enumeration protocol into the scheduler's
//! executor contract, owning its allocation state behind a mutex so page
//! issuance and done-signalling stay atomic. Drivers catch every user error
//! at the call site: the executor handed to the scheduler never fails.

pub(crate) mod cursor;
pub(crate) mod has_more;
pub(crate) mod list;
pub(crate) mod none;
pub(crate) mod total_pages;

use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::context::ContextUpdater;
use crate::error::Error;
use crate::events::EventBus;
use crate::options::{FlowCell, Options, Pagination, ResponseHandlerFn};
use crate::scheduler::{CycleHooks, DoneSignal, SchedulerConfig, SlotTable};
use crate::summary::{CycleSummary, FailCounter, SummaryAccumulator};
use crate::timing::{resolve_interval, strategy_wait};

/// Everything a driver needs to run one cycle
pub(crate) struct CycleContext<G, F, R, C = (), I = ()> {
    pub options: Arc<Options<G, F, R, C, I>>,
    pub global: Arc<G>,
    pub table: Arc<Mutex<SlotTable<F>>>,
    pub updater: Arc<Mutex<ContextUpdater<F>>>,
    pub events: EventBus,
    pub cancel: CancellationToken,
}

/// Run one cycle with the driver matching the configured pagination kind
pub(crate) async fn run_cycle<G, F, R, C, I>(
    cx: CycleContext<G, F, R, C, I>,
) -> Result<CycleSummary, Error>
where
    G: Send + Sync + 'static,
    F: Send + 'static,
    R: Send + Sync + 'static,
    C: Clone + Send + Sync + 'static,
    I: Clone + Send + Sync + 'static,
{
    let pagination = cx.options.pagination.clone();
    match pagination {
        Pagination::None => none::run(cx).await,
        Pagination::TotalPages {
            resolve_total_pages,
        } => total_pages::run(resolve_total_pages, cx).await,
        Pagination::HasMore { resolve_has_more } => has_more::run(resolve_has_more, cx).await,
        Pagination::Cursor { resolve_cursor } => cursor::run(resolve_cursor, cx).await,
        Pagination::List { resolve_list } => list::run(resolve_list, cx).await,
    }
}

// ============================================================================
// Shared Plumbing
// ============================================================================

/// Wire the context updater and interval pacing into scheduler hooks
pub(crate) fn make_hooks<G, F, R, C, I>(cx: &CycleContext<G, F, R, C, I>) -> CycleHooks<F>
where
    G: Send + Sync + 'static,
    F: Send + 'static,
    R: Send + Sync + 'static,
    C: Clone + Send + Sync + 'static,
    I: Clone + Send + Sync + 'static,
{
    let refresh = {
        let updater = cx.updater.clone();
        Arc::new(move || updater.lock().unwrap().refresh())
            as Arc<dyn Fn() -> Result<(), Error> + Send + Sync>
    };
    let pacing = {
        let options = cx.options.clone();
        let global = cx.global.clone();
        let events = cx.events.clone();
        Arc::new(move |cell: &FlowCell<F>, last: Instant| {
            // The slot is idle at dispatch time, so this try_lock only fails
            // when the user kept a guard alive across calls.
            let ms = match cell.try_lock() {
                Ok(flow) => resolve_interval(&options.interval, &global, Some(&*flow), &events),
                Err(_) => resolve_interval(&options.interval, &global, None, &events),
            };
            strategy_wait(ms, options.interval_strategy, Some(last))
        }) as Arc<dyn Fn(&FlowCell<F>, Instant) -> u64 + Send + Sync>
    };
    CycleHooks { refresh, pacing }
}

pub(crate) fn scheduler_config<G, F, R, C, I>(
    options: &Options<G, F, R, C, I>,
    gate_until_first_success: bool,
) -> SchedulerConfig {
    SchedulerConfig {
        concurrency: options.concurrency,
        retry_limit: options.policy.retry_limit,
        retry_distinct_flows: options.policy.retry_distinct_flows,
        gate_until_first_success,
        sequential: !options.pagination.kind().supports_concurrency(),
    }
}

pub(crate) fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

/// Book a successful attempt: timing plus the fail counter's run separator.
pub(crate) fn note_successful_attempt(
    summary: &Mutex<SummaryAccumulator>,
    fail: &Mutex<FailCounter>,
    elapsed: u64,
) {
    summary.lock().unwrap().record_attempt(true, elapsed);
    fail.lock().unwrap().success();
}

/// Book a failed attempt.
///
/// Returns `true` when the unit should be queued for retry. On terminal
/// failure the page is recorded, the fail counter consulted, and the cycle
/// ended when no further pages may be skipped.
pub(crate) fn note_failed_attempt(
    summary: &Mutex<SummaryAccumulator>,
    fail: &Mutex<FailCounter>,
    done: &DoneSignal,
    elapsed: u64,
    attempts_left: u32,
    failed_page: Option<i64>,
) -> bool {
    let mut acc = summary.lock().unwrap();
    acc.record_error();
    acc.record_attempt(false, elapsed);
    if attempts_left > 0 {
        return true;
    }
    if let Some(page) = failed_page {
        acc.record_failed_page(page);
    }
    drop(acc);
    let cannot_skip_more = fail.lock().unwrap().fail(failed_page);
    if cannot_skip_more {
        done.set();
    }
    false
}

/// Launch the fire-and-forget response handler, surfacing its error on the
/// event bus without ever blocking pagination.
pub(crate) fn spawn_response_handler<G, R>(
    handler: &Option<ResponseHandlerFn<G, R>>,
    global: &Arc<G>,
    response: &Arc<R>,
    events: &EventBus,
) where
    G: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    let Some(handler) = handler else {
        return;
    };
    let fut = handler(global.clone(), response.clone());
    let events = events.clone();
    tokio::spawn(async move {
        if let Err(err) = fut.await {
            events.response_handle_error(err);
        }
    });
}
