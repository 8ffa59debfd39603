//! List driver
//!
//! The work list is resolved once before the scheduler starts; each item is
//! then fetched like a page, identified in reports by its 1-based position.
//! An empty or failing list resolver yields an empty, uncompleted summary.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures::future::BoxFuture;

use crate::error::Error;
use crate::options::{PageTarget, ResolveListFn};
use crate::scheduler::{self, ExecArgs, ExecReturn, Executor};
use crate::summary::{CycleSummary, FailCounter, SummaryAccumulator};

use super::{
    elapsed_ms, make_hooks, note_failed_attempt, note_successful_attempt, scheduler_config,
    spawn_response_handler, CycleContext,
};

struct DriverState {
    next_index: usize,
    reached_end: bool,
}

pub(crate) async fn run<G, F, R, C, I>(
    resolve_list: ResolveListFn<G, I>,
    cx: CycleContext<G, F, R, C, I>,
) -> Result<CycleSummary, Error>
where
    G: Send + Sync + 'static,
    F: Send + 'static,
    R: Send + Sync + 'static,
    C: Clone + Send + Sync + 'static,
    I: Clone + Send + Sync + 'static,
{
    let items: Arc<Vec<I>> = match resolve_list(cx.global.clone()).await {
        Ok(items) if !items.is_empty() => Arc::new(items),
        Ok(_) => {
            cx.events
                .resolve_error(anyhow::anyhow!("list resolver returned no items"));
            let mut acc = SummaryAccumulator::new();
            return Ok(acc.summarize(false));
        }
        Err(err) => {
            cx.events.resolve_error(err);
            let mut acc = SummaryAccumulator::new();
            return Ok(acc.summarize(false));
        }
    };

    let summary = Arc::new(Mutex::new(SummaryAccumulator::new()));
    let fail = Arc::new(Mutex::new(FailCounter::new(cx.options.policy())));
    let state = Arc::new(Mutex::new(DriverState {
        next_index: 0,
        reached_end: false,
    }));

    let executor: Executor<F, usize> = {
        let items = items.clone();
        let state = state.clone();
        let summary = summary.clone();
        let fail = fail.clone();
        let fetch = cx.options.fetch_handler.clone();
        let response_handler = cx.options.response_handler.clone();
        let global = cx.global.clone();
        let events = cx.events.clone();
        Arc::new(move |args: ExecArgs<F, usize>| -> BoxFuture<'static, ExecReturn<usize>> {
            let items = items.clone();
            let state = state.clone();
            let summary = summary.clone();
            let fail = fail.clone();
            let fetch = fetch.clone();
            let response_handler = response_handler.clone();
            let global = global.clone();
            let events = events.clone();
            Box::pin(async move {
                let ExecArgs {
                    flow,
                    slot: _,
                    attempts_left,
                    retry,
                    done,
                } = args;

                let index = match retry {
                    Some(index) => index,
                    None => {
                        let mut st = state.lock().unwrap();
                        if done.is_set() {
                            return ExecReturn { retry: None };
                        }
                        let index = st.next_index;
                        if index >= items.len() {
                            done.set();
                            return ExecReturn { retry: None };
                        }
                        st.next_index += 1;
                        if st.next_index >= items.len() {
                            st.reached_end = true;
                            done.set();
                        }
                        index
                    }
                };
                if index >= items.len() {
                    return ExecReturn { retry: None };
                }
                let item = items[index].clone();
                let position = index as i64 + 1;

                let started = Instant::now();
                let response =
                    match fetch(global.clone(), flow, PageTarget::Item { item, index }).await {
                        Ok(response) => Arc::new(response),
                        Err(err) => {
                            let elapsed = elapsed_ms(started);
                            events.fetch_error(err, position);
                            let retry_again = note_failed_attempt(
                                &summary,
                                &fail,
                                &done,
                                elapsed,
                                attempts_left,
                                Some(position),
                            );
                            return ExecReturn {
                                retry: retry_again.then_some(index),
                            };
                        }
                    };
                spawn_response_handler(&response_handler, &global, &response, &events);

                let elapsed = elapsed_ms(started);
                note_successful_attempt(&summary, &fail, elapsed);
                ExecReturn { retry: None }
            })
        })
    };

    let hooks = make_hooks(&cx);
    let config = scheduler_config(&cx.options, false);
    let natural =
        scheduler::run(cx.table.clone(), config, hooks, executor, cx.cancel.clone()).await?;

    let (reached_end, issued) = {
        let st = state.lock().unwrap();
        (st.reached_end, st.next_index as i64)
    };
    let mut acc = summary.lock().unwrap();
    acc.set_total_page_count(issued);
    let completed = natural && reached_end && fail.lock().unwrap().complete(None);
    Ok(acc.summarize(completed))
}
