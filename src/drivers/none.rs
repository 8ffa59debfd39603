//! No-pagination driver
//!
//! One fetch per cycle. The first (and only) invocation signals done up
//! front; retries still run because the done-guard only blocks fresh tasks.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures::future::BoxFuture;

use crate::error::Error;
use crate::options::PageTarget;
use crate::scheduler::{self, ExecArgs, ExecReturn, Executor};
use crate::summary::{CycleSummary, SummaryAccumulator};

use super::{elapsed_ms, make_hooks, scheduler_config, spawn_response_handler, CycleContext};

struct DriverState {
    succeeded: bool,
}

pub(crate) async fn run<G, F, R, C, I>(
    cx: CycleContext<G, F, R, C, I>,
) -> Result<CycleSummary, Error>
where
    G: Send + Sync + 'static,
    F: Send + 'static,
    R: Send + Sync + 'static,
    C: Clone + Send + Sync + 'static,
    I: Clone + Send + Sync + 'static,
{
    let summary = Arc::new(Mutex::new(SummaryAccumulator::new()));
    let state = Arc::new(Mutex::new(DriverState { succeeded: false }));

    let executor: Executor<F, ()> = {
        let state = state.clone();
        let summary = summary.clone();
        let fetch = cx.options.fetch_handler.clone();
        let response_handler = cx.options.response_handler.clone();
        let global = cx.global.clone();
        let events = cx.events.clone();
        Arc::new(move |args: ExecArgs<F, ()>| -> BoxFuture<'static, ExecReturn<()>> {
            let state = state.clone();
            let summary = summary.clone();
            let fetch = fetch.clone();
            let response_handler = response_handler.clone();
            let global = global.clone();
            let events = events.clone();
            Box::pin(async move {
                let ExecArgs {
                    flow,
                    slot: _,
                    attempts_left,
                    retry: _,
                    done,
                } = args;
                // Single page: nothing further to enumerate.
                done.set();

                let started = Instant::now();
                match fetch(global.clone(), flow, PageTarget::Lone).await {
                    Ok(response) => {
                        let response = Arc::new(response);
                        spawn_response_handler(&response_handler, &global, &response, &events);
                        let elapsed = elapsed_ms(started);
                        state.lock().unwrap().succeeded = true;
                        summary.lock().unwrap().record_attempt(true, elapsed);
                        ExecReturn { retry: None }
                    }
                    Err(err) => {
                        let elapsed = elapsed_ms(started);
                        events.fetch_error(err, 1);
                        let mut acc = summary.lock().unwrap();
                        acc.record_error();
                        acc.record_attempt(false, elapsed);
                        if attempts_left > 0 {
                            return ExecReturn { retry: Some(()) };
                        }
                        acc.record_failed_page(1);
                        ExecReturn { retry: None }
                    }
                }
            })
        })
    };

    let hooks = make_hooks(&cx);
    let config = scheduler_config(&cx.options, false);
    let natural =
        scheduler::run(cx.table.clone(), config, hooks, executor, cx.cancel.clone()).await?;

    let succeeded = state.lock().unwrap().succeeded;
    let mut acc = summary.lock().unwrap();
    acc.set_total_page_count(1);
    let completed = natural && succeeded;
    Ok(acc.summarize(completed))
}
