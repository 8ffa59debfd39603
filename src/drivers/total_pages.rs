//! Total-pages driver
//!
//! Numbered pages with a resolver reporting the total page count. Until the
//! first page has finished (and the total is known) the scheduler holds
//! concurrency at 1 unless `pagination_prefetch` allows fanning out blind.
//! Pages allocated past a late-discovered total are overshoot; the fail
//! counter forgives their failures at completion time.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures::future::BoxFuture;

use crate::error::Error;
use crate::options::{PageTarget, ResolveTotalPagesFn};
use crate::scheduler::{self, ExecArgs, ExecReturn, Executor};
use crate::summary::{CycleSummary, FailCounter, SummaryAccumulator};

use super::{
    elapsed_ms, make_hooks, note_failed_attempt, note_successful_attempt, scheduler_config,
    spawn_response_handler, CycleContext,
};

struct DriverState {
    next_page: i64,
    last_page: Option<i64>,
    reached_end: bool,
}

pub(crate) async fn run<G, F, R, C, I>(
    resolve: ResolveTotalPagesFn<G, R>,
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
    let fail = Arc::new(Mutex::new(FailCounter::new(cx.options.policy())));
    let state = Arc::new(Mutex::new(DriverState {
        next_page: cx.options.pagination_start,
        last_page: None,
        reached_end: false,
    }));

    let executor: Executor<F, i64> = {
        let state = state.clone();
        let summary = summary.clone();
        let fail = fail.clone();
        let fetch = cx.options.fetch_handler.clone();
        let response_handler = cx.options.response_handler.clone();
        let global = cx.global.clone();
        let events = cx.events.clone();
        Arc::new(move |args: ExecArgs<F, i64>| -> BoxFuture<'static, ExecReturn<i64>> {
            let state = state.clone();
            let summary = summary.clone();
            let fail = fail.clone();
            let fetch = fetch.clone();
            let response_handler = response_handler.clone();
            let global = global.clone();
            let events = events.clone();
            let resolve = resolve.clone();
            Box::pin(async move {
                let ExecArgs {
                    flow,
                    slot: _,
                    attempts_left,
                    retry,
                    done,
                } = args;

                let page = match retry {
                    Some(page) => page,
                    None => {
                        let mut st = state.lock().unwrap();
                        if done.is_set() {
                            return ExecReturn { retry: None };
                        }
                        let page = st.next_page;
                        st.next_page += 1;
                        if let Some(last) = st.last_page {
                            if page >= last {
                                st.reached_end = true;
                                done.set();
                            }
                        }
                        page
                    }
                };

                let started = Instant::now();
                let response = match fetch(global.clone(), flow, PageTarget::Page(page)).await {
                    Ok(response) => Arc::new(response),
                    Err(err) => {
                        let elapsed = elapsed_ms(started);
                        events.fetch_error(err, page);
                        let retry_again = note_failed_attempt(
                            &summary,
                            &fail,
                            &done,
                            elapsed,
                            attempts_left,
                            Some(page),
                        );
                        return ExecReturn {
                            retry: retry_again.then_some(page),
                        };
                    }
                };
                spawn_response_handler(&response_handler, &global, &response, &events);

                match resolve(global.clone(), response).await {
                    Ok(total) => {
                        let elapsed = elapsed_ms(started);
                        {
                            let mut st = state.lock().unwrap();
                            st.last_page = Some(total);
                            if page >= total {
                                st.reached_end = true;
                                done.set();
                            }
                        }
                        summary.lock().unwrap().set_total_page_count(total);
                        note_successful_attempt(&summary, &fail, elapsed);
                        ExecReturn { retry: None }
                    }
                    Err(err) => {
                        let elapsed = elapsed_ms(started);
                        events.resolve_error(err);
                        let retry_again = note_failed_attempt(
                            &summary,
                            &fail,
                            &done,
                            elapsed,
                            attempts_left,
                            Some(page),
                        );
                        ExecReturn {
                            retry: retry_again.then_some(page),
                        }
                    }
                }
            })
        })
    };

    let hooks = make_hooks(&cx);
    let config = scheduler_config(&cx.options, !cx.options.pagination_prefetch);
    let natural =
        scheduler::run(cx.table.clone(), config, hooks, executor, cx.cancel.clone()).await?;

    let (reached_end, last_page, allocated) = {
        let st = state.lock().unwrap();
        (
            st.reached_end,
            st.last_page,
            st.next_page - cx.options.pagination_start,
        )
    };
    let mut acc = summary.lock().unwrap();
    if last_page.is_none() {
        // The total was never resolved; report the pages actually issued.
        acc.set_total_page_count(allocated);
    }
    let completed = natural && reached_end && fail.lock().unwrap().complete(last_page);
    Ok(acc.summarize(completed))
}
