//! Cursor driver
//!
//! Strictly sequential: each page's cursor comes out of the previous page's
//! response, so concurrency is pinned to 1 and a terminal failure ends the
//! cycle - without the cursor there is nothing left to fetch.
//! `skip_page_if_possible` does not apply here.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures::future::BoxFuture;

use crate::error::Error;
use crate::options::{PageTarget, ResolveCursorFn};
use crate::scheduler::{self, ExecArgs, ExecReturn, Executor};
use crate::summary::{CycleSummary, SummaryAccumulator};

use super::{elapsed_ms, make_hooks, scheduler_config, spawn_response_handler, CycleContext};

/// Retry payload: the cursor and page number of the failed fetch
struct CursorRetry<C> {
    cursor: Option<C>,
    page: i64,
}

struct DriverState<C> {
    next_cursor: Option<C>,
    next_page: i64,
    reached_end: bool,
}

pub(crate) async fn run<G, F, R, C, I>(
    resolve: ResolveCursorFn<G, R, C>,
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
    let state = Arc::new(Mutex::new(DriverState::<C> {
        next_cursor: None,
        next_page: 1,
        reached_end: false,
    }));

    let executor: Executor<F, CursorRetry<C>> = {
        let state = state.clone();
        let summary = summary.clone();
        let fetch = cx.options.fetch_handler.clone();
        let response_handler = cx.options.response_handler.clone();
        let global = cx.global.clone();
        let events = cx.events.clone();
        Arc::new(
            move |args: ExecArgs<F, CursorRetry<C>>| -> BoxFuture<'static, ExecReturn<CursorRetry<C>>> {
                let state = state.clone();
                let summary = summary.clone();
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

                    let (cursor, page) = match retry {
                        Some(retry) => (retry.cursor, retry.page),
                        None => {
                            let mut st = state.lock().unwrap();
                            if done.is_set() {
                                return ExecReturn { retry: None };
                            }
                            let cursor = st.next_cursor.clone();
                            let page = st.next_page;
                            st.next_page += 1;
                            (cursor, page)
                        }
                    };

                    let started = Instant::now();
                    let target = PageTarget::Cursor {
                        cursor: cursor.clone(),
                        page,
                    };
                    let response = match fetch(global.clone(), flow, target).await {
                        Ok(response) => Arc::new(response),
                        Err(err) => {
                            let elapsed = elapsed_ms(started);
                            events.fetch_error(err, page);
                            return ExecReturn {
                                retry: terminal_or_retry(
                                    &summary,
                                    &done,
                                    elapsed,
                                    attempts_left,
                                    cursor,
                                    page,
                                ),
                            };
                        }
                    };
                    spawn_response_handler(&response_handler, &global, &response, &events);

                    match resolve(global.clone(), response).await {
                        Ok(next_cursor) => {
                            let elapsed = elapsed_ms(started);
                            {
                                let mut st = state.lock().unwrap();
                                match next_cursor {
                                    Some(next) => st.next_cursor = Some(next),
                                    None => {
                                        st.reached_end = true;
                                        done.set();
                                    }
                                }
                            }
                            summary.lock().unwrap().record_attempt(true, elapsed);
                            ExecReturn { retry: None }
                        }
                        Err(err) => {
                            let elapsed = elapsed_ms(started);
                            events.resolve_error(err);
                            ExecReturn {
                                retry: terminal_or_retry(
                                    &summary,
                                    &done,
                                    elapsed,
                                    attempts_left,
                                    cursor,
                                    page,
                                ),
                            }
                        }
                    }
                })
            },
        )
    };

    let hooks = make_hooks(&cx);
    let config = scheduler_config(&cx.options, false);
    let natural =
        scheduler::run(cx.table.clone(), config, hooks, executor, cx.cancel.clone()).await?;

    let (reached_end, pages) = {
        let st = state.lock().unwrap();
        (st.reached_end, st.next_page - 1)
    };
    let mut acc = summary.lock().unwrap();
    acc.set_total_page_count(pages);
    let completed = natural && reached_end;
    Ok(acc.summarize(completed))
}

/// Book a failed cursor attempt. A terminal failure ends the whole cycle:
/// without a resolved cursor no later page can ever be addressed.
fn terminal_or_retry<C>(
    summary: &Mutex<SummaryAccumulator>,
    done: &crate::scheduler::DoneSignal,
    elapsed: u64,
    attempts_left: u32,
    cursor: Option<C>,
    page: i64,
) -> Option<CursorRetry<C>> {
    let mut acc = summary.lock().unwrap();
    acc.record_error();
    acc.record_attempt(false, elapsed);
    if attempts_left > 0 {
        return Some(CursorRetry { cursor, page });
    }
    acc.record_failed_page(page);
    drop(acc);
    done.set();
    None
}
