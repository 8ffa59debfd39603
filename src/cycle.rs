//! The cycle loop
//!
//! Owns the life of one `start()`: rebuilds contexts, runs one cycle through
//! the active pagination driver, reports the summary, paces the next cycle,
//! and honors the asymmetric stop rule - the outer token ends the loop
//! between cycles, while the per-cycle token is only cancelled on a forced
//! stop.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::drivers::{self, CycleContext};
use crate::error::Error;
use crate::events::ScraperEvent;
use crate::scraper::Shared;
use crate::timing::{resolve_interval, sleep_cancellable, strategy_wait};

pub(crate) async fn run_loop<G, F, R, C, I>(
    shared: Arc<Shared<G, F, R, C, I>>,
    outer: CancellationToken,
) where
    G: Send + Sync + 'static,
    F: Send + 'static,
    R: Send + Sync + 'static,
    C: Clone + Send + Sync + 'static,
    I: Clone + Send + Sync + 'static,
{
    let options = shared.options.clone();
    let mut first_cycle = true;

    loop {
        // A graceful stop requested before the first cycle still runs that
        // one cycle; afterwards no new cycle begins.
        if !first_cycle && outer.is_cancelled() {
            break;
        }

        if first_cycle || options.reset_global_context {
            match (options.init_global_context)() {
                Ok(context) => {
                    *shared.global.lock().unwrap() = Arc::new(context);
                }
                Err(err) => {
                    shared
                        .events
                        .general_error(Error::GlobalContextInit(err).into());
                    break;
                }
            }
        }
        first_cycle = false;

        if let Err(err) = shared.updater.lock().unwrap().prepare_cycle() {
            shared.events.general_error(err.into());
            break;
        }

        let inner = CancellationToken::new();
        shared.control.lock().unwrap().inner = Some(inner.clone());
        if shared.forced.load(Ordering::SeqCst) && outer.is_cancelled() {
            inner.cancel();
        }

        let cycle_started = Instant::now();
        let global = shared.global.lock().unwrap().clone();
        let cycle = CycleContext {
            options: options.clone(),
            global: global.clone(),
            table: shared.table.clone(),
            updater: shared.updater.clone(),
            events: shared.events.clone(),
            cancel: inner.clone(),
        };
        let result = drivers::run_cycle(cycle).await;
        shared.control.lock().unwrap().inner = None;

        match result {
            Ok(summary) => {
                if let Some(handler) = &options.summary_handler {
                    if let Err(err) = handler(global.clone(), summary.clone()).await {
                        shared.events.summary_handle_error(err);
                    }
                }
                shared.events.emit(ScraperEvent::CycleSummary(summary));
            }
            Err(err) => {
                // Fatal runtime error: forced-stop semantics.
                shared.events.general_error(err.into());
                break;
            }
        }

        if outer.is_cancelled() {
            break;
        }

        let interval = options
            .cycle_interval
            .as_ref()
            .unwrap_or(&options.interval);
        let ms = resolve_interval(interval, global.as_ref(), None, &shared.events);
        let wait = strategy_wait(ms, options.cycle_interval_strategy, Some(cycle_started));
        if sleep_cancellable(wait, &outer).await {
            break;
        }
    }
}
