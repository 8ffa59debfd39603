//! Public façade
//!
//! [`Scraper`] is the opaque handle produced by the options builder: it
//! starts and stops the cycle loop, exposes read-only accessors, and hands
//! out event subscriptions. The handle is cheap to clone and safe to share.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

use crate::context::ContextUpdater;
use crate::cycle;
use crate::error::{Error, Result};
use crate::events::{EventBus, ScraperEvent};
use crate::options::{FlowCell, Options, OptionsBuilder, ValidationWarning};
use crate::scheduler::SlotTable;

/// Run-scoped cancellation handles
pub(crate) struct Control {
    /// Cancels the cycle loop (graceful stop)
    pub outer: Option<CancellationToken>,
    /// Cancels the in-flight cycle (forced stop only)
    pub inner: Option<CancellationToken>,
    /// Signals when the loop task has fully exited
    pub finished: Option<watch::Receiver<bool>>,
}

/// State shared between the handle and the running loop task
pub(crate) struct Shared<G, F, R, C = (), I = ()> {
    pub options: Arc<Options<G, F, R, C, I>>,
    pub global: Mutex<Arc<G>>,
    pub table: Arc<Mutex<SlotTable<F>>>,
    pub updater: Arc<Mutex<ContextUpdater<F>>>,
    pub events: EventBus,
    pub running: AtomicBool,
    pub forced: AtomicBool,
    pub control: Mutex<Control>,
}

/// A configured scraping orchestrator
///
/// Created through [`Scraper::builder`]. Cloning yields another handle to
/// the same scheduler.
///
/// # Type parameters
///
/// * `G` - global context shared by every callback
/// * `F` - per-worker flow context
/// * `R` - the fetch handler's response type
/// * `C` - cursor type (cursor pagination only)
/// * `I` - item type (list pagination only)
pub struct Scraper<G, F, R, C = (), I = ()> {
    shared: Arc<Shared<G, F, R, C, I>>,
    warnings: Arc<Vec<ValidationWarning>>,
}

impl<G, F, R, C, I> Clone for Scraper<G, F, R, C, I> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            warnings: self.warnings.clone(),
        }
    }
}

impl<G, F, R, C, I> Scraper<G, F, R, C, I>
where
    G: Send + Sync + 'static,
    F: Send + 'static,
    R: Send + Sync + 'static,
    C: Clone + Send + Sync + 'static,
    I: Clone + Send + Sync + 'static,
{
    /// Start building a scraper
    pub fn builder() -> OptionsBuilder<G, F, R, C, I> {
        OptionsBuilder::new()
    }

    /// Validate the builder and construct the scraper.
    ///
    /// Fails on missing required callbacks or a failing global context
    /// initializer; every other invalid option becomes a warning, printed
    /// per the logger policy and retained on the handle.
    pub(crate) fn create(builder: OptionsBuilder<G, F, R, C, I>) -> Result<Self> {
        let (options, warnings) = builder.validate()?;
        let events = EventBus::new(options.logger.clone());
        for warning in &warnings {
            events.emit(ScraperEvent::ValidationWarning {
                field: warning.field,
                message: warning.message.clone(),
            });
        }

        let global = (options.init_global_context)().map_err(Error::GlobalContextInit)?;
        let options = Arc::new(options);
        let table = Arc::new(Mutex::new(SlotTable::new()));
        let updater = Arc::new(Mutex::new(ContextUpdater::new(
            options.init_flow_context.clone(),
            options.concurrency,
            options.reset_flow_context,
            options.remove_redundant_flows,
            table.clone(),
        )));

        Ok(Self {
            shared: Arc::new(Shared {
                options,
                global: Mutex::new(Arc::new(global)),
                table,
                updater,
                events,
                running: AtomicBool::new(false),
                forced: AtomicBool::new(false),
                control: Mutex::new(Control {
                    outer: None,
                    inner: None,
                    finished: None,
                }),
            }),
            warnings: Arc::new(warnings),
        })
    }

    /// Start the cycle loop.
    ///
    /// Returns `false` when the scraper is already running. The `started`
    /// event is emitted from the loop task, after callers can observe
    /// `is_running() == true`.
    pub fn start(&self) -> bool {
        let mut control = self.shared.control.lock().unwrap();
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.shared.forced.store(false, Ordering::SeqCst);
        let outer = CancellationToken::new();
        let (tx, rx) = watch::channel(false);
        control.outer = Some(outer.clone());
        control.inner = None;
        control.finished = Some(rx);
        drop(control);

        let shared = self.shared.clone();
        tokio::spawn(async move {
            shared.events.emit(ScraperEvent::Started);
            cycle::run_loop(shared.clone(), outer).await;
            shared.control.lock().unwrap().inner = None;
            shared.running.store(false, Ordering::SeqCst);
            let _ = tx.send(true);
            shared.events.emit(ScraperEvent::Stopped);
        });
        true
    }

    /// Run exactly one cycle: start, then request a graceful stop.
    ///
    /// Resolves when the loop has exited. A graceful stop requested before
    /// the first cycle completes still lets that cycle run.
    pub async fn start_once(&self) {
        self.start();
        self.stop(false).await;
    }

    /// Stop the scraper.
    ///
    /// A graceful stop (`forced = false`) lets the in-flight cycle finish;
    /// a forced stop also cancels the current cycle, which resolves as soon
    /// as in-flight callbacks return. Calling `stop(true)` after a graceful
    /// stop escalates it. Resolves when the loop has fully exited; on an
    /// idle scraper it resolves immediately with no events.
    pub async fn stop(&self, forced: bool) {
        let (outer, inner, finished) = {
            let control = self.shared.control.lock().unwrap();
            if !self.shared.running.load(Ordering::SeqCst) {
                return;
            }
            (
                control.outer.clone(),
                control.inner.clone(),
                control.finished.clone(),
            )
        };
        if forced {
            self.shared.forced.store(true, Ordering::SeqCst);
            if let Some(inner) = inner {
                inner.cancel();
            }
        }
        if let Some(outer) = outer {
            outer.cancel();
        }
        if let Some(mut finished) = finished {
            while !*finished.borrow() {
                if finished.changed().await.is_err() {
                    break;
                }
            }
        }
    }

    /// Whether the cycle loop is currently running
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// The validated options driving this scraper
    pub fn options(&self) -> &Options<G, F, R, C, I> {
        &self.shared.options
    }

    /// The current global context
    pub fn global_context(&self) -> Arc<G> {
        self.shared.global.lock().unwrap().clone()
    }

    /// Snapshot of the current flow context cells, in slot order
    pub fn flows_contexts(&self) -> Vec<FlowCell<F>> {
        self.shared.table.lock().unwrap().cells()
    }

    /// Number of flow contexts currently held
    pub fn flow_context_count(&self) -> usize {
        self.shared.table.lock().unwrap().len()
    }

    /// Warnings produced while validating the options
    pub fn validation_warnings(&self) -> &[ValidationWarning] {
        &self.warnings
    }

    /// Subscribe to scraper events
    pub fn subscribe(&self) -> broadcast::Receiver<ScraperEvent> {
        self.shared.events.subscribe()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> Scraper<(), (), &'static str> {
        Scraper::<(), (), &'static str>::builder()
            .with_default_contexts()
            .fetch_handler(|_g, _f, _t| async { Ok("x") })
            .interval_millis(0)
            .build()
            .unwrap()
    }

    #[test]
    fn test_missing_fetch_handler_fails_creation() {
        let result = Scraper::<(), (), &'static str>::builder()
            .with_default_contexts()
            .build();
        assert!(matches!(
            result,
            Err(Error::MissingCallback("fetch_handler"))
        ));
    }

    #[test]
    fn test_failing_global_initializer_fails_creation() {
        let result = Scraper::<(), (), &'static str>::builder()
            .init_global_context(|| Err(anyhow::anyhow!("no context for you")))
            .init_flow_context(|_| Ok(crate::options::FlowInit::One(())))
            .fetch_handler(|_g, _f, _t| async { Ok("x") })
            .build();
        assert!(matches!(result, Err(Error::GlobalContextInit(_))));
    }

    #[tokio::test]
    async fn test_stop_on_idle_scraper_resolves_immediately() {
        let scraper = minimal();
        let mut rx = scraper.subscribe();
        scraper.stop(true).await;
        assert!(!scraper.is_running());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_start_twice_returns_true_then_false() {
        let scraper = minimal();
        assert!(scraper.start());
        assert!(!scraper.start());
        scraper.stop(true).await;
        assert!(!scraper.is_running());
    }

    #[test]
    fn test_handle_clone_shares_state() {
        let scraper = minimal();
        let clone = scraper.clone();
        assert_eq!(scraper.is_running(), clone.is_running());
        assert_eq!(
            scraper.validation_warnings().len(),
            clone.validation_warnings().len()
        );
    }
}
