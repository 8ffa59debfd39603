//! windlass - a transport-agnostic scraping orchestrator
//!
//! A concurrency engine that repeatedly executes a user-supplied fetch
//! operation across a paginated source: pacing requests, distributing them
//! over a pool of stateful worker flows, retrying failures under a
//! configurable policy, and producing a summary at the end of each cycle.
//! The engine performs no I/O of its own - fetch and resolve callbacks own
//! the transport and the parsing.
//!
//! # Architecture
//!
//! - [`options`] - pagination strategies, callbacks, validation and defaults
//! - [`scraper`] - the public façade: start, stop, accessors
//! - [`events`] - the typed event bus and logger policy
//! - [`summary`] - cycle summaries and failure accounting
//! - internal: the flow scheduler (worker pool, retry distribution, pacing),
//!   the five pagination drivers, and the cycle loop
//!
//! # Example
//!
//! ```no_run
//! use windlass::Scraper;
//!
//! #[derive(Default)]
//! struct Session;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let scraper = Scraper::<Session, (), String>::builder()
//!         .with_default_contexts()
//!         .total_pages(|_session, response| async move {
//!             Ok(response.lines().count() as i64)
//!         })
//!         .fetch_handler(|_session, _flow, target| async move {
//!             Ok(format!("fetched {}", target.page_number()))
//!         })
//!         .concurrency(3)
//!         .build()?;
//!
//!     scraper.start_once().await;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod events;
pub mod options;
pub mod scraper;
pub mod summary;

mod context;
mod cycle;
mod drivers;
mod scheduler;
mod timing;

pub use error::{Error, Result};
pub use events::{LogCategory, LoggerPolicy, ScraperEvent};
pub use options::{
    ErrorHandlingPolicy, FlowCell, FlowInit, Interval, IntervalStrategy, IntervalValue, Options,
    OptionsBuilder, PageTarget, Pagination, PaginationKind, ValidationWarning,
};
pub use scraper::Scraper;
pub use summary::{AverageTimings, CycleStats, CycleSummary, CycleTimings};

/// Re-export of commonly used types
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::events::{LoggerPolicy, ScraperEvent};
    pub use crate::options::{
        FlowCell, FlowInit, Interval, IntervalStrategy, PageTarget, PaginationKind,
    };
    pub use crate::scraper::Scraper;
    pub use crate::summary::CycleSummary;
}
