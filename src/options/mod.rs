//! Scraper options: pagination strategies, callbacks, pacing and policy
//!
//! The validated [`Options`] record is immutable once built. Raw options go
//! through [`OptionsBuilder`](crate::OptionsBuilder), which substitutes
//! defaults for rejected fields and reports each rejection as a
//! `validationWarning`.
//!
//! # Callback conventions
//!
//! The engine owns a *global context* `G` (shared by every callback) and one
//! *flow context* `F` per worker slot. Unlike the usual dynamic-language
//! design where the global context is an implicit receiver, every callback
//! here takes `Arc<G>` as an explicit first argument and the flow context as
//! a [`FlowCell`] second argument. The engine never dispatches more than one
//! executor invocation per flow cell at a time, so locking a flow cell inside
//! a fetch handler does not contend with the engine.

pub mod validate;

use std::sync::Arc;

use futures::future::BoxFuture;
use serde::Serialize;

use crate::events::LoggerPolicy;
use crate::summary::CycleSummary;

pub use validate::{OptionsBuilder, ValidationWarning};

// ============================================================================
// Callback Signatures
// ============================================================================

/// Shared handle to one worker's flow context
///
/// Fetch handlers lock the cell to read or mutate per-worker state (session
/// cookies, counters, client handles). The engine guarantees at most one
/// outstanding invocation per cell.
pub type FlowCell<F> = Arc<tokio::sync::Mutex<F>>;

/// Builds (or rebuilds, under `reset_global_context`) the global context
pub type InitGlobalFn<G> = Arc<dyn Fn() -> anyhow::Result<G> + Send + Sync>;

/// Builds flow contexts
///
/// Receives the previous context for the slot being rebuilt, when one exists,
/// so state can be migrated across cycles.
pub type InitFlowFn<F> = Arc<dyn Fn(Option<F>) -> anyhow::Result<FlowInit<F>> + Send + Sync>;

/// The user-supplied fetch operation
pub type FetchFn<G, F, R, C, I> = Arc<
    dyn Fn(Arc<G>, FlowCell<F>, PageTarget<C, I>) -> BoxFuture<'static, anyhow::Result<R>>
        + Send
        + Sync,
>;

/// Resolves the total page count from a fetched response
pub type ResolveTotalPagesFn<G, R> =
    Arc<dyn Fn(Arc<G>, Arc<R>) -> BoxFuture<'static, anyhow::Result<i64>> + Send + Sync>;

/// Resolves whether more pages follow the fetched one
pub type ResolveHasMoreFn<G, R> =
    Arc<dyn Fn(Arc<G>, Arc<R>) -> BoxFuture<'static, anyhow::Result<bool>> + Send + Sync>;

/// Resolves the next cursor from a fetched response; `None` ends the cycle
pub type ResolveCursorFn<G, R, C> =
    Arc<dyn Fn(Arc<G>, Arc<R>) -> BoxFuture<'static, anyhow::Result<Option<C>>> + Send + Sync>;

/// Produces the work list before a list-paginated cycle starts
pub type ResolveListFn<G, I> =
    Arc<dyn Fn(Arc<G>) -> BoxFuture<'static, anyhow::Result<Vec<I>>> + Send + Sync>;

/// Fire-and-forget per-response hook; never blocks pagination
pub type ResponseHandlerFn<G, R> =
    Arc<dyn Fn(Arc<G>, Arc<R>) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Awaited once per cycle with the finished summary
pub type SummaryHandlerFn<G> =
    Arc<dyn Fn(Arc<G>, CycleSummary) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Computes an interval value per execution
///
/// Receives the flow context for worker pacing and `None` for cycle pacing.
pub type IntervalFn<G, F> =
    Arc<dyn Fn(&G, Option<&F>) -> anyhow::Result<IntervalValue> + Send + Sync>;

// ============================================================================
// Flow Context Initialization
// ============================================================================

/// Result of one `init_flow_context` call
pub enum FlowInit<F> {
    /// A single context for one worker slot
    One(F),
    /// A full set of contexts; pins concurrency to its length
    Many(Vec<F>),
}

// ============================================================================
// Pagination
// ============================================================================

/// Pagination strategy, carrying its strategy-specific resolver
pub enum Pagination<G, R, C, I> {
    /// A single unpaginated fetch per cycle
    None,
    /// Numbered pages; the resolver reports the total page count
    TotalPages {
        resolve_total_pages: ResolveTotalPagesFn<G, R>,
    },
    /// Numbered pages; the resolver reports whether more pages follow
    HasMore {
        resolve_has_more: ResolveHasMoreFn<G, R>,
    },
    /// Opaque-cursor pages, fetched strictly sequentially
    Cursor {
        resolve_cursor: ResolveCursorFn<G, R, C>,
    },
    /// A work list resolved up front, one fetch per item
    List { resolve_list: ResolveListFn<G, I> },
}

impl<G, R, C, I> Pagination<G, R, C, I> {
    /// The discriminant of this strategy
    pub fn kind(&self) -> PaginationKind {
        match self {
            Self::None => PaginationKind::None,
            Self::TotalPages { .. } => PaginationKind::TotalPages,
            Self::HasMore { .. } => PaginationKind::HasMore,
            Self::Cursor { .. } => PaginationKind::Cursor,
            Self::List { .. } => PaginationKind::List,
        }
    }
}

impl<G, R, C, I> Clone for Pagination<G, R, C, I> {
    fn clone(&self) -> Self {
        match self {
            Self::None => Self::None,
            Self::TotalPages {
                resolve_total_pages,
            } => Self::TotalPages {
                resolve_total_pages: resolve_total_pages.clone(),
            },
            Self::HasMore { resolve_has_more } => Self::HasMore {
                resolve_has_more: resolve_has_more.clone(),
            },
            Self::Cursor { resolve_cursor } => Self::Cursor {
                resolve_cursor: resolve_cursor.clone(),
            },
            Self::List { resolve_list } => Self::List {
                resolve_list: resolve_list.clone(),
            },
        }
    }
}

/// Pagination strategy discriminant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PaginationKind {
    None,
    TotalPages,
    HasMore,
    Cursor,
    List,
}

impl PaginationKind {
    /// Whether the strategy supports more than one concurrent flow
    pub fn supports_concurrency(&self) -> bool {
        matches!(self, Self::TotalPages | Self::HasMore | Self::List)
    }
}

impl std::fmt::Display for PaginationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::TotalPages => "total-pages",
            Self::HasMore => "has-more",
            Self::Cursor => "cursor",
            Self::List => "list",
        };
        write!(f, "{name}")
    }
}

/// The unit of work handed to the fetch handler
#[derive(Debug, Clone)]
pub enum PageTarget<C, I> {
    /// Single unpaginated fetch
    Lone,
    /// Numbered page (total-pages and has-more strategies)
    Page(i64),
    /// Cursor-addressed page; `cursor` is `None` for the first page
    Cursor { cursor: Option<C>, page: i64 },
    /// One item of a resolved work list
    Item { item: I, index: usize },
}

impl<C, I> PageTarget<C, I> {
    /// A 1-based page identifier usable for reporting
    ///
    /// List items report their 1-based position.
    pub fn page_number(&self) -> i64 {
        match self {
            Self::Lone => 1,
            Self::Page(page) => *page,
            Self::Cursor { page, .. } => *page,
            Self::Item { index, .. } => *index as i64 + 1,
        }
    }
}

// ============================================================================
// Pacing
// ============================================================================

/// An interval configuration value
pub enum Interval<G, F> {
    /// Fixed number of milliseconds
    Millis(u64),
    /// Uniformly random draw from the inclusive range
    Range(u64, u64),
    /// User callback producing the value per execution
    Custom(IntervalFn<G, F>),
}

impl<G, F> Clone for Interval<G, F> {
    fn clone(&self) -> Self {
        match self {
            Self::Millis(ms) => Self::Millis(*ms),
            Self::Range(a, b) => Self::Range(*a, *b),
            Self::Custom(f) => Self::Custom(f.clone()),
        }
    }
}

/// Value produced by a custom interval callback
///
/// Values are coerced to whole non-negative milliseconds; non-finite results
/// fall back to the default interval with a `generalError`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IntervalValue {
    /// A scalar millisecond count
    Millis(f64),
    /// An inclusive range to draw from
    Range(f64, f64),
}

/// How a computed interval relates to the previous execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IntervalStrategy {
    /// Wait `interval - elapsed_since_last_execution`
    Dynamic,
    /// Always wait the full interval
    Fixed,
}

// ============================================================================
// Error Handling Policy
// ============================================================================

/// Retry and failure budgets for one cycle
///
/// `max_total_page_fails` and `max_consecutive_page_fails` use `i64::MAX` to
/// mean "unlimited"; zero or negative values make the first terminal page
/// failure end the cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorHandlingPolicy {
    /// Additional attempts after the first failure of a unit
    pub retry_limit: u32,
    /// Dispatch each retry onto a flow it has not visited yet
    pub retry_distinct_flows: bool,
    /// Keep the cycle going past terminally failed pages
    pub skip_page_if_possible: bool,
    /// Total terminal page failures tolerated per cycle
    pub max_total_page_fails: i64,
    /// Consecutive terminal page failures tolerated per cycle
    pub max_consecutive_page_fails: i64,
}

impl Default for ErrorHandlingPolicy {
    fn default() -> Self {
        Self {
            retry_limit: 2,
            retry_distinct_flows: true,
            skip_page_if_possible: false,
            max_total_page_fails: i64::MAX,
            max_consecutive_page_fails: i64::MAX,
        }
    }
}

// ============================================================================
// Validated Options
// ============================================================================

/// The validated, immutable option record driving a scraper
pub struct Options<G, F, R, C = (), I = ()> {
    pub(crate) pagination: Pagination<G, R, C, I>,
    pub(crate) init_global_context: InitGlobalFn<G>,
    pub(crate) init_flow_context: InitFlowFn<F>,
    pub(crate) fetch_handler: FetchFn<G, F, R, C, I>,
    pub(crate) response_handler: Option<ResponseHandlerFn<G, R>>,
    pub(crate) summary_handler: Option<SummaryHandlerFn<G>>,
    pub(crate) interval: Interval<G, F>,
    pub(crate) interval_strategy: IntervalStrategy,
    pub(crate) cycle_interval: Option<Interval<G, F>>,
    pub(crate) cycle_interval_strategy: IntervalStrategy,
    pub(crate) reset_global_context: bool,
    pub(crate) reset_flow_context: bool,
    pub(crate) concurrency: usize,
    pub(crate) remove_redundant_flows: bool,
    pub(crate) policy: ErrorHandlingPolicy,
    pub(crate) pagination_start: i64,
    pub(crate) pagination_prefetch: bool,
    pub(crate) logger: LoggerPolicy,
}

impl<G, F, R, C, I> std::fmt::Debug for Options<G, F, R, C, I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Options")
            .field("interval_strategy", &self.interval_strategy)
            .field("cycle_interval_strategy", &self.cycle_interval_strategy)
            .field("reset_global_context", &self.reset_global_context)
            .field("reset_flow_context", &self.reset_flow_context)
            .field("concurrency", &self.concurrency)
            .field("remove_redundant_flows", &self.remove_redundant_flows)
            .field("policy", &self.policy)
            .field("pagination_start", &self.pagination_start)
            .field("pagination_prefetch", &self.pagination_prefetch)
            .field("logger", &self.logger)
            .finish_non_exhaustive()
    }
}

impl<G, F, R, C, I> Options<G, F, R, C, I> {
    /// The pagination strategy discriminant
    pub fn pagination_kind(&self) -> PaginationKind {
        self.pagination.kind()
    }

    /// Effective base concurrency
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// The retry and failure policy
    pub fn policy(&self) -> &ErrorHandlingPolicy {
        &self.policy
    }

    /// Worker pacing strategy
    pub fn interval_strategy(&self) -> IntervalStrategy {
        self.interval_strategy
    }

    /// Cycle pacing strategy
    pub fn cycle_interval_strategy(&self) -> IntervalStrategy {
        self.cycle_interval_strategy
    }

    /// First page number allocated by numbered strategies
    pub fn pagination_start(&self) -> i64 {
        self.pagination_start
    }

    /// Whether total-pages cycles fan out before the total is known
    pub fn pagination_prefetch(&self) -> bool {
        self.pagination_prefetch
    }

    /// Whether the global context is rebuilt at each cycle start
    pub fn reset_global_context(&self) -> bool {
        self.reset_global_context
    }

    /// Whether flow contexts are rebuilt at each cycle start
    pub fn reset_flow_context(&self) -> bool {
        self.reset_flow_context
    }

    /// Whether surplus flow contexts are dropped across cycles
    pub fn remove_redundant_flows(&self) -> bool {
        self.remove_redundant_flows
    }

    /// The logger printing policy
    pub fn logger(&self) -> &LoggerPolicy {
        &self.logger
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_kind_display() {
        assert_eq!(PaginationKind::TotalPages.to_string(), "total-pages");
        assert_eq!(PaginationKind::None.to_string(), "none");
    }

    #[test]
    fn test_concurrency_support() {
        assert!(PaginationKind::TotalPages.supports_concurrency());
        assert!(PaginationKind::HasMore.supports_concurrency());
        assert!(PaginationKind::List.supports_concurrency());
        assert!(!PaginationKind::None.supports_concurrency());
        assert!(!PaginationKind::Cursor.supports_concurrency());
    }

    #[test]
    fn test_page_target_numbers() {
        let lone: PageTarget<(), ()> = PageTarget::Lone;
        assert_eq!(lone.page_number(), 1);
        let page: PageTarget<(), ()> = PageTarget::Page(7);
        assert_eq!(page.page_number(), 7);
        let cursor: PageTarget<String, ()> = PageTarget::Cursor {
            cursor: Some("c".into()),
            page: 3,
        };
        assert_eq!(cursor.page_number(), 3);
        let item: PageTarget<(), &str> = PageTarget::Item {
            item: "u",
            index: 0,
        };
        assert_eq!(item.page_number(), 1);
    }

    #[test]
    fn test_default_policy() {
        let policy = ErrorHandlingPolicy::default();
        assert_eq!(policy.retry_limit, 2);
        assert!(policy.retry_distinct_flows);
        assert!(!policy.skip_page_if_possible);
        assert_eq!(policy.max_total_page_fails, i64::MAX);
        assert_eq!(policy.max_consecutive_page_fails, i64::MAX);
    }
}
