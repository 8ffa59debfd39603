//! Option validation and defaulting
//!
//! [`OptionsBuilder`] collects raw options and `build()` turns them into a
//! validated [`Options`] record. Missing required callbacks fail the build;
//! every other rejected field is replaced by its default and reported as a
//! [`ValidationWarning`].

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::error::{Error, Result};
use crate::events::LoggerPolicy;
use crate::scraper::Scraper;
use crate::summary::CycleSummary;

use super::{
    ErrorHandlingPolicy, FetchFn, FlowCell, FlowInit, InitFlowFn, InitGlobalFn, Interval,
    IntervalStrategy, IntervalValue, Options, PageTarget, Pagination,
};

/// Default worker interval when none (or an invalid one) is configured
pub(crate) fn default_interval<G, F>() -> Interval<G, F> {
    Interval::Range(1_000, 2_000)
}

// ============================================================================
// Validation Warnings
// ============================================================================

/// A rejected option that fell back to its default
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationWarning {
    /// The option field that was rejected
    pub field: &'static str,
    /// Why it was rejected
    pub message: String,
}

// ============================================================================
// Options Builder
// ============================================================================

/// Builder for [`Options`]; the raw, unvalidated option surface
///
/// # Example
///
/// ```ignore
/// let scraper = Scraper::<MyGlobal, MyFlow, String>::builder()
///     .init_global_context(|| Ok(MyGlobal::default()))
///     .init_flow_context(|_| Ok(FlowInit::One(MyFlow::default())))
///     .total_pages(|_global, response| async move { parse_total(&response) })
///     .fetch_handler(|global, flow, target| async move { fetch(global, flow, target).await })
///     .concurrency(3)
///     .build()?;
/// ```
pub struct OptionsBuilder<G, F, R, C = (), I = ()> {
    pagination: Pagination<G, R, C, I>,
    init_global_context: Option<InitGlobalFn<G>>,
    init_flow_context: Option<InitFlowFn<F>>,
    fetch_handler: Option<FetchFn<G, F, R, C, I>>,
    response_handler: Option<super::ResponseHandlerFn<G, R>>,
    summary_handler: Option<super::SummaryHandlerFn<G>>,
    interval: Option<Interval<G, F>>,
    interval_strategy: Option<IntervalStrategy>,
    cycle_interval: Option<Interval<G, F>>,
    cycle_interval_strategy: Option<IntervalStrategy>,
    reset_global_context: bool,
    reset_flow_context: bool,
    concurrency: Option<usize>,
    remove_redundant_flows: Option<bool>,
    retry_limit: Option<u32>,
    retry_distinct_flows: Option<bool>,
    skip_page_if_possible: Option<bool>,
    max_total_page_fails: Option<i64>,
    max_consecutive_page_fails: Option<i64>,
    pagination_start: Option<i64>,
    pagination_prefetch: Option<bool>,
    logger: Option<LoggerPolicy>,
}

impl<G, F, R, C, I> Default for OptionsBuilder<G, F, R, C, I> {
    fn default() -> Self {
        Self {
            pagination: Pagination::None,
            init_global_context: None,
            init_flow_context: None,
            fetch_handler: None,
            response_handler: None,
            summary_handler: None,
            interval: None,
            interval_strategy: None,
            cycle_interval: None,
            cycle_interval_strategy: None,
            reset_global_context: false,
            reset_flow_context: false,
            concurrency: None,
            remove_redundant_flows: None,
            retry_limit: None,
            retry_distinct_flows: None,
            skip_page_if_possible: None,
            max_total_page_fails: None,
            max_consecutive_page_fails: None,
            pagination_start: None,
            pagination_prefetch: None,
            logger: None,
        }
    }
}

impl<G, F, R, C, I> OptionsBuilder<G, F, R, C, I> {
    /// Create an empty builder (pagination defaults to `None`)
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Pagination strategies
    // ------------------------------------------------------------------

    /// Single unpaginated fetch per cycle
    pub fn pagination_none(mut self) -> Self {
        self.pagination = Pagination::None;
        self
    }

    /// Numbered pages with a total-page-count resolver
    pub fn total_pages<H, Fut>(mut self, resolve: H) -> Self
    where
        H: Fn(Arc<G>, Arc<R>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<i64>> + Send + 'static,
    {
        self.pagination = Pagination::TotalPages {
            resolve_total_pages: Arc::new(move |global, response| -> BoxFuture<
                'static,
                anyhow::Result<i64>,
            > {
                Box::pin(resolve(global, response))
            }),
        };
        self
    }

    /// Numbered pages with a has-more resolver
    pub fn has_more<H, Fut>(mut self, resolve: H) -> Self
    where
        H: Fn(Arc<G>, Arc<R>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
    {
        self.pagination = Pagination::HasMore {
            resolve_has_more: Arc::new(move |global, response| -> BoxFuture<
                'static,
                anyhow::Result<bool>,
            > {
                Box::pin(resolve(global, response))
            }),
        };
        self
    }

    /// Cursor pagination; the resolver returns `None` to end the cycle
    pub fn cursor<H, Fut>(mut self, resolve: H) -> Self
    where
        H: Fn(Arc<G>, Arc<R>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Option<C>>> + Send + 'static,
    {
        self.pagination = Pagination::Cursor {
            resolve_cursor: Arc::new(move |global, response| -> BoxFuture<
                'static,
                anyhow::Result<Option<C>>,
            > {
                Box::pin(resolve(global, response))
            }),
        };
        self
    }

    /// List pagination; the resolver produces the work list up front
    pub fn list<H, Fut>(mut self, resolve: H) -> Self
    where
        H: Fn(Arc<G>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Vec<I>>> + Send + 'static,
    {
        self.pagination = Pagination::List {
            resolve_list: Arc::new(move |global| -> BoxFuture<'static, anyhow::Result<Vec<I>>> {
                Box::pin(resolve(global))
            }),
        };
        self
    }

    // ------------------------------------------------------------------
    // Context lifecycle
    // ------------------------------------------------------------------

    /// Set the global context initializer (required)
    pub fn init_global_context<H>(mut self, init: H) -> Self
    where
        H: Fn() -> anyhow::Result<G> + Send + Sync + 'static,
    {
        self.init_global_context = Some(Arc::new(init));
        self
    }

    /// Set the flow context initializer (required)
    ///
    /// Returning [`FlowInit::Many`] pins concurrency to the list length;
    /// returning [`FlowInit::One`] builds one context per concurrency slot.
    pub fn init_flow_context<H>(mut self, init: H) -> Self
    where
        H: Fn(Option<F>) -> anyhow::Result<FlowInit<F>> + Send + Sync + 'static,
    {
        self.init_flow_context = Some(Arc::new(init));
        self
    }

    /// Use `Default` for both context types
    pub fn with_default_contexts(self) -> Self
    where
        G: Default,
        F: Default,
    {
        self.init_global_context(|| Ok(G::default()))
            .init_flow_context(|_| Ok(FlowInit::One(F::default())))
    }

    /// Rebuild the global context at each cycle start
    pub fn reset_global_context(mut self, reset: bool) -> Self {
        self.reset_global_context = reset;
        self
    }

    /// Rebuild flow contexts at each cycle start
    pub fn reset_flow_context(mut self, reset: bool) -> Self {
        self.reset_flow_context = reset;
        self
    }

    // ------------------------------------------------------------------
    // Callbacks
    // ------------------------------------------------------------------

    /// Set the fetch handler (required)
    pub fn fetch_handler<H, Fut>(mut self, handler: H) -> Self
    where
        H: Fn(Arc<G>, FlowCell<F>, PageTarget<C, I>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        self.fetch_handler = Some(Arc::new(move |global, flow, target| -> BoxFuture<
            'static,
            anyhow::Result<R>,
        > {
            Box::pin(handler(global, flow, target))
        }));
        self
    }

    /// Set the fire-and-forget response handler
    pub fn response_handler<H, Fut>(mut self, handler: H) -> Self
    where
        H: Fn(Arc<G>, Arc<R>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.response_handler = Some(Arc::new(move |global, response| -> BoxFuture<
            'static,
            anyhow::Result<()>,
        > {
            Box::pin(handler(global, response))
        }));
        self
    }

    /// Set the per-cycle summary handler
    pub fn summary_handler<H, Fut>(mut self, handler: H) -> Self
    where
        H: Fn(Arc<G>, CycleSummary) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.summary_handler = Some(Arc::new(move |global, summary| -> BoxFuture<
            'static,
            anyhow::Result<()>,
        > {
            Box::pin(handler(global, summary))
        }));
        self
    }

    // ------------------------------------------------------------------
    // Pacing
    // ------------------------------------------------------------------

    /// Worker pacing interval (default: uniform draw from 1000-2000 ms)
    pub fn interval(mut self, interval: Interval<G, F>) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Fixed worker pacing interval in milliseconds
    pub fn interval_millis(self, ms: u64) -> Self {
        self.interval(Interval::Millis(ms))
    }

    /// Custom worker pacing callback
    pub fn interval_fn<H>(self, f: H) -> Self
    where
        H: Fn(&G, Option<&F>) -> anyhow::Result<IntervalValue> + Send + Sync + 'static,
    {
        self.interval(Interval::Custom(Arc::new(f)))
    }

    /// Worker pacing strategy (default: dynamic)
    pub fn interval_strategy(mut self, strategy: IntervalStrategy) -> Self {
        self.interval_strategy = Some(strategy);
        self
    }

    /// Cycle pacing interval (default: falls back to the worker interval)
    pub fn cycle_interval(mut self, interval: Interval<G, F>) -> Self {
        self.cycle_interval = Some(interval);
        self
    }

    /// Fixed cycle pacing interval in milliseconds
    pub fn cycle_interval_millis(self, ms: u64) -> Self {
        self.cycle_interval(Interval::Millis(ms))
    }

    /// Cycle pacing strategy (default: fixed)
    pub fn cycle_interval_strategy(mut self, strategy: IntervalStrategy) -> Self {
        self.cycle_interval_strategy = Some(strategy);
        self
    }

    // ------------------------------------------------------------------
    // Concurrency and policy
    // ------------------------------------------------------------------

    /// Worker flow count (default 1; only meaningful for total-pages,
    /// has-more and list pagination)
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    /// Drop surplus flow contexts across cycles (default true)
    pub fn remove_redundant_flows(mut self, remove: bool) -> Self {
        self.remove_redundant_flows = Some(remove);
        self
    }

    /// Additional attempts after a unit's first failure (default 2)
    pub fn retry_limit(mut self, limit: u32) -> Self {
        self.retry_limit = Some(limit);
        self
    }

    /// Dispatch retries onto flows they have not visited yet (default true)
    pub fn retry_distinct_flows(mut self, distinct: bool) -> Self {
        self.retry_distinct_flows = Some(distinct);
        self
    }

    /// Keep the cycle going past terminally failed pages (default false)
    pub fn skip_page_if_possible(mut self, skip: bool) -> Self {
        self.skip_page_if_possible = Some(skip);
        self
    }

    /// Total terminal page failures tolerated per cycle (default unlimited)
    pub fn max_total_page_fails(mut self, max: i64) -> Self {
        self.max_total_page_fails = Some(max);
        self
    }

    /// Consecutive terminal page failures tolerated per cycle (default
    /// unlimited)
    pub fn max_consecutive_page_fails(mut self, max: i64) -> Self {
        self.max_consecutive_page_fails = Some(max);
        self
    }

    /// First page number for numbered strategies (default 1; accepted
    /// verbatim, including zero and negatives)
    pub fn pagination_start(mut self, start: i64) -> Self {
        self.pagination_start = Some(start);
        self
    }

    /// Fan total-pages cycles out before the total is known (default false)
    pub fn pagination_prefetch(mut self, prefetch: bool) -> Self {
        self.pagination_prefetch = Some(prefetch);
        self
    }

    /// Logger printing policy (default: validation warnings and general
    /// errors)
    pub fn logger(mut self, logger: impl Into<LoggerPolicy>) -> Self {
        self.logger = Some(logger.into());
        self
    }

    // ------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------

    /// Validate the raw options into an immutable record plus the warnings
    /// produced along the way.
    pub(crate) fn validate(self) -> Result<(Options<G, F, R, C, I>, Vec<ValidationWarning>)> {
        let mut warnings = Vec::new();

        let fetch_handler = self
            .fetch_handler
            .ok_or(Error::MissingCallback("fetch_handler"))?;
        let init_global_context = self
            .init_global_context
            .ok_or(Error::MissingCallback("init_global_context"))?;
        let init_flow_context = self
            .init_flow_context
            .ok_or(Error::MissingCallback("init_flow_context"))?;

        let kind = self.pagination.kind();

        let interval = match self.interval {
            Some(Interval::Range(a, b)) if a > b => {
                warnings.push(ValidationWarning {
                    field: "interval",
                    message: format!("range start {a} exceeds end {b}; using the default"),
                });
                default_interval()
            }
            Some(interval) => interval,
            None => default_interval(),
        };

        let cycle_interval = match self.cycle_interval {
            Some(Interval::Range(a, b)) if a > b => {
                warnings.push(ValidationWarning {
                    field: "cycle_interval",
                    message: format!(
                        "range start {a} exceeds end {b}; falling back to the worker interval"
                    ),
                });
                None
            }
            other => other,
        };

        let mut concurrency = self.concurrency.unwrap_or(1);
        if concurrency == 0 {
            warnings.push(ValidationWarning {
                field: "concurrency",
                message: "concurrency must be at least 1; using 1".to_string(),
            });
            concurrency = 1;
        }
        if concurrency > 1 && !kind.supports_concurrency() {
            warnings.push(ValidationWarning {
                field: "concurrency",
                message: format!("{kind} pagination runs a single flow; ignoring concurrency {concurrency}"),
            });
            concurrency = 1;
        }

        let policy = ErrorHandlingPolicy {
            retry_limit: self.retry_limit.unwrap_or(2),
            retry_distinct_flows: self.retry_distinct_flows.unwrap_or(true),
            skip_page_if_possible: self.skip_page_if_possible.unwrap_or(false),
            max_total_page_fails: self.max_total_page_fails.unwrap_or(i64::MAX),
            max_consecutive_page_fails: self.max_consecutive_page_fails.unwrap_or(i64::MAX),
        };

        let options = Options {
            pagination: self.pagination,
            init_global_context,
            init_flow_context,
            fetch_handler,
            response_handler: self.response_handler,
            summary_handler: self.summary_handler,
            interval,
            interval_strategy: self.interval_strategy.unwrap_or(IntervalStrategy::Dynamic),
            cycle_interval,
            cycle_interval_strategy: self
                .cycle_interval_strategy
                .unwrap_or(IntervalStrategy::Fixed),
            reset_global_context: self.reset_global_context,
            reset_flow_context: self.reset_flow_context,
            concurrency,
            remove_redundant_flows: self.remove_redundant_flows.unwrap_or(true),
            policy,
            pagination_start: self.pagination_start.unwrap_or(1),
            pagination_prefetch: self.pagination_prefetch.unwrap_or(false),
            logger: self.logger.unwrap_or_default(),
        };

        Ok((options, warnings))
    }

    /// Validate the options and construct a [`Scraper`]
    pub fn build(self) -> Result<Scraper<G, F, R, C, I>>
    where
        G: Send + Sync + 'static,
        F: Send + 'static,
        R: Send + Sync + 'static,
        C: Clone + Send + Sync + 'static,
        I: Clone + Send + Sync + 'static,
    {
        Scraper::create(self)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::PaginationKind;

    fn base_builder() -> OptionsBuilder<(), (), &'static str> {
        OptionsBuilder::new()
            .with_default_contexts()
            .fetch_handler(|_global, _flow, _target| async { Ok("x") })
    }

    #[test]
    fn test_missing_fetch_handler_fails() {
        let builder: OptionsBuilder<(), (), &'static str> =
            OptionsBuilder::new().with_default_contexts();
        let err = builder.validate().unwrap_err();
        assert!(matches!(err, Error::MissingCallback("fetch_handler")));
    }

    #[test]
    fn test_missing_context_initializers_fail() {
        let builder: OptionsBuilder<(), (), &'static str> =
            OptionsBuilder::new().fetch_handler(|_g, _f, _t| async { Ok("x") });
        let err = builder.validate().unwrap_err();
        assert!(matches!(err, Error::MissingCallback("init_global_context")));
    }

    #[test]
    fn test_defaults_fill_in() {
        let (options, warnings) = base_builder().validate().unwrap();
        assert!(warnings.is_empty());
        assert_eq!(options.concurrency(), 1);
        assert_eq!(options.pagination_start(), 1);
        assert!(!options.pagination_prefetch());
        assert_eq!(options.interval_strategy(), IntervalStrategy::Dynamic);
        assert_eq!(options.cycle_interval_strategy(), IntervalStrategy::Fixed);
        assert_eq!(options.policy().retry_limit, 2);
        assert!(options.policy().retry_distinct_flows);
        assert!(!options.policy().skip_page_if_possible);
        assert!(matches!(options.interval, Interval::Range(1_000, 2_000)));
        assert!(options.cycle_interval.is_none());
        assert!(options.remove_redundant_flows());
    }

    #[test]
    fn test_zero_concurrency_warns_and_defaults() {
        let (options, warnings) = base_builder().concurrency(0).validate().unwrap();
        assert_eq!(options.concurrency(), 1);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].field, "concurrency");
    }

    #[test]
    fn test_concurrency_forced_to_one_for_unsupported_kinds() {
        let (options, warnings) = base_builder().concurrency(4).validate().unwrap();
        assert_eq!(options.pagination_kind(), PaginationKind::None);
        assert_eq!(options.concurrency(), 1);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_invalid_interval_range_warns_and_defaults() {
        let (options, warnings) = base_builder()
            .interval(Interval::Range(5_000, 100))
            .validate()
            .unwrap();
        assert!(matches!(options.interval, Interval::Range(1_000, 2_000)));
        assert_eq!(warnings[0].field, "interval");
    }

    #[test]
    fn test_invalid_cycle_interval_falls_back_to_interval() {
        let (options, warnings) = base_builder()
            .cycle_interval(Interval::Range(10, 1))
            .validate()
            .unwrap();
        assert!(options.cycle_interval.is_none());
        assert_eq!(warnings[0].field, "cycle_interval");
    }

    #[test]
    fn test_negative_pagination_start_accepted_verbatim() {
        let (options, warnings) = base_builder().pagination_start(-3).validate().unwrap();
        assert_eq!(options.pagination_start(), -3);
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_validation_is_deterministic() {
        let (a, _) = base_builder()
            .concurrency(2)
            .retry_limit(5)
            .pagination_start(0)
            .total_pages(|_g, _r| async { Ok(1) })
            .validate()
            .unwrap();
        let (b, _) = base_builder()
            .concurrency(2)
            .retry_limit(5)
            .pagination_start(0)
            .total_pages(|_g, _r| async { Ok(1) })
            .validate()
            .unwrap();
        assert_eq!(a.concurrency(), b.concurrency());
        assert_eq!(a.policy(), b.policy());
        assert_eq!(a.pagination_start(), b.pagination_start());
        assert_eq!(a.pagination_kind(), b.pagination_kind());
    }

    #[test]
    fn test_logger_from_bool() {
        let (options, _) = base_builder().logger(true).validate().unwrap();
        assert!(matches!(options.logger(), LoggerPolicy::All));
    }
}
