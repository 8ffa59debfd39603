//! Typed event bus and logger policy
//!
//! Every observable occurrence in the engine is a [`ScraperEvent`] broadcast
//! on a tokio channel; callers subscribe with [`crate::Scraper::subscribe`].
//! The [`LoggerPolicy`] only gates *printing* through `tracing` - events are
//! always emitted on the bus regardless of the policy.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::summary::CycleSummary;

/// Buffered event capacity per subscriber before lagging
const EVENT_CHANNEL_CAPACITY: usize = 256;

// ============================================================================
// Log Categories
// ============================================================================

/// Categories of printable diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogCategory {
    /// A rejected option fell back to its default
    ValidationWarning,
    /// A fatal or engine-level error
    GeneralError,
    /// The fetch handler failed for a page
    FetchError,
    /// A pagination resolver failed
    ResolveError,
    /// The fire-and-forget response handler failed
    ResponseHandleError,
    /// The summary handler failed
    SummaryHandleError,
}

/// Which log categories are printed via `tracing`
#[derive(Debug, Clone)]
pub enum LoggerPolicy {
    /// Print every category
    All,
    /// Print nothing
    Disabled,
    /// Print only the listed categories
    Categories(HashSet<LogCategory>),
}

impl LoggerPolicy {
    /// Check whether a category should be printed
    pub fn enables(&self, category: LogCategory) -> bool {
        match self {
            Self::All => true,
            Self::Disabled => false,
            Self::Categories(set) => set.contains(&category),
        }
    }
}

impl Default for LoggerPolicy {
    fn default() -> Self {
        Self::Categories(
            [LogCategory::ValidationWarning, LogCategory::GeneralError]
                .into_iter()
                .collect(),
        )
    }
}

impl From<bool> for LoggerPolicy {
    fn from(enabled: bool) -> Self {
        if enabled {
            Self::All
        } else {
            Self::Disabled
        }
    }
}

// ============================================================================
// Events
// ============================================================================

/// Events emitted by a running scraper
///
/// Error payloads are wrapped in `Arc` so events stay cheap to clone across
/// broadcast subscribers.
#[derive(Debug, Clone)]
pub enum ScraperEvent {
    /// The cycle loop has started
    Started,
    /// The cycle loop has fully exited
    Stopped,
    /// A cycle finished and produced a summary
    CycleSummary(CycleSummary),
    /// An option was rejected during validation and replaced by its default
    ValidationWarning {
        field: &'static str,
        message: String,
    },
    /// A fatal or engine-level error occurred
    GeneralError(Arc<anyhow::Error>),
    /// The fetch handler failed for the given page
    FetchError {
        error: Arc<anyhow::Error>,
        page: i64,
    },
    /// A pagination resolver failed
    ResolveError(Arc<anyhow::Error>),
    /// The response handler failed
    ResponseHandleError(Arc<anyhow::Error>),
    /// The summary handler failed
    SummaryHandleError(Arc<anyhow::Error>),
}

impl ScraperEvent {
    /// The log category this event prints under, if any
    pub fn log_category(&self) -> Option<LogCategory> {
        match self {
            Self::Started | Self::Stopped | Self::CycleSummary(_) => None,
            Self::ValidationWarning { .. } => Some(LogCategory::ValidationWarning),
            Self::GeneralError(_) => Some(LogCategory::GeneralError),
            Self::FetchError { .. } => Some(LogCategory::FetchError),
            Self::ResolveError(_) => Some(LogCategory::ResolveError),
            Self::ResponseHandleError(_) => Some(LogCategory::ResponseHandleError),
            Self::SummaryHandleError(_) => Some(LogCategory::SummaryHandleError),
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Broadcast bus carrying [`ScraperEvent`] values to subscribers
#[derive(Clone)]
pub(crate) struct EventBus {
    sender: broadcast::Sender<ScraperEvent>,
    logger: LoggerPolicy,
}

impl EventBus {
    pub(crate) fn new(logger: LoggerPolicy) -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender, logger }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<ScraperEvent> {
        self.sender.subscribe()
    }

    /// Print the event per the logger policy, then broadcast it. A send with
    /// no live subscribers is a no-op.
    pub(crate) fn emit(&self, event: ScraperEvent) {
        self.print(&event);
        let _ = self.sender.send(event);
    }

    pub(crate) fn general_error(&self, error: anyhow::Error) {
        self.emit(ScraperEvent::GeneralError(Arc::new(error)));
    }

    pub(crate) fn fetch_error(&self, error: anyhow::Error, page: i64) {
        self.emit(ScraperEvent::FetchError {
            error: Arc::new(error),
            page,
        });
    }

    pub(crate) fn resolve_error(&self, error: anyhow::Error) {
        self.emit(ScraperEvent::ResolveError(Arc::new(error)));
    }

    pub(crate) fn response_handle_error(&self, error: anyhow::Error) {
        self.emit(ScraperEvent::ResponseHandleError(Arc::new(error)));
    }

    pub(crate) fn summary_handle_error(&self, error: anyhow::Error) {
        self.emit(ScraperEvent::SummaryHandleError(Arc::new(error)));
    }

    fn print(&self, event: &ScraperEvent) {
        let Some(category) = event.log_category() else {
            return;
        };
        if !self.logger.enables(category) {
            return;
        }
        match event {
            ScraperEvent::Started | ScraperEvent::Stopped | ScraperEvent::CycleSummary(_) => {
                unreachable!("log_category() returns None for these variants")
            }
            ScraperEvent::ValidationWarning { field, message } => {
                tracing::warn!(target: "windlass", "[ValidationWarning] {field}: {message}");
            }
            ScraperEvent::GeneralError(error) => {
                tracing::error!(target: "windlass", "[GeneralError] {error:#}");
            }
            ScraperEvent::FetchError { error, page } => {
                tracing::error!(target: "windlass", page = *page, "[FetchError] {error:#}");
            }
            ScraperEvent::ResolveError(error) => {
                tracing::error!(target: "windlass", "[ResolveError] {error:#}");
            }
            ScraperEvent::ResponseHandleError(error) => {
                tracing::error!(target: "windlass", "[ResponseHandleError] {error:#}");
            }
            ScraperEvent::SummaryHandleError(error) => {
                tracing::error!(target: "windlass", "[SummaryHandleError] {error:#}");
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_enables_warnings_and_general_errors() {
        let policy = LoggerPolicy::default();
        assert!(policy.enables(LogCategory::ValidationWarning));
        assert!(policy.enables(LogCategory::GeneralError));
        assert!(!policy.enables(LogCategory::FetchError));
    }

    #[test]
    fn test_policy_from_bool() {
        assert!(LoggerPolicy::from(true).enables(LogCategory::SummaryHandleError));
        assert!(!LoggerPolicy::from(false).enables(LogCategory::GeneralError));
    }

    #[test]
    fn test_events_emitted_regardless_of_policy() {
        let bus = EventBus::new(LoggerPolicy::Disabled);
        let mut rx = bus.subscribe();
        bus.general_error(anyhow::anyhow!("boom"));
        let event = rx.try_recv().unwrap();
        assert!(matches!(event, ScraperEvent::GeneralError(_)));
    }

    #[test]
    fn test_lifecycle_events_have_no_log_category() {
        assert!(ScraperEvent::Started.log_category().is_none());
        assert!(ScraperEvent::Stopped.log_category().is_none());
    }

    #[test]
    fn test_emit_without_subscribers_is_noop() {
        let bus = EventBus::new(LoggerPolicy::Disabled);
        bus.resolve_error(anyhow::anyhow!("nobody listening"));
    }
}
