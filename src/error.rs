//! Unified error handling for the windlass crate
//!
//! Two kinds of failure flow through the engine. Configuration and fatal
//! runtime errors surface as the typed [`Error`] enum below: the constructor
//! returns them synchronously and the cycle loop converts them into a forced
//! stop plus a `generalError` event. Recoverable page errors (a failing fetch
//! handler or resolver) never reach this type; they feed the retry machinery
//! and are reported on the event bus as `anyhow::Error` values.

use thiserror::Error;

/// Result type alias using the crate [`Error`] type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the scraper itself
///
/// User callback failures are carried as [`anyhow::Error`] payloads so the
/// original error chain stays intact.
#[derive(Debug, Error)]
pub enum Error {
    /// A required callback was not supplied to the builder
    #[error("missing required callback: {0}")]
    MissingCallback(&'static str),

    /// The global context initializer failed
    #[error("global context initializer failed: {0}")]
    GlobalContextInit(anyhow::Error),

    /// The flow context initializer failed
    #[error("flow context initializer failed: {0}")]
    FlowContextInit(anyhow::Error),

    /// The flow context initializer produced an empty context list
    #[error("flow context initializer returned an empty context list")]
    EmptyFlowContexts,

    /// The flow context initializer switched between scalar and list results
    #[error("flow context initializer changed shape mid-run")]
    InconsistentFlowInit,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_callback_display() {
        let err = Error::MissingCallback("fetch_handler");
        assert!(err.to_string().contains("fetch_handler"));
    }

    #[test]
    fn test_init_errors_carry_their_source_message() {
        let err = Error::FlowContextInit(anyhow::anyhow!("boom"));
        assert!(err.to_string().contains("boom"));
    }
}
