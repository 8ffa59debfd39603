//! Cancellable sleeping and interval resolution
//!
//! The sleeper is the engine's only delay primitive; every wait in the
//! scheduler and the cycle loop goes through it so cancellation reaches all
//! paused workers. Interval resolution turns a configured [`Interval`] into
//! a concrete millisecond count, drawing ranges uniformly and falling back
//! to the default range when a custom callback fails.

use std::time::{Duration, Instant};

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::events::EventBus;
use crate::options::{Interval, IntervalStrategy, IntervalValue};

/// Fallback range when an interval callback fails or returns garbage
pub(crate) const DEFAULT_INTERVAL_RANGE: (u64, u64) = (1_000, 2_000);

/// Sleep for `ms`, returning early when the token fires.
///
/// Returns `true` when the sleep was cancelled (including a token that was
/// already cancelled on entry).
pub(crate) async fn sleep_cancellable(ms: u64, cancel: &CancellationToken) -> bool {
    if cancel.is_cancelled() {
        return true;
    }
    if ms == 0 {
        return false;
    }
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(Duration::from_millis(ms)) => false,
    }
}

/// Resolve a configured interval into a concrete millisecond count.
///
/// Custom callbacks receive the global context and, for worker pacing, the
/// flow context. A callback error or non-finite result logs a `generalError`
/// and uses the default range.
pub(crate) fn resolve_interval<G, F>(
    interval: &Interval<G, F>,
    global: &G,
    flow: Option<&F>,
    events: &EventBus,
) -> u64 {
    match interval {
        Interval::Millis(ms) => *ms,
        Interval::Range(a, b) => draw_uniform(*a, *b),
        Interval::Custom(f) => match f(global, flow) {
            Ok(value) => match coerce_value(value) {
                Some((a, b)) => draw_uniform(a, b),
                None => {
                    events.general_error(anyhow::anyhow!(
                        "interval callback returned a non-finite value"
                    ));
                    draw_uniform(DEFAULT_INTERVAL_RANGE.0, DEFAULT_INTERVAL_RANGE.1)
                }
            },
            Err(err) => {
                events.general_error(err.context("interval callback failed"));
                draw_uniform(DEFAULT_INTERVAL_RANGE.0, DEFAULT_INTERVAL_RANGE.1)
            }
        },
    }
}

/// Apply an interval strategy to a resolved interval.
///
/// `last` is the previous execution instant; with no previous execution the
/// wait is always zero.
pub(crate) fn strategy_wait(
    interval_ms: u64,
    strategy: IntervalStrategy,
    last: Option<Instant>,
) -> u64 {
    match (strategy, last) {
        (_, None) => 0,
        (IntervalStrategy::Fixed, Some(_)) => interval_ms,
        (IntervalStrategy::Dynamic, Some(at)) => {
            interval_ms.saturating_sub(at.elapsed().as_millis() as u64)
        }
    }
}

fn coerce_value(value: IntervalValue) -> Option<(u64, u64)> {
    match value {
        IntervalValue::Millis(x) => {
            let ms = coerce_ms(x)?;
            Some((ms, ms))
        }
        IntervalValue::Range(a, b) => Some((coerce_ms(a)?, coerce_ms(b)?)),
    }
}

fn coerce_ms(x: f64) -> Option<u64> {
    x.is_finite().then(|| x.trunc().max(0.0) as u64)
}

fn draw_uniform(a: u64, b: u64) -> u64 {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    if lo == hi {
        return lo;
    }
    rand::thread_rng().gen_range(lo..=hi)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::LoggerPolicy;

    fn quiet_bus() -> EventBus {
        EventBus::new(LoggerPolicy::Disabled)
    }

    #[tokio::test]
    async fn test_sleep_zero_returns_immediately() {
        let token = CancellationToken::new();
        assert!(!sleep_cancellable(0, &token).await);
    }

    #[tokio::test]
    async fn test_sleep_on_cancelled_token_reports_cancellation() {
        let token = CancellationToken::new();
        token.cancel();
        assert!(sleep_cancellable(10_000, &token).await);
    }

    #[tokio::test]
    async fn test_sleep_cancelled_mid_flight() {
        let token = CancellationToken::new();
        let watcher = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            watcher.cancel();
        });
        assert!(sleep_cancellable(60_000, &token).await);
    }

    #[test]
    fn test_scalar_interval_resolves_verbatim() {
        let interval: Interval<(), ()> = Interval::Millis(250);
        assert_eq!(resolve_interval(&interval, &(), None, &quiet_bus()), 250);
    }

    #[test]
    fn test_range_draw_stays_within_bounds() {
        let interval: Interval<(), ()> = Interval::Range(10, 20);
        for _ in 0..50 {
            let ms = resolve_interval(&interval, &(), None, &quiet_bus());
            assert!((10..=20).contains(&ms));
        }
    }

    #[test]
    fn test_custom_callback_value_is_coerced() {
        let interval: Interval<(), ()> =
            Interval::Custom(std::sync::Arc::new(|_g, _f| Ok(IntervalValue::Millis(-5.9))));
        assert_eq!(resolve_interval(&interval, &(), None, &quiet_bus()), 0);
    }

    #[test]
    fn test_custom_callback_error_falls_back_to_default() {
        let interval: Interval<(), ()> =
            Interval::Custom(std::sync::Arc::new(|_g, _f| Err(anyhow::anyhow!("bad"))));
        let bus = quiet_bus();
        let mut rx = bus.subscribe();
        let ms = resolve_interval(&interval, &(), None, &bus);
        assert!((DEFAULT_INTERVAL_RANGE.0..=DEFAULT_INTERVAL_RANGE.1).contains(&ms));
        assert!(matches!(
            rx.try_recv().unwrap(),
            crate::events::ScraperEvent::GeneralError(_)
        ));
    }

    #[test]
    fn test_non_finite_value_falls_back_to_default() {
        let interval: Interval<(), ()> = Interval::Custom(std::sync::Arc::new(|_g, _f| {
            Ok(IntervalValue::Millis(f64::NAN))
        }));
        let ms = resolve_interval(&interval, &(), None, &quiet_bus());
        assert!((DEFAULT_INTERVAL_RANGE.0..=DEFAULT_INTERVAL_RANGE.1).contains(&ms));
    }

    #[test]
    fn test_strategy_wait() {
        assert_eq!(strategy_wait(500, IntervalStrategy::Fixed, None), 0);
        let past = Instant::now();
        assert_eq!(strategy_wait(500, IntervalStrategy::Fixed, Some(past)), 500);
        // Dynamic subtracts the elapsed time; with effectively zero elapsed
        // time the full interval remains.
        let wait = strategy_wait(500, IntervalStrategy::Dynamic, Some(Instant::now()));
        assert!(wait <= 500 && wait >= 490);
    }
}
