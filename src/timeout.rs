//! Binds a deadline to a cancellable operation, and distinguishes deadline expiry from
//! caller-initiated cancellation racing it.
//!
//! Two cancellation sources exist: the per-attempt deadline, and the caller's external signal
//! spanning the whole request. The external signal wins ties — if both fire
//! together the outcome is `Cancelled`, not `TimedOut` — so the select below is `biased` with the
//! cancellation arm listed first.

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub enum TimeoutOutcome<T> {
    Completed(T),
    TimedOut,
    Cancelled,
}

/// Race `op` against `duration` and the caller's `external` cancellation token.
pub async fn with_timeout<F>(
    duration: Duration,
    external: &CancellationToken,
    op: F,
) -> TimeoutOutcome<F::Output>
where
    F: Future,
{
    tokio::select! {
        biased;
        _ = external.cancelled() => TimeoutOutcome::Cancelled,
        _ = tokio::time::sleep(duration) => TimeoutOutcome::TimedOut,
        result = op => TimeoutOutcome::Completed(result),
    }
}
