//! Delay computation per retry strategy, and the retryability predicate.

use std::sync::Arc;
use std::time::Duration;

/// Strategy for computing the raw (pre-jitter, pre-cap) delay for a given attempt.
#[derive(Clone)]
pub enum BackoffStrategy {
    Fixed,
    Linear,
    Exponential,
    /// `delay = f(attempt, base)`. Boxed so callers can carry arbitrary closures; not `Debug`.
    Custom(Arc<dyn Fn(u32, Duration) -> Duration + Send + Sync>),
}

impl std::fmt::Debug for BackoffStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fixed => write!(f, "Fixed"),
            Self::Linear => write!(f, "Linear"),
            Self::Exponential => write!(f, "Exponential"),
            Self::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// Raw delay per strategy, capped at `max`, optionally jittered, floored to whole
/// milliseconds.
pub fn compute_delay(
    strategy: &BackoffStrategy,
    attempt: u32,
    base: Duration,
    max: Duration,
    jitter: bool,
) -> Duration {
    let raw = match strategy {
        BackoffStrategy::Fixed => base,
        BackoffStrategy::Linear => base.checked_mul(attempt).unwrap_or(Duration::MAX),
        BackoffStrategy::Exponential => {
            let exponent = attempt.saturating_sub(1);
            let multiplier = 2u32.saturating_pow(exponent);
            base.checked_mul(multiplier).unwrap_or(Duration::MAX)
        }
        BackoffStrategy::Custom(f) => f(attempt, base),
    };
    let capped = raw.min(max);
    if jitter {
        crate::jitter::apply_jitter(capped)
    } else {
        capped
    }
}

/// A member of `RetryConfig.retryOn`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOn {
    Network,
    ServerError,
    Status(u16),
}

impl RetryOn {
    fn matches(self, status: Option<u16>) -> bool {
        match self {
            RetryOn::Network => status.is_none(),
            RetryOn::ServerError => status.map(|s| s >= 500).unwrap_or(false),
            RetryOn::Status(code) => status == Some(code),
        }
    }
}

/// `shouldRetry(config, statusCode, attempt)`: true iff retry is enabled, attempts remain, and
/// at least one `retryOn` member matches the observed outcome.
pub fn should_retry(
    enabled: bool,
    max_attempts: u32,
    retry_on: &[RetryOn],
    status: Option<u16>,
    attempt: u32,
) -> bool {
    enabled && attempt < max_attempts && retry_on.iter().any(|r| r.matches(status))
}
