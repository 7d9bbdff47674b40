//! Closed error taxonomy for the resilient request engine.

use std::fmt;
use std::time::Duration;

/// Unified error type returned by [`crate::Client::request`].
///
/// `E` is the transport's own error type, carried inside [`EngineError::Network`] when the
/// failure originates below this crate.
#[derive(Debug)]
pub enum EngineError<E> {
    /// Transport-level failure: the transport returned an error, a non-2xx/3xx status was
    /// observed, or the in-flight cap was exceeded before the transport was invoked.
    Network { message: String, cause: Option<E> },
    /// The per-attempt deadline elapsed.
    Timeout { timeout_ms: u64 },
    /// The retry loop exhausted `maxAttempts` without a successful outcome.
    RetryExhausted { attempts: usize, last_error: Box<EngineError<E>> },
    /// The circuit breaker rejected the attempt before it reached the transport.
    CircuitOpen,
    /// A response validator rejected a successful response in strict mode.
    ResponseValidation { message: String, validation_errors: Vec<String> },
    /// An idempotency key was reused with a body whose fingerprint differs from the one on file.
    IntegrityViolation { message: String },
    /// The per-request state machine was asked to make an illegal transition. This indicates a
    /// bug in the engine, not a caller or transport failure.
    DeterministicState { from: &'static str, to: &'static str },
    /// The caller's external cancellation signal fired before the request reached a terminal
    /// outcome.
    Cancelled,
}

impl<E: Clone> Clone for EngineError<E> {
    fn clone(&self) -> Self {
        match self {
            Self::Network { message, cause } => {
                Self::Network { message: message.clone(), cause: cause.clone() }
            }
            Self::Timeout { timeout_ms } => Self::Timeout { timeout_ms: *timeout_ms },
            Self::RetryExhausted { attempts, last_error } => {
                Self::RetryExhausted { attempts: *attempts, last_error: last_error.clone() }
            }
            Self::CircuitOpen => Self::CircuitOpen,
            Self::ResponseValidation { message, validation_errors } => Self::ResponseValidation {
                message: message.clone(),
                validation_errors: validation_errors.clone(),
            },
            Self::IntegrityViolation { message } => {
                Self::IntegrityViolation { message: message.clone() }
            }
            Self::DeterministicState { from, to } => Self::DeterministicState { from, to },
            Self::Cancelled => Self::Cancelled,
        }
    }
}

impl<E: fmt::Display> fmt::Display for EngineError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network { message, cause } => match cause {
                Some(c) => write!(f, "{} (cause: {})", message, c),
                None => write!(f, "{}", message),
            },
            Self::Timeout { timeout_ms } => write!(f, "request timed out after {}ms", timeout_ms),
            Self::RetryExhausted { attempts, last_error } => {
                write!(f, "retry exhausted after {} attempts: {}", attempts, last_error)
            }
            Self::CircuitOpen => write!(f, "circuit breaker is open"),
            Self::ResponseValidation { message, .. } => {
                write!(f, "response validation failed: {}", message)
            }
            Self::IntegrityViolation { message } => write!(f, "integrity violation: {}", message),
            Self::DeterministicState { from, to } => {
                write!(f, "illegal state transition {} -> {}", from, to)
            }
            Self::Cancelled => write!(f, "request cancelled"),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for EngineError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Network { cause, .. } => cause.as_ref().map(|c| c as &dyn std::error::Error),
            Self::RetryExhausted { last_error, .. } => Some(last_error.as_ref()),
            _ => None,
        }
    }
}

impl<E> EngineError<E> {
    /// Stable string code for this error kind, for callers that match on strings rather than
    /// the enum shape (e.g. across an FFI or HTTP-status boundary).
    pub fn code(&self) -> &'static str {
        match self {
            Self::Network { .. } => "NETWORK_ERROR",
            Self::Timeout { .. } => "TIMEOUT_ERROR",
            Self::RetryExhausted { .. } => "RETRY_EXHAUSTED",
            Self::CircuitOpen => "CIRCUIT_OPEN",
            Self::ResponseValidation { .. } => "RESPONSE_VALIDATION_ERROR",
            Self::IntegrityViolation { .. } => "INTEGRITY_VIOLATION",
            Self::DeterministicState { .. } => "DETERMINISTIC_STATE_ERROR",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::Network { message: message.into(), cause: None }
    }

    pub fn network_with_cause(message: impl Into<String>, cause: E) -> Self {
        Self::Network { message: message.into(), cause: Some(cause) }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen)
    }

    pub fn is_retry_exhausted(&self) -> bool {
        matches!(self, Self::RetryExhausted { .. })
    }

    pub fn is_integrity_violation(&self) -> bool {
        matches!(self, Self::IntegrityViolation { .. })
    }

    pub fn is_response_validation(&self) -> bool {
        matches!(self, Self::ResponseValidation { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn is_deterministic_state(&self) -> bool {
        matches!(self, Self::DeterministicState { .. })
    }
}

/// Builds a [`EngineError::RetryExhausted`]. The data model carries a single `lastError`
/// rather than the full per-attempt history, so this never grows unboundedly regardless of
/// `maxAttempts`.
pub(crate) fn retry_exhausted<E>(attempts: usize, last_error: EngineError<E>) -> EngineError<E> {
    debug_assert!(attempts > 0, "retry-exhausted requires at least one attempt");
    EngineError::RetryExhausted { attempts, last_error: Box::new(last_error) }
}

pub(crate) fn elapsed_timeout_ms(d: Duration) -> u64 {
    d.as_millis().min(u64::MAX as u128) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn codes_are_stable() {
        let e: EngineError<io::Error> = EngineError::CircuitOpen;
        assert_eq!(e.code(), "CIRCUIT_OPEN");
        let e: EngineError<io::Error> = EngineError::Timeout { timeout_ms: 30_000 };
        assert_eq!(e.code(), "TIMEOUT_ERROR");
    }

    #[test]
    fn retry_exhausted_displays_last_error() {
        let inner: EngineError<io::Error> = EngineError::network("HTTP 503");
        let err = retry_exhausted(2, inner);
        let msg = format!("{}", err);
        assert!(msg.contains("2 attempts"));
        assert!(msg.contains("HTTP 503"));
        assert_eq!(err.code(), "RETRY_EXHAUSTED");
    }

    #[test]
    fn network_with_cause_reports_source() {
        let cause = io::Error::new(io::ErrorKind::Other, "boom");
        let err = EngineError::network_with_cause("transport failed", cause);
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn predicates_cover_variants() {
        let e: EngineError<io::Error> = EngineError::IntegrityViolation { message: "x".into() };
        assert!(e.is_integrity_violation());
        assert!(!e.is_timeout());
        let e: EngineError<io::Error> = EngineError::Cancelled;
        assert!(e.is_cancelled());
    }
}
