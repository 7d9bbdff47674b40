//! Structured telemetry events emitted by the engine, independent of the caller-facing hooks in
//! [`crate::hooks`]. These feed a [`super::sinks::TelemetrySink`] for log aggregation.

use serde_json::json;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum PolicyEvent {
    Retry(RetryEvent),
    CircuitBreaker(CircuitBreakerEvent),
    Timeout(TimeoutEvent),
    Request(RequestOutcome),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryEvent {
    Attempt { attempt: u32, delay: Duration },
    Exhausted { total_attempts: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitBreakerEvent {
    Opened { failure_count: usize },
    HalfOpen,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutEvent {
    Occurred { timeout_ms: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Success { duration: Duration, status: u16 },
    Failure { duration: Duration },
}

impl fmt::Display for PolicyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Retry(e) => write!(f, "Retry::{}", e),
            Self::CircuitBreaker(e) => write!(f, "CircuitBreaker::{}", e),
            Self::Timeout(e) => write!(f, "Timeout::{}", e),
            Self::Request(e) => write!(f, "Request::{}", e),
        }
    }
}

impl fmt::Display for RetryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Attempt { attempt, delay } => write!(f, "Attempt(#{}, delay={:?})", attempt, delay),
            Self::Exhausted { total_attempts } => write!(f, "Exhausted(attempts={})", total_attempts),
        }
    }
}

impl fmt::Display for CircuitBreakerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Opened { failure_count } => write!(f, "Opened(failures={})", failure_count),
            Self::HalfOpen => write!(f, "HalfOpen"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

impl fmt::Display for TimeoutEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Occurred { timeout_ms } => write!(f, "Occurred(timeout_ms={})", timeout_ms),
        }
    }
}

impl fmt::Display for RequestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success { duration, status } => {
                write!(f, "Success(duration={:?}, status={})", duration, status)
            }
            Self::Failure { duration } => write!(f, "Failure(duration={:?})", duration),
        }
    }
}

fn clamp_u64(val: u128) -> u64 {
    val.min(u128::from(u64::MAX)) as u64
}

/// Converts an event to JSON for sinks that forward structured logs. Deliberately carries no
/// header or body data so it can never leak request payloads or credentials.
pub fn event_to_json(event: &PolicyEvent) -> serde_json::Value {
    match event {
        PolicyEvent::Retry(r) => match r {
            RetryEvent::Attempt { attempt, delay } => json!({
                "kind": "retry_attempt",
                "attempt": *attempt,
                "delay_ms": clamp_u64(delay.as_millis()),
            }),
            RetryEvent::Exhausted { total_attempts } => json!({
                "kind": "retry_exhausted",
                "attempts": *total_attempts,
            }),
        },
        PolicyEvent::CircuitBreaker(c) => match c {
            CircuitBreakerEvent::Opened { failure_count } => {
                json!({ "kind": "circuit_opened", "failures": *failure_count })
            }
            CircuitBreakerEvent::HalfOpen => json!({ "kind": "circuit_half_open" }),
            CircuitBreakerEvent::Closed => json!({ "kind": "circuit_closed" }),
        },
        PolicyEvent::Timeout(t) => match t {
            TimeoutEvent::Occurred { timeout_ms } => json!({
                "kind": "timeout",
                "timeout_ms": *timeout_ms,
            }),
        },
        PolicyEvent::Request(r) => match r {
            RequestOutcome::Success { duration, status } => json!({
                "kind": "request_success",
                "duration_ms": clamp_u64(duration.as_millis()),
                "status": *status,
            }),
            RequestOutcome::Failure { duration } => json!({
                "kind": "request_failure",
                "duration_ms": clamp_u64(duration.as_millis()),
            }),
        },
    }
}
