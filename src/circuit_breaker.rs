//! Circuit breaker: a cross-request health gate with three states, built on lock-free atomics
//! so `check`/`record_success`/`record_failure` never block a concurrently-running attempt.

use crate::clock::{Clock, MonotonicClock};
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const STATE_CLOSED: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_HALF_OPEN: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    pub failure_threshold: usize,
    pub reset_timeout: Duration,
    pub half_open_max_calls: usize,
}

impl BreakerConfig {
    pub fn new(failure_threshold: usize, reset_timeout: Duration) -> Self {
        Self { failure_threshold, reset_timeout, half_open_max_calls: 1 }
    }

    pub fn with_half_open_max_calls(mut self, n: usize) -> Self {
        self.half_open_max_calls = n;
        self
    }
}

struct Inner {
    state: AtomicU8,
    failure_count: AtomicUsize,
    opened_at_millis: AtomicU64,
    half_open_calls: AtomicUsize,
}

/// The breaker the engine gates every attempt on. `check()` decides whether an attempt may
/// proceed; `record_success`/`record_failure` feed the outcome back once the attempt completes.
/// This split (rather than a single `execute` wrapper) is deliberate: the engine, not the
/// breaker, decides which transport outcomes count as failures (§8 Invariant 7 — a validation
/// failure after a successful response must never call `record_failure`).
#[derive(Clone)]
pub struct CircuitBreaker {
    inner: Arc<Inner>,
    config: BreakerConfig,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: AtomicU8::new(STATE_CLOSED),
                failure_count: AtomicUsize::new(0),
                opened_at_millis: AtomicU64::new(0),
                half_open_calls: AtomicUsize::new(0),
            }),
            config,
            clock: Arc::new(MonotonicClock::default()),
        }
    }

    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn state(&self) -> CircuitState {
        match self.inner.state.load(Ordering::Acquire) {
            STATE_OPEN => CircuitState::Open,
            STATE_HALF_OPEN => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }

    pub fn failures(&self) -> usize {
        self.inner.failure_count.load(Ordering::Acquire)
    }

    /// Returns `Ok(())` if the attempt may proceed, `Err(())` if the breaker rejects it
    /// (`circuit-open`). On `OPEN`, transitions to `HALF_OPEN` once `reset_timeout` has elapsed.
    pub fn check(&self) -> Result<(), ()> {
        loop {
            let current = self.inner.state.load(Ordering::Acquire);
            match current {
                STATE_CLOSED => return Ok(()),
                STATE_OPEN => {
                    let opened_at = self.inner.opened_at_millis.load(Ordering::Acquire);
                    let elapsed = self.clock.now_millis().saturating_sub(opened_at);
                    if elapsed >= self.config.reset_timeout.as_millis() as u64 {
                        match self.inner.state.compare_exchange(
                            STATE_OPEN,
                            STATE_HALF_OPEN,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        ) {
                            Ok(_) => {
                                tracing::info!("circuit breaker -> half-open");
                                self.inner.half_open_calls.store(1, Ordering::Release);
                                return Ok(());
                            }
                            Err(STATE_HALF_OPEN) | Err(STATE_CLOSED) => continue,
                            Err(_) => unreachable!("invalid circuit breaker state"),
                        }
                    } else {
                        return Err(());
                    }
                }
                STATE_HALF_OPEN => {
                    let current_calls = self.inner.half_open_calls.fetch_add(1, Ordering::AcqRel);
                    if current_calls >= self.config.half_open_max_calls {
                        self.inner.half_open_calls.fetch_sub(1, Ordering::Release);
                        return Err(());
                    }
                    return Ok(());
                }
                _ => unreachable!("invalid circuit breaker state"),
            }
        }
    }

    pub fn record_success(&self) {
        match self.inner.state.load(Ordering::Acquire) {
            STATE_HALF_OPEN => {
                if self
                    .inner
                    .state
                    .compare_exchange(STATE_HALF_OPEN, STATE_CLOSED, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    self.inner.failure_count.store(0, Ordering::Release);
                    self.inner.opened_at_millis.store(0, Ordering::Release);
                    tracing::info!("circuit breaker -> closed");
                }
            }
            STATE_CLOSED => self.inner.failure_count.store(0, Ordering::Release),
            _ => {}
        }
    }

    pub fn record_failure(&self) {
        let current = self.inner.state.load(Ordering::Acquire);
        let failures = self.inner.failure_count.fetch_add(1, Ordering::AcqRel) + 1;
        match current {
            STATE_HALF_OPEN => {
                if self
                    .inner
                    .state
                    .compare_exchange(STATE_HALF_OPEN, STATE_OPEN, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    self.inner.opened_at_millis.store(self.clock.now_millis(), Ordering::Release);
                    tracing::warn!(failures, "circuit breaker: half-open probe failed -> open");
                }
            }
            STATE_CLOSED => {
                if failures >= self.config.failure_threshold
                    && self
                        .inner
                        .state
                        .compare_exchange(STATE_CLOSED, STATE_OPEN, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                {
                    self.inner.opened_at_millis.store(self.clock.now_millis(), Ordering::Release);
                    tracing::error!(
                        failures,
                        threshold = self.config.failure_threshold,
                        "circuit breaker -> open"
                    );
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64 as TestClockCell;

    #[derive(Debug, Clone)]
    struct ManualClock {
        now: Arc<TestClockCell>,
    }

    impl ManualClock {
        fn new() -> Self {
            Self { now: Arc::new(TestClockCell::new(0)) }
        }
        fn advance(&self, ms: u64) {
            self.now.fetch_add(ms, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now_millis(&self) -> u64 {
            self.now.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn starts_closed() {
        let breaker = CircuitBreaker::new(BreakerConfig::new(3, Duration::from_secs(1)));
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.check().is_ok());
    }

    #[test]
    fn opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new(BreakerConfig::new(3, Duration::from_secs(10)));
        for _ in 0..3 {
            assert!(breaker.check().is_ok());
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.check().is_err());
    }

    #[test]
    fn half_opens_after_reset_timeout_and_closes_on_success() {
        let clock = ManualClock::new();
        let breaker =
            CircuitBreaker::new(BreakerConfig::new(2, Duration::from_millis(10))).with_clock(clock.clone());
        for _ in 0..2 {
            breaker.check().unwrap();
            breaker.record_failure();
        }
        assert!(breaker.check().is_err());
        clock.advance(11);
        assert!(breaker.check().is_ok());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failures(), 0);
    }

    #[test]
    fn half_open_failure_reopens() {
        let clock = ManualClock::new();
        let breaker =
            CircuitBreaker::new(BreakerConfig::new(1, Duration::from_millis(10))).with_clock(clock.clone());
        breaker.check().unwrap();
        breaker.record_failure();
        clock.advance(20);
        breaker.check().unwrap();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn half_open_limits_concurrent_probes() {
        let clock = ManualClock::new();
        let breaker = CircuitBreaker::new(BreakerConfig::new(1, Duration::from_millis(10)))
            .with_clock(clock.clone());
        breaker.check().unwrap();
        breaker.record_failure();
        clock.advance(20);
        assert!(breaker.check().is_ok());
        assert!(breaker.check().is_err(), "second concurrent probe should be rejected");
    }

    #[test]
    fn success_in_closed_resets_failure_count() {
        let breaker = CircuitBreaker::new(BreakerConfig::new(3, Duration::from_secs(1)));
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        assert_eq!(breaker.failures(), 0);
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed, "threshold not yet reached again");
    }
}
