//! Jitter applied to a computed backoff delay.
//!
//! Multiplies the capped delay by a uniform random factor in `[0.5, 1.0)`, equivalent to the
//! "equal jitter" formula. Unlike a general-purpose jitter toolkit this module exposes one
//! function rather than a strategy enum, since `RetryConfig.jitter` is a boolean flag, not a
//! choice of algorithm.

use rand::Rng;
use std::time::Duration;

/// Multiply `delay` by a uniform random factor in `[0.5, 1.0)`.
pub fn apply_jitter(delay: Duration) -> Duration {
    apply_jitter_with_rng(delay, &mut rand::rng())
}

/// Deterministic variant for tests.
pub fn apply_jitter_with_rng<R: Rng>(delay: Duration, rng: &mut R) -> Duration {
    let millis = delay.as_millis() as u64;
    if millis == 0 {
        return Duration::from_millis(0);
    }
    let half = millis / 2;
    // [half, millis): upper bound exclusive, giving a `[0.5, 1.0)` factor of the original delay.
    let jittered = if half >= millis { half } else { rng.random_range(half..millis) };
    Duration::from_millis(jittered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn stays_in_half_to_full_range_exclusive() {
        let delay = Duration::from_millis(1000);
        for _ in 0..500 {
            let jittered = apply_jitter(delay);
            assert!(jittered >= Duration::from_millis(500));
            assert!(jittered < delay);
        }
    }

    #[test]
    fn zero_delay_stays_zero() {
        assert_eq!(apply_jitter(Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn deterministic_with_seeded_rng() {
        let mut rng = StdRng::seed_from_u64(7);
        let delay = Duration::from_millis(1000);
        let jittered = apply_jitter_with_rng(delay, &mut rng);
        assert!(jittered >= Duration::from_millis(500));
        assert!(jittered < delay);
    }

    #[test]
    fn small_delays_do_not_panic() {
        for ms in 0..5u64 {
            let d = apply_jitter(Duration::from_millis(ms));
            assert!(d <= Duration::from_millis(ms));
        }
    }
}
