//! Retry delay calculation.
//!
//! Delays grow exponentially from a base, saturate at a maximum, and are
//! spread by a symmetric jitter so that failures from the same incident do
//! not come back at the same instant.

use chrono::{DateTime, Utc};

/// Longest configurable backoff, one day.
pub const MAX_BACKOFF_SECS: f64 = 86_400.0;

/// Source of uniform samples in `[0, 1)`.
pub trait JitterSource: Send + Sync {
    fn sample(&self) -> f64;
}

/// Jitter from the thread-local RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadJitter;

impl JitterSource for ThreadJitter {
    fn sample(&self) -> f64 {
        rand::random::<f64>()
    }
}

/// Constant sample, for deterministic tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedJitter(pub f64);

impl JitterSource for FixedJitter {
    fn sample(&self) -> f64 {
        self.0.clamp(0.0, 1.0)
    }
}

/// Delay in seconds before retry number `attempt_index` (0-based).
///
/// `capped = min(base * 2^attempt_index, max)`, then shifted by a uniform
/// offset in `[-capped * jitter_fraction, +capped * jitter_fraction]` and
/// floored at zero.
pub fn next_delay(
    attempt_index: u32,
    base_secs: f64,
    max_secs: f64,
    jitter_fraction: f64,
    rng: &dyn JitterSource,
) -> f64 {
    let exponent = attempt_index.min(62) as i32;
    let capped = (base_secs.max(0.0) * 2f64.powi(exponent)).min(max_secs.max(0.0));
    apply_jitter(capped, jitter_fraction, rng)
}

fn apply_jitter(capped: f64, jitter_fraction: f64, rng: &dyn JitterSource) -> f64 {
    let jitter = capped * jitter_fraction.max(0.0);
    let offset = (rng.sample() * 2.0 - 1.0) * jitter;
    (capped + offset).max(0.0)
}

/// Backoff parameters for the delivery engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub base_secs: f64,
    pub max_secs: f64,
    pub jitter_fraction: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_secs: 30.0,
            max_secs: 300.0,
            jitter_fraction: 0.3,
        }
    }
}

impl BackoffPolicy {
    /// Delay for `attempt_index`.
    ///
    /// An explicit schedule (from per-type settings) replaces the exponential
    /// curve; indices past its end reuse the last entry. The maximum and the
    /// jitter apply either way.
    pub fn delay_secs(&self, attempt_index: u32, schedule: &[u64], rng: &dyn JitterSource) -> f64 {
        match schedule {
            [] => next_delay(
                attempt_index,
                self.base_secs,
                self.max_secs,
                self.jitter_fraction,
                rng,
            ),
            delays => {
                let idx = (attempt_index as usize).min(delays.len() - 1);
                let capped = (delays[idx] as f64).min(self.max_secs);
                apply_jitter(capped, self.jitter_fraction, rng)
            }
        }
    }

    /// Absolute time of the next retry.
    pub fn retry_at(
        &self,
        now: DateTime<Utc>,
        attempt_index: u32,
        schedule: &[u64],
        rng: &dyn JitterSource,
    ) -> DateTime<Utc> {
        // Full jitter can at most double the cap.
        let secs = self
            .delay_secs(attempt_index, schedule, rng)
            .clamp(0.0, 2.0 * MAX_BACKOFF_SECS);
        now + chrono::Duration::milliseconds((secs * 1000.0).round() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOW: FixedJitter = FixedJitter(0.0);
    const MID: FixedJitter = FixedJitter(0.5);
    const HIGH: FixedJitter = FixedJitter(1.0);

    #[test]
    fn test_no_jitter_at_midpoint() {
        assert_eq!(next_delay(0, 30.0, 300.0, 0.3, &MID), 30.0);
        assert_eq!(next_delay(1, 30.0, 300.0, 0.3, &MID), 60.0);
        assert_eq!(next_delay(2, 30.0, 300.0, 0.3, &MID), 120.0);
        assert_eq!(next_delay(3, 30.0, 300.0, 0.3, &MID), 240.0);
        assert_eq!(next_delay(4, 30.0, 300.0, 0.3, &MID), 300.0);
        assert_eq!(next_delay(40, 30.0, 300.0, 0.3, &MID), 300.0);
    }

    #[test]
    fn test_jitter_extremes() {
        let low = next_delay(0, 30.0, 300.0, 0.3, &LOW);
        let high = next_delay(0, 30.0, 300.0, 0.3, &HIGH);
        assert!((low - 21.0).abs() < 1e-9);
        assert!((high - 39.0).abs() < 1e-9);
    }

    #[test]
    fn test_monotonic_until_saturation() {
        let mut previous = 0.0;
        for attempt in 0..20 {
            let delay = next_delay(attempt, 30.0, 300.0, 0.3, &MID);
            assert!(delay >= previous, "attempt {attempt}: {delay} < {previous}");
            previous = delay;
        }
    }

    #[test]
    fn test_bounded_for_any_sample() {
        let samples = [0.0, 0.1, 0.25, 0.5, 0.75, 0.99, 1.0];
        for attempt in 0..12 {
            for sample in samples {
                let delay = next_delay(attempt, 30.0, 300.0, 0.3, &FixedJitter(sample));
                assert!(delay >= 0.0);
                assert!(delay <= 300.0 * 1.3 + 1e-9);
            }
        }
    }

    #[test]
    fn test_floored_at_zero() {
        assert_eq!(next_delay(0, 30.0, 300.0, 2.0, &LOW), 0.0);
        assert_eq!(next_delay(0, 0.0, 300.0, 0.3, &HIGH), 0.0);
    }

    #[test]
    fn test_thread_jitter_stays_in_bounds() {
        for _ in 0..200 {
            let delay = next_delay(1, 30.0, 300.0, 0.3, &ThreadJitter);
            assert!((42.0..=78.0).contains(&delay), "{delay}");
        }
    }

    #[test]
    fn test_explicit_schedule_reuses_last_entry() {
        let policy = BackoffPolicy::default();
        let schedule = [30, 300];
        assert_eq!(policy.delay_secs(0, &schedule, &MID), 30.0);
        assert_eq!(policy.delay_secs(1, &schedule, &MID), 300.0);
        assert_eq!(policy.delay_secs(5, &schedule, &MID), 300.0);
    }

    #[test]
    fn test_explicit_schedule_is_capped() {
        let policy = BackoffPolicy {
            max_secs: 100.0,
            ..Default::default()
        };
        assert_eq!(policy.delay_secs(0, &[600], &MID), 100.0);
    }

    #[test]
    fn test_retry_at_survives_unbounded_policy() {
        let policy = BackoffPolicy {
            max_secs: f64::INFINITY,
            ..Default::default()
        };
        let now = Utc::now();
        let at = policy.retry_at(now, 0, &[u64::MAX], &MID);
        assert_eq!((at - now).num_seconds(), 2 * 86_400);
    }

    #[test]
    fn test_retry_at_offsets_now() {
        let policy = BackoffPolicy::default();
        let now = Utc::now();
        let at = policy.retry_at(now, 0, &[], &MID);
        assert_eq!((at - now).num_seconds(), 30);
    }
}
