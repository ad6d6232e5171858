//! Leaky bucket rate limiter.

use std::thread;
use std::time::Duration;

use crate::core::WorkError;
use crate::util::clock::{duration_from_nanos, SharedClock, SystemClock};

/// Admits callers at no more than `frequency` per second on average.
///
/// One permit leaks every `1 / frequency` seconds since creation. A caller
/// that finds every leaked permit used sleeps until the next leak; permits
/// left unused while idle can be spent later without waiting.
pub struct LeakyBucket {
    created: Duration,
    period: Duration,
    used: u64,
    clock: SharedClock,
}

impl LeakyBucket {
    /// Bucket on the system clock.
    ///
    /// # Errors
    ///
    /// `WorkError::InvalidConfig` unless `frequency` is finite and positive
    /// with a period of at least one nanosecond.
    pub fn new(frequency: f64) -> Result<Self, WorkError> {
        Self::with_clock(frequency, SystemClock::shared())
    }

    /// Bucket on an explicit clock.
    ///
    /// # Errors
    ///
    /// Same as [`LeakyBucket::new`].
    pub fn with_clock(frequency: f64, clock: SharedClock) -> Result<Self, WorkError> {
        if !frequency.is_finite() || frequency <= 0.0 {
            return Err(WorkError::InvalidConfig(format!(
                "frequency must be positive, got {frequency}"
            )));
        }
        let period = Duration::try_from_secs_f64(1.0 / frequency)
            .map_err(|e| WorkError::InvalidConfig(format!("frequency {frequency}: {e}")))?;
        if period.is_zero() {
            return Err(WorkError::InvalidConfig(format!("frequency {frequency} is too high")));
        }
        Ok(Self {
            created: clock.now(),
            period,
            used: 0,
            clock,
        })
    }

    fn leaked(&self, now: Duration) -> u64 {
        let elapsed = now.saturating_sub(self.created);
        u64::try_from(elapsed.as_nanos() / self.period.as_nanos()).unwrap_or(u64::MAX)
    }

    /// Time until a permit is available; zero if one is available now.
    pub fn delay(&self) -> Duration {
        let now = self.clock.now();
        let leaked = self.leaked(now);
        if self.used <= leaked {
            return Duration::ZERO;
        }
        let next_leak = self
            .created
            .saturating_add(duration_from_nanos(
                self.period.as_nanos().saturating_mul(u128::from(leaked.saturating_add(1))),
            ));
        next_leak.saturating_sub(now)
    }

    /// Take a permit if one is available without waiting.
    pub fn try_acquire(&mut self) -> bool {
        if self.delay().is_zero() {
            self.used += 1;
            true
        } else {
            false
        }
    }

    /// Take a permit, sleeping until one leaks if necessary.
    pub fn wait(&mut self) {
        let delay = self.delay();
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        self.used += 1;
    }

    /// Time between permits.
    pub const fn period(&self) -> Duration {
        self.period
    }
}

impl std::fmt::Debug for LeakyBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeakyBucket")
            .field("period", &self.period)
            .field("used", &self.used)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::clock::ManualClock;
    use std::time::Instant;

    #[test]
    fn test_rejects_bad_frequency() {
        assert!(LeakyBucket::new(0.0).is_err());
        assert!(LeakyBucket::new(-1.0).is_err());
        assert!(LeakyBucket::new(f64::NAN).is_err());
        assert!(LeakyBucket::new(f64::INFINITY).is_err());
    }

    #[test]
    fn test_permits_leak_over_time() {
        let clock = ManualClock::at_secs(100);
        let mut bucket = LeakyBucket::with_clock(2.0, clock.shared()).unwrap();
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());
        assert_eq!(bucket.delay(), Duration::from_millis(500));
        clock.advance(Duration::from_millis(500));
        assert!(bucket.try_acquire());
        clock.advance(Duration::from_secs(2));
        // Idle time banks permits: leaked = 5, used = 2.
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());
    }

    #[test]
    fn test_wait_paces_calls() {
        let mut bucket = LeakyBucket::new(50.0).unwrap();
        let started = Instant::now();
        for _ in 0..6 {
            bucket.wait();
        }
        assert!(started.elapsed() >= Duration::from_millis(90));
    }
}
