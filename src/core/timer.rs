//! Drift-free periodic timer.
//!
//! A [`Timer`] tracks the next absolute fire time of a fixed period. Consulting
//! it with [`Timer::is_time`] after one or more period boundaries have passed
//! returns `true` once and moves the fire time past every missed boundary in a
//! single step, so a late check never produces a burst of catch-up ticks.

use std::thread;
use std::time::Duration;

use crate::core::WorkError;
use crate::util::clock::{duration_from_nanos, SharedClock, SystemClock};

/// Upper bound on a single sleep inside [`Timer::wait`]; the clock is
/// re-read after each slice so wall-clock adjustments are picked up.
pub const MAX_SLEEP_SLICE: Duration = Duration::from_millis(250);

/// When the first tick of a timer happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimerStart {
    /// One period after creation.
    #[default]
    AfterPeriod,
    /// At creation.
    Immediately,
    /// At the next wall-clock multiple of the period.
    Aligned,
    /// At an absolute time (offset from the Unix epoch).
    At(Duration),
}

/// Periodic timer with drift correction.
pub struct Timer {
    period: Duration,
    next_fire: Duration,
    clock: SharedClock,
}

impl Timer {
    /// Timer on the system clock firing one period from now.
    ///
    /// # Errors
    ///
    /// Returns `WorkError::InvalidConfig` if `period` is zero.
    pub fn new(period: Duration) -> Result<Self, WorkError> {
        Self::with_start(period, TimerStart::AfterPeriod, SystemClock::shared())
    }

    /// Timer with an explicit start policy and clock.
    ///
    /// # Errors
    ///
    /// Returns `WorkError::InvalidConfig` if `period` is zero.
    pub fn with_start(
        period: Duration,
        start: TimerStart,
        clock: SharedClock,
    ) -> Result<Self, WorkError> {
        if period.is_zero() {
            return Err(WorkError::InvalidConfig("timer period must be greater than 0".into()));
        }
        let now = clock.now();
        let next_fire = match start {
            TimerStart::AfterPeriod => now.saturating_add(period),
            TimerStart::Immediately => now,
            TimerStart::Aligned => {
                let elapsed_periods = now.as_nanos() / period.as_nanos();
                duration_from_nanos((elapsed_periods + 1) * period.as_nanos())
            }
            TimerStart::At(at) => at,
        };
        Ok(Self {
            period,
            next_fire,
            clock,
        })
    }

    /// The period.
    pub const fn period(&self) -> Duration {
        self.period
    }

    /// Absolute time of the next tick.
    pub const fn next_fire_time(&self) -> Duration {
        self.next_fire
    }

    /// Time left until the next tick, zero if it is due.
    pub fn until_next(&self) -> Duration {
        self.next_fire.saturating_sub(self.clock.now())
    }

    /// Whether a period boundary has been reached since the last `true`.
    ///
    /// On `true` the next fire time advances by the smallest whole number of
    /// periods that puts it strictly in the future.
    pub fn is_time(&mut self) -> bool {
        let now = self.clock.now();
        if now < self.next_fire {
            return false;
        }
        let period = self.period.as_nanos();
        let missed = (now - self.next_fire).as_nanos() / period + 1;
        self.next_fire = duration_from_nanos(self.next_fire.as_nanos() + missed * period);
        true
    }

    /// Restart the period from now.
    pub fn rearm(&mut self) {
        self.next_fire = self.clock.now().saturating_add(self.period);
    }

    /// Block until the next tick.
    pub fn wait(&mut self) {
        while !self.is_time() {
            thread::sleep(self.until_next().min(MAX_SLEEP_SLICE));
        }
    }
}

impl std::fmt::Debug for Timer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timer")
            .field("period", &self.period)
            .field("next_fire", &self.next_fire)
            .finish_non_exhaustive()
    }
}
