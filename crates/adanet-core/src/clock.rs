//! Monotonic clock scaled by a simulation speed factor.
//!
//! All periodic tasks in `adanet-net`/`adanet-agent` consult a [`Clock`]
//! rather than the raw OS timer, so a `TIME_SPEED` greater than 1.0 makes a
//! whole simulation run faster without touching individual sleep calls.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use quanta::Instant;

/// A monotonic clock whose elapsed-time reporting is multiplied by a
/// configurable speed factor.
pub struct Clock {
    epoch: Instant,
    speed: f64,
    /// Elapsed simulated nanoseconds latched at the last `reset()`.
    offset_nanos: AtomicU64,
}

impl Clock {
    /// Build a clock with the given speed factor (1.0 = real time).
    pub fn new(speed: f64) -> Self {
        Clock {
            epoch: Instant::now(),
            speed: speed.max(0.000_001),
            offset_nanos: AtomicU64::new(0),
        }
    }

    /// Read `TIME_SPEED` from the environment, defaulting to 1.0.
    pub fn from_env() -> Self {
        let speed = std::env::var("TIME_SPEED")
            .ok()
            .and_then(|s| s.parse::<f64>().ok())
            .unwrap_or(1.0);
        Self::new(speed)
    }

    /// Simulated seconds elapsed since this clock was constructed or last reset.
    pub fn elapsed_secs(&self) -> f64 {
        let real = self.epoch.elapsed().as_secs_f64();
        real * self.speed + (self.offset_nanos.load(Ordering::Relaxed) as f64 / 1e9)
    }

    /// Reset the clock's epoch to now, preserving no history.
    pub fn reset(&mut self) {
        self.epoch = Instant::now();
        self.offset_nanos.store(0, Ordering::Relaxed);
    }

    /// Scale a real-time period by the inverse of the speed factor, i.e. the
    /// wall-clock duration a caller should actually sleep for a task with
    /// nominal simulated period `period`.
    pub fn period(&self, period: Duration) -> Duration {
        if self.speed <= 0.0 {
            return period;
        }
        Duration::from_secs_f64(period.as_secs_f64() / self.speed)
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_speed_is_one() {
        let clock = Clock::default();
        assert_eq!(clock.speed(), 1.0);
    }

    #[test]
    fn period_scales_inversely_with_speed() {
        let clock = Clock::new(2.0);
        let scaled = clock.period(Duration::from_secs(4));
        assert_eq!(scaled, Duration::from_secs(2));
    }

    #[test]
    fn elapsed_is_nonnegative() {
        let clock = Clock::new(4.0);
        std::thread::sleep(Duration::from_millis(5));
        assert!(clock.elapsed_secs() > 0.0);
    }
}
