//! Virtual time for deterministic simulation
//!
//! `SimTime` is an absolute point on the simulated timeline, measured from
//! the start of the run. `VirtualClock` holds the current point and only ever
//! moves forward; the scheduler advances it as events are dispatched.

use std::fmt;
use std::ops::{Add, Sub};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Point on the simulated timeline
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct SimTime(Duration);

impl SimTime {
    pub const ZERO: SimTime = SimTime(Duration::ZERO);

    pub const fn from_secs(secs: u64) -> Self {
        SimTime(Duration::from_secs(secs))
    }

    pub const fn from_millis(millis: u64) -> Self {
        SimTime(Duration::from_millis(millis))
    }

    /// Convert fractional seconds, rejecting negative, NaN and overflowing values
    pub fn from_secs_f64(secs: f64) -> Option<Self> {
        Duration::try_from_secs_f64(secs).ok().map(SimTime)
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.0.as_secs_f64()
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }

    /// Time elapsed since `earlier`, zero if `earlier` is in the future
    pub fn duration_since(&self, earlier: SimTime) -> Duration {
        self.0.saturating_sub(earlier.0)
    }
}

impl From<Duration> for SimTime {
    fn from(duration: Duration) -> Self {
        SimTime(duration)
    }
}

impl Add<Duration> for SimTime {
    type Output = SimTime;

    fn add(self, rhs: Duration) -> SimTime {
        SimTime(self.0.saturating_add(rhs))
    }
}

impl Sub<SimTime> for SimTime {
    type Output = Duration;

    fn sub(self, rhs: SimTime) -> Duration {
        self.duration_since(rhs)
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}s", self.as_secs_f64())
    }
}

// ============================================================================
// Virtual Clock
// ============================================================================

/// Monotonic virtual clock driven by the scheduler
#[derive(Debug, Default, Clone)]
pub struct VirtualClock {
    current: SimTime,
}

impl VirtualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current virtual time
    pub fn now(&self) -> SimTime {
        self.current
    }

    /// Move the clock to `time`; earlier times leave the clock untouched
    pub fn advance_to(&mut self, time: SimTime) {
        debug_assert!(
            time >= self.current,
            "virtual time must not run backwards ({} -> {})",
            self.current,
            time
        );
        if time > self.current {
            self.current = time;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_virtual_clock_manual_time_control() {
        let mut clock = VirtualClock::new();

        assert_eq!(clock.now(), SimTime::ZERO);

        clock.advance_to(SimTime::from_secs(10));
        assert_eq!(clock.now(), SimTime::from_secs(10));

        clock.advance_to(SimTime::from_secs(10) + Duration::from_secs(5));
        assert_eq!(clock.now(), SimTime::from_secs(15));
    }

    #[test]
    fn test_virtual_clock_deterministic() {
        let mut clock1 = VirtualClock::new();
        let mut clock2 = VirtualClock::new();

        clock1.advance_to(SimTime::from_millis(42_500));
        clock2.advance_to(SimTime::from_millis(42_500));

        assert_eq!(clock1.now(), clock2.now());
    }

    #[test]
    fn test_sim_time_from_secs_f64_rejects_negative() {
        assert!(SimTime::from_secs_f64(-0.5).is_none());
        assert!(SimTime::from_secs_f64(f64::NAN).is_none());
        assert_eq!(SimTime::from_secs_f64(1.5), Some(SimTime::from_millis(1500)));
    }

    #[test]
    fn test_sim_time_arithmetic() {
        let t = SimTime::from_secs(3) + Duration::from_millis(250);
        assert_eq!(t.as_secs_f64(), 3.25);
        assert_eq!(t - SimTime::from_secs(1), Duration::from_millis(2250));
        assert_eq!(SimTime::from_secs(1) - t, Duration::ZERO);
    }
}
