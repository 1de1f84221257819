//! Adaptive cycle schedule

use std::time::{Duration, Instant};

/// Decides when the next cycle is due.
///
/// Cycles are spaced by `interval - compensation` measured from the start of
/// the last successful cycle, so a cycle that takes a few seconds does not
/// push the whole cadence back by its own duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleSchedule {
    interval: Duration,
    compensation: Duration,
}

impl CycleSchedule {
    pub fn new(interval: Duration, compensation: Duration) -> Self {
        Self { interval, compensation }
    }

    /// Configured interval minus compensation, clamped at zero
    pub fn adjusted_interval(&self) -> Duration {
        self.interval.saturating_sub(self.compensation)
    }

    /// Whether a cycle should start at `now`. The first cycle is always due.
    pub fn is_due(&self, last_start: Option<Instant>, now: Instant) -> bool {
        self.remaining(last_start, now).is_zero()
    }

    /// Time left until the next cycle is due
    pub fn remaining(&self, last_start: Option<Instant>, now: Instant) -> Duration {
        match last_start {
            None => Duration::ZERO,
            Some(start) => self
                .adjusted_interval()
                .saturating_sub(now.saturating_duration_since(start)),
        }
    }

    /// How long to sleep before checking again: at most one tick
    pub fn next_wait(&self, last_start: Option<Instant>, now: Instant, tick: Duration) -> Duration {
        self.remaining(last_start, now).min(tick)
    }
}
