//! Sleep/wake detection from clock drift.
//!
//! The monotonic clock stops while the machine sleeps; the wall clock does
//! not. When wall time advances noticeably more than monotonic time between
//! two ticks, the machine was asleep in between.

use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct WakeDetector {
    tolerance: Duration,
    last_wall: DateTime<Utc>,
    last_mono: Instant,
}

impl WakeDetector {
    pub fn new(tolerance: Duration, wall: DateTime<Utc>, mono: Instant) -> Self {
        Self {
            tolerance,
            last_wall: wall,
            last_mono: mono,
        }
    }

    /// Records a tick; returns true when a sleep happened since the last one.
    pub fn observe(&mut self, wall: DateTime<Utc>, mono: Instant) -> bool {
        let wall_elapsed = (wall - self.last_wall).to_std().unwrap_or_default();
        let mono_elapsed = mono.saturating_duration_since(self.last_mono);
        self.last_wall = wall;
        self.last_mono = mono;
        wall_elapsed.saturating_sub(mono_elapsed) > self.tolerance
    }
}
