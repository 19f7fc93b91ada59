//! Frame timer producing the `dt` fed to the per-frame update.

use std::time::{Duration, Instant};

/// Upper bound on a single frame delta. Longer stalls (debugger breaks,
/// window drags) are clamped so the camera does not jump.
pub const MAX_FRAME_DELTA: Duration = Duration::from_millis(250);

/// Measures total run time and per-frame deltas.
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    last_tick: Instant,
    frame_count: u64,
}

impl Timer {
    /// Create a new timer, starting from now.
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_tick: now,
            frame_count: 0,
        }
    }

    /// Total elapsed time since the timer was created or reset.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Time since the previous call, clamped to [`MAX_FRAME_DELTA`].
    pub fn tick(&mut self) -> Duration {
        let now = Instant::now();
        let delta = now - self.last_tick;
        self.last_tick = now;
        self.frame_count += 1;
        delta.min(MAX_FRAME_DELTA)
    }

    /// Delta time in seconds since the last tick.
    pub fn delta_secs(&mut self) -> f32 {
        self.tick().as_secs_f32()
    }

    /// Number of ticks since creation or the last reset.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Average frames per second over the timer's lifetime.
    pub fn average_fps(&self) -> f32 {
        let secs = self.elapsed().as_secs_f32();
        if secs <= f32::EPSILON {
            0.0
        } else {
            self.frame_count as f32 / secs
        }
    }

    /// Reset the timer to the current time.
    pub fn reset(&mut self) {
        let now = Instant::now();
        self.start = now;
        self.last_tick = now;
        self.frame_count = 0;
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_counts_frames() {
        let mut timer = Timer::new();
        timer.tick();
        timer.tick();
        assert_eq!(timer.frame_count(), 2);
        timer.reset();
        assert_eq!(timer.frame_count(), 0);
    }

    #[test]
    fn tick_is_clamped() {
        let mut timer = Timer::new();
        if let Some(past) = Instant::now().checked_sub(Duration::from_secs(5)) {
            timer.last_tick = past;
            assert_eq!(timer.tick(), MAX_FRAME_DELTA);
        }
    }
}
