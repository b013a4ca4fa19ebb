//! High-resolution timer for frame timing.

use std::time::{Duration, Instant};

/// High-resolution timer for measuring elapsed time.
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    last_tick: Instant,
}

impl Timer {
    /// Create a new timer, starting from now.
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_tick: now,
        }
    }

    /// Get the total elapsed time since the timer was created.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Get the elapsed time in seconds since the timer was created.
    pub fn elapsed_secs(&self) -> f32 {
        self.elapsed().as_secs_f32()
    }

    /// Get the time elapsed since the last call to `tick()`.
    pub fn tick(&mut self) -> Duration {
        let now = Instant::now();
        let delta = now - self.last_tick;
        self.last_tick = now;
        delta
    }

    /// Get the delta time in seconds since the last tick.
    pub fn delta_secs(&mut self) -> f32 {
        self.tick().as_secs_f32()
    }

    /// Reset the timer to the current time.
    pub fn reset(&mut self) {
        let now = Instant::now();
        self.start = now;
        self.last_tick = now;
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

/// Counts presented frames and reports a rate once per window.
#[derive(Debug)]
pub struct FpsCounter {
    window: Duration,
    accumulated: Duration,
    frames: u32,
}

impl FpsCounter {
    /// Create a counter that reports once every `window`.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            accumulated: Duration::ZERO,
            frames: 0,
        }
    }

    /// Record one frame that took `delta`.
    ///
    /// Returns the average frames per second when a full window has
    /// elapsed, and starts a new window.
    pub fn frame(&mut self, delta: Duration) -> Option<f32> {
        self.frames += 1;
        self.accumulated += delta;
        if self.accumulated < self.window {
            return None;
        }
        let fps = self.frames as f32 / self.accumulated.as_secs_f32();
        self.frames = 0;
        self.accumulated = Duration::ZERO;
        Some(fps)
    }
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_is_monotonic() {
        let mut timer = Timer::new();
        let first = timer.tick();
        let second = timer.tick();
        assert!(timer.elapsed() >= first + second);
    }

    #[test]
    fn test_fps_counter_reports_after_window() {
        let mut counter = FpsCounter::new(Duration::from_millis(100));
        for _ in 0..9 {
            assert!(counter.frame(Duration::from_millis(10)).is_none());
        }
        let fps = counter.frame(Duration::from_millis(10)).unwrap();
        assert!((fps - 100.0).abs() < 0.01);
        // A new window starts empty.
        assert!(counter.frame(Duration::from_millis(10)).is_none());
    }
}
