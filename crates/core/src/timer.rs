//! Frame timing.

use std::time::{Duration, Instant};

/// Measures time since creation and since the last tick.
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    last_tick: Instant,
}

impl Timer {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_tick: now,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Time since the previous `tick()`, or since creation for the first one.
    pub fn tick(&mut self) -> Duration {
        let now = Instant::now();
        let delta = now - self.last_tick;
        self.last_tick = now;
        delta
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

/// Frame-rate report produced once per reporting window.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameStats {
    pub frames: u32,
    pub fps: f64,
    pub avg_frame_ms: f64,
}

/// Counts frames and reports the rate once per `window`.
#[derive(Debug)]
pub struct FpsCounter {
    window: Duration,
    window_start: Instant,
    frames: u32,
}

impl FpsCounter {
    pub fn new(window: Duration) -> Self {
        Self::starting_at(window, Instant::now())
    }

    pub fn starting_at(window: Duration, start: Instant) -> Self {
        Self {
            window,
            window_start: start,
            frames: 0,
        }
    }

    /// Counts one frame finished at `now`. Returns the stats when the
    /// current window has elapsed, and starts a new one.
    pub fn frame_at(&mut self, now: Instant) -> Option<FrameStats> {
        self.frames += 1;

        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < self.window {
            return None;
        }

        let secs = elapsed.as_secs_f64();
        let stats = FrameStats {
            frames: self.frames,
            fps: f64::from(self.frames) / secs,
            avg_frame_ms: secs * 1000.0 / f64::from(self.frames),
        };

        self.frames = 0;
        self.window_start = now;
        Some(stats)
    }

    pub fn frame(&mut self) -> Option<FrameStats> {
        self.frame_at(Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_tick_is_monotonic() {
        let mut timer = Timer::new();
        let first = timer.tick();
        let second = timer.tick();
        assert!(timer.elapsed() >= first + second);
    }

    #[test]
    fn test_fps_counter_reports_once_per_window() {
        let start = Instant::now();
        let mut counter = FpsCounter::starting_at(Duration::from_secs(1), start);

        for i in 1..60 {
            assert_eq!(counter.frame_at(start + Duration::from_millis(i * 16)), None);
        }

        let stats = counter.frame_at(start + Duration::from_secs(1)).unwrap();
        assert_eq!(stats.frames, 60);
        assert!((stats.fps - 60.0).abs() < 1e-9);
        assert!((stats.avg_frame_ms - 1000.0 / 60.0).abs() < 1e-9);

        // A new window starts after the report.
        assert_eq!(
            counter.frame_at(start + Duration::from_millis(1500)),
            None
        );
    }
}
