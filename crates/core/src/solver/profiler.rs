//! Performance profiling helpers for tracking tick and stage timing.
//!
//! Provides RAII-style profiling scopes and a frame timer.

use std::time::Instant;
use tracing::trace;

/// A profiling scope that measures elapsed time using RAII.
///
/// The duration is logged at `trace` level when the scope is dropped.
pub struct ProfilerScope {
    start: Instant,
    name: &'static str,
}

impl ProfilerScope {
    /// Creates a new profiling scope.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            name,
        }
    }

    /// Gets elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl Drop for ProfilerScope {
    fn drop(&mut self) {
        trace!(stage = self.name, elapsed_ms = self.elapsed_ms(), "stage finished");
    }
}

/// Tick timer: last duration plus a running average.
#[derive(Debug, Default)]
pub struct FrameTimer {
    last_frame_time_ms: f64,
    total_ms: f64,
    frames: u64,
}

impl FrameTimer {
    /// Creates a new frame timer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records frame time in milliseconds.
    pub fn record(&mut self, time_ms: f64) {
        self.last_frame_time_ms = time_ms;
        self.total_ms += time_ms;
        self.frames += 1;
    }

    /// Records the time elapsed since `start`.
    pub fn record_since(&mut self, start: Instant) {
        self.record(start.elapsed().as_secs_f64() * 1000.0);
    }

    /// Gets the last recorded frame time.
    #[must_use]
    pub fn last_frame_time_ms(&self) -> f64 {
        self.last_frame_time_ms
    }

    /// Mean of every recorded frame, 0 before the first one.
    #[must_use]
    pub fn average_frame_time_ms(&self) -> f64 {
        if self.frames == 0 {
            0.0
        } else {
            #[expect(clippy::cast_precision_loss)]
            let frames = self.frames as f64;
            self.total_ms / frames
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_profiler_scope_measures_time() {
        let scope = ProfilerScope::new("test");
        thread::sleep(Duration::from_millis(10));
        let elapsed = scope.elapsed_ms();
        assert!(elapsed >= 10.0, "Expected at least 10ms, got {elapsed}");
        assert_eq!(scope.name(), "test");
    }

    #[test]
    fn test_frame_timer() {
        let mut timer = FrameTimer::new();
        assert_eq!(timer.last_frame_time_ms(), 0.0);
        assert_eq!(timer.average_frame_time_ms(), 0.0);

        timer.record(16.0);
        assert_eq!(timer.last_frame_time_ms(), 16.0);

        timer.record(8.0);
        assert_eq!(timer.last_frame_time_ms(), 8.0);
        assert_eq!(timer.average_frame_time_ms(), 12.0);
    }
}
