use std::time::{Duration, Instant};

/// Floor for the end-of-cycle sleep so a slow cycle still yields.
pub const MIN_SLEEP: Duration = Duration::from_millis(5);

/// Adaptive end-of-cycle delay targeting a fixed frame rate.
#[derive(Clone, Copy, Debug)]
pub struct FramePacer {
    period: Duration,
    min_sleep: Duration,
}

impl FramePacer {
    pub fn new(target_fps: u32) -> Self {
        Self {
            period: Duration::from_secs(1) / target_fps.max(1),
            min_sleep: MIN_SLEEP,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Sleep owed after a cycle that took `cost`.
    pub fn delay(&self, cost: Duration) -> Duration {
        self.period.saturating_sub(cost).max(self.min_sleep)
    }
}

/// Frames-per-second over rolling one-second windows.
#[derive(Clone, Debug)]
pub struct ThroughputMeter {
    window: Duration,
    window_start: Instant,
    frames: u32,
    fps: f64,
}

impl ThroughputMeter {
    pub fn new(now: Instant) -> Self {
        Self {
            window: Duration::from_secs(1),
            window_start: now,
            frames: 0,
            fps: 0.0,
        }
    }

    /// Count one processed frame. Returns the new rate when a window closes.
    pub fn tick(&mut self, now: Instant) -> Option<f64> {
        self.frames += 1;
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < self.window {
            return None;
        }
        self.fps = self.frames as f64 / elapsed.as_secs_f64();
        self.frames = 0;
        self.window_start = now;
        Some(self.fps)
    }

    /// Rate of the last closed window; 0 until one closes.
    pub fn fps(&self) -> f64 {
        self.fps
    }
}
