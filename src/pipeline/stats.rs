use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

pub const FPS_WINDOW: Duration = Duration::from_secs(1);

/// Cycle-rate telemetry. Written only by the cycle loop.
#[derive(Clone, Debug)]
pub struct PipelineStats {
    window_cycles: u64,
    window_start: Instant,
    last_fps: Option<f64>,
    pub total_cycles: u64,
    pub total_frames: u64,
    pub total_detections: u64,
    pub total_alerts: u64,
}

impl PipelineStats {
    pub fn new(now: Instant) -> Self {
        Self {
            window_cycles: 0,
            window_start: now,
            last_fps: None,
            total_cycles: 0,
            total_frames: 0,
            total_detections: 0,
            total_alerts: 0,
        }
    }

    /// Start a fresh FPS window, keeping lifetime totals.
    pub fn reset_window(&mut self, now: Instant) {
        self.window_cycles = 0;
        self.window_start = now;
    }

    /// Account for one finished cycle.
    ///
    /// Returns the FPS estimate when the current window has lasted at least
    /// `FPS_WINDOW`; the window is then reset.
    pub fn record_cycle(
        &mut self,
        now: Instant,
        frames: usize,
        detections: usize,
        alerted: bool,
    ) -> Option<f64> {
        self.window_cycles += 1;
        self.total_cycles += 1;
        self.total_frames += frames as u64;
        self.total_detections += detections as u64;
        if alerted {
            self.total_alerts += 1;
        }

        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < FPS_WINDOW {
            return None;
        }
        let fps = self.window_cycles as f64 / elapsed.as_secs_f64();
        self.last_fps = Some(fps);
        self.reset_window(now);
        Some(fps)
    }

    pub fn last_fps(&self) -> Option<f64> {
        self.last_fps
    }
}

/// Fixed-period pacing. Overruns are not caught up.
#[derive(Clone, Copy, Debug)]
pub struct Throttle {
    period: Duration,
}

impl Throttle {
    pub fn new(target_fps: f64) -> Result<Self> {
        if !target_fps.is_finite() || target_fps <= 0.0 {
            return Err(anyhow!("target_fps must be a positive number (got {})", target_fps));
        }
        Ok(Self {
            period: Duration::from_secs_f64(1.0 / target_fps),
        })
    }

    /// Time left in the period after a cycle that took `elapsed`.
    pub fn remaining(&self, elapsed: Duration) -> Option<Duration> {
        self.period
            .checked_sub(elapsed)
            .filter(|left| !left.is_zero())
    }
}
