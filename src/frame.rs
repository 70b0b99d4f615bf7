//! Captured frames.
//!
//! A `Frame` is an RGB24 pixel buffer with its dimensions and capture time.
//! Frames are created by a `FrameSource`, handed to one detector call and
//! dropped at the end of the cycle. Nothing in the pipeline retains them.

use std::time::{SystemTime, UNIX_EPOCH};

/// Decoded RGB24 frame.
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Capture time in seconds since the Unix epoch.
    pub captured_at: f64,
}

impl Frame {
    /// Wrap an RGB24 buffer captured now.
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self::with_timestamp(data, width, height, epoch_seconds())
    }

    pub fn with_timestamp(data: Vec<u8>, width: u32, height: u32, captured_at: f64) -> Self {
        Self {
            data,
            width,
            height,
            captured_at,
        }
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    /// True when the frame carries no usable pixels.
    ///
    /// Sources that hand back a zero-sized or truncated buffer produce an empty
    /// frame; sessions treat it as a failed read.
    pub fn is_empty(&self) -> bool {
        let expected = (self.width as usize)
            .saturating_mul(self.height as usize)
            .saturating_mul(3);
        expected == 0 || self.data.len() < expected
    }

    /// Read one pixel. Callers must stay inside `width x height`.
    pub fn rgb_at(&self, x: u32, y: u32) -> [u8; 3] {
        let idx = (y as usize * self.width as usize + x as usize) * 3;
        [self.data[idx], self.data[idx + 1], self.data[idx + 2]]
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Pixel data stays out of logs.
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("captured_at", &self.captured_at)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Current wall-clock time as fractional epoch seconds.
pub fn epoch_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
