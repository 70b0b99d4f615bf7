//! Frame sources.
//!
//! This module provides the camera capture side of the pipeline:
//! - Synthetic `stub://` devices (testing, demos)
//! - USB/V4L2 devices (feature: ingest-v4l2)
//!
//! A source is owned by exactly one `CameraSession`, which drives its
//! open/read/release lifecycle. Sources never retry on their own; retry and
//! reconnect policy live in the session.

#[cfg(feature = "ingest-v4l2")]
mod normalize;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use anyhow::Result;

use crate::frame::Frame;

pub use synthetic::SyntheticSource;
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Source;

/// Capture hints passed to `FrameSource::open`. Devices may not honour them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaptureHints {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for CaptureHints {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 15,
        }
    }
}

/// Camera capture device.
pub trait FrameSource: Send {
    /// Acquire the device. Calling `open` on an already open source reopens it.
    fn open(&mut self, device_id: &str, hints: &CaptureHints) -> Result<()>;

    /// Read the next frame. Fails when the device is closed or the read fails.
    fn read(&mut self) -> Result<Frame>;

    /// Release the device handle. Idempotent.
    fn release(&mut self);

    fn is_open(&self) -> bool;
}

/// Pick a source implementation for a configured device id.
///
/// `stub://...` maps to the synthetic source. Anything else is treated as a
/// V4L2 device path (or bare index, e.g. `"0"` for `/dev/video0`).
pub fn source_for_device(device_id: &str) -> Result<Box<dyn FrameSource>> {
    if device_id.starts_with("stub://") {
        return Ok(Box::new(SyntheticSource::new()));
    }

    #[cfg(feature = "ingest-v4l2")]
    {
        Ok(Box::new(V4l2Source::new()))
    }
    #[cfg(not(feature = "ingest-v4l2"))]
    {
        anyhow::bail!(
            "camera device '{}' requires the ingest-v4l2 feature",
            device_id
        )
    }
}
