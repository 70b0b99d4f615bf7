//! V4L2 frame source.
//!
//! This module provides `V4l2Source` for capturing from local USB cameras
//! (e.g., /dev/video0). Device ids may be a path or a bare index.
//!
//! The source requests RGB24 and falls back to YUYV, converting to RGB24 in
//! memory. MJPEG-only devices are rejected at open time.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;

use super::normalize::{normalize_to_rgb, PixelFormat};
use super::{CaptureHints, FrameSource};
use crate::frame::Frame;

const MMAP_BUFFERS: u32 = 4;

#[self_referencing]
struct V4l2Stream {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

/// V4L2 camera.
#[derive(Default)]
pub struct V4l2Source {
    path: Option<String>,
    state: Option<V4l2Stream>,
    width: u32,
    height: u32,
    format: Option<PixelFormat>,
}

/// `"2"` -> `/dev/video2`; paths pass through.
pub fn device_path(device_id: &str) -> String {
    if device_id.chars().all(|c| c.is_ascii_digit()) && !device_id.is_empty() {
        format!("/dev/video{}", device_id)
    } else {
        device_id.to_string()
    }
}

impl V4l2Source {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FrameSource for V4l2Source {
    fn open(&mut self, device_id: &str, hints: &CaptureHints) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        self.release();
        let path = device_path(device_id);

        let mut device =
            v4l::Device::with_path(&path).with_context(|| format!("open v4l2 device {}", path))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = hints.width;
        format.height = hints.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!("V4l2Source: failed to set RGB3 on {}: {}", path, err);
                format.fourcc = v4l::FourCC::new(b"YUYV");
                device
                    .set_format(&format)
                    .with_context(|| format!("set v4l2 format on {}", path))?
            }
        };
        let pixel_format = PixelFormat::from_fourcc(&format.fourcc.repr).ok_or_else(|| {
            anyhow!(
                "v4l2 device {} negotiated unsupported format {}",
                path,
                format.fourcc
            )
        })?;

        if hints.fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(hints.fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!("V4l2Source: failed to set fps on {}: {}", path, err);
            }
        }

        let state = V4l2StreamTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, MMAP_BUFFERS)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;

        self.width = format.width;
        self.height = format.height;
        self.format = Some(pixel_format);
        self.state = Some(state);
        log::info!(
            "V4l2Source: opened {} ({}x{} {:?})",
            path,
            self.width,
            self.height,
            pixel_format
        );
        self.path = Some(path);
        Ok(())
    }

    fn read(&mut self) -> Result<Frame> {
        use v4l::io::traits::CaptureStream;

        let format = self.format.context("v4l2 device not open")?;
        let state = self.state.as_mut().context("v4l2 device not open")?;
        let (width, height) = (self.width, self.height);
        let pixels = state.with_mut(|fields| -> Result<Vec<u8>> {
            let (buf, _meta) = fields.stream.next().context("capture v4l2 frame")?;
            normalize_to_rgb(buf, width, height, format)
        })?;
        Ok(Frame::new(pixels, width, height))
    }

    fn release(&mut self) {
        self.state = None;
        self.format = None;
        if let Some(path) = self.path.take() {
            log::info!("V4l2Source: released {}", path);
        }
    }

    fn is_open(&self) -> bool {
        self.state.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_ids_map_to_device_nodes() {
        assert_eq!(device_path("0"), "/dev/video0");
        assert_eq!(device_path("/dev/video3"), "/dev/video3");
        assert_eq!(device_path(""), "");
    }

    #[test]
    fn closed_source_cannot_read() {
        let mut source = V4l2Source::new();
        assert!(!source.is_open());
        assert!(source.read().is_err());
        source.release();
    }
}
