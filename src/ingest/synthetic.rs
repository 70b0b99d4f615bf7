//! Synthetic frame source for `stub://` devices.
//!
//! Generates a dark, slightly textured background with one bright block
//! ("vehicle") sweeping horizontally across the frame. The block is large
//! enough to clear the detection filter's minimum-area guard.
//!
//! Query options on the device id:
//! - `fail_rate=<0..1>`: probability that a read fails
//! - `offline=1`: `open` always fails

use anyhow::{anyhow, Result};
use rand::Rng;

use super::{CaptureHints, FrameSource};
use crate::frame::Frame;

const BACKGROUND: u8 = 48;
const BLOCK: u8 = 235;
const BLOCK_W_DIV: u32 = 4;
const BLOCK_H_DIV: u32 = 3;
const SWEEP_STEP_PX: u32 = 8;

#[derive(Clone, Debug, Default, PartialEq)]
struct SyntheticOptions {
    fail_rate: f64,
    offline: bool,
}

fn parse_options(device_id: &str) -> Result<SyntheticOptions> {
    let mut options = SyntheticOptions::default();
    let Some((_, query)) = device_id.split_once('?') else {
        return Ok(options);
    };
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, "1"));
        match key {
            "fail_rate" => {
                let rate: f64 = value
                    .parse()
                    .map_err(|_| anyhow!("invalid fail_rate '{}' in {}", value, device_id))?;
                if !(0.0..=1.0).contains(&rate) {
                    return Err(anyhow!("fail_rate must be within [0, 1] in {}", device_id));
                }
                options.fail_rate = rate;
            }
            "offline" => options.offline = value != "0",
            other => return Err(anyhow!("unknown stub option '{}' in {}", other, device_id)),
        }
    }
    Ok(options)
}

/// Synthetic camera.
#[derive(Default)]
pub struct SyntheticSource {
    device_id: Option<String>,
    hints: CaptureHints,
    options: SyntheticOptions,
    frame_count: u64,
}

impl SyntheticSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames_generated(&self) -> u64 {
        self.frame_count
    }

    fn render(&self) -> Vec<u8> {
        let (w, h) = (self.hints.width, self.hints.height);
        let mut pixels = vec![BACKGROUND; (w * h * 3) as usize];

        // Low-amplitude texture so consecutive frames are not byte-identical.
        for (i, px) in pixels.iter_mut().enumerate().step_by(7) {
            *px = BACKGROUND + ((i as u64 + self.frame_count) % 16) as u8;
        }

        let block_w = (w / BLOCK_W_DIV).max(1);
        let block_h = (h / BLOCK_H_DIV).max(1);
        let travel = (w + block_w) as u64;
        let offset = (self.frame_count * SWEEP_STEP_PX as u64 % travel) as i64 - block_w as i64;
        let x0 = offset.max(0) as u32;
        let x1 = ((offset + block_w as i64).max(0) as u32).min(w);
        let y0 = (h - block_h) / 2;

        for y in y0..y0 + block_h {
            for x in x0..x1 {
                let idx = ((y * w + x) * 3) as usize;
                pixels[idx..idx + 3].fill(BLOCK);
            }
        }
        pixels
    }
}

impl FrameSource for SyntheticSource {
    fn open(&mut self, device_id: &str, hints: &CaptureHints) -> Result<()> {
        let options = parse_options(device_id)?;
        if options.offline {
            self.device_id = None;
            return Err(anyhow!("synthetic device {} is offline", device_id));
        }
        if hints.width == 0 || hints.height == 0 {
            return Err(anyhow!(
                "synthetic device {} cannot produce {}x{} frames",
                device_id,
                hints.width,
                hints.height
            ));
        }
        self.options = options;
        self.hints = *hints;
        self.device_id = Some(device_id.to_string());
        log::info!(
            "SyntheticSource: opened {} ({}x{} @ {} fps)",
            device_id,
            hints.width,
            hints.height,
            hints.fps
        );
        Ok(())
    }

    fn read(&mut self) -> Result<Frame> {
        let device = self
            .device_id
            .as_deref()
            .ok_or_else(|| anyhow!("synthetic device not open"))?;
        if self.options.fail_rate > 0.0 && rand::thread_rng().gen_bool(self.options.fail_rate) {
            return Err(anyhow!("synthetic read failure on {}", device));
        }
        self.frame_count += 1;
        Ok(Frame::new(self.render(), self.hints.width, self.hints.height))
    }

    fn release(&mut self) {
        if let Some(device) = self.device_id.take() {
            log::debug!("SyntheticSource: released {}", device);
        }
    }

    fn is_open(&self) -> bool {
        self.device_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hints() -> CaptureHints {
        CaptureHints {
            width: 160,
            height: 120,
            fps: 15,
        }
    }

    #[test]
    fn options_are_parsed() {
        assert_eq!(parse_options("stub://left").unwrap(), SyntheticOptions::default());
        let opts = parse_options("stub://left?fail_rate=0.25&offline=0").unwrap();
        assert_eq!(opts.fail_rate, 0.25);
        assert!(!opts.offline);
        assert!(parse_options("stub://left?offline").unwrap().offline);
        assert!(parse_options("stub://left?fail_rate=2").is_err());
        assert!(parse_options("stub://left?color=red").is_err());
    }

    #[test]
    fn offline_device_fails_to_open() {
        let mut source = SyntheticSource::new();
        assert!(source.open("stub://rear?offline=1", &hints()).is_err());
        assert!(!source.is_open());
        assert!(source.read().is_err());
    }

    #[test]
    fn frames_match_hints_and_contain_block() -> Result<()> {
        let mut source = SyntheticSource::new();
        source.open("stub://left", &hints())?;
        // Advance until the block is fully on screen.
        let mut frame = source.read()?;
        for _ in 0..10 {
            frame = source.read()?;
        }
        assert_eq!(frame.width, 160);
        assert_eq!(frame.height, 120);
        assert!(!frame.is_empty());
        assert!(frame.pixels().iter().any(|&p| p == BLOCK));
        Ok(())
    }

    #[test]
    fn always_failing_device_errors_on_read() -> Result<()> {
        let mut source = SyntheticSource::new();
        source.open("stub://right?fail_rate=1", &hints())?;
        assert!(source.read().is_err());
        assert_eq!(source.frames_generated(), 0);
        Ok(())
    }
}
