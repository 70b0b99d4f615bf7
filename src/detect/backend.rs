use anyhow::Result;

use crate::detect::result::RawCandidate;
use crate::frame::Frame;

/// Object detector backend.
///
/// Backends turn one frame into raw candidates in frame pixel coordinates.
/// They do no filtering beyond what the model itself does; confidence gating,
/// class allow-listing and suppression happen in `DetectionFilter`.
///
/// An `Err` is an inference failure for that frame only. The orchestrator logs
/// it and skips the camera for the cycle.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<RawCandidate>>;

    /// Optional warm-up hook, run once before the first cycle.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
