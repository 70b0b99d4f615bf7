//! Pipeline orchestration.
//!
//! The `Orchestrator` owns every camera session and drives the cycle loop:
//!
//! 1. Fan out one scoped worker per session. Active sessions read a frame,
//!    run the shared detector, filter and classify; idle sessions advance
//!    their reconnect counter.
//! 2. Collect detections in configuration order.
//! 3. Fire the alert sink once if anything is in a blind spot.
//! 4. Publish the cycle's detections as one batch.
//! 5. Update FPS telemetry.
//!
//! Per-camera failures stay inside their worker. Only startup can fail the
//! orchestrator.

mod shutdown;
mod stats;

use std::sync::PoisonError;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

use crate::alert::AlertSink;
use crate::camera::{CameraSession, CameraStatus};
use crate::detect::{Detection, DetectionFilter, SharedDetector};
use crate::frame::epoch_seconds;
use crate::publish::{PublishOutcome, Publisher, PublisherStats};
use crate::zone::ZoneClassifier;

pub use shutdown::ShutdownSignal;
pub use stats::{PipelineStats, Throttle, FPS_WINDOW};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PipelineSettings {
    pub target_fps: f64,
    /// Stop after this many cycles. None runs until shutdown.
    pub max_cycles: Option<u64>,
    pub status_log_interval: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            target_fps: 15.0,
            max_cycles: None,
            status_log_interval: Duration::from_secs(5),
        }
    }
}

/// What happened in one cycle.
#[derive(Clone, Debug, PartialEq)]
pub struct CycleReport {
    pub cycle: u64,
    /// Sessions that delivered a frame this cycle.
    pub frames: usize,
    pub detections: usize,
    pub blind_spot: usize,
    pub alert_fired: bool,
    pub publish: PublishOutcome,
    /// Set when this cycle closed an FPS window.
    pub fps: Option<f64>,
}

enum CameraOutcome {
    Idle,
    NoFrame,
    InferenceFailed,
    Processed(Vec<Detection>),
}

pub struct Orchestrator {
    sessions: Vec<CameraSession>,
    detector: SharedDetector,
    filter: DetectionFilter,
    classifier: ZoneClassifier,
    publisher: Publisher,
    alert: Box<dyn AlertSink>,
    settings: PipelineSettings,
    state: PipelineState,
    stats: PipelineStats,
    last_status_log: Instant,
}

impl Orchestrator {
    pub fn new(
        sessions: Vec<CameraSession>,
        detector: SharedDetector,
        filter: DetectionFilter,
        classifier: ZoneClassifier,
        publisher: Publisher,
        alert: Box<dyn AlertSink>,
        settings: PipelineSettings,
    ) -> Self {
        let now = Instant::now();
        Self {
            sessions,
            detector,
            filter,
            classifier,
            publisher,
            alert,
            settings,
            state: PipelineState::Idle,
            stats: PipelineStats::new(now),
            last_status_log: now,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    pub fn publisher_stats(&self) -> PublisherStats {
        self.publisher.stats()
    }

    pub fn camera_status(&self) -> Vec<CameraStatus> {
        self.sessions.iter().map(CameraSession::status).collect()
    }

    /// Open every camera and enter Running.
    ///
    /// Fails, staying Idle, when no camera could be opened.
    pub fn start(&mut self) -> Result<()> {
        if self.state != PipelineState::Idle {
            return Err(anyhow!("pipeline cannot start from {:?}", self.state));
        }
        if self.sessions.is_empty() {
            return Err(anyhow!("no cameras configured"));
        }

        // Open failures are logged by the session.
        for session in &mut self.sessions {
            let _ = session.open();
        }
        let active = self.sessions.iter().filter(|s| s.is_active()).count();
        if active == 0 {
            return Err(anyhow!(
                "no cameras connected (0 of {} opened)",
                self.sessions.len()
            ));
        }

        let now = Instant::now();
        self.stats.reset_window(now);
        self.last_status_log = now;
        self.state = PipelineState::Running;
        log::info!(
            "pipeline running: {}/{} cameras active, target {:.1} fps, sink {}, alert {}",
            active,
            self.sessions.len(),
            self.settings.target_fps,
            self.publisher.sink_name(),
            self.alert.name()
        );
        let statuses = self.camera_status();
        self.publisher.publish_status(&statuses, epoch_seconds());
        Ok(())
    }

    /// Start, then cycle until `shutdown` fires or `max_cycles` is reached.
    pub fn run(&mut self, shutdown: &ShutdownSignal) -> Result<()> {
        let throttle = Throttle::new(self.settings.target_fps)?;
        self.start()?;

        loop {
            if shutdown.is_triggered() {
                log::info!("shutdown requested");
                break;
            }
            if self
                .settings
                .max_cycles
                .is_some_and(|max| self.stats.total_cycles >= max)
            {
                log::info!("reached {} cycles", self.stats.total_cycles);
                break;
            }

            let started = Instant::now();
            self.run_cycle()?;
            self.maybe_log_status();
            if let Some(left) = throttle.remaining(started.elapsed()) {
                std::thread::sleep(left);
            }
        }

        self.stop();
        Ok(())
    }

    /// Run one cycle. Errors only when the pipeline is not Running.
    pub fn run_cycle(&mut self) -> Result<CycleReport> {
        if self.state != PipelineState::Running {
            return Err(anyhow!("pipeline is not running ({:?})", self.state));
        }

        let detector = &self.detector;
        let filter = &self.filter;
        let classifier = &self.classifier;
        let outcomes: Vec<CameraOutcome> = std::thread::scope(|scope| {
            let workers: Vec<_> = self
                .sessions
                .iter_mut()
                .map(|session| {
                    scope.spawn(move || process_camera(session, detector, filter, classifier))
                })
                .collect();
            workers
                .into_iter()
                .map(|worker| {
                    worker.join().unwrap_or_else(|_| {
                        log::error!("camera worker panicked");
                        CameraOutcome::InferenceFailed
                    })
                })
                .collect()
        });

        let mut frames = 0;
        let mut detections = Vec::new();
        for outcome in outcomes {
            match outcome {
                CameraOutcome::Processed(found) => {
                    frames += 1;
                    detections.extend(found);
                }
                CameraOutcome::InferenceFailed => frames += 1,
                CameraOutcome::Idle | CameraOutcome::NoFrame => {}
            }
        }

        let blind_spot = detections.iter().filter(|d| d.in_blind_spot).count();
        let alert_fired = blind_spot > 0;
        if alert_fired {
            log::warn!("{} object(s) in blind spot", blind_spot);
            if let Err(err) = self.alert.fire() {
                log::error!("alert {} failed: {:#}", self.alert.name(), err);
            }
        }

        let publish = self.publisher.publish(&detections, epoch_seconds());

        let fps = self
            .stats
            .record_cycle(Instant::now(), frames, detections.len(), alert_fired);
        if let Some(fps) = fps {
            let active = self.sessions.iter().filter(|s| s.is_active()).count();
            log::info!("FPS: {:.1} ({} cameras active)", fps, active);
        }

        Ok(CycleReport {
            cycle: self.stats.total_cycles,
            frames,
            detections: detections.len(),
            blind_spot,
            alert_fired,
            publish,
            fps,
        })
    }

    fn maybe_log_status(&mut self) {
        if self.last_status_log.elapsed() < self.settings.status_log_interval {
            return;
        }
        self.last_status_log = Instant::now();
        for status in self.camera_status() {
            log::info!(
                "camera {} [{}]: {} frames, {} consecutive failures",
                status.zone,
                status.state,
                status.frames_read,
                status.consecutive_failures
            );
        }
        let publisher = self.publisher.stats();
        log::info!(
            "totals: {} cycles, {} detections, {} alerts, {} batches published, {} dropped",
            self.stats.total_cycles,
            self.stats.total_detections,
            self.stats.total_alerts,
            publisher.batches_delivered,
            publisher.batches_dropped
        );
    }

    /// Release cameras and close the publisher. Idempotent.
    pub fn stop(&mut self) {
        match self.state {
            PipelineState::Stopped | PipelineState::Stopping => return,
            PipelineState::Idle => {}
            PipelineState::Running => {
                self.state = PipelineState::Stopping;
                log::info!("pipeline stopping after {} cycles", self.stats.total_cycles);
            }
        }
        let was_running = self.state == PipelineState::Stopping;

        for session in &mut self.sessions {
            session.stop();
        }
        if was_running {
            let statuses = self.camera_status();
            self.publisher.publish_status(&statuses, epoch_seconds());
        }
        if let Err(err) = self.publisher.close() {
            log::warn!("failed to close {} sink: {:#}", self.publisher.sink_name(), err);
        }
        self.state = PipelineState::Stopped;
        log::info!("pipeline stopped");
    }
}

fn process_camera(
    session: &mut CameraSession,
    detector: &SharedDetector,
    filter: &DetectionFilter,
    classifier: &ZoneClassifier,
) -> CameraOutcome {
    if !session.is_active() {
        // A reconnecting session does not read until the next cycle.
        session.tick_idle();
        return CameraOutcome::Idle;
    }
    let Some(frame) = session.read_frame() else {
        return CameraOutcome::NoFrame;
    };

    let candidates = {
        let mut backend = detector.lock().unwrap_or_else(PoisonError::into_inner);
        backend.detect(&frame)
    };
    let candidates = match candidates {
        Ok(candidates) => candidates,
        Err(err) => {
            log::warn!("inference failed on camera {}: {:#}", session.zone(), err);
            return CameraOutcome::InferenceFailed;
        }
    };

    let zone = session.zone();
    let detections = filter
        .apply(&candidates, frame.width, frame.height)
        .iter()
        .filter_map(|candidate| {
            classifier
                .classify(candidate, frame.width, frame.height, zone, frame.captured_at)
                .map_err(|err| log::warn!("classification failed on camera {}: {:#}", zone, err))
                .ok()
        })
        .collect();
    CameraOutcome::Processed(detections)
}
