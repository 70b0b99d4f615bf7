use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

use blindspot_kernel::{
    AlertSink, BBox, CameraIdentity, CameraSession, CaptureHints, DetectionFilter,
    DetectionSink, DetectorBackend, FilterSettings, Frame, FrameSource, MessageKind, NormRect,
    Orchestrator, PipelineSettings, PipelineState, PublishOutcome, Publisher, PublisherSettings,
    RawCandidate, SessionPolicy, SessionState, SharedDetector, ShutdownSignal, ZoneClassifier,
    ZoneRectangle,
};

const FRAME_SIZE: u32 = 400;

#[derive(Clone, Default)]
struct SourceControl {
    fail_open: Arc<AtomicBool>,
    fail_reads: Arc<AtomicBool>,
    read_delay_ms: Arc<AtomicU64>,
    opens: Arc<AtomicUsize>,
}

struct FakeSource {
    control: SourceControl,
    open: bool,
}

impl FrameSource for FakeSource {
    fn open(&mut self, _device_id: &str, _hints: &CaptureHints) -> Result<()> {
        self.control.opens.fetch_add(1, Ordering::SeqCst);
        if self.control.fail_open.load(Ordering::SeqCst) {
            return Err(anyhow!("no such device"));
        }
        self.open = true;
        Ok(())
    }

    fn read(&mut self) -> Result<Frame> {
        if !self.open {
            return Err(anyhow!("not open"));
        }
        if self.control.fail_reads.load(Ordering::SeqCst) {
            return Err(anyhow!("read timeout"));
        }
        let delay = self.control.read_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay));
        }
        let len = (FRAME_SIZE * FRAME_SIZE * 3) as usize;
        Ok(Frame::new(vec![0; len], FRAME_SIZE, FRAME_SIZE))
    }

    fn release(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

/// Returns the same candidates for every frame.
struct FakeDetector {
    candidates: Vec<RawCandidate>,
    fail: Arc<AtomicBool>,
}

impl DetectorBackend for FakeDetector {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<RawCandidate>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("inference crashed"));
        }
        Ok(self.candidates.clone())
    }
}

#[derive(Clone, Default)]
struct RecordingSink {
    messages: Arc<Mutex<Vec<(MessageKind, serde_json::Value)>>>,
    fail: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
}

impl RecordingSink {
    fn batches(&self) -> Vec<serde_json::Value> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|(kind, _)| *kind == MessageKind::Detections)
            .map(|(_, value)| value.clone())
            .collect()
    }

    fn status_count(&self) -> usize {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|(kind, _)| *kind == MessageKind::Status)
            .count()
    }
}

impl DetectionSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    fn send(&mut self, kind: MessageKind, payload: &[u8]) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("broker down"));
        }
        let value = serde_json::from_slice(payload)?;
        self.messages.lock().unwrap().push((kind, value));
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Clone, Default)]
struct CountingAlert {
    fired: Arc<AtomicUsize>,
}

impl AlertSink for CountingAlert {
    fn name(&self) -> &str {
        "counting"
    }

    fn fire(&mut self) -> Result<()> {
        self.fired.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Car centered at normalized (0.15, 0.5), inside the left-style rectangle.
fn car_in_blind_spot() -> RawCandidate {
    RawCandidate::new(BBox::new(0.0, 140.0, 120.0, 260.0), 0.9, 2)
}

struct Harness {
    sources: Vec<SourceControl>,
    fail_detector: Arc<AtomicBool>,
    sink: RecordingSink,
    alert: CountingAlert,
}

fn build(
    zones: &[&str],
    candidates: Vec<RawCandidate>,
    reconnect_interval_cycles: u64,
    settings: PipelineSettings,
) -> (Orchestrator, Harness) {
    let policy = SessionPolicy {
        retry_delay: Duration::ZERO,
        reconnect_interval_cycles,
        ..SessionPolicy::default()
    };
    let mut sessions = Vec::new();
    let mut sources = Vec::new();
    for zone in zones {
        let control = SourceControl::default();
        sessions.push(CameraSession::new(
            CameraIdentity {
                zone: zone.to_string(),
                device_id: format!("fake://{zone}"),
                name: format!("{zone} camera"),
                description: String::new(),
            },
            Box::new(FakeSource {
                control: control.clone(),
                open: false,
            }),
            CaptureHints::default(),
            policy,
        ));
        sources.push(control);
    }

    let fail_detector = Arc::new(AtomicBool::new(false));
    let detector: SharedDetector = Arc::new(Mutex::new(FakeDetector {
        candidates,
        fail: Arc::clone(&fail_detector),
    }));

    let classifier = ZoneClassifier::new(
        zones.iter().map(|zone| ZoneRectangle {
            zone: zone.to_string(),
            rect: NormRect::new(0.0, 0.3, 0.2, 0.8),
            z_offset: 4.0,
        }),
        BTreeMap::from([(2, "car".to_string())]),
        1.5,
        1.0,
        0.0,
    );

    let sink = RecordingSink::default();
    let alert = CountingAlert::default();
    let orchestrator = Orchestrator::new(
        sessions,
        detector,
        DetectionFilter::new(FilterSettings::default()),
        classifier,
        Publisher::new(Box::new(sink.clone()), PublisherSettings::default()),
        Box::new(alert.clone()),
        settings,
    );
    (
        orchestrator,
        Harness {
            sources,
            fail_detector,
            sink,
            alert,
        },
    )
}

#[test]
fn alert_fires_once_for_multiple_blind_spot_detections() {
    let (mut orch, h) = build(
        &["left", "right"],
        vec![car_in_blind_spot()],
        100,
        PipelineSettings::default(),
    );
    orch.start().unwrap();
    assert_eq!(orch.state(), PipelineState::Running);
    assert_eq!(h.sink.status_count(), 1);

    let report = orch.run_cycle().unwrap();
    assert_eq!(report.frames, 2);
    assert_eq!(report.detections, 2);
    assert_eq!(report.blind_spot, 2);
    assert!(report.alert_fired);
    assert_eq!(h.alert.fired.load(Ordering::SeqCst), 1);

    let batches = h.sink.batches();
    assert_eq!(batches.len(), 1);
    let detections = batches[0]["detections"].as_array().unwrap();
    assert_eq!(detections.len(), 2);
    // Configuration order.
    assert_eq!(detections[0]["camera_zone"], "left");
    assert_eq!(detections[1]["camera_zone"], "right");
    assert_eq!(detections[0]["object"], "car");

    orch.run_cycle().unwrap();
    assert_eq!(h.alert.fired.load(Ordering::SeqCst), 2);
    assert_eq!(h.sink.batches().len(), 2);
}

#[test]
fn failing_camera_degrades_and_is_excluded_next_cycle() {
    let (mut orch, h) = build(
        &["left", "rear"],
        vec![car_in_blind_spot()],
        100,
        PipelineSettings::default(),
    );
    orch.start().unwrap();
    h.sources[1].fail_reads.store(true, Ordering::SeqCst);

    let report = orch.run_cycle().unwrap();
    assert_eq!(report.frames, 1);
    assert_eq!(report.detections, 1);
    let status = orch.camera_status();
    assert_eq!(status[0].state, SessionState::Active);
    assert_eq!(status[1].state, SessionState::Degraded);
    assert_eq!(status[1].consecutive_failures, 3);

    // The degraded camera is skipped; the healthy one keeps producing.
    let report = orch.run_cycle().unwrap();
    assert_eq!(report.frames, 1);
    let batch = h.sink.batches().pop().unwrap();
    let zones: Vec<_> = batch["detections"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["camera_zone"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(zones, vec!["left"]);
}

#[test]
fn degraded_camera_reconnects_after_idle_interval() {
    let (mut orch, h) = build(
        &["left", "rear"],
        vec![car_in_blind_spot()],
        3,
        PipelineSettings::default(),
    );
    orch.start().unwrap();
    h.sources[1].fail_reads.store(true, Ordering::SeqCst);
    orch.run_cycle().unwrap();
    assert_eq!(orch.camera_status()[1].state, SessionState::Degraded);
    h.sources[1].fail_reads.store(false, Ordering::SeqCst);

    let opens_before = h.sources[1].opens.load(Ordering::SeqCst);
    orch.run_cycle().unwrap();
    orch.run_cycle().unwrap();
    assert_eq!(orch.camera_status()[1].state, SessionState::Degraded);

    // Third idle cycle reopens, without reading in the same cycle.
    let report = orch.run_cycle().unwrap();
    assert_eq!(h.sources[1].opens.load(Ordering::SeqCst), opens_before + 1);
    assert_eq!(orch.camera_status()[1].state, SessionState::Active);
    assert_eq!(report.frames, 1);

    let report = orch.run_cycle().unwrap();
    assert_eq!(report.frames, 2);
}

#[test]
fn refuses_to_start_without_any_connected_camera() {
    let (mut orch, h) = build(
        &["left", "right"],
        Vec::new(),
        100,
        PipelineSettings::default(),
    );
    for source in &h.sources {
        source.fail_open.store(true, Ordering::SeqCst);
    }
    let err = orch.start().unwrap_err();
    assert!(err.to_string().contains("no cameras connected"));
    assert_eq!(orch.state(), PipelineState::Idle);
    assert!(orch.run_cycle().is_err());

    orch.stop();
    assert_eq!(orch.state(), PipelineState::Stopped);
    assert!(h.sink.closed.load(Ordering::SeqCst));
}

#[test]
fn starts_when_only_some_cameras_connect() {
    let (mut orch, h) = build(
        &["left", "right"],
        Vec::new(),
        100,
        PipelineSettings::default(),
    );
    h.sources[0].fail_open.store(true, Ordering::SeqCst);
    orch.start().unwrap();
    let status = orch.camera_status();
    assert_eq!(status[0].state, SessionState::Disconnected);
    assert_eq!(status[1].state, SessionState::Active);
}

#[test]
fn empty_cycle_publishes_nothing() {
    let (mut orch, h) = build(&["left"], Vec::new(), 100, PipelineSettings::default());
    orch.start().unwrap();
    let report = orch.run_cycle().unwrap();
    assert_eq!(report.publish, PublishOutcome::Skipped);
    assert!(!report.alert_fired);
    assert!(h.sink.batches().is_empty());
    assert_eq!(h.alert.fired.load(Ordering::SeqCst), 0);
}

#[test]
fn publish_failure_drops_batch_and_keeps_running() {
    let (mut orch, h) = build(
        &["left"],
        vec![car_in_blind_spot()],
        100,
        PipelineSettings::default(),
    );
    orch.start().unwrap();
    h.sink.fail.store(true, Ordering::SeqCst);

    let report = orch.run_cycle().unwrap();
    assert_eq!(report.publish, PublishOutcome::Dropped);
    assert_eq!(orch.publisher_stats().batches_dropped, 1);
    assert_eq!(orch.state(), PipelineState::Running);

    h.sink.fail.store(false, Ordering::SeqCst);
    let report = orch.run_cycle().unwrap();
    assert_eq!(report.publish, PublishOutcome::Delivered);
    assert_eq!(h.sink.batches().len(), 1);
}

#[test]
fn inference_error_skips_camera_for_the_cycle() {
    let (mut orch, h) = build(
        &["left"],
        vec![car_in_blind_spot()],
        100,
        PipelineSettings::default(),
    );
    orch.start().unwrap();
    h.fail_detector.store(true, Ordering::SeqCst);
    let report = orch.run_cycle().unwrap();
    assert_eq!(report.detections, 0);
    assert_eq!(report.publish, PublishOutcome::Skipped);
    assert_eq!(orch.camera_status()[0].state, SessionState::Active);

    h.fail_detector.store(false, Ordering::SeqCst);
    assert_eq!(orch.run_cycle().unwrap().detections, 1);
}

#[test]
fn run_stops_after_max_cycles() {
    let settings = PipelineSettings {
        target_fps: 1000.0,
        max_cycles: Some(3),
        ..PipelineSettings::default()
    };
    let (mut orch, h) = build(&["left"], vec![car_in_blind_spot()], 100, settings);
    orch.run(&ShutdownSignal::new()).unwrap();

    assert_eq!(orch.state(), PipelineState::Stopped);
    assert_eq!(orch.stats().total_cycles, 3);
    assert_eq!(orch.stats().total_alerts, 3);
    assert_eq!(h.sink.batches().len(), 3);
    // Startup and shutdown status.
    assert_eq!(h.sink.status_count(), 2);
    assert!(h.sink.closed.load(Ordering::SeqCst));
    assert_eq!(orch.camera_status()[0].state, SessionState::Released);

    // Idempotent.
    orch.stop();
    assert_eq!(h.sink.status_count(), 2);
}

#[test]
fn shutdown_signal_is_observed_between_cycles() {
    let settings = PipelineSettings {
        target_fps: 1000.0,
        ..PipelineSettings::default()
    };
    let (mut orch, h) = build(&["left"], Vec::new(), 100, settings);
    let shutdown = ShutdownSignal::new();
    shutdown.trigger();
    orch.run(&shutdown).unwrap();
    assert_eq!(orch.state(), PipelineState::Stopped);
    assert_eq!(orch.stats().total_cycles, 0);
    assert!(h.sink.closed.load(Ordering::SeqCst));
}

#[test]
fn slow_cameras_are_read_in_parallel() {
    let (mut orch, h) = build(
        &["left", "right", "rear"],
        vec![car_in_blind_spot()],
        100,
        PipelineSettings::default(),
    );
    orch.start().unwrap();
    h.sources[0].read_delay_ms.store(150, Ordering::SeqCst);
    h.sources[2].read_delay_ms.store(150, Ordering::SeqCst);

    let started = Instant::now();
    let report = orch.run_cycle().unwrap();
    let elapsed = started.elapsed();
    assert_eq!(report.frames, 3);
    assert_eq!(report.detections, 3);
    // Sequential reads would need at least 300 ms.
    assert!(elapsed < Duration::from_millis(280), "cycle took {elapsed:?}");
}

#[test]
fn run_rejects_invalid_target_fps_before_opening_cameras() {
    for target_fps in [0.0, -5.0, f64::NAN] {
        let settings = PipelineSettings {
            target_fps,
            ..PipelineSettings::default()
        };
        let (mut orch, h) = build(&["left"], Vec::new(), 100, settings);
        let err = orch.run(&ShutdownSignal::new()).unwrap_err();
        assert!(err.to_string().contains("target_fps"));
        assert_eq!(orch.state(), PipelineState::Idle);
        assert_eq!(h.sources[0].opens.load(Ordering::SeqCst), 0);
    }
}
