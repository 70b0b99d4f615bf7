//! Blind-Spot Detection Kernel
//!
//! Multi-camera detection pipeline for vehicle blind-spot monitoring.
//!
//! # Architecture
//!
//! Every cycle, each camera session reads one frame, a shared detector
//! produces raw candidates, and the result flows through:
//!
//! 1. **Detection filter**: confidence gate, class allow-list, minimum area,
//!    same-class NMS, per-frame cap.
//! 2. **Zone classifier**: normalized position, per-zone Z offset and
//!    blind-spot membership.
//! 3. **Alerting**: one alert per cycle when anything is in a blind spot.
//! 4. **Publishing**: one batch of detections per cycle to the sink.
//!
//! Camera failures are isolated per session: a failing camera degrades and
//! is periodically reconnected while the others keep running.
//!
//! # Module Structure
//!
//! - `geometry`: boxes, IoU, normalized rectangles
//! - `frame`: RGB frame buffers
//! - `ingest`: frame sources (synthetic, V4L2)
//! - `detect`: detector backends, registry, filter
//! - `zone`: zone classification
//! - `camera`: per-camera session state machine
//! - `pipeline`: orchestrator, telemetry, shutdown
//! - `publish` / `transport`: detection sinks (MQTT, log)
//! - `alert`: alert sinks
//! - `config`: file and environment configuration

pub mod alert;
pub mod camera;
pub mod config;
pub mod detect;
pub mod frame;
pub mod geometry;
pub mod ingest;
pub mod pipeline;
pub mod publish;
pub mod transport;
pub mod zone;

pub use alert::{AlertSink, BellAlert, CommandAlert, LogAlert};
pub use camera::{CameraIdentity, CameraSession, CameraStatus, SessionPolicy, SessionState};
pub use config::{AlertKind, BlindspotConfig, CameraConfig, SinkKind};
pub use detect::{
    BackendRegistry, Detection, DetectionFilter, DetectorBackend, FilterSettings, Position,
    RawCandidate, SharedDetector, StubBackend,
};
pub use frame::Frame;
pub use geometry::{iou, normalized_center, rect_contains, BBox, NormRect};
pub use ingest::{source_for_device, CaptureHints, FrameSource, SyntheticSource};
pub use pipeline::{
    CycleReport, Orchestrator, PipelineSettings, PipelineState, PipelineStats, ShutdownSignal,
};
pub use publish::{
    DetectionSink, LogSink, MessageKind, MqttSettings, MqttSink, PublishOutcome, Publisher,
    PublisherSettings,
};
pub use zone::{ZoneClassifier, ZoneRectangle};

#[cfg(feature = "backend-tract")]
pub use detect::TractBackend;
#[cfg(feature = "ingest-v4l2")]
pub use ingest::V4l2Source;
