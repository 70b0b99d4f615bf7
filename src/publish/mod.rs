//! Outbound detection publishing.
//!
//! The `Publisher` serializes one batch per cycle and hands it to a
//! `DetectionSink`. Delivery is bounded: a batch is attempted up to
//! `max_attempts` times back to back, then dropped. Publishing never fails the
//! caller; outcomes are reported as `PublishOutcome`.

mod sink;

use std::collections::BTreeMap;

use anyhow::{anyhow, Result};
use serde::Serialize;

use crate::camera::CameraStatus;
use crate::detect::Detection;

pub use crate::transport::{MqttSettings, MqttSink};
pub use sink::{DetectionSink, LogSink, MessageKind};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Nothing to send; the sink was not called.
    Skipped,
    Delivered,
    /// Every attempt failed; the message was discarded.
    Dropped,
}

impl PublishOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, PublishOutcome::Dropped)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PublisherSettings {
    pub max_attempts: u32,
}

impl Default for PublisherSettings {
    fn default() -> Self {
        Self { max_attempts: 1 }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PublisherStats {
    pub batches_delivered: u64,
    pub batches_dropped: u64,
    pub detections_delivered: u64,
    pub status_delivered: u64,
}

#[derive(Serialize)]
struct DetectionsMessage<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    timestamp: f64,
    detections: &'a [Detection],
}

#[derive(Serialize)]
struct StatusMessage<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    timestamp: f64,
    status: BTreeMap<&'a str, &'a CameraStatus>,
}

pub struct Publisher {
    sink: Box<dyn DetectionSink>,
    settings: PublisherSettings,
    stats: PublisherStats,
    closed: bool,
}

impl Publisher {
    pub fn new(sink: Box<dyn DetectionSink>, settings: PublisherSettings) -> Self {
        Self {
            sink,
            settings,
            stats: PublisherStats::default(),
            closed: false,
        }
    }

    pub fn sink_name(&self) -> &str {
        self.sink.name()
    }

    pub fn stats(&self) -> PublisherStats {
        self.stats
    }

    /// Publish one cycle's detections as a single batch.
    pub fn publish(&mut self, detections: &[Detection], timestamp: f64) -> PublishOutcome {
        if detections.is_empty() {
            return PublishOutcome::Skipped;
        }
        let message = DetectionsMessage {
            kind: "detections",
            timestamp,
            detections,
        };
        let outcome = self.deliver(MessageKind::Detections, &message);
        match outcome {
            PublishOutcome::Delivered => {
                self.stats.batches_delivered += 1;
                self.stats.detections_delivered += detections.len() as u64;
            }
            PublishOutcome::Dropped => {
                self.stats.batches_dropped += 1;
                log::error!(
                    "dropped batch of {} detections via {}",
                    detections.len(),
                    self.sink.name()
                );
            }
            PublishOutcome::Skipped => {}
        }
        outcome
    }

    /// Publish a per-camera status snapshot, keyed by zone.
    pub fn publish_status(&mut self, statuses: &[CameraStatus], timestamp: f64) -> PublishOutcome {
        let message = StatusMessage {
            kind: "status",
            timestamp,
            status: statuses.iter().map(|s| (s.zone.as_str(), s)).collect(),
        };
        let outcome = self.deliver(MessageKind::Status, &message);
        match outcome {
            PublishOutcome::Delivered => self.stats.status_delivered += 1,
            PublishOutcome::Dropped => {
                log::error!("dropped status message via {}", self.sink.name())
            }
            PublishOutcome::Skipped => {}
        }
        outcome
    }

    fn deliver<T: Serialize>(&mut self, kind: MessageKind, message: &T) -> PublishOutcome {
        if self.closed {
            log::warn!("publish after close on {}; discarding {}", self.sink.name(), kind);
            return PublishOutcome::Dropped;
        }
        let payload = match serde_json::to_vec(message) {
            Ok(payload) => payload,
            Err(err) => {
                log::error!("failed to serialize {} message: {}", kind, err);
                return PublishOutcome::Dropped;
            }
        };

        let attempts = self.settings.max_attempts.max(1);
        let mut last_err = anyhow!("no delivery attempted");
        for attempt in 1..=attempts {
            match self.sink.send(kind, &payload) {
                Ok(()) => return PublishOutcome::Delivered,
                Err(err) => {
                    log::debug!(
                        "{} send attempt {}/{} failed: {:#}",
                        self.sink.name(),
                        attempt,
                        attempts,
                        err
                    );
                    last_err = err;
                }
            }
        }
        log::error!(
            "failed to publish {} via {} after {} attempt(s): {:#}",
            kind,
            self.sink.name(),
            attempts,
            last_err
        );
        PublishOutcome::Dropped
    }

    /// Flush and close the sink. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.sink.close()
    }
}
