//! Camera sessions.
//!
//! A `CameraSession` owns one `FrameSource` and drives its connection state
//! machine:
//!
//! ```text
//! Disconnected -> Connecting -> Active -> Degraded -> (reconnect) Connecting
//!       any state -> Released (terminal)
//! ```
//!
//! Reads are retried a bounded number of times. Sessions that are not Active
//! are reopened every `reconnect_interval_cycles` idle cycles.

use std::fmt;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::Serialize;

use crate::frame::Frame;
use crate::ingest::{CaptureHints, FrameSource};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Active,
    Degraded,
    Released,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Active => "active",
            SessionState::Degraded => "degraded",
            SessionState::Released => "released",
        };
        f.write_str(s)
    }
}

/// Read retry and reconnect policy.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SessionPolicy {
    /// Read attempts per `read_frame` call.
    pub read_attempts: u32,
    pub retry_delay: Duration,
    /// Consecutive failed attempts that move Active -> Degraded.
    pub failure_threshold: u32,
    pub reconnect_interval_cycles: u64,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            read_attempts: 3,
            retry_delay: Duration::from_millis(10),
            failure_threshold: 3,
            reconnect_interval_cycles: 100,
        }
    }
}

/// Static identity of a camera, as configured.
#[derive(Clone, Debug, PartialEq)]
pub struct CameraIdentity {
    pub zone: String,
    pub device_id: String,
    pub name: String,
    pub description: String,
}

/// Point-in-time snapshot of a session.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CameraStatus {
    pub zone: String,
    pub device_id: String,
    pub name: String,
    pub description: String,
    pub state: SessionState,
    pub consecutive_failures: u32,
    pub frames_read: u64,
    pub last_read_at: Option<f64>,
}

pub struct CameraSession {
    identity: CameraIdentity,
    source: Box<dyn FrameSource>,
    hints: CaptureHints,
    policy: SessionPolicy,
    state: SessionState,
    consecutive_failures: u32,
    idle_cycles: u64,
    frames_read: u64,
    last_read_at: Option<f64>,
}

impl CameraSession {
    pub fn new(
        identity: CameraIdentity,
        source: Box<dyn FrameSource>,
        hints: CaptureHints,
        policy: SessionPolicy,
    ) -> Self {
        Self {
            identity,
            source,
            hints,
            policy,
            state: SessionState::Disconnected,
            consecutive_failures: 0,
            idle_cycles: 0,
            frames_read: 0,
            last_read_at: None,
        }
    }

    pub fn zone(&self) -> &str {
        &self.identity.zone
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Acquire the device, releasing any handle held from a previous run.
    ///
    /// On failure the session is left Disconnected; the error is returned for
    /// the caller to log or ignore.
    pub fn open(&mut self) -> Result<()> {
        if self.state == SessionState::Released {
            return Err(anyhow!("camera {} has been released", self.identity.zone));
        }
        self.source.release();
        self.state = SessionState::Connecting;
        self.idle_cycles = 0;
        log::debug!(
            "camera {} connecting to {}",
            self.identity.zone,
            self.identity.device_id
        );

        match self.source.open(&self.identity.device_id, &self.hints) {
            Ok(()) => {
                self.state = SessionState::Active;
                self.consecutive_failures = 0;
                log::info!(
                    "camera {} ({}) connected on {}",
                    self.identity.zone,
                    self.identity.name,
                    self.identity.device_id
                );
                Ok(())
            }
            Err(err) => {
                self.source.release();
                self.state = SessionState::Disconnected;
                log::warn!(
                    "camera {} failed to open {}: {:#}",
                    self.identity.zone,
                    self.identity.device_id,
                    err
                );
                Err(err)
            }
        }
    }

    /// Read one frame with bounded retries.
    ///
    /// Returns `None` when the session is not Active or every attempt failed.
    /// Each failed attempt (error or empty frame) counts toward
    /// `failure_threshold`; crossing it degrades the session.
    pub fn read_frame(&mut self) -> Option<Frame> {
        if self.state != SessionState::Active {
            return None;
        }

        for attempt in 1..=self.policy.read_attempts {
            match self.source.read() {
                Ok(frame) if !frame.is_empty() => {
                    self.consecutive_failures = 0;
                    self.frames_read += 1;
                    self.last_read_at = Some(frame.captured_at);
                    return Some(frame);
                }
                Ok(_) => self.record_failure(attempt, "empty frame"),
                Err(err) => self.record_failure(attempt, &format!("{:#}", err)),
            }

            if self.state != SessionState::Active {
                return None;
            }
            if attempt < self.policy.read_attempts {
                std::thread::sleep(self.policy.retry_delay);
            }
        }
        None
    }

    fn record_failure(&mut self, attempt: u32, reason: &str) {
        self.consecutive_failures += 1;
        log::debug!(
            "camera {} read attempt {}/{} failed: {}",
            self.identity.zone,
            attempt,
            self.policy.read_attempts,
            reason
        );
        if self.consecutive_failures >= self.policy.failure_threshold {
            self.state = SessionState::Degraded;
            self.idle_cycles = 0;
            log::error!(
                "camera {} degraded after {} consecutive read failures",
                self.identity.zone,
                self.consecutive_failures
            );
        }
    }

    /// Advance the idle counter of a Disconnected or Degraded session.
    ///
    /// Every `reconnect_interval_cycles` calls, attempt a reopen. Returns true
    /// when a reconnect was attempted this call.
    pub fn tick_idle(&mut self) -> bool {
        match self.state {
            SessionState::Disconnected | SessionState::Degraded => {}
            _ => return false,
        }
        self.idle_cycles += 1;
        if self.idle_cycles < self.policy.reconnect_interval_cycles {
            return false;
        }
        log::info!(
            "camera {} attempting reconnect after {} idle cycles",
            self.identity.zone,
            self.idle_cycles
        );
        let _ = self.open();
        true
    }

    /// Release the device. Terminal and idempotent.
    pub fn stop(&mut self) {
        if self.state == SessionState::Released {
            return;
        }
        self.source.release();
        self.state = SessionState::Released;
        log::info!("camera {} released", self.identity.zone);
    }

    pub fn status(&self) -> CameraStatus {
        CameraStatus {
            zone: self.identity.zone.clone(),
            device_id: self.identity.device_id.clone(),
            name: self.identity.name.clone(),
            description: self.identity.description.clone(),
            state: self.state,
            consecutive_failures: self.consecutive_failures,
            frames_read: self.frames_read,
            last_read_at: self.last_read_at,
        }
    }
}

impl fmt::Debug for CameraSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CameraSession")
            .field("identity", &self.identity)
            .field("state", &self.state)
            .field("consecutive_failures", &self.consecutive_failures)
            .field("frames_read", &self.frames_read)
            .finish()
    }
}
