use std::fmt;

use anyhow::Result;

/// Message category, used by sinks that route by topic.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageKind {
    Detections,
    Status,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Detections => "detections",
            MessageKind::Status => "status",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Destination for serialized messages.
///
/// `send` is one delivery attempt; retry policy belongs to the `Publisher`.
pub trait DetectionSink: Send {
    fn name(&self) -> &str;

    fn send(&mut self, kind: MessageKind, payload: &[u8]) -> Result<()>;

    /// Flush pending messages and release the connection.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Writes every message to the log at info level.
#[derive(Debug, Default)]
pub struct LogSink;

impl DetectionSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    fn send(&mut self, kind: MessageKind, payload: &[u8]) -> Result<()> {
        log::info!("{}: {}", kind, String::from_utf8_lossy(payload));
        Ok(())
    }
}
