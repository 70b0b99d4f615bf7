//! Alert sinks.
//!
//! The orchestrator fires the alert at most once per cycle, whenever at least
//! one detection lands inside its camera's blind-spot rectangle. A failing
//! alert is logged by the caller and never stops the pipeline.

use std::io::Write;
use std::process::{Child, Command, Stdio};

use anyhow::{anyhow, Context, Result};

pub trait AlertSink: Send {
    fn name(&self) -> &str;

    fn fire(&mut self) -> Result<()>;
}

/// Logs a warning.
#[derive(Debug, Default)]
pub struct LogAlert;

impl AlertSink for LogAlert {
    fn name(&self) -> &str {
        "log"
    }

    fn fire(&mut self) -> Result<()> {
        log::warn!("ALERT: object in blind spot");
        Ok(())
    }
}

/// Rings the terminal bell on stderr.
#[derive(Debug, Default)]
pub struct BellAlert;

impl AlertSink for BellAlert {
    fn name(&self) -> &str {
        "bell"
    }

    fn fire(&mut self) -> Result<()> {
        let mut stderr = std::io::stderr().lock();
        stderr.write_all(b"\x07").context("write terminal bell")?;
        stderr.flush().context("flush terminal bell")?;
        Ok(())
    }
}

/// Spawns an external command (e.g. `aplay beep.wav`) without waiting on it.
///
/// At most one instance runs at a time; fires that arrive while the previous
/// command is still playing are skipped.
#[derive(Debug)]
pub struct CommandAlert {
    program: String,
    args: Vec<String>,
    running: Option<Child>,
}

impl CommandAlert {
    pub fn new(command: &[String]) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| anyhow!("alert command must not be empty"))?;
        if program.trim().is_empty() {
            return Err(anyhow!("alert command must not be empty"));
        }
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            running: None,
        })
    }
}

impl AlertSink for CommandAlert {
    fn name(&self) -> &str {
        "command"
    }

    fn fire(&mut self) -> Result<()> {
        if let Some(child) = self.running.as_mut() {
            match child.try_wait() {
                Ok(None) => {
                    log::debug!("alert command {} still running; skipping", self.program);
                    return Ok(());
                }
                Ok(Some(_)) => {}
                Err(err) => log::warn!("failed to poll alert command {}: {}", self.program, err),
            }
            self.running = None;
        }
        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("spawn alert command {}", self.program))?;
        self.running = Some(child);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_and_bell_alerts_succeed() {
        assert!(LogAlert.fire().is_ok());
        assert!(BellAlert.fire().is_ok());
    }

    #[test]
    fn command_alert_requires_program() {
        assert!(CommandAlert::new(&[]).is_err());
        assert!(CommandAlert::new(&[" ".to_string()]).is_err());
    }

    #[test]
    fn command_alert_reports_spawn_failure() {
        let mut alert =
            CommandAlert::new(&["/nonexistent/blindspot-beeper".to_string()]).unwrap();
        let err = alert.fire().unwrap_err();
        assert!(err.to_string().contains("blindspot-beeper"));
    }

    #[cfg(unix)]
    #[test]
    fn command_alert_spawns_without_waiting() {
        let mut alert = CommandAlert::new(&["true".to_string()]).unwrap();
        assert!(alert.fire().is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn command_alert_skips_while_previous_is_playing() {
        let mut alert = CommandAlert::new(&["sleep".to_string(), "1".to_string()]).unwrap();
        alert.fire().unwrap();
        let first = alert.running.as_ref().map(Child::id).unwrap();
        alert.fire().unwrap();
        let second = alert.running.as_ref().map(Child::id).unwrap();
        assert_eq!(first, second);
        if let Some(mut child) = alert.running.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }

    #[cfg(unix)]
    #[test]
    fn command_alert_respawns_after_previous_finished() {
        let mut alert = CommandAlert::new(&["true".to_string()]).unwrap();
        alert.fire().unwrap();
        let first = alert.running.as_mut().unwrap().wait().unwrap();
        assert!(first.success());
        let first_id = alert.running.as_ref().map(Child::id).unwrap();
        alert.fire().unwrap();
        let second_id = alert.running.as_ref().map(Child::id).unwrap();
        assert_ne!(first_id, second_id);
    }
}
