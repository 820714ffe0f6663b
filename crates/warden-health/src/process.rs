//! Process-manager seam and the liveness probe built on it.

use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

pub use warden_core::BoxFuture;

use crate::probe::ProbeOutcome;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("process manager unavailable: {0}")]
    Unavailable(String),

    #[error("{action} {unit} timed out")]
    Timeout { action: &'static str, unit: String },

    #[error("{action} {unit} failed: {detail}")]
    Failed {
        action: &'static str,
        unit: String,
        detail: String,
    },
}

/// The external process manager that owns the supervised units.
pub trait ProcessManager: Send + Sync {
    fn is_enabled<'a>(&'a self, unit: &'a str) -> BoxFuture<'a, Result<bool, ProcessError>>;

    fn is_active<'a>(&'a self, unit: &'a str) -> BoxFuture<'a, Result<bool, ProcessError>>;

    fn restart<'a>(&'a self, unit: &'a str) -> BoxFuture<'a, Result<(), ProcessError>>;

    fn reload<'a>(&'a self, unit: &'a str) -> BoxFuture<'a, Result<(), ProcessError>>;
}

/// `systemctl`-backed process manager.
#[derive(Debug, Clone)]
pub struct Systemctl {
    program: String,
    timeout: Duration,
}

impl Systemctl {
    pub fn new(timeout: Duration) -> Self {
        Self::with_program("systemctl", timeout)
    }

    /// Use a different binary (a wrapper script, or a stand-in for tests).
    pub fn with_program(program: &str, timeout: Duration) -> Self {
        Self {
            program: program.to_string(),
            timeout,
        }
    }

    /// Run `<program> <action> <unit>` and report whether it exited 0.
    async fn run(&self, action: &'static str, unit: &str) -> Result<(bool, String), ProcessError> {
        let child = Command::new(&self.program)
            .arg(action)
            .arg(unit)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ProcessError::Unavailable(format!("{}: {e}", self.program)))?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ProcessError::Timeout {
                action,
                unit: unit.to_string(),
            })?
            .map_err(|e| ProcessError::Unavailable(e.to_string()))?;

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        debug!(%unit, action, success = output.status.success(), "process manager call");
        Ok((output.status.success(), stderr))
    }

    async fn act(&self, action: &'static str, unit: &str) -> Result<(), ProcessError> {
        let (ok, stderr) = self.run(action, unit).await?;
        if ok {
            Ok(())
        } else {
            Err(ProcessError::Failed {
                action,
                unit: unit.to_string(),
                detail: if stderr.is_empty() {
                    "non-zero exit".to_string()
                } else {
                    stderr
                },
            })
        }
    }
}

impl ProcessManager for Systemctl {
    fn is_enabled<'a>(&'a self, unit: &'a str) -> BoxFuture<'a, Result<bool, ProcessError>> {
        Box::pin(async move { Ok(self.run("is-enabled", unit).await?.0) })
    }

    fn is_active<'a>(&'a self, unit: &'a str) -> BoxFuture<'a, Result<bool, ProcessError>> {
        Box::pin(async move { Ok(self.run("is-active", unit).await?.0) })
    }

    fn restart<'a>(&'a self, unit: &'a str) -> BoxFuture<'a, Result<(), ProcessError>> {
        Box::pin(self.act("restart", unit))
    }

    fn reload<'a>(&'a self, unit: &'a str) -> BoxFuture<'a, Result<(), ProcessError>> {
        Box::pin(self.act("reload", unit))
    }
}

/// Check that a unit is registered and running.
///
/// Returns `None` when the unit was never enabled: an absent installation
/// is not a fault, so the whole service check is skipped.
pub async fn process_probe(pm: &dyn ProcessManager, unit: &str) -> Option<ProbeOutcome> {
    match pm.is_enabled(unit).await {
        Ok(true) => {}
        Ok(false) => {
            debug!(%unit, "unit not enabled, skipping");
            return None;
        }
        Err(e) => return Some(ProbeOutcome::unknown(e.to_string())),
    }

    let outcome = match pm.is_active(unit).await {
        Ok(true) => ProbeOutcome::healthy(format!("{unit} is active")),
        Ok(false) => ProbeOutcome::failed(format!("{unit} is not active")),
        Err(e) => ProbeOutcome::unknown(e.to_string()),
    };
    Some(outcome)
}
