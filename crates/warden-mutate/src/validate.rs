//! External configuration validation.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use warden_core::BoxFuture;

use crate::error::{MutateError, MutateResult};

/// Verdict of one validation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validation {
    pub passed: bool,
    /// Combined stdout and stderr of the validator.
    pub output: String,
}

/// Checks a configuration document on disk.
pub trait Validator: Send + Sync {
    /// `Err` only when the validator could not run at all.
    fn validate<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, MutateResult<Validation>>;
}

/// Runs `argv... <path>`, e.g. `sing-box check -c /etc/sing-box/config.json`.
#[derive(Debug, Clone)]
pub struct CommandValidator {
    argv: Vec<String>,
    timeout: Duration,
}

impl CommandValidator {
    pub fn new(argv: Vec<String>, timeout: Duration) -> Self {
        Self { argv, timeout }
    }

    async fn run(&self, path: &Path) -> MutateResult<Validation> {
        let (program, args) = self
            .argv
            .split_first()
            .ok_or_else(|| MutateError::Validator("empty check command".to_string()))?;

        let child = Command::new(program)
            .args(args)
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MutateError::Validator(format!("{program}: {e}")))?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| MutateError::Validator(format!("{program} timed out")))?
            .map_err(|e| MutateError::Validator(e.to_string()))?;

        let mut text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(stderr.trim());
        }
        debug!(path = %path.display(), passed = output.status.success(), "validator ran");
        Ok(Validation {
            passed: output.status.success(),
            output: text,
        })
    }
}

impl Validator for CommandValidator {
    fn validate<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, MutateResult<Validation>> {
        Box::pin(self.run(path))
    }
}
