//! The common probe result.

use std::fmt;

use warden_core::ProbeStatus;

/// Status plus a human-readable reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub status: ProbeStatus,
    pub reason: String,
}

impl ProbeOutcome {
    pub fn new(status: ProbeStatus, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
        }
    }

    pub fn healthy(reason: impl Into<String>) -> Self {
        Self::new(ProbeStatus::Healthy, reason)
    }

    pub fn degraded(reason: impl Into<String>) -> Self {
        Self::new(ProbeStatus::Degraded, reason)
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self::new(ProbeStatus::Failed, reason)
    }

    pub fn unknown(reason: impl Into<String>) -> Self {
        Self::new(ProbeStatus::Unknown, reason)
    }
}

impl fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status, self.reason)
    }
}
