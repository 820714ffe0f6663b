//! Persisted restart state.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Escalation phase of a unit as of its last evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitPhase {
    #[default]
    Normal,
    /// A restart was attempted and the unit did not come back.
    Restarting,
    /// Restart budget exhausted; waits for an operator reset.
    PermanentFailure,
}

impl UnitPhase {
    pub fn label(&self) -> &'static str {
        match self {
            UnitPhase::Normal => "NORMAL",
            UnitPhase::Restarting => "RESTARTING",
            UnitPhase::PermanentFailure => "PERMANENT-FAILURE",
        }
    }
}

impl fmt::Display for UnitPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.label())
    }
}

/// Restart counter for one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartState {
    pub unit: String,
    /// Consecutive restarts since the last reset.
    pub count: u32,
    /// Unix timestamp (seconds) of the last restart attempt.
    pub last_restart: Option<u64>,
    #[serde(default)]
    pub phase: UnitPhase,
}

impl RestartState {
    pub fn new(unit: &str) -> Self {
        Self {
            unit: unit.to_string(),
            count: 0,
            last_restart: None,
            phase: UnitPhase::Normal,
        }
    }

    /// Whether the restart budget is spent.
    pub fn exhausted(&self, max_restarts: u32) -> bool {
        self.count >= max_restarts
    }

    /// Whether a quiet period since the last restart forgives the counter.
    ///
    /// A unit in `PermanentFailure` is never forgiven; only an explicit
    /// reset clears it.
    pub fn reset_due(&self, now: u64, window_secs: u64) -> bool {
        if self.count == 0 || self.phase == UnitPhase::PermanentFailure {
            return false;
        }
        match self.last_restart {
            Some(at) => now.saturating_sub(at) > window_secs,
            None => true,
        }
    }

    /// Record one restart attempt at `now`.
    pub fn record_restart(&mut self, now: u64) {
        self.count = self.count.saturating_add(1);
        self.last_restart = Some(now);
    }

    pub fn clear(&mut self) {
        self.count = 0;
        self.phase = UnitPhase::Normal;
    }
}
