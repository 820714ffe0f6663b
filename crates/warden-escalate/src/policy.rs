use std::time::Duration;

use warden_core::{ConfigError, WardenConfig};

/// Restart budget for a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EscalationPolicy {
    /// Restarts allowed before the unit is marked permanently failed.
    pub max_restarts: u32,
    /// Healthy time since the last restart after which the counter is forgiven.
    pub reset_window: Duration,
    /// Wait between a restart and the re-probe that judges it.
    pub settle: Duration,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            max_restarts: 5,
            reset_window: Duration::from_secs(30 * 60),
            settle: Duration::from_secs(3),
        }
    }
}

impl EscalationPolicy {
    pub fn from_config(config: &WardenConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            max_restarts: config.escalation.max_restarts,
            reset_window: config.reset_window()?,
            settle: config.settle()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_match_policy_defaults() {
        let policy = EscalationPolicy::from_config(&WardenConfig::default()).unwrap();
        assert_eq!(policy, EscalationPolicy::default());
    }
}
