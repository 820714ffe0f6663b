//! `status` mode: counters and live state for every unit.
//!
//! Nothing here can fail. Unreadable records and an absent process
//! manager are rendered as such, because this is the first thing an
//! operator looks at when everything is down.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};

use warden_core::WardenConfig;
use warden_health::ProcessManager;
use warden_state::{RestartState, StateStore, unit_file_stem};

/// Live state as reported by the process manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveState {
    Active,
    Inactive,
    NotEnabled,
    Unknown,
}

impl LiveState {
    pub fn label(&self) -> &'static str {
        match self {
            LiveState::Active => "active",
            LiveState::Inactive => "inactive",
            LiveState::NotEnabled => "not-enabled",
            LiveState::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone)]
pub struct StatusRow {
    pub name: String,
    pub unit: String,
    /// The persisted record, or why it could not be read.
    pub record: Result<RestartState, String>,
    pub live: LiveState,
}

#[derive(Debug, Clone)]
pub struct StatusReport {
    pub host: String,
    pub max_restarts: u32,
    pub rows: Vec<StatusRow>,
    /// Records for units that are no longer configured.
    pub orphans: Vec<RestartState>,
}

/// Gather status for every configured service.
pub async fn status_report(
    config: &WardenConfig,
    store: Option<&StateStore>,
    pm: &dyn ProcessManager,
) -> StatusReport {
    let mut rows = Vec::with_capacity(config.services.len());
    for spec in &config.services {
        let record = match store {
            Some(store) => store.get(&spec.unit).map_err(|e| e.to_string()),
            None => Err("state store unavailable".to_string()),
        };
        rows.push(StatusRow {
            name: spec.name.clone(),
            unit: spec.unit.clone(),
            record,
            live: live_state(pm, &spec.unit).await,
        });
    }

    let configured: Vec<String> = config
        .services
        .iter()
        .map(|s| unit_file_stem(&s.unit))
        .collect();
    let orphans = store
        .and_then(|s| s.list_units().ok())
        .unwrap_or_default()
        .into_iter()
        .filter(|stem| !configured.contains(stem))
        .filter_map(|unit| store.and_then(|s| s.get(&unit).ok()))
        .collect();

    StatusReport {
        host: config.host_label.clone(),
        max_restarts: config.escalation.max_restarts,
        rows,
        orphans,
    }
}

async fn live_state(pm: &dyn ProcessManager, unit: &str) -> LiveState {
    match pm.is_enabled(unit).await {
        Ok(true) => {}
        Ok(false) => return LiveState::NotEnabled,
        Err(_) => return LiveState::Unknown,
    }
    match pm.is_active(unit).await {
        Ok(true) => LiveState::Active,
        Ok(false) => LiveState::Inactive,
        Err(_) => LiveState::Unknown,
    }
}

fn last_restart(state: &RestartState) -> String {
    state
        .last_restart
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs as i64, 0))
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|| "-".to_string())
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "host: {}", self.host)?;
        writeln!(
            f,
            "{:<16} {:<16} {:<18} {:<9} {:<21} LIVE",
            "NAME", "UNIT", "STATE", "RESTARTS", "LAST RESTART"
        )?;
        for row in &self.rows {
            match &row.record {
                Ok(state) => writeln!(
                    f,
                    "{:<16} {:<16} {:<18} {:<9} {:<21} {}",
                    row.name,
                    row.unit,
                    state.phase,
                    format!("{}/{}", state.count, self.max_restarts),
                    last_restart(state),
                    row.live.label()
                )?,
                Err(e) => writeln!(
                    f,
                    "{:<16} {:<16} {:<18} {:<9} {:<21} {}  ({e})",
                    row.name,
                    row.unit,
                    "UNREADABLE",
                    "?",
                    "-",
                    row.live.label()
                )?,
            }
        }
        if !self.orphans.is_empty() {
            writeln!(f, "unconfigured units with state:")?;
            for state in &self.orphans {
                writeln!(
                    f,
                    "  {:<16} {:<18} {}/{} {}",
                    state.unit,
                    state.phase,
                    state.count,
                    self.max_restarts,
                    last_restart(state)
                )?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use warden_core::ServiceSpec;
    use warden_health::Systemctl;
    use warden_state::UnitPhase;

    use super::*;

    fn config() -> WardenConfig {
        let mut config = WardenConfig::default();
        config.host_label = "hk-a".to_string();
        config.services = vec![ServiceSpec {
            name: "proxy-core".to_string(),
            unit: "sing-box".to_string(),
            check: None,
        }];
        config
    }

    #[tokio::test]
    async fn renders_without_process_manager_or_state() {
        let pm = Systemctl::with_program("/nonexistent/systemctl", Duration::from_secs(1));
        let report = status_report(&config(), None, &pm).await;

        assert_eq!(report.rows[0].live, LiveState::Unknown);
        let text = report.to_string();
        assert!(text.contains("proxy-core"));
        assert!(text.contains("UNREADABLE"));
        assert!(text.contains("unknown"));
    }

    #[tokio::test]
    async fn shows_counters_phase_and_orphans() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        {
            let mut lock = store.lock("sing-box").unwrap();
            lock.state_mut().record_restart(1_700_000_000);
            lock.state_mut().phase = UnitPhase::Restarting;
            lock.save().unwrap();
        }
        {
            let mut lock = store.lock("old-unit").unwrap();
            lock.state_mut().record_restart(1_700_000_000);
            lock.save().unwrap();
        }

        let pm = Systemctl::with_program("false", Duration::from_secs(5));
        let report = status_report(&config(), Some(&store), &pm).await;

        assert_eq!(report.rows[0].live, LiveState::NotEnabled);
        assert_eq!(report.rows[0].record.as_ref().unwrap().count, 1);
        assert_eq!(report.orphans.len(), 1);
        let text = report.to_string();
        assert!(text.contains("RESTARTING"));
        assert!(text.contains("1/5"));
        assert!(text.contains("2023-11-14T22:13:20Z"));
        assert!(text.contains("old-unit"));
    }

    #[tokio::test]
    async fn templated_unit_names_are_not_orphans() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        let mut config = config();
        config.services.push(ServiceSpec {
            name: "tunnel".to_string(),
            unit: "wg-quick@wg0 jp.service".to_string(),
            check: None,
        });
        for unit in ["sing-box", "wg-quick@wg0 jp.service"] {
            let mut lock = store.lock(unit).unwrap();
            lock.state_mut().record_restart(1_700_000_000);
            lock.save().unwrap();
        }

        let pm = Systemctl::with_program("false", Duration::from_secs(5));
        let report = status_report(&config, Some(&store), &pm).await;

        assert!(report.orphans.is_empty());
        assert_eq!(report.rows[1].record.as_ref().unwrap().count, 1);
        assert!(!report.to_string().contains("unconfigured"));
    }
}
