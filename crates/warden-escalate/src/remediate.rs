//! Resource threshold handling: log pruning, cache dropping, alerts.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, info, warn};

use warden_alert::AlertSink;
use warden_core::{ConfigError, ProbeStatus, WardenConfig};
use warden_health::{ResourceKind, ResourceSample};

/// Files removed by one pruning pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneSummary {
    pub removed: usize,
    pub freed_bytes: u64,
    pub errors: usize,
}

#[derive(Debug, Clone)]
pub struct ResourceVerdict {
    pub sample: ResourceSample,
    /// Summary of the mitigation attempted, if any.
    pub remediation: Option<String>,
}

/// Applies automatic mitigations for exhausted resources.
#[derive(Debug, Clone)]
pub struct Remediator {
    log_dirs: Vec<PathBuf>,
    max_log_age: Duration,
    drop_caches: Option<PathBuf>,
}

impl Remediator {
    pub fn new(log_dirs: Vec<PathBuf>, max_log_age: Duration, drop_caches: Option<PathBuf>) -> Self {
        Self {
            log_dirs,
            max_log_age,
            drop_caches,
        }
    }

    pub fn from_config(config: &WardenConfig) -> Result<Self, ConfigError> {
        let r = &config.remediation;
        Ok(Self::new(
            r.log_dirs.clone(),
            config.max_log_age()?,
            r.drop_caches.then(|| r.drop_caches_path.clone()),
        ))
    }

    /// Alert on every degraded or failed sample and remediate the failed ones.
    /// The alert goes out whatever the remediation achieved.
    pub async fn handle(&self, samples: Vec<ResourceSample>, alerts: &dyn AlertSink) -> Vec<ResourceVerdict> {
        let mut verdicts = Vec::with_capacity(samples.len());
        for sample in samples {
            let remediation = if sample.outcome.status == ProbeStatus::Failed {
                Some(self.remediate(sample.kind))
            } else {
                None
            };

            if let Some(severity) = sample.outcome.status.alert_severity() {
                let message = match &remediation {
                    Some(summary) => format!("{}; {summary}", sample.outcome.reason),
                    None => sample.outcome.reason.clone(),
                };
                alerts.notify(&message, severity).await;
            }
            verdicts.push(ResourceVerdict { sample, remediation });
        }
        verdicts
    }

    fn remediate(&self, kind: ResourceKind) -> String {
        match kind {
            ResourceKind::Disk => {
                let summary = prune_logs(&self.log_dirs, self.max_log_age, SystemTime::now());
                info!(removed = summary.removed, freed_bytes = summary.freed_bytes, "pruned old logs");
                let mut text = format!(
                    "pruned {} old log files ({})",
                    summary.removed,
                    human_bytes(summary.freed_bytes)
                );
                if summary.errors > 0 {
                    text.push_str(&format!(", {} could not be removed", summary.errors));
                }
                text
            }
            ResourceKind::Memory => match &self.drop_caches {
                Some(path) => match std::fs::write(path, "3\n") {
                    Ok(()) => {
                        info!(path = %path.display(), "dropped page caches");
                        "dropped page caches".to_string()
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "failed to drop caches");
                        format!("dropping caches failed: {e}")
                    }
                },
                None => "no memory remediation configured".to_string(),
            },
        }
    }
}

/// Delete regular files under `dirs` last modified more than `max_age`
/// before `now`. Missing directories are skipped.
pub fn prune_logs(dirs: &[PathBuf], max_age: Duration, now: SystemTime) -> PruneSummary {
    let mut summary = PruneSummary::default();
    let Some(cutoff) = now.checked_sub(max_age) else {
        return summary;
    };
    for dir in dirs {
        prune_dir(dir, cutoff, &mut summary);
    }
    summary
}

fn prune_dir(dir: &Path, cutoff: SystemTime, summary: &mut PruneSummary) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(dir = %dir.display(), error = %e, "log directory not readable, skipping");
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(meta) = entry.metadata() else {
            summary.errors += 1;
            continue;
        };
        if meta.is_dir() {
            prune_dir(&path, cutoff, summary);
            continue;
        }
        if !meta.is_file() {
            continue;
        }
        let old = meta.modified().map(|m| m < cutoff).unwrap_or(false);
        if !old {
            continue;
        }
        match std::fs::remove_file(&path) {
            Ok(()) => {
                summary.removed += 1;
                summary.freed_bytes += meta.len();
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to remove old log");
                summary.errors += 1;
            }
        }
    }
}

fn human_bytes(bytes: u64) -> String {
    const MIB: f64 = 1024.0 * 1024.0;
    if bytes >= 1024 * 1024 {
        format!("{:.1} MiB", bytes as f64 / MIB)
    } else {
        format!("{:.1} KiB", bytes as f64 / 1024.0)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use warden_alert::Delivery;
    use warden_core::{BoxFuture, Severity};
    use warden_health::ProbeOutcome;

    use super::*;

    #[derive(Default)]
    struct Sink(Mutex<Vec<(Severity, String)>>);

    impl AlertSink for Sink {
        fn notify<'a>(&'a self, message: &'a str, severity: Severity) -> BoxFuture<'a, Delivery> {
            Box::pin(async move {
                self.0.lock().unwrap().push((severity, message.to_string()));
                Delivery::Logged
            })
        }
    }

    fn sample(kind: ResourceKind, status: ProbeStatus, pct: u64) -> ResourceSample {
        ResourceSample {
            kind,
            used_pct: Some(pct),
            outcome: ProbeOutcome::new(status, format!("{} usage {pct}%", kind.label())),
        }
    }

    #[test]
    fn prune_removes_only_files_older_than_cutoff() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("access.log.1"), vec![0u8; 2048]).unwrap();
        std::fs::write(dir.path().join("nested/error.log.2"), b"old").unwrap();

        // Nothing is a week old yet.
        let now = SystemTime::now();
        let week = Duration::from_secs(7 * 86400);
        assert_eq!(prune_logs(&[dir.path().to_path_buf()], week, now).removed, 0);

        // Seen from eight days in the future, both files are stale.
        let later = now + Duration::from_secs(8 * 86400);
        let summary = prune_logs(&[dir.path().to_path_buf()], week, later);
        assert_eq!(summary.removed, 2);
        assert_eq!(summary.freed_bytes, 2051);
        assert!(!dir.path().join("access.log.1").exists());
        assert!(dir.path().join("nested").exists());
    }

    #[test]
    fn prune_skips_missing_directories() {
        let summary = prune_logs(
            &[PathBuf::from("/nonexistent/warden/logs")],
            Duration::from_secs(1),
            SystemTime::now(),
        );
        assert_eq!(summary, PruneSummary::default());
    }

    #[tokio::test]
    async fn failed_disk_is_remediated_and_alerted() {
        let dir = tempfile::tempdir().unwrap();
        let remediator = Remediator::new(vec![dir.path().to_path_buf()], Duration::from_secs(86400), None);
        let sink = Sink::default();

        let verdicts = remediator
            .handle(vec![sample(ResourceKind::Disk, ProbeStatus::Failed, 95)], &sink)
            .await;

        assert!(verdicts[0].remediation.as_deref().unwrap().starts_with("pruned 0"));
        let alerts = sink.0.lock().unwrap();
        assert_eq!(alerts[0].0, Severity::Critical);
        assert!(alerts[0].1.contains("disk usage 95%"));
        assert!(alerts[0].1.contains("pruned"));
    }

    #[tokio::test]
    async fn degraded_memory_alerts_without_remediation() {
        let dir = tempfile::tempdir().unwrap();
        let caches = dir.path().join("drop_caches");
        let remediator = Remediator::new(Vec::new(), Duration::from_secs(86400), Some(caches.clone()));
        let sink = Sink::default();

        let verdicts = remediator
            .handle(
                vec![
                    sample(ResourceKind::Memory, ProbeStatus::Degraded, 85),
                    sample(ResourceKind::Disk, ProbeStatus::Healthy, 40),
                ],
                &sink,
            )
            .await;

        assert!(verdicts.iter().all(|v| v.remediation.is_none()));
        assert!(!caches.exists());
        let alerts = sink.0.lock().unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].0, Severity::Warning);
    }

    #[tokio::test]
    async fn failed_memory_drops_caches_when_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let caches = dir.path().join("drop_caches");
        let remediator = Remediator::new(Vec::new(), Duration::from_secs(86400), Some(caches.clone()));

        remediator
            .handle(vec![sample(ResourceKind::Memory, ProbeStatus::Failed, 97)], &Sink::default())
            .await;
        assert_eq!(std::fs::read_to_string(&caches).unwrap(), "3\n");
    }
}
