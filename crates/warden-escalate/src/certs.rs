//! Certificate expiry alerts and the optional renewal hook.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{info, warn};

use warden_alert::AlertSink;
use warden_core::CertSpec;
use warden_health::{CertRecord, ProbeOutcome, cert_probe};

/// Bound on one run of the renewal command.
const RENEW_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct CertVerdict {
    pub domain: String,
    pub record: Option<CertRecord>,
    pub outcome: ProbeOutcome,
    /// Result of the renewal hook, when one ran.
    pub renewal: Option<Result<(), String>>,
}

/// Probe every configured certificate, alert on the unhealthy ones and,
/// if `renew_command` is set, hand each of them to it.
pub async fn check_certs(
    domains: &[CertSpec],
    base_dir: &Path,
    warning_days: i64,
    timeout: Duration,
    renew_command: &[String],
    alerts: &dyn AlertSink,
) -> Vec<CertVerdict> {
    let mut verdicts = Vec::with_capacity(domains.len());

    for spec in domains {
        let (record, outcome) = cert_probe(spec, base_dir, warning_days, timeout).await;
        let Some(severity) = outcome.status.alert_severity() else {
            verdicts.push(CertVerdict {
                domain: spec.domain.clone(),
                record,
                outcome,
                renewal: None,
            });
            continue;
        };

        let renewal = if renew_command.is_empty() {
            None
        } else {
            Some(run_renewal(renew_command, &spec.domain, RENEW_TIMEOUT).await)
        };
        let suffix = match &renewal {
            None => String::new(),
            Some(Ok(())) => "; renewal triggered".to_string(),
            Some(Err(e)) => format!("; renewal failed: {e}"),
        };
        alerts
            .notify(&format!("{}{suffix}", outcome.reason), severity)
            .await;

        verdicts.push(CertVerdict {
            domain: spec.domain.clone(),
            record,
            outcome,
            renewal,
        });
    }

    verdicts
}

/// Run `<argv...> <domain>`; the command itself is opaque.
async fn run_renewal(argv: &[String], domain: &str, timeout: Duration) -> Result<(), String> {
    let Some((program, args)) = argv.split_first() else {
        return Err("empty renew command".to_string());
    };

    let child = Command::new(program)
        .args(args)
        .arg(domain)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| format!("{program}: {e}"))?;

    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| format!("{program} timed out"))?
        .map_err(|e| e.to_string())?;

    if output.status.success() {
        info!(%domain, "certificate renewal command succeeded");
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        warn!(%domain, %stderr, "certificate renewal command failed");
        Err(format!("{program} exited with {}", output.status))
    }
}
