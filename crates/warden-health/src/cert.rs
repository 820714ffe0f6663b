//! Certificate expiry probe.
//!
//! Expiry and issuer are read with `openssl x509 -noout -enddate -issuer`,
//! the same metadata the certificate collaborator relies on. Records are
//! recomputed on every probe and never persisted.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

use warden_core::CertSpec;

use crate::probe::ProbeOutcome;

#[derive(Debug, Error)]
pub enum CertError {
    #[error("certificate file missing: {0}")]
    Missing(PathBuf),

    #[error("openssl failed: {0}")]
    Openssl(String),

    #[error("openssl timed out")]
    Timeout,

    #[error("cannot parse expiry: {0}")]
    Parse(String),
}

/// Expiry metadata for one domain's certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertRecord {
    pub domain: String,
    pub path: PathBuf,
    pub expires_at: DateTime<Utc>,
    /// Issuer distinguished name as openssl prints it.
    pub issuer: Option<String>,
}

impl CertRecord {
    /// Whole days until expiry (negative once expired).
    pub fn days_left(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_days()
    }
}

/// Parse `notAfter=Mar 10 12:00:00 2026 GMT` (day may be space padded).
pub fn parse_enddate(output: &str) -> Result<DateTime<Utc>, CertError> {
    let line = output
        .lines()
        .find_map(|l| l.trim().strip_prefix("notAfter="))
        .ok_or_else(|| CertError::Parse(output.trim().to_string()))?;
    let normalized = line.split_whitespace().collect::<Vec<_>>().join(" ");
    NaiveDateTime::parse_from_str(&normalized, "%b %d %H:%M:%S %Y GMT")
        .map(|naive| naive.and_utc())
        .map_err(|e| CertError::Parse(format!("{normalized}: {e}")))
}

/// Pull the issuer out of `issuer=C = US, O = Let's Encrypt, CN = R3`.
pub fn parse_issuer(output: &str) -> Option<String> {
    output
        .lines()
        .find_map(|l| l.trim().strip_prefix("issuer="))
        .map(str::trim)
        .filter(|issuer| !issuer.is_empty())
        .map(str::to_string)
}

/// Read a certificate's expiry and issuer via openssl.
pub async fn read_cert_metadata(
    path: &Path,
    timeout: Duration,
) -> Result<(DateTime<Utc>, Option<String>), CertError> {
    if !path.exists() {
        return Err(CertError::Missing(path.to_path_buf()));
    }

    let child = Command::new("openssl")
        .args(["x509", "-noout", "-enddate", "-issuer", "-in"])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| CertError::Openssl(e.to_string()))?;

    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| CertError::Timeout)?
        .map_err(|e| CertError::Openssl(e.to_string()))?;

    if !output.status.success() {
        return Err(CertError::Openssl(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok((parse_enddate(&stdout)?, parse_issuer(&stdout)))
}

/// Domains with a `<base>/<domain>/fullchain.pem`, sorted. An unreadable
/// base directory yields nothing.
pub fn discover_cert_domains(base_dir: &Path) -> Vec<String> {
    let entries = match fs::read_dir(base_dir) {
        Ok(entries) => entries,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(dir = %base_dir.display(), error = %e, "cannot scan certificate directory");
            }
            return Vec::new();
        }
    };
    let mut domains: Vec<String> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_dir() && path.join("fullchain.pem").is_file())
        .filter_map(|path| path.file_name().and_then(|n| n.to_str()).map(str::to_string))
        .collect();
    domains.sort();
    domains
}

/// Configured certificates followed by discovered ones not already
/// configured. Configured entries keep their explicit paths.
pub fn cert_targets(configured: &[CertSpec], base_dir: &Path) -> Vec<CertSpec> {
    let mut targets = configured.to_vec();
    for domain in discover_cert_domains(base_dir) {
        if !targets.iter().any(|spec| spec.domain == domain) {
            targets.push(CertSpec {
                domain,
                chain: None,
                key: None,
            });
        }
    }
    targets
}

/// Classify a record: expired fails, inside the warning window degrades.
pub fn classify_cert(record: &CertRecord, now: DateTime<Utc>, warning_days: i64) -> ProbeOutcome {
    let days = record.days_left(now);
    if record.expires_at <= now {
        ProbeOutcome::failed(format!(
            "certificate for {} expired {} days ago",
            record.domain,
            -days
        ))
    } else if days < warning_days {
        ProbeOutcome::degraded(format!(
            "certificate for {} expiring soon: {days} days left",
            record.domain
        ))
    } else {
        ProbeOutcome::healthy(format!("certificate for {} valid for {days} days", record.domain))
    }
}

/// Read and classify one certificate. A chain without its private key
/// is as broken as no chain at all.
pub async fn cert_probe(
    spec: &CertSpec,
    base_dir: &Path,
    warning_days: i64,
    timeout: Duration,
) -> (Option<CertRecord>, ProbeOutcome) {
    let path = spec.chain_path(base_dir);
    match read_cert_metadata(&path, timeout).await {
        Ok((expires_at, issuer)) => {
            let record = CertRecord {
                domain: spec.domain.clone(),
                path,
                expires_at,
                issuer,
            };
            let key = spec.key_path(base_dir);
            let outcome = if key.is_file() {
                classify_cert(&record, Utc::now(), warning_days)
            } else {
                ProbeOutcome::failed(format!(
                    "key file missing for {}: {}",
                    spec.domain,
                    key.display()
                ))
            };
            debug!(domain = %spec.domain, %expires_at, status = %outcome.status, "certificate checked");
            (Some(record), outcome)
        }
        Err(CertError::Missing(p)) => (
            None,
            ProbeOutcome::failed(format!(
                "certificate file missing for {}: {}",
                spec.domain,
                p.display()
            )),
        ),
        Err(e) => (
            None,
            ProbeOutcome::unknown(format!("certificate for {} unreadable: {e}", spec.domain)),
        ),
    }
}
