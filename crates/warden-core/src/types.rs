//! Shared types used across Warden crates.

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use serde::{Deserialize, Serialize};

/// Boxed, sendable future used by the collaborator traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A managed unit the supervisor keeps alive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    /// Logical name used in alerts and status output.
    pub name: String,
    /// Process-manager unit identifier (e.g. `sing-box`).
    pub unit: String,
    /// Optional `host:port` reachability check.
    #[serde(default)]
    pub check: Option<String>,
}

/// An outbound tunnel monitored through the control API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelSpec {
    pub tag: String,
    /// Expected exit region, e.g. "Japan".
    #[serde(default)]
    pub locale: String,
    /// Control-API path queried for this tunnel. Defaults to `/proxies/<tag>`.
    #[serde(default)]
    pub health_path: Option<String>,
}

impl TunnelSpec {
    pub fn new(tag: &str, locale: &str) -> Self {
        Self {
            tag: tag.to_string(),
            locale: locale.to_string(),
            health_path: None,
        }
    }

    /// Unescaped control-API path segments: `health_path` split on `/`,
    /// or `["proxies", <tag>]`.
    pub fn control_segments(&self) -> Vec<String> {
        match &self.health_path {
            Some(path) => path
                .split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            None => vec!["proxies".to_string(), self.tag.clone()],
        }
    }
}

/// A certificate pair tracked for expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertSpec {
    pub domain: String,
    #[serde(default)]
    pub chain: Option<PathBuf>,
    #[serde(default)]
    pub key: Option<PathBuf>,
}

impl CertSpec {
    /// Chain path, falling back to `<base>/<domain>/fullchain.pem`.
    pub fn chain_path(&self, base: &Path) -> PathBuf {
        self.chain
            .clone()
            .unwrap_or_else(|| base.join(&self.domain).join("fullchain.pem"))
    }

    /// Key path, falling back to `<base>/<domain>/privkey.pem`.
    pub fn key_path(&self, base: &Path) -> PathBuf {
        self.key
            .clone()
            .unwrap_or_else(|| base.join(&self.domain).join("privkey.pem"))
    }
}

/// Alert severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn label(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.label())
    }
}

/// Result class of a single probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    Healthy,
    Degraded,
    Failed,
    /// The probe could not reach its collaborator; never escalated.
    Unknown,
}

impl ProbeStatus {
    pub fn label(&self) -> &'static str {
        match self {
            ProbeStatus::Healthy => "HEALTHY",
            ProbeStatus::Degraded => "DEGRADED",
            ProbeStatus::Failed => "FAILED",
            ProbeStatus::Unknown => "UNKNOWN",
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, ProbeStatus::Healthy)
    }

    /// Severity an alert about this status carries, if any.
    pub fn alert_severity(&self) -> Option<Severity> {
        match self {
            ProbeStatus::Degraded => Some(Severity::Warning),
            ProbeStatus::Failed => Some(Severity::Critical),
            ProbeStatus::Healthy | ProbeStatus::Unknown => None,
        }
    }
}

impl fmt::Display for ProbeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.label())
    }
}

/// Seconds since the Unix epoch.
pub fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tunnel_control_segments_default_to_proxies() {
        let t = TunnelSpec::new("wg-jp", "Japan");
        assert_eq!(t.control_segments(), vec!["proxies", "wg-jp"]);

        let odd = TunnelSpec::new("jp/#1", "Japan");
        assert_eq!(odd.control_segments(), vec!["proxies", "jp/#1"]);

        let custom = TunnelSpec {
            health_path: Some("/proxies/jp-alt".to_string()),
            ..t
        };
        assert_eq!(custom.control_segments(), vec!["proxies", "jp-alt"]);
    }

    #[test]
    fn cert_paths_fall_back_to_base_dir() {
        let spec = CertSpec {
            domain: "proxy.example.com".to_string(),
            chain: None,
            key: None,
        };
        let base = Path::new("/etc/nginx/ssl");
        assert_eq!(
            spec.chain_path(base),
            PathBuf::from("/etc/nginx/ssl/proxy.example.com/fullchain.pem")
        );
        assert_eq!(
            spec.key_path(base),
            PathBuf::from("/etc/nginx/ssl/proxy.example.com/privkey.pem")
        );
    }

    #[test]
    fn only_degraded_and_failed_alert() {
        assert_eq!(ProbeStatus::Healthy.alert_severity(), None);
        assert_eq!(ProbeStatus::Unknown.alert_severity(), None);
        assert_eq!(ProbeStatus::Degraded.alert_severity(), Some(Severity::Warning));
        assert_eq!(ProbeStatus::Failed.alert_severity(), Some(Severity::Critical));
    }
}
