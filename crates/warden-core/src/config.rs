//! warden.toml configuration parser.
//!
//! Every field has a default, so an empty file is a valid configuration.
//! Environment variables are applied on top of the file by [`WardenConfig::load`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::duration::parse_duration;
use crate::types::{CertSpec, ServiceSpec, TunnelSpec};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render configuration: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("invalid duration for {field}: {value:?}")]
    InvalidDuration { field: &'static str, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WardenConfig {
    /// Label identifying this host in alerts.
    pub host_label: String,
    /// Directory holding per-unit restart records.
    pub state_dir: PathBuf,
    /// Append-only supervisor log.
    pub log_file: PathBuf,
    /// Size above which the log is rotated to `<log_file>.1`.
    pub log_max_bytes: u64,
    pub escalation: EscalationConfig,
    pub probes: ProbeConfig,
    pub control_api: ControlApiConfig,
    pub alert: AlertConfig,
    pub proxy: ProxyConfig,
    pub certs: CertConfig,
    pub remediation: RemediationConfig,
    pub services: Vec<ServiceSpec>,
    pub tunnels: Vec<TunnelSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    pub max_restarts: u32,
    pub reset_window: String,
    pub settle: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub connect_timeout: String,
    pub port_retry_delay: String,
    pub latency_degraded_ms: u64,
    pub cert_warning_days: i64,
    pub disk_path: PathBuf,
    pub disk_degraded_pct: u64,
    pub disk_failed_pct: u64,
    pub memory_degraded_pct: u64,
    pub memory_failed_pct: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlApiConfig {
    pub url: String,
    /// Bearer secret; empty means no Authorization header.
    pub secret: String,
    pub timeout: String,
    pub test_url: String,
    pub test_timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    None,
    ChatBot,
    Json,
    ChatId,
}

impl TransportKind {
    fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "none" | "" => Some(TransportKind::None),
            "chat-bot" => Some(TransportKind::ChatBot),
            "json" => Some(TransportKind::Json),
            "chat-id" => Some(TransportKind::ChatId),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub transport: TransportKind,
    pub endpoint: Option<String>,
    pub chat_id: Option<String>,
    pub timeout: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Unit reloaded when every tunnel is down at once.
    pub unit: String,
    /// The live, mutable proxy configuration document.
    pub config_path: PathBuf,
    pub backup_dir: PathBuf,
    /// Validator argv; the document path is appended.
    pub check_command: Vec<String>,
    pub check_timeout: String,
    /// Tag of the terminal best-of aggregation outbound.
    pub aggregation_group: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CertConfig {
    pub base_dir: PathBuf,
    /// Opaque renewal action; the domain is appended. Empty disables it.
    pub renew_command: Vec<String>,
    pub domains: Vec<CertSpec>,
    /// Also check every `<base_dir>/<domain>/fullchain.pem` found on disk.
    pub discover: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemediationConfig {
    pub log_dirs: Vec<PathBuf>,
    pub max_log_age: String,
    pub drop_caches: bool,
    pub drop_caches_path: PathBuf,
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            host_label: default_host_label(),
            state_dir: PathBuf::from("/var/lib/warden"),
            log_file: PathBuf::from("/var/log/warden/watchdog.log"),
            log_max_bytes: 10 * 1024 * 1024,
            escalation: EscalationConfig::default(),
            probes: ProbeConfig::default(),
            control_api: ControlApiConfig::default(),
            alert: AlertConfig::default(),
            proxy: ProxyConfig::default(),
            certs: CertConfig::default(),
            remediation: RemediationConfig::default(),
            services: Vec::new(),
            tunnels: Vec::new(),
        }
    }
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            max_restarts: 5,
            reset_window: "30m".to_string(),
            settle: "3s".to_string(),
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            connect_timeout: "3s".to_string(),
            port_retry_delay: "5s".to_string(),
            latency_degraded_ms: 2000,
            cert_warning_days: 14,
            disk_path: PathBuf::from("/"),
            disk_degraded_pct: 80,
            disk_failed_pct: 90,
            memory_degraded_pct: 80,
            memory_failed_pct: 90,
        }
    }
}

impl Default for ControlApiConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:9090".to_string(),
            secret: String::new(),
            timeout: "5s".to_string(),
            test_url: "https://www.gstatic.com/generate_204".to_string(),
            test_timeout_ms: 5000,
        }
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::None,
            endpoint: None,
            chat_id: None,
            timeout: "5s".to_string(),
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            unit: "sing-box".to_string(),
            config_path: PathBuf::from("/etc/sing-box/config.json"),
            backup_dir: PathBuf::from("/var/lib/warden/backups"),
            check_command: vec!["sing-box".to_string(), "check".to_string(), "-c".to_string()],
            check_timeout: "10s".to_string(),
            aggregation_group: "auto-best".to_string(),
        }
    }
}

impl Default for CertConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("/etc/nginx/ssl"),
            renew_command: Vec::new(),
            domains: Vec::new(),
            discover: true,
        }
    }
}

impl Default for RemediationConfig {
    fn default() -> Self {
        Self {
            log_dirs: vec![PathBuf::from("/var/log/sing-box"), PathBuf::from("/var/log/nginx")],
            max_log_age: "7d".to_string(),
            drop_caches: false,
            drop_caches_path: PathBuf::from("/proc/sys/vm/drop_caches"),
        }
    }
}

fn default_host_label() -> String {
    std::fs::read_to_string("/proc/sys/kernel/hostname")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

impl WardenConfig {
    /// Parse a configuration file without applying overrides.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// Read the file (if present), apply environment overrides, and validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::load_with(path, |key| std::env::var(key).ok())
    }

    /// [`WardenConfig::load`] with overrides taken from `lookup`.
    pub fn load_with<F>(path: &Path, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = if path.exists() {
            Self::from_file(path)?
        } else {
            Self::default()
        };
        config.apply_overrides(lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `WARDEN_*` overrides from the given lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("WARDEN_HOST_LABEL") {
            self.host_label = v;
        }
        if let Some(v) = lookup("WARDEN_STATE_DIR") {
            self.state_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("WARDEN_MAX_RESTARTS") {
            self.escalation.max_restarts = v.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!("WARDEN_MAX_RESTARTS is not a number: {v:?}"))
            })?;
        }
        if let Some(v) = lookup("WARDEN_RESET_WINDOW") {
            self.escalation.reset_window = v;
        }
        if let Some(v) = lookup("WARDEN_ALERT_TRANSPORT") {
            self.alert.transport = TransportKind::parse(&v).ok_or_else(|| {
                ConfigError::Invalid(format!("unknown alert transport: {v:?}"))
            })?;
        }
        if let Some(v) = lookup("WARDEN_ALERT_ENDPOINT") {
            self.alert.endpoint = Some(v);
        }
        if let Some(v) = lookup("WARDEN_ALERT_CHAT_ID") {
            self.alert.chat_id = Some(v);
        }
        if let Some(v) = lookup("WARDEN_CONTROL_API") {
            self.control_api.url = v;
        }
        if let Some(v) = lookup("WARDEN_CONTROL_SECRET") {
            self.control_api.secret = v;
        }
        Ok(())
    }

    /// Reject configurations that would misbehave at sweep time.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.reset_window()?;
        self.settle()?;
        self.connect_timeout()?;
        self.port_retry_delay()?;
        self.control_api_timeout()?;
        self.alert_timeout()?;
        self.check_timeout()?;
        self.max_log_age()?;

        if self.escalation.max_restarts == 0 {
            return Err(ConfigError::Invalid(
                "escalation.max_restarts must be at least 1".to_string(),
            ));
        }
        let endpoint_missing = self.alert.endpoint.as_deref().is_none_or(str::is_empty);
        if self.alert.transport != TransportKind::None && endpoint_missing {
            return Err(ConfigError::Invalid(
                "alert.endpoint is required for webhook transports".to_string(),
            ));
        }
        if self.alert.transport == TransportKind::ChatId
            && self.alert.chat_id.as_deref().is_none_or(str::is_empty)
        {
            return Err(ConfigError::Invalid(
                "alert.chat_id is required for the chat-id transport".to_string(),
            ));
        }
        if self.proxy.check_command.is_empty() {
            return Err(ConfigError::Invalid("proxy.check_command is empty".to_string()));
        }
        for (field, degraded, failed) in [
            ("disk", self.probes.disk_degraded_pct, self.probes.disk_failed_pct),
            ("memory", self.probes.memory_degraded_pct, self.probes.memory_failed_pct),
        ] {
            if degraded > failed || failed > 100 {
                return Err(ConfigError::Invalid(format!(
                    "{field} thresholds must satisfy degraded <= failed <= 100"
                )));
            }
        }
        Ok(())
    }

    pub fn reset_window(&self) -> Result<Duration, ConfigError> {
        duration_field("escalation.reset_window", &self.escalation.reset_window)
    }

    pub fn settle(&self) -> Result<Duration, ConfigError> {
        duration_field("escalation.settle", &self.escalation.settle)
    }

    pub fn connect_timeout(&self) -> Result<Duration, ConfigError> {
        duration_field("probes.connect_timeout", &self.probes.connect_timeout)
    }

    pub fn port_retry_delay(&self) -> Result<Duration, ConfigError> {
        duration_field("probes.port_retry_delay", &self.probes.port_retry_delay)
    }

    pub fn control_api_timeout(&self) -> Result<Duration, ConfigError> {
        duration_field("control_api.timeout", &self.control_api.timeout)
    }

    pub fn alert_timeout(&self) -> Result<Duration, ConfigError> {
        duration_field("alert.timeout", &self.alert.timeout)
    }

    pub fn check_timeout(&self) -> Result<Duration, ConfigError> {
        duration_field("proxy.check_timeout", &self.proxy.check_timeout)
    }

    pub fn max_log_age(&self) -> Result<Duration, ConfigError> {
        duration_field("remediation.max_log_age", &self.remediation.max_log_age)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Starter configuration for a single proxy host.
    pub fn scaffold() -> Self {
        WardenConfig {
            services: vec![
                ServiceSpec {
                    name: "proxy-core".to_string(),
                    unit: "sing-box".to_string(),
                    check: Some("127.0.0.1:443".to_string()),
                },
                ServiceSpec {
                    name: "reverse-proxy".to_string(),
                    unit: "nginx".to_string(),
                    check: Some("127.0.0.1:80".to_string()),
                },
                ServiceSpec {
                    name: "panel".to_string(),
                    unit: "sing-box-panel".to_string(),
                    check: Some("127.0.0.1:8080".to_string()),
                },
            ],
            tunnels: vec![
                TunnelSpec::new("wg-jp", "Japan"),
                TunnelSpec::new("wg-sg", "Singapore"),
                TunnelSpec::new("wg-uk", "United Kingdom"),
            ],
            ..Self::default()
        }
    }
}

fn duration_field(field: &'static str, value: &str) -> Result<Duration, ConfigError> {
    parse_duration(value).ok_or_else(|| ConfigError::InvalidDuration {
        field,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_file_yields_documented_defaults() {
        let config: WardenConfig = toml::from_str("").unwrap();
        config.validate().unwrap();
        assert_eq!(config.escalation.max_restarts, 5);
        assert_eq!(config.reset_window().unwrap(), Duration::from_secs(1800));
        assert_eq!(config.settle().unwrap(), Duration::from_secs(3));
        assert_eq!(config.port_retry_delay().unwrap(), Duration::from_secs(5));
        assert_eq!(config.probes.latency_degraded_ms, 2000);
        assert_eq!(config.probes.cert_warning_days, 14);
        assert_eq!(config.alert_timeout().unwrap(), Duration::from_secs(5));
        assert_eq!(config.proxy.aggregation_group, "auto-best");
    }

    #[test]
    fn parse_services_and_tunnels() {
        let toml_str = r#"
host_label = "hk-a"

[escalation]
max_restarts = 3

[[services]]
name = "proxy-core"
unit = "sing-box"
check = "127.0.0.1:443"

[[services]]
name = "panel"
unit = "sing-box-panel"

[[tunnels]]
tag = "wg-jp"
locale = "Japan"
"#;
        let config: WardenConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host_label, "hk-a");
        assert_eq!(config.escalation.max_restarts, 3);
        assert_eq!(config.services.len(), 2);
        assert_eq!(config.services[0].check.as_deref(), Some("127.0.0.1:443"));
        assert!(config.services[1].check.is_none());
        assert_eq!(config.tunnels[0].control_segments(), vec!["proxies", "wg-jp"]);
    }

    #[test]
    fn env_overrides_apply_on_top_of_file() {
        let mut config = WardenConfig::default();
        config
            .apply_overrides(env(&[
                ("WARDEN_MAX_RESTARTS", "7"),
                ("WARDEN_RESET_WINDOW", "1h"),
                ("WARDEN_ALERT_TRANSPORT", "chat-id"),
                ("WARDEN_ALERT_ENDPOINT", "https://api.example.com/bot/sendMessage"),
                ("WARDEN_ALERT_CHAT_ID", "-100123"),
                ("WARDEN_CONTROL_SECRET", "s3cret"),
            ]))
            .unwrap();
        config.validate().unwrap();

        assert_eq!(config.escalation.max_restarts, 7);
        assert_eq!(config.reset_window().unwrap(), Duration::from_secs(3600));
        assert_eq!(config.alert.transport, TransportKind::ChatId);
        assert_eq!(config.alert.chat_id.as_deref(), Some("-100123"));
        assert_eq!(config.control_api.secret, "s3cret");
    }

    #[test]
    fn bad_env_values_are_rejected() {
        let mut config = WardenConfig::default();
        assert!(config
            .apply_overrides(env(&[("WARDEN_MAX_RESTARTS", "many")]))
            .is_err());
        assert!(config
            .apply_overrides(env(&[("WARDEN_ALERT_TRANSPORT", "carrier-pigeon")]))
            .is_err());
    }

    #[test]
    fn validate_rejects_webhook_without_endpoint() {
        let mut config = WardenConfig::default();
        config.alert.transport = TransportKind::Json;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn validate_rejects_bad_duration_and_zero_max() {
        let mut config = WardenConfig::default();
        config.escalation.reset_window = "half an hour".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidDuration { field: "escalation.reset_window", .. })
        ));

        let mut config = WardenConfig::default();
        config.escalation.max_restarts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = WardenConfig::load_with(&dir.path().join("absent.toml"), env(&[])).unwrap();
        assert!(config.services.is_empty());
        assert_eq!(config.escalation.max_restarts, 5);
        assert_eq!(config.host_label, WardenConfig::default().host_label);
    }

    #[test]
    fn load_applies_injected_overrides_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("warden.toml");
        std::fs::write(&path, "[escalation]\nmax_restarts = 3\n").unwrap();

        let config = WardenConfig::load_with(&path, env(&[("WARDEN_MAX_RESTARTS", "7")])).unwrap();
        assert_eq!(config.escalation.max_restarts, 7);
        assert!(WardenConfig::load_with(&path, env(&[("WARDEN_MAX_RESTARTS", "0")])).is_err());
    }

    #[test]
    fn scaffold_round_trips_through_toml() {
        let rendered = WardenConfig::scaffold().to_toml_string().unwrap();
        let parsed: WardenConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.services.len(), 3);
        assert_eq!(parsed.tunnels.len(), 3);
        assert!(rendered.contains("sing-box"));
    }
}
