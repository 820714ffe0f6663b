//! One sweep of the supervisor: pick the probes for the mode, run them,
//! escalate, and collect a report.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{error, info};

use warden_alert::{AlertDispatcher, AlertSink};
use warden_core::{CertSpec, ServiceSpec, TunnelSpec, WardenConfig};
use warden_health::{
    ControlApi, ProcessManager, Systemctl, Thresholds, cert_targets, disk_probe, memory_probe, tunnel_probe,
};
use warden_state::StateStore;

use crate::certs::{CertVerdict, check_certs};
use crate::engine::{ProbeDepth, RestartEngine, ServiceVerdict, TunnelVerdict};
use crate::error::EscalateResult;
use crate::policy::EscalationPolicy;
use crate::remediate::{Remediator, ResourceVerdict};

/// Bound on one `systemctl` call; restarts can take a while.
const PROCESS_MANAGER_TIMEOUT: Duration = Duration::from_secs(30);

/// Which signals a sweep covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepMode {
    /// Services (process + port), tunnels, certificates, resources.
    Full,
    /// Service liveness only.
    Quick,
    TunnelsOnly,
    CertsOnly,
}

impl SweepMode {
    pub fn label(&self) -> &'static str {
        match self {
            SweepMode::Full => "full-sweep",
            SweepMode::Quick => "quick-sweep",
            SweepMode::TunnelsOnly => "tunnels-only",
            SweepMode::CertsOnly => "certs-only",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SweepReport {
    pub mode: SweepMode,
    pub services: Vec<ServiceVerdict>,
    pub tunnels: Option<TunnelVerdict>,
    pub certs: Vec<CertVerdict>,
    pub resources: Vec<ResourceVerdict>,
    /// Checks that could not run at all (state store failures).
    pub errors: Vec<String>,
}

impl SweepReport {
    fn new(mode: SweepMode) -> Self {
        Self {
            mode,
            services: Vec::new(),
            tunnels: None,
            certs: Vec::new(),
            resources: Vec::new(),
            errors: Vec::new(),
        }
    }
}

impl fmt::Display for SweepReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.mode.label())?;
        for v in &self.services {
            let outcome = v
                .outcome
                .as_ref()
                .map(|o| o.to_string())
                .unwrap_or_else(|| "-".to_string());
            writeln!(
                f,
                "  service {:<14} {:<18} {:<18} restarts={} {}",
                v.name, v.unit, v.phase, v.count, outcome
            )?;
            writeln!(f, "          action: {}", v.action)?;
        }
        if let Some(t) = &self.tunnels {
            for s in &t.report.samples {
                writeln!(f, "  tunnel  {:<14} {}", s.spec.tag, s.outcome)?;
            }
            writeln!(f, "          action: {}", t.action)?;
        }
        for c in &self.certs {
            writeln!(f, "  cert    {:<30} {}", c.domain, c.outcome)?;
            if let Some(issuer) = c.record.as_ref().and_then(|r| r.issuer.as_deref()) {
                writeln!(f, "          issuer: {issuer}")?;
            }
        }
        for r in &self.resources {
            writeln!(f, "  {:<7} {}", r.sample.kind.label(), r.sample.outcome)?;
            if let Some(summary) = &r.remediation {
                writeln!(f, "          remediation: {summary}")?;
            }
        }
        for e in &self.errors {
            writeln!(f, "  error   {e}")?;
        }
        Ok(())
    }
}

/// Everything one invocation needs, built once from configuration.
pub struct Supervisor {
    engine: RestartEngine,
    alerts: Arc<dyn AlertSink>,
    api: ControlApi,
    remediator: Remediator,
    services: Vec<ServiceSpec>,
    tunnels: Vec<TunnelSpec>,
    proxy_unit: String,
    latency_degraded_ms: u64,
    cert_domains: Vec<CertSpec>,
    cert_base_dir: PathBuf,
    cert_discover: bool,
    cert_warning_days: i64,
    cert_timeout: Duration,
    renew_command: Vec<String>,
    disk_path: PathBuf,
    disk: Thresholds,
    memory: Thresholds,
}

impl Supervisor {
    /// Production wiring: systemctl, webhook dispatcher, on-disk state.
    pub fn from_config(config: &WardenConfig) -> EscalateResult<Self> {
        let store = StateStore::open(&config.state_dir)?;
        let pm = Arc::new(Systemctl::new(PROCESS_MANAGER_TIMEOUT));
        let alerts = Arc::new(AlertDispatcher::from_config(
            &config.alert,
            &config.host_label,
            config.alert_timeout()?,
        )?);
        Self::with_parts(config, store, pm, alerts)
    }

    /// Wiring with caller-supplied collaborators.
    pub fn with_parts(
        config: &WardenConfig,
        store: StateStore,
        pm: Arc<dyn ProcessManager>,
        alerts: Arc<dyn AlertSink>,
    ) -> EscalateResult<Self> {
        let engine = RestartEngine::new(store, pm, alerts.clone(), EscalationPolicy::from_config(config)?)
            .with_port_timing(config.connect_timeout()?, config.port_retry_delay()?);
        let api = ControlApi::new(
            &config.control_api.url,
            &config.control_api.secret,
            config.control_api_timeout()?,
        )?;
        let probes = &config.probes;

        Ok(Self {
            engine,
            alerts,
            api,
            remediator: Remediator::from_config(config)?,
            services: config.services.clone(),
            tunnels: config.tunnels.clone(),
            proxy_unit: config.proxy.unit.clone(),
            latency_degraded_ms: probes.latency_degraded_ms,
            cert_domains: config.certs.domains.clone(),
            cert_base_dir: config.certs.base_dir.clone(),
            cert_discover: config.certs.discover,
            cert_warning_days: probes.cert_warning_days,
            cert_timeout: config.check_timeout()?,
            renew_command: config.certs.renew_command.clone(),
            disk_path: probes.disk_path.clone(),
            disk: Thresholds {
                degraded_pct: probes.disk_degraded_pct,
                failed_pct: probes.disk_failed_pct,
            },
            memory: Thresholds {
                degraded_pct: probes.memory_degraded_pct,
                failed_pct: probes.memory_failed_pct,
            },
        })
    }

    pub fn engine(&self) -> &RestartEngine {
        &self.engine
    }

    pub async fn run(&self, mode: SweepMode) -> SweepReport {
        info!(mode = mode.label(), "sweep starting");
        let mut report = SweepReport::new(mode);

        match mode {
            SweepMode::Quick => self.sweep_services(ProbeDepth::Liveness, &mut report).await,
            SweepMode::Full => {
                self.sweep_services(ProbeDepth::Full, &mut report).await;
                report.tunnels = self.sweep_tunnels().await;
                report.certs = self.sweep_certs().await;
                report.resources = self.sweep_resources().await;
            }
            SweepMode::TunnelsOnly => report.tunnels = self.sweep_tunnels().await,
            SweepMode::CertsOnly => report.certs = self.sweep_certs().await,
        }

        info!(
            mode = mode.label(),
            services = report.services.len(),
            certs = report.certs.len(),
            errors = report.errors.len(),
            "sweep finished"
        );
        report
    }

    /// Services run concurrently; each holds only its own unit lock, so
    /// one slow port retry does not hold up the rest.
    async fn sweep_services(&self, depth: ProbeDepth, report: &mut SweepReport) {
        let mut set = JoinSet::new();
        for (index, spec) in self.services.iter().cloned().enumerate() {
            let engine = self.engine.clone();
            set.spawn(async move {
                let result = engine.check_service(&spec, depth).await;
                (index, spec, result)
            });
        }

        let mut results = Vec::with_capacity(self.services.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(r) => results.push(r),
                Err(e) => {
                    error!(error = %e, "service check task panicked");
                    report.errors.push(format!("service check aborted: {e}"));
                }
            }
        }
        results.sort_by_key(|(index, _, _)| *index);

        for (_, spec, result) in results {
            match result {
                Ok(verdict) => report.services.push(verdict),
                Err(e) => {
                    error!(unit = %spec.unit, error = %e, "service check failed");
                    report.errors.push(format!("{}: {e}", spec.unit));
                }
            }
        }
    }

    async fn sweep_tunnels(&self) -> Option<TunnelVerdict> {
        if self.tunnels.is_empty() {
            return None;
        }
        let report = tunnel_probe(&self.api, &self.tunnels, self.latency_degraded_ms).await;
        Some(self.engine.handle_tunnels(&self.proxy_unit, report).await)
    }

    async fn sweep_certs(&self) -> Vec<CertVerdict> {
        let targets = if self.cert_discover {
            cert_targets(&self.cert_domains, &self.cert_base_dir)
        } else {
            self.cert_domains.clone()
        };
        check_certs(
            &targets,
            &self.cert_base_dir,
            self.cert_warning_days,
            self.cert_timeout,
            &self.renew_command,
            self.alerts.as_ref(),
        )
        .await
    }

    async fn sweep_resources(&self) -> Vec<ResourceVerdict> {
        let samples = vec![disk_probe(&self.disk_path, self.disk), memory_probe(self.memory)];
        self.remediator.handle(samples, self.alerts.as_ref()).await
    }
}
