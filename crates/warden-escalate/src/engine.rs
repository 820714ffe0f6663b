//! Per-unit restart escalation and the tunnel reload rule.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use warden_alert::AlertSink;
use warden_core::{ProbeStatus, ServiceSpec, Severity, epoch_secs};
use warden_health::{ProbeOutcome, ProcessManager, TunnelReport, port_probe, process_probe};
use warden_state::{RestartState, StateError, StateStore, UnitLock, UnitPhase};

use crate::error::EscalateResult;
use crate::policy::EscalationPolicy;

/// How much of a service to probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeDepth {
    /// Process-manager state only.
    Liveness,
    /// Process-manager state plus the configured port check.
    Full,
}

/// What a service check did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceAction {
    /// Healthy, or unknown and therefore left alone.
    None,
    /// The unit is not enabled; the check was skipped.
    NotEnabled,
    /// Another invocation holds the unit's lock.
    Busy,
    Recovered,
    RestartFailed(String),
    /// The restart budget ran out on this check.
    Tripped,
    /// Already permanently failed; no restart, no new alert.
    Suppressed,
}

impl fmt::Display for ServiceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceAction::None => f.write_str("none"),
            ServiceAction::NotEnabled => f.write_str("skipped (not enabled)"),
            ServiceAction::Busy => f.write_str("skipped (locked by another run)"),
            ServiceAction::Recovered => f.write_str("restarted, recovered"),
            ServiceAction::RestartFailed(detail) => write!(f, "restart failed: {detail}"),
            ServiceAction::Tripped => f.write_str("restart limit reached"),
            ServiceAction::Suppressed => f.write_str("held (permanent failure)"),
        }
    }
}

/// Result of one service check.
#[derive(Debug, Clone)]
pub struct ServiceVerdict {
    pub name: String,
    pub unit: String,
    pub outcome: Option<ProbeOutcome>,
    pub phase: UnitPhase,
    pub count: u32,
    /// The counter was forgiven before probing.
    pub reset: bool,
    pub action: ServiceAction,
}

impl ServiceVerdict {
    fn new(
        spec: &ServiceSpec,
        state: &RestartState,
        outcome: Option<ProbeOutcome>,
        reset: bool,
        action: ServiceAction,
    ) -> Self {
        Self {
            name: spec.name.clone(),
            unit: spec.unit.clone(),
            outcome,
            phase: state.phase,
            count: state.count,
            reset,
            action,
        }
    }
}

/// What the tunnel handler did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunnelAction {
    /// All tunnels healthy, or the control API was unreachable.
    None,
    /// One warning per degraded tunnel.
    Alerted(usize),
    /// Cascading failure; the proxy core was reloaded once.
    Reloaded,
    ReloadFailed(String),
}

impl fmt::Display for TunnelAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunnelAction::None => f.write_str("none"),
            TunnelAction::Alerted(n) => write!(f, "{n} tunnel alert(s) sent"),
            TunnelAction::Reloaded => f.write_str("cascading failure, proxy reloaded"),
            TunnelAction::ReloadFailed(e) => write!(f, "cascading failure, reload failed: {e}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TunnelVerdict {
    pub report: TunnelReport,
    pub action: TunnelAction,
}

/// Applies the escalation policy to services and tunnels.
#[derive(Clone)]
pub struct RestartEngine {
    store: StateStore,
    pm: Arc<dyn ProcessManager>,
    alerts: Arc<dyn AlertSink>,
    policy: EscalationPolicy,
    connect_timeout: Duration,
    port_retry_delay: Duration,
}

impl RestartEngine {
    pub fn new(
        store: StateStore,
        pm: Arc<dyn ProcessManager>,
        alerts: Arc<dyn AlertSink>,
        policy: EscalationPolicy,
    ) -> Self {
        Self {
            store,
            pm,
            alerts,
            policy,
            connect_timeout: Duration::from_secs(3),
            port_retry_delay: Duration::from_secs(5),
        }
    }

    /// Override port probe timing (connect timeout, wait before the retry).
    pub fn with_port_timing(mut self, connect_timeout: Duration, retry_delay: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self.port_retry_delay = retry_delay;
        self
    }

    pub fn policy(&self) -> &EscalationPolicy {
        &self.policy
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Check one service and escalate if it has failed.
    pub async fn check_service(
        &self,
        spec: &ServiceSpec,
        depth: ProbeDepth,
    ) -> EscalateResult<ServiceVerdict> {
        let mut lock = match self.store.try_lock(&spec.unit) {
            Ok(lock) => lock,
            Err(StateError::Busy(_)) => {
                info!(unit = %spec.unit, "unit locked by another invocation, skipping");
                let state = self
                    .store
                    .get(&spec.unit)
                    .unwrap_or_else(|_| RestartState::new(&spec.unit));
                return Ok(ServiceVerdict::new(spec, &state, None, false, ServiceAction::Busy));
            }
            Err(e) => return Err(e.into()),
        };

        let reset = lock
            .state()
            .reset_due(epoch_secs(), self.policy.reset_window.as_secs());
        if reset {
            let previous = lock.state().count;
            lock.state_mut().clear();
            lock.save()?;
            info!(unit = %spec.unit, previous, "restart counter reset after healthy window");
        }

        let Some(outcome) = self.probe(spec, depth).await else {
            return Ok(ServiceVerdict::new(
                spec,
                lock.state(),
                None,
                reset,
                ServiceAction::NotEnabled,
            ));
        };

        let action = match outcome.status {
            ProbeStatus::Failed => self.escalate(spec, &mut lock, &outcome).await?,
            ProbeStatus::Healthy => {
                if lock.state().phase == UnitPhase::Restarting {
                    lock.state_mut().phase = UnitPhase::Normal;
                    lock.save()?;
                }
                debug!(unit = %spec.unit, "service healthy");
                ServiceAction::None
            }
            ProbeStatus::Degraded | ProbeStatus::Unknown => {
                warn!(unit = %spec.unit, status = %outcome.status, reason = %outcome.reason, "service not escalated");
                ServiceAction::None
            }
        };

        Ok(ServiceVerdict::new(spec, lock.state(), Some(outcome), reset, action))
    }

    async fn probe(&self, spec: &ServiceSpec, depth: ProbeDepth) -> Option<ProbeOutcome> {
        let process = process_probe(self.pm.as_ref(), &spec.unit).await?;
        if depth == ProbeDepth::Liveness || !process.status.is_healthy() {
            return Some(process);
        }
        let Some(addr) = &spec.check else {
            return Some(process);
        };
        let port = port_probe(addr, self.connect_timeout, self.port_retry_delay).await;
        if port.status.is_healthy() {
            Some(process)
        } else {
            Some(port)
        }
    }

    async fn escalate(
        &self,
        spec: &ServiceSpec,
        lock: &mut UnitLock,
        outcome: &ProbeOutcome,
    ) -> EscalateResult<ServiceAction> {
        let max = self.policy.max_restarts;

        if lock.state().phase == UnitPhase::PermanentFailure {
            debug!(unit = %spec.unit, "unit permanently failed, not restarting");
            return Ok(ServiceAction::Suppressed);
        }

        if lock.state().exhausted(max) {
            lock.state_mut().phase = UnitPhase::PermanentFailure;
            lock.save()?;
            error!(unit = %spec.unit, count = lock.state().count, "restart limit reached");
            self.alerts
                .notify(
                    &format!(
                        "{} ({}) reached the restart limit ({max}/{max}) and is still failing: {}. \
                         Automatic restarts stopped; run `wardend reset-counters {}` once fixed.",
                        spec.name, spec.unit, outcome.reason, spec.unit
                    ),
                    Severity::Critical,
                )
                .await;
            return Ok(ServiceAction::Tripped);
        }

        warn!(unit = %spec.unit, reason = %outcome.reason, "service failed, restarting");
        let restarted = self.pm.restart(&spec.unit).await;
        if let Err(e) = &restarted {
            warn!(unit = %spec.unit, error = %e, "restart action failed");
        }
        tokio::time::sleep(self.policy.settle).await;
        let active = matches!(self.pm.is_active(&spec.unit).await, Ok(true));

        let state = lock.state_mut();
        state.record_restart(epoch_secs());
        state.phase = if active {
            UnitPhase::Normal
        } else {
            UnitPhase::Restarting
        };
        let count = state.count;
        lock.save()?;

        if active {
            info!(unit = %spec.unit, count, "service recovered after restart");
            self.alerts
                .notify(
                    &format!(
                        "{} ({}) recovered after restart {count}/{max} (was: {})",
                        spec.name, spec.unit, outcome.reason
                    ),
                    Severity::Info,
                )
                .await;
            Ok(ServiceAction::Recovered)
        } else {
            let detail = match restarted {
                Err(e) => e.to_string(),
                Ok(()) => format!("{} still not active after restart", spec.unit),
            };
            error!(unit = %spec.unit, count, %detail, "restart did not recover service");
            self.alerts
                .notify(
                    &format!("{} ({}) restart {count}/{max} failed: {detail}", spec.name, spec.unit),
                    Severity::Critical,
                )
                .await;
            Ok(ServiceAction::RestartFailed(detail))
        }
    }

    /// React to a tunnel report. A cascading failure reloads the proxy
    /// core once, bypassing the per-unit restart counters.
    pub async fn handle_tunnels(&self, proxy_unit: &str, report: TunnelReport) -> TunnelVerdict {
        if !report.api_reachable {
            return TunnelVerdict {
                report,
                action: TunnelAction::None,
            };
        }

        if report.cascading {
            let summary = report
                .samples
                .iter()
                .map(|s| format!("{}: {}", s.spec.tag, s.outcome.reason))
                .collect::<Vec<_>>()
                .join(", ");
            error!(tunnels = report.samples.len(), "cascading tunnel failure, reloading {proxy_unit}");

            let (action, result) = match self.pm.reload(proxy_unit).await {
                Ok(()) => (TunnelAction::Reloaded, format!("reloaded {proxy_unit}")),
                Err(e) => {
                    warn!(unit = %proxy_unit, error = %e, "reload failed");
                    (TunnelAction::ReloadFailed(e.to_string()), format!("reload failed: {e}"))
                }
            };
            self.alerts
                .notify(
                    &format!(
                        "cascading tunnel failure, all {} tunnels down ({summary}); {result}",
                        report.samples.len()
                    ),
                    Severity::Critical,
                )
                .await;
            return TunnelVerdict { report, action };
        }

        let mut alerted = 0;
        for sample in report.unhealthy() {
            let locale = if sample.spec.locale.is_empty() {
                String::new()
            } else {
                format!(" ({})", sample.spec.locale)
            };
            self.alerts
                .notify(
                    &format!("tunnel {}{locale} {}", sample.spec.tag, sample.outcome.reason),
                    Severity::Warning,
                )
                .await;
            alerted += 1;
        }

        let action = if alerted == 0 {
            TunnelAction::None
        } else {
            TunnelAction::Alerted(alerted)
        };
        TunnelVerdict { report, action }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    use warden_alert::Delivery;
    use warden_core::{BoxFuture, TunnelSpec};
    use warden_health::{ProcessError, TunnelSample};

    use super::*;

    #[derive(Default)]
    struct FakePm {
        disabled: bool,
        active: AtomicBool,
        restart_recovers: bool,
        restarts: AtomicU32,
        reloads: AtomicU32,
    }

    impl ProcessManager for FakePm {
        fn is_enabled<'a>(&'a self, _unit: &'a str) -> BoxFuture<'a, Result<bool, ProcessError>> {
            Box::pin(async move { Ok(!self.disabled) })
        }

        fn is_active<'a>(&'a self, _unit: &'a str) -> BoxFuture<'a, Result<bool, ProcessError>> {
            Box::pin(async move { Ok(self.active.load(Ordering::SeqCst)) })
        }

        fn restart<'a>(&'a self, _unit: &'a str) -> BoxFuture<'a, Result<(), ProcessError>> {
            Box::pin(async move {
                self.restarts.fetch_add(1, Ordering::SeqCst);
                if self.restart_recovers {
                    self.active.store(true, Ordering::SeqCst);
                }
                Ok(())
            })
        }

        fn reload<'a>(&'a self, _unit: &'a str) -> BoxFuture<'a, Result<(), ProcessError>> {
            Box::pin(async move {
                self.reloads.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }
    }

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

    fn spec() -> ServiceSpec {
        ServiceSpec {
            name: "proxy-core".to_string(),
            unit: "sing-box".to_string(),
            check: None,
        }
    }

    fn engine(dir: &std::path::Path, pm: Arc<FakePm>, sink: Arc<Sink>) -> RestartEngine {
        let policy = EscalationPolicy {
            settle: Duration::ZERO,
            ..EscalationPolicy::default()
        };
        RestartEngine::new(StateStore::open(dir).unwrap(), pm, sink, policy)
    }

    #[tokio::test]
    async fn failed_service_recovers_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        let pm = Arc::new(FakePm {
            restart_recovers: true,
            ..FakePm::default()
        });
        let sink = Arc::new(Sink::default());
        let engine = engine(dir.path(), pm.clone(), sink.clone());

        let verdict = engine.check_service(&spec(), ProbeDepth::Liveness).await.unwrap();
        assert_eq!(verdict.action, ServiceAction::Recovered);
        assert_eq!(verdict.count, 1);
        assert_eq!(verdict.phase, UnitPhase::Normal);
        assert_eq!(pm.restarts.load(Ordering::SeqCst), 1);

        let alerts = sink.0.lock().unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].0, Severity::Info);
        assert!(alerts[0].1.contains("recovered"));
    }

    #[tokio::test]
    async fn healthy_service_takes_no_action() {
        let dir = tempfile::tempdir().unwrap();
        let pm = Arc::new(FakePm::default());
        pm.active.store(true, Ordering::SeqCst);
        let sink = Arc::new(Sink::default());
        let engine = engine(dir.path(), pm.clone(), sink.clone());

        let verdict = engine.check_service(&spec(), ProbeDepth::Full).await.unwrap();
        assert_eq!(verdict.action, ServiceAction::None);
        assert_eq!(pm.restarts.load(Ordering::SeqCst), 0);
        assert!(sink.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn disabled_unit_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let pm = Arc::new(FakePm {
            disabled: true,
            ..FakePm::default()
        });
        let engine = engine(dir.path(), pm.clone(), Arc::new(Sink::default()));

        let verdict = engine.check_service(&spec(), ProbeDepth::Full).await.unwrap();
        assert_eq!(verdict.action, ServiceAction::NotEnabled);
        assert!(verdict.outcome.is_none());
        assert_eq!(pm.restarts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn locked_unit_is_reported_busy() {
        let dir = tempfile::tempdir().unwrap();
        let pm = Arc::new(FakePm::default());
        let engine = engine(dir.path(), pm.clone(), Arc::new(Sink::default()));

        let _held = engine.store().lock("sing-box").unwrap();
        let verdict = engine.check_service(&spec(), ProbeDepth::Full).await.unwrap();
        assert_eq!(verdict.action, ServiceAction::Busy);
        assert_eq!(pm.restarts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failing_port_check_escalates_an_active_unit() {
        let dir = tempfile::tempdir().unwrap();
        let pm = Arc::new(FakePm::default());
        pm.active.store(true, Ordering::SeqCst);
        let engine = engine(dir.path(), pm.clone(), Arc::new(Sink::default()))
            .with_port_timing(Duration::from_millis(200), Duration::from_millis(10));

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let spec = ServiceSpec {
            check: Some(addr.to_string()),
            ..spec()
        };

        let verdict = engine.check_service(&spec, ProbeDepth::Full).await.unwrap();
        assert_eq!(verdict.outcome.unwrap().status, ProbeStatus::Failed);
        assert_eq!(verdict.action, ServiceAction::Recovered);
        assert_eq!(pm.restarts.load(Ordering::SeqCst), 1);
    }

    fn sample(tag: &str, outcome: ProbeOutcome) -> TunnelSample {
        TunnelSample {
            spec: TunnelSpec::new(tag, ""),
            delay_ms: None,
            at: 0,
            outcome,
        }
    }

    #[tokio::test]
    async fn partial_tunnel_outage_alerts_each_degraded_tunnel() {
        let dir = tempfile::tempdir().unwrap();
        let pm = Arc::new(FakePm::default());
        let sink = Arc::new(Sink::default());
        let engine = engine(dir.path(), pm.clone(), sink.clone());

        let report = TunnelReport::from_samples(
            vec![
                sample("wg-jp", ProbeOutcome::healthy("latency 80ms")),
                sample("wg-sg", ProbeOutcome::degraded("probe failed/offline")),
                sample("wg-uk", ProbeOutcome::unknown("malformed")),
            ],
            true,
        );
        let verdict = engine.handle_tunnels("sing-box", report).await;

        assert_eq!(verdict.action, TunnelAction::Alerted(1));
        assert_eq!(pm.reloads.load(Ordering::SeqCst), 0);
        let alerts = sink.0.lock().unwrap();
        assert_eq!(alerts[0].0, Severity::Warning);
        assert!(alerts[0].1.contains("wg-sg"));
    }

    #[tokio::test]
    async fn unreachable_api_does_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let pm = Arc::new(FakePm::default());
        let sink = Arc::new(Sink::default());
        let engine = engine(dir.path(), pm.clone(), sink.clone());

        let report = TunnelReport::from_samples(
            vec![sample("wg-jp", ProbeOutcome::unknown("control API unreachable"))],
            false,
        );
        let verdict = engine.handle_tunnels("sing-box", report).await;
        assert_eq!(verdict.action, TunnelAction::None);
        assert_eq!(pm.reloads.load(Ordering::SeqCst), 0);
        assert!(sink.0.lock().unwrap().is_empty());
    }
}
