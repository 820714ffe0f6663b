//! Tunnel latency probe over the control API.

use tracing::{debug, warn};

use warden_core::{ProbeStatus, TunnelSpec, epoch_secs};

use crate::control_api::ControlApi;
use crate::probe::ProbeOutcome;

/// One tunnel's latency reading and its classification.
#[derive(Debug, Clone)]
pub struct TunnelSample {
    pub spec: TunnelSpec,
    /// Latest delay; `None` means no live sample.
    pub delay_ms: Option<u64>,
    pub at: u64,
    pub outcome: ProbeOutcome,
}

/// Result of probing the whole monitored tunnel set.
#[derive(Debug, Clone)]
pub struct TunnelReport {
    pub api_reachable: bool,
    pub samples: Vec<TunnelSample>,
    /// Every tunnel is down or degraded at once.
    pub cascading: bool,
}

impl TunnelReport {
    pub fn from_samples(samples: Vec<TunnelSample>, api_reachable: bool) -> Self {
        let cascading = api_reachable
            && !samples.is_empty()
            && samples.iter().all(|s| {
                matches!(s.outcome.status, ProbeStatus::Degraded | ProbeStatus::Failed)
            });
        Self {
            api_reachable,
            samples,
            cascading,
        }
    }

    pub fn unhealthy(&self) -> impl Iterator<Item = &TunnelSample> {
        self.samples
            .iter()
            .filter(|s| matches!(s.outcome.status, ProbeStatus::Degraded | ProbeStatus::Failed))
    }
}

/// Classify a delay sample against the latency threshold.
pub fn classify_delay(delay_ms: Option<u64>, threshold_ms: u64) -> ProbeOutcome {
    match delay_ms {
        None | Some(0) => ProbeOutcome::degraded("probe failed/offline"),
        Some(d) if d > threshold_ms => ProbeOutcome::degraded(format!("high latency {d}ms")),
        Some(d) => ProbeOutcome::healthy(format!("latency {d}ms")),
    }
}

/// Probe every tunnel. An unreachable control API marks all of them
/// unknown instead of failed, so an API outage cannot trigger restarts.
pub async fn tunnel_probe(api: &ControlApi, tunnels: &[TunnelSpec], threshold_ms: u64) -> TunnelReport {
    let mut samples = Vec::with_capacity(tunnels.len());

    for spec in tunnels {
        let at = epoch_secs();
        let segments = spec.control_segments();
        match api.proxy_delay(&segments).await {
            Ok(delay_ms) => {
                let outcome = classify_delay(delay_ms, threshold_ms);
                debug!(tag = %spec.tag, ?delay_ms, status = %outcome.status, "tunnel sampled");
                samples.push(TunnelSample {
                    spec: spec.clone(),
                    delay_ms,
                    at,
                    outcome,
                });
            }
            Err(e) if e.is_unreachable() => {
                warn!(error = %e, "control API unreachable, skipping tunnel checks");
                let samples = tunnels
                    .iter()
                    .map(|spec| TunnelSample {
                        spec: spec.clone(),
                        delay_ms: None,
                        at,
                        outcome: ProbeOutcome::unknown(format!("control API unreachable: {e}")),
                    })
                    .collect();
                return TunnelReport::from_samples(samples, false);
            }
            Err(e) => {
                warn!(tag = %spec.tag, error = %e, "tunnel sample unusable");
                samples.push(TunnelSample {
                    spec: spec.clone(),
                    delay_ms: None,
                    at,
                    outcome: ProbeOutcome::unknown(e.to_string()),
                });
            }
        }
    }

    TunnelReport::from_samples(samples, true)
}
