//! warden-escalate — turns probe results into restarts, reloads, and alerts.
//!
//! # Escalation
//!
//! ```text
//! NORMAL ──probe FAILED──▶ RESTARTING ──restart + re-probe active──▶ NORMAL
//!                              │
//!                  counter ≥ max_restarts
//!                              ▼
//!                      PERMANENT-FAILURE  (manual reset only)
//! ```
//!
//! Every service check takes the unit's lock, evaluates the reset window,
//! probes, decides, and persists, in that order. The lock is per unit, so
//! overlapping sweeps serialize on a unit instead of losing increments.

pub mod certs;
pub mod engine;
pub mod error;
pub mod policy;
pub mod remediate;
pub mod status;
pub mod supervisor;

pub use certs::{CertVerdict, check_certs};
pub use engine::{ProbeDepth, RestartEngine, ServiceAction, ServiceVerdict, TunnelAction, TunnelVerdict};
pub use error::{EscalateError, EscalateResult};
pub use policy::EscalationPolicy;
pub use remediate::{PruneSummary, Remediator, ResourceVerdict};
pub use status::{LiveState, StatusReport, StatusRow, status_report};
pub use supervisor::{SweepMode, SweepReport, Supervisor};
