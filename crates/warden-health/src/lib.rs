//! warden-health — probes that classify a signal as healthy, degraded,
//! failed, or unknown.
//!
//! # Architecture
//!
//! ```text
//! process_probe() ── ProcessManager (systemctl)
//! port_probe()    ── TCP connect, one retry after a fixed delay
//! tunnel_probe()  ── ControlApi (hyper) → TunnelReport { cascading }
//! cert_probe()    ── openssl x509 -enddate -issuer → CertRecord
//! disk_probe() / memory_probe() ── statvfs, /proc/meminfo
//! ```
//!
//! Probes never return errors. A collaborator that cannot be reached
//! yields `ProbeStatus::Unknown`, which callers must not escalate.

pub mod cert;
pub mod control_api;
pub mod port;
pub mod probe;
pub mod process;
pub mod resource;
pub mod tunnel;

pub use cert::{CertError, CertRecord, cert_probe, cert_targets, classify_cert, discover_cert_domains};
pub use control_api::{ControlApi, ControlApiError, DelayTest};
pub use port::{port_probe, tcp_connect};
pub use probe::ProbeOutcome;
pub use process::{BoxFuture, ProcessError, ProcessManager, Systemctl, process_probe};
pub use resource::{ResourceKind, ResourceSample, Thresholds, classify_utilization, disk_probe, memory_probe};
pub use tunnel::{TunnelReport, TunnelSample, classify_delay, tunnel_probe};
