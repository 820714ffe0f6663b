//! warden-state — durable restart counters for supervised units.
//!
//! # Layout
//!
//! ```text
//! <state_dir>/units/<unit>.json   RestartState record
//! <state_dir>/units/<unit>.lock   advisory lock file
//! ```
//!
//! Supervisor invocations are short-lived and may overlap. Every
//! read-modify-write of a record happens while holding an exclusive
//! `flock` on the unit's lock file, and records are replaced by atomic
//! rename, so two sweeps cannot lose each other's increments.

pub mod error;
pub mod store;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::{StateStore, UnitLock, unit_file_stem};
pub use types::*;
