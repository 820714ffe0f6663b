//! warden-core — shared types and configuration for the Warden supervisor
//! and the outbound mutation tool.

pub mod config;
pub mod duration;
pub mod types;

pub use config::{ConfigError, WardenConfig};
pub use duration::parse_duration;
pub use types::*;
