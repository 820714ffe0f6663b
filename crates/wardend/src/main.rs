//! wardend — the Warden supervisor.
//!
//! Runs one sweep per invocation and exits; an external scheduler
//! provides the cadence.
//!
//! # Usage
//!
//! ```text
//! wardend quick-sweep                  # every 30s: unit liveness only
//! wardend full-sweep                   # every 2m: services, tunnels, certs, resources
//! wardend status                       # counters and live state, always exits 0
//! wardend reset-counters sing-box      # clear a tripped circuit breaker
//! wardend init-config > /etc/warden/warden.toml
//! ```

mod logging;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing::{info, warn};

use warden_core::WardenConfig;
use warden_escalate::{SweepMode, Supervisor, status_report};
use warden_health::Systemctl;
use warden_state::StateStore;

const STATUS_PM_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "wardend", about = "Warden supervisor for a sing-box proxy host", version)]
struct Cli {
    /// Configuration file.
    #[arg(
        long,
        global = true,
        env = "WARDEN_CONFIG",
        default_value = "/etc/warden/warden.toml"
    )]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Services (process and port), tunnels, certificates, resources.
    FullSweep,
    /// Service liveness only.
    QuickSweep,
    /// Tunnel latency only.
    TunnelsOnly,
    /// Certificate expiry only.
    CertsOnly,
    /// Zero restart counters and clear permanent failures.
    ResetCounters {
        /// Unit to reset; every stored unit when omitted.
        unit: Option<String>,
    },
    /// Print counters and live state for every unit.
    Status,
    /// Print a starter configuration.
    InitConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::FullSweep => sweep(&cli.config, SweepMode::Full).await,
        Command::QuickSweep => sweep(&cli.config, SweepMode::Quick).await,
        Command::TunnelsOnly => sweep(&cli.config, SweepMode::TunnelsOnly).await,
        Command::CertsOnly => sweep(&cli.config, SweepMode::CertsOnly).await,
        Command::ResetCounters { unit } => reset_counters(&cli.config, unit.as_deref()),
        Command::Status => {
            status(&cli.config).await;
            Ok(())
        }
        Command::InitConfig => init_config(),
    }
}

async fn sweep(config_path: &Path, mode: SweepMode) -> anyhow::Result<()> {
    let config = WardenConfig::load(config_path)?;
    let _guard = logging::init(Some((&config.log_file, config.log_max_bytes)));
    info!(config = %config_path.display(), host = %config.host_label, "configuration loaded");

    let supervisor = Supervisor::from_config(&config)?;
    let report = supervisor.run(mode).await;
    print!("{report}");
    Ok(())
}

fn reset_counters(config_path: &Path, unit: Option<&str>) -> anyhow::Result<()> {
    let config = WardenConfig::load(config_path)?;
    let _guard = logging::init(Some((&config.log_file, config.log_max_bytes)));
    let store = StateStore::open(&config.state_dir)?;

    let reset = match unit {
        Some(unit) => vec![store.reset(unit)?],
        None => store.reset_all()?,
    };
    if reset.is_empty() {
        println!("no restart counters stored");
    }
    for state in &reset {
        info!(unit = %state.unit, "restart counter reset by operator");
        println!("✓ {} reset", state.unit);
    }
    Ok(())
}

/// Never fails: a broken configuration falls back to whatever can be
/// read, and a missing state store or process manager is shown as such.
async fn status(config_path: &Path) {
    let (config, problem) = load_for_status(config_path);
    let _guard = logging::init(None);
    if let Some(problem) = problem {
        warn!(config = %config_path.display(), error = %problem, "configuration problem, showing best-effort status");
    }

    let store = match StateStore::open(&config.state_dir) {
        Ok(store) => Some(store),
        Err(e) => {
            warn!(dir = %config.state_dir.display(), error = %e, "state store unavailable");
            None
        }
    };
    let pm = Systemctl::new(STATUS_PM_TIMEOUT);
    let report = status_report(&config, store.as_ref(), &pm).await;
    print!("{report}");
}

fn load_for_status(path: &Path) -> (WardenConfig, Option<String>) {
    match WardenConfig::load(path) {
        Ok(config) => (config, None),
        Err(e) => {
            let mut config = if path.exists() {
                WardenConfig::from_file(path).unwrap_or_default()
            } else {
                WardenConfig::default()
            };
            let _ = config.apply_overrides(|key| std::env::var(key).ok());
            (config, Some(e.to_string()))
        }
    }
}

fn init_config() -> anyhow::Result<()> {
    print!("{}", WardenConfig::scaffold().to_toml_string()?);
    Ok(())
}
