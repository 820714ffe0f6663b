use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "warden",
    about = "Warden — safe edits to the sing-box outbound configuration",
    version,
    propagate_version = true
)]
struct Cli {
    /// Configuration file.
    #[arg(
        long,
        global = true,
        env = "WARDEN_CONFIG",
        default_value = "/etc/warden/warden.toml"
    )]
    config: PathBuf,

    /// Reload the proxy after a successful change without asking.
    #[arg(short, long, global = true)]
    yes: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List outbounds and the aggregation group's members
    Show {
        /// Print the whole document instead of a summary
        #[arg(long)]
        raw: bool,
    },
    /// Edit one outbound's fields.
    ///
    /// Without --field, every editable field is prompted for; a blank
    /// answer keeps the current value.
    Set {
        /// Outbound tag
        tag: String,
        /// Non-interactive assignment, e.g. peers.0.server=198.51.100.7
        #[arg(short, long = "field", value_name = "K=V")]
        fields: Vec<String>,
    },
    /// Add a tunnel and make it a member of the aggregation group
    Add {
        /// Tag of the new outbound (overrides the file's tag)
        #[arg(short, long)]
        tag: Option<String>,
        /// JSON file holding the outbound; prompted for when omitted
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
    /// Trigger latency tests through the control API
    Test {
        /// Only this tunnel
        tag: Option<String>,
    },
    /// Restore a backup (chosen from a list when no id is given)
    Rollback { id: Option<String> },
    /// Validate the live document and reload the proxy
    VerifyAndReload,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("warden=warn".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let ctx = commands::Context::load(&cli.config, cli.yes)?;

    match cli.command {
        Commands::Show { raw } => commands::show::run(&ctx, raw),
        Commands::Set { tag, fields } => commands::set::run(&ctx, &tag, &fields).await,
        Commands::Add { tag, file } => {
            commands::add::run(&ctx, tag.as_deref(), file.as_deref()).await
        }
        Commands::Test { tag } => commands::test::run(&ctx, tag.as_deref()).await,
        Commands::Rollback { id } => commands::rollback::run(&ctx, id.as_deref()).await,
        Commands::VerifyAndReload => commands::verify::run(&ctx).await,
    }
}
