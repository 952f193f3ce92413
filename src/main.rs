use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use dockup::app::{App, UpdateSelection};
use dockup::config::{self, DEFAULT_WATCH_INTERVAL_SECS, UpdaterConfig};

#[derive(Parser)]
#[command(name = "dockup")]
#[command(version, about = "Container image update detection and rolling compose updates")]
struct Cli {
    /// Configuration file (defaults to $XDG_CONFIG_HOME/dockup/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Use the in-memory demo backend instead of the docker CLI
    #[arg(long, global = true)]
    demo: bool,

    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check images against their registries; all in-use images when none are given
    Check { images: Vec<String> },
    /// Print cached check results
    Status { images: Vec<String> },
    /// Pull and restart compose projects or containers
    Update(UpdateArgs),
    /// Drop cached check results
    Clear { images: Vec<String> },
    /// Re-check in-use images periodically
    Watch {
        /// Seconds between scans
        #[arg(long, default_value_t = DEFAULT_WATCH_INTERVAL_SECS)]
        interval: u64,
    },
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct UpdateArgs {
    /// Update every target with an available update
    #[arg(long)]
    all: bool,

    /// Project or container names
    targets: Vec<String>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(config::config_path);
    let updater_config = UpdaterConfig::load(&config_path)?;
    let _log_guard = dockup::logging::init(&config::log_path(), cli.verbose);

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run(cli, updater_config))
}

async fn run(cli: Cli, updater_config: UpdaterConfig) -> anyhow::Result<()> {
    let db_path = (!cli.demo).then(config::db_path);
    let app = App::new(&updater_config, cli.demo, db_path.as_deref());
    let mut stdout = std::io::stdout().lock();

    match cli.command {
        Command::Check { images } => {
            let failed = app.check(&images, &mut stdout).await?;
            if failed > 0 {
                anyhow::bail!("{} image(s) could not be checked", failed);
            }
        }
        Command::Status { images } => app.status(&images, &mut stdout)?,
        Command::Clear { images } => app.clear(&images),
        Command::Update(args) => {
            let selection = if args.all {
                UpdateSelection::All
            } else {
                UpdateSelection::Named(args.targets)
            };
            let summary = app
                .update(selection, cancel_on_ctrl_c(), &mut stdout)
                .await?;
            if summary.failed > 0 {
                anyhow::bail!("{} target(s) failed to update", summary.failed);
            }
        }
        Command::Watch { interval } => {
            info!("Watching images every {} seconds", interval);
            app.watch(Duration::from_secs(interval), cancel_on_ctrl_c())
                .await;
        }
    }

    Ok(())
}

/// Token cancelled on the first Ctrl-C
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, stopping after the current step");
                token.cancel();
            }
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
    });
    cancel
}
