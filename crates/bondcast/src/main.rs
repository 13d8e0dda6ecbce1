//! The bondcast daemon: wires config, telemetry adapters, and the
//! control loop together, then runs until interrupted. All decision
//! logic lives in `bondcast-core`; this binary is plumbing only.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use bondcast_core::Supervisor;
use bondcast_telemetry::{BondingStatsClient, IngestStatsClient};

/// bondcast -- adaptive quality control for bonded live streams
#[derive(Debug, Parser)]
#[command(name = "bondcast", version, about)]
struct Cli {
    /// Path to the config file (defaults to the platform config dir)
    #[arg(long, short = 'c', env = "BONDCAST_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count)]
    verbose: u8,

    /// Validate the configuration and print the effective settings,
    /// then exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let settings = bondcast_config::load_settings(cli.config.as_deref())?;
    let control_config = settings.control_config()?;

    if cli.check {
        println!("{}", serde_json::to_string_pretty(&control_config)?);
        return Ok(());
    }

    let network = BondingStatsClient::new(settings.network_url()?, &settings.network_transport())?;
    let ingest = IngestStatsClient::new(
        settings.ingest_url()?,
        settings.ingest.stream_key.clone(),
        settings.ingest.server,
        &settings.ingest_transport(),
    )?;

    let (supervisor, handle) = Supervisor::new(control_config, network, ingest)?;
    info!(
        network = %settings.network.stats_url,
        ingest = %settings.ingest.stats_url,
        stream_key = %settings.ingest.stream_key,
        "starting control loop"
    );

    let loop_task = tokio::spawn(supervisor.run());

    tokio::signal::ctrl_c().await?;
    info!("interrupt received, shutting down");
    handle.shutdown();
    loop_task.await?;

    Ok(())
}
