//! idevhub - iOS device tracker, log streamer and app installer
//!
//! This is the binary entry point. All logic lives in the library.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use idevhub::commands;
use idevhub_app::config;
use idevhub_core::logging;
use tracing::{debug, info};

/// Track iOS devices, stream their logs and install apps
#[derive(Parser, Debug)]
#[command(name = "idevhub")]
#[command(about = "Track iOS devices, stream their logs and install apps", long_about = None)]
struct Args {
    /// Directory containing `.idevhub/config.toml` (default: current directory)
    #[arg(long, value_name = "DIR", global = true)]
    config_dir: Option<PathBuf>,

    /// Override the run-loop pump interval
    #[arg(long, value_name = "MS", global = true)]
    interval_ms: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List attached devices
    List {
        /// Print the device list as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print device connect/disconnect events as NDJSON until Ctrl-C
    Track,

    /// Install an .app bundle on a device
    Install {
        /// Target device UDID
        udid: String,

        /// Path to the .app bundle
        #[arg(value_name = "APP")]
        app: PathBuf,
    },

    /// Stream a device's syslog as NDJSON until Ctrl-C
    Log {
        /// Target device UDID
        udid: String,
    },

    /// Write a default `.idevhub/config.toml`
    Init,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    let args = Args::parse();

    color_eyre::install()?;
    logging::init()?;

    let config_dir = args
        .config_dir
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    if let Command::Init = args.command {
        commands::init(&config_dir)?;
        return Ok(());
    }

    let mut settings = config::load_settings(&config_dir);
    if let Some(interval_ms) = args.interval_ms.filter(|ms| *ms > 0) {
        settings.poll.interval_ms = interval_ms;
    }
    debug!("Settings: {:?}", settings);

    let hub = commands::build_hub(&settings);
    info!(
        "idevhub starting (poll interval {:?})",
        Duration::from_millis(settings.poll.interval_ms)
    );

    match args.command {
        Command::List { json } => commands::list(&hub, json).await?,
        Command::Track => commands::track(&hub).await?,
        Command::Install { udid, app } => commands::install(&hub, &udid, &app).await?,
        Command::Log { udid } => commands::log(&hub, &udid).await?,
        Command::Init => {}
    }

    Ok(())
}
