//! blksyncd: content-addressed block sync daemon
//!
//! Usage:
//!   blksyncd [--config /etc/blksync/blksync.toml] [--log debug] [--log-format json] [-V]
//!   blksyncd -v
//!
//! Serves the block store to peers over a websocket at `/stream`.

mod daemon;
mod metrics;
mod protocol;
mod server;
mod session;

use anyhow::{Context, Result};
use blksync_core::config::BlksyncConfig;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "blksyncd",
    version,
    about = "blksync block daemon",
    disable_version_flag = true
)]
struct Cli {
    /// Print version
    #[arg(long, short = 'v', action = clap::ArgAction::Version)]
    version: (),

    /// Path to blksync.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "BLKSYNC_CONFIG",
        default_value = "/etc/blksync/blksync.toml"
    )]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides daemon.log_level
    #[arg(long, env = "BLKSYNC_LOG")]
    log: Option<String>,

    /// Log format (json, text); overrides daemon.log_format
    #[arg(long, env = "BLKSYNC_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    /// Shorthand for --log debug
    #[arg(long, short = 'V')]
    verbose: bool,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Configuration is read before logging starts so the file can set the
    // log level; anything worth reporting about it is logged afterwards.
    let config_found = cli.config.exists();
    let config = if config_found {
        BlksyncConfig::load(&cli.config)
            .with_context(|| format!("loading config {}", cli.config.display()))?
    } else {
        BlksyncConfig::default()
    };

    let level = if cli.verbose {
        "debug"
    } else {
        cli.log.as_deref().unwrap_or(&config.daemon.log_level)
    };
    let configured_format = LogFormat::from_str(&config.daemon.log_format, true);
    let format = cli
        .log_format
        .clone()
        .or_else(|| configured_format.clone().ok())
        .unwrap_or(LogFormat::Text);
    init_logging(level, &format);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "blksyncd starting"
    );
    if !config_found {
        warn!(
            "config file not found: {}  (using defaults)",
            cli.config.display()
        );
    }
    if let Err(e) = configured_format {
        warn!("ignoring daemon.log_format: {e}");
    }

    daemon::run(config).await
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .init();
        }
    }
}
