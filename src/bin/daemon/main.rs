//! netcmdd - the netcmd command server
//!
//! Loads the configuration file, applies command line overrides, builds the
//! command registry and serves until SIGINT, SIGTERM or SIGQUIT.

use clap::Parser;
use futures::stream::StreamExt;
use netcmd::config::{DEFAULT_CONFIG_PATH, DaemonConfig};
use netcmd::server::Server;
use netcmd::server::commands::{default_mapping, init_commands};
use netcmd::utils::tracing::setup_tracing;
use signal_hook::consts::signal::{SIGINT, SIGQUIT, SIGTERM};
use signal_hook_async_std::Signals;
use std::path::PathBuf;
use tracing::{error, info};

/// netcmd daemon
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file; defaults apply when it does not exist
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Address to bind
    #[arg(short, long)]
    bind: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Maximum requests queued or running at once
    #[arg(short, long)]
    max_concurrency: Option<usize>,

    /// Append logs to this file as well as stdout
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Log level or filter directive (overridden by RUST_LOG)
    #[arg(long)]
    log_level: Option<String>,
}

impl Args {
    fn apply(self, config: &mut DaemonConfig) {
        if let Some(bind) = self.bind {
            config.server.bind_address = bind;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(max_concurrency) = self.max_concurrency {
            config.server.max_concurrency = max_concurrency;
        }
        if let Some(file) = self.log_file {
            config.logging.file = Some(file);
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
    }
}

#[async_std::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = DaemonConfig::load_or_default(&args.config)?;
    let config_path = args.config.clone();
    args.apply(&mut config);

    // Keep the guard alive so buffered file output is flushed on exit
    let _guard = setup_tracing(&config.logging)?;
    info!("Using configuration {}", config_path.display());

    let mapping = config.commands.clone().unwrap_or_else(default_mapping);
    let registry = init_commands(&mapping);
    info!("Available commands:\n{}", registry.list_commands());

    let server = Server::new(config.server.clone(), registry);
    if let Err(e) = server.start().await {
        error!("Failed to start server: {}", e);
        return Err(e.into());
    }

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGQUIT])?;
    let handle = signals.handle();
    if let Some(signal) = signals.next().await {
        info!("Received signal {}, shutting down", signal);
    }
    handle.close();

    server.stop().await;
    Ok(())
}
