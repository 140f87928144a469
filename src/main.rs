//! IP intelligence service CLI.

use anyhow::Result;
use clap::Parser;
use ipintel::server::{self, AppState};
use ipintel::{Config, IntelService};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "ipintel")]
#[command(about = "IP intelligence service - geolocation, ASN and combined threat verdicts from multiple providers")]
#[command(version)]
struct Args {
    /// Path to configuration file. Falls back to environment variables when
    /// the file does not exist.
    #[arg(short, long, default_value = "ipintel.yaml")]
    config: PathBuf,

    /// Listen address, overriding the configuration (e.g., "0.0.0.0:8080")
    #[arg(long, value_name = "ADDR")]
    listen: Option<SocketAddr>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: String,

    /// Print example configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle --print-config
    if args.print_config {
        println!("{}", Config::example());
        return Ok(());
    }

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    // Load configuration
    let mut config = if args.config.exists() {
        info!(config = %args.config.display(), "Loading configuration");
        Config::load(&args.config)?
    } else {
        info!("No configuration file, reading environment");
        Config::from_env()?
    };

    if let Some(listen) = args.listen {
        config.server.listen = listen;
    }

    // Handle --validate
    if args.validate {
        info!("Configuration is valid");
        return Ok(());
    }

    let service = IntelService::from_config(&config)?;
    info!(
        enabled = service.status().enabled_count(),
        cache_ttl_seconds = config.cache.ttl_seconds,
        cache_max_entries = config.cache.max_entries,
        "IP intelligence service ready"
    );

    let _sweeper = service.spawn_sweeper(std::time::Duration::from_secs(
        config.cache.sweep_interval_seconds.max(1),
    ));

    let listener = tokio::net::TcpListener::bind(config.server.listen)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind {}: {}", config.server.listen, e))?;

    server::serve(listener, AppState::new(service, &config.server)).await
}
