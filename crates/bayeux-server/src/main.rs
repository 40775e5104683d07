//! # Bayeux Server
//!
//! HTTP long-polling host for the Bayeux protocol engine.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! bayeux
//!
//! # Run with custom config
//! bayeux --config /path/to/bayeux.toml
//!
//! # Run with environment variables
//! BAYEUX_PORT=8000 BAYEUX_HOST=0.0.0.0 bayeux
//! ```

mod config;
mod handlers;
mod metrics;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Bayeux long-polling server
#[derive(Parser, Debug)]
#[command(name = "bayeux")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bayeux=debug,bayeux_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => config::Config::from_file(path)?,
        None => config::Config::load()?,
    };

    tracing::info!("Starting Bayeux server on {}:{}", config.host, config.port);

    metrics::init_metrics();

    handlers::run_server(config).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_config_path() {
        let args = Args::try_parse_from(["bayeux", "--config", "/etc/bayeux.toml"]).unwrap();
        assert_eq!(args.config, Some(PathBuf::from("/etc/bayeux.toml")));

        let args = Args::try_parse_from(["bayeux", "-c", "local.toml"]).unwrap();
        assert_eq!(args.config, Some(PathBuf::from("local.toml")));

        let args = Args::try_parse_from(["bayeux"]).unwrap();
        assert!(args.config.is_none());
    }

    #[test]
    fn test_args_reject_unknown_flags() {
        assert!(Args::try_parse_from(["bayeux", "--conifg", "x.toml"]).is_err());
        assert!(Args::try_parse_from(["bayeux", "--config"]).is_err());
    }
}
