//! CLI argument parsing and server startup.

pub mod args;

use anyhow::{Context, Result};
use args::Cli;
use clap::Parser;
use rains_srv::ServerConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Run the daemon.
pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = load_config(&cli)?;
    rains_srv::server::run(config)
        .await
        .context("server failed")
}

/// `RUST_LOG` wins when set; otherwise `-v` selects debug.
fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Load the config file, then apply command-line overrides.
fn load_config(cli: &Cli) -> Result<ServerConfig> {
    let mut config = match cli.config.clone().or_else(ServerConfig::default_path) {
        Some(path) => {
            info!(path = %path.display(), "loading config");
            ServerConfig::load(&path)
                .with_context(|| format!("failed to load {}", path.display()))?
        }
        None => ServerConfig::default(),
    };

    if let Some(listen) = cli.listen {
        config.listen = listen;
    }
    if let Some(name) = &cli.name {
        config.node_name.clone_from(name);
    }
    config.zonefiles.extend(cli.zonefiles.iter().cloned());
    config.validate().context("invalid configuration")?;
    Ok(config)
}
