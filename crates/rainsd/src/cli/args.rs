//! Command-line argument definitions using clap.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

/// RAINS name server daemon
///
/// Caches signed assertions, answers queries from peers and serves the
/// zones listed in its configuration.
#[derive(Parser, Debug)]
#[command(name = "rainsd")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (default: <config dir>/rainsd/rainsd.toml)
    #[arg(short, long, env = "RAINSD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Listen address, overriding the config file
    #[arg(short, long)]
    pub listen: Option<SocketAddr>,

    /// Node name announced to peers, overriding the config file
    #[arg(short, long)]
    pub name: Option<String>,

    /// Extra zonefiles to serve, in addition to the config file's
    #[arg(short, long = "zonefile", value_name = "PATH")]
    pub zonefiles: Vec<PathBuf>,

    /// Increase verbosity
    #[arg(short, long)]
    pub verbose: bool,
}
