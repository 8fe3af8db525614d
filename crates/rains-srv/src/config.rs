//! Server configuration for rainsd nodes.

use chrono::TimeDelta;
use rains_core::WireLimits;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default RAINS port.
pub const DEFAULT_PORT: u16 = 1228;

/// Configuration for a RAINS server node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// TCP listen address (default: 0.0.0.0:1228).
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Name this node announces in the connection handshake.
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// Known peers, by handshake name. Queries forwarded to one of these
    /// names dial the address on demand.
    #[serde(default)]
    pub peers: BTreeMap<String, SocketAddr>,

    /// How long a pending query waits for an answer (seconds).
    #[serde(default = "default_query_timeout")]
    pub query_timeout_secs: u64,

    /// How often expired assertions and queries are reaped (seconds).
    #[serde(default = "default_reap_interval")]
    pub reap_interval_secs: u64,

    /// Capacity of the shared inbound frame queue.
    #[serde(default = "default_capacity")]
    pub inbox_capacity: usize,

    /// Capacity of each peer's outbound frame queue.
    #[serde(default = "default_capacity")]
    pub outbox_capacity: usize,

    /// Capabilities this node understands.
    #[serde(default)]
    pub capabilities: Vec<String>,

    /// Wire decoding limits.
    #[serde(default)]
    pub limits: WireLimits,

    /// Zonefiles served by the local authority.
    #[serde(default)]
    pub zonefiles: Vec<PathBuf>,

    /// Validity of the local authority's signatures (seconds).
    #[serde(default = "default_authority_validity")]
    pub authority_validity_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            node_name: default_node_name(),
            peers: BTreeMap::new(),
            query_timeout_secs: default_query_timeout(),
            reap_interval_secs: default_reap_interval(),
            inbox_capacity: default_capacity(),
            outbox_capacity: default_capacity(),
            capabilities: Vec::new(),
            limits: WireLimits::default(),
            zonefiles: Vec::new(),
            authority_validity_secs: default_authority_validity(),
        }
    }
}

impl ServerConfig {
    /// Load config from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> crate::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content).map_err(|e| crate::SrvError::Config(e.to_string()))
        } else {
            Ok(Self::default())
        }
    }

    /// Platform config path: `<config dir>/rainsd/rainsd.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("rainsd").join("rainsd.toml"))
    }

    /// Reject settings the server cannot run with.
    pub fn validate(&self) -> crate::Result<()> {
        let zero = [
            ("query_timeout_secs", self.query_timeout_secs == 0),
            ("reap_interval_secs", self.reap_interval_secs == 0),
            ("authority_validity_secs", self.authority_validity_secs == 0),
            ("inbox_capacity", self.inbox_capacity == 0),
            ("outbox_capacity", self.outbox_capacity == 0),
            ("limits.max_message_size", self.limits.max_message_size == 0),
            ("limits.max_depth", self.limits.max_depth == 0),
        ];
        if let Some((field, _)) = zero.iter().find(|(_, is_zero)| *is_zero) {
            return Err(crate::SrvError::Config(format!("{field} must be non-zero")));
        }
        if self.node_name.is_empty() || self.node_name.contains(char::is_whitespace) {
            return Err(crate::SrvError::Config(format!(
                "node_name '{}' must be a non-empty word",
                self.node_name
            )));
        }
        if u32::try_from(self.limits.max_message_size).is_err() {
            return Err(crate::SrvError::Config(
                "limits.max_message_size exceeds the frame length prefix".into(),
            ));
        }
        Ok(())
    }

    /// Pending query lifetime.
    pub fn query_timeout(&self) -> TimeDelta {
        seconds(self.query_timeout_secs)
    }

    /// Lifetime of signatures issued by the local authority.
    pub fn authority_validity(&self) -> TimeDelta {
        seconds(self.authority_validity_secs)
    }

    pub const fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs)
    }
}

fn seconds(secs: u64) -> TimeDelta {
    i64::try_from(secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .unwrap_or(TimeDelta::MAX)
}

// Default value functions for serde.
const fn default_listen() -> SocketAddr {
    SocketAddr::new(std::net::IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT)
}

fn default_node_name() -> String {
    String::from("rainsd")
}

const fn default_query_timeout() -> u64 {
    10
}

const fn default_reap_interval() -> u64 {
    1
}

const fn default_capacity() -> usize {
    20
}

const fn default_authority_validity() -> u64 {
    86_400
}
