//! Node configuration: a TOML file deserialized over these defaults, with
//! CLI args applied on top by the daemon.

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use weave_primitives::params::Network;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed config: {0}")]
    Toml(#[from] toml::de::Error),
}

fn default_listen() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_peering_port() -> u16 {
    7075
}

fn default_bootstrap_port() -> u16 {
    7076
}

fn default_bootstrap_connections() -> usize {
    4
}

fn default_work_threads() -> usize {
    2
}

#[derive(Clone, Debug, Deserialize)]
pub struct NodeConfig {
    /// Where the stores live.
    pub data_dir: PathBuf,

    /// Which chain to join.  Parsed from "test" / "beta" / "live".
    #[serde(default = "NodeConfig::default_network", with = "network_serde")]
    pub network: Network,

    /// Address both listeners bind.
    #[serde(default = "default_listen")]
    pub listen: IpAddr,

    /// UDP gossip port; 0 picks an ephemeral port.
    #[serde(default = "default_peering_port")]
    pub peering_port: u16,

    /// TCP bootstrap port; 0 picks an ephemeral port.
    #[serde(default = "default_bootstrap_port")]
    pub bootstrap_port: u16,

    /// Connection pool ceiling per bootstrap attempt.
    #[serde(default = "default_bootstrap_connections")]
    pub max_bootstrap_connections: usize,

    /// Threads grinding proof-of-work.
    #[serde(default = "default_work_threads")]
    pub work_threads: usize,

    /// Peers contacted at startup.
    #[serde(default)]
    pub preconfigured_peers: Vec<String>,

    /// Whether this node votes with its wallet accounts.
    #[serde(default = "NodeConfig::default_enable_voting")]
    pub enable_voting: bool,
}

impl NodeConfig {
    fn default_network() -> Network {
        Network::Live
    }

    fn default_enable_voting() -> bool {
        true
    }

    pub fn with_data_dir(data_dir: PathBuf, network: Network) -> Self {
        Self {
            data_dir,
            network,
            listen: default_listen(),
            peering_port: default_peering_port(),
            bootstrap_port: default_bootstrap_port(),
            max_bootstrap_connections: default_bootstrap_connections(),
            work_threads: default_work_threads(),
            preconfigured_peers: Vec::new(),
            enable_voting: true,
        }
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }
}

mod network_serde {
    use serde::{Deserialize, Deserializer};

    use weave_primitives::params::Network;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Network, D::Error>
    where
        D: Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        match name.as_str() {
            "test" => Ok(Network::Test),
            "beta" => Ok(Network::Beta),
            "live" => Ok(Network::Live),
            other => Err(serde::de::Error::custom(format!(
                "unknown network {other:?}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_parses() {
        let config: NodeConfig = toml::from_str(r#"data_dir = "/tmp/weave""#).unwrap();
        assert_eq!(config.network, Network::Live);
        assert_eq!(config.peering_port, 7075);
        assert!(config.enable_voting);
    }

    #[test]
    fn test_full_config_parses() {
        let text = r#"
            data_dir = "/var/lib/weave"
            network = "beta"
            listen = "127.0.0.1"
            peering_port = 9000
            bootstrap_port = 9001
            max_bootstrap_connections = 8
            work_threads = 4
            preconfigured_peers = ["peer.example:7075"]
            enable_voting = false
        "#;
        let config: NodeConfig = toml::from_str(text).unwrap();
        assert_eq!(config.network, Network::Beta);
        assert_eq!(config.peering_port, 9000);
        assert_eq!(config.preconfigured_peers.len(), 1);
        assert!(!config.enable_voting);
    }

    #[test]
    fn test_unknown_network_rejected() {
        let text = "data_dir = \"/tmp/x\"\nnetwork = \"mainnet\"\n";
        let result: Result<NodeConfig, _> = toml::from_str(text);
        assert!(result.is_err());
    }
}
