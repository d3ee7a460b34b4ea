use serde::Deserialize;
use std::path::Path;

use crate::reputation::ReputationList;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub node: NodeConfig,
    pub explorer: ExplorerConfig,
    pub monitor: MonitorConfig,
    pub reputation: ReputationConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct NodeConfig {
    pub rpc_url: String,
    pub rpc_user: Option<String>,
    pub rpc_password: Option<String>,
    pub poll_interval_ms: u64,
    pub max_poll_failures: u32,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ExplorerConfig {
    pub api_url: String,
    /// Sent as `chainid` on every request.
    pub chain_id: u64,
    pub api_key: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MonitorConfig {
    pub force_simulation: bool,
    pub connect_timeout_secs: u64,
    pub lookup_timeout_secs: u64,
    pub simulation_interval_secs: u64,
    pub simulation_probability: f64,
    pub max_in_flight: usize,
    pub dedupe_window_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ReputationConfig {
    pub malicious_contracts: Vec<String>,
    pub blacklisted_senders: Vec<String>,
    /// Optional TOML list file reloaded every `refresh_interval_secs`.
    pub list_path: Option<String>,
    pub refresh_interval_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub heartbeat_interval_secs: u64,
    pub idle_timeout_secs: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://127.0.0.1:8545".into(),
            rpc_user: None,
            rpc_password: None,
            poll_interval_ms: 1000,
            max_poll_failures: 5,
        }
    }
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.etherscan.io/v2/api".into(),
            chain_id: 1,
            api_key: None,
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            force_simulation: false,
            connect_timeout_secs: 10,
            lookup_timeout_secs: 5,
            simulation_interval_secs: 30,
            simulation_probability: 0.10,
            max_in_flight: 32,
            dedupe_window_secs: 600,
        }
    }
}

impl Default for ReputationConfig {
    fn default() -> Self {
        Self {
            malicious_contracts: Vec::new(),
            blacklisted_senders: Vec::new(),
            list_path: None,
            refresh_interval_secs: 300,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".into(),
            heartbeat_interval_secs: 30,
            idle_timeout_secs: 90,
        }
    }
}

impl ReputationConfig {
    /// The statically configured addresses.
    pub fn list(&self) -> ReputationList {
        ReputationList {
            malicious_contracts: self.malicious_contracts.clone(),
            blacklisted_senders: self.blacklisted_senders.clone(),
        }
    }
}

impl Config {
    /// Load config from a TOML file. Falls back to defaults if file doesn't exist.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!("Config file {} not found, using defaults", path.display());
            return Self::default();
        }
        match std::fs::read_to_string(path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    tracing::info!("Config loaded from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {e}, using defaults", path.display());
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read {}: {e}, using defaults", path.display());
                Self::default()
            }
        }
    }
}
