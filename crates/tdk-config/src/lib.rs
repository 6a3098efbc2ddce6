//! Configuration surface consumed by the trading engine core.
//!
//! One YAML document, every key optional, defaults matching the demo
//! deployment. Environment variables override the file for the connection
//! endpoint so an operator can repoint a packaged build without editing
//! config (`TDK_HOST`, `TDK_PORT`, `TDK_CLIENT_ID`).

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Connection endpoint and handshake bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_client_id")]
    pub client_id: i32,
    /// Upper bound on the connect handshake, seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl ConnectionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            client_id: default_client_id(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

/// Polling cadence and the initial watched-symbol set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_watchlist")]
    pub watchlist: Vec<String>,
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            watchlist: default_watchlist(),
        }
    }
}

/// Where the durable trade history lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_history_path")]
    pub history_path: String,
    #[serde(default = "default_positions_path")]
    pub positions_path: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            history_path: default_history_path(),
            positions_path: default_positions_path(),
        }
    }
}

/// Secondary market-data provider endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_secondary_base_url")]
    pub secondary_base_url: String,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            secondary_base_url: default_secondary_base_url(),
        }
    }
}

/// Effective engine configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub data: DataConfig,
}

impl Config {
    /// Load from a YAML file, then apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let mut cfg: Config = serde_yaml::from_str(&raw)
            .with_context(|| format!("invalid yaml in config file {}", path.display()))?;
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    /// Defaults plus environment overrides; used when no file is given.
    pub fn load_default() -> Self {
        let mut cfg = Config::default();
        cfg.apply_env_overrides();
        cfg
    }

    /// `TDK_HOST` / `TDK_PORT` / `TDK_CLIENT_ID` override the file. Values
    /// that fail to parse are ignored rather than fatal.
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("TDK_HOST") {
            if !host.is_empty() {
                self.connection.host = host;
            }
        }
        if let Ok(port) = std::env::var("TDK_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                self.connection.port = port;
            }
        }
        if let Ok(client_id) = std::env::var("TDK_CLIENT_ID") {
            if let Ok(client_id) = client_id.parse::<i32>() {
                self.connection.client_id = client_id;
            }
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    7496
}

fn default_client_id() -> i32 {
    1
}

fn default_connect_timeout_secs() -> u64 {
    20
}

fn default_interval_ms() -> u64 {
    1_000
}

fn default_watchlist() -> Vec<String> {
    ["AAPL", "GOOGL", "TSLA", "AMZN", "MSFT"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_history_path() -> String {
    "trade_history.jsonl".to_string()
}

fn default_positions_path() -> String {
    "positions_snapshot.json".to_string()
}

fn default_secondary_base_url() -> String {
    "https://query1.finance.yahoo.com".to_string()
}
