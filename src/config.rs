//! Configuration management module
//!
//! Layers defaults, an optional YAML or JSON file and `DANMU_RELAY_*` environment
//! overrides into one [`RelayConfiguration`].

use std::env;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use outbound_link::{OutboundConfig, ReconnectPolicy};
use relay_stage::ChainConfig;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::errors::RelayCliError;

pub const ENV_URL: &str = "DANMU_RELAY_URL";
pub const ENV_MAX_ATTEMPTS: &str = "DANMU_RELAY_MAX_ATTEMPTS";
pub const ENV_BACKOFF_MS: &str = "DANMU_RELAY_BACKOFF_MS";
pub const ENV_DEDUP_CAPACITY: &str = "DANMU_RELAY_DEDUP_CAPACITY";
pub const ENV_BIND: &str = "DANMU_RELAY_BIND";

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfiguration {
    pub outbound: OutboundConfig,
    pub pipeline: PipelineSection,
    pub ui: UiSection,
    pub server: ServerSection,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    pub dedup_capacity: usize,
    pub channel_capacity: usize,
    pub request_interval_ms: u64,
    pub suppress_repeated_payloads: bool,
}

impl Default for PipelineSection {
    fn default() -> Self {
        let chain = ChainConfig::default();
        Self {
            dedup_capacity: chain.dedup_capacity,
            channel_capacity: chain.channel_capacity,
            request_interval_ms: chain.request_interval_ms,
            suppress_repeated_payloads: chain.suppress_repeated_payloads,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct UiSection {
    /// Most recent comments kept for display.
    pub display_limit: usize,
    /// Where the display log is persisted on stop and clear. `None` disables persistence.
    pub snapshot_path: Option<PathBuf>,
}

impl Default for UiSection {
    fn default() -> Self {
        Self {
            display_limit: 100,
            snapshot_path: dirs::data_local_dir().map(|dir| dir.join("danmu-relay").join("ui.json")),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub bind: String,
    /// Messages retained by the remote consumer.
    pub history: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8765".to_string(),
            history: 100,
        }
    }
}

impl ServerSection {
    pub fn bind_addr(&self) -> Result<SocketAddr, RelayCliError> {
        self.bind
            .parse()
            .map_err(|_| RelayCliError::config(format!("invalid bind address '{}'", self.bind)))
    }
}

impl RelayConfiguration {
    pub fn chain_config(&self) -> ChainConfig {
        ChainConfig {
            dedup_capacity: self.pipeline.dedup_capacity,
            channel_capacity: self.pipeline.channel_capacity,
            request_interval_ms: self.pipeline.request_interval_ms,
            suppress_repeated_payloads: self.pipeline.suppress_repeated_payloads,
            ..ChainConfig::default()
        }
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        self.outbound.reconnect.clone()
    }

    /// Apply `DANMU_RELAY_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<(), RelayCliError> {
        self.apply_overrides(|key| env::var(key).ok())
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), RelayCliError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_URL) {
            self.outbound.url = url;
        }
        if let Some(raw) = lookup(ENV_MAX_ATTEMPTS) {
            self.outbound.reconnect.max_attempts = parse_env(ENV_MAX_ATTEMPTS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_BACKOFF_MS) {
            self.outbound.reconnect.backoff_ms = parse_env(ENV_BACKOFF_MS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_DEDUP_CAPACITY) {
            self.pipeline.dedup_capacity = parse_env(ENV_DEDUP_CAPACITY, &raw)?;
        }
        if let Some(bind) = lookup(ENV_BIND) {
            self.server.bind = bind;
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, RelayCliError> {
    raw.trim()
        .parse()
        .map_err(|_| RelayCliError::config(format!("{key} has invalid value '{raw}'")))
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("danmu-relay").join("config.yaml"))
}

/// Resolve the effective configuration. A missing file falls back to defaults; a
/// file that exists but does not parse is an error.
pub fn load_configuration(path: Option<&Path>) -> Result<RelayConfiguration, RelayCliError> {
    let path = path.map(Path::to_path_buf).or_else(default_config_path);
    let mut config = match path {
        Some(path) if path.exists() => {
            let content = std::fs::read_to_string(&path)?;
            let config = parse_configuration(&path, &content)?;
            info!("Loaded configuration from: {}", path.display());
            config
        }
        Some(path) => {
            warn!("Config file not found, using defaults: {}", path.display());
            RelayConfiguration::default()
        }
        None => RelayConfiguration::default(),
    };
    config.apply_env_overrides()?;
    Ok(config)
}

fn parse_configuration(path: &Path, content: &str) -> Result<RelayConfiguration, RelayCliError> {
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if is_json {
        Ok(serde_json::from_str(content)?)
    } else {
        Ok(serde_yaml::from_str(content)?)
    }
}
