//! Outbound link configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_URL: &str = "ws://127.0.0.1:8765";

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Fixed delay before each reconnect attempt.
    pub backoff_ms: u64,
    /// Consecutive failures tolerated before the link disables itself.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            backoff_ms: 1000,
            max_attempts: 3,
        }
    }
}

impl ReconnectPolicy {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboundConfig {
    pub url: String,
    pub enabled: bool,
    #[serde(flatten)]
    pub reconnect: ReconnectPolicy,
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            enabled: true,
            reconnect: ReconnectPolicy::default(),
        }
    }
}
