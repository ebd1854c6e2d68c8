//! Configuration types for relay hops and the stage chain.

use danmu_core_types::ContextKind;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StageConfig {
    pub dedup_capacity: usize,
    /// Drop a batch whole when it is byte-identical to the previously admitted one.
    pub suppress_repeated_payloads: bool,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            dedup_capacity: dedup_window::DEFAULT_CAPACITY,
            suppress_repeated_payloads: false,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Hops from producer side to consumer side.
    pub hops: Vec<ContextKind>,
    pub dedup_capacity: usize,
    /// Repeated-payload suppression on the producer-side hop.
    pub suppress_repeated_payloads: bool,
    pub channel_capacity: usize,
    pub request_interval_ms: u64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            hops: vec![
                ContextKind::Inject,
                ContextKind::Content,
                ContextKind::Background,
            ],
            dedup_capacity: dedup_window::DEFAULT_CAPACITY,
            suppress_repeated_payloads: true,
            channel_capacity: 256,
            request_interval_ms: 2000,
        }
    }
}

impl ChainConfig {
    pub fn stage_config(&self, position: usize) -> StageConfig {
        StageConfig {
            dedup_capacity: self.dedup_capacity,
            suppress_repeated_payloads: position == 0 && self.suppress_repeated_payloads,
        }
    }
}
