//! A single propagation hop.

use std::sync::Arc;

use chrono::Utc;
use danmu_core_types::{ContextKind, Event};
use dedup_window::{BatchFilter, Deduplicator};
use event_codec::{EventCodec, RawRecord};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::capture::{CaptureController, CaptureStatus};
use crate::config::StageConfig;
use crate::metrics;

/// Per-hop counters, kept alongside the stage for diagnostics.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct StageStats {
    pub batches: u64,
    pub idle_batches: u64,
    pub repeated_batches: u64,
    pub malformed: u64,
    pub batch_duplicates: u64,
    pub window_duplicates: u64,
    pub emitted: u64,
}

/// Filters raw batches through the capture gate, the codec, and this hop's own window.
///
/// The stage exclusively owns its [`Deduplicator`]; every mutation happens through
/// `&mut self` without any suspension point in between.
pub struct RelayStage {
    kind: ContextKind,
    codec: EventCodec,
    dedup: Deduplicator,
    capture: Arc<CaptureController>,
    generation: u64,
    suppress_repeated: bool,
    last_payload: Option<String>,
    stats: StageStats,
}

impl RelayStage {
    pub fn new(kind: ContextKind, config: StageConfig, capture: Arc<CaptureController>) -> Self {
        let generation = capture.status().generation;
        Self {
            kind,
            codec: EventCodec::default(),
            dedup: Deduplicator::new(config.dedup_capacity),
            capture,
            generation,
            suppress_repeated: config.suppress_repeated_payloads,
            last_payload: None,
            stats: StageStats::default(),
        }
    }

    pub fn kind(&self) -> ContextKind {
        self.kind
    }

    pub fn dedup(&self) -> &Deduplicator {
        &self.dedup
    }

    pub fn stats(&self) -> StageStats {
        self.stats
    }

    pub fn ingest(&mut self, batch: &[RawRecord]) -> Vec<Event> {
        self.ingest_at(batch, Utc::now().timestamp_millis())
    }

    /// Run one batch through the hop. `now_ms` stamps records that carry no timestamp.
    pub fn ingest_at(&mut self, batch: &[RawRecord], now_ms: i64) -> Vec<Event> {
        let context = self.kind.as_str();
        let status = self.capture.status();
        if !status.is_capturing() {
            self.stats.idle_batches += 1;
            metrics::record_batch(context, "idle");
            trace!(target: "relay-stage", %context, records = batch.len(), "idle, batch dropped");
            return Vec::new();
        }
        self.sync(status);

        if self.suppress_repeated && self.is_repeated_payload(batch) {
            self.stats.repeated_batches += 1;
            metrics::record_batch(context, "repeated");
            debug!(target: "relay-stage", %context, "skipping repeated payload");
            return Vec::new();
        }
        self.stats.batches += 1;
        metrics::record_batch(context, "admitted");

        let mut in_batch = BatchFilter::new();
        let mut survivors = Vec::with_capacity(batch.len());
        for record in batch {
            let Some(event) = self.codec.decode_at(record, now_ms) else {
                self.stats.malformed += 1;
                metrics::record_dropped(context, "malformed");
                continue;
            };
            let fingerprint = event.fingerprint();
            if !in_batch.admit(&fingerprint) {
                self.stats.batch_duplicates += 1;
                metrics::record_dropped(context, "batch_duplicate");
                continue;
            }
            if !self.dedup.check_and_record(&fingerprint) {
                self.stats.window_duplicates += 1;
                metrics::record_dropped(context, "window_duplicate");
                trace!(target: "relay-stage", %context, content = %event.content, "duplicate skipped");
                continue;
            }
            survivors.push(event);
        }

        if !survivors.is_empty() {
            self.stats.emitted += survivors.len() as u64;
            metrics::record_emitted(context, survivors.len());
            debug!(
                target: "relay-stage",
                %context,
                offered = batch.len(),
                emitted = survivors.len(),
                "batch relayed"
            );
        }
        survivors
    }

    /// Apply a capture generation change: a new generation means capture was restarted or
    /// cleared, so the window starts over.
    pub fn sync(&mut self, status: CaptureStatus) -> bool {
        if status.generation == self.generation {
            return false;
        }
        self.generation = status.generation;
        self.reset();
        true
    }

    pub fn reset(&mut self) {
        self.dedup.clear();
        self.last_payload = None;
        debug!(target: "relay-stage", context = %self.kind, "deduplication window reset");
    }

    fn is_repeated_payload(&mut self, batch: &[RawRecord]) -> bool {
        let Ok(encoded) = serde_json::to_string(batch) else {
            return false;
        };
        if self.last_payload.as_deref() == Some(encoded.as_str()) {
            return true;
        }
        self.last_payload = Some(encoded);
        false
    }
}
