use std::sync::atomic::{AtomicU64, Ordering};

use once_cell::sync::Lazy;
use prometheus::{core::Collector, IntCounterVec, Opts, Registry};
use tracing::error;

#[derive(Default, Clone, Copy, Debug, PartialEq, Eq)]
pub struct RelayMetricsSnapshot {
    pub batches: u64,
    pub idle_batches: u64,
    pub emitted: u64,
    pub duplicates: u64,
    pub malformed: u64,
    pub channel_drops: u64,
}

static BATCHES: AtomicU64 = AtomicU64::new(0);
static IDLE_BATCHES: AtomicU64 = AtomicU64::new(0);
static EMITTED: AtomicU64 = AtomicU64::new(0);
static DUPLICATES: AtomicU64 = AtomicU64::new(0);
static MALFORMED: AtomicU64 = AtomicU64::new(0);
static CHANNEL_DROPS: AtomicU64 = AtomicU64::new(0);

static RELAY_BATCHES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("danmu_relay_batches_total", "Batches offered to a relay hop"),
        &["context", "outcome"],
    )
    .unwrap()
});

static RELAY_EVENTS_EMITTED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "danmu_relay_events_emitted_total",
            "Events surviving a relay hop",
        ),
        &["context"],
    )
    .unwrap()
});

static RELAY_RECORDS_DROPPED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "danmu_relay_records_dropped_total",
            "Records dropped by a relay hop",
        ),
        &["context", "reason"],
    )
    .unwrap()
});

static RELAY_CHANNEL_DROPS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "danmu_relay_channel_drops_total",
            "Messages lost because the receiving context was unreachable",
        ),
        &["context"],
    )
    .unwrap()
});

fn register<C>(registry: &Registry, collector: C)
where
    C: Collector + Clone + Send + Sync + 'static,
{
    if let Err(err) = registry.register(Box::new(collector.clone())) {
        if !matches!(err, prometheus::Error::AlreadyReg) {
            error!(?err, "failed to register relay metric");
        }
    }
}

pub fn register_metrics(registry: &Registry) {
    register(registry, RELAY_BATCHES_TOTAL.clone());
    register(registry, RELAY_EVENTS_EMITTED_TOTAL.clone());
    register(registry, RELAY_RECORDS_DROPPED_TOTAL.clone());
    register(registry, RELAY_CHANNEL_DROPS_TOTAL.clone());
}

pub fn record_batch(context: &str, outcome: &str) {
    if outcome == "idle" {
        IDLE_BATCHES.fetch_add(1, Ordering::Relaxed);
    } else {
        BATCHES.fetch_add(1, Ordering::Relaxed);
    }
    RELAY_BATCHES_TOTAL
        .with_label_values(&[context, outcome])
        .inc();
}

pub fn record_emitted(context: &str, count: usize) {
    EMITTED.fetch_add(count as u64, Ordering::Relaxed);
    RELAY_EVENTS_EMITTED_TOTAL
        .with_label_values(&[context])
        .inc_by(count as u64);
}

pub fn record_dropped(context: &str, reason: &str) {
    match reason {
        "malformed" => MALFORMED.fetch_add(1, Ordering::Relaxed),
        _ => DUPLICATES.fetch_add(1, Ordering::Relaxed),
    };
    RELAY_RECORDS_DROPPED_TOTAL
        .with_label_values(&[context, reason])
        .inc();
}

pub fn record_channel_drop(context: &str) {
    CHANNEL_DROPS.fetch_add(1, Ordering::Relaxed);
    RELAY_CHANNEL_DROPS_TOTAL.with_label_values(&[context]).inc();
}

pub fn snapshot() -> RelayMetricsSnapshot {
    RelayMetricsSnapshot {
        batches: BATCHES.load(Ordering::Relaxed),
        idle_batches: IDLE_BATCHES.load(Ordering::Relaxed),
        emitted: EMITTED.load(Ordering::Relaxed),
        duplicates: DUPLICATES.load(Ordering::Relaxed),
        malformed: MALFORMED.load(Ordering::Relaxed),
        channel_drops: CHANNEL_DROPS.load(Ordering::Relaxed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_only_grow() {
        let before = snapshot();
        record_batch("inject", "admitted");
        record_emitted("inject", 2);
        record_dropped("inject", "window_duplicate");
        record_dropped("inject", "malformed");
        let after = snapshot();
        assert!(after.batches > before.batches);
        assert!(after.emitted >= before.emitted + 2);
        assert!(after.duplicates > before.duplicates);
        assert!(after.malformed > before.malformed);
    }
}
