use once_cell::sync::Lazy;
use prometheus::{core::Collector, IntCounterVec, Opts, Registry};
use tracing::error;

static DELIVERED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("danmu_fanout_delivered_total", "Messages accepted by a consumer"),
        &["consumer"],
    )
    .unwrap()
});

static FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "danmu_fanout_delivery_failures_total",
            "Messages a consumer could not take",
        ),
        &["consumer"],
    )
    .unwrap()
});

fn register<C>(registry: &Registry, collector: C)
where
    C: Collector + Clone + Send + Sync + 'static,
{
    if let Err(err) = registry.register(Box::new(collector.clone())) {
        if !matches!(err, prometheus::Error::AlreadyReg) {
            error!(?err, "failed to register fanout metric");
        }
    }
}

pub fn register_metrics(registry: &Registry) {
    register(registry, DELIVERED.clone());
    register(registry, FAILURES.clone());
}

pub(crate) fn record_delivered(consumer: &str) {
    DELIVERED.with_label_values(&[consumer]).inc();
}

pub(crate) fn record_failure(consumer: &str) {
    FAILURES.with_label_values(&[consumer]).inc();
}
