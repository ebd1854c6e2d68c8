use once_cell::sync::Lazy;
use prometheus::{core::Collector, IntCounterVec, IntGauge, Opts, Registry};
use tracing::error;

static CONNECT_ATTEMPTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "danmu_outbound_connect_attempts_total",
            "Connection attempts towards the remote consumer",
        ),
        &["outcome"],
    )
    .unwrap()
});

static FRAMES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("danmu_outbound_frames_total", "Events offered to the outbound link"),
        &["outcome"],
    )
    .unwrap()
});

static DISABLED: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "danmu_outbound_disabled",
        "1 when the outbound link gave up reconnecting",
    )
    .unwrap()
});

fn register<C>(registry: &Registry, collector: C)
where
    C: Collector + Clone + Send + Sync + 'static,
{
    if let Err(err) = registry.register(Box::new(collector.clone())) {
        if !matches!(err, prometheus::Error::AlreadyReg) {
            error!(?err, "failed to register outbound metric");
        }
    }
}

pub fn register_metrics(registry: &Registry) {
    register(registry, CONNECT_ATTEMPTS.clone());
    register(registry, FRAMES.clone());
    register(registry, DISABLED.clone());
}

pub(crate) fn record_connect(outcome: &str) {
    CONNECT_ATTEMPTS.with_label_values(&[outcome]).inc();
}

pub(crate) fn record_frame(outcome: &str) {
    FRAMES.with_label_values(&[outcome]).inc();
}

pub(crate) fn set_disabled(disabled: bool) {
    DISABLED.set(i64::from(disabled));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_every_collector_once() {
        let registry = Registry::new();
        register_metrics(&registry);
        register_metrics(&registry);
        record_connect("failed");
        let names: Vec<_> = registry
            .gather()
            .iter()
            .map(|family| family.get_name().to_string())
            .collect();
        assert!(names.contains(&"danmu_outbound_connect_attempts_total".to_string()));
        assert!(names.contains(&"danmu_outbound_disabled".to_string()));
    }
}
