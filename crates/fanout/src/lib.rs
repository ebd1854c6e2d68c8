//! Terminal stage of the relay: every surviving message is offered to each registered
//! consumer. Consumers fail independently.

pub mod metrics;
pub mod outbound;
pub mod ui;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use danmu_core_types::ConsumerMessage;
use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, warn};

pub use outbound::OutboundConsumer;
pub use ui::{to_mpsc, UiChannel};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("consumer is gone")]
    ConsumerGone,
    #[error("remote consumer is not connected")]
    NotConnected,
    #[error("connection disabled")]
    Disabled,
    #[error("consumer did not accept within {0:?}")]
    TimedOut(Duration),
    #[error("{0}")]
    Other(String),
}

/// Receiver of relayed messages.
///
/// `deliver` runs on the terminal hop and is expected to hand the message off without
/// waiting; calls that exceed the fanout's delivery timeout are abandoned.
#[async_trait]
pub trait Consumer: Send + Sync {
    fn name(&self) -> &str;
    async fn deliver(&self, message: &ConsumerMessage) -> Result<(), DeliveryError>;
}

#[derive(Debug, Default)]
pub struct DeliveryReport {
    pub delivered: Vec<String>,
    pub failed: Vec<(String, DeliveryError)>,
}

impl DeliveryReport {
    pub fn all_delivered(&self) -> bool {
        self.failed.is_empty()
    }
}

pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_millis(250);

pub struct Fanout {
    consumers: RwLock<Vec<Arc<dyn Consumer>>>,
    delivery_timeout: Duration,
}

impl Default for Fanout {
    fn default() -> Self {
        Self {
            consumers: RwLock::new(Vec::new()),
            delivery_timeout: DEFAULT_DELIVERY_TIMEOUT,
        }
    }
}

impl Fanout {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_timeout(delivery_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            consumers: RwLock::new(Vec::new()),
            delivery_timeout,
        })
    }

    pub fn register(&self, consumer: Arc<dyn Consumer>) {
        debug!(target: "fanout", consumer = consumer.name(), "consumer registered");
        self.consumers.write().push(consumer);
    }

    pub fn consumer_names(&self) -> Vec<String> {
        self.consumers
            .read()
            .iter()
            .map(|consumer| consumer.name().to_string())
            .collect()
    }

    pub async fn deliver(&self, message: &ConsumerMessage) -> DeliveryReport {
        let consumers = self.consumers.read().clone();
        let mut report = DeliveryReport::default();
        for consumer in consumers {
            let outcome = tokio::time::timeout(self.delivery_timeout, consumer.deliver(message))
                .await
                .unwrap_or(Err(DeliveryError::TimedOut(self.delivery_timeout)));
            match outcome {
                Ok(()) => {
                    metrics::record_delivered(consumer.name());
                    report.delivered.push(consumer.name().to_string());
                }
                Err(err) => {
                    metrics::record_failure(consumer.name());
                    match err {
                        DeliveryError::NotConnected | DeliveryError::Disabled => debug!(
                            target: "fanout",
                            consumer = consumer.name(),
                            kind = message.kind(),
                            "consumer offline, message dropped"
                        ),
                        _ => warn!(
                            target: "fanout",
                            consumer = consumer.name(),
                            kind = message.kind(),
                            %err,
                            "delivery failed"
                        ),
                    }
                    report.failed.push((consumer.name().to_string(), err));
                }
            }
        }
        report
    }
}
