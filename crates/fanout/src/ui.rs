use std::sync::Arc;

use async_trait::async_trait;
use danmu_core_types::ConsumerMessage;
use tokio::sync::{broadcast, mpsc};

use crate::{Consumer, DeliveryError};

/// Local display channel. Delivery fails while no display is subscribed.
pub struct UiChannel {
    sender: broadcast::Sender<ConsumerMessage>,
}

impl UiChannel {
    pub fn new(capacity: usize) -> Arc<Self> {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Arc::new(Self { sender })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConsumerMessage> {
        self.sender.subscribe()
    }

    pub fn is_open(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}

#[async_trait]
impl Consumer for UiChannel {
    fn name(&self) -> &str {
        "ui"
    }

    async fn deliver(&self, message: &ConsumerMessage) -> Result<(), DeliveryError> {
        self.sender
            .send(message.clone())
            .map(|_| ())
            .map_err(|_| DeliveryError::ConsumerGone)
    }
}

/// Bridge the display subscription into an mpsc receiver. Lagged messages are skipped.
pub fn to_mpsc(ui: &UiChannel, capacity: usize) -> mpsc::Receiver<ConsumerMessage> {
    let mut rx = ui.subscribe();
    let (tx, out_rx) = mpsc::channel(capacity.max(1));
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(message) => {
                    if tx.send(message).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
    out_rx
}
