use async_trait::async_trait;
use danmu_core_types::ConsumerMessage;
use outbound_link::{ConnectionState, OutboundConnection};

use crate::{Consumer, DeliveryError};

/// Forwards chat events to the remote consumer. Room and diagnostic messages are local
/// only and are accepted without being sent.
pub struct OutboundConsumer {
    connection: OutboundConnection,
}

impl OutboundConsumer {
    pub fn new(connection: OutboundConnection) -> Self {
        Self { connection }
    }

    pub fn connection(&self) -> &OutboundConnection {
        &self.connection
    }
}

#[async_trait]
impl Consumer for OutboundConsumer {
    fn name(&self) -> &str {
        "outbound"
    }

    async fn deliver(&self, message: &ConsumerMessage) -> Result<(), DeliveryError> {
        match message {
            ConsumerMessage::NewComment { event } => {
                if self.connection.send(event) {
                    return Ok(());
                }
                match self.connection.state() {
                    ConnectionState::Disabled => Err(DeliveryError::Disabled),
                    _ => Err(DeliveryError::NotConnected),
                }
            }
            _ => Ok(()),
        }
    }
}
