//! Transport seam between the reconnect driver and the actual socket.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::OutboundError;

/// An established connection.
#[async_trait]
pub trait Link: Send {
    /// Write frames from `outgoing` until the remote closes, the transport fails or the
    /// sending side is dropped.
    async fn run(self: Box<Self>, outgoing: mpsc::UnboundedReceiver<String>) -> Result<(), OutboundError>;
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Link>, OutboundError>;
}

#[derive(Clone, Debug)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<Box<dyn Link>, OutboundError> {
        let (stream, _response) = connect_async(self.url.as_str())
            .await
            .map_err(|err| OutboundError::Connect(err.to_string()))?;
        Ok(Box::new(WsLink { stream }))
    }
}

struct WsLink {
    stream: WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
}

#[async_trait]
impl Link for WsLink {
    async fn run(self: Box<Self>, mut outgoing: mpsc::UnboundedReceiver<String>) -> Result<(), OutboundError> {
        let (mut sink, mut stream) = self.stream.split();
        loop {
            tokio::select! {
                frame = outgoing.recv() => match frame {
                    Some(text) => sink
                        .send(Message::Text(text))
                        .await
                        .map_err(|err| OutboundError::Transport(err.to_string()))?,
                    None => {
                        let _ = sink.close().await;
                        return Ok(());
                    }
                },
                inbound = stream.next() => match inbound {
                    Some(Ok(Message::Close(_))) | None => return Err(OutboundError::Closed),
                    Some(Ok(Message::Text(text))) => {
                        debug!(target: "outbound-link", message = %text, "remote consumer replied");
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => return Err(OutboundError::Transport(err.to_string())),
                },
            }
        }
    }
}
