//! Remote consumer: accepts `danmu` frames over a websocket and keeps a short history.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures::StreamExt;
use outbound_link::{DanmuPayload, WireMessage};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReceivedDanmu {
    pub user: String,
    pub content: String,
    pub time: String,
    pub live_id: String,
    pub user_token: String,
    pub formatted: String,
}

impl From<DanmuPayload> for ReceivedDanmu {
    fn from(payload: DanmuPayload) -> Self {
        let formatted = format!(
            "[{}] {} [{}]\n{}",
            payload.time, payload.nickname, payload.user_token, payload.content
        );
        Self {
            user: payload.nickname,
            content: payload.content,
            time: payload.time,
            live_id: payload.live_id,
            user_token: payload.user_token,
            formatted,
        }
    }
}

/// Bounded history of received danmu, newest last.
pub struct RemoteConsumer {
    history: usize,
    received: Mutex<VecDeque<ReceivedDanmu>>,
}

impl RemoteConsumer {
    pub fn new(history: usize) -> Arc<Self> {
        Arc::new(Self {
            history: history.max(1),
            received: Mutex::new(VecDeque::new()),
        })
    }

    /// Handle one text frame. Returns `false` when the frame is not a usable danmu.
    pub fn accept_frame(&self, frame: &str) -> bool {
        let message = match WireMessage::from_json(frame) {
            Ok(message) => message,
            Err(err) => {
                warn!(target: "remote-consumer", %err, "unparseable frame");
                return false;
            }
        };
        if !message.is_danmu() {
            debug!(target: "remote-consumer", kind = %message.kind, "ignoring non-danmu frame");
            return false;
        }
        let received = ReceivedDanmu::from(message.data);
        info!(target: "remote-consumer", "{}", received.formatted);
        let mut history = self.received.lock();
        history.push_back(received);
        while history.len() > self.history {
            history.pop_front();
        }
        true
    }

    pub fn recent(&self) -> Vec<ReceivedDanmu> {
        self.received.lock().iter().cloned().collect()
    }
}

pub fn router(consumer: Arc<RemoteConsumer>) -> Router {
    Router::new()
        .route("/", get(websocket_handler))
        .route("/danmu", get(list_handler))
        .with_state(consumer)
}

/// Bind and serve until the listener fails.
pub async fn serve(addr: SocketAddr, consumer: Arc<RemoteConsumer>) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(target: "remote-consumer", %addr, "remote consumer listening");
    axum::serve(listener, router(consumer).into_make_service()).await
}

async fn list_handler(State(consumer): State<Arc<RemoteConsumer>>) -> Json<Vec<ReceivedDanmu>> {
    Json(consumer.recent())
}

async fn websocket_handler(
    State(consumer): State<Arc<RemoteConsumer>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, consumer))
}

async fn handle_socket(mut socket: WebSocket, consumer: Arc<RemoteConsumer>) {
    info!(target: "remote-consumer", "relay connected");
    while let Some(msg) = socket.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                consumer.accept_frame(&text);
            }
            Ok(Message::Ping(payload)) => {
                let _ = socket.send(Message::Pong(payload)).await;
            }
            Ok(Message::Close(frame)) => {
                debug!(target: "remote-consumer", ?frame, "relay closed the connection");
                break;
            }
            Ok(Message::Binary(_)) | Ok(Message::Pong(_)) => {}
            Err(err) => {
                error!(target: "remote-consumer", ?err, "websocket error");
                break;
            }
        }
    }
    info!(target: "remote-consumer", "relay disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_like_the_console_log() {
        let consumer = RemoteConsumer::new(2);
        assert!(consumer.accept_frame(
            r#"{"type":"danmu","data":{"content":"hi","nickname":"amy","time":"10:00:00","liveId":"r","userToken":"t"}}"#
        ));
        assert_eq!(consumer.recent()[0].formatted, "[10:00:00] amy [t]\nhi");
    }

    #[test]
    fn history_is_bounded() {
        let consumer = RemoteConsumer::new(2);
        for n in 0..3 {
            let frame = format!(r#"{{"type":"danmu","data":{{"content":"c{n}"}}}}"#);
            assert!(consumer.accept_frame(&frame));
        }
        let contents: Vec<_> = consumer.recent().into_iter().map(|d| d.content).collect();
        assert_eq!(contents, vec!["c1", "c2"]);
    }

    #[test]
    fn rejects_other_frames() {
        let consumer = RemoteConsumer::new(2);
        assert!(!consumer.accept_frame("nope"));
        assert!(!consumer.accept_frame(r#"{"type":"ping","data":{}}"#));
        assert!(consumer.recent().is_empty());
    }
}
