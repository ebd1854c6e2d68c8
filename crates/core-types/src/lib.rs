use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

/// Identifier of one spawned execution context instance.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ContextId(pub Uuid);

impl ContextId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

/// Execution context boundaries a batch crosses on its way to the consumers.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextKind {
    /// Runs inside the observed page and sees the producer's raw payloads.
    Inject,
    /// Bridges the page and the privileged background context.
    Content,
    /// Long-lived context that owns the consumers.
    Background,
}

impl ContextKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextKind::Inject => "inject",
            ContextKind::Content => "content",
            ContextKind::Background => "background",
        }
    }
}

impl fmt::Display for ContextKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One normalized chat message.
///
/// `content` is trimmed and never empty; the codec refuses to build an event otherwise.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub content: String,
    pub sender: String,
    #[serde(default)]
    pub user_token: String,
    #[serde(default)]
    pub live_id: String,
    /// Epoch milliseconds.
    pub timestamp: i64,
}

impl Event {
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(self)
    }

    /// Fill in the room id when it is still unknown. An id that is already set is kept.
    pub fn backfill_live_id(&mut self, live_id: &str) -> bool {
        if self.live_id.is_empty() && !live_id.is_empty() {
            self.live_id = live_id.to_string();
            return true;
        }
        false
    }

    /// Re-encode using the primary field names so the next hop decodes the same event.
    pub fn to_record(&self) -> Value {
        json!({
            "content": self.content,
            "sender": self.sender,
            "userToken": self.user_token,
            "liveId": self.live_id,
            "timestamp": self.timestamp,
        })
    }
}

/// Deterministic identity key of an [`Event`].
///
/// Computed from `(timestamp, content, sender, user_token)`; the room id is not part of
/// the key because it may be backfilled between hops.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(pub String);

impl Fingerprint {
    /// Text fields are length-prefixed so no field value can mimic a field boundary.
    pub fn of(event: &Event) -> Self {
        let mut key = event.timestamp.to_string();
        for field in [&event.content, &event.sender, &event.user_token] {
            key.push_str(&format!("|{}:{}", field.len(), field));
        }
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Process-wide capture gate value.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureState {
    #[default]
    Idle,
    Capturing,
}

/// Messages pushed toward consumer collaborators.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ConsumerMessage {
    NewComment {
        event: Event,
    },
    #[serde(rename_all = "camelCase")]
    LiveInfo {
        live_id: String,
    },
    RawUrl {
        url: String,
    },
    RawResponse {
        url: String,
        body: String,
    },
}

impl ConsumerMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ConsumerMessage::NewComment { .. } => "newComment",
            ConsumerMessage::LiveInfo { .. } => "liveInfo",
            ConsumerMessage::RawUrl { .. } => "rawUrl",
            ConsumerMessage::RawResponse { .. } => "rawResponse",
        }
    }
}

/// Reply returned to the controlling surface for start/stop commands.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Ack {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Ack {
    pub fn ok() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(message.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Event {
        Event {
            content: "hello".into(),
            sender: "alice".into(),
            user_token: "tok-1".into(),
            live_id: String::new(),
            timestamp: 1_700_000_000_000,
        }
    }

    #[test]
    fn fingerprint_ignores_live_id() {
        let mut with_room = sample();
        with_room.live_id = "room-9".into();
        assert_eq!(sample().fingerprint(), with_room.fingerprint());
    }

    #[test]
    fn fingerprint_separates_fields() {
        let mut a = sample();
        a.content = "ab".into();
        a.sender = "c".into();
        let mut b = sample();
        b.content = "a".into();
        b.sender = "bc".into();
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_survives_delimiters_inside_fields() {
        let mut a = sample();
        a.content = "x\u{1f}y".into();
        a.sender = "z".into();
        let mut b = sample();
        b.content = "x".into();
        b.sender = "y\u{1f}z".into();
        assert_ne!(a.fingerprint(), b.fingerprint());

        a.content = "x|1:y".into();
        a.sender = String::new();
        b.content = "x".into();
        b.sender = "y".into();
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn backfill_never_overwrites() {
        let mut event = sample();
        assert!(event.backfill_live_id("room-1"));
        assert!(!event.backfill_live_id("room-2"));
        assert_eq!(event.live_id, "room-1");
    }

    #[test]
    fn consumer_message_shape() {
        let msg = ConsumerMessage::LiveInfo {
            live_id: "42".into(),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value, json!({"kind": "liveInfo", "liveId": "42"}));

        let msg = ConsumerMessage::NewComment { event: sample() };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["kind"], "newComment");
        assert_eq!(value["event"]["userToken"], "tok-1");
    }

    #[test]
    fn ack_serializes_without_error_when_ok() {
        let value = serde_json::to_value(Ack::ok()).unwrap();
        assert_eq!(value, json!({"ok": true}));
    }
}
