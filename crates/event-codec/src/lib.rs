//! Decoding of raw producer records into canonical [`Event`]s.
//!
//! Producers embed the same logical field under different names depending on where the
//! record was captured. Each logical field is therefore read from an ordered list of
//! candidate paths; the first non-empty candidate wins. Records that cannot yield a
//! non-empty `content` are rejected by returning `None`, never by erroring.

pub mod clock;
pub mod producer;

use chrono::Utc;
use danmu_core_types::Event;
use serde_json::Value;

pub use clock::{format_clock_time, format_local_time};
pub use producer::{extract_comments, extract_live_id, parse_payload, unwrap_jsonp, CodecError};

/// Untyped record as observed from the producer or a previous hop.
pub type RawRecord = Value;

/// Ordered candidate paths per logical field. Dotted paths address nested objects.
#[derive(Clone, Debug)]
pub struct FieldCandidates {
    pub content: Vec<&'static str>,
    pub sender: Vec<&'static str>,
    pub user_token: Vec<&'static str>,
    pub live_id: Vec<&'static str>,
    pub timestamp: Vec<&'static str>,
}

impl Default for FieldCandidates {
    fn default() -> Self {
        Self {
            content: vec!["content", "text", "msg"],
            sender: vec!["sender", "nickname", "tbNick", "publisherNick", "nick"],
            user_token: vec!["userToken", "renders.userToken", "userId"],
            live_id: vec!["liveId", "renders.liveId", "topic"],
            timestamp: vec!["timestamp", "ts", "time"],
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct EventCodec {
    fields: FieldCandidates,
}

impl EventCodec {
    pub fn new(fields: FieldCandidates) -> Self {
        Self { fields }
    }

    /// Decode using the wall clock for records that carry no timestamp.
    pub fn decode(&self, record: &RawRecord) -> Option<Event> {
        self.decode_at(record, Utc::now().timestamp_millis())
    }

    /// Decode with an explicit fallback timestamp (epoch milliseconds).
    pub fn decode_at(&self, record: &RawRecord, now_ms: i64) -> Option<Event> {
        if !record.is_object() {
            return None;
        }

        let content = first_text(record, &self.fields.content)?;
        let content = content.trim();
        if content.is_empty() {
            return None;
        }

        let timestamp = self
            .fields
            .timestamp
            .iter()
            .filter_map(|path| lookup(record, path))
            .find_map(parse_timestamp)
            .unwrap_or(now_ms);

        Some(Event {
            content: content.to_string(),
            sender: first_text(record, &self.fields.sender).unwrap_or_default(),
            user_token: first_text(record, &self.fields.user_token).unwrap_or_default(),
            live_id: first_text(record, &self.fields.live_id).unwrap_or_default(),
            timestamp,
        })
    }
}

fn lookup<'a>(record: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(record, |node, segment| node.as_object()?.get(segment))
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn first_text(record: &Value, candidates: &[&str]) -> Option<String> {
    candidates
        .iter()
        .filter_map(|path| lookup(record, path))
        .find_map(as_text)
}

fn parse_timestamp(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && f.fract() == 0.0)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const NOW: i64 = 1_700_000_000_000;

    #[test]
    fn prefers_primary_names_and_falls_back() {
        let codec = EventCodec::default();
        let record = json!({
            "content": "  hi there ",
            "tbNick": "",
            "publisherNick": "bob",
            "timestamp": "1699999999000",
            "renders": {"liveId": "room-7", "userToken": "ut"}
        });
        let event = codec.decode_at(&record, NOW).expect("decoded");
        assert_eq!(event.content, "hi there");
        assert_eq!(event.sender, "bob");
        assert_eq!(event.user_token, "ut");
        assert_eq!(event.live_id, "room-7");
        assert_eq!(event.timestamp, 1_699_999_999_000);
    }

    #[test]
    fn rejects_missing_or_blank_content() {
        let codec = EventCodec::default();
        assert!(codec.decode_at(&json!({"sender": "x"}), NOW).is_none());
        assert!(codec.decode_at(&json!({"content": "   "}), NOW).is_none());
        assert!(codec.decode_at(&json!("content"), NOW).is_none());
        assert!(codec.decode_at(&json!({"content": {"nested": 1}}), NOW).is_none());
    }

    #[test]
    fn missing_timestamp_defaults_to_now_and_sender_to_empty() {
        let codec = EventCodec::default();
        let event = codec.decode_at(&json!({"text": "yo"}), NOW).unwrap();
        assert_eq!(event.timestamp, NOW);
        assert_eq!(event.sender, "");
        assert_eq!(event.user_token, "");
    }

    #[test]
    fn wall_clock_fills_missing_timestamp() {
        let before = Utc::now().timestamp_millis();
        let event = EventCodec::default()
            .decode(&json!({"content": "now"}))
            .unwrap();
        assert!(event.timestamp >= before);
    }

    #[test]
    fn unparseable_timestamp_falls_through_candidates() {
        let codec = EventCodec::default();
        let event = codec
            .decode_at(&json!({"content": "a", "timestamp": "soon", "ts": 42.0}), NOW)
            .unwrap();
        assert_eq!(event.timestamp, 42);
    }

    #[test]
    fn numeric_user_id_becomes_token() {
        let codec = EventCodec::default();
        let event = codec
            .decode_at(&json!({"content": "a", "userId": 1234}), NOW)
            .unwrap();
        assert_eq!(event.user_token, "1234");
    }

    #[test]
    fn re_encoded_event_decodes_to_same_fingerprint() {
        let codec = EventCodec::default();
        let original = codec
            .decode_at(
                &json!({"content": "x", "nickname": "n", "userId": "u", "timestamp": 5}),
                NOW,
            )
            .unwrap();
        let again = codec.decode_at(&original.to_record(), NOW + 10).unwrap();
        assert_eq!(original, again);
        assert_eq!(original.fingerprint(), again.fingerprint());
    }
}
