//! Frame format spoken with the remote consumer.

use danmu_core_types::Event;
use event_codec::format_local_time;
use serde::{Deserialize, Serialize};

pub const DANMU_KIND: &str = "danmu";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: DanmuPayload,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DanmuPayload {
    pub content: String,
    pub nickname: String,
    /// Local wall-clock `HH:MM:SS` derived from the event timestamp.
    pub time: String,
    pub live_id: String,
    pub user_token: String,
}

impl WireMessage {
    pub fn from_event(event: &Event) -> Self {
        Self::with_time(event, format_local_time(event.timestamp))
    }

    pub fn with_time(event: &Event, time: String) -> Self {
        Self {
            kind: DANMU_KIND.to_string(),
            data: DanmuPayload {
                content: event.content.clone(),
                nickname: event.sender.clone(),
                time,
                live_id: event.live_id.clone(),
                user_token: event.user_token.clone(),
            },
        }
    }

    pub fn is_danmu(&self) -> bool {
        self.kind == DANMU_KIND
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(frame: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_shape_matches_consumer_protocol() {
        let event = Event {
            content: "hello".into(),
            sender: "alice".into(),
            user_token: "tok".into(),
            live_id: "room".into(),
            timestamp: 0,
        };
        let frame = WireMessage::with_time(&event, "12:00:00".into());
        let value: serde_json::Value =
            serde_json::from_str(&frame.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "danmu");
        assert_eq!(value["data"]["content"], "hello");
        assert_eq!(value["data"]["nickname"], "alice");
        assert_eq!(value["data"]["time"], "12:00:00");
        assert_eq!(value["data"]["liveId"], "room");
        assert_eq!(value["data"]["userToken"], "tok");
    }

    #[test]
    fn parses_partial_frames() {
        let frame = WireMessage::from_json(r#"{"type":"danmu","data":{"content":"x"}}"#).unwrap();
        assert!(frame.is_danmu());
        assert_eq!(frame.data.content, "x");
        assert_eq!(frame.data.nickname, "");
    }
}
