//! Helpers at the producer boundary: unwrapping captured response bodies and pulling the
//! room identity out of observed request URLs.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::RawRecord;

static JSONP_WRAPPER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)mtopjsonp\d+\((.*)\)").expect("jsonp wrapper pattern is valid")
});

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("body is not wrapped in a jsonp callback")]
    NotJsonp,
    #[error("invalid json payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// Strip an `mtopjsonpN(...)` callback wrapper and parse the inner JSON.
pub fn unwrap_jsonp(body: &str) -> Result<Value, CodecError> {
    let inner = JSONP_WRAPPER
        .captures(body)
        .and_then(|caps| caps.get(1))
        .ok_or(CodecError::NotJsonp)?;
    Ok(serde_json::from_str(inner.as_str())?)
}

/// Parse a captured body that is either plain JSON or a jsonp-wrapped payload.
pub fn parse_payload(body: &str) -> Result<Value, CodecError> {
    let trimmed = body.trim();
    match serde_json::from_str(trimmed) {
        Ok(value) => Ok(value),
        Err(_) => unwrap_jsonp(trimmed),
    }
}

/// Pull the comment records out of a payload.
///
/// Accepts a bare array of records or an envelope of the shape `{data: {comments: [...]}}`.
/// Anything else yields an empty batch.
pub fn extract_comments(payload: &Value) -> Vec<RawRecord> {
    if let Some(items) = payload.as_array() {
        return items.clone();
    }
    payload
        .get("data")
        .and_then(|data| data.get("comments"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

/// Resolve the room id carried by an observed comment-API request URL.
///
/// The `data` query parameter holds a JSON document whose `topic` is the room id; a
/// plain `liveId` parameter is accepted as a fallback.
pub fn extract_live_id(raw_url: &str) -> Option<String> {
    let url = match Url::parse(raw_url) {
        Ok(url) => url,
        Err(err) => {
            debug!(target: "event-codec", ?err, "unparseable request url");
            return None;
        }
    };

    let mut fallback = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "data" => {
                if let Some(topic) = topic_from_data(&value) {
                    return Some(topic);
                }
            }
            "liveId" if !value.trim().is_empty() => fallback = Some(value.trim().to_string()),
            _ => {}
        }
    }
    fallback
}

fn topic_from_data(data: &str) -> Option<String> {
    let parsed: Value = serde_json::from_str(data).ok()?;
    match parsed.get("topic")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unwraps_jsonp_bodies() {
        let body = r#"mtopjsonp12({"data":{"comments":[{"content":"a"}]}})"#;
        let payload = unwrap_jsonp(body).unwrap();
        assert_eq!(extract_comments(&payload).len(), 1);
    }

    #[test]
    fn rejects_unwrapped_bodies() {
        assert!(matches!(unwrap_jsonp("{}"), Err(CodecError::NotJsonp)));
        assert!(matches!(
            unwrap_jsonp("mtopjsonp1({oops)"),
            Err(CodecError::InvalidJson(_))
        ));
    }

    #[test]
    fn parse_payload_accepts_plain_json() {
        let payload = parse_payload(r#" [{"content":"x"}] "#).unwrap();
        assert_eq!(extract_comments(&payload), vec![json!({"content": "x"})]);
    }

    #[test]
    fn extract_comments_tolerates_other_shapes() {
        assert!(extract_comments(&json!({"data": {}})).is_empty());
        assert!(extract_comments(&json!("nope")).is_empty());
    }

    #[test]
    fn live_id_from_data_topic() {
        let url = "https://h5api.m.taobao.com/h5/mtop.taobao.iliad.comment.query.latest/1.0/?data=%7B%22topic%22%3A%22abc-123%22%7D";
        assert_eq!(extract_live_id(url).as_deref(), Some("abc-123"));
    }

    #[test]
    fn live_id_falls_back_to_query_parameter() {
        assert_eq!(
            extract_live_id("https://example.com/x?liveId=77").as_deref(),
            Some("77")
        );
        assert_eq!(extract_live_id("https://example.com/x?data=notjson"), None);
        assert_eq!(extract_live_id("not a url"), None);
    }
}
