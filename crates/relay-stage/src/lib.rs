//! Capture-gated relay hops.
//!
//! Each execution context runs one [`RelayStage`] with its own deduplication window.
//! [`StageChain`] wires the contexts together with fire-and-forget [`ContextChannel`]s
//! and hands whatever survives the last hop to the consumer fanout.

pub mod capture;
pub mod chain;
pub mod channel;
pub mod config;
pub mod metrics;
pub mod room;
pub mod stage;

use danmu_core_types::ContextKind;
use event_codec::{extract_comments, parse_payload, CodecError, RawRecord};
use thiserror::Error;

pub use capture::{CaptureController, CaptureStatus};
pub use chain::StageChain;
pub use channel::ContextChannel;
pub use config::{ChainConfig, StageConfig};
pub use metrics::{register_metrics, RelayMetricsSnapshot};
pub use room::{LiveRoom, RequestThrottle};
pub use stage::{RelayStage, StageStats};

#[derive(Debug, Error)]
pub enum StageError {
    #[error("relay chain needs at least one hop")]
    EmptyChain,
    #[error("context {0} appears twice in the relay chain")]
    DuplicateHop(ContextKind),
    #[error("context {0} is not part of the relay chain")]
    UnknownContext(ContextKind),
}

/// Unit of traffic between contexts.
#[derive(Clone, Debug, PartialEq)]
pub enum Envelope {
    /// Raw records as observed from the producer or re-encoded by the previous hop.
    Batch { records: Vec<RawRecord> },
    /// The producer issued a comment query.
    RequestObserved { url: String },
    /// The producer received a comment query response.
    ResponseObserved { url: String, body: String },
}

impl Envelope {
    pub fn batch(records: Vec<RawRecord>) -> Self {
        Envelope::Batch { records }
    }

    /// Turn one intercepted producer response into the envelopes the entry hop expects.
    /// The body may be plain JSON or JSONP-wrapped.
    pub fn from_response(url: Option<&str>, body: &str) -> Result<Vec<Envelope>, CodecError> {
        let payload = parse_payload(body)?;
        let records = extract_comments(&payload);
        let mut envelopes = Vec::with_capacity(3);
        if let Some(url) = url {
            envelopes.push(Envelope::RequestObserved {
                url: url.to_string(),
            });
            envelopes.push(Envelope::ResponseObserved {
                url: url.to_string(),
                body: body.to_string(),
            });
        }
        envelopes.push(Envelope::Batch { records });
        Ok(envelopes)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::Batch { .. } => "batch",
            Envelope::RequestObserved { .. } => "request",
            Envelope::ResponseObserved { .. } => "response",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_without_url_is_a_bare_batch() {
        let body = r#"mtopjsonp3({"data":{"comments":[{"content":"a"},{"content":"b"}]}})"#;
        let envelopes = Envelope::from_response(None, body).unwrap();
        assert_eq!(envelopes.len(), 1);
        match &envelopes[0] {
            Envelope::Batch { records } => assert_eq!(records.len(), 2),
            other => panic!("unexpected envelope {other:?}"),
        }
    }

    #[test]
    fn response_with_url_announces_request_first() {
        let envelopes =
            Envelope::from_response(Some("https://example.test/q"), r#"{"data":{"comments":[]}}"#)
                .unwrap();
        let kinds: Vec<_> = envelopes.iter().map(Envelope::kind).collect();
        assert_eq!(kinds, vec!["request", "response", "batch"]);
    }

    #[test]
    fn garbage_body_is_rejected() {
        assert!(Envelope::from_response(None, "not json").is_err());
    }
}
