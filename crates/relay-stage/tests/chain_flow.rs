use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use danmu_core_types::{ConsumerMessage, ContextKind};
use danmu_fanout::{Consumer, DeliveryError, Fanout};
use relay_stage::{CaptureController, ChainConfig, Envelope, StageChain, StageError};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::timeout;

struct Probe {
    tx: mpsc::UnboundedSender<ConsumerMessage>,
}

#[async_trait]
impl Consumer for Probe {
    fn name(&self) -> &str {
        "probe"
    }

    async fn deliver(&self, message: &ConsumerMessage) -> Result<(), DeliveryError> {
        self.tx
            .send(message.clone())
            .map_err(|_| DeliveryError::ConsumerGone)
    }
}

struct Harness {
    chain: Arc<StageChain>,
    capture: Arc<CaptureController>,
    rx: mpsc::UnboundedReceiver<ConsumerMessage>,
    sentinels: u32,
}

impl Harness {
    fn new() -> Self {
        let capture = CaptureController::new();
        let fanout = Fanout::new();
        let (tx, rx) = mpsc::unbounded_channel();
        fanout.register(Arc::new(Probe { tx }));
        let chain = StageChain::spawn(ChainConfig::default(), capture.clone(), fanout)
            .expect("default chain is valid");
        Self {
            chain,
            capture,
            rx,
            sentinels: 0,
        }
    }

    fn send(&self, records: Vec<Value>) -> bool {
        self.chain.entry().send(Envelope::batch(records))
    }

    /// Push a unique marker through the chain and collect everything delivered before it.
    async fn drain(&mut self) -> Vec<ConsumerMessage> {
        self.sentinels += 1;
        let marker = format!("__sentinel_{}", self.sentinels);
        assert!(self.send(vec![json!({"content": marker, "sender": "probe", "timestamp": 0})]));
        let mut seen = Vec::new();
        loop {
            let message = timeout(Duration::from_secs(5), self.rx.recv())
                .await
                .expect("sentinel delivered in time")
                .expect("fanout alive");
            if let ConsumerMessage::NewComment { event } = &message {
                if event.content == marker {
                    return seen;
                }
            }
            seen.push(message);
        }
    }
}

/// Let the hop tasks work through whatever is queued.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

fn comments(messages: &[ConsumerMessage]) -> Vec<String> {
    messages
        .iter()
        .filter_map(|message| match message {
            ConsumerMessage::NewComment { event } => Some(event.content.clone()),
            _ => None,
        })
        .collect()
}

fn sample_batch() -> Vec<Value> {
    vec![
        json!({"content": "hello", "sender": "a", "timestamp": 1}),
        json!({"content": "hello", "sender": "a", "timestamp": 1}),
        json!({"content": "other", "sender": "b", "timestamp": 2}),
    ]
}

#[tokio::test]
async fn idle_chain_delivers_nothing() {
    let mut harness = Harness::new();
    assert!(harness.send(sample_batch()));
    settle().await;
    harness.capture.start();
    assert!(harness.drain().await.is_empty());
}

#[tokio::test]
async fn batch_crosses_every_hop_once() {
    let mut harness = Harness::new();
    harness.capture.start();
    assert!(harness.send(sample_batch()));
    assert_eq!(comments(&harness.drain().await), vec!["hello", "other"]);

    assert!(harness.send(sample_batch()));
    assert!(harness.drain().await.is_empty());
}

#[tokio::test]
async fn restart_of_capture_forgets_history() {
    let mut harness = Harness::new();
    harness.capture.start();
    harness.send(sample_batch());
    assert_eq!(comments(&harness.drain().await).len(), 2);

    harness.capture.start();
    harness.send(sample_batch());
    assert_eq!(comments(&harness.drain().await), vec!["hello", "other"]);
}

#[tokio::test]
async fn torn_down_context_loses_traffic_until_restarted() {
    let mut harness = Harness::new();
    harness.capture.start();

    harness.chain.teardown(ContextKind::Content).unwrap();
    assert!(!harness.chain.is_reachable(ContextKind::Content));
    assert!(harness.chain.producer_reachable());
    assert!(harness.send(vec![json!({"content": "lost", "sender": "a", "timestamp": 5})]));
    settle().await;

    let before = harness.chain.context_id(ContextKind::Background);
    harness.chain.restart(ContextKind::Content).unwrap();
    assert!(harness.chain.is_reachable(ContextKind::Content));
    assert_eq!(harness.chain.context_id(ContextKind::Background), before);

    harness.send(vec![json!({"content": "lost", "sender": "a", "timestamp": 5})]);
    harness.send(vec![json!({"content": "fresh", "sender": "a", "timestamp": 6})]);
    assert_eq!(comments(&harness.drain().await), vec!["fresh"]);
}

#[tokio::test]
async fn producer_teardown_makes_entry_unreachable() {
    let harness = Harness::new();
    harness.chain.teardown(ContextKind::Inject).unwrap();
    assert!(!harness.chain.producer_reachable());
    assert!(!harness.send(sample_batch()));
}

#[tokio::test]
async fn observed_request_announces_room_and_backfills_events() {
    let mut harness = Harness::new();
    harness.capture.start();
    let url = "https://h5api.example.test/h5/mtop.taobao.iliad.comment.query.latest/1.0/?data=%7B%22topic%22%3A%22room-1%22%7D";
    let entry = harness.chain.entry();
    assert!(entry.send(Envelope::RequestObserved { url: url.into() }));
    assert!(entry.send(Envelope::RequestObserved { url: url.into() }));
    harness.send(vec![json!({"content": "hi", "sender": "a", "timestamp": 9})]);

    let delivered = harness.drain().await;
    let urls = delivered
        .iter()
        .filter(|message| matches!(message, ConsumerMessage::RawUrl { .. }))
        .count();
    assert_eq!(urls, 1);
    assert_eq!(
        delivered[0],
        ConsumerMessage::LiveInfo {
            live_id: "room-1".into()
        }
    );
    let event = delivered
        .iter()
        .find_map(|message| match message {
            ConsumerMessage::NewComment { event } => Some(event.clone()),
            _ => None,
        })
        .expect("comment delivered");
    assert_eq!(event.live_id, "room-1");
}

#[tokio::test]
async fn observations_are_ignored_while_idle() {
    let mut harness = Harness::new();
    harness.chain.entry().send(Envelope::ResponseObserved {
        url: "https://example.test".into(),
        body: "{}".into(),
    });
    settle().await;
    harness.capture.start();
    assert!(harness.drain().await.is_empty());
}

#[tokio::test]
async fn invalid_chains_are_rejected() {
    let capture = CaptureController::new();
    let empty = ChainConfig {
        hops: Vec::new(),
        ..ChainConfig::default()
    };
    assert!(matches!(
        StageChain::spawn(empty, capture.clone(), Fanout::new()),
        Err(StageError::EmptyChain)
    ));

    let doubled = ChainConfig {
        hops: vec![ContextKind::Inject, ContextKind::Inject],
        ..ChainConfig::default()
    };
    assert!(matches!(
        StageChain::spawn(doubled, capture, Fanout::new()),
        Err(StageError::DuplicateHop(ContextKind::Inject))
    ));
}
