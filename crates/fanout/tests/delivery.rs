use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use danmu_core_types::{ConsumerMessage, Event};
use danmu_fanout::{
    to_mpsc, Consumer, DeliveryError, Fanout, OutboundConsumer, UiChannel,
};
use outbound_link::{OutboundConnection, OutboundConfig};
use parking_lot::Mutex;

struct Recording {
    seen: Mutex<Vec<ConsumerMessage>>,
}

#[async_trait]
impl Consumer for Recording {
    fn name(&self) -> &str {
        "recording"
    }

    async fn deliver(&self, message: &ConsumerMessage) -> Result<(), DeliveryError> {
        self.seen.lock().push(message.clone());
        Ok(())
    }
}

struct Broken;

#[async_trait]
impl Consumer for Broken {
    fn name(&self) -> &str {
        "broken"
    }

    async fn deliver(&self, _message: &ConsumerMessage) -> Result<(), DeliveryError> {
        Err(DeliveryError::Other("disk full".into()))
    }
}

struct Stalled;

#[async_trait]
impl Consumer for Stalled {
    fn name(&self) -> &str {
        "stalled"
    }

    async fn deliver(&self, _message: &ConsumerMessage) -> Result<(), DeliveryError> {
        std::future::pending().await
    }
}

fn comment(content: &str) -> ConsumerMessage {
    ConsumerMessage::NewComment {
        event: Event {
            content: content.into(),
            sender: "bob".into(),
            user_token: String::new(),
            live_id: "room".into(),
            timestamp: 1,
        },
    }
}

#[tokio::test]
async fn failing_consumer_does_not_block_others() {
    let fanout = Fanout::new();
    let recording = Arc::new(Recording {
        seen: Mutex::new(Vec::new()),
    });
    fanout.register(Arc::new(Broken));
    fanout.register(recording.clone());

    assert_eq!(fanout.consumer_names(), vec!["broken", "recording"]);

    let report = fanout.deliver(&comment("hi")).await;
    assert!(!report.all_delivered());
    assert_eq!(report.delivered, vec!["recording".to_string()]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "broken");
    assert_eq!(recording.seen.lock().len(), 1);
}

#[tokio::test]
async fn ui_without_display_reports_gone() {
    let ui = UiChannel::new(8);
    assert!(!ui.is_open());
    assert_eq!(
        ui.deliver(&comment("nobody")).await,
        Err(DeliveryError::ConsumerGone)
    );
}

#[tokio::test]
async fn ui_bridge_preserves_order() {
    let ui = UiChannel::new(8);
    let mut rx = to_mpsc(&ui, 8);
    ui.deliver(&comment("one")).await.unwrap();
    ui.deliver(&comment("two")).await.unwrap();

    assert_eq!(rx.recv().await, Some(comment("one")));
    assert_eq!(rx.recv().await, Some(comment("two")));
}

#[tokio::test]
async fn offline_outbound_drops_comments_only() {
    let consumer = OutboundConsumer::new(OutboundConnection::websocket(&OutboundConfig::default()));
    assert_eq!(
        consumer.deliver(&comment("lost")).await,
        Err(DeliveryError::NotConnected)
    );
    let info = ConsumerMessage::LiveInfo {
        live_id: "room".into(),
    };
    assert_eq!(consumer.deliver(&info).await, Ok(()));
}

#[tokio::test(start_paused = true)]
async fn stalled_consumer_is_abandoned_after_timeout() {
    let fanout = Fanout::with_timeout(Duration::from_millis(100));
    let recording = Arc::new(Recording {
        seen: Mutex::new(Vec::new()),
    });
    fanout.register(Arc::new(Stalled));
    fanout.register(recording.clone());

    let report = fanout.deliver(&comment("late")).await;
    assert_eq!(
        report.failed,
        vec![(
            "stalled".to_string(),
            DeliveryError::TimedOut(Duration::from_millis(100))
        )]
    );
    assert_eq!(report.delivered, vec!["recording".to_string()]);
    assert_eq!(recording.seen.lock().len(), 1);
}
