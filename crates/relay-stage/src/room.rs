//! Room identity tracking and request throttling for the consumer-side hop.

use std::time::Duration;

use danmu_core_types::Event;
use tokio::time::Instant;
use tracing::info;

#[derive(Debug, Default)]
pub struct LiveRoom {
    current: Option<String>,
}

impl LiveRoom {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Adopt `live_id` as the current room. Returns the id when it differs from the
    /// previous one and should be announced.
    pub fn observe(&mut self, live_id: &str) -> Option<String> {
        let live_id = live_id.trim();
        if live_id.is_empty() || self.current.as_deref() == Some(live_id) {
            return None;
        }
        self.current = Some(live_id.to_string());
        info!(target: "relay-stage", live_id, "live room updated");
        Some(live_id.to_string())
    }

    /// Fill an event's missing room id from the current room, or learn the room from the
    /// event when it carries one.
    pub fn resolve(&mut self, event: &mut Event) -> Option<String> {
        if event.live_id.is_empty() {
            if let Some(current) = &self.current {
                event.backfill_live_id(current);
            }
            return None;
        }
        self.observe(&event.live_id)
    }

    pub fn clear(&mut self) {
        self.current = None;
    }
}

/// Admits at most one observed request per interval.
#[derive(Debug)]
pub struct RequestThrottle {
    interval: Duration,
    last: Option<Instant>,
}

impl RequestThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    pub fn admit(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last {
            if now.saturating_duration_since(last) < self.interval {
                return false;
            }
        }
        self.last = Some(now);
        true
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(live_id: &str) -> Event {
        Event {
            content: "c".into(),
            sender: "s".into(),
            user_token: String::new(),
            live_id: live_id.into(),
            timestamp: 1,
        }
    }

    #[test]
    fn announces_only_changes() {
        let mut room = LiveRoom::new();
        assert_eq!(room.observe("r1").as_deref(), Some("r1"));
        assert_eq!(room.observe("r1"), None);
        assert_eq!(room.observe(""), None);
        assert_eq!(room.observe("r2").as_deref(), Some("r2"));
        assert_eq!(room.current(), Some("r2"));
    }

    #[test]
    fn backfills_missing_ids() {
        let mut room = LiveRoom::new();
        let mut unknown = event("");
        assert_eq!(room.resolve(&mut unknown), None);
        assert_eq!(unknown.live_id, "");

        let mut known = event("r9");
        assert_eq!(room.resolve(&mut known).as_deref(), Some("r9"));

        let mut later = event("");
        room.resolve(&mut later);
        assert_eq!(later.live_id, "r9");
    }

    #[test]
    fn throttle_spaces_requests() {
        let mut throttle = RequestThrottle::new(Duration::from_millis(2000));
        let t0 = Instant::now();
        assert!(throttle.admit(t0));
        assert!(!throttle.admit(t0 + Duration::from_millis(1999)));
        assert!(throttle.admit(t0 + Duration::from_millis(2000)));
        throttle.reset();
        assert!(throttle.admit(t0 + Duration::from_millis(2001)));
    }
}
