//! Runtime wiring of relay hops: one task per execution context.
//!
//! Hops talk only through [`ContextChannel`]s, so any hop can be torn down and respawned
//! without the others noticing beyond lost traffic. The last hop owns the room tracker
//! and hands events to the [`Fanout`].

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use danmu_core_types::{ConsumerMessage, ContextId, ContextKind, Event};
use danmu_fanout::Fanout;
use dashmap::DashMap;
use event_codec::extract_live_id;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::capture::{CaptureController, CaptureStatus};
use crate::channel::ContextChannel;
use crate::config::ChainConfig;
use crate::room::{LiveRoom, RequestThrottle};
use crate::stage::RelayStage;
use crate::{Envelope, StageError};

struct HopRuntime {
    id: ContextId,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct StageChain {
    config: ChainConfig,
    capture: Arc<CaptureController>,
    fanout: Arc<Fanout>,
    routes: Vec<ContextChannel<Envelope>>,
    hops: DashMap<ContextKind, HopRuntime>,
    shutdown: CancellationToken,
}

impl StageChain {
    /// Spawn every configured hop. Must be called from within a Tokio runtime.
    pub fn spawn(
        config: ChainConfig,
        capture: Arc<CaptureController>,
        fanout: Arc<Fanout>,
    ) -> Result<Arc<Self>, StageError> {
        if config.hops.is_empty() {
            return Err(StageError::EmptyChain);
        }
        let mut unique = HashSet::new();
        for kind in &config.hops {
            if !unique.insert(*kind) {
                return Err(StageError::DuplicateHop(*kind));
            }
        }

        let routes = config
            .hops
            .iter()
            .map(|kind| ContextChannel::detached(*kind))
            .collect();
        let chain = Arc::new(Self {
            config,
            capture,
            fanout,
            routes,
            hops: DashMap::new(),
            shutdown: CancellationToken::new(),
        });
        for position in 0..chain.routes.len() {
            chain.spawn_hop(position);
        }
        info!(
            target: "relay-stage",
            hops = chain.routes.len(),
            "relay chain started"
        );
        Ok(chain)
    }

    pub fn capture(&self) -> &Arc<CaptureController> {
        &self.capture
    }

    pub fn fanout(&self) -> &Arc<Fanout> {
        &self.fanout
    }

    pub fn hops(&self) -> &[ContextKind] {
        &self.config.hops
    }

    /// Route into the producer-side hop.
    pub fn entry(&self) -> ContextChannel<Envelope> {
        self.routes[0].clone()
    }

    pub fn is_reachable(&self, kind: ContextKind) -> bool {
        self.position(kind)
            .map(|position| self.routes[position].is_reachable())
            .unwrap_or(false)
    }

    pub fn producer_reachable(&self) -> bool {
        self.routes[0].is_reachable()
    }

    pub fn context_id(&self, kind: ContextKind) -> Option<ContextId> {
        self.hops.get(&kind).map(|hop| hop.id)
    }

    /// Destroy the live instance of `kind`. Traffic routed to it is lost until a restart.
    pub fn teardown(&self, kind: ContextKind) -> Result<(), StageError> {
        let position = self.position(kind).ok_or(StageError::UnknownContext(kind))?;
        self.routes[position].detach();
        if let Some((_, hop)) = self.hops.remove(&kind) {
            hop.token.cancel();
            info!(target: "relay-stage", context = %kind, id = %hop.id.0, "context torn down");
        }
        Ok(())
    }

    /// Replace the instance of `kind` with a fresh one. The new instance starts with an
    /// empty deduplication window.
    pub fn restart(&self, kind: ContextKind) -> Result<ContextId, StageError> {
        self.teardown(kind)?;
        let position = self.position(kind).ok_or(StageError::UnknownContext(kind))?;
        Ok(self.spawn_hop(position))
    }

    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        for route in &self.routes {
            route.detach();
        }
        let kinds: Vec<ContextKind> = self.hops.iter().map(|hop| *hop.key()).collect();
        for kind in kinds {
            if let Some((_, hop)) = self.hops.remove(&kind) {
                let _ = hop.handle.await;
            }
        }
        info!(target: "relay-stage", "relay chain stopped");
    }

    fn position(&self, kind: ContextKind) -> Option<usize> {
        self.config.hops.iter().position(|hop| *hop == kind)
    }

    fn spawn_hop(&self, position: usize) -> ContextId {
        let kind = self.config.hops[position];
        let inbox = self.routes[position].attach(self.config.channel_capacity);
        let stage = RelayStage::new(kind, self.config.stage_config(position), Arc::clone(&self.capture));
        let next = self.routes.get(position + 1).cloned();
        let terminal = match next {
            Some(_) => None,
            None => Some(Terminal {
                fanout: Arc::clone(&self.fanout),
                room: LiveRoom::new(),
                throttle: RequestThrottle::new(Duration::from_millis(
                    self.config.request_interval_ms,
                )),
            }),
        };
        let token = self.shutdown.child_token();
        let mut capture_rx = self.capture.subscribe();
        let generation = capture_rx.borrow_and_update().generation;
        let worker = HopWorker {
            stage,
            inbox,
            next,
            terminal,
            capture_rx,
            generation,
        };
        let handle = tokio::spawn(worker.run(token.clone()));
        let id = ContextId::new();
        self.hops.insert(kind, HopRuntime { id, token, handle });
        debug!(target: "relay-stage", context = %kind, id = %id.0, "context spawned");
        id
    }
}

impl Drop for StageChain {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

struct HopWorker {
    stage: RelayStage,
    inbox: mpsc::Receiver<Envelope>,
    next: Option<ContextChannel<Envelope>>,
    terminal: Option<Terminal>,
    capture_rx: watch::Receiver<CaptureStatus>,
    generation: u64,
}

impl HopWorker {
    async fn run(mut self, token: CancellationToken) {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                changed = self.capture_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let status = *self.capture_rx.borrow_and_update();
                    self.apply_capture(status).await;
                }
                envelope = self.inbox.recv() => match envelope {
                    Some(envelope) => {
                        let status = *self.capture_rx.borrow_and_update();
                        self.apply_capture(status).await;
                        self.handle(envelope, status).await;
                    }
                    None => break,
                },
            }
        }
        trace!(target: "relay-stage", context = %self.stage.kind(), "context worker exited");
    }

    async fn apply_capture(&mut self, status: CaptureStatus) {
        self.stage.sync(status);
        if status.generation == self.generation {
            return;
        }
        self.generation = status.generation;
        if let Some(terminal) = self.terminal.as_mut() {
            terminal.on_new_generation(status).await;
        }
    }

    async fn handle(&mut self, envelope: Envelope, status: CaptureStatus) {
        match envelope {
            Envelope::Batch { records } => {
                let events = self.stage.ingest(&records);
                if events.is_empty() {
                    return;
                }
                if let Some(next) = &self.next {
                    let records = events.iter().map(Event::to_record).collect();
                    next.send(Envelope::Batch { records });
                } else if let Some(terminal) = self.terminal.as_mut() {
                    terminal.deliver_events(events).await;
                }
            }
            observed => {
                if !status.is_capturing() {
                    return;
                }
                if let Some(next) = &self.next {
                    next.send(observed);
                } else if let Some(terminal) = self.terminal.as_mut() {
                    terminal.observe(observed).await;
                }
            }
        }
    }
}

struct Terminal {
    fanout: Arc<Fanout>,
    room: LiveRoom,
    throttle: RequestThrottle,
}

impl Terminal {
    /// Start or clear happened. Clearing forgets the room; starting re-announces it.
    async fn on_new_generation(&mut self, status: CaptureStatus) {
        self.throttle.reset();
        if !status.is_capturing() {
            self.room.clear();
            return;
        }
        if let Some(live_id) = self.room.current().map(str::to_string) {
            self.fanout
                .deliver(&ConsumerMessage::LiveInfo { live_id })
                .await;
        }
    }

    async fn deliver_events(&mut self, events: Vec<Event>) {
        for mut event in events {
            if let Some(live_id) = self.room.resolve(&mut event) {
                self.fanout
                    .deliver(&ConsumerMessage::LiveInfo { live_id })
                    .await;
            }
            self.fanout
                .deliver(&ConsumerMessage::NewComment { event })
                .await;
        }
    }

    async fn observe(&mut self, envelope: Envelope) {
        match envelope {
            Envelope::RequestObserved { url } => {
                if !self.throttle.admit(tokio::time::Instant::now()) {
                    debug!(target: "relay-stage", "request observed too soon, skipped");
                    return;
                }
                if let Some(live_id) = extract_live_id(&url).and_then(|id| self.room.observe(&id)) {
                    self.fanout
                        .deliver(&ConsumerMessage::LiveInfo { live_id })
                        .await;
                }
                self.fanout.deliver(&ConsumerMessage::RawUrl { url }).await;
            }
            Envelope::ResponseObserved { url, body } => {
                self.fanout
                    .deliver(&ConsumerMessage::RawResponse { url, body })
                    .await;
            }
            Envelope::Batch { .. } => {}
        }
    }
}
