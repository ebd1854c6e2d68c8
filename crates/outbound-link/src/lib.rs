//! Managed connection from the background context to the remote consumer.
//!
//! [`OutboundConnection`] owns a [`ReconnectMachine`] and drives it against a
//! [`Connector`]. Sends never block and never queue while the link is down: an event
//! offered while not connected is dropped and `send` returns `false`.

pub mod config;
pub mod connector;
pub mod machine;
pub mod metrics;
pub mod wire;

use std::sync::Arc;

use danmu_core_types::Event;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use config::{OutboundConfig, ReconnectPolicy, DEFAULT_URL};
pub use connector::{Connector, Link, WsConnector};
pub use machine::{ConnectionState, ReconnectMachine, Step};
pub use wire::{DanmuPayload, WireMessage};

#[derive(Debug, Error)]
pub enum OutboundError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("remote closed the connection")]
    Closed,
}

struct Shared {
    machine: ReconnectMachine,
    outgoing: Option<mpsc::UnboundedSender<String>>,
    /// Bumped on every enable/disable/reset so a superseded driver task cannot touch
    /// the machine after it has been replaced.
    epoch: u64,
}

struct Driver {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

struct Inner {
    shared: Mutex<Shared>,
    state_tx: watch::Sender<ConnectionState>,
    connector: Arc<dyn Connector>,
    driver: Mutex<Option<Driver>>,
}

impl Inner {
    /// Must be called with `shared` still locked, so published states follow the order
    /// of machine transitions.
    fn publish(&self, shared: &Shared) {
        let state = shared.machine.state();
        metrics::set_disabled(state == ConnectionState::Disabled);
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
    }

    fn on_connected(&self, epoch: u64, outgoing: mpsc::UnboundedSender<String>) -> bool {
        let mut shared = self.shared.lock();
        if shared.epoch != epoch || !shared.machine.on_connected() {
            return false;
        }
        shared.outgoing = Some(outgoing);
        self.publish(&shared);
        true
    }

    fn on_failure(&self, epoch: u64) -> Step {
        let mut shared = self.shared.lock();
        if shared.epoch != epoch {
            return Step::Halt;
        }
        shared.outgoing = None;
        let step = shared.machine.on_failure();
        self.publish(&shared);
        step
    }

    fn begin_retry(&self, epoch: u64) -> bool {
        let mut shared = self.shared.lock();
        if shared.epoch != epoch || !shared.machine.begin_retry() {
            return false;
        }
        self.publish(&shared);
        true
    }
}

#[derive(Clone)]
pub struct OutboundConnection {
    inner: Arc<Inner>,
}

impl OutboundConnection {
    pub fn new(policy: ReconnectPolicy, connector: Arc<dyn Connector>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                shared: Mutex::new(Shared {
                    machine: ReconnectMachine::new(policy),
                    outgoing: None,
                    epoch: 0,
                }),
                state_tx,
                connector,
                driver: Mutex::new(None),
            }),
        }
    }

    pub fn websocket(config: &OutboundConfig) -> Self {
        Self::new(
            config.reconnect.clone(),
            Arc::new(WsConnector::new(config.url.clone())),
        )
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Re-arm the link with a full reconnect budget and start connecting. Must be called
    /// from within a Tokio runtime.
    pub fn enable(&self) {
        let mut driver = self.inner.driver.lock();
        if let Some(previous) = driver.take() {
            previous.token.cancel();
        }
        let epoch = {
            let mut shared = self.inner.shared.lock();
            shared.epoch += 1;
            shared.outgoing = None;
            shared.machine.enable();
            self.inner.publish(&shared);
            shared.epoch
        };
        info!(target: "outbound-link", "outbound link enabled");

        let token = CancellationToken::new();
        let handle = tokio::spawn(run_driver(Arc::clone(&self.inner), epoch, token.clone()));
        *driver = Some(Driver { token, handle });
    }

    /// Close any connection and stay `Disabled` until the next [`enable`](Self::enable).
    pub fn disable(&self) {
        self.halt(|machine| machine.disable());
        info!(target: "outbound-link", "outbound link disabled");
    }

    /// Close any connection and return to the initial `Disconnected` state.
    pub fn reset(&self) {
        self.halt(|machine| machine.reset());
        debug!(target: "outbound-link", "outbound link reset");
    }

    fn halt(&self, apply: impl FnOnce(&mut ReconnectMachine)) {
        let mut driver = self.inner.driver.lock();
        if let Some(previous) = driver.take() {
            previous.token.cancel();
        }
        let mut shared = self.inner.shared.lock();
        shared.epoch += 1;
        shared.outgoing = None;
        apply(&mut shared.machine);
        self.inner.publish(&shared);
    }

    /// Offer one event to the remote consumer. Returns `true` only when the frame was
    /// handed to an open connection.
    pub fn send(&self, event: &Event) -> bool {
        let (state, outgoing) = {
            let shared = self.inner.shared.lock();
            let state = shared.machine.state();
            let outgoing = match state {
                ConnectionState::Connected => shared.outgoing.clone(),
                _ => None,
            };
            (state, outgoing)
        };
        let Some(outgoing) = outgoing else {
            debug!(target: "outbound-link", %state, "not connected, event dropped");
            metrics::record_frame("not_connected");
            return false;
        };

        let frame = match WireMessage::from_event(event).to_json() {
            Ok(frame) => frame,
            Err(err) => {
                warn!(target: "outbound-link", ?err, "failed to encode frame");
                metrics::record_frame("encode_error");
                return false;
            }
        };
        if outgoing.send(frame).is_err() {
            metrics::record_frame("closed");
            return false;
        }
        metrics::record_frame("sent");
        true
    }

    /// Cancel the driver task and wait for it to finish.
    pub async fn shutdown(&self) {
        let driver = self.inner.driver.lock().take();
        if let Some(driver) = driver {
            driver.token.cancel();
            let _ = driver.handle.await;
        }
    }
}

async fn run_driver(inner: Arc<Inner>, epoch: u64, token: CancellationToken) {
    loop {
        let attempt = tokio::select! {
            _ = token.cancelled() => return,
            attempt = inner.connector.connect() => attempt,
        };

        match attempt {
            Ok(link) => {
                metrics::record_connect("connected");
                let (tx, rx) = mpsc::unbounded_channel();
                if !inner.on_connected(epoch, tx) {
                    return;
                }
                info!(target: "outbound-link", "connected to remote consumer");
                let outcome = tokio::select! {
                    _ = token.cancelled() => return,
                    outcome = link.run(rx) => outcome,
                };
                match outcome {
                    Ok(()) => debug!(target: "outbound-link", "link finished"),
                    Err(err) => warn!(target: "outbound-link", %err, "connection lost"),
                }
            }
            Err(err) => {
                metrics::record_connect("failed");
                warn!(target: "outbound-link", %err, "connect attempt failed");
            }
        }

        match inner.on_failure(epoch) {
            Step::RetryAfter(delay) => {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
                if !inner.begin_retry(epoch) {
                    return;
                }
            }
            Step::Halt => {
                let state = inner.shared.lock().machine.state();
                if state == ConnectionState::Disabled {
                    warn!(target: "outbound-link", "reconnect budget exhausted, outbound link disabled");
                }
                return;
            }
        }
    }
}
