//! Fire-and-forget message routes between execution contexts.
//!
//! A route points at the inbox of whichever instance of a context currently exists. The
//! context may be torn down and respawned at any time; senders are never told whether a
//! message arrived, only whether it could be handed to a live inbox.

use std::sync::Arc;

use danmu_core_types::ContextKind;
use parking_lot::RwLock;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use crate::metrics;

pub struct ContextChannel<T> {
    target: ContextKind,
    inbox: Arc<RwLock<Option<mpsc::Sender<T>>>>,
}

impl<T> Clone for ContextChannel<T> {
    fn clone(&self) -> Self {
        Self {
            target: self.target,
            inbox: Arc::clone(&self.inbox),
        }
    }
}

impl<T> ContextChannel<T> {
    /// Route to `target` with no live instance attached yet.
    pub fn detached(target: ContextKind) -> Self {
        Self {
            target,
            inbox: Arc::new(RwLock::new(None)),
        }
    }

    /// Create a route with a fresh inbox attached and return the receiving half.
    pub fn bounded(target: ContextKind, capacity: usize) -> (Self, mpsc::Receiver<T>) {
        let route = Self::detached(target);
        let rx = route.attach(capacity);
        (route, rx)
    }

    pub fn target(&self) -> ContextKind {
        self.target
    }

    /// Point the route at a new inbox, replacing any previous instance.
    pub fn attach(&self, capacity: usize) -> mpsc::Receiver<T> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        *self.inbox.write() = Some(tx);
        rx
    }

    pub fn detach(&self) {
        self.inbox.write().take();
    }

    pub fn is_reachable(&self) -> bool {
        self.inbox
            .read()
            .as_ref()
            .map(|tx| !tx.is_closed())
            .unwrap_or(false)
    }

    /// Hand a message to the target's inbox without waiting. Returns `false` when the
    /// target does not exist or cannot take more input; the message is then lost.
    pub fn send(&self, message: T) -> bool {
        let sender = self.inbox.read().clone();
        let Some(sender) = sender else {
            debug!(target: "relay-stage", context = %self.target, "context unreachable, message dropped");
            metrics::record_channel_drop(self.target.as_str());
            return false;
        };
        match sender.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(target: "relay-stage", context = %self.target, "context inbox full, message dropped");
                metrics::record_channel_drop(self.target.as_str());
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(target: "relay-stage", context = %self.target, "context gone, message dropped");
                metrics::record_channel_drop(self.target.as_str());
                false
            }
        }
    }
}
