//! Two-state capture gate shared by every hop of a process.

use std::sync::Arc;

use danmu_core_types::{Ack, CaptureState};
use tokio::sync::watch;
use tracing::info;

/// Consistent view of the gate. `generation` grows on every start and clear; a hop that
/// observes a new generation drops its deduplication memory before admitting more input.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct CaptureStatus {
    pub state: CaptureState,
    pub generation: u64,
}

impl CaptureStatus {
    pub fn is_capturing(&self) -> bool {
        self.state == CaptureState::Capturing
    }
}

pub struct CaptureController {
    status: watch::Sender<CaptureStatus>,
}

impl CaptureController {
    pub fn new() -> Arc<Self> {
        let (status, _) = watch::channel(CaptureStatus::default());
        Arc::new(Self { status })
    }

    /// Enter `Capturing`. Calling it again restarts capture: the generation still moves
    /// so every hop clears its window.
    pub fn start(&self) -> Ack {
        self.status.send_modify(|status| {
            status.state = CaptureState::Capturing;
            status.generation += 1;
        });
        info!(
            target: "relay-stage",
            generation = self.status().generation,
            "capture started"
        );
        Ack::ok()
    }

    pub fn stop(&self) -> Ack {
        let changed = self.status.send_if_modified(|status| {
            if status.state == CaptureState::Capturing {
                status.state = CaptureState::Idle;
                true
            } else {
                false
            }
        });
        if changed {
            info!(target: "relay-stage", "capture stopped");
        }
        Ack::ok()
    }

    /// Back to the initial `Idle` state and invalidate all deduplication memory.
    pub fn clear(&self) {
        self.status.send_modify(|status| {
            status.state = CaptureState::Idle;
            status.generation += 1;
        });
        info!(target: "relay-stage", "capture state cleared");
    }

    pub fn is_capturing(&self) -> bool {
        self.status.borrow().is_capturing()
    }

    pub fn status(&self) -> CaptureStatus {
        *self.status.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<CaptureStatus> {
        self.status.subscribe()
    }
}
