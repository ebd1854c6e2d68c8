//! Local display surface: the bounded comment log shown to the operator and its
//! persisted snapshot.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use danmu_core_types::ConsumerMessage;
use danmu_fanout::{to_mpsc, UiChannel};
use outbound_link::{DanmuPayload, WireMessage};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::errors::RelayCliError;

/// State written on stop and clear and read back once at startup.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UiSnapshot {
    pub capturing: bool,
    pub comment_count: u64,
    pub live_id: Option<String>,
    /// Oldest first.
    pub comments: Vec<DanmuPayload>,
}

#[derive(Default)]
struct DisplayState {
    comments: VecDeque<DanmuPayload>,
    comment_count: u64,
    live_id: Option<String>,
    last_url: Option<String>,
}

pub struct DisplayLog {
    limit: usize,
    snapshot_path: Option<PathBuf>,
    state: Mutex<DisplayState>,
}

impl DisplayLog {
    pub fn new(limit: usize, snapshot_path: Option<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            limit: limit.max(1),
            snapshot_path,
            state: Mutex::new(DisplayState::default()),
        })
    }

    /// Build the log and restore the persisted snapshot if one exists. An unreadable
    /// snapshot is logged and ignored.
    pub fn restore(limit: usize, snapshot_path: Option<PathBuf>) -> Arc<Self> {
        let log = Self::new(limit, snapshot_path);
        if let Some(path) = log.snapshot_path.as_deref() {
            match read_snapshot(path) {
                Ok(Some(snapshot)) => log.load(snapshot),
                Ok(None) => {}
                Err(err) => warn!(path = %path.display(), %err, "ignoring unreadable ui snapshot"),
            }
        }
        log
    }

    fn load(&self, snapshot: UiSnapshot) {
        let mut state = self.state.lock();
        let skip = snapshot.comments.len().saturating_sub(self.limit);
        state.comments = snapshot.comments.into_iter().skip(skip).collect();
        state.comment_count = snapshot.comment_count;
        state.live_id = snapshot.live_id;
        info!(restored = state.comments.len(), "ui snapshot restored");
    }

    /// Apply one consumer message. Returns the line to show, if any.
    pub fn apply(&self, message: &ConsumerMessage) -> Option<String> {
        let mut state = self.state.lock();
        match message {
            ConsumerMessage::NewComment { event } => {
                let entry = WireMessage::from_event(event).data;
                let line = render(&entry);
                state.comments.push_back(entry);
                while state.comments.len() > self.limit {
                    state.comments.pop_front();
                }
                state.comment_count += 1;
                Some(line)
            }
            ConsumerMessage::LiveInfo { live_id } => {
                state.live_id = Some(live_id.clone());
                Some(format!("live room: {live_id}"))
            }
            ConsumerMessage::RawUrl { url } => {
                state.last_url = Some(url.clone());
                debug!(%url, "comment api request observed");
                None
            }
            ConsumerMessage::RawResponse { url, body } => {
                debug!(%url, bytes = body.len(), "comment api response observed");
                None
            }
        }
    }

    pub fn comments(&self) -> Vec<DanmuPayload> {
        self.state.lock().comments.iter().cloned().collect()
    }

    pub fn comment_count(&self) -> u64 {
        self.state.lock().comment_count
    }

    pub fn live_id(&self) -> Option<String> {
        self.state.lock().live_id.clone()
    }

    pub fn last_url(&self) -> Option<String> {
        self.state.lock().last_url.clone()
    }

    pub fn clear(&self) {
        *self.state.lock() = DisplayState::default();
    }

    pub fn snapshot(&self, capturing: bool) -> UiSnapshot {
        let state = self.state.lock();
        UiSnapshot {
            capturing,
            comment_count: state.comment_count,
            live_id: state.live_id.clone(),
            comments: state.comments.iter().cloned().collect(),
        }
    }

    pub fn persist(&self, capturing: bool) -> Result<(), RelayCliError> {
        let Some(path) = self.snapshot_path.as_deref() else {
            return Ok(());
        };
        let snapshot = self.snapshot(capturing);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_vec_pretty(&snapshot)?)?;
        debug!(path = %path.display(), comments = snapshot.comments.len(), "ui snapshot written");
        Ok(())
    }

    /// Subscribe to the UI channel and feed every message into the log. `echo` receives
    /// the rendered lines.
    pub fn attach<F>(self: &Arc<Self>, ui: &UiChannel, echo: F) -> JoinHandle<()>
    where
        F: Fn(String) + Send + 'static,
    {
        let mut rx = to_mpsc(ui, 256);
        let log = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if let Some(line) = log.apply(&message) {
                    echo(line);
                }
            }
        })
    }
}

pub fn read_snapshot(path: &Path) -> Result<Option<UiSnapshot>, RelayCliError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&content)?))
}

pub fn render(entry: &DanmuPayload) -> String {
    format!("[{}] {}: {}", entry.time, entry.nickname, entry.content)
}
