//! Control surface of one relay process: start, stop and clear.

use std::sync::Arc;

use danmu_core_types::Ack;
use danmu_fanout::{Fanout, OutboundConsumer, UiChannel};
use outbound_link::{ConnectionState, Connector, OutboundConnection, WsConnector};
use relay_stage::{CaptureController, Envelope, StageChain};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::RelayConfiguration;
use crate::errors::RelayCliError;
use crate::ui::DisplayLog;

#[derive(Clone, Debug, Serialize)]
pub struct RelayStatus {
    pub capturing: bool,
    pub generation: u64,
    pub connection: ConnectionState,
    pub comment_count: u64,
    pub live_id: Option<String>,
}

pub struct RelayController {
    capture: Arc<CaptureController>,
    chain: Arc<StageChain>,
    outbound: OutboundConnection,
    ui: Arc<UiChannel>,
    display: Arc<DisplayLog>,
    outbound_enabled: bool,
}

impl RelayController {
    /// Wire a relay against the configured websocket consumer. Must be called from
    /// within a Tokio runtime.
    pub fn launch(config: &RelayConfiguration) -> Result<Self, RelayCliError> {
        Self::with_connector(config, Arc::new(WsConnector::new(config.outbound.url.clone())))
    }

    pub fn with_connector(
        config: &RelayConfiguration,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, RelayCliError> {
        let capture = CaptureController::new();
        let outbound = OutboundConnection::new(config.reconnect_policy(), connector);
        let ui = UiChannel::new(256);

        let fanout = Fanout::new();
        fanout.register(ui.clone());
        fanout.register(Arc::new(OutboundConsumer::new(outbound.clone())));

        let chain = StageChain::spawn(config.chain_config(), Arc::clone(&capture), fanout)?;
        let display = DisplayLog::restore(config.ui.display_limit, config.ui.snapshot_path.clone());

        Ok(Self {
            capture,
            chain,
            outbound,
            ui,
            display,
            outbound_enabled: config.outbound.enabled,
        })
    }

    pub fn chain(&self) -> &Arc<StageChain> {
        &self.chain
    }

    pub fn ui(&self) -> &Arc<UiChannel> {
        &self.ui
    }

    pub fn display(&self) -> &Arc<DisplayLog> {
        &self.display
    }

    pub fn outbound(&self) -> &OutboundConnection {
        &self.outbound
    }

    /// Begin (or restart) capture. Fails when the producer-side context is gone.
    pub fn start(&self) -> Ack {
        if !self.chain.producer_reachable() {
            warn!(target: "relay-control", "start refused, no live producer context");
            return Ack::error(RelayCliError::ProducerUnavailable.to_string());
        }
        let ack = self.capture.start();
        if self.outbound_enabled {
            self.outbound.enable();
        }
        info!(target: "relay-control", "capture started");
        ack
    }

    pub fn stop(&self) -> Ack {
        let ack = self.capture.stop();
        self.outbound.disable();
        self.persist();
        info!(target: "relay-control", "capture stopped");
        ack
    }

    /// Return every component to its initial state and drop the display history.
    pub fn clear(&self) -> Ack {
        self.capture.clear();
        self.outbound.reset();
        self.display.clear();
        self.persist();
        info!(target: "relay-control", "relay state cleared");
        Ack::ok()
    }

    pub fn status(&self) -> RelayStatus {
        let capture = self.capture.status();
        RelayStatus {
            capturing: capture.is_capturing(),
            generation: capture.generation,
            connection: self.outbound.state(),
            comment_count: self.display.comment_count(),
            live_id: self.display.live_id(),
        }
    }

    /// Feed one intercepted producer response into the producer-side context. Returns
    /// how many envelopes were accepted.
    pub fn ingest_response(&self, url: Option<&str>, body: &str) -> Result<usize, RelayCliError> {
        let envelopes = Envelope::from_response(url, body)?;
        let entry = self.chain.entry();
        let accepted = envelopes
            .into_iter()
            .map(|envelope| entry.send(envelope))
            .filter(|sent| *sent)
            .count();
        Ok(accepted)
    }

    pub async fn shutdown(&self) {
        self.outbound.shutdown().await;
        self.chain.shutdown().await;
    }

    fn persist(&self) {
        if let Err(err) = self.display.persist(self.capture.is_capturing()) {
            warn!(target: "relay-control", %err, "failed to persist ui snapshot");
        }
    }
}
