//! Danmu relay library
//!
//! Exposes the control surface, configuration and consumer endpoints for the binary and
//! for integration testing.

pub mod config;
pub mod controller;
pub mod errors;
pub mod metrics;
pub mod server;
pub mod ui;

pub use config::{load_configuration, RelayConfiguration};
pub use controller::{RelayController, RelayStatus};
pub use errors::RelayCliError;
pub use server::RemoteConsumer;
pub use ui::{DisplayLog, UiSnapshot};
