//! Connection lifecycle as an explicit state machine.
//!
//! The machine performs no I/O. The driver in the crate root feeds it transport outcomes
//! and executes the [`Step`] it returns.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::ReconnectPolicy;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Terminal until an explicit enable: budget exhausted or explicitly stopped.
    Disabled,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disabled => "connection disabled",
        };
        f.write_str(label)
    }
}

/// What the driver should do after a failure.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Step {
    RetryAfter(Duration),
    Halt,
}

#[derive(Debug)]
pub struct ReconnectMachine {
    policy: ReconnectPolicy,
    state: ConnectionState,
    armed: bool,
    failures: u32,
}

impl ReconnectMachine {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            state: ConnectionState::Disconnected,
            armed: false,
            failures: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Re-arm with a full budget and move to `Connecting`. Valid from every state,
    /// including `Disabled`.
    pub fn enable(&mut self) {
        self.armed = true;
        self.failures = 0;
        self.state = ConnectionState::Connecting;
    }

    pub fn disable(&mut self) {
        self.armed = false;
        self.failures = 0;
        self.state = ConnectionState::Disabled;
    }

    /// Return to the initial, unarmed `Disconnected` state.
    pub fn reset(&mut self) {
        self.armed = false;
        self.failures = 0;
        self.state = ConnectionState::Disconnected;
    }

    pub fn on_connected(&mut self) -> bool {
        if !self.armed || self.state != ConnectionState::Connecting {
            return false;
        }
        self.state = ConnectionState::Connected;
        self.failures = 0;
        true
    }

    /// A connect attempt failed or an established connection was lost.
    pub fn on_failure(&mut self) -> Step {
        if !self.armed {
            return Step::Halt;
        }
        match self.state {
            ConnectionState::Connecting | ConnectionState::Connected => {
                self.failures += 1;
                if self.failures >= self.policy.max_attempts() {
                    self.armed = false;
                    self.state = ConnectionState::Disabled;
                    Step::Halt
                } else {
                    self.state = ConnectionState::Disconnected;
                    Step::RetryAfter(self.policy.backoff())
                }
            }
            ConnectionState::Disconnected | ConnectionState::Disabled => Step::Halt,
        }
    }

    /// Leave the backoff wait. Only an armed, disconnected machine may reconnect.
    pub fn begin_retry(&mut self) -> bool {
        if self.armed && self.state == ConnectionState::Disconnected {
            self.state = ConnectionState::Connecting;
            return true;
        }
        false
    }
}
