//! Connection lifecycle and the change-gated telemetry store.
//!
//! This crate consolidates the pieces both ingestion channels share: the
//! connection state enum with its transition events, the telemetry error
//! type, and [`TelemetryStore`] — the single owner of the cached snapshot
//! that suppresses redundant updates and fans real changes out to the
//! presentation layer.

use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

pub mod store;

pub use opencluster_schemas::telemetry::{
    BusSample, FLOAT_TOLERANCE, TelemetryField, TelemetryValue, VehicleTelemetry,
};
pub use store::TelemetryStore;

/// Capacity of the notification channel handed to presentation subscribers.
/// A lagging subscriber loses oldest events; ingestion is never blocked.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Receiving half of the store's notification fan-out.
pub type TelemetryEventReceiver = broadcast::Receiver<TelemetryEvent>;

/// Errors surfaced by the telemetry ingestion layer.
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// Connecting to a telemetry source failed.
    #[error("failed to connect to telemetry source: {0}")]
    ConnectionFailed(String),

    /// A message could not be decoded.
    #[error("failed to parse telemetry data: {0}")]
    ParseError(String),

    /// An operation required a connection that is not established.
    #[error("source not connected")]
    NotConnected,

    /// An I/O error from the underlying transport.
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
}

/// Lifecycle of a telemetry channel's connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ConnectionState {
    /// No connection and none in progress.
    #[default]
    Disconnected,
    /// An acquisition attempt is in flight.
    Connecting,
    /// The channel is delivering data.
    Connected,
    /// The last attempt failed; a backoff timer is pending.
    Retrying,
    /// The attempt budget is exhausted. Terminal.
    Failed,
}

impl ConnectionState {
    /// Whether the channel is delivering data.
    pub fn is_connected(self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// Whether the channel is down, including terminally.
    pub fn is_disconnected(self) -> bool {
        matches!(self, ConnectionState::Disconnected | ConnectionState::Failed)
    }

    /// Whether no further attempts will be made.
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Failed)
    }

    /// Whether the channel is between attempts.
    pub fn is_transitioning(self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Retrying)
    }
}

/// One observed connection transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionStateEvent {
    /// Which channel transitioned (e.g. `"ipc"`).
    pub channel: String,
    /// State before the transition.
    pub previous_state: ConnectionState,
    /// State after the transition.
    pub new_state: ConnectionState,
    /// Human-readable cause, when one is known.
    pub reason: Option<String>,
}

impl ConnectionStateEvent {
    /// Build a transition event.
    pub fn new(
        channel: impl Into<String>,
        previous_state: ConnectionState,
        new_state: ConnectionState,
        reason: Option<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            previous_state,
            new_state,
            reason,
        }
    }

    /// Whether this event reports a loss of connectivity.
    pub fn is_disconnection(&self) -> bool {
        self.previous_state.is_connected() && self.new_state.is_disconnected()
    }

    /// Whether this event reports connectivity being established.
    pub fn is_connection(&self) -> bool {
        !self.previous_state.is_connected() && self.new_state.is_connected()
    }
}

/// Notification emitted by the store to the presentation layer.
#[derive(Debug, Clone)]
pub enum TelemetryEvent {
    /// One field crossed the change gate; carries the new value.
    FieldChanged {
        /// The slot that changed.
        field: TelemetryField,
        /// Its new value.
        value: TelemetryValue,
    },
    /// The connectivity status actually changed.
    Connectivity(ConnectionStateEvent),
    /// A transient, non-fatal condition (failed poll, dropped message).
    Warning {
        /// Which channel reported it.
        channel: String,
        /// What happened.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn test_connection_state_predicates() -> TestResult {
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Retrying.is_connected());
        assert!(ConnectionState::Disconnected.is_disconnected());
        assert!(ConnectionState::Failed.is_disconnected());
        assert!(ConnectionState::Failed.is_terminal());
        assert!(ConnectionState::Connecting.is_transitioning());
        assert!(ConnectionState::Retrying.is_transitioning());
        Ok(())
    }

    #[test]
    fn test_connection_event_direction() -> TestResult {
        let up = ConnectionStateEvent::new(
            "ipc",
            ConnectionState::Connecting,
            ConnectionState::Connected,
            None,
        );
        assert!(up.is_connection());
        assert!(!up.is_disconnection());

        let down = ConnectionStateEvent::new(
            "ipc",
            ConnectionState::Connected,
            ConnectionState::Disconnected,
            Some("torn down".to_string()),
        );
        assert!(down.is_disconnection());
        Ok(())
    }

    #[test]
    fn test_default_state_is_disconnected() -> TestResult {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
        Ok(())
    }
}
