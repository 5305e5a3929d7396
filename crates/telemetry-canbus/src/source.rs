//! SocketCAN frame source.
//!
//! Owns exactly one raw socket bound to a named interface and surfaces the
//! frames queued by the kernel. The bus channel has no retry policy: if the
//! interface cannot be bound the error is reported once to the caller and
//! that is the end of it.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use socketcan::{CanSocket, EmbeddedFrame, Frame, Socket};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use opencluster_telemetry_core::TelemetryStore;

use crate::frame::{BusFrame, DRIVE_FRAME_ID, decode_frame};

/// Bus channel configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanBusConfig {
    /// SocketCAN interface name (e.g. `can0`, `vcan0`).
    pub interface: String,
    /// Identifier of the frame carrying the drive telemetry pair.
    pub frame_id: u32,
    /// Period of the drain tick in milliseconds.
    pub drain_interval_ms: u64,
}

impl Default for CanBusConfig {
    fn default() -> Self {
        Self {
            interface: "can0".to_string(),
            frame_id: DRIVE_FRAME_ID,
            drain_interval_ms: 50,
        }
    }
}

impl CanBusConfig {
    /// Config for the given interface with the stock frame filter.
    pub fn for_interface(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            ..Default::default()
        }
    }

    /// Drain period as a [`Duration`].
    pub fn drain_interval(&self) -> Duration {
        Duration::from_millis(self.drain_interval_ms)
    }
}

/// Why the bus socket could not be opened. None of these are retried.
#[derive(Debug, Error)]
pub enum BusOpenError {
    /// The interface name did not resolve to a device.
    #[error("CAN interface {0} not found")]
    InterfaceNotFound(String),

    /// The raw socket could not be created.
    #[error("failed to create CAN socket: {0}")]
    SocketCreate(#[source] io::Error),

    /// The socket could not be bound to the resolved interface.
    #[error("failed to bind CAN interface {interface}: {source}")]
    Bind {
        /// Interface the bind was attempted against.
        interface: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
}

fn classify_open_error(interface: &str, error: io::Error) -> BusOpenError {
    match error.raw_os_error() {
        Some(libc::ENODEV) | Some(libc::ENXIO) => {
            BusOpenError::InterfaceNotFound(interface.to_string())
        }
        Some(libc::EPROTONOSUPPORT) | Some(libc::EAFNOSUPPORT) | Some(libc::EMFILE)
        | Some(libc::ENFILE) => BusOpenError::SocketCreate(error),
        _ if error.kind() == io::ErrorKind::NotFound => {
            BusOpenError::InterfaceNotFound(interface.to_string())
        }
        _ => BusOpenError::Bind {
            interface: interface.to_string(),
            source: error,
        },
    }
}

/// Owner of the bound, non-blocking SocketCAN socket.
pub struct CanFrameSource {
    socket: Option<CanSocket>,
    config: CanBusConfig,
}

impl CanFrameSource {
    /// Create the socket, resolve the interface name and bind.
    pub fn open(config: CanBusConfig) -> Result<Self, BusOpenError> {
        let socket = CanSocket::open(&config.interface)
            .map_err(|e| classify_open_error(&config.interface, e))?;
        socket
            .set_nonblocking(true)
            .map_err(BusOpenError::SocketCreate)?;

        info!(interface = %config.interface, "bound CAN interface");
        Ok(Self {
            socket: Some(socket),
            config,
        })
    }

    /// Interface this source is bound to.
    pub fn interface(&self) -> &str {
        &self.config.interface
    }

    /// Whether the socket is still open.
    pub fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    /// Read every frame currently queued by the kernel, without blocking.
    ///
    /// Stops at `WouldBlock`. A read that cannot produce a well-formed frame
    /// is discarded; such reads are transport noise, not a protocol error.
    pub fn drain(&mut self) -> Vec<BusFrame> {
        let Some(socket) = self.socket.as_ref() else {
            return Vec::new();
        };

        let mut frames = Vec::new();
        loop {
            match socket.read_frame() {
                Ok(frame) => frames.push(BusFrame::new(frame.raw_id(), frame.data())),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    debug!(error = %e, "discarding unreadable bus frame");
                    break;
                }
            }
        }
        frames
    }

    /// Release the socket. Idempotent.
    pub fn close(&mut self) {
        if self.socket.take().is_some() {
            info!(interface = %self.config.interface, "closed CAN interface");
        }
    }

    /// Spawn the periodic drive task: every tick drains all queued frames,
    /// decodes the qualifying ones and applies them to `store` as the
    /// combined speed/RPM update. A tick with no frames is a no-op.
    ///
    /// The task runs until aborted; aborting drops the source and with it
    /// the socket.
    pub fn spawn_drive(mut self, store: Arc<TelemetryStore>) -> JoinHandle<()> {
        let period = self.config.drain_interval();
        let frame_id = self.config.frame_id;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                if !self.is_open() {
                    warn!("CAN socket closed; stopping drive task");
                    break;
                }
                for frame in self.drain() {
                    if let Some(sample) = decode_frame(&frame, frame_id) {
                        store.apply_sample(&sample);
                    }
                }
            }
        })
    }
}

impl Drop for CanFrameSource {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn test_config_defaults() -> TestResult {
        let config = CanBusConfig::default();
        assert_eq!(config.interface, "can0");
        assert_eq!(config.frame_id, DRIVE_FRAME_ID);
        assert_eq!(config.drain_interval(), Duration::from_millis(50));
        Ok(())
    }

    #[test]
    fn test_config_for_interface() -> TestResult {
        let config = CanBusConfig::for_interface("vcan3");
        assert_eq!(config.interface, "vcan3");
        assert_eq!(config.frame_id, DRIVE_FRAME_ID);
        Ok(())
    }

    #[test]
    fn test_open_missing_interface_is_not_found() -> TestResult {
        // No such device on any test host.
        let result = CanFrameSource::open(CanBusConfig::for_interface("opencluster-test-none"));
        match result {
            Err(BusOpenError::InterfaceNotFound(name)) => {
                assert_eq!(name, "opencluster-test-none");
                Ok(())
            }
            Err(other) => Err(format!("unexpected error: {other}").into()),
            Ok(_) => Err("unexpectedly opened a nonexistent interface".into()),
        }
    }

    #[test]
    fn test_error_classification() -> TestResult {
        let not_found = classify_open_error(
            "can9",
            io::Error::from_raw_os_error(libc::ENODEV),
        );
        assert!(matches!(not_found, BusOpenError::InterfaceNotFound(_)));

        let create = classify_open_error(
            "can9",
            io::Error::from_raw_os_error(libc::EMFILE),
        );
        assert!(matches!(create, BusOpenError::SocketCreate(_)));

        let bind = classify_open_error(
            "can9",
            io::Error::from_raw_os_error(libc::EADDRNOTAVAIL),
        );
        assert!(matches!(bind, BusOpenError::Bind { .. }));
        Ok(())
    }
}
