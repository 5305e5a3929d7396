//! Inter-process telemetry channel.
//!
//! The companion service publishes battery, charging and turn-signal data
//! over the platform's inter-process bus. This crate holds everything on the
//! consuming side of that bus, plus the loopback publisher used to stand the
//! service up on a bench:
//!
//! - [`payload`]: tolerant decoding of the structured JSON payload
//! - [`endpoint`]: the transport seam (traits plus the shipped Unix-socket
//!   implementation)
//! - [`client`]: the connection state machine with bounded retry/backoff
//! - [`publisher`]: the companion-service stand-in for tests and benches
//!
//! The service may start seconds after the cluster does, or crash and come
//! back; the client's whole job is to make that invisible to the store.

pub mod client;
pub mod endpoint;
pub mod payload;
pub mod publisher;

pub use client::{DeliveryMode, IPC_CHANNEL, IpcClientConfig, IpcTelemetryClient, TeardownHandle};
pub use endpoint::{
    EndpointHandle, EndpointIdentity, IpcClientError, PayloadReceiver, TelemetryEndpoint,
    UnixSocketEndpoint,
};
pub use payload::{PayloadError, TelemetryPayload, decode_payload};
pub use publisher::TelemetryPublisher;
