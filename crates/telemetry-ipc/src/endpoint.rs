//! Transport seam for the inter-process telemetry bus.
//!
//! The client state machine is written against [`TelemetryEndpoint`] and
//! [`EndpointHandle`] so the retry logic can be exercised against a mock.
//! [`UnixSocketEndpoint`] is the shipped implementation: the platform bus
//! realized as newline-delimited JSON over a Unix domain socket whose path
//! derives from the configured service name.

use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Service/object/interface triple identifying the remote endpoint.
///
/// Passed as explicit configuration rather than compiled in, so the client
/// can be pointed at a bench publisher or a mock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointIdentity {
    /// Well-known service name.
    pub service: String,
    /// Object path within the service.
    pub object_path: String,
    /// Interface exposing the telemetry members.
    pub interface: String,
}

impl Default for EndpointIdentity {
    fn default() -> Self {
        Self {
            service: "org.opencluster.Telemetry".to_string(),
            object_path: "/org/opencluster/Telemetry".to_string(),
            interface: "org.opencluster.Telemetry1".to_string(),
        }
    }
}

/// Errors on the inter-process channel.
#[derive(Debug, Error)]
pub enum IpcClientError {
    /// The endpoint did not accept the connection (service not up yet).
    #[error("endpoint {service} unavailable: {source}")]
    Unavailable {
        /// Service that was being acquired.
        service: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// A getter round trip failed.
    #[error("getter call {method} failed: {reason}")]
    CallFailed {
        /// Method that was invoked.
        method: String,
        /// What went wrong.
        reason: String,
    },

    /// The connection attempt budget is exhausted; the client is terminal.
    #[error("connection retry budget exhausted after {attempts} attempts")]
    RetryBudgetExhausted {
        /// Attempts performed before giving up.
        attempts: u32,
    },

    /// An operation required a connection that is not established.
    #[error("client is not connected")]
    NotConnected,

    /// The client has been torn down.
    #[error("client torn down")]
    TornDown,

    /// An I/O error from the transport.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Raw payload lines pushed by the remote service.
pub type PayloadReceiver = mpsc::Receiver<Vec<u8>>;

/// Factory for connection attempts against a named endpoint.
#[async_trait]
pub trait TelemetryEndpoint: Send + Sync {
    /// Perform one acquisition attempt. Each call is one attempt; the
    /// retry/backoff policy lives entirely in the client.
    async fn acquire(
        &self,
        identity: &EndpointIdentity,
    ) -> Result<Box<dyn EndpointHandle>, IpcClientError>;
}

/// One acquired connection to the remote service.
#[async_trait]
pub trait EndpointHandle: Send {
    /// Subscribe to the named push signal. The returned receiver yields raw
    /// payload bytes until the remote side goes away, at which point it
    /// closes — the client treats that as interface invalidation.
    async fn subscribe(&mut self, signal: &str) -> Result<PayloadReceiver, IpcClientError>;

    /// One synchronous getter round trip, returning the scalar result.
    async fn call_getter(&mut self, method: &str) -> Result<f64, IpcClientError>;

    /// Release the connection. Idempotent.
    async fn release(&mut self);
}

/// Platform bus transport: newline-delimited JSON over a Unix socket.
#[derive(Debug, Clone)]
pub struct UnixSocketEndpoint {
    socket_dir: PathBuf,
}

impl UnixSocketEndpoint {
    /// Endpoint resolving service sockets under the given directory.
    pub fn new(socket_dir: impl Into<PathBuf>) -> Self {
        Self {
            socket_dir: socket_dir.into(),
        }
    }

    /// Default socket directory for the current session
    /// (`$XDG_RUNTIME_DIR`, falling back to `/tmp`).
    pub fn platform_default() -> Self {
        let dir = std::env::var_os("XDG_RUNTIME_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/tmp"));
        Self::new(dir)
    }

    /// Socket path a service identity resolves to.
    pub fn socket_path(&self, identity: &EndpointIdentity) -> PathBuf {
        self.socket_dir.join(format!("{}.sock", identity.service))
    }
}

#[async_trait]
impl TelemetryEndpoint for UnixSocketEndpoint {
    async fn acquire(
        &self,
        identity: &EndpointIdentity,
    ) -> Result<Box<dyn EndpointHandle>, IpcClientError> {
        let path = self.socket_path(identity);
        let stream =
            UnixStream::connect(&path)
                .await
                .map_err(|source| IpcClientError::Unavailable {
                    service: identity.service.clone(),
                    source,
                })?;
        debug!(path = %path.display(), "acquired telemetry endpoint");
        Ok(Box::new(UnixSocketHandle {
            stream: Some(BufReader::new(stream)),
        }))
    }
}

struct UnixSocketHandle {
    stream: Option<BufReader<UnixStream>>,
}

impl UnixSocketHandle {
    async fn send_line(
        stream: &mut BufReader<UnixStream>,
        value: &serde_json::Value,
    ) -> io::Result<()> {
        let mut line = value.to_string().into_bytes();
        line.push(b'\n');
        stream.get_mut().write_all(&line).await
    }
}

#[async_trait]
impl EndpointHandle for UnixSocketHandle {
    async fn subscribe(&mut self, signal: &str) -> Result<PayloadReceiver, IpcClientError> {
        let mut stream = self.stream.take().ok_or(IpcClientError::NotConnected)?;
        Self::send_line(&mut stream, &json!({ "subscribe": signal })).await?;

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            let mut line = String::new();
            loop {
                line.clear();
                match stream.read_line(&mut line).await {
                    // EOF: remote side went away; closing `tx` tells the
                    // client the subscription is dead.
                    Ok(0) => break,
                    Ok(_) => {
                        let trimmed = line.trim_end();
                        if trimmed.is_empty() {
                            continue;
                        }
                        if tx.send(trimmed.as_bytes().to_vec()).await.is_err() {
                            break;
                        }
                    }
                    Err(error) => {
                        warn!(%error, "telemetry subscription read failed");
                        break;
                    }
                }
            }
        });
        Ok(rx)
    }

    async fn call_getter(&mut self, method: &str) -> Result<f64, IpcClientError> {
        let stream = self.stream.as_mut().ok_or(IpcClientError::NotConnected)?;
        Self::send_line(stream, &json!({ "method": method })).await?;

        let mut line = String::new();
        let read = stream.read_line(&mut line).await?;
        if read == 0 {
            // EOF mid-call: the connection is dead, not merely busy.
            return Err(IpcClientError::Io(io::Error::from(
                io::ErrorKind::UnexpectedEof,
            )));
        }

        let reply: serde_json::Value =
            serde_json::from_str(line.trim_end()).map_err(|e| IpcClientError::CallFailed {
                method: method.to_string(),
                reason: format!("unparseable reply: {e}"),
            })?;
        reply
            .get("value")
            .and_then(serde_json::Value::as_f64)
            .ok_or_else(|| IpcClientError::CallFailed {
                method: method.to_string(),
                reason: reply
                    .get("error")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or("reply carries no value")
                    .to_string(),
            })
    }

    async fn release(&mut self) {
        self.stream.take();
    }
}
