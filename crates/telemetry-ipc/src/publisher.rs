//! Loopback telemetry publisher.
//!
//! Stand-in for the vehicle's companion telemetry service, used by the
//! integration tests and bench setups: binds the service socket, tracks the
//! current battery/charging/turn-signal values, broadcasts them as one JSON
//! payload line to every subscriber, and answers getter requests from the
//! current values.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const LINE_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Default, Clone)]
struct PublishedValues {
    battery_capacity: f64,
    charging_current_ma: f64,
    left_turn_signal: bool,
    right_turn_signal: bool,
}

impl PublishedValues {
    fn payload_line(&self) -> String {
        json!({
            "battery_capacity": self.battery_capacity,
            "charging_current": self.charging_current_ma,
            "left_turn_signal": self.left_turn_signal,
            "right_turn_signal": self.right_turn_signal,
        })
        .to_string()
    }

    fn getter_reply(&self, method: &str) -> String {
        match method {
            "getBattery" => json!({ "value": self.battery_capacity }),
            "getChargingCurrent" => json!({ "value": self.charging_current_ma }),
            _ => json!({ "error": format!("unknown method {method}") }),
        }
        .to_string()
    }
}

/// Companion-service stand-in publishing telemetry over a Unix socket.
pub struct TelemetryPublisher {
    values: Arc<Mutex<PublishedValues>>,
    line_tx: broadcast::Sender<String>,
    accept_task: Option<JoinHandle<()>>,
    socket_path: PathBuf,
}

impl TelemetryPublisher {
    /// Bind the service socket and start accepting connections. A stale
    /// socket file from a previous run is removed first.
    pub async fn bind(socket_path: impl Into<PathBuf>) -> io::Result<Self> {
        let socket_path = socket_path.into();
        match std::fs::remove_file(&socket_path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        let listener = UnixListener::bind(&socket_path)?;
        info!(path = %socket_path.display(), "telemetry publisher listening");

        let values = Arc::new(Mutex::new(PublishedValues::default()));
        let (line_tx, _) = broadcast::channel(LINE_CHANNEL_CAPACITY);

        let accept_values = Arc::clone(&values);
        let accept_line_tx = line_tx.clone();
        let accept_task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, _)) => {
                        let values = Arc::clone(&accept_values);
                        let lines = accept_line_tx.subscribe();
                        tokio::spawn(serve_connection(stream, values, lines));
                    }
                    Err(error) => {
                        warn!(%error, "telemetry publisher accept failed");
                        break;
                    }
                }
            }
        });

        Ok(Self {
            values,
            line_tx,
            accept_task: Some(accept_task),
            socket_path,
        })
    }

    /// Path the publisher is bound to.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Connections currently being served.
    pub fn connections(&self) -> usize {
        self.line_tx.receiver_count()
    }

    /// Set the published battery capacity, in percent.
    pub fn set_battery_capacity(&self, percent: f64) {
        self.values.lock().battery_capacity = percent;
    }

    /// Set the published charging current, in milliamps.
    pub fn set_charging_current_ma(&self, milliamps: f64) {
        self.values.lock().charging_current_ma = milliamps;
    }

    /// Set the published turn-signal states.
    pub fn set_turn_signals(&self, left: bool, right: bool) {
        let mut values = self.values.lock();
        values.left_turn_signal = left;
        values.right_turn_signal = right;
    }

    /// Broadcast the current values as one payload line to every subscriber.
    pub fn publish(&self) {
        let line = self.values.lock().payload_line();
        let _ = self.line_tx.send(line);
    }

    /// Stop accepting connections and remove the socket file. Idempotent.
    pub fn shutdown(&mut self) {
        if let Some(task) = self.accept_task.take() {
            task.abort();
            if let Err(error) = std::fs::remove_file(&self.socket_path) {
                if error.kind() != io::ErrorKind::NotFound {
                    debug!(%error, "failed to remove publisher socket file");
                }
            }
            info!(path = %self.socket_path.display(), "telemetry publisher stopped");
        }
    }
}

impl Drop for TelemetryPublisher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn serve_connection(
    stream: UnixStream,
    values: Arc<Mutex<PublishedValues>>,
    mut lines: broadcast::Receiver<String>,
) {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut request = String::new();

    // Request phase: answer getters until the peer subscribes or hangs up.
    loop {
        request.clear();
        match reader.read_line(&mut request).await {
            Ok(0) => return,
            Ok(_) => {
                let line = request.trim_end();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<serde_json::Value>(line) {
                    Ok(req) if req.get("subscribe").is_some() => break,
                    Ok(req) => {
                        if let Some(method) = req.get("method").and_then(|m| m.as_str()) {
                            let mut reply = { values.lock().getter_reply(method) };
                            reply.push('\n');
                            if writer.write_all(reply.as_bytes()).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(error) => debug!(%error, "ignoring unparseable request line"),
                }
            }
            Err(_) => return,
        }
    }

    // Forward phase: stream payload lines until the peer goes away.
    loop {
        tokio::select! {
            line = lines.recv() => match line {
                Ok(mut line) => {
                    line.push('\n');
                    if writer.write_all(line.as_bytes()).await.is_err() {
                        return;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return,
            },
            read = reader.read_line(&mut request) => match read {
                // Peer hangup (or read failure) ends the subscription.
                Ok(0) | Err(_) => return,
                Ok(_) => request.clear(),
            },
        }
    }
}
