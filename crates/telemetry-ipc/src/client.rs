//! Connection state machine for the inter-process telemetry channel.
//!
//! The companion service may start seconds after the cluster, so acquisition
//! retries on a fixed backoff — but only within a bounded budget, to avoid
//! churning forever against a service that never comes up. Once connected,
//! payloads arrive either as push callbacks on a subscribed signal or by
//! polling a getter on a fixed cadence; both feed the shared store through
//! the same change gate.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use opencluster_schemas::telemetry::TelemetryField;
use opencluster_telemetry_core::{ConnectionState, TelemetryStore};

use crate::endpoint::{EndpointHandle, EndpointIdentity, IpcClientError, TelemetryEndpoint};
use crate::payload::decode_payload;

/// Channel label carried by connectivity and warning events.
pub const IPC_CHANNEL: &str = "ipc";

/// How payloads reach the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Subscribe to the push signal; payloads arrive as callbacks.
    Push,
    /// Poll the getter on a fixed interval.
    Poll,
}

/// Inter-process channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcClientConfig {
    /// Remote endpoint identity.
    pub identity: EndpointIdentity,
    /// Push signal name.
    pub signal: String,
    /// Getter method name (poll mode).
    pub getter: String,
    /// Field the getter result feeds.
    pub getter_field: TelemetryField,
    /// Delivery mode.
    pub mode: DeliveryMode,
    /// Poll cadence in milliseconds.
    pub poll_interval_ms: u64,
    /// Backoff between failed connection attempts, in milliseconds.
    pub retry_backoff_ms: u64,
    /// Connection attempt budget before the client goes terminal.
    pub max_attempts: u32,
}

impl Default for IpcClientConfig {
    fn default() -> Self {
        Self {
            identity: EndpointIdentity::default(),
            signal: "DataReceived".to_string(),
            getter: "getBattery".to_string(),
            getter_field: TelemetryField::BatteryCapacity,
            mode: DeliveryMode::Push,
            poll_interval_ms: 100,
            retry_backoff_ms: 2000,
            max_attempts: 10,
        }
    }
}

impl IpcClientConfig {
    /// Poll cadence as a [`Duration`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Retry backoff as a [`Duration`].
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

#[derive(Debug)]
struct TeardownState {
    torn_down: AtomicBool,
    notify: Notify,
}

/// Cloneable handle requesting teardown of a running client.
///
/// Setting the flag wakes any pending backoff or poll timer; the wakeup is
/// a guarded no-op and the client unwinds without another transport call.
#[derive(Debug, Clone)]
pub struct TeardownHandle {
    inner: Arc<TeardownState>,
}

impl TeardownHandle {
    fn new() -> Self {
        Self {
            inner: Arc::new(TeardownState {
                torn_down: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Request teardown. Idempotent.
    pub fn teardown(&self) {
        self.inner.torn_down.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Whether teardown has been requested.
    pub fn is_torn_down(&self) -> bool {
        self.inner.torn_down.load(Ordering::SeqCst)
    }

    /// Resolves once teardown is requested.
    pub async fn cancelled(&self) {
        let mut notified = std::pin::pin!(self.inner.notify.notified());
        notified.as_mut().enable();
        if self.is_torn_down() {
            return;
        }
        notified.await;
    }
}

/// Why a connected session ended.
enum SessionEnd {
    TornDown,
    Invalidated,
}

/// Client for the inter-process telemetry service.
///
/// Lifecycle: `Disconnected → Connecting → Connected`, with
/// `Connecting → Retrying → Connecting` on failure and `Retrying → Failed`
/// once the attempt budget is spent. `Failed` is terminal: no further
/// transport attempts are made.
pub struct IpcTelemetryClient {
    config: IpcClientConfig,
    endpoint: Arc<dyn TelemetryEndpoint>,
    store: Arc<TelemetryStore>,
    handle: Option<Box<dyn EndpointHandle>>,
    attempts: u32,
    teardown: TeardownHandle,
}

impl IpcTelemetryClient {
    /// Create a client against the given endpoint, feeding `store`.
    pub fn new(
        config: IpcClientConfig,
        endpoint: Arc<dyn TelemetryEndpoint>,
        store: Arc<TelemetryStore>,
    ) -> Self {
        Self {
            config,
            endpoint,
            store,
            handle: None,
            attempts: 0,
            teardown: TeardownHandle::new(),
        }
    }

    /// Current connection state, as reported through the store's gate.
    pub fn state(&self) -> ConnectionState {
        self.store.connection_state()
    }

    /// Connection attempts performed in the current acquisition cycle.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Handle for requesting teardown from outside the driving task.
    pub fn teardown_handle(&self) -> TeardownHandle {
        self.teardown.clone()
    }

    fn transition(&self, state: ConnectionState, reason: Option<String>) {
        self.store.set_connection_state(IPC_CHANNEL, state, reason);
    }

    async fn release_handle(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            handle.release().await;
        }
    }

    /// One acquisition attempt.
    ///
    /// Performs no transport call once the client is `Failed` or torn down;
    /// a client that is already connected returns immediately.
    pub async fn connect(&mut self) -> Result<(), IpcClientError> {
        if self.teardown.is_torn_down() {
            return Err(IpcClientError::TornDown);
        }
        if self.state() == ConnectionState::Failed {
            return Err(IpcClientError::RetryBudgetExhausted {
                attempts: self.attempts,
            });
        }
        if self.handle.is_some() {
            return Ok(());
        }

        self.transition(ConnectionState::Connecting, None);
        match self.endpoint.acquire(&self.config.identity).await {
            Ok(handle) => {
                self.handle = Some(handle);
                self.attempts = 0;
                info!(
                    service = %self.config.identity.service,
                    "connected to telemetry service"
                );
                self.transition(ConnectionState::Connected, None);
                Ok(())
            }
            Err(error) => {
                self.attempts += 1;
                if self.attempts >= self.config.max_attempts {
                    warn!(
                        attempts = self.attempts,
                        %error,
                        "telemetry service unreachable; giving up"
                    );
                    self.transition(
                        ConnectionState::Failed,
                        Some(format!("{} connection attempts failed", self.attempts)),
                    );
                    Err(IpcClientError::RetryBudgetExhausted {
                        attempts: self.attempts,
                    })
                } else {
                    debug!(
                        attempt = self.attempts,
                        max_attempts = self.config.max_attempts,
                        %error,
                        "connection attempt failed; backing off"
                    );
                    self.transition(
                        ConnectionState::Retrying,
                        Some(format!(
                            "attempt {} of {}",
                            self.attempts, self.config.max_attempts
                        )),
                    );
                    Err(error)
                }
            }
        }
    }

    /// Drive the client until torn down or terminally failed: acquire with
    /// backoff, then consume push payloads or run the poll loop. A session
    /// that ends because the service went away restarts acquisition with a
    /// fresh attempt budget.
    pub async fn run(&mut self) -> Result<(), IpcClientError> {
        loop {
            if self.teardown.is_torn_down() {
                self.release_handle().await;
                self.transition(ConnectionState::Disconnected, Some("torn down".to_string()));
                return Ok(());
            }

            match self.connect().await {
                Ok(()) => {
                    let end = match self.config.mode {
                        DeliveryMode::Push => self.run_push().await,
                        DeliveryMode::Poll => self.run_poll().await,
                    };
                    self.release_handle().await;
                    match end {
                        SessionEnd::TornDown => {
                            self.transition(
                                ConnectionState::Disconnected,
                                Some("torn down".to_string()),
                            );
                            return Ok(());
                        }
                        SessionEnd::Invalidated => {
                            self.attempts = 0;
                            self.transition(
                                ConnectionState::Disconnected,
                                Some("endpoint invalidated".to_string()),
                            );
                        }
                    }
                }
                Err(IpcClientError::TornDown) => {
                    self.transition(ConnectionState::Disconnected, Some("torn down".to_string()));
                    return Ok(());
                }
                Err(error @ IpcClientError::RetryBudgetExhausted { .. }) => return Err(error),
                Err(_) => {
                    // Single-shot backoff, re-armed only from this failure
                    // path; teardown cancels it.
                    let teardown = self.teardown.clone();
                    tokio::select! {
                        _ = teardown.cancelled() => {}
                        _ = tokio::time::sleep(self.config.retry_backoff()) => {}
                    }
                }
            }
        }
    }

    async fn run_push(&mut self) -> SessionEnd {
        let Some(handle) = self.handle.as_mut() else {
            return SessionEnd::Invalidated;
        };
        let mut payloads = match handle.subscribe(&self.config.signal).await {
            Ok(rx) => rx,
            Err(error) => {
                warn!(%error, signal = %self.config.signal, "telemetry subscription failed");
                self.store
                    .warn(IPC_CHANNEL, format!("subscribe failed: {error}"));
                return SessionEnd::Invalidated;
            }
        };
        info!(signal = %self.config.signal, "subscribed to telemetry signal");

        let teardown = self.teardown.clone();
        loop {
            tokio::select! {
                _ = teardown.cancelled() => return SessionEnd::TornDown,
                received = payloads.recv() => match received {
                    Some(bytes) => self.on_payload(&bytes),
                    // Stream closed: the service went away.
                    None => return SessionEnd::Invalidated,
                },
            }
        }
    }

    async fn run_poll(&mut self) -> SessionEnd {
        let mut interval = tokio::time::interval(self.config.poll_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let teardown = self.teardown.clone();

        loop {
            tokio::select! {
                _ = teardown.cancelled() => return SessionEnd::TornDown,
                _ = interval.tick() => {}
            }
            match self.refresh().await {
                Ok(()) => {}
                Err(IpcClientError::Io(error)) => {
                    warn!(%error, "telemetry endpoint lost");
                    return SessionEnd::Invalidated;
                }
                // Transient; already reported by refresh. Next tick proceeds.
                Err(_) => {}
            }
        }
    }

    /// One getter round trip (poll mode). On success the scalar result
    /// feeds the configured field; a failure is reported as a warning and
    /// does not change connection state.
    pub async fn refresh(&mut self) -> Result<(), IpcClientError> {
        let handle = self.handle.as_mut().ok_or(IpcClientError::NotConnected)?;
        match handle.call_getter(&self.config.getter).await {
            Ok(value) => {
                self.store.apply(self.config.getter_field, value.into());
                Ok(())
            }
            Err(error) => {
                warn!(%error, method = %self.config.getter, "telemetry poll failed");
                self.store
                    .warn(IPC_CHANNEL, format!("poll failed: {error}"));
                Err(error)
            }
        }
    }

    /// Decode a pushed payload and apply every present field to the store.
    /// A malformed payload is dropped with a warning; processing continues
    /// with the next one.
    pub fn on_payload(&self, bytes: &[u8]) {
        match decode_payload(bytes) {
            Ok(payload) => {
                for (field, value) in payload.fields() {
                    self.store.apply(field, value);
                }
            }
            Err(error) => {
                debug!(%error, "dropping malformed telemetry payload");
                self.store
                    .warn(IPC_CHANNEL, format!("malformed payload: {error}"));
            }
        }
    }

    /// Tear the client down: cancel any pending backoff, release the handle,
    /// report `Disconnected`. Idempotent; safe from any state.
    pub async fn teardown(&mut self) {
        self.teardown.teardown();
        self.release_handle().await;
        self.transition(ConnectionState::Disconnected, Some("torn down".to_string()));
    }
}
