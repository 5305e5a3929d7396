//! The change-gated value cache.
//!
//! One store instance is shared by every ingestion channel. `apply` is the
//! only way telemetry reaches the snapshot, and it enforces the contract the
//! presentation layer relies on: a field is overwritten if and only if the
//! new value differs under the field's equality rule, and every overwrite
//! emits exactly one change notification before `apply` returns.

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::debug;

use crate::{
    BusSample, ConnectionState, ConnectionStateEvent, EVENT_CHANNEL_CAPACITY, TelemetryEvent,
    TelemetryEventReceiver, TelemetryField, TelemetryValue, VehicleTelemetry,
};

#[derive(Debug, Default)]
struct StoreInner {
    telemetry: VehicleTelemetry,
    connectivity: ConnectionState,
}

/// Shared, change-gated cache of the last-known telemetry values.
///
/// Mutation funnels through an internal mutex, so concurrent `apply` calls
/// from the bus drive task and the inter-process client serialize; the
/// stored value and its notification stay paired 1:1.
#[derive(Debug)]
pub struct TelemetryStore {
    inner: Mutex<StoreInner>,
    events: broadcast::Sender<TelemetryEvent>,
}

impl Default for TelemetryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryStore {
    /// Create an empty store (zeros / signals off, `Disconnected`).
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Mutex::new(StoreInner::default()),
            events,
        }
    }

    /// Subscribe to change notifications. Any number of subscribers may be
    /// active; a subscriber that falls behind loses oldest events.
    pub fn subscribe(&self) -> TelemetryEventReceiver {
        self.events.subscribe()
    }

    /// Apply one field update through the change gate.
    ///
    /// Returns whether a change notification was emitted. Values whose kind
    /// does not match the field are dropped without touching the snapshot.
    pub fn apply(&self, field: TelemetryField, value: TelemetryValue) -> bool {
        let mut inner = self.inner.lock();

        if !value.matches_field(field) {
            debug!(field = field.name(), "dropping kind-mismatched update");
            return false;
        }
        if inner.telemetry.get(field).approx_eq(value) {
            return false;
        }

        inner.telemetry.set(field, value);
        let _ = self.events.send(TelemetryEvent::FieldChanged { field, value });
        true
    }

    /// Apply a decoded bus sample as the combined speed/RPM update.
    ///
    /// Each field passes the gate independently; a frame repeating one value
    /// while moving the other notifies only for the one that moved.
    pub fn apply_sample(&self, sample: &BusSample) -> bool {
        let speed_changed = self.apply(TelemetryField::Speed, sample.speed_cms.into());
        let rpm_changed = self.apply(TelemetryField::Rpm, sample.rpm.into());
        speed_changed || rpm_changed
    }

    /// Update the connectivity status through the same gate: only an actual
    /// transition is stored and notified.
    pub fn set_connection_state(
        &self,
        channel: &str,
        state: ConnectionState,
        reason: Option<String>,
    ) -> bool {
        let mut inner = self.inner.lock();
        if inner.connectivity == state {
            return false;
        }
        let previous = inner.connectivity;
        inner.connectivity = state;
        let _ = self.events.send(TelemetryEvent::Connectivity(
            ConnectionStateEvent::new(channel, previous, state, reason),
        ));
        true
    }

    /// Report a transient, non-fatal condition. Best effort: never touches
    /// cached values, never gated.
    pub fn warn(&self, channel: &str, message: impl Into<String>) {
        let _ = self.events.send(TelemetryEvent::Warning {
            channel: channel.to_string(),
            message: message.into(),
        });
    }

    /// Current snapshot of every cached value.
    pub fn snapshot(&self) -> VehicleTelemetry {
        self.inner.lock().telemetry.clone()
    }

    /// Read one field; valid at any time, returning the default before the
    /// first update.
    pub fn get(&self, field: TelemetryField) -> TelemetryValue {
        self.inner.lock().telemetry.get(field)
    }

    /// Vehicle speed in centimeters per second.
    pub fn speed_cms(&self) -> f64 {
        self.inner.lock().telemetry.speed_cms
    }

    /// Engine revolutions per minute.
    pub fn rpm(&self) -> f64 {
        self.inner.lock().telemetry.rpm
    }

    /// Battery capacity in percent.
    pub fn battery_capacity(&self) -> f64 {
        self.inner.lock().telemetry.battery_capacity
    }

    /// Charging current in milliamps.
    pub fn charging_current_ma(&self) -> f64 {
        self.inner.lock().telemetry.charging_current_ma
    }

    /// Left turn-signal state.
    pub fn left_turn_signal(&self) -> bool {
        self.inner.lock().telemetry.left_turn_signal
    }

    /// Right turn-signal state.
    pub fn right_turn_signal(&self) -> bool {
        self.inner.lock().telemetry.right_turn_signal
    }

    /// Current connectivity status.
    pub fn connection_state(&self) -> ConnectionState {
        self.inner.lock().connectivity
    }

    /// Reset every telemetry field to its default, through the gate, so
    /// consumers observe the zeroing as ordinary change notifications.
    /// Intended for explicit disconnects only; connectivity is untouched.
    pub fn reset(&self) {
        let defaults = VehicleTelemetry::default();
        for field in TelemetryField::ALL {
            self.apply(field, defaults.get(field));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::TryRecvError;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn drain(rx: &mut TelemetryEventReceiver) -> Vec<TelemetryEvent> {
        let mut events = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
                Err(TryRecvError::Lagged(_)) => continue,
            }
        }
        events
    }

    #[test]
    fn test_apply_stores_and_notifies_once() -> TestResult {
        let store = TelemetryStore::new();
        let mut rx = store.subscribe();

        assert!(store.apply(TelemetryField::BatteryCapacity, 87.5.into()));
        assert_eq!(store.battery_capacity(), 87.5);

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        match events.first() {
            Some(TelemetryEvent::FieldChanged { field, value }) => {
                assert_eq!(*field, TelemetryField::BatteryCapacity);
                assert_eq!(value.as_f64(), Some(87.5));
            }
            other => return Err(format!("unexpected event: {other:?}").into()),
        }
        Ok(())
    }

    #[test]
    fn test_apply_same_value_is_idempotent() -> TestResult {
        let store = TelemetryStore::new();
        let mut rx = store.subscribe();

        assert!(store.apply(TelemetryField::BatteryCapacity, 87.5.into()));
        assert!(!store.apply(TelemetryField::BatteryCapacity, 87.5.into()));

        assert_eq!(drain(&mut rx).len(), 1);
        Ok(())
    }

    #[test]
    fn test_apply_within_tolerance_does_not_notify() -> TestResult {
        let store = TelemetryStore::new();
        let mut rx = store.subscribe();

        assert!(store.apply(TelemetryField::Rpm, 3000.0.into()));
        assert!(!store.apply(TelemetryField::Rpm, (3000.0 + 1e-12).into()));

        assert_eq!(drain(&mut rx).len(), 1);
        Ok(())
    }

    #[test]
    fn test_kind_mismatch_is_dropped() -> TestResult {
        let store = TelemetryStore::new();
        let mut rx = store.subscribe();

        assert!(!store.apply(TelemetryField::Speed, true.into()));
        assert_eq!(store.speed_cms(), 0.0);
        assert!(drain(&mut rx).is_empty());
        Ok(())
    }

    #[test]
    fn test_sample_updates_both_fields() -> TestResult {
        let store = TelemetryStore::new();
        let mut rx = store.subscribe();

        let sample = BusSample {
            speed_cms: 150.5,
            rpm: 30.0,
        };
        assert!(store.apply_sample(&sample));
        assert_eq!(store.speed_cms(), 150.5);
        assert_eq!(store.rpm(), 30.0);
        assert_eq!(drain(&mut rx).len(), 2);

        // Same sample again: nothing moves, nothing is emitted.
        assert!(!store.apply_sample(&sample));
        assert!(drain(&mut rx).is_empty());
        Ok(())
    }

    #[test]
    fn test_sample_partial_repeat_notifies_only_moved_field() -> TestResult {
        let store = TelemetryStore::new();
        store.apply_sample(&BusSample {
            speed_cms: 150.5,
            rpm: 30.0,
        });

        let mut rx = store.subscribe();
        store.apply_sample(&BusSample {
            speed_cms: 150.5,
            rpm: 31.0,
        });

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        match events.first() {
            Some(TelemetryEvent::FieldChanged { field, .. }) => {
                assert_eq!(*field, TelemetryField::Rpm)
            }
            other => return Err(format!("unexpected event: {other:?}").into()),
        }
        Ok(())
    }

    #[test]
    fn test_connectivity_is_gated() -> TestResult {
        let store = TelemetryStore::new();
        let mut rx = store.subscribe();

        assert!(store.set_connection_state("ipc", ConnectionState::Connecting, None));
        assert!(!store.set_connection_state("ipc", ConnectionState::Connecting, None));
        assert!(store.set_connection_state("ipc", ConnectionState::Connected, None));

        assert_eq!(drain(&mut rx).len(), 2);
        assert_eq!(store.connection_state(), ConnectionState::Connected);
        Ok(())
    }

    #[test]
    fn test_warning_is_not_gated() -> TestResult {
        let store = TelemetryStore::new();
        let mut rx = store.subscribe();

        store.warn("ipc", "poll failed");
        store.warn("ipc", "poll failed");
        assert_eq!(drain(&mut rx).len(), 2);
        Ok(())
    }

    #[test]
    fn test_readers_before_first_update() -> TestResult {
        let store = TelemetryStore::new();
        assert_eq!(store.speed_cms(), 0.0);
        assert_eq!(store.battery_capacity(), 0.0);
        assert!(!store.left_turn_signal());
        assert_eq!(store.connection_state(), ConnectionState::Disconnected);
        assert_eq!(store.snapshot(), VehicleTelemetry::default());
        Ok(())
    }

    #[test]
    fn test_reset_zeroes_through_the_gate() -> TestResult {
        let store = TelemetryStore::new();
        store.apply(TelemetryField::BatteryCapacity, 55.0.into());
        store.apply(TelemetryField::LeftTurnSignal, true.into());

        let mut rx = store.subscribe();
        store.reset();

        assert_eq!(store.snapshot(), VehicleTelemetry::default());
        // Only the two non-default fields emit.
        assert_eq!(drain(&mut rx).len(), 2);

        // A second reset is a no-op.
        store.reset();
        assert!(drain(&mut rx).is_empty());
        Ok(())
    }

    #[test]
    fn test_events_without_subscribers_are_dropped() -> TestResult {
        let store = TelemetryStore::new();
        // No subscriber: apply still succeeds and stores.
        assert!(store.apply(TelemetryField::Speed, 10.0.into()));
        assert_eq!(store.speed_cms(), 10.0);
        Ok(())
    }
}
