//! Tolerant decoding of the structured telemetry payload.
//!
//! The wire format is a flat JSON object; any subset of the known keys may
//! be present and unknown keys are routine. One field of the wrong scalar
//! kind must not cost us the rest of the payload, so wrong-kind fields are
//! demoted to absent rather than failing the decode.

use opencluster_schemas::telemetry::{TelemetryField, TelemetryValue};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

/// Why a payload could not be decoded at all.
#[derive(Debug, Error)]
pub enum PayloadError {
    /// The bytes are not parseable JSON.
    #[error("malformed telemetry payload: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The bytes parse, but not to a flat object.
    #[error("telemetry payload is not a JSON object")]
    NotAnObject,
}

/// Partial telemetry update decoded from one payload. Only present fields
/// are applied downstream.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TelemetryPayload {
    /// Battery capacity in percent.
    pub battery_capacity: Option<f64>,
    /// Charging current in milliamps.
    pub charging_current_ma: Option<f64>,
    /// Left turn-signal state.
    pub left_turn_signal: Option<bool>,
    /// Right turn-signal state.
    pub right_turn_signal: Option<bool>,
}

impl TelemetryPayload {
    /// Whether no usable field was present.
    pub fn is_empty(&self) -> bool {
        self.battery_capacity.is_none()
            && self.charging_current_ma.is_none()
            && self.left_turn_signal.is_none()
            && self.right_turn_signal.is_none()
    }

    /// Present fields in `(field, value)` form, ready for the store.
    pub fn fields(&self) -> Vec<(TelemetryField, TelemetryValue)> {
        let mut fields = Vec::new();
        if let Some(v) = self.battery_capacity {
            fields.push((TelemetryField::BatteryCapacity, v.into()));
        }
        if let Some(v) = self.charging_current_ma {
            fields.push((TelemetryField::ChargingCurrent, v.into()));
        }
        if let Some(v) = self.left_turn_signal {
            fields.push((TelemetryField::LeftTurnSignal, v.into()));
        }
        if let Some(v) = self.right_turn_signal {
            fields.push((TelemetryField::RightTurnSignal, v.into()));
        }
        fields
    }
}

fn number_field(object: &Map<String, Value>, key: &'static str) -> Option<f64> {
    let value = object.get(key)?;
    match value.as_f64() {
        Some(number) => Some(number),
        None => {
            debug!(key, "ignoring non-numeric payload field");
            None
        }
    }
}

fn bool_field(object: &Map<String, Value>, key: &'static str) -> Option<bool> {
    let value = object.get(key)?;
    match value.as_bool() {
        Some(flag) => Some(flag),
        None => {
            debug!(key, "ignoring non-boolean payload field");
            None
        }
    }
}

/// Decode one payload. No unit conversion: numeric fields pass through in
/// the bus's own units (percent, milliamps).
pub fn decode_payload(bytes: &[u8]) -> Result<TelemetryPayload, PayloadError> {
    let value: Value = serde_json::from_slice(bytes)?;
    let object = value.as_object().ok_or(PayloadError::NotAnObject)?;

    Ok(TelemetryPayload {
        battery_capacity: number_field(object, TelemetryField::BatteryCapacity.name()),
        charging_current_ma: number_field(object, TelemetryField::ChargingCurrent.name()),
        left_turn_signal: bool_field(object, TelemetryField::LeftTurnSignal.name()),
        right_turn_signal: bool_field(object, TelemetryField::RightTurnSignal.name()),
    })
}


#[cfg(test)]
mod proptest_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(500))]

        #[test]
        fn prop_decode_never_panics(
            data in proptest::collection::vec(any::<u8>(), 0..512)
        ) {
            let _ = decode_payload(&data);
        }
    }
}
