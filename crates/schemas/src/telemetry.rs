//! Unified telemetry types for the instrument-cluster data sources.
//!
//! `VehicleTelemetry` is the authoritative snapshot every channel feeds into.
//! Updates address its slots through `TelemetryField`, carrying a
//! `TelemetryValue` whose equality rule is the one the change gate uses:
//! floats compare within a tolerance, booleans compare exactly.

use serde::{Deserialize, Serialize};

/// Absolute tolerance under which two float telemetry values are considered
/// equal. Suppresses notifications caused by representational noise rather
/// than real movement of the underlying value.
pub const FLOAT_TOLERANCE: f64 = 1e-9;

/// Identifies one scalar slot of the cluster telemetry snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetryField {
    /// Vehicle speed from the raw bus, in centimeters per second.
    Speed,
    /// Engine revolutions per minute, from the raw bus.
    Rpm,
    /// Battery capacity from the inter-process channel, in percent.
    BatteryCapacity,
    /// Charging current from the inter-process channel, in milliamps.
    ChargingCurrent,
    /// Left turn-signal lever state.
    LeftTurnSignal,
    /// Right turn-signal lever state.
    RightTurnSignal,
}

impl TelemetryField {
    /// Every field, in display order.
    pub const ALL: [TelemetryField; 6] = [
        TelemetryField::Speed,
        TelemetryField::Rpm,
        TelemetryField::BatteryCapacity,
        TelemetryField::ChargingCurrent,
        TelemetryField::LeftTurnSignal,
        TelemetryField::RightTurnSignal,
    ];

    /// Wire name of the field as it appears in structured payloads.
    pub fn name(self) -> &'static str {
        match self {
            TelemetryField::Speed => "speed",
            TelemetryField::Rpm => "rpm",
            TelemetryField::BatteryCapacity => "battery_capacity",
            TelemetryField::ChargingCurrent => "charging_current",
            TelemetryField::LeftTurnSignal => "left_turn_signal",
            TelemetryField::RightTurnSignal => "right_turn_signal",
        }
    }

    /// Whether this slot holds a boolean rather than a float.
    pub fn is_boolean(self) -> bool {
        matches!(
            self,
            TelemetryField::LeftTurnSignal | TelemetryField::RightTurnSignal
        )
    }
}

/// Dynamically-typed telemetry scalar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TelemetryValue {
    /// Numeric telemetry (speed, RPM, battery, current).
    Float(f64),
    /// Switch-like telemetry (turn signals).
    Bool(bool),
}

impl TelemetryValue {
    /// Numeric content, if this is a float value.
    pub fn as_f64(self) -> Option<f64> {
        match self {
            TelemetryValue::Float(v) => Some(v),
            TelemetryValue::Bool(_) => None,
        }
    }

    /// Boolean content, if this is a bool value.
    pub fn as_bool(self) -> Option<bool> {
        match self {
            TelemetryValue::Bool(v) => Some(v),
            TelemetryValue::Float(_) => None,
        }
    }

    /// Equality under the field-appropriate rule: floats within
    /// [`FLOAT_TOLERANCE`], booleans exact. Values of different kinds are
    /// never equal.
    pub fn approx_eq(self, other: TelemetryValue) -> bool {
        match (self, other) {
            (TelemetryValue::Float(a), TelemetryValue::Float(b)) => (a - b).abs() < FLOAT_TOLERANCE,
            (TelemetryValue::Bool(a), TelemetryValue::Bool(b)) => a == b,
            _ => false,
        }
    }

    /// Whether the value kind matches the kind of `field`.
    pub fn matches_field(self, field: TelemetryField) -> bool {
        matches!(self, TelemetryValue::Bool(_)) == field.is_boolean()
    }
}

impl From<f64> for TelemetryValue {
    fn from(value: f64) -> Self {
        TelemetryValue::Float(value)
    }
}

impl From<bool> for TelemetryValue {
    fn from(value: bool) -> Self {
        TelemetryValue::Bool(value)
    }
}

/// One decoded sample from the raw vehicle bus.
///
/// Speed and RPM travel in the same frame and are always decoded together;
/// there is no partial sample on this channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BusSample {
    /// Vehicle speed in centimeters per second.
    pub speed_cms: f64,
    /// Engine revolutions per minute.
    pub rpm: f64,
}

/// Authoritative cached telemetry snapshot.
///
/// Defaults to zeros / signals off, which is also what readers observe
/// before the first update arrives on either channel.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VehicleTelemetry {
    /// Vehicle speed in centimeters per second.
    #[serde(default)]
    pub speed_cms: f64,

    /// Engine revolutions per minute.
    #[serde(default)]
    pub rpm: f64,

    /// Battery capacity in percent.
    #[serde(default)]
    pub battery_capacity: f64,

    /// Charging current in milliamps.
    #[serde(default)]
    pub charging_current_ma: f64,

    /// Left turn-signal state.
    #[serde(default)]
    pub left_turn_signal: bool,

    /// Right turn-signal state.
    #[serde(default)]
    pub right_turn_signal: bool,
}

impl VehicleTelemetry {
    /// Create a builder for constructing a snapshot field by field.
    pub fn builder() -> VehicleTelemetryBuilder {
        VehicleTelemetryBuilder::default()
    }

    /// Read one slot as a dynamically-typed value.
    pub fn get(&self, field: TelemetryField) -> TelemetryValue {
        match field {
            TelemetryField::Speed => TelemetryValue::Float(self.speed_cms),
            TelemetryField::Rpm => TelemetryValue::Float(self.rpm),
            TelemetryField::BatteryCapacity => TelemetryValue::Float(self.battery_capacity),
            TelemetryField::ChargingCurrent => TelemetryValue::Float(self.charging_current_ma),
            TelemetryField::LeftTurnSignal => TelemetryValue::Bool(self.left_turn_signal),
            TelemetryField::RightTurnSignal => TelemetryValue::Bool(self.right_turn_signal),
        }
    }

    /// Write one slot. Returns `false` without touching the snapshot when
    /// the value kind does not match the field.
    pub fn set(&mut self, field: TelemetryField, value: TelemetryValue) -> bool {
        match (field, value) {
            (TelemetryField::Speed, TelemetryValue::Float(v)) => self.speed_cms = v,
            (TelemetryField::Rpm, TelemetryValue::Float(v)) => self.rpm = v,
            (TelemetryField::BatteryCapacity, TelemetryValue::Float(v)) => {
                self.battery_capacity = v
            }
            (TelemetryField::ChargingCurrent, TelemetryValue::Float(v)) => {
                self.charging_current_ma = v
            }
            (TelemetryField::LeftTurnSignal, TelemetryValue::Bool(v)) => {
                self.left_turn_signal = v
            }
            (TelemetryField::RightTurnSignal, TelemetryValue::Bool(v)) => {
                self.right_turn_signal = v
            }
            _ => return false,
        }
        true
    }

    /// Speed in meters per second.
    pub fn speed_ms(&self) -> f64 {
        self.speed_cms / 100.0
    }

    /// Speed in kilometers per hour.
    pub fn speed_kmh(&self) -> f64 {
        self.speed_cms * 0.036
    }

    /// Whether a charging current is currently flowing.
    pub fn is_charging(&self) -> bool {
        self.charging_current_ma > 0.0
    }
}

/// Builder for [`VehicleTelemetry`].
#[derive(Debug, Clone, Default)]
pub struct VehicleTelemetryBuilder {
    telemetry: VehicleTelemetry,
}

impl VehicleTelemetryBuilder {
    /// Vehicle speed in centimeters per second.
    pub fn speed_cms(mut self, value: f64) -> Self {
        self.telemetry.speed_cms = value;
        self
    }

    /// Engine revolutions per minute.
    pub fn rpm(mut self, value: f64) -> Self {
        self.telemetry.rpm = value;
        self
    }

    /// Battery capacity in percent.
    pub fn battery_capacity(mut self, value: f64) -> Self {
        self.telemetry.battery_capacity = value;
        self
    }

    /// Charging current in milliamps.
    pub fn charging_current_ma(mut self, value: f64) -> Self {
        self.telemetry.charging_current_ma = value;
        self
    }

    /// Left turn-signal state.
    pub fn left_turn_signal(mut self, value: bool) -> Self {
        self.telemetry.left_turn_signal = value;
        self
    }

    /// Right turn-signal state.
    pub fn right_turn_signal(mut self, value: bool) -> Self {
        self.telemetry.right_turn_signal = value;
        self
    }

    /// Finish the snapshot.
    pub fn build(self) -> VehicleTelemetry {
        self.telemetry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn test_default_snapshot_is_zeroed() -> TestResult {
        let telemetry = VehicleTelemetry::default();
        assert_eq!(telemetry.speed_cms, 0.0);
        assert_eq!(telemetry.rpm, 0.0);
        assert_eq!(telemetry.battery_capacity, 0.0);
        assert!(!telemetry.left_turn_signal);
        assert!(!telemetry.right_turn_signal);
        assert!(!telemetry.is_charging());
        Ok(())
    }

    #[test]
    fn test_builder() -> TestResult {
        let telemetry = VehicleTelemetry::builder()
            .speed_cms(150.5)
            .rpm(30.0)
            .battery_capacity(87.5)
            .charging_current_ma(1500.0)
            .left_turn_signal(true)
            .build();

        assert_eq!(telemetry.speed_cms, 150.5);
        assert_eq!(telemetry.rpm, 30.0);
        assert_eq!(telemetry.battery_capacity, 87.5);
        assert!(telemetry.left_turn_signal);
        assert!(!telemetry.right_turn_signal);
        assert!(telemetry.is_charging());
        Ok(())
    }

    #[test]
    fn test_float_equality_uses_tolerance() -> TestResult {
        let a = TelemetryValue::Float(87.5);
        let b = TelemetryValue::Float(87.5 + FLOAT_TOLERANCE / 2.0);
        let c = TelemetryValue::Float(87.6);
        assert!(a.approx_eq(b));
        assert!(!a.approx_eq(c));
        Ok(())
    }

    #[test]
    fn test_bool_equality_is_exact() -> TestResult {
        assert!(TelemetryValue::Bool(true).approx_eq(TelemetryValue::Bool(true)));
        assert!(!TelemetryValue::Bool(true).approx_eq(TelemetryValue::Bool(false)));
        Ok(())
    }

    #[test]
    fn test_mismatched_kinds_never_equal() -> TestResult {
        assert!(!TelemetryValue::Float(1.0).approx_eq(TelemetryValue::Bool(true)));
        assert!(!TelemetryValue::Bool(false).approx_eq(TelemetryValue::Float(0.0)));
        Ok(())
    }

    #[test]
    fn test_get_set_roundtrip_every_field() -> TestResult {
        let mut telemetry = VehicleTelemetry::default();
        for field in TelemetryField::ALL {
            let value = if field.is_boolean() {
                TelemetryValue::Bool(true)
            } else {
                TelemetryValue::Float(42.25)
            };
            assert!(telemetry.set(field, value));
            assert!(telemetry.get(field).approx_eq(value));
        }
        Ok(())
    }

    #[test]
    fn test_set_rejects_kind_mismatch() -> TestResult {
        let mut telemetry = VehicleTelemetry::default();
        assert!(!telemetry.set(TelemetryField::Speed, TelemetryValue::Bool(true)));
        assert!(!telemetry.set(TelemetryField::LeftTurnSignal, TelemetryValue::Float(1.0)));
        assert_eq!(telemetry, VehicleTelemetry::default());
        Ok(())
    }

    #[test]
    fn test_field_wire_names() -> TestResult {
        assert_eq!(TelemetryField::BatteryCapacity.name(), "battery_capacity");
        assert_eq!(TelemetryField::ChargingCurrent.name(), "charging_current");
        assert_eq!(TelemetryField::LeftTurnSignal.name(), "left_turn_signal");
        assert_eq!(TelemetryField::RightTurnSignal.name(), "right_turn_signal");
        Ok(())
    }

    #[test]
    fn test_speed_conversions() -> TestResult {
        let telemetry = VehicleTelemetry::builder().speed_cms(250.0).build();
        assert!((telemetry.speed_ms() - 2.5).abs() < 1e-12);
        assert!((telemetry.speed_kmh() - 9.0).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn test_snapshot_serde_roundtrip() -> TestResult {
        let telemetry = VehicleTelemetry::builder()
            .battery_capacity(55.0)
            .right_turn_signal(true)
            .build();
        let json = serde_json::to_string(&telemetry)?;
        let back: VehicleTelemetry = serde_json::from_str(&json)?;
        assert_eq!(back, telemetry);
        Ok(())
    }
}
