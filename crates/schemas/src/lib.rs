//! Canonical telemetry domain types for OpenCluster.
//!
//! This crate holds the data model shared by every ingestion channel: the
//! closed set of telemetry fields the cluster displays, the dynamically-typed
//! scalar carried by updates, the cached snapshot struct, and the raw bus
//! sample type. Both the CAN pipeline and the inter-process client convert
//! their channel-specific data into these types before anything else sees it.

pub mod telemetry;

pub use telemetry::{
    BusSample, FLOAT_TOLERANCE, TelemetryField, TelemetryValue, VehicleTelemetry,
    VehicleTelemetryBuilder,
};
