//! Raw vehicle-bus ingestion.
//!
//! Two pieces: [`frame`] is the pure fixed-point decoder for the cluster's
//! drive-telemetry frame, portable everywhere; [`source`] owns the bound
//! SocketCAN socket and drains it on a short periodic tick, Linux only, the
//! way the raw bus is actually attached on the vehicle.

pub mod frame;
#[cfg(target_os = "linux")]
pub mod source;

pub use frame::{BusFrame, DRIVE_FRAME_ID, DRIVE_FRAME_LEN, decode_frame};
#[cfg(target_os = "linux")]
pub use source::{BusOpenError, CanBusConfig, CanFrameSource};
