//! Fixed-point decoding of the drive-telemetry frame.
//!
//! The vehicle bus broadcasts speed and RPM together in one frame: six
//! payload bytes, each value encoded as a big-endian 16-bit integer part
//! followed by one byte of hundredths. This layout is the bus's physical
//! format and is reproduced bit-exactly.

use opencluster_schemas::telemetry::BusSample;

/// Frame identifier carrying the drive telemetry pair.
pub const DRIVE_FRAME_ID: u32 = 0x123;

/// Payload bytes required for one speed/RPM pair.
pub const DRIVE_FRAME_LEN: usize = 6;

/// Maximum payload of a classical CAN frame.
pub const MAX_FRAME_LEN: usize = 8;

/// One raw frame as read from the bus. Ephemeral; lives for one decode call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusFrame {
    /// Frame identifier.
    pub id: u32,
    /// Number of valid payload bytes (0..=8).
    pub len: u8,
    /// Payload buffer; bytes past `len` are unspecified.
    pub data: [u8; MAX_FRAME_LEN],
}

impl BusFrame {
    /// Build a frame from a payload slice, truncating past eight bytes.
    pub fn new(id: u32, payload: &[u8]) -> Self {
        let mut data = [0u8; MAX_FRAME_LEN];
        let len = payload.len().min(MAX_FRAME_LEN);
        if let (Some(dst), Some(src)) = (data.get_mut(..len), payload.get(..len)) {
            dst.copy_from_slice(src);
        }
        Self {
            id,
            len: len as u8,
            data,
        }
    }

    /// The valid payload bytes.
    pub fn payload(&self) -> &[u8] {
        let len = usize::from(self.len).min(MAX_FRAME_LEN);
        self.data.get(..len).unwrap_or(&self.data)
    }
}

/// Integer part plus one byte of hundredths, big-endian.
fn fixed_point_hundredths(int_hi: u8, int_lo: u8, frac: u8) -> f64 {
    f64::from(u16::from_be_bytes([int_hi, int_lo])) + f64::from(frac) / 100.0
}

/// Decode the drive telemetry pair from `frame`.
///
/// Frames with a different identifier, or with fewer than six payload
/// bytes, are unrelated bus traffic and yield `None`. Decoded magnitudes
/// are not sanity-checked; the wire layout is reproduced as-is.
pub fn decode_frame(frame: &BusFrame, frame_id: u32) -> Option<BusSample> {
    if frame.id != frame_id {
        return None;
    }
    let &[b0, b1, b2, b3, b4, b5, ..] = frame.payload() else {
        return None;
    };
    Some(BusSample {
        speed_cms: fixed_point_hundredths(b0, b1, b2),
        rpm: fixed_point_hundredths(b3, b4, b5),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn test_decode_known_frame() -> TestResult {
        // 150.50 cm/s, 30.00 RPM.
        let frame = BusFrame::new(0x123, &[0x00, 0x96, 0x32, 0x00, 0x1E, 0x00]);
        let sample = decode_frame(&frame, DRIVE_FRAME_ID).ok_or("no sample")?;
        assert!((sample.speed_cms - 150.50).abs() < 1e-12);
        assert!((sample.rpm - 30.00).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn test_decode_maximum_values() -> TestResult {
        let frame = BusFrame::new(0x123, &[0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
        let sample = decode_frame(&frame, DRIVE_FRAME_ID).ok_or("no sample")?;
        assert!((sample.speed_cms - 65537.55).abs() < 1e-9);
        assert!((sample.rpm - 65537.55).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn test_nonsensical_values_still_decode() -> TestResult {
        // Fraction bytes above 99 are numerically odd but not rejected.
        let frame = BusFrame::new(0x123, &[0x00, 0x01, 0xC8, 0x00, 0x00, 0x00]);
        let sample = decode_frame(&frame, DRIVE_FRAME_ID).ok_or("no sample")?;
        assert!((sample.speed_cms - 3.0).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn test_other_identifier_yields_none() -> TestResult {
        let frame = BusFrame::new(0x124, &[0x00, 0x96, 0x32, 0x00, 0x1E, 0x00]);
        assert!(decode_frame(&frame, DRIVE_FRAME_ID).is_none());
        Ok(())
    }

    #[test]
    fn test_short_frame_yields_none() -> TestResult {
        for len in 0..DRIVE_FRAME_LEN {
            let payload = vec![0xAAu8; len];
            let frame = BusFrame::new(0x123, &payload);
            assert!(decode_frame(&frame, DRIVE_FRAME_ID).is_none());
        }
        Ok(())
    }

    #[test]
    fn test_longer_frame_uses_first_six_bytes() -> TestResult {
        let frame = BusFrame::new(0x123, &[0x00, 0x96, 0x32, 0x00, 0x1E, 0x00, 0xDE, 0xAD]);
        let sample = decode_frame(&frame, DRIVE_FRAME_ID).ok_or("no sample")?;
        assert!((sample.speed_cms - 150.50).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn test_payload_truncates_past_eight_bytes() -> TestResult {
        let frame = BusFrame::new(0x123, &[0u8; 16]);
        assert_eq!(frame.len, 8);
        assert_eq!(frame.payload().len(), 8);
        Ok(())
    }

    #[test]
    fn test_custom_identifier_filter() -> TestResult {
        let frame = BusFrame::new(0x200, &[0x00, 0x01, 0x00, 0x00, 0x02, 0x00]);
        assert!(decode_frame(&frame, DRIVE_FRAME_ID).is_none());
        assert!(decode_frame(&frame, 0x200).is_some());
        Ok(())
    }
}

#[cfg(test)]
mod proptest_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(500))]

        #[test]
        fn prop_decode_never_panics(
            id in any::<u32>(),
            data in proptest::collection::vec(any::<u8>(), 0..16)
        ) {
            let frame = BusFrame::new(id, &data);
            let _ = decode_frame(&frame, DRIVE_FRAME_ID);
        }

        #[test]
        fn prop_decode_matches_formula(
            data in proptest::collection::vec(any::<u8>(), 6..=8)
        ) {
            let frame = BusFrame::new(DRIVE_FRAME_ID, &data);
            let sample = decode_frame(&frame, DRIVE_FRAME_ID);
            prop_assert!(sample.is_some());
            if let (Some(sample), &[b0, b1, b2, b3, b4, b5, ..]) = (sample, data.as_slice()) {
                let speed = f64::from((u16::from(b0) << 8) | u16::from(b1)) + f64::from(b2) / 100.0;
                let rpm = f64::from((u16::from(b3) << 8) | u16::from(b4)) + f64::from(b5) / 100.0;
                prop_assert!((sample.speed_cms - speed).abs() < 1e-12);
                prop_assert!((sample.rpm - rpm).abs() < 1e-12);
            }
        }
    }
}
