//! Sensor payload codec.
//!
//! The node replies with exactly 8 bytes: temperature then humidity, each an
//! IEEE-754 `f32` in little-endian order. Length is the only framing signal,
//! so anything that is not exactly 8 bytes is rejected before field
//! extraction.

use sensorlink_common::SensorReading;
use thiserror::Error;

/// Encoded size of a [`SensorReading`].
pub const PAYLOAD_LEN: usize = 8;

/// Payload decode errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("malformed payload: expected {expected} bytes, got {actual}")]
    MalformedPayload { expected: usize, actual: usize },
}

/// Decode a reading from a received payload.
pub fn decode(bytes: &[u8]) -> Result<SensorReading, CodecError> {
    let bytes: &[u8; PAYLOAD_LEN] = bytes.try_into().map_err(|_| CodecError::MalformedPayload {
        expected: PAYLOAD_LEN,
        actual: bytes.len(),
    })?;

    let temperature = f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let humidity = f32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);

    Ok(SensorReading::new(temperature, humidity))
}

/// Encode a reading in the layout [`decode`] expects.
pub fn encode(reading: &SensorReading) -> [u8; PAYLOAD_LEN] {
    let mut out = [0u8; PAYLOAD_LEN];
    out[..4].copy_from_slice(&reading.temperature.to_le_bytes());
    out[4..].copy_from_slice(&reading.humidity.to_le_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_known_bytes() {
        let bytes = [0x00, 0x00, 0xC8, 0x41, 0x00, 0x00, 0x70, 0x42];
        assert_eq!(decode(&bytes).unwrap(), SensorReading::new(25.0, 60.0));
    }

    #[test]
    fn test_decode_wrong_lengths() {
        for len in [0usize, 3, 4, 7, 9, 16] {
            let bytes = vec![0u8; len];
            assert_eq!(
                decode(&bytes),
                Err(CodecError::MalformedPayload {
                    expected: 8,
                    actual: len
                }),
                "length {len}"
            );
        }
    }

    #[test]
    fn test_encode_decode_is_bit_exact() {
        let samples = [
            SensorReading::new(22.5, 55.0),
            SensorReading::new(-40.0, 0.0),
            SensorReading::new(f32::MIN_POSITIVE, f32::MAX),
            SensorReading::new(-0.0, 100.0),
            SensorReading::new(1.0e-42, 33.333),
        ];

        for reading in samples {
            let decoded = decode(&encode(&reading)).unwrap();
            assert_eq!(decoded.temperature.to_bits(), reading.temperature.to_bits());
            assert_eq!(decoded.humidity.to_bits(), reading.humidity.to_bits());
        }
    }

    #[test]
    fn test_non_finite_values_pass_through() {
        let reading = SensorReading::new(f32::NAN, f32::INFINITY);
        let decoded = decode(&encode(&reading)).unwrap();
        assert!(decoded.temperature.is_nan());
        assert_eq!(decoded.humidity, f32::INFINITY);
    }
}
