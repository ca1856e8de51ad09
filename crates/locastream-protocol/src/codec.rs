//! Validation and encoding of location payloads.
//!
//! The hub treats payloads as opaque bytes. Validation only answers the
//! question "is this a location sample?"; the original frame is what gets
//! forwarded.

use thiserror::Error;

use crate::frame::Frame;
use crate::location::{Location, LATITUDE_RANGE, LONGITUDE_RANGE};

/// Default maximum payload size (64 KiB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 64 * 1024;

/// Errors raised while validating a payload.
///
/// All of these are per-message: a peer that sends one bad payload stays
/// connected.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Payload exceeds the configured size limit.
    #[error("Payload size {size} exceeds maximum {max}")]
    PayloadTooLarge { size: usize, max: usize },

    /// Payload is not a JSON object with the required fields.
    #[error("Malformed payload: {0}")]
    Json(#[from] serde_json::Error),

    /// A coordinate is not a finite number inside its range.
    #[error("{field} {value} outside [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
}

impl ProtocolError {
    /// Short label for logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ProtocolError::PayloadTooLarge { .. } => "too_large",
            ProtocolError::Json(_) => "malformed",
            ProtocolError::OutOfRange { .. } => "out_of_range",
        }
    }
}

/// Parse and range-check a location sample.
///
/// # Errors
///
/// Returns an error if the bytes are not a JSON object with numeric
/// `latitude` and `longitude`, or if either coordinate is out of range.
pub fn decode_sample(data: &[u8]) -> Result<Location, ProtocolError> {
    let sample: Location = serde_json::from_slice(data)?;
    check_range("latitude", sample.latitude, LATITUDE_RANGE)?;
    check_range("longitude", sample.longitude, LONGITUDE_RANGE)?;
    Ok(sample)
}

/// Validate an inbound frame against a size limit, then parse it.
///
/// # Errors
///
/// Returns [`ProtocolError::PayloadTooLarge`] before attempting to parse an
/// oversized frame, otherwise whatever [`decode_sample`] reports.
pub fn validate(frame: &Frame, max_size: usize) -> Result<Location, ProtocolError> {
    if frame.len() > max_size {
        return Err(ProtocolError::PayloadTooLarge {
            size: frame.len(),
            max: max_size,
        });
    }
    decode_sample(frame.as_bytes())
}

/// Encode a sample as a text frame.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_sample(sample: &Location) -> Result<Frame, ProtocolError> {
    let json = serde_json::to_string(sample)?;
    Ok(Frame::from(json))
}

fn check_range(
    field: &'static str,
    value: f64,
    (min, max): (f64, f64),
) -> Result<(), ProtocolError> {
    if value.is_finite() && (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ProtocolError::OutOfRange {
            field,
            value,
            min,
            max,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_minimal_sample() {
        let sample = decode_sample(br#"{"latitude":23.81,"longitude":90.41}"#).unwrap();
        assert_eq!(sample.latitude, 23.81);
        assert_eq!(sample.longitude, 90.41);
        assert!(sample.distance.is_none());
    }

    #[test]
    fn test_decode_with_journey() {
        let sample = decode_sample(
            br#"{"latitude":24.89,"longitude":91.87,"distance":241.5,"duration":300}"#,
        )
        .unwrap();
        assert_eq!(sample.distance, Some(241.5));
        assert_eq!(sample.duration, Some(300.0));
    }

    #[test]
    fn test_reject_non_json() {
        let err = decode_sample(b"hello there").unwrap_err();
        assert!(matches!(err, ProtocolError::Json(_)));
        assert_eq!(err.kind(), "malformed");
    }

    #[test]
    fn test_reject_missing_fields() {
        assert!(decode_sample(br#"{"latitude":23.81}"#).is_err());
        assert!(decode_sample(br#"{"lat":1,"lon":2}"#).is_err());
        assert!(decode_sample(br#"[23.81, 90.41]"#).is_err());
    }

    #[test]
    fn test_reject_wrong_types() {
        assert!(decode_sample(br#"{"latitude":"23.81","longitude":90.41}"#).is_err());
        assert!(decode_sample(br#"{"latitude":1,"longitude":2,"user_id":5}"#).is_err());
        assert!(decode_sample(br#"{"latitude":1,"longitude":2,"distance":"far"}"#).is_err());
    }

    #[test]
    fn test_range_boundaries() {
        assert!(decode_sample(br#"{"latitude":90,"longitude":-180}"#).is_ok());
        assert!(decode_sample(br#"{"latitude":-90,"longitude":180}"#).is_ok());

        match decode_sample(br#"{"latitude":90.5,"longitude":0}"#) {
            Err(ProtocolError::OutOfRange { field, .. }) => assert_eq!(field, "latitude"),
            other => panic!("Expected OutOfRange error, got {:?}", other),
        }
        match decode_sample(br#"{"latitude":0,"longitude":-180.01}"#) {
            Err(ProtocolError::OutOfRange { field, .. }) => assert_eq!(field, "longitude"),
            other => panic!("Expected OutOfRange error, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_size_limit() {
        let frame = Frame::text(r#"{"latitude":1,"longitude":2}"#);
        assert!(validate(&frame, DEFAULT_MAX_PAYLOAD_SIZE).is_ok());

        match validate(&frame, 8) {
            Err(ProtocolError::PayloadTooLarge { size, max }) => {
                assert_eq!(size, frame.len());
                assert_eq!(max, 8);
            }
            other => panic!("Expected PayloadTooLarge error, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_binary_frame() {
        let frame = Frame::binary(br#"{"latitude":1,"longitude":2}"#.to_vec());
        assert!(validate(&frame, DEFAULT_MAX_PAYLOAD_SIZE).is_ok());
    }

    #[test]
    fn test_encode_sample_is_text() {
        let frame = encode_sample(&Location::new(23.81, 90.41).with_user("a")).unwrap();
        assert!(frame.is_text());

        let decoded = decode_sample(frame.as_bytes()).unwrap();
        assert_eq!(decoded.user_id.as_deref(), Some("a"));
    }
}
