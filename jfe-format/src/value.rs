//! Binary value encodings for encrypted payloads
//!
//! Fixed-width values (bool, i64, f64) are stored as 8 little-endian bytes;
//! strings are stored as their raw UTF-8 bytes. The plaintext length of every
//! payload is therefore known before serialization, which lets callers size
//! rented buffers up front.

use crate::constants::FIXED_VALUE_LEN;
use crate::error::{JfeError, Result};
use crate::types::TypeMarker;

/// A JSON number classified for encryption
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NumberValue {
    /// Integral value representable as i64
    Long(i64),
    /// Finite double
    Double(f64),
}

impl NumberValue {
    /// Marker used when this number is encrypted
    pub fn marker(&self) -> TypeMarker {
        match self {
            NumberValue::Long(_) => TypeMarker::Long,
            NumberValue::Double(_) => TypeMarker::Double,
        }
    }

    /// Serialized plaintext bytes
    pub fn serialize(&self) -> [u8; FIXED_VALUE_LEN] {
        match *self {
            NumberValue::Long(v) => serialize_i64(v),
            NumberValue::Double(v) => serialize_f64(v),
        }
    }
}

/// Upper bound of the serialized plaintext for a value of the given kind.
///
/// `utf8_len` is only consulted for strings.
pub fn max_serialized_size(marker: TypeMarker, utf8_len: usize) -> usize {
    match marker {
        TypeMarker::Boolean | TypeMarker::Long | TypeMarker::Double => FIXED_VALUE_LEN,
        TypeMarker::Null => 0,
        TypeMarker::String | TypeMarker::Array | TypeMarker::Object => utf8_len,
    }
}

/// Encode a boolean as a 64-bit integer 0 or 1.
pub fn serialize_bool(value: bool) -> [u8; FIXED_VALUE_LEN] {
    serialize_i64(i64::from(value))
}

/// Encode a signed 64-bit integer.
pub fn serialize_i64(value: i64) -> [u8; FIXED_VALUE_LEN] {
    value.to_le_bytes()
}

/// Encode a double as its IEEE-754 bit pattern.
pub fn serialize_f64(value: f64) -> [u8; FIXED_VALUE_LEN] {
    value.to_bits().to_le_bytes()
}

/// Strings are stored verbatim.
pub fn serialize_str(value: &str) -> &[u8] {
    value.as_bytes()
}

fn fixed(bytes: &[u8], kind: &'static str) -> Result<[u8; FIXED_VALUE_LEN]> {
    bytes.try_into().map_err(|_| {
        JfeError::MalformedPayload(format!(
            "{} payload must be {} bytes, got {}",
            kind,
            FIXED_VALUE_LEN,
            bytes.len()
        ))
    })
}

/// Decode a boolean payload.
pub fn deserialize_bool(bytes: &[u8]) -> Result<bool> {
    match i64::from_le_bytes(fixed(bytes, "boolean")?) {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(JfeError::MalformedPayload(format!(
            "boolean payload holds {}",
            other
        ))),
    }
}

/// Decode a 64-bit integer payload.
pub fn deserialize_i64(bytes: &[u8]) -> Result<i64> {
    Ok(i64::from_le_bytes(fixed(bytes, "long")?))
}

/// Decode a double payload. Non-finite values cannot originate from JSON.
pub fn deserialize_f64(bytes: &[u8]) -> Result<f64> {
    let value = f64::from_bits(u64::from_le_bytes(fixed(bytes, "double")?));
    if !value.is_finite() {
        return Err(JfeError::malformed_payload("double payload is not finite"));
    }
    Ok(value)
}

/// Decode a string payload.
pub fn deserialize_str(bytes: &[u8]) -> Result<&str> {
    std::str::from_utf8(bytes).map_err(|_| JfeError::MalformedDecryptedString)
}

/// Classify a JSON number literal.
///
/// Integral literals that fit in i64 become [`NumberValue::Long`]; anything
/// else that parses to a finite double becomes [`NumberValue::Double`].
pub fn classify_number(text: &[u8]) -> Result<NumberValue> {
    let text = std::str::from_utf8(text)
        .map_err(|_| JfeError::UnsupportedNumber("non-ASCII numeric literal".to_string()))?;

    if let Ok(v) = text.parse::<i64>() {
        return Ok(NumberValue::Long(v));
    }

    match text.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(NumberValue::Double(v)),
        _ => Err(JfeError::UnsupportedNumber(text.to_string())),
    }
}

/// Shortest round-trip rendering of a finite double.
///
/// The output always carries a fraction or exponent so it reads back as a
/// double.
pub fn format_f64(value: f64) -> Result<String> {
    if !value.is_finite() {
        return Err(JfeError::UnsupportedNumber(value.to_string()));
    }
    Ok(serde_json::to_string(&value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn fixed_width_encodings() {
        assert_eq!(serialize_bool(true), [1, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(serialize_bool(false), [0; 8]);
        assert_eq!(serialize_i64(-1), [0xFF; 8]);
        assert_eq!(serialize_f64(1.0), 0x3FF0_0000_0000_0000u64.to_le_bytes());
    }

    #[test]
    fn wrong_width_is_malformed() {
        for bytes in [&[][..], &[1u8; 7][..], &[1u8; 9][..]] {
            assert!(matches!(
                deserialize_i64(bytes),
                Err(JfeError::MalformedPayload(_))
            ));
            assert!(matches!(
                deserialize_f64(bytes),
                Err(JfeError::MalformedPayload(_))
            ));
            assert!(matches!(
                deserialize_bool(bytes),
                Err(JfeError::MalformedPayload(_))
            ));
        }
    }

    #[test]
    fn bool_out_of_range_is_malformed() {
        assert!(matches!(
            deserialize_bool(&serialize_i64(2)),
            Err(JfeError::MalformedPayload(_))
        ));
    }

    #[test]
    fn non_finite_double_payload_rejected() {
        let bytes = f64::NAN.to_bits().to_le_bytes();
        assert!(deserialize_f64(&bytes).is_err());
    }

    #[test]
    fn invalid_utf8_string() {
        assert!(matches!(
            deserialize_str(&[0xC3, 0x28]),
            Err(JfeError::MalformedDecryptedString)
        ));
        assert_eq!(deserialize_str("héllo".as_bytes()).unwrap(), "héllo");
    }

    #[test]
    fn classify_numbers() {
        assert_eq!(classify_number(b"12345").unwrap(), NumberValue::Long(12345));
        assert_eq!(classify_number(b"-7").unwrap(), NumberValue::Long(-7));
        assert_eq!(classify_number(b"3.25").unwrap(), NumberValue::Double(3.25));
        assert_eq!(classify_number(b"1E5").unwrap(), NumberValue::Double(1e5));
        assert_eq!(
            classify_number(b"9223372036854775808").unwrap(),
            NumberValue::Double(9223372036854775808.0)
        );
        match classify_number(b"-0.0").unwrap() {
            NumberValue::Double(v) => assert!(v == 0.0 && v.is_sign_negative()),
            other => panic!("expected double, got {:?}", other),
        }
    }

    #[test]
    fn classify_rejects_overflow() {
        assert!(matches!(
            classify_number(b"1e309"),
            Err(JfeError::UnsupportedNumber(_))
        ));
        assert!(matches!(
            classify_number(b"-1e309"),
            Err(JfeError::UnsupportedNumber(_))
        ));
    }

    #[test]
    fn format_keeps_double_shape() {
        assert_eq!(format_f64(3.25).unwrap(), "3.25");
        assert_eq!(format_f64(3.0).unwrap(), "3.0");
        assert_eq!(format_f64(-0.0).unwrap(), "-0.0");
        assert!(format_f64(f64::INFINITY).is_err());
    }

    #[test]
    fn max_sizes() {
        assert_eq!(max_serialized_size(TypeMarker::Long, 100), 8);
        assert_eq!(max_serialized_size(TypeMarker::String, 100), 100);
    }

    proptest! {
        #[test]
        fn long_roundtrip(v in any::<i64>()) {
            prop_assert_eq!(deserialize_i64(&serialize_i64(v)).unwrap(), v);
        }

        #[test]
        fn double_text_reclassifies_as_double(v in proptest::num::f64::NORMAL | proptest::num::f64::ZERO) {
            let text = format_f64(v).unwrap();
            prop_assert_eq!(classify_number(text.as_bytes()).unwrap(), NumberValue::Double(v));
        }
    }
}
