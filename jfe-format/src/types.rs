//! Type marker enumeration

/// Type marker prefixed to every encrypted payload.
///
/// The marker is written in the clear ahead of the ciphertext and selects
/// how the decrypted bytes are turned back into a JSON token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TypeMarker {
    /// Reserved; nulls are never encrypted
    Null = 1,
    /// UTF-8 string
    String = 2,
    /// IEEE-754 double
    Double = 3,
    /// Signed 64-bit integer
    Long = 4,
    /// Boolean stored as a 64-bit integer
    Boolean = 5,
    /// Array (minified JSON)
    Array = 6,
    /// Object (minified JSON)
    Object = 7,
}

impl TypeMarker {
    /// Convert from u8.
    ///
    /// Unknown values yield `None`; decoders treat them as opaque bytes
    /// rather than failing the document.
    pub fn from_u8(val: u8) -> Option<Self> {
        match val {
            1 => Some(TypeMarker::Null),
            2 => Some(TypeMarker::String),
            3 => Some(TypeMarker::Double),
            4 => Some(TypeMarker::Long),
            5 => Some(TypeMarker::Boolean),
            6 => Some(TypeMarker::Array),
            7 => Some(TypeMarker::Object),
            _ => None,
        }
    }

    /// Marker byte value
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Whether the payload is a serialized JSON container
    pub fn is_container(self) -> bool {
        matches!(self, TypeMarker::Array | TypeMarker::Object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_marker_from_u8_valid() {
        let cases = vec![
            (1, TypeMarker::Null),
            (2, TypeMarker::String),
            (3, TypeMarker::Double),
            (4, TypeMarker::Long),
            (5, TypeMarker::Boolean),
            (6, TypeMarker::Array),
            (7, TypeMarker::Object),
        ];

        for (val, expected) in cases {
            assert_eq!(TypeMarker::from_u8(val), Some(expected));
            assert_eq!(expected.as_u8(), val);
        }
    }

    #[test]
    fn test_type_marker_unknown_is_none() {
        assert_eq!(TypeMarker::from_u8(0), None);
        assert_eq!(TypeMarker::from_u8(8), None);
        assert_eq!(TypeMarker::from_u8(255), None);
    }

    #[test]
    fn test_container_markers() {
        assert!(TypeMarker::Array.is_container());
        assert!(TypeMarker::Object.is_container());
        assert!(!TypeMarker::String.is_container());
    }
}
