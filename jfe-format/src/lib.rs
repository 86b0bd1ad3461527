//! JFE Format - Core primitives for JSON Field Encryption
//!
//! This crate provides the wire-level building blocks shared by the codec and
//! streaming layers, with no I/O dependencies. It includes:
//!
//! - Reserved property names and format versions
//! - Type markers prefixed to encrypted payloads
//! - Binary encodings for booleans, integers, doubles and strings
//! - The `_ei` encryption metadata document
//! - Error types
//! - Resource limits

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod constants;
pub mod error;
pub mod limits;
pub mod metadata;
pub mod types;
pub mod value;

// Re-export commonly used types
pub use error::{JfeError, Result};
pub use limits::Limits;
pub use metadata::EncryptionProperties;
pub use types::TypeMarker;
pub use value::NumberValue;

/// Compression algorithm applied to payloads before encryption
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionAlgorithm {
    /// No compression
    #[default]
    None,
    /// Brotli (quality 0-11)
    Brotli,
    /// Zstandard (level 1-22)
    Zstd,
}

impl CompressionAlgorithm {
    /// Wire integer stored in `_ce`
    pub fn as_i32(self) -> i32 {
        match self {
            CompressionAlgorithm::None => 0,
            CompressionAlgorithm::Brotli => 1,
            CompressionAlgorithm::Zstd => 2,
        }
    }

    /// Decode the wire integer
    pub fn from_i32(val: i32) -> Option<Self> {
        match val {
            0 => Some(CompressionAlgorithm::None),
            1 => Some(CompressionAlgorithm::Brotli),
            2 => Some(CompressionAlgorithm::Zstd),
            _ => None,
        }
    }

    /// Accepted compression level range
    pub fn level_range(self) -> std::ops::RangeInclusive<u32> {
        match self {
            CompressionAlgorithm::None => 0..=0,
            CompressionAlgorithm::Brotli => 0..=11,
            CompressionAlgorithm::Zstd => 1..=22,
        }
    }

    /// Parse a user-facing name
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "none" => Some(CompressionAlgorithm::None),
            "brotli" => Some(CompressionAlgorithm::Brotli),
            "zstd" | "zstandard" => Some(CompressionAlgorithm::Zstd),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compression_wire_ids() {
        for algo in [
            CompressionAlgorithm::None,
            CompressionAlgorithm::Brotli,
            CompressionAlgorithm::Zstd,
        ] {
            assert_eq!(CompressionAlgorithm::from_i32(algo.as_i32()), Some(algo));
        }
        assert_eq!(CompressionAlgorithm::from_i32(3), None);
        assert_eq!(CompressionAlgorithm::from_i32(-1), None);
    }

    #[test]
    fn test_compression_names() {
        assert_eq!(
            CompressionAlgorithm::from_name("Brotli"),
            Some(CompressionAlgorithm::Brotli)
        );
        assert_eq!(
            CompressionAlgorithm::from_name("zstd"),
            Some(CompressionAlgorithm::Zstd)
        );
        assert_eq!(CompressionAlgorithm::from_name("gzip"), None);
    }

    #[test]
    fn test_level_ranges() {
        assert!(CompressionAlgorithm::Brotli.level_range().contains(&11));
        assert!(!CompressionAlgorithm::Brotli.level_range().contains(&12));
        assert!(!CompressionAlgorithm::Zstd.level_range().contains(&0));
    }
}
