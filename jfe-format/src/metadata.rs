//! Encryption metadata stored under the reserved `_ei` property

use crate::constants::{FORMAT_VERSION_MDE, FORMAT_VERSION_MDE_COMPRESSED};
use crate::error::{JfeError, Result};
use crate::CompressionAlgorithm;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-document encryption metadata.
///
/// Written once when the document is encrypted and read once when it is
/// decrypted. Field order on the wire follows declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionProperties {
    /// 3 for plain per-property encryption, 4 when compression may be used
    #[serde(rename = "_ef")]
    pub format_version: i32,
    /// Encryption algorithm identifier
    #[serde(rename = "_ea")]
    pub algorithm: String,
    /// Data encryption key identifier
    #[serde(rename = "_en")]
    pub key_id: String,
    /// Whole-document ciphertext; always null for per-property formats
    #[serde(rename = "_ed", default)]
    pub encrypted_data: Option<String>,
    /// Encrypted top-level paths in document order
    #[serde(rename = "_ep", default)]
    pub encrypted_paths: Vec<String>,
    /// Compression algorithm as its wire integer
    #[serde(rename = "_ce", default)]
    pub compression_algorithm: i32,
    /// Original payload length per compressed path
    #[serde(rename = "_cp", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub compressed_paths: BTreeMap<String, i64>,
}

impl EncryptionProperties {
    /// Metadata for a freshly encrypted document.
    pub fn new(
        algorithm: impl Into<String>,
        key_id: impl Into<String>,
        compression: CompressionAlgorithm,
    ) -> Self {
        let format_version = if compression == CompressionAlgorithm::None {
            FORMAT_VERSION_MDE
        } else {
            FORMAT_VERSION_MDE_COMPRESSED
        };
        Self {
            format_version,
            algorithm: algorithm.into(),
            key_id: key_id.into(),
            encrypted_data: None,
            encrypted_paths: Vec::new(),
            compression_algorithm: compression.as_i32(),
            compressed_paths: BTreeMap::new(),
        }
    }

    /// Check that this build can decrypt the document.
    ///
    /// The compression algorithm only matters when some path was actually
    /// compressed.
    pub fn validate(&self) -> Result<()> {
        if self.format_version != FORMAT_VERSION_MDE
            && self.format_version != FORMAT_VERSION_MDE_COMPRESSED
        {
            return Err(JfeError::UnsupportedFormatVersion(self.format_version));
        }

        if !self.compressed_paths.is_empty() {
            let supported = CompressionAlgorithm::from_i32(self.compression_algorithm)
                .map(|c| c != CompressionAlgorithm::None)
                .unwrap_or(false);
            if !supported {
                return Err(JfeError::UnsupportedCompressionAlgorithm(
                    self.compression_algorithm,
                ));
            }
        }

        Ok(())
    }

    /// Decoded compression algorithm.
    pub fn compression(&self) -> Result<CompressionAlgorithm> {
        CompressionAlgorithm::from_i32(self.compression_algorithm)
            .ok_or(JfeError::UnsupportedCompressionAlgorithm(self.compression_algorithm))
    }

    /// Original length recorded for a compressed path.
    pub fn compressed_len(&self, path: &str) -> Option<i64> {
        self.compressed_paths.get(path).copied()
    }
}
