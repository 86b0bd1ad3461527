//! Error types for JFE

use thiserror::Error;

/// JFE error types
///
/// Every variant aborts processing of the whole document. Messages never
/// carry plaintext or key material.
#[derive(Debug, Error)]
pub enum JfeError {
    /// Ciphertext, Base64 text or a fixed-width value has an impossible shape.
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),
    /// The key backend rejected the ciphertext (authentication failure).
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),
    /// Encryption metadata declares a format version this build cannot read.
    #[error("Unsupported encryption format version: {0}. Please upgrade to the latest version.")]
    UnsupportedFormatVersion(i32),
    /// Encryption metadata declares a compression algorithm this build cannot read.
    #[error("Unsupported compression algorithm: {0}")]
    UnsupportedCompressionAlgorithm(i32),
    /// A single JSON token does not fit into the maximum read buffer.
    #[error("JSON token exceeds maximum supported size of {max} bytes")]
    TokenTooLarge {
        /// Configured buffer cap in bytes
        max: usize,
    },
    /// A numeric literal is not finite or cannot be represented.
    #[error("Unsupported number: {0}")]
    UnsupportedNumber(String),
    /// A decrypted string payload is not valid UTF-8.
    #[error("Decrypted string payload is not valid UTF-8")]
    MalformedDecryptedString,
    /// The key provider or key failed outside of authentication.
    #[error("Encryption backend error: {0}")]
    EncryptionBackendError(String),
    /// Input is not well-formed JSON.
    #[error("Malformed JSON at byte {offset}: {reason}")]
    MalformedJson {
        /// Absolute byte offset in the input stream
        offset: u64,
        /// Description of the violation
        reason: String,
    },
    /// A configured resource limit was exceeded.
    #[error("Limit exceeded: {0}")]
    LimitExceeded(String),
    /// Options are inconsistent or incomplete.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    /// The operation was cancelled at a chunk boundary.
    #[error("Operation cancelled")]
    Cancelled,
    /// I/O operation failed while reading or writing data.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// JSON parsing or serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl JfeError {
    /// Build a [`JfeError::MalformedJson`] at the given stream offset.
    pub fn malformed_json(offset: u64, reason: impl Into<String>) -> Self {
        JfeError::MalformedJson {
            offset,
            reason: reason.into(),
        }
    }

    /// Build a [`JfeError::MalformedPayload`] from a static description.
    pub fn malformed_payload(reason: impl Into<String>) -> Self {
        JfeError::MalformedPayload(reason.into())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, JfeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_offending_value() {
        let err = JfeError::UnsupportedFormatVersion(7);
        assert!(err.to_string().contains('7'));

        let err = JfeError::malformed_json(42, "unexpected character");
        assert_eq!(
            err.to_string(),
            "Malformed JSON at byte 42: unexpected character"
        );

        let err = JfeError::TokenTooLarge { max: 1024 };
        assert!(err.to_string().contains("1024"));
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        let err: JfeError = io.into();
        assert!(matches!(err, JfeError::Io(_)));
    }
}
