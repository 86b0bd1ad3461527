//! Payload encryption around an external data encryption key
//!
//! An encrypted payload is laid out as:
//!
//! ```text
//! ┌────────────┬──────────────────────────────────┐
//! │ TypeMarker │ key.encrypt(plaintext)           │
//! │  (1 byte)  │ (key.encrypt_byte_count(n) bytes)│
//! └────────────┴──────────────────────────────────┘
//! ```
//!
//! The marker is never encrypted. It is not range-checked on decrypt; callers
//! dispatch on it and fall back to raw bytes for unknown values.

use jfe_format::{JfeError, Result, TypeMarker};
use std::sync::Arc;

/// Authenticated encryption primitive bound to one key.
///
/// Implementations write into caller-provided buffers sized with the
/// `*_byte_count` predictions so callers can stage output in pooled memory.
pub trait DataEncryptionKey: Send + Sync {
    /// Algorithm identifier recorded in the document metadata
    fn algorithm(&self) -> &str;

    /// Exact ciphertext length for a plaintext of `plaintext_len` bytes.
    fn encrypt_byte_count(&self, plaintext_len: usize) -> usize;

    /// Plaintext length for a ciphertext of `ciphertext_len` bytes.
    ///
    /// Returns [`JfeError::MalformedPayload`] when no valid ciphertext can
    /// have that length.
    fn decrypt_byte_count(&self, ciphertext_len: usize) -> Result<usize>;

    /// Encrypt `plaintext` into `out`, returning the number of bytes written.
    fn encrypt(&self, plaintext: &[u8], out: &mut [u8]) -> Result<usize>;

    /// Decrypt `ciphertext` into `out`, returning the number of bytes written.
    ///
    /// Authentication failures are reported as [`JfeError::DecryptionFailed`].
    fn decrypt(&self, ciphertext: &[u8], out: &mut [u8]) -> Result<usize>;
}

/// Resolves data encryption keys by identifier.
pub trait EncryptionKeyProvider: Send + Sync {
    /// Key for `key_id`, which must implement `algorithm`.
    fn key(&self, key_id: &str, algorithm: &str) -> Result<Arc<dyn DataEncryptionKey>>;
}

/// Encrypt a serialized value, writing `[marker][ciphertext]` into `out`.
pub fn encrypt_payload(
    key: &dyn DataEncryptionKey,
    marker: TypeMarker,
    plaintext: &[u8],
    out: &mut Vec<u8>,
) -> Result<()> {
    let predicted = key.encrypt_byte_count(plaintext.len());
    out.clear();
    out.resize(predicted + 1, 0);
    out[0] = marker.as_u8();

    let written = key.encrypt(plaintext, &mut out[1..])?;
    if written != predicted {
        return Err(JfeError::EncryptionBackendError(format!(
            "key produced {} ciphertext bytes, predicted {}",
            written, predicted
        )));
    }

    Ok(())
}

/// Decrypt `[marker][ciphertext]` into `out`, returning the raw marker byte.
pub fn decrypt_payload(
    key: &dyn DataEncryptionKey,
    payload: &[u8],
    out: &mut Vec<u8>,
) -> Result<u8> {
    let (&marker, ciphertext) = payload
        .split_first()
        .ok_or_else(|| JfeError::malformed_payload("empty encrypted payload"))?;

    let capacity = key.decrypt_byte_count(ciphertext.len())?;
    out.clear();
    out.resize(capacity, 0);

    let written = key.decrypt(ciphertext, out)?;
    if written > capacity {
        return Err(JfeError::EncryptionBackendError(format!(
            "key produced {} plaintext bytes, predicted at most {}",
            written, capacity
        )));
    }
    out.truncate(written);

    Ok(marker)
}
