//! Reference AES-256-GCM data encryption key and a static key provider.
//!
//! Ciphertext layout produced by [`Aes256GcmKey`]:
//!
//! ```text
//! ┌───────────┬──────────────┬──────────┐
//! │   Nonce   │  Ciphertext  │   Tag    │
//! │ (12 bytes)│  (n bytes)   │(16 bytes)│
//! └───────────┴──────────────┴──────────┘
//! ```
//!
//! A fresh random nonce is drawn for every value, so encrypting the same
//! plaintext twice yields different ciphertexts.

use crate::cipher::{DataEncryptionKey, EncryptionKeyProvider};
use aes_gcm::aead::{AeadCore, AeadInPlace, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce, Tag};
use ahash::AHashMap;
use base64::prelude::*;
use jfe_format::{JfeError, Result};
use std::sync::Arc;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Algorithm identifier recorded for [`Aes256GcmKey`].
pub const AES_256_GCM_RANDOMIZED: &str = "AEAD_AES_256_GCM_RANDOMIZED";

/// Key length in bytes.
pub const KEY_LEN: usize = 32;
/// Nonce length in bytes.
pub const NONCE_LEN: usize = 12;
/// Authentication tag length in bytes.
pub const TAG_LEN: usize = 16;

#[derive(Clone, Zeroize, ZeroizeOnDrop)]
struct KeyBytes([u8; KEY_LEN]);

/// AES-256-GCM key with randomized nonces.
///
/// Key material is zeroized on drop and never printed by `Debug`.
pub struct Aes256GcmKey {
    bytes: KeyBytes,
}

impl std::fmt::Debug for Aes256GcmKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aes256GcmKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

impl Aes256GcmKey {
    /// Key from raw bytes.
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self {
            bytes: KeyBytes(bytes),
        }
    }

    /// Fresh random key.
    pub fn generate() -> Self {
        let key = Aes256Gcm::generate_key(OsRng);
        let mut bytes = [0u8; KEY_LEN];
        bytes.copy_from_slice(&key);
        Self::new(bytes)
    }

    /// Key from standard or URL-safe Base64.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let mut decoded = BASE64_STANDARD
            .decode(encoded.trim())
            .or_else(|_| BASE64_URL_SAFE.decode(encoded.trim()))
            .map_err(|_| JfeError::InvalidConfiguration("key is not valid base64".into()))?;

        if decoded.len() != KEY_LEN {
            decoded.zeroize();
            return Err(JfeError::InvalidConfiguration(format!(
                "key must be exactly {} bytes when decoded",
                KEY_LEN
            )));
        }

        let mut bytes = [0u8; KEY_LEN];
        bytes.copy_from_slice(&decoded);
        decoded.zeroize();

        Ok(Self::new(bytes))
    }

    /// Base64 rendering of the key material, for key export.
    pub fn to_base64(&self) -> String {
        BASE64_STANDARD.encode(self.bytes.0)
    }

    fn cipher(&self) -> Result<Aes256Gcm> {
        Aes256Gcm::new_from_slice(&self.bytes.0)
            .map_err(|_| JfeError::EncryptionBackendError("invalid AES-256 key length".into()))
    }
}

impl DataEncryptionKey for Aes256GcmKey {
    fn algorithm(&self) -> &str {
        AES_256_GCM_RANDOMIZED
    }

    fn encrypt_byte_count(&self, plaintext_len: usize) -> usize {
        NONCE_LEN + plaintext_len + TAG_LEN
    }

    fn decrypt_byte_count(&self, ciphertext_len: usize) -> Result<usize> {
        ciphertext_len
            .checked_sub(NONCE_LEN + TAG_LEN)
            .ok_or_else(|| {
                JfeError::MalformedPayload(format!(
                    "ciphertext of {} bytes is shorter than nonce and tag",
                    ciphertext_len
                ))
            })
    }

    fn encrypt(&self, plaintext: &[u8], out: &mut [u8]) -> Result<usize> {
        let total = self.encrypt_byte_count(plaintext.len());
        if out.len() < total {
            return Err(JfeError::EncryptionBackendError(
                "output buffer too small".into(),
            ));
        }

        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let (nonce_out, rest) = out.split_at_mut(NONCE_LEN);
        nonce_out.copy_from_slice(&nonce);

        let (body, rest) = rest.split_at_mut(plaintext.len());
        body.copy_from_slice(plaintext);

        let tag = self
            .cipher()?
            .encrypt_in_place_detached(&nonce, b"", body)
            .map_err(|_| JfeError::EncryptionBackendError("AES-GCM encryption failed".into()))?;
        rest[..TAG_LEN].copy_from_slice(&tag);

        Ok(total)
    }

    fn decrypt(&self, ciphertext: &[u8], out: &mut [u8]) -> Result<usize> {
        let len = self.decrypt_byte_count(ciphertext.len())?;
        if out.len() < len {
            return Err(JfeError::EncryptionBackendError(
                "output buffer too small".into(),
            ));
        }

        let (nonce, rest) = ciphertext.split_at(NONCE_LEN);
        let (body, tag) = rest.split_at(len);

        let plain = &mut out[..len];
        plain.copy_from_slice(body);

        self.cipher()?
            .decrypt_in_place_detached(Nonce::from_slice(nonce), b"", plain, Tag::from_slice(tag))
            .map_err(|_| {
                plain.zeroize();
                JfeError::DecryptionFailed("authentication tag mismatch".into())
            })?;

        Ok(len)
    }
}

/// In-memory key provider holding a fixed set of keys.
#[derive(Default, Clone)]
pub struct StaticKeyProvider {
    keys: AHashMap<String, Arc<dyn DataEncryptionKey>>,
}

impl std::fmt::Debug for StaticKeyProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<&String> = self.keys.keys().collect();
        ids.sort();
        f.debug_struct("StaticKeyProvider")
            .field("key_ids", &ids)
            .finish()
    }
}

impl StaticKeyProvider {
    /// Empty provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider holding a single key.
    pub fn with_key(key_id: impl Into<String>, key: impl DataEncryptionKey + 'static) -> Self {
        let mut provider = Self::new();
        provider.insert(key_id, key);
        provider
    }

    /// Register a key under `key_id`, replacing any previous one.
    pub fn insert(&mut self, key_id: impl Into<String>, key: impl DataEncryptionKey + 'static) {
        self.keys.insert(key_id.into(), Arc::new(key));
    }
}

impl EncryptionKeyProvider for StaticKeyProvider {
    fn key(&self, key_id: &str, algorithm: &str) -> Result<Arc<dyn DataEncryptionKey>> {
        let key = self.keys.get(key_id).ok_or_else(|| {
            JfeError::EncryptionBackendError(format!("unknown data encryption key '{}'", key_id))
        })?;

        if key.algorithm() != algorithm {
            return Err(JfeError::EncryptionBackendError(format!(
                "key '{}' implements {}, not {}",
                key_id,
                key.algorithm(),
                algorithm
            )));
        }

        Ok(Arc::clone(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::{decrypt_payload, encrypt_payload};
    use jfe_format::TypeMarker;

    fn test_key() -> Aes256GcmKey {
        Aes256GcmKey::new([0x42; KEY_LEN])
    }

    #[test]
    fn roundtrip_and_layout() {
        let key = test_key();
        let mut out = vec![0u8; key.encrypt_byte_count(5)];
        let written = key.encrypt(b"hello", &mut out).unwrap();
        assert_eq!(written, NONCE_LEN + 5 + TAG_LEN);

        let mut plain = vec![0u8; key.decrypt_byte_count(written).unwrap()];
        let n = key.decrypt(&out, &mut plain).unwrap();
        assert_eq!(&plain[..n], b"hello");
    }

    #[test]
    fn randomized_ciphertexts() {
        let key = test_key();
        let mut a = Vec::new();
        let mut b = Vec::new();
        encrypt_payload(&key, TypeMarker::String, b"same", &mut a).unwrap();
        encrypt_payload(&key, TypeMarker::String, b"same", &mut b).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn every_flipped_byte_fails_authentication() {
        let key = test_key();
        let mut payload = Vec::new();
        encrypt_payload(&key, TypeMarker::Long, &7i64.to_le_bytes(), &mut payload).unwrap();

        for i in 1..payload.len() {
            let mut tampered = payload.clone();
            tampered[i] ^= 0x80;
            let mut plain = Vec::new();
            match decrypt_payload(&key, &tampered, &mut plain) {
                Err(JfeError::DecryptionFailed(_)) => {}
                other => panic!("byte {}: expected DecryptionFailed, got {:?}", i, other),
            }
        }
    }

    #[test]
    fn short_ciphertext_is_malformed() {
        let key = test_key();
        let mut plain = Vec::new();
        let payload = [TypeMarker::String.as_u8(); NONCE_LEN + TAG_LEN];
        assert!(matches!(
            decrypt_payload(&key, &payload, &mut plain),
            Err(JfeError::MalformedPayload(_))
        ));
    }

    #[test]
    fn base64_key_loading() {
        let key = Aes256GcmKey::generate();
        let encoded = key.to_base64();
        let loaded = Aes256GcmKey::from_base64(&encoded).unwrap();
        assert_eq!(loaded.to_base64(), encoded);

        assert!(Aes256GcmKey::from_base64("not base64!").is_err());
        assert!(Aes256GcmKey::from_base64(&BASE64_STANDARD.encode([1u8; 16])).is_err());
    }

    #[test]
    fn debug_is_redacted() {
        let text = format!("{:?}", test_key());
        assert!(text.contains("REDACTED"));
        assert!(!text.contains("66"));
    }

    #[test]
    fn provider_checks_id_and_algorithm() {
        let provider = StaticKeyProvider::with_key("dek1", test_key());
        assert!(provider.key("dek1", AES_256_GCM_RANDOMIZED).is_ok());
        assert!(matches!(
            provider.key("dek2", AES_256_GCM_RANDOMIZED),
            Err(JfeError::EncryptionBackendError(_))
        ));
        assert!(matches!(
            provider.key("dek1", "AEAD_AES_256_CBC_HMAC_SHA256"),
            Err(JfeError::EncryptionBackendError(_))
        ));
    }
}
