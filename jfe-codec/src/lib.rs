//! JFE Codec - Transforms applied to individual property values
//!
//! This crate turns one serialized JSON value into an encrypted payload and
//! back:
//!
//! - Top-level path matching ([`CandidatePaths`])
//! - Marker-prefixed payload encryption over a pluggable [`DataEncryptionKey`]
//! - A reference AES-256-GCM key and in-memory key provider
//! - Brotli/Zstandard payload compression with bounded decompression
//! - Pooled scratch buffers

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod aead;
pub mod cipher;
pub mod compress;
pub mod paths;
pub mod pool;

// Re-export commonly used types
pub use aead::{Aes256GcmKey, StaticKeyProvider, AES_256_GCM_RANDOMIZED};
pub use cipher::{decrypt_payload, encrypt_payload, DataEncryptionKey, EncryptionKeyProvider};
pub use compress::{decompress, Compressor};
pub use jfe_format::{CompressionAlgorithm, JfeError, Result, TypeMarker};
pub use paths::CandidatePaths;
pub use pool::{BufferPool, PooledBuffer};
