//! Per-document counters and the sink they are reported to

use std::sync::Mutex;
use std::time::Duration;

/// Metric names reported by the encrypt pipeline.
pub mod encrypt {
    /// Input bytes consumed
    pub const BYTES_READ: &str = "encrypt.bytesRead";
    /// Output bytes produced
    pub const BYTES_WRITTEN: &str = "encrypt.bytesWritten";
    /// Values replaced by ciphertext
    pub const PROPERTIES_ENCRYPTED: &str = "encrypt.propertiesEncrypted";
    /// Payloads compressed before encryption
    pub const COMPRESSED_PATHS: &str = "encrypt.compressedPathsCompressed";
    /// Wall-clock time in milliseconds
    pub const ELAPSED_MS: &str = "encrypt.elapsedMs";
}

/// Metric names reported by the decrypt pipeline.
pub mod decrypt {
    /// Input bytes consumed
    pub const BYTES_READ: &str = "decrypt.bytesRead";
    /// Output bytes produced
    pub const BYTES_WRITTEN: &str = "decrypt.bytesWritten";
    /// Values restored from ciphertext
    pub const PROPERTIES_DECRYPTED: &str = "decrypt.propertiesDecrypted";
    /// Payloads decompressed after decryption
    pub const COMPRESSED_PATHS: &str = "decrypt.compressedPathsDecompressed";
    /// Wall-clock time in milliseconds
    pub const ELAPSED_MS: &str = "decrypt.elapsedMs";
}

/// Receiver for operation counters.
///
/// Called once per counter at the end of a successful document.
pub trait MetricsSink: Send + Sync {
    /// Record `value` under `name`.
    fn record(&self, name: &'static str, value: i64);
}

/// Sink that keeps every recorded value in memory.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    records: Mutex<Vec<(&'static str, i64)>>,
}

impl InMemoryMetrics {
    /// Empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// All records in arrival order.
    pub fn records(&self) -> Vec<(&'static str, i64)> {
        self.records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Sum of all values recorded under `name`.
    pub fn total(&self, name: &str) -> i64 {
        self.records()
            .iter()
            .filter(|(n, _)| *n == name)
            .map(|(_, v)| v)
            .sum()
    }
}

impl MetricsSink for InMemoryMetrics {
    fn record(&self, name: &'static str, value: i64) {
        self.records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push((name, value));
    }
}

/// Counters gathered while encrypting one document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncryptMetrics {
    /// Input bytes consumed
    pub bytes_read: u64,
    /// Output bytes produced
    pub bytes_written: u64,
    /// Values replaced by ciphertext
    pub properties_encrypted: u64,
    /// Payloads compressed before encryption
    pub compressed_paths: u64,
    /// Wall-clock time
    pub elapsed: Duration,
}

impl EncryptMetrics {
    pub(crate) fn report(&self, sink: &dyn MetricsSink) {
        sink.record(encrypt::BYTES_READ, saturating_i64(self.bytes_read));
        sink.record(encrypt::BYTES_WRITTEN, saturating_i64(self.bytes_written));
        sink.record(
            encrypt::PROPERTIES_ENCRYPTED,
            saturating_i64(self.properties_encrypted),
        );
        sink.record(encrypt::COMPRESSED_PATHS, saturating_i64(self.compressed_paths));
        sink.record(encrypt::ELAPSED_MS, millis(self.elapsed));
    }
}

/// Counters gathered while decrypting one document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecryptMetrics {
    /// Input bytes consumed by the rewrite pass
    pub bytes_read: u64,
    /// Output bytes produced
    pub bytes_written: u64,
    /// Values restored from ciphertext
    pub properties_decrypted: u64,
    /// Payloads decompressed after decryption
    pub compressed_paths: u64,
    /// Wall-clock time, metadata pre-scan included
    pub elapsed: Duration,
}

impl DecryptMetrics {
    pub(crate) fn report(&self, sink: &dyn MetricsSink) {
        sink.record(decrypt::BYTES_READ, saturating_i64(self.bytes_read));
        sink.record(decrypt::BYTES_WRITTEN, saturating_i64(self.bytes_written));
        sink.record(
            decrypt::PROPERTIES_DECRYPTED,
            saturating_i64(self.properties_decrypted),
        );
        sink.record(decrypt::COMPRESSED_PATHS, saturating_i64(self.compressed_paths));
        sink.record(decrypt::ELAPSED_MS, millis(self.elapsed));
    }
}

fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn millis(elapsed: Duration) -> i64 {
    i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX)
}
