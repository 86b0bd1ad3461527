//! JFE I/O - Streaming field encryption and high-level APIs
//!
//! This crate provides the document-level layer of JFE:
//!
//! - A resumable JSON tokenizer and a minified writer
//! - Streaming encrypt and decrypt pipelines with bounded buffers
//! - A metadata pre-scan for seekable inputs
//! - A `serde_json::Value` variant of both pipelines
//! - Batch processing with rayon
//!
//! # Example
//!
//! ```
//! use jfe_io::{decrypt_bytes, encrypt_bytes, EncryptionOptions};
//! use jfe_codec::{Aes256GcmKey, StaticKeyProvider, AES_256_GCM_RANDOMIZED};
//!
//! let provider = StaticKeyProvider::with_key("key-1", Aes256GcmKey::generate());
//! let options = EncryptionOptions {
//!     paths_to_encrypt: vec!["/ssn".into()],
//!     ..EncryptionOptions::new("key-1", AES_256_GCM_RANDOMIZED)
//! };
//!
//! let input = br#"{"id":"1","ssn":"123-45-6789"}"#;
//! let encrypted = encrypt_bytes(input, &provider, &options).unwrap();
//! let (decrypted, _) = decrypt_bytes(&encrypted, &provider).unwrap();
//! assert_eq!(decrypted, input);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod batch;
pub mod decryptor;
pub mod encryptor;
pub mod json;
pub mod metrics;
pub mod prescan;
pub mod tree;

mod stream;

// Re-export commonly used types
pub use batch::{decrypt_batch, encrypt_batch, BatchOptions};
pub use decryptor::{DecryptionContext, DecryptionPlan};
pub use encryptor::EncryptionPlan;
pub use jfe_codec::{BufferPool, EncryptionKeyProvider};
pub use jfe_format::{
    CompressionAlgorithm, EncryptionProperties, JfeError, Limits, Result, TypeMarker,
};
pub use json::ReaderOptions;
pub use metrics::{DecryptMetrics, EncryptMetrics, InMemoryMetrics, MetricsSink};
pub use prescan::{read_encryption_properties, read_encryption_properties_seekable};

use jfe_codec::Compressor;
use jfe_format::constants::{ENCRYPTED_INFO, ID_PATH};
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Document model used by the high-level API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JsonProcessor {
    /// Token-level streaming with bounded memory
    #[default]
    Stream,
    /// Parse into `serde_json::Value`, mutate, serialize
    Tree,
}

/// Payload compression applied before encryption
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressionOptions {
    /// Algorithm; `None` disables compression
    pub algorithm: CompressionAlgorithm,
    /// Algorithm-specific level (Brotli quality 0-11, Zstandard 1-22)
    pub level: u32,
    /// Payloads shorter than this are never compressed
    pub min_compressed_length: usize,
}

impl Default for CompressionOptions {
    fn default() -> Self {
        Self {
            algorithm: CompressionAlgorithm::None,
            level: 4,
            min_compressed_length: 128,
        }
    }
}

/// What to encrypt and with which key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionOptions {
    /// Data encryption key identifier
    pub key_id: String,
    /// Encryption algorithm identifier
    pub algorithm: String,
    /// Top-level paths (`"/name"`) whose values are encrypted
    pub paths_to_encrypt: Vec<String>,
    /// Payload compression
    pub compression: CompressionOptions,
    /// Document model
    pub processor: JsonProcessor,
}

impl EncryptionOptions {
    /// Options for `key_id` and `algorithm` with no paths selected.
    pub fn new(key_id: impl Into<String>, algorithm: impl Into<String>) -> Self {
        Self {
            key_id: key_id.into(),
            algorithm: algorithm.into(),
            paths_to_encrypt: Vec::new(),
            compression: CompressionOptions::default(),
            processor: JsonProcessor::default(),
        }
    }

    /// Reject unusable settings before any input is read.
    pub fn validate(&self) -> Result<()> {
        if self.key_id.trim().is_empty() {
            return Err(JfeError::InvalidConfiguration(
                "key id must not be empty".to_string(),
            ));
        }
        if self.algorithm.trim().is_empty() {
            return Err(JfeError::InvalidConfiguration(
                "encryption algorithm must not be empty".to_string(),
            ));
        }

        for path in &self.paths_to_encrypt {
            let name = path.strip_prefix('/').unwrap_or(path);
            if name == &ID_PATH[1..] {
                return Err(JfeError::InvalidConfiguration(format!(
                    "{} cannot be encrypted",
                    ID_PATH
                )));
            }
            if name == ENCRYPTED_INFO {
                return Err(JfeError::InvalidConfiguration(format!(
                    "/{} is reserved for encryption metadata",
                    ENCRYPTED_INFO
                )));
            }
        }

        let compression = &self.compression;
        Compressor::new(
            compression.algorithm,
            compression.level,
            compression.min_compressed_length,
        )?;
        Ok(())
    }
}

/// Buffering and parsing configuration
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Size of the first read buffer (default: 8192)
    pub initial_buffer_size: usize,
    /// Resource limits
    pub limits: Limits,
    /// Tokenizer options
    pub reader: ReaderOptions,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            initial_buffer_size: 8192,
            limits: Limits::default(),
            reader: ReaderOptions::default(),
        }
    }
}

impl StreamConfig {
    /// Validate buffer sizes and limits.
    pub fn validate(&self) -> Result<()> {
        self.limits.validate()?;
        if self.initial_buffer_size == 0 {
            return Err(JfeError::InvalidConfiguration(
                "initial_buffer_size must be greater than zero".to_string(),
            ));
        }
        if self.reader.max_depth == 0 {
            return Err(JfeError::InvalidConfiguration(
                "max_depth must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// How a document's encryption metadata is obtained
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DecryptStrategy {
    /// Read `_ei` in a first pass, rewind, then rewrite
    #[default]
    Prescan,
    /// Metadata supplied by the caller; `None` means the document is not
    /// encrypted and is copied unchanged
    SinglePass(Option<EncryptionProperties>),
    /// Parse the whole document into `serde_json::Value`
    Tree,
}

/// Cooperative cancellation flag, checked between reads.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// A token that has not been cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; every clone observes it.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Services shared by the operations of one caller
#[derive(Clone, Copy)]
pub struct OperationContext<'a> {
    /// Scratch and read buffers
    pub pool: &'a BufferPool,
    /// Optional cancellation
    pub cancel: Option<&'a CancellationToken>,
    /// Optional counter sink
    pub metrics: Option<&'a dyn MetricsSink>,
}

impl<'a> OperationContext<'a> {
    /// Context with no cancellation and no metrics.
    pub fn new(pool: &'a BufferPool) -> Self {
        Self {
            pool,
            cancel: None,
            metrics: None,
        }
    }

    /// Attach a cancellation token.
    pub fn with_cancel(mut self, cancel: &'a CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Attach a metrics sink.
    pub fn with_metrics(mut self, metrics: &'a dyn MetricsSink) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

/// Result of encrypting one document
#[derive(Debug)]
pub struct EncryptSummary<W> {
    /// The output sink, flushed
    pub output: W,
    /// Counters for this document
    pub metrics: EncryptMetrics,
    /// Metadata attached to the document; `None` for non-object roots
    pub properties: Option<EncryptionProperties>,
}

/// Result of decrypting one document
#[derive(Debug)]
pub struct DecryptSummary<W> {
    /// The output sink, flushed
    pub output: W,
    /// Counters for this document
    pub metrics: DecryptMetrics,
    /// What was decrypted; `None` when the document carried no metadata
    pub context: Option<DecryptionContext>,
}

/// Encrypt the document read from `input` into `output`.
pub fn encrypt_stream<R: Read, W: Write>(
    input: &mut R,
    output: W,
    provider: &dyn EncryptionKeyProvider,
    options: &EncryptionOptions,
    config: &StreamConfig,
    ctx: &OperationContext<'_>,
) -> Result<EncryptSummary<W>> {
    let plan = EncryptionPlan::new(options, provider)?;
    encrypt_with_plan(input, output, &plan, options.processor, config, ctx)
}

/// [`encrypt_stream`], then rewind `output` to its start.
pub fn encrypt_stream_seekable<R: Read, W: Write + Seek>(
    input: &mut R,
    output: W,
    provider: &dyn EncryptionKeyProvider,
    options: &EncryptionOptions,
    config: &StreamConfig,
    ctx: &OperationContext<'_>,
) -> Result<EncryptSummary<W>> {
    let mut summary = encrypt_stream(input, output, provider, options, config, ctx)?;
    summary.output.seek(SeekFrom::Start(0))?;
    Ok(summary)
}

pub(crate) fn encrypt_with_plan<R: Read, W: Write>(
    input: &mut R,
    output: W,
    plan: &EncryptionPlan,
    processor: JsonProcessor,
    config: &StreamConfig,
    ctx: &OperationContext<'_>,
) -> Result<EncryptSummary<W>> {
    config.validate()?;
    let started = Instant::now();
    let never = CancellationToken::new();
    let cancel = ctx.cancel.unwrap_or(&never);

    let outcome = match processor {
        JsonProcessor::Stream => {
            encryptor::encrypt_document(input, output, plan, config, ctx.pool, cancel)?
        }
        JsonProcessor::Tree => tree::encrypt_reader(input, output, plan, config, cancel)?,
    };

    let mut metrics = outcome.metrics;
    metrics.elapsed = started.elapsed();
    if let Some(sink) = ctx.metrics {
        metrics.report(sink);
    }
    tracing::debug!(
        bytes_read = metrics.bytes_read,
        bytes_written = metrics.bytes_written,
        properties = metrics.properties_encrypted,
        compressed = metrics.compressed_paths,
        elapsed_ms = metrics.elapsed.as_millis() as u64,
        "encrypted document"
    );

    Ok(EncryptSummary {
        output: outcome.writer,
        metrics,
        properties: outcome.properties,
    })
}

/// Decrypt the document read from a seekable `input` into `output`.
pub fn decrypt_stream<R: Read + Seek, W: Write>(
    input: &mut R,
    output: W,
    provider: &dyn EncryptionKeyProvider,
    strategy: &DecryptStrategy,
    config: &StreamConfig,
    ctx: &OperationContext<'_>,
) -> Result<DecryptSummary<W>> {
    config.validate()?;
    let started = Instant::now();
    let never = CancellationToken::new();
    let cancel = ctx.cancel.unwrap_or(&never);

    match strategy {
        DecryptStrategy::Prescan => {
            let properties = read_encryption_properties_seekable(input, config, ctx.pool, cancel)?;
            decrypt_single_pass(input, output, provider, properties, config, ctx, started)
        }
        DecryptStrategy::SinglePass(properties) => decrypt_single_pass(
            input,
            output,
            provider,
            properties.clone(),
            config,
            ctx,
            started,
        ),
        DecryptStrategy::Tree => {
            let outcome = tree::decrypt_reader(input, output, provider, config, cancel)?;
            Ok(finish_decrypt(outcome, ctx, started))
        }
    }
}

/// Decrypt a non-seekable `input` whose metadata the caller already holds.
///
/// The document's own `_ei` property is skipped, not read. With `None` the
/// input is copied unchanged.
pub fn decrypt_stream_single_pass<R: Read, W: Write>(
    input: &mut R,
    output: W,
    provider: &dyn EncryptionKeyProvider,
    properties: Option<EncryptionProperties>,
    config: &StreamConfig,
    ctx: &OperationContext<'_>,
) -> Result<DecryptSummary<W>> {
    config.validate()?;
    decrypt_single_pass(input, output, provider, properties, config, ctx, Instant::now())
}

/// [`decrypt_stream`], then rewind `output` to its start.
pub fn decrypt_stream_seekable<R: Read + Seek, W: Write + Seek>(
    input: &mut R,
    output: W,
    provider: &dyn EncryptionKeyProvider,
    strategy: &DecryptStrategy,
    config: &StreamConfig,
    ctx: &OperationContext<'_>,
) -> Result<DecryptSummary<W>> {
    let mut summary = decrypt_stream(input, output, provider, strategy, config, ctx)?;
    summary.output.seek(SeekFrom::Start(0))?;
    Ok(summary)
}

fn decrypt_single_pass<R: Read, W: Write>(
    input: &mut R,
    mut output: W,
    provider: &dyn EncryptionKeyProvider,
    properties: Option<EncryptionProperties>,
    config: &StreamConfig,
    ctx: &OperationContext<'_>,
    started: Instant,
) -> Result<DecryptSummary<W>> {
    let never = CancellationToken::new();
    let cancel = ctx.cancel.unwrap_or(&never);

    let Some(properties) = properties else {
        if cancel.is_cancelled() {
            return Err(JfeError::Cancelled);
        }
        let copied = std::io::copy(input, &mut output)?;
        output.flush()?;
        let outcome = decryptor::DecryptOutcome {
            writer: output,
            metrics: DecryptMetrics {
                bytes_read: copied,
                bytes_written: copied,
                ..DecryptMetrics::default()
            },
            context: None,
        };
        return Ok(finish_decrypt(outcome, ctx, started));
    };

    let plan = DecryptionPlan::new(properties, provider)?;
    let outcome = decryptor::decrypt_document(input, output, &plan, config, ctx.pool, cancel)?;
    Ok(finish_decrypt(outcome, ctx, started))
}

fn finish_decrypt<W>(
    outcome: decryptor::DecryptOutcome<W>,
    ctx: &OperationContext<'_>,
    started: Instant,
) -> DecryptSummary<W> {
    let mut metrics = outcome.metrics;
    metrics.elapsed = started.elapsed();
    if let Some(sink) = ctx.metrics {
        metrics.report(sink);
    }
    tracing::debug!(
        bytes_read = metrics.bytes_read,
        bytes_written = metrics.bytes_written,
        properties = metrics.properties_decrypted,
        decompressed = metrics.compressed_paths,
        elapsed_ms = metrics.elapsed.as_millis() as u64,
        "decrypted document"
    );

    DecryptSummary {
        output: outcome.writer,
        metrics,
        context: outcome.context,
    }
}

/// Encrypt an in-memory document with default configuration.
pub fn encrypt_bytes(
    input: &[u8],
    provider: &dyn EncryptionKeyProvider,
    options: &EncryptionOptions,
) -> Result<Vec<u8>> {
    let pool = BufferPool::default();
    let summary = encrypt_stream(
        &mut Cursor::new(input),
        Vec::with_capacity(input.len() * 2),
        provider,
        options,
        &StreamConfig::default(),
        &OperationContext::new(&pool),
    )?;
    Ok(summary.output)
}

/// Decrypt an in-memory document with default configuration.
pub fn decrypt_bytes(
    input: &[u8],
    provider: &dyn EncryptionKeyProvider,
) -> Result<(Vec<u8>, Option<DecryptionContext>)> {
    let pool = BufferPool::default();
    let summary = decrypt_stream(
        &mut Cursor::new(input),
        Vec::with_capacity(input.len()),
        provider,
        &DecryptStrategy::Prescan,
        &StreamConfig::default(),
        &OperationContext::new(&pool),
    )?;
    Ok((summary.output, summary.context))
}
