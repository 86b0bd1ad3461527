//! Streaming encryptor
//!
//! Rewrites a JSON document token by token. Values of configured top-level
//! properties are replaced by Base64 strings holding `[marker][ciphertext]`;
//! container values are first re-serialized into a pooled side buffer and
//! encrypted as a whole once they close. The `_ei` metadata property is
//! appended just before the root object closes.

use crate::json::{copy_token, token_text, JsonReader, JsonWriter, Token, TokenKind};
use crate::metrics::EncryptMetrics;
use crate::stream::{drive, ChunkOutcome, ChunkProcessor};
use crate::{CancellationToken, EncryptionOptions, StreamConfig};
use jfe_codec::{
    encrypt_payload, BufferPool, CandidatePaths, Compressor, DataEncryptionKey,
    EncryptionKeyProvider, PooledBuffer,
};
use jfe_format::constants::ENCRYPTED_INFO;
use jfe_format::value::{classify_number, max_serialized_size, serialize_bool};
use jfe_format::{EncryptionProperties, JfeError, Limits, Result, TypeMarker};
use std::borrow::Cow;
use std::io::{Read, Write};
use std::sync::Arc;

/// Initial capacity of the side buffer used for container values.
const CONTAINER_BUFFER_CAPACITY: usize = 4096;

/// Initial capacity of the ciphertext scratch buffer.
const SCRATCH_CAPACITY: usize = 1024;

/// Immutable per-operation encryption settings, shareable across threads.
#[derive(Clone)]
pub struct EncryptionPlan {
    key: Arc<dyn DataEncryptionKey>,
    key_id: String,
    algorithm: String,
    candidates: CandidatePaths,
    compressor: Compressor,
}

impl std::fmt::Debug for EncryptionPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionPlan")
            .field("key_id", &self.key_id)
            .field("algorithm", &self.algorithm)
            .field("candidates", &self.candidates)
            .field("compressor", &self.compressor)
            .finish_non_exhaustive()
    }
}

impl EncryptionPlan {
    /// Validate `options` and resolve the data encryption key.
    pub fn new(options: &EncryptionOptions, provider: &dyn EncryptionKeyProvider) -> Result<Self> {
        options.validate()?;
        let compression = &options.compression;
        let compressor = Compressor::new(
            compression.algorithm,
            compression.level,
            compression.min_compressed_length,
        )?;
        let key = provider.key(&options.key_id, &options.algorithm)?;

        Ok(Self {
            key,
            key_id: options.key_id.clone(),
            algorithm: options.algorithm.clone(),
            candidates: CandidatePaths::build(&options.paths_to_encrypt),
            compressor,
        })
    }

    /// Top-level paths that will be encrypted when present
    pub fn candidates(&self) -> &CandidatePaths {
        &self.candidates
    }

    pub(crate) fn key(&self) -> &dyn DataEncryptionKey {
        &*self.key
    }

    pub(crate) fn compressor(&self) -> &Compressor {
        &self.compressor
    }

    /// Empty metadata for one document.
    pub(crate) fn new_properties(&self) -> EncryptionProperties {
        EncryptionProperties::new(
            self.algorithm.clone(),
            self.key_id.clone(),
            self.compressor.algorithm(),
        )
    }

    /// Compress (when configured) and encrypt one serialized value.
    pub(crate) fn seal(
        &self,
        path: &str,
        marker: TypeMarker,
        plaintext: &[u8],
        properties: &mut EncryptionProperties,
        out: &mut Vec<u8>,
    ) -> Result<bool> {
        let bound = max_serialized_size(marker, plaintext.len());
        out.clear();
        out.reserve(self.key.encrypt_byte_count(bound) + 1);

        let payload =
            self.compressor
                .compress_payload(path, plaintext, &mut properties.compressed_paths)?;
        encrypt_payload(self.key(), marker, &payload, out)?;
        // A repeated top-level key is encrypted each time but listed once
        if !properties.encrypted_paths.iter().any(|p| p == path) {
            properties.encrypted_paths.push(path.to_string());
        }
        Ok(matches!(payload, Cow::Owned(_)))
    }
}

/// Result of encrypting one document.
#[derive(Debug)]
pub(crate) struct EncryptOutcome<W> {
    pub writer: W,
    pub metrics: EncryptMetrics,
    /// Metadata written into the document; `None` for non-object roots
    pub properties: Option<EncryptionProperties>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Root {
    Pending,
    Object,
    Passthrough,
}

struct BufferedContainer<'p> {
    path: &'p str,
    marker: TypeMarker,
    writer: JsonWriter<PooledBuffer>,
}

struct EncryptionPipeline<'p, W: Write> {
    plan: &'p EncryptionPlan,
    pool: &'p BufferPool,
    limits: &'p Limits,
    reader: JsonReader,
    writer: JsonWriter<W>,
    root: Root,
    pending: Option<&'p str>,
    buffered: Option<BufferedContainer<'p>>,
    properties: EncryptionProperties,
    scratch: PooledBuffer,
    metrics: EncryptMetrics,
}

impl<W: Write> ChunkProcessor for EncryptionPipeline<'_, W> {
    fn process_chunk(&mut self, chunk: &[u8], is_final: bool) -> Result<ChunkOutcome> {
        let mut pos = 0;
        while let Some(token) = self.reader.next_token(chunk, &mut pos, is_final)? {
            self.handle(&token, chunk)?;
        }
        self.reader.commit(pos);
        Ok(ChunkOutcome::consumed(pos))
    }
}

impl<'p, W: Write> EncryptionPipeline<'p, W> {
    fn handle(&mut self, token: &Token, chunk: &[u8]) -> Result<()> {
        if let Some(buffered) = self.buffered.as_mut() {
            copy_token(&mut buffered.writer, token, chunk)?;
            if buffered.writer.bytes_written() > self.limits.max_container_bytes as u64 {
                return Err(JfeError::LimitExceeded(format!(
                    "container value at {} exceeds {} bytes",
                    buffered.path, self.limits.max_container_bytes
                )));
            }
            if token.kind.is_end() && token.depth == 1 {
                if let Some(done) = self.buffered.take() {
                    let payload = done.writer.into_inner();
                    self.seal(done.path, done.marker, &payload)?;
                }
            }
            return Ok(());
        }

        match self.root {
            Root::Object => {}
            Root::Passthrough => return copy_token(&mut self.writer, token, chunk),
            Root::Pending => {
                if token.kind == TokenKind::StartObject {
                    self.root = Root::Object;
                    return self.writer.start_object();
                }
                tracing::debug!(kind = ?token.kind, "document root is not an object; passing through");
                self.root = Root::Passthrough;
                return copy_token(&mut self.writer, token, chunk);
            }
        }

        if let Some(path) = self.pending.take() {
            return self.encrypt_value(path, token, chunk);
        }

        match token.kind {
            TokenKind::PropertyName if token.depth == 1 => {
                let name = token_text(token, chunk, self.reader.offset())?;
                if *name == *ENCRYPTED_INFO.as_bytes() {
                    return Err(JfeError::InvalidConfiguration(format!(
                        "document already carries a top-level {} property",
                        ENCRYPTED_INFO
                    )));
                }
                let plan = self.plan;
                self.pending = plan.candidates.matches(&name);
                self.writer.property_name_raw(token.raw(chunk))
            }
            TokenKind::EndObject if token.depth == 0 => self.write_metadata(),
            _ => copy_token(&mut self.writer, token, chunk),
        }
    }

    fn encrypt_value(&mut self, path: &'p str, token: &Token, chunk: &[u8]) -> Result<()> {
        match token.kind {
            TokenKind::String => {
                let text = token_text(token, chunk, self.reader.offset())?;
                self.seal(path, TypeMarker::String, &text)
            }
            TokenKind::Number => {
                let number = classify_number(token.raw(chunk))?;
                self.seal(path, number.marker(), &number.serialize())
            }
            TokenKind::True | TokenKind::False => self.seal(
                path,
                TypeMarker::Boolean,
                &serialize_bool(token.kind == TokenKind::True),
            ),
            // Null values stay null
            TokenKind::Null => self.writer.null(),
            TokenKind::StartObject | TokenKind::StartArray => {
                let marker = if token.kind == TokenKind::StartObject {
                    TypeMarker::Object
                } else {
                    TypeMarker::Array
                };
                let mut writer = JsonWriter::new(self.pool.rent(CONTAINER_BUFFER_CAPACITY));
                copy_token(&mut writer, token, chunk)?;
                self.buffered = Some(BufferedContainer {
                    path,
                    marker,
                    writer,
                });
                Ok(())
            }
            TokenKind::EndObject | TokenKind::EndArray | TokenKind::PropertyName => {
                copy_token(&mut self.writer, token, chunk)
            }
        }
    }

    fn seal(&mut self, path: &str, marker: TypeMarker, plaintext: &[u8]) -> Result<()> {
        let compressed =
            self.plan
                .seal(path, marker, plaintext, &mut self.properties, &mut self.scratch)?;
        self.writer.base64_string(&self.scratch)?;
        self.metrics.properties_encrypted += 1;
        if compressed {
            self.metrics.compressed_paths += 1;
        }
        Ok(())
    }

    fn write_metadata(&mut self) -> Result<()> {
        let metadata = serde_json::to_vec(&self.properties)?;
        self.writer.property_name(ENCRYPTED_INFO)?;
        self.writer.raw_value(&metadata)?;
        self.writer.end_object()
    }

    fn finish(mut self, bytes_read: u64) -> Result<EncryptOutcome<W>> {
        self.writer.flush()?;
        self.metrics.bytes_read = bytes_read;
        self.metrics.bytes_written = self.writer.bytes_written();

        let properties = (self.root == Root::Object).then_some(self.properties);
        Ok(EncryptOutcome {
            writer: self.writer.into_inner(),
            metrics: self.metrics,
            properties,
        })
    }
}

/// Encrypt one document from `input` into `output`.
pub(crate) fn encrypt_document<R: Read, W: Write>(
    input: &mut R,
    output: W,
    plan: &EncryptionPlan,
    config: &StreamConfig,
    pool: &BufferPool,
    cancel: &CancellationToken,
) -> Result<EncryptOutcome<W>> {
    let mut pipeline = EncryptionPipeline {
        plan,
        pool,
        limits: &config.limits,
        reader: JsonReader::new(config.reader.clone()),
        writer: JsonWriter::new(output),
        root: Root::Pending,
        pending: None,
        buffered: None,
        properties: plan.new_properties(),
        scratch: pool.rent(SCRATCH_CAPACITY),
        metrics: EncryptMetrics::default(),
    };

    let bytes_read = drive(input, &mut pipeline, config, pool, cancel)?;
    pipeline.finish(bytes_read)
}
