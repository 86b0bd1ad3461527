//! Streaming decryptor
//!
//! Restores the values listed in a document's encryption metadata. The
//! metadata itself is never written to the output: the top-level `_ei`
//! property is skipped whole, including when its value spans several reads.

use crate::json::{copy_token, token_text, JsonReader, JsonWriter, Token, TokenKind};
use crate::metrics::DecryptMetrics;
use crate::stream::{drive, ChunkOutcome, ChunkProcessor};
use crate::{CancellationToken, StreamConfig};
use base64::prelude::*;
use jfe_codec::{
    decompress, decrypt_payload, BufferPool, CandidatePaths, DataEncryptionKey,
    EncryptionKeyProvider, PooledBuffer,
};
use jfe_format::constants::ENCRYPTED_INFO;
use jfe_format::value::{deserialize_bool, deserialize_f64, deserialize_i64, deserialize_str};
use jfe_format::{
    CompressionAlgorithm, EncryptionProperties, JfeError, Limits, Result, TypeMarker,
};
use serde::Serialize;
use std::io::{Read, Write};
use std::sync::Arc;

const SCRATCH_CAPACITY: usize = 1024;

/// What was decrypted in one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecryptionContext {
    /// Data encryption key named by the metadata
    pub key_id: String,
    /// Paths restored, in document order
    pub decrypted_paths: Vec<String>,
}

/// Validated metadata bound to its resolved key.
#[derive(Clone)]
pub struct DecryptionPlan {
    key: Arc<dyn DataEncryptionKey>,
    properties: EncryptionProperties,
    candidates: CandidatePaths,
    compression: CompressionAlgorithm,
}

impl std::fmt::Debug for DecryptionPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecryptionPlan")
            .field("properties", &self.properties)
            .field("candidates", &self.candidates)
            .finish_non_exhaustive()
    }
}

impl DecryptionPlan {
    /// Validate `properties` and resolve the key they name.
    pub fn new(
        properties: EncryptionProperties,
        provider: &dyn EncryptionKeyProvider,
    ) -> Result<Self> {
        properties.validate()?;
        let compression = if properties.compressed_paths.is_empty() {
            CompressionAlgorithm::None
        } else {
            properties.compression()?
        };
        let key = provider.key(&properties.key_id, &properties.algorithm)?;
        let candidates = CandidatePaths::build(&properties.encrypted_paths);

        Ok(Self {
            key,
            properties,
            candidates,
            compression,
        })
    }

    /// The metadata this plan was built from
    pub fn properties(&self) -> &EncryptionProperties {
        &self.properties
    }

    pub(crate) fn candidates(&self) -> &CandidatePaths {
        &self.candidates
    }

    /// Decrypt one payload and decompress it when its path was compressed.
    ///
    /// Returns the raw marker byte; the plaintext is left in `plain`.
    pub(crate) fn open(
        &self,
        path: &str,
        payload: &[u8],
        plain: &mut Vec<u8>,
        limits: &Limits,
    ) -> Result<(u8, bool)> {
        let marker = decrypt_payload(&*self.key, payload, plain)?;
        match self.properties.compressed_len(path) {
            Some(len) => {
                let restored =
                    decompress(self.compression, &plain[..], len, limits.max_decompressed_bytes)?;
                *plain = restored;
                Ok((marker, true))
            }
            None => Ok((marker, false)),
        }
    }

    pub(crate) fn context(&self, decrypted_paths: Vec<String>) -> Option<DecryptionContext> {
        if decrypted_paths.is_empty() && self.properties.encrypted_paths.is_empty() {
            return None;
        }
        Some(DecryptionContext {
            key_id: self.properties.key_id.clone(),
            decrypted_paths,
        })
    }
}

/// Decode a standard padded Base64 payload into `out`.
pub(crate) fn decode_base64(path: &str, text: &[u8], out: &mut Vec<u8>) -> Result<()> {
    out.clear();
    out.resize(base64::decoded_len_estimate(text.len()), 0);
    let written = BASE64_STANDARD.decode_slice(text, &mut out[..]).map_err(|e| {
        JfeError::malformed_payload(format!("invalid base64 payload at {}: {}", path, e))
    })?;
    out.truncate(written);
    Ok(())
}

/// Emit a decrypted value according to its marker.
pub(crate) fn write_plaintext<W: Write>(
    writer: &mut JsonWriter<W>,
    path: &str,
    marker: u8,
    plaintext: &[u8],
    limits: &Limits,
) -> Result<()> {
    match TypeMarker::from_u8(marker) {
        Some(TypeMarker::String) => writer.string(deserialize_str(plaintext)?),
        Some(TypeMarker::Long) => writer.i64(deserialize_i64(plaintext)?),
        Some(TypeMarker::Double) => writer.f64(deserialize_f64(plaintext)?),
        Some(TypeMarker::Boolean) => writer.bool(deserialize_bool(plaintext)?),
        Some(TypeMarker::Null) => writer.null(),
        Some(TypeMarker::Array) | Some(TypeMarker::Object) => {
            if plaintext.len() > limits.max_container_bytes {
                return Err(JfeError::LimitExceeded(format!(
                    "decrypted container at {} is {} bytes, limit {}",
                    path,
                    plaintext.len(),
                    limits.max_container_bytes
                )));
            }
            writer.raw_value(plaintext)
        }
        None => {
            tracing::warn!(path, marker, "unknown type marker; writing decrypted bytes verbatim");
            writer.raw_value(plaintext)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Root {
    Pending,
    Object,
    Passthrough,
}

/// Progress through the `_ei` property, which is dropped from the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Skip {
    Off,
    /// Name seen, value not yet
    Value,
    /// Inside the value's container
    Container,
}

struct DecryptionPipeline<'p, W: Write> {
    plan: &'p DecryptionPlan,
    limits: &'p Limits,
    reader: JsonReader,
    writer: JsonWriter<W>,
    root: Root,
    skip: Skip,
    pending: Option<&'p str>,
    decoded: PooledBuffer,
    plain: PooledBuffer,
    decrypted_paths: Vec<String>,
    metrics: DecryptMetrics,
}

impl<W: Write> ChunkProcessor for DecryptionPipeline<'_, W> {
    fn process_chunk(&mut self, chunk: &[u8], is_final: bool) -> Result<ChunkOutcome> {
        let mut pos = 0;
        while let Some(token) = self.reader.next_token(chunk, &mut pos, is_final)? {
            self.handle(&token, chunk)?;
        }
        self.reader.commit(pos);
        Ok(ChunkOutcome::consumed(pos))
    }
}

impl<'p, W: Write> DecryptionPipeline<'p, W> {
    fn handle(&mut self, token: &Token, chunk: &[u8]) -> Result<()> {
        match self.skip {
            Skip::Off => {}
            Skip::Value => {
                self.skip = if token.kind.is_start() {
                    Skip::Container
                } else {
                    Skip::Off
                };
                return Ok(());
            }
            Skip::Container => {
                if token.kind.is_end() && token.depth == 1 {
                    self.skip = Skip::Off;
                }
                return Ok(());
            }
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
            if token.kind == TokenKind::String {
                return self.decrypt_value(path, token, chunk);
            }
            return copy_token(&mut self.writer, token, chunk);
        }

        if token.kind == TokenKind::PropertyName && token.depth == 1 {
            let name = token_text(token, chunk, self.reader.offset())?;
            if *name == *ENCRYPTED_INFO.as_bytes() {
                self.skip = Skip::Value;
                return Ok(());
            }
            let plan = self.plan;
            self.pending = plan.candidates.matches(&name);
        }

        copy_token(&mut self.writer, token, chunk)
    }

    fn decrypt_value(&mut self, path: &'p str, token: &Token, chunk: &[u8]) -> Result<()> {
        let text = token_text(token, chunk, self.reader.offset())?;
        decode_base64(path, &text, &mut self.decoded)?;

        let (marker, decompressed) =
            self.plan
                .open(path, &self.decoded, &mut self.plain, self.limits)?;
        write_plaintext(&mut self.writer, path, marker, &self.plain, self.limits)?;

        if !self.decrypted_paths.iter().any(|p| p == path) {
            self.decrypted_paths.push(path.to_string());
        }
        self.metrics.properties_decrypted += 1;
        if decompressed {
            self.metrics.compressed_paths += 1;
        }
        Ok(())
    }
}

/// Result of decrypting one document.
#[derive(Debug)]
pub(crate) struct DecryptOutcome<W> {
    pub writer: W,
    pub metrics: DecryptMetrics,
    pub context: Option<DecryptionContext>,
}

/// Decrypt one document from `input` into `output` using `plan`.
pub(crate) fn decrypt_document<R: Read, W: Write>(
    input: &mut R,
    output: W,
    plan: &DecryptionPlan,
    config: &StreamConfig,
    pool: &BufferPool,
    cancel: &CancellationToken,
) -> Result<DecryptOutcome<W>> {
    let mut pipeline = DecryptionPipeline {
        plan,
        limits: &config.limits,
        reader: JsonReader::new(config.reader.clone()),
        writer: JsonWriter::new(output),
        root: Root::Pending,
        skip: Skip::Off,
        pending: None,
        decoded: pool.rent(SCRATCH_CAPACITY),
        plain: pool.rent(SCRATCH_CAPACITY),
        decrypted_paths: Vec::new(),
        metrics: DecryptMetrics::default(),
    };

    let bytes_read = drive(input, &mut pipeline, config, pool, cancel)?;

    let DecryptionPipeline {
        mut writer,
        decrypted_paths,
        mut metrics,
        ..
    } = pipeline;
    writer.flush()?;
    metrics.bytes_read = bytes_read;
    metrics.bytes_written = writer.bytes_written();

    for path in &plan.properties.encrypted_paths {
        if !decrypted_paths.contains(path) {
            tracing::debug!(path = %path, "listed path has no encrypted value in the document");
        }
    }

    Ok(DecryptOutcome {
        writer: writer.into_inner(),
        metrics,
        context: plan.context(decrypted_paths),
    })
}
