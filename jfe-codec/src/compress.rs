//! Optional payload compression ahead of encryption

use jfe_format::{CompressionAlgorithm, JfeError, Result};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::io::Read;

use brotli::enc::backward_references::BrotliEncoderMode;
use brotli::{CompressorReader as BrotliEncoder, Decompressor as BrotliDecoder};

/// Internal buffer size for the Brotli reader adapters.
const BROTLI_BUFFER_SIZE: usize = 4096;

/// Brotli window (log2), 4 MiB.
const BROTLI_LGWIN: i32 = 22;

/// Compression settings applied to encrypted payloads.
#[derive(Debug, Clone)]
pub struct Compressor {
    algorithm: CompressionAlgorithm,
    level: u32,
    min_compressed_length: usize,
}

impl Compressor {
    /// New compressor; `level` must lie in the algorithm's range.
    pub fn new(
        algorithm: CompressionAlgorithm,
        level: u32,
        min_compressed_length: usize,
    ) -> Result<Self> {
        if algorithm != CompressionAlgorithm::None && !algorithm.level_range().contains(&level) {
            return Err(JfeError::InvalidConfiguration(format!(
                "compression level {} outside {:?} for {:?}",
                level,
                algorithm.level_range(),
                algorithm
            )));
        }

        Ok(Self {
            algorithm,
            level,
            min_compressed_length,
        })
    }

    /// Configured algorithm
    pub fn algorithm(&self) -> CompressionAlgorithm {
        self.algorithm
    }

    /// Whether any payload can be compressed at all
    pub fn is_enabled(&self) -> bool {
        self.algorithm != CompressionAlgorithm::None
    }

    /// Compress `payload` when it reaches the size threshold.
    ///
    /// On compression the original length is recorded under `path`.
    /// Payloads below the threshold are returned untouched.
    pub fn compress_payload<'a>(
        &self,
        path: &str,
        payload: &'a [u8],
        compressed_paths: &mut BTreeMap<String, i64>,
    ) -> Result<Cow<'a, [u8]>> {
        if !self.is_enabled() || payload.len() < self.min_compressed_length {
            return Ok(Cow::Borrowed(payload));
        }

        let compressed = self.compress(payload)?;
        compressed_paths.insert(path.to_string(), payload.len() as i64);
        Ok(Cow::Owned(compressed))
    }

    /// Compress unconditionally.
    pub fn compress(&self, payload: &[u8]) -> Result<Vec<u8>> {
        match self.algorithm {
            CompressionAlgorithm::None => Ok(payload.to_vec()),
            CompressionAlgorithm::Brotli => {
                let params = brotli::enc::BrotliEncoderParams {
                    quality: self.level as i32,
                    lgwin: BROTLI_LGWIN,
                    mode: BrotliEncoderMode::BROTLI_MODE_GENERIC,
                    size_hint: payload.len(),
                    ..Default::default()
                };

                let mut encoder = BrotliEncoder::with_params(payload, BROTLI_BUFFER_SIZE, &params);
                let mut out = Vec::with_capacity(payload.len() / 2 + 16);
                encoder.read_to_end(&mut out)?;
                Ok(out)
            }
            CompressionAlgorithm::Zstd => Ok(zstd::encode_all(payload, self.level as i32)?),
        }
    }
}

/// Decompress a payload whose original length was recorded at encrypt time.
///
/// `expected_len` comes from document metadata and is untrusted: it must be
/// positive and no larger than `max_len`, and is checked before any
/// allocation. The stream must decode to exactly that many bytes.
pub fn decompress(
    algorithm: CompressionAlgorithm,
    compressed: &[u8],
    expected_len: i64,
    max_len: usize,
) -> Result<Vec<u8>> {
    if expected_len <= 0 || expected_len as u64 > max_len as u64 {
        return Err(JfeError::LimitExceeded(format!(
            "compressed payload claims {} bytes; allowed range is 1..={}",
            expected_len, max_len
        )));
    }
    let expected = expected_len as usize;

    let mut out = Vec::with_capacity(expected);
    let limit = expected as u64 + 1;

    let result = match algorithm {
        CompressionAlgorithm::None => {
            return Err(JfeError::UnsupportedCompressionAlgorithm(algorithm.as_i32()))
        }
        CompressionAlgorithm::Brotli => BrotliDecoder::new(compressed, BROTLI_BUFFER_SIZE)
            .take(limit)
            .read_to_end(&mut out),
        CompressionAlgorithm::Zstd => zstd::stream::read::Decoder::new(compressed)
            .and_then(|decoder| decoder.take(limit).read_to_end(&mut out)),
    };

    result.map_err(|e| {
        JfeError::MalformedPayload(format!("{:?} stream is corrupt: {}", algorithm, e))
    })?;

    if out.len() != expected {
        return Err(JfeError::MalformedPayload(format!(
            "decompressed {} bytes, metadata recorded {}",
            out.len(),
            expected
        )));
    }

    Ok(out)
}
