//! Metadata pre-scan
//!
//! A read-only token pass that locates the top-level `_ei` property, copies
//! its value aside and stops. Nothing after the metadata is read.

use crate::json::{copy_token, token_text, JsonReader, JsonWriter, Token, TokenKind};
use crate::stream::{drive, ChunkOutcome, ChunkProcessor};
use crate::{CancellationToken, StreamConfig};
use jfe_codec::{BufferPool, PooledBuffer};
use jfe_format::constants::ENCRYPTED_INFO;
use jfe_format::{EncryptionProperties, JfeError, Result};
use std::io::{Read, Seek, SeekFrom};

const CAPTURE_CAPACITY: usize = 512;

enum Scan {
    Searching,
    /// `_ei` name seen; the next token is its value
    AtValue,
    Capturing(JsonWriter<PooledBuffer>),
    Found(PooledBuffer),
    Absent,
}

struct MetadataScan<'a> {
    pool: &'a BufferPool,
    reader: JsonReader,
    state: Scan,
}

impl ChunkProcessor for MetadataScan<'_> {
    fn process_chunk(&mut self, chunk: &[u8], is_final: bool) -> Result<ChunkOutcome> {
        let mut pos = 0;
        while let Some(token) = self.reader.next_token(chunk, &mut pos, is_final)? {
            self.handle(&token, chunk)?;
            if matches!(self.state, Scan::Found(_) | Scan::Absent) {
                return Ok(ChunkOutcome {
                    consumed: pos,
                    stop: true,
                });
            }
        }
        self.reader.commit(pos);
        Ok(ChunkOutcome::consumed(pos))
    }
}

impl MetadataScan<'_> {
    fn handle(&mut self, token: &Token, chunk: &[u8]) -> Result<()> {
        match self.state {
            Scan::Searching => {
                if token.depth == 0 && token.kind != TokenKind::StartObject {
                    self.state = Scan::Absent;
                } else if token.kind == TokenKind::PropertyName && token.depth == 1 {
                    let name = token_text(token, chunk, self.reader.offset())?;
                    if *name == *ENCRYPTED_INFO.as_bytes() {
                        self.state = Scan::AtValue;
                    }
                }
            }
            Scan::AtValue => {
                let mut writer = JsonWriter::new(self.pool.rent(CAPTURE_CAPACITY));
                copy_token(&mut writer, token, chunk)?;
                self.state = if token.kind.is_start() {
                    Scan::Capturing(writer)
                } else {
                    Scan::Found(writer.into_inner())
                };
            }
            Scan::Capturing(ref mut writer) => {
                copy_token(writer, token, chunk)?;
                if token.kind.is_end() && token.depth == 1 {
                    if let Scan::Capturing(writer) = std::mem::replace(&mut self.state, Scan::Absent)
                    {
                        self.state = Scan::Found(writer.into_inner());
                    }
                }
            }
            Scan::Found(_) | Scan::Absent => {}
        }
        Ok(())
    }
}

/// Read the encryption metadata of the document in `input`.
///
/// Returns `Ok(None)` when the root is not an object or carries no `_ei`
/// property. The stream is left somewhere past the metadata.
pub fn read_encryption_properties<R: Read>(
    input: &mut R,
    config: &StreamConfig,
    pool: &BufferPool,
    cancel: &CancellationToken,
) -> Result<Option<EncryptionProperties>> {
    let mut scan = MetadataScan {
        pool,
        reader: JsonReader::new(config.reader.clone()),
        state: Scan::Searching,
    };
    drive(input, &mut scan, config, pool, cancel)?;

    match scan.state {
        Scan::Found(raw) => {
            let properties = serde_json::from_slice(&raw).map_err(|e| {
                JfeError::malformed_payload(format!("invalid {} metadata: {}", ENCRYPTED_INFO, e))
            })?;
            Ok(Some(properties))
        }
        _ => Ok(None),
    }
}

/// [`read_encryption_properties`], then rewind `input` to where it started.
pub fn read_encryption_properties_seekable<R: Read + Seek>(
    input: &mut R,
    config: &StreamConfig,
    pool: &BufferPool,
    cancel: &CancellationToken,
) -> Result<Option<EncryptionProperties>> {
    let start = input.stream_position()?;
    let result = read_encryption_properties(input, config, pool, cancel);
    input.seek(SeekFrom::Start(start))?;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn scan(input: &str) -> Result<Option<EncryptionProperties>> {
        read_encryption_properties(
            &mut input.as_bytes(),
            &StreamConfig::default(),
            &BufferPool::default(),
            &CancellationToken::new(),
        )
    }

    #[test]
    fn finds_metadata_anywhere_at_top_level() {
        let input = r#"{"a":{"_ei":1},"_ei":{"_ef":4,"_ea":"alg","_en":"k","_ed":null,"_ep":["/a"],"_ce":1,"_cp":{"/a":120}},"z":2}"#;
        let properties = scan(input).unwrap().unwrap();
        assert_eq!(properties.format_version, 4);
        assert_eq!(properties.key_id, "k");
        assert_eq!(properties.encrypted_paths, vec!["/a"]);
        assert_eq!(properties.compressed_len("/a"), Some(120));
    }

    #[test]
    fn absent_metadata() {
        assert_eq!(scan(r#"{"a":1}"#).unwrap(), None);
        assert_eq!(scan(r#"[{"_ei":{}}]"#).unwrap(), None);
        assert_eq!(scan("7").unwrap(), None);
    }

    #[test]
    fn malformed_metadata() {
        assert!(matches!(
            scan(r#"{"_ei":"nope"}"#),
            Err(JfeError::MalformedPayload(_))
        ));
        assert!(matches!(
            scan(r#"{"_ei":{"_ef":"three"}}"#),
            Err(JfeError::MalformedPayload(_))
        ));
    }

    #[test]
    fn stops_after_metadata() {
        // Garbage after the metadata is never looked at.
        let input = r#"{"_ei":{"_ef":3,"_ea":"a","_en":"k","_ep":[],"_ce":0}, !!!"#;
        assert!(scan(input).unwrap().is_some());
    }

    #[test]
    fn seekable_variant_rewinds() {
        let input = br#"{"x":1,"_ei":{"_ef":3,"_ea":"a","_en":"k","_ep":[],"_ce":0}}"#.to_vec();
        let mut cursor = Cursor::new(input);
        cursor.set_position(0);
        let found = read_encryption_properties_seekable(
            &mut cursor,
            &StreamConfig::default(),
            &BufferPool::default(),
            &CancellationToken::new(),
        )
        .unwrap();
        assert!(found.is_some());
        assert_eq!(cursor.position(), 0);
    }
}
