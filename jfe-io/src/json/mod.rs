//! JSON tokenizer and writer used by the streaming pipelines

pub mod reader;
pub mod writer;

pub use reader::{unescape_into, JsonReader, ReaderOptions, Token, TokenKind};
pub use writer::JsonWriter;

use jfe_format::{JfeError, Result};
use std::borrow::Cow;
use std::io::Write;

/// Copy a token to `writer` with its original spelling.
pub(crate) fn copy_token<W: Write>(
    writer: &mut JsonWriter<W>,
    token: &Token,
    chunk: &[u8],
) -> Result<()> {
    match token.kind {
        TokenKind::StartObject => writer.start_object(),
        TokenKind::EndObject => writer.end_object(),
        TokenKind::StartArray => writer.start_array(),
        TokenKind::EndArray => writer.end_array(),
        TokenKind::PropertyName => writer.property_name_raw(token.raw(chunk)),
        TokenKind::String
        | TokenKind::Number
        | TokenKind::True
        | TokenKind::False
        | TokenKind::Null => writer.raw_value(token.raw(chunk)),
    }
}

/// Unescaped bytes of a string or property name token.
///
/// Borrows from the chunk unless the token contains escapes.
pub(crate) fn token_text<'c>(
    token: &Token,
    chunk: &'c [u8],
    chunk_offset: u64,
) -> Result<Cow<'c, [u8]>> {
    let content = token.content(chunk);
    if !token.has_escapes {
        return Ok(Cow::Borrowed(content));
    }

    let mut out = Vec::with_capacity(content.len());
    unescape_into(content, &mut out)
        .map_err(|reason| JfeError::malformed_json(chunk_offset + token.start as u64, reason))?;
    Ok(Cow::Owned(out))
}
