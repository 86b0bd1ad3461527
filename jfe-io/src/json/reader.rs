//! Resumable pull tokenizer over byte chunks
//!
//! The reader never owns input. Each call to [`JsonReader::next_token`] looks
//! at a caller-supplied slice starting at `pos` and either yields one complete
//! token, or reports that the slice ends inside a token. In the latter case
//! nothing about the partial token is recorded: the caller carries the
//! unconsumed tail into the next chunk and calls again. All continuation
//! state lives in the container stack and the current expectation, so the
//! token sequence is identical for every way of splitting the input.

use bitvec::vec::BitVec;
use jfe_format::{JfeError, Result};

/// Tokenizer options
#[derive(Debug, Clone)]
pub struct ReaderOptions {
    /// Maximum container nesting (default: 64)
    pub max_depth: usize,
    /// Accept `,` before a closing `]` or `}` (default: true)
    pub allow_trailing_commas: bool,
    /// Skip `//` and `/* */` comments (default: true)
    pub skip_comments: bool,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            max_depth: 64,
            allow_trailing_commas: true,
            skip_comments: true,
        }
    }
}

/// Token kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// `{`
    StartObject,
    /// `}`
    EndObject,
    /// `[`
    StartArray,
    /// `]`
    EndArray,
    /// Object key, quotes included in the span
    PropertyName,
    /// String value, quotes included in the span
    String,
    /// Number literal
    Number,
    /// `true`
    True,
    /// `false`
    False,
    /// `null`
    Null,
}

impl TokenKind {
    /// `{` or `[`
    pub fn is_start(self) -> bool {
        matches!(self, TokenKind::StartObject | TokenKind::StartArray)
    }

    /// `}` or `]`
    pub fn is_end(self) -> bool {
        matches!(self, TokenKind::EndObject | TokenKind::EndArray)
    }
}

/// A complete token located in the current chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    /// Token kind
    pub kind: TokenKind,
    /// Start offset in the chunk
    pub start: usize,
    /// End offset (exclusive) in the chunk
    pub end: usize,
    /// Nesting depth: containers report the depth outside themselves, so the
    /// root object and its closing brace are at 0 and its members at 1
    pub depth: usize,
    /// String or property name contains backslash escapes
    pub has_escapes: bool,
}

impl Token {
    /// Raw token bytes, quotes included for strings.
    pub fn raw<'a>(&self, chunk: &'a [u8]) -> &'a [u8] {
        &chunk[self.start..self.end]
    }

    /// String contents between the quotes, still escaped.
    pub fn content<'a>(&self, chunk: &'a [u8]) -> &'a [u8] {
        match self.kind {
            TokenKind::PropertyName | TokenKind::String => &chunk[self.start + 1..self.end - 1],
            _ => self.raw(chunk),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    RootValue,
    FirstKeyOrEnd,
    Key,
    Colon,
    Value,
    FirstValueOrEnd,
    ArrayValue,
    CommaOrEnd,
    Done,
}

enum Lexed {
    Complete { end: usize, has_escapes: bool },
    Incomplete,
}

/// Resumable JSON tokenizer state.
#[derive(Debug, Clone)]
pub struct JsonReader {
    options: ReaderOptions,
    /// `true` marks an object, `false` an array
    containers: BitVec,
    expect: Expect,
    base_offset: u64,
}

impl JsonReader {
    /// Fresh reader positioned before the root value.
    pub fn new(options: ReaderOptions) -> Self {
        Self {
            options,
            containers: BitVec::new(),
            expect: Expect::RootValue,
            base_offset: 0,
        }
    }

    /// Current container depth.
    pub fn depth(&self) -> usize {
        self.containers.len()
    }

    /// Whether the root value has been fully read.
    pub fn is_done(&self) -> bool {
        self.expect == Expect::Done
    }

    /// Absolute stream offset of the start of the current chunk.
    pub fn offset(&self) -> u64 {
        self.base_offset
    }

    /// Record that `consumed` bytes of the current chunk will not be shown
    /// again.
    pub fn commit(&mut self, consumed: usize) {
        self.base_offset += consumed as u64;
    }

    fn error(&self, pos: usize, reason: impl Into<String>) -> JfeError {
        JfeError::malformed_json(self.base_offset + pos as u64, reason)
    }

    /// Next complete token in `chunk[*pos..]`.
    ///
    /// Returns `Ok(None)` when the chunk is exhausted mid-token (more input
    /// needed) or, with `is_final`, when the document is complete. `*pos`
    /// only moves past fully processed input.
    pub fn next_token(
        &mut self,
        chunk: &[u8],
        pos: &mut usize,
        is_final: bool,
    ) -> Result<Option<Token>> {
        loop {
            while *pos < chunk.len() && is_whitespace(chunk[*pos]) {
                *pos += 1;
            }

            if *pos >= chunk.len() {
                if is_final && self.expect != Expect::Done {
                    return Err(self.error(*pos, "unexpected end of input"));
                }
                return Ok(None);
            }

            let b = chunk[*pos];

            if b == b'/' {
                if !self.options.skip_comments {
                    return Err(self.error(*pos, "comments are not allowed"));
                }
                match self.skip_comment(chunk, *pos, is_final)? {
                    Some(end) => {
                        *pos = end;
                        continue;
                    }
                    None => return Ok(None),
                }
            }

            match self.expect {
                Expect::Done => {
                    return Err(self.error(*pos, "unexpected content after the root value"));
                }
                Expect::Colon => {
                    if b != b':' {
                        return Err(self.error(*pos, "expected ':' after property name"));
                    }
                    *pos += 1;
                    self.expect = Expect::Value;
                }
                Expect::CommaOrEnd => {
                    let in_object = self.in_object();
                    match b {
                        b',' => {
                            *pos += 1;
                            self.expect = if in_object {
                                Expect::Key
                            } else {
                                Expect::ArrayValue
                            };
                        }
                        b'}' if in_object => return Ok(Some(self.close(*pos, pos, true))),
                        b']' if !in_object => return Ok(Some(self.close(*pos, pos, false))),
                        _ => {
                            let expected = if in_object { "',' or '}'" } else { "',' or ']'" };
                            return Err(self.error(*pos, format!("expected {}", expected)));
                        }
                    }
                }
                Expect::FirstKeyOrEnd | Expect::Key => match b {
                    b'"' => {
                        let start = *pos;
                        return match self.lex_string(chunk, start)? {
                            Lexed::Complete { end, has_escapes } => {
                                *pos = end;
                                self.expect = Expect::Colon;
                                Ok(Some(Token {
                                    kind: TokenKind::PropertyName,
                                    start,
                                    end,
                                    depth: self.containers.len(),
                                    has_escapes,
                                }))
                            }
                            Lexed::Incomplete => self.incomplete(start, is_final),
                        };
                    }
                    b'}' if self.expect == Expect::FirstKeyOrEnd
                        || self.options.allow_trailing_commas =>
                    {
                        return Ok(Some(self.close(*pos, pos, true)));
                    }
                    _ => return Err(self.error(*pos, "expected property name")),
                },
                Expect::RootValue
                | Expect::Value
                | Expect::FirstValueOrEnd
                | Expect::ArrayValue => {
                    if b == b']'
                        && (self.expect == Expect::FirstValueOrEnd
                            || (self.expect == Expect::ArrayValue
                                && self.options.allow_trailing_commas))
                    {
                        return Ok(Some(self.close(*pos, pos, false)));
                    }
                    return self.value(chunk, pos, is_final);
                }
            }
        }
    }

    fn in_object(&self) -> bool {
        self.containers.last().map(|bit| *bit).unwrap_or(false)
    }

    fn after_value(&mut self) {
        self.expect = if self.containers.is_empty() {
            Expect::Done
        } else {
            Expect::CommaOrEnd
        };
    }

    fn close(&mut self, start: usize, pos: &mut usize, object: bool) -> Token {
        self.containers.pop();
        *pos = start + 1;
        self.after_value();
        Token {
            kind: if object {
                TokenKind::EndObject
            } else {
                TokenKind::EndArray
            },
            start,
            end: start + 1,
            depth: self.containers.len(),
            has_escapes: false,
        }
    }

    fn incomplete(&self, start: usize, is_final: bool) -> Result<Option<Token>> {
        if is_final {
            Err(self.error(start, "unexpected end of input inside a token"))
        } else {
            Ok(None)
        }
    }

    fn value(&mut self, chunk: &[u8], pos: &mut usize, is_final: bool) -> Result<Option<Token>> {
        let start = *pos;
        let depth = self.containers.len();

        let (kind, lexed) = match chunk[start] {
            b'{' | b'[' => {
                if depth >= self.options.max_depth {
                    return Err(self.error(
                        start,
                        format!("maximum depth of {} exceeded", self.options.max_depth),
                    ));
                }
                let object = chunk[start] == b'{';
                self.containers.push(object);
                *pos = start + 1;
                self.expect = if object {
                    Expect::FirstKeyOrEnd
                } else {
                    Expect::FirstValueOrEnd
                };
                return Ok(Some(Token {
                    kind: if object {
                        TokenKind::StartObject
                    } else {
                        TokenKind::StartArray
                    },
                    start,
                    end: start + 1,
                    depth,
                    has_escapes: false,
                }));
            }
            b'"' => (TokenKind::String, self.lex_string(chunk, start)?),
            b'-' | b'0'..=b'9' => (TokenKind::Number, self.lex_number(chunk, start, is_final)?),
            b't' => (TokenKind::True, self.lex_literal(chunk, start, b"true")?),
            b'f' => (TokenKind::False, self.lex_literal(chunk, start, b"false")?),
            b'n' => (TokenKind::Null, self.lex_literal(chunk, start, b"null")?),
            b'N' => return self.non_finite(chunk, start, b"NaN", is_final),
            b'I' => return self.non_finite(chunk, start, b"Infinity", is_final),
            _ => return Err(self.error(start, "expected a JSON value")),
        };

        match lexed {
            Lexed::Complete { end, has_escapes } => {
                *pos = end;
                self.after_value();
                Ok(Some(Token {
                    kind,
                    start,
                    end,
                    depth,
                    has_escapes,
                }))
            }
            Lexed::Incomplete => self.incomplete(start, is_final),
        }
    }

    fn non_finite(
        &self,
        chunk: &[u8],
        start: usize,
        word: &'static [u8],
        is_final: bool,
    ) -> Result<Option<Token>> {
        match self.lex_literal(chunk, start, word)? {
            Lexed::Complete { .. } => Err(JfeError::UnsupportedNumber(
                String::from_utf8_lossy(word).into_owned(),
            )),
            Lexed::Incomplete => self.incomplete(start, is_final),
        }
    }

    fn lex_literal(&self, chunk: &[u8], start: usize, word: &[u8]) -> Result<Lexed> {
        let available = &chunk[start..];
        let n = available.len().min(word.len());
        if available[..n] != word[..n] {
            return Err(self.error(start, "invalid literal"));
        }
        if n < word.len() {
            return Ok(Lexed::Incomplete);
        }
        Ok(Lexed::Complete {
            end: start + word.len(),
            has_escapes: false,
        })
    }

    fn lex_string(&self, chunk: &[u8], start: usize) -> Result<Lexed> {
        let mut i = start + 1;
        let mut has_escapes = false;

        loop {
            let Some(&b) = chunk.get(i) else {
                return Ok(Lexed::Incomplete);
            };
            match b {
                b'"' => break,
                b'\\' => {
                    has_escapes = true;
                    let Some(&escaped) = chunk.get(i + 1) else {
                        return Ok(Lexed::Incomplete);
                    };
                    match escaped {
                        b'"' | b'\\' | b'/' | b'b' | b'f' | b'n' | b'r' | b't' => i += 2,
                        b'u' => {
                            let hex_end = i + 6;
                            let digits = chunk.get(i + 2..hex_end.min(chunk.len())).unwrap_or(&[]);
                            if let Some(bad) = digits.iter().position(|d| !d.is_ascii_hexdigit()) {
                                return Err(self.error(i + 2 + bad, "invalid \\u escape"));
                            }
                            if hex_end > chunk.len() {
                                return Ok(Lexed::Incomplete);
                            }
                            i = hex_end;
                        }
                        _ => return Err(self.error(i, "invalid escape sequence")),
                    }
                }
                0x00..=0x1F => {
                    return Err(self.error(i, "unescaped control character in string"));
                }
                _ => i += 1,
            }
        }

        if let Err(e) = std::str::from_utf8(&chunk[start + 1..i]) {
            return Err(self.error(start + 1 + e.valid_up_to(), "invalid UTF-8 in string"));
        }

        Ok(Lexed::Complete {
            end: i + 1,
            has_escapes,
        })
    }

    fn lex_number(&self, chunk: &[u8], start: usize, is_final: bool) -> Result<Lexed> {
        let len = chunk.len();
        let mut i = start;

        if chunk[i] == b'-' {
            i += 1;
            match chunk.get(i) {
                None => return Ok(Lexed::Incomplete),
                Some(b'I') => {
                    return match self.lex_literal(chunk, i, b"Infinity")? {
                        Lexed::Complete { .. } => {
                            Err(JfeError::UnsupportedNumber("-Infinity".to_string()))
                        }
                        Lexed::Incomplete => Ok(Lexed::Incomplete),
                    };
                }
                Some(_) => {}
            }
        }

        // Integer part
        match chunk.get(i) {
            None => return Ok(Lexed::Incomplete),
            Some(b'0') => i += 1,
            Some(b'1'..=b'9') => {
                while i < len && chunk[i].is_ascii_digit() {
                    i += 1;
                }
            }
            Some(_) => return Err(self.error(i, "invalid number")),
        }

        // Fraction
        if i < len && chunk[i] == b'.' {
            i += 1;
            let digits_start = i;
            while i < len && chunk[i].is_ascii_digit() {
                i += 1;
            }
            if i == digits_start {
                if i >= len {
                    return Ok(Lexed::Incomplete);
                }
                return Err(self.error(i, "expected digit after decimal point"));
            }
        }

        // Exponent
        if i < len && (chunk[i] == b'e' || chunk[i] == b'E') {
            i += 1;
            if i < len && (chunk[i] == b'+' || chunk[i] == b'-') {
                i += 1;
            }
            let digits_start = i;
            while i < len && chunk[i].is_ascii_digit() {
                i += 1;
            }
            if i == digits_start {
                if i >= len {
                    return Ok(Lexed::Incomplete);
                }
                return Err(self.error(i, "expected digit in exponent"));
            }
        }

        if i >= len {
            // The literal may continue in the next chunk.
            if !is_final {
                return Ok(Lexed::Incomplete);
            }
        } else if !is_delimiter(chunk[i]) {
            return Err(self.error(i, "invalid character after number"));
        }

        Ok(Lexed::Complete {
            end: i,
            has_escapes: false,
        })
    }

    /// End offset of the comment at `start`, or `None` when it is cut off.
    fn skip_comment(&self, chunk: &[u8], start: usize, is_final: bool) -> Result<Option<usize>> {
        let cut_off = |reader: &Self| {
            if is_final {
                Err(reader.error(start, "unterminated comment"))
            } else {
                Ok(None)
            }
        };

        match chunk.get(start + 1) {
            None => cut_off(self),
            Some(b'/') => match chunk[start + 2..].iter().position(|&b| b == b'\n') {
                Some(nl) => Ok(Some(start + 2 + nl + 1)),
                None if is_final => Ok(Some(chunk.len())),
                None => Ok(None),
            },
            Some(b'*') => {
                let body = &chunk[start + 2..];
                match body.windows(2).position(|w| w == b"*/") {
                    Some(close) => Ok(Some(start + 2 + close + 2)),
                    None => cut_off(self),
                }
            }
            Some(_) => Err(self.error(start, "invalid comment")),
        }
    }
}

fn is_whitespace(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\r')
}

fn is_delimiter(b: u8) -> bool {
    is_whitespace(b) || matches!(b, b',' | b']' | b'}' | b'/')
}

/// Decode the escaped contents of a string token into UTF-8 bytes.
pub fn unescape_into(content: &[u8], out: &mut Vec<u8>) -> std::result::Result<(), &'static str> {
    out.reserve(content.len());
    let mut i = 0;

    while i < content.len() {
        let b = content[i];
        if b != b'\\' {
            let run_end = content[i..]
                .iter()
                .position(|&c| c == b'\\')
                .map_or(content.len(), |p| i + p);
            out.extend_from_slice(&content[i..run_end]);
            i = run_end;
            continue;
        }

        let escaped = *content.get(i + 1).ok_or("truncated escape")?;
        i += 2;
        let decoded = match escaped {
            b'"' => b'"',
            b'\\' => b'\\',
            b'/' => b'/',
            b'b' => 0x08,
            b'f' => 0x0C,
            b'n' => b'\n',
            b'r' => b'\r',
            b't' => b'\t',
            b'u' => {
                let high = read_hex4(content, i)?;
                i += 4;
                let code = if (0xD800..0xDC00).contains(&high) {
                    if content.get(i) != Some(&b'\\') || content.get(i + 1) != Some(&b'u') {
                        return Err("unpaired high surrogate");
                    }
                    let low = read_hex4(content, i + 2)?;
                    if !(0xDC00..0xE000).contains(&low) {
                        return Err("invalid low surrogate");
                    }
                    i += 6;
                    0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00)
                } else if (0xDC00..0xE000).contains(&high) {
                    return Err("unpaired low surrogate");
                } else {
                    high
                };
                let ch = char::from_u32(code).ok_or("invalid code point")?;
                let mut utf8 = [0u8; 4];
                out.extend_from_slice(ch.encode_utf8(&mut utf8).as_bytes());
                continue;
            }
            _ => return Err("invalid escape"),
        };
        out.push(decoded);
    }

    Ok(())
}

fn read_hex4(content: &[u8], at: usize) -> std::result::Result<u32, &'static str> {
    let digits = content.get(at..at + 4).ok_or("truncated \\u escape")?;
    let text = std::str::from_utf8(digits).map_err(|_| "invalid \\u escape")?;
    u32::from_str_radix(text, 16).map_err(|_| "invalid \\u escape")
}
