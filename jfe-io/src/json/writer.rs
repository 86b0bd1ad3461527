//! Minified JSON writer with raw passthrough

use base64::prelude::*;
use jfe_format::value::format_f64;
use jfe_format::{JfeError, Result};
use smallvec::SmallVec;
use std::io::Write;

/// Streaming JSON writer.
///
/// Tracks separators only; callers are responsible for emitting a
/// well-formed token sequence. Raw methods copy bytes verbatim, which is how
/// pass-through tokens keep their original spelling.
#[derive(Debug)]
pub struct JsonWriter<W: Write> {
    out: W,
    /// One entry per open container: whether it already has a member
    frames: SmallVec<[bool; 32]>,
    after_name: bool,
    bytes_written: u64,
    scratch: Vec<u8>,
}

impl<W: Write> JsonWriter<W> {
    /// Writer emitting into `out`.
    pub fn new(out: W) -> Self {
        Self {
            out,
            frames: SmallVec::new(),
            after_name: false,
            bytes_written: 0,
            scratch: Vec::new(),
        }
    }

    /// Bytes emitted so far.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Open container count.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Shared access to the sink.
    pub fn get_ref(&self) -> &W {
        &self.out
    }

    /// Recover the sink.
    pub fn into_inner(self) -> W {
        self.out
    }

    /// Flush the sink.
    pub fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }

    fn put(&mut self, bytes: &[u8]) -> Result<()> {
        self.out.write_all(bytes)?;
        self.bytes_written += bytes.len() as u64;
        Ok(())
    }

    fn separate(&mut self) -> Result<()> {
        if self.after_name {
            self.after_name = false;
            return Ok(());
        }
        let needs_comma = match self.frames.last_mut() {
            Some(has_member) => std::mem::replace(has_member, true),
            None => false,
        };
        if needs_comma {
            self.put(b",")?;
        }
        Ok(())
    }

    /// `{`
    pub fn start_object(&mut self) -> Result<()> {
        self.separate()?;
        self.frames.push(false);
        self.put(b"{")
    }

    /// `}`
    pub fn end_object(&mut self) -> Result<()> {
        self.frames.pop();
        self.put(b"}")
    }

    /// `[`
    pub fn start_array(&mut self) -> Result<()> {
        self.separate()?;
        self.frames.push(false);
        self.put(b"[")
    }

    /// `]`
    pub fn end_array(&mut self) -> Result<()> {
        self.frames.pop();
        self.put(b"]")
    }

    /// Property name given as its raw quoted token.
    pub fn property_name_raw(&mut self, raw: &[u8]) -> Result<()> {
        self.separate()?;
        self.put(raw)?;
        self.put(b":")?;
        self.after_name = true;
        Ok(())
    }

    /// Property name from unescaped text.
    pub fn property_name(&mut self, name: &str) -> Result<()> {
        self.separate()?;
        self.put_escaped(name)?;
        self.put(b":")?;
        self.after_name = true;
        Ok(())
    }

    /// Value copied verbatim (a pass-through token or serialized container).
    pub fn raw_value(&mut self, raw: &[u8]) -> Result<()> {
        self.separate()?;
        self.put(raw)
    }

    /// String value, minimally escaped.
    pub fn string(&mut self, value: &str) -> Result<()> {
        self.separate()?;
        self.put_escaped(value)
    }

    /// String value holding the standard Base64 encoding of `bytes`.
    pub fn base64_string(&mut self, bytes: &[u8]) -> Result<()> {
        self.separate()?;
        let encoded_len = base64::encoded_len(bytes.len(), true).ok_or_else(|| {
            JfeError::LimitExceeded("payload too large to encode as base64".into())
        })?;

        let mut scratch = std::mem::take(&mut self.scratch);
        scratch.clear();
        scratch.resize(encoded_len + 2, b'"');
        let result = BASE64_STANDARD
            .encode_slice(bytes, &mut scratch[1..=encoded_len])
            .map_err(|e| JfeError::LimitExceeded(format!("base64 encoding failed: {}", e)))
            .and_then(|_| self.put(&scratch));
        self.scratch = scratch;
        result
    }

    /// Integer value.
    pub fn i64(&mut self, value: i64) -> Result<()> {
        self.separate()?;
        let text = value.to_string();
        self.put(text.as_bytes())
    }

    /// Double value in shortest round-trip form.
    pub fn f64(&mut self, value: f64) -> Result<()> {
        self.separate()?;
        let text = format_f64(value)?;
        self.put(text.as_bytes())
    }

    /// `true` / `false`
    pub fn bool(&mut self, value: bool) -> Result<()> {
        self.separate()?;
        let literal: &[u8] = if value { b"true" } else { b"false" };
        self.put(literal)
    }

    /// `null`
    pub fn null(&mut self) -> Result<()> {
        self.separate()?;
        self.put(b"null")
    }

    fn put_escaped(&mut self, value: &str) -> Result<()> {
        self.put(b"\"")?;
        let bytes = value.as_bytes();
        let mut run_start = 0;

        for (i, &b) in bytes.iter().enumerate() {
            let escape: &[u8] = match b {
                b'"' => b"\\\"",
                b'\\' => b"\\\\",
                b'\n' => b"\\n",
                b'\r' => b"\\r",
                b'\t' => b"\\t",
                0x08 => b"\\b",
                0x0C => b"\\f",
                0x00..=0x1F => {
                    self.put(&bytes[run_start..i])?;
                    let hex = format!("\\u{:04x}", b);
                    self.put(hex.as_bytes())?;
                    run_start = i + 1;
                    continue;
                }
                _ => continue,
            };
            self.put(&bytes[run_start..i])?;
            self.put(escape)?;
            run_start = i + 1;
        }

        self.put(&bytes[run_start..])?;
        self.put(b"\"")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn written(f: impl FnOnce(&mut JsonWriter<Vec<u8>>) -> Result<()>) -> String {
        let mut writer = JsonWriter::new(Vec::new());
        f(&mut writer).unwrap();
        String::from_utf8(writer.into_inner()).unwrap()
    }

    #[test]
    fn separators() {
        let text = written(|w| {
            w.start_object()?;
            w.property_name("a")?;
            w.i64(1)?;
            w.property_name("b")?;
            w.start_array()?;
            w.bool(true)?;
            w.null()?;
            w.start_object()?;
            w.end_object()?;
            w.end_array()?;
            w.property_name_raw(br#""cA""#)?;
            w.raw_value(br#""raw""#)?;
            w.end_object()
        });
        assert_eq!(text, r#"{"a":1,"b":[true,null,{}],"cA":"raw"}"#);
    }

    #[test]
    fn escaping_is_minimal() {
        let text = written(|w| w.string("q\"b\\n\nt\tc\u{1}é/<"));
        assert_eq!(text, r#""q\"b\\n\nt\tc\u0001é/<""#);
    }

    #[test]
    fn numbers_and_base64() {
        let text = written(|w| {
            w.start_array()?;
            w.f64(2.5)?;
            w.f64(-0.0)?;
            w.i64(i64::MIN)?;
            w.base64_string(b"hi")?;
            w.end_array()
        });
        assert_eq!(text, r#"[2.5,-0.0,-9223372036854775808,"aGk="]"#);
    }

    #[test]
    fn counts_bytes() {
        let mut writer = JsonWriter::new(Vec::new());
        writer.start_array().unwrap();
        writer.i64(10).unwrap();
        writer.end_array().unwrap();
        assert_eq!(writer.bytes_written(), 4);
    }
}
