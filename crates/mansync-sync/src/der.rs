//! Minimal DER tag/length/value primitives.
//!
//! Only the three universal types the wire format needs are supported:
//! SEQUENCE, INTEGER and OCTET STRING. Lengths are definite and minimal;
//! the long form is limited to [`MAX_LENGTH_BYTES`] bytes.

use crate::error::DecodeError;

/// Universal tags used on the wire.
pub mod tag {
    pub const INTEGER: u8 = 0x02;
    pub const OCTET_STRING: u8 = 0x04;
    pub const SEQUENCE: u8 = 0x30;
}

/// Longest accepted long-form length, in bytes.
pub const MAX_LENGTH_BYTES: usize = 4;

/// Append-only DER writer.
#[derive(Debug, Default)]
pub struct DerWriter {
    buf: Vec<u8>,
}

impl DerWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write an INTEGER in minimal two's complement form.
    pub fn integer(&mut self, n: i64) -> &mut Self {
        let bytes = n.to_be_bytes();
        let mut start = 0;
        while start < bytes.len() - 1 {
            let redundant = (bytes[start] == 0x00 && bytes[start + 1] & 0x80 == 0)
                || (bytes[start] == 0xff && bytes[start + 1] & 0x80 != 0);
            if !redundant {
                break;
            }
            start += 1;
        }
        self.tlv(tag::INTEGER, &bytes[start..])
    }

    /// Write an OCTET STRING.
    pub fn octet_string(&mut self, contents: &[u8]) -> &mut Self {
        self.tlv(tag::OCTET_STRING, contents)
    }

    /// Write a SEQUENCE whose contents are produced by `build`.
    pub fn sequence(&mut self, build: impl FnOnce(&mut DerWriter)) -> &mut Self {
        let mut inner = DerWriter::new();
        build(&mut inner);
        self.tlv(tag::SEQUENCE, &inner.buf)
    }

    /// Consume the writer, returning the encoded bytes.
    pub fn finish(self) -> Vec<u8> {
        self.buf
    }

    fn tlv(&mut self, tag: u8, contents: &[u8]) -> &mut Self {
        self.buf.push(tag);
        write_length(&mut self.buf, contents.len());
        self.buf.extend_from_slice(contents);
        self
    }
}

fn write_length(buf: &mut Vec<u8>, len: usize) {
    if len < 0x80 {
        buf.push(len as u8);
        return;
    }
    let bytes = (len as u64).to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    let significant = &bytes[skip..];
    buf.push(0x80 | significant.len() as u8);
    buf.extend_from_slice(significant);
}

/// Forward-only DER reader over a borrowed buffer.
#[derive(Debug, Clone)]
pub struct DerReader<'a> {
    input: &'a [u8],
}

impl<'a> DerReader<'a> {
    pub fn new(input: &'a [u8]) -> Self {
        Self { input }
    }

    /// Unread bytes.
    pub fn remaining(&self) -> usize {
        self.input.len()
    }

    /// Fail unless every byte has been consumed.
    pub fn finish(&self) -> Result<(), DecodeError> {
        if self.input.is_empty() {
            Ok(())
        } else {
            Err(DecodeError::TrailingGarbage(self.input.len()))
        }
    }

    /// Read a SEQUENCE and return a reader over its contents.
    pub fn sequence(&mut self, field: &'static str) -> Result<DerReader<'a>, DecodeError> {
        self.tlv(tag::SEQUENCE, field).map(DerReader::new)
    }

    /// Read an OCTET STRING.
    pub fn octet_string(&mut self, field: &'static str) -> Result<&'a [u8], DecodeError> {
        self.tlv(tag::OCTET_STRING, field)
    }

    /// Read an INTEGER that fits in an `i64`.
    pub fn integer(&mut self, field: &'static str) -> Result<i64, DecodeError> {
        let contents = self.tlv(tag::INTEGER, field)?;
        match contents {
            [] => Err(DecodeError::malformed(field, "empty integer")),
            [first, second, ..]
                if (*first == 0x00 && second & 0x80 == 0)
                    || (*first == 0xff && second & 0x80 != 0) =>
            {
                Err(DecodeError::malformed(field, "non-minimal integer"))
            }
            _ if contents.len() > 8 => Err(DecodeError::malformed(field, "integer too large")),
            _ => {
                let fill = if contents[0] & 0x80 != 0 { 0xff } else { 0x00 };
                let mut bytes = [fill; 8];
                bytes[8 - contents.len()..].copy_from_slice(contents);
                Ok(i64::from_be_bytes(bytes))
            }
        }
    }

    fn tlv(&mut self, expected: u8, field: &'static str) -> Result<&'a [u8], DecodeError> {
        let (&tag, rest) = self.input.split_first().ok_or(DecodeError::Truncated(field))?;
        if tag != expected {
            return Err(DecodeError::malformed(
                field,
                format!("expected tag {:#04x}, found {:#04x}", expected, tag),
            ));
        }

        let (len, rest) = read_length(rest, field)?;
        if rest.len() < len {
            return Err(DecodeError::Truncated(field));
        }
        let (contents, rest) = rest.split_at(len);
        self.input = rest;
        Ok(contents)
    }
}

fn read_length<'a>(input: &'a [u8], field: &'static str) -> Result<(usize, &'a [u8]), DecodeError> {
    let (&first, rest) = input.split_first().ok_or(DecodeError::Truncated(field))?;
    if first < 0x80 {
        return Ok((first as usize, rest));
    }

    let count = (first & 0x7f) as usize;
    if count == 0 {
        return Err(DecodeError::malformed(field, "indefinite length"));
    }
    if count > MAX_LENGTH_BYTES {
        return Err(DecodeError::malformed(field, "length too large"));
    }
    if rest.len() < count {
        return Err(DecodeError::Truncated(field));
    }

    let (len_bytes, rest) = rest.split_at(count);
    if len_bytes[0] == 0 {
        return Err(DecodeError::malformed(field, "non-minimal length"));
    }
    let len = len_bytes
        .iter()
        .fold(0usize, |acc, b| (acc << 8) | *b as usize);
    if len < 0x80 {
        return Err(DecodeError::malformed(field, "long form for short length"));
    }
    Ok((len, rest))
}
