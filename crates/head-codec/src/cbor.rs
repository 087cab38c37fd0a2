//! Low-level CBOR reader and writer
//!
//! Only the subset the ledger uses is supported. The writer always emits
//! the shortest header form; the reader accepts any well-formed header,
//! definite or indefinite, and bounds recursion when skipping items.

use crate::constants::MAX_DEPTH;
use crate::error::DecodeError;

pub const MAJOR_UINT: u8 = 0;
pub const MAJOR_NINT: u8 = 1;
pub const MAJOR_BYTES: u8 = 2;
pub const MAJOR_TEXT: u8 = 3;
pub const MAJOR_ARRAY: u8 = 4;
pub const MAJOR_MAP: u8 = 5;
pub const MAJOR_TAG: u8 = 6;
pub const MAJOR_SIMPLE: u8 = 7;

pub const BREAK: u8 = 0xff;

/// One decoded item header. `None` lengths are indefinite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Header {
    Uint(u64),
    /// Negative integer `-1 - n`
    Nint(u64),
    Bytes(Option<u64>),
    Text(Option<u64>),
    Array(Option<u64>),
    Map(Option<u64>),
    Tag(u64),
    Simple(u8),
    Float,
    Break,
}

impl Header {
    pub fn major(&self) -> u8 {
        match self {
            Header::Uint(_) => MAJOR_UINT,
            Header::Nint(_) => MAJOR_NINT,
            Header::Bytes(_) => MAJOR_BYTES,
            Header::Text(_) => MAJOR_TEXT,
            Header::Array(_) => MAJOR_ARRAY,
            Header::Map(_) => MAJOR_MAP,
            Header::Tag(_) => MAJOR_TAG,
            Header::Simple(_) | Header::Float | Header::Break => MAJOR_SIMPLE,
        }
    }
}

/// Append-only CBOR writer
#[derive(Debug, Default, Clone)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Shortest-form header for `major` with argument `value`
    pub fn head(&mut self, major: u8, value: u64) -> &mut Self {
        let mt = major << 5;
        if value < 24 {
            self.buf.push(mt | value as u8);
        } else if value <= u8::MAX as u64 {
            self.buf.push(mt | 24);
            self.buf.push(value as u8);
        } else if value <= u16::MAX as u64 {
            self.buf.push(mt | 25);
            self.buf.extend_from_slice(&(value as u16).to_be_bytes());
        } else if value <= u32::MAX as u64 {
            self.buf.push(mt | 26);
            self.buf.extend_from_slice(&(value as u32).to_be_bytes());
        } else {
            self.buf.push(mt | 27);
            self.buf.extend_from_slice(&value.to_be_bytes());
        }
        self
    }

    pub fn uint(&mut self, value: u64) -> &mut Self {
        self.head(MAJOR_UINT, value)
    }

    /// Negative integer `-1 - n`
    pub fn nint(&mut self, n: u64) -> &mut Self {
        self.head(MAJOR_NINT, n)
    }

    /// Definite byte string
    pub fn bytes(&mut self, data: &[u8]) -> &mut Self {
        self.head(MAJOR_BYTES, data.len() as u64);
        self.buf.extend_from_slice(data);
        self
    }

    pub fn text(&mut self, s: &str) -> &mut Self {
        self.head(MAJOR_TEXT, s.len() as u64);
        self.buf.extend_from_slice(s.as_bytes());
        self
    }

    pub fn array(&mut self, len: u64) -> &mut Self {
        self.head(MAJOR_ARRAY, len)
    }

    pub fn map(&mut self, len: u64) -> &mut Self {
        self.head(MAJOR_MAP, len)
    }

    pub fn tag(&mut self, tag: u64) -> &mut Self {
        self.head(MAJOR_TAG, tag)
    }

    pub fn begin_indefinite_array(&mut self) -> &mut Self {
        self.buf.push(0x9f);
        self
    }

    pub fn begin_indefinite_bytes(&mut self) -> &mut Self {
        self.buf.push(0x5f);
        self
    }

    pub fn end_indefinite(&mut self) -> &mut Self {
        self.buf.push(BREAK);
        self
    }

    pub fn bool(&mut self, value: bool) -> &mut Self {
        self.buf.push(if value { 0xf5 } else { 0xf4 });
        self
    }

    pub fn null(&mut self) -> &mut Self {
        self.buf.push(0xf6);
        self
    }

    /// Splice pre-encoded CBOR verbatim
    pub fn raw(&mut self, encoded: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(encoded);
        self
    }
}

/// Cursor over a CBOR byte slice
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Fail unless the whole input was consumed
    pub fn finish(&self) -> Result<(), DecodeError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(DecodeError::TrailingBytes(n)),
        }
    }

    pub fn peek_u8(&self) -> Result<u8, DecodeError> {
        self.data.get(self.pos).copied().ok_or(DecodeError::UnexpectedEnd)
    }

    /// Whether the next byte is an indefinite-length break marker
    pub fn at_break(&self) -> bool {
        self.data.get(self.pos) == Some(&BREAK)
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < n {
            return Err(DecodeError::UnexpectedEnd);
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn read_argument(&mut self, info: u8) -> Result<u64, DecodeError> {
        Ok(match info {
            0..=23 => info as u64,
            24 => self.read_u8()? as u64,
            25 => {
                let b = self.take(2)?;
                u16::from_be_bytes([b[0], b[1]]) as u64
            }
            26 => {
                let b = self.take(4)?;
                u32::from_be_bytes([b[0], b[1], b[2], b[3]]) as u64
            }
            27 => {
                let b = self.take(8)?;
                u64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
            }
            _ => return Err(DecodeError::InvalidHeader(info)),
        })
    }

    /// Read the next item header
    pub fn header(&mut self) -> Result<Header, DecodeError> {
        let initial = self.read_u8()?;
        let major = initial >> 5;
        let info = initial & 0x1f;

        if info == 31 {
            return match major {
                MAJOR_BYTES => Ok(Header::Bytes(None)),
                MAJOR_TEXT => Ok(Header::Text(None)),
                MAJOR_ARRAY => Ok(Header::Array(None)),
                MAJOR_MAP => Ok(Header::Map(None)),
                MAJOR_SIMPLE => Ok(Header::Break),
                _ => Err(DecodeError::InvalidHeader(initial)),
            };
        }
        if (28..=30).contains(&info) {
            return Err(DecodeError::InvalidHeader(initial));
        }

        if major == MAJOR_SIMPLE {
            return match info {
                0..=23 => Ok(Header::Simple(info)),
                24 => Ok(Header::Simple(self.read_u8()?)),
                25 => self.take(2).map(|_| Header::Float),
                26 => self.take(4).map(|_| Header::Float),
                _ => self.take(8).map(|_| Header::Float),
            };
        }

        let arg = self.read_argument(info)?;
        Ok(match major {
            MAJOR_UINT => Header::Uint(arg),
            MAJOR_NINT => Header::Nint(arg),
            MAJOR_BYTES => Header::Bytes(Some(arg)),
            MAJOR_TEXT => Header::Text(Some(arg)),
            MAJOR_ARRAY => Header::Array(Some(arg)),
            MAJOR_MAP => Header::Map(Some(arg)),
            _ => Header::Tag(arg),
        })
    }

    fn expect_len(&self, len: u64) -> Result<usize, DecodeError> {
        if len > self.remaining() as u64 {
            return Err(DecodeError::LengthTooLarge(len));
        }
        Ok(len as usize)
    }

    pub fn uint(&mut self) -> Result<u64, DecodeError> {
        match self.header()? {
            Header::Uint(v) => Ok(v),
            other => Err(DecodeError::UnexpectedType {
                expected: "unsigned integer",
                found: other.major(),
            }),
        }
    }

    /// Byte string, concatenating chunks of an indefinite one
    pub fn bytes(&mut self) -> Result<Vec<u8>, DecodeError> {
        match self.header()? {
            Header::Bytes(Some(len)) => {
                let len = self.expect_len(len)?;
                Ok(self.take(len)?.to_vec())
            }
            Header::Bytes(None) => {
                let mut out = Vec::new();
                loop {
                    match self.header()? {
                        Header::Break => return Ok(out),
                        Header::Bytes(Some(len)) => {
                            let len = self.expect_len(len)?;
                            out.extend_from_slice(self.take(len)?);
                        }
                        other => {
                            return Err(DecodeError::UnexpectedType {
                                expected: "byte string chunk",
                                found: other.major(),
                            })
                        }
                    }
                }
            }
            other => Err(DecodeError::UnexpectedType {
                expected: "byte string",
                found: other.major(),
            }),
        }
    }

    /// Array header; `None` means indefinite (terminated by a break)
    pub fn array(&mut self) -> Result<Option<u64>, DecodeError> {
        match self.header()? {
            Header::Array(len) => Ok(len),
            other => Err(DecodeError::UnexpectedType {
                expected: "array",
                found: other.major(),
            }),
        }
    }

    /// Map header; `None` means indefinite (terminated by a break)
    pub fn map(&mut self) -> Result<Option<u64>, DecodeError> {
        match self.header()? {
            Header::Map(len) => Ok(len),
            other => Err(DecodeError::UnexpectedType {
                expected: "map",
                found: other.major(),
            }),
        }
    }

    pub fn tag(&mut self) -> Result<u64, DecodeError> {
        match self.header()? {
            Header::Tag(t) => Ok(t),
            other => Err(DecodeError::UnexpectedType {
                expected: "tag",
                found: other.major(),
            }),
        }
    }

    /// Consume the break that closes an indefinite container
    pub fn expect_break(&mut self) -> Result<(), DecodeError> {
        match self.header()? {
            Header::Break => Ok(()),
            _ => Err(DecodeError::UnexpectedData("break")),
        }
    }

    /// Whether another element of a container with `len` follows, given
    /// `seen` elements so far. Consumes the break of indefinite containers.
    pub fn has_next(&mut self, len: Option<u64>, seen: u64) -> Result<bool, DecodeError> {
        match len {
            Some(n) => Ok(seen < n),
            None => {
                if self.at_break() {
                    self.pos += 1;
                    Ok(false)
                } else {
                    Ok(true)
                }
            }
        }
    }

    /// Skip one complete item
    pub fn skip(&mut self) -> Result<(), DecodeError> {
        self.skip_at(0)
    }

    fn skip_at(&mut self, depth: usize) -> Result<(), DecodeError> {
        if depth > MAX_DEPTH {
            return Err(DecodeError::DepthExceeded(MAX_DEPTH));
        }
        match self.header()? {
            Header::Uint(_) | Header::Nint(_) | Header::Simple(_) | Header::Float => Ok(()),
            Header::Bytes(Some(len)) | Header::Text(Some(len)) => {
                let len = self.expect_len(len)?;
                self.take(len).map(|_| ())
            }
            Header::Bytes(None) | Header::Text(None) => loop {
                match self.header()? {
                    Header::Break => return Ok(()),
                    Header::Bytes(Some(len)) | Header::Text(Some(len)) => {
                        let len = self.expect_len(len)?;
                        self.take(len)?;
                    }
                    _ => return Err(DecodeError::UnexpectedData("string chunk")),
                }
            },
            Header::Array(len) => {
                let mut seen = 0;
                while self.has_next(len, seen)? {
                    self.skip_at(depth + 1)?;
                    seen += 1;
                }
                Ok(())
            }
            Header::Map(len) => {
                let mut seen = 0;
                while self.has_next(len, seen)? {
                    self.skip_at(depth + 1)?;
                    self.skip_at(depth + 1)?;
                    seen += 1;
                }
                Ok(())
            }
            Header::Tag(_) => self.skip_at(depth + 1),
            Header::Break => Err(DecodeError::UnexpectedData("item")),
        }
    }

    /// Skip one item and return its exact encoded bytes
    pub fn raw_item(&mut self) -> Result<&'a [u8], DecodeError> {
        let start = self.pos;
        self.skip()?;
        Ok(&self.data[start..self.pos])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_head_uses_shortest_form() {
        let mut w = Writer::new();
        w.uint(23).uint(24).uint(256).uint(65_536).uint(1 << 32);
        assert_eq!(
            hex::encode(w.as_slice()),
            "1718181901001a000100001b0000000100000000"
        );
    }

    #[test]
    fn test_reader_concatenates_chunks() {
        let data = hex::decode("5f4201024103ff").unwrap();
        let mut r = Reader::new(&data);
        assert_eq!(r.bytes().unwrap(), vec![1, 2, 3]);
        r.finish().unwrap();
    }

    #[test]
    fn test_raw_item_spans_nested_containers() {
        // [1, {2: h'aa'}, 24(h'00')] followed by 7
        let mut w = Writer::new();
        w.array(3).uint(1).map(1).uint(2).bytes(&[0xaa]).tag(24).bytes(&[0]);
        w.uint(7);
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        let item = r.raw_item().unwrap();
        assert_eq!(item.len(), bytes.len() - 1);
        assert_eq!(r.uint().unwrap(), 7);
        r.finish().unwrap();
    }

    #[test]
    fn test_truncated_input_is_an_error() {
        let data = hex::decode("5820aabb").unwrap();
        let mut r = Reader::new(&data);
        assert_eq!(r.bytes(), Err(DecodeError::LengthTooLarge(32)));

        let mut r = Reader::new(&[0x19, 0x01]);
        assert_eq!(r.header(), Err(DecodeError::UnexpectedEnd));
    }

    #[test]
    fn test_skip_rejects_runaway_nesting() {
        let data = vec![0x81; MAX_DEPTH + 2];
        let mut r = Reader::new(&data);
        assert_eq!(r.skip(), Err(DecodeError::DepthExceeded(MAX_DEPTH)));
    }

    #[test]
    fn test_reserved_additional_info_rejected() {
        let mut r = Reader::new(&[0x1c]);
        assert_eq!(r.header(), Err(DecodeError::InvalidHeader(0x1c)));
    }
}
