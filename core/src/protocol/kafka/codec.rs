//! Kafka Wire Protocol Primitives
//!
//! This module implements the primitive types of the Kafka wire protocol. Message
//! types in [`super::messages`] are written in terms of these and nothing else.
//!
//! The Kafka protocol uses a binary format with the following rules:
//! - All integers are encoded in network byte order (big-endian)
//! - Strings are length-prefixed with int16 length, bytes with int32 length
//! - Arrays are length-prefixed with int32 count
//! - Nullable fields use -1 to indicate null
//! - Record-level fields use zig-zag varints
//! - Flexible versions use compact (unsigned varint, length + 1) strings, bytes
//!   and arrays, followed by tagged fields

use bytes::{BufMut, Bytes, BytesMut};
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Insufficient data: needed {needed} bytes, {available} available")]
    InsufficientData { needed: usize, available: usize },
    #[error("Invalid {kind} length: {length}")]
    InvalidLength { kind: &'static str, length: i64 },
    #[error("Invalid UTF-8 in string field")]
    InvalidUtf8,
    #[error("Incompatible fields: {0}")]
    IncompatibleFields(&'static str),
    #[error("Value out of range for {field}: {value}")]
    ValueOutOfRange { field: &'static str, value: i64 },
    #[error("Unsupported API version: key={api_key}, version={version}")]
    UnsupportedVersion { api_key: i16, version: i16 },
    #[error("Frame of {size} bytes exceeds maximum of {max} bytes")]
    FrameTooLarge { size: usize, max: usize },
    #[error("CRC mismatch: stored {expected:#010x}, computed {actual:#010x}")]
    CrcMismatch { expected: u32, actual: u32 },
    #[error("Malformed varint")]
    InvalidVarint,
    #[error("Unsupported compression codec: {0}")]
    UnsupportedCompression(i16),
    #[error("Invalid message format: {0}")]
    InvalidFormat(String),
}

pub type Result<T> = std::result::Result<T, CodecError>;

const MAX_UVARINT_BYTES: usize = 10;

fn zigzag_encode_i32(value: i32) -> u64 {
    ((value << 1) ^ (value >> 31)) as u32 as u64
}

fn zigzag_encode_i64(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

fn check_len(field: &'static str, len: usize, max: usize) -> Result<()> {
    if len > max {
        return Err(CodecError::ValueOutOfRange {
            field,
            value: len as i64,
        });
    }
    Ok(())
}

// ============================================================================
// ENCODER
// ============================================================================

/// Append-only encoder over a `BytesMut`.
///
/// Fixed-width writes cannot fail. Variable-length writes fail only when the
/// value cannot be represented by its length prefix.
#[derive(Debug, Default)]
pub struct PacketEncoder {
    buf: BytesMut,
    crc_spans: Vec<usize>,
    length_spans: Vec<usize>,
}

impl PacketEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Finish encoding. Fails if a CRC or length span is still open.
    pub fn finish(self) -> Result<Bytes> {
        if !self.crc_spans.is_empty() || !self.length_spans.is_empty() {
            return Err(CodecError::InvalidFormat(format!(
                "{} crc span(s) and {} length span(s) left open",
                self.crc_spans.len(),
                self.length_spans.len()
            )));
        }
        Ok(self.buf.freeze())
    }

    pub fn put_i8(&mut self, value: i8) {
        self.buf.put_i8(value);
    }

    pub fn put_i16(&mut self, value: i16) {
        self.buf.put_i16(value);
    }

    pub fn put_i32(&mut self, value: i32) {
        self.buf.put_i32(value);
    }

    pub fn put_i64(&mut self, value: i64) {
        self.buf.put_i64(value);
    }

    pub fn put_u32(&mut self, value: u32) {
        self.buf.put_u32(value);
    }

    pub fn put_bool(&mut self, value: bool) {
        self.buf.put_u8(value as u8);
    }

    /// Append bytes with no length prefix.
    pub fn put_raw(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }

    pub fn put_string(&mut self, value: &str) -> Result<()> {
        check_len("string", value.len(), i16::MAX as usize)?;
        self.buf.put_i16(value.len() as i16);
        self.buf.put_slice(value.as_bytes());
        Ok(())
    }

    pub fn put_nullable_string(&mut self, value: Option<&str>) -> Result<()> {
        match value {
            Some(s) => self.put_string(s),
            None => {
                self.buf.put_i16(-1);
                Ok(())
            }
        }
    }

    pub fn put_bytes(&mut self, value: &[u8]) -> Result<()> {
        check_len("bytes", value.len(), i32::MAX as usize)?;
        self.buf.put_i32(value.len() as i32);
        self.buf.put_slice(value);
        Ok(())
    }

    pub fn put_nullable_bytes(&mut self, value: Option<&[u8]>) -> Result<()> {
        match value {
            Some(b) => self.put_bytes(b),
            None => {
                self.buf.put_i32(-1);
                Ok(())
            }
        }
    }

    pub fn put_array_len(&mut self, len: usize) -> Result<()> {
        check_len("array", len, i32::MAX as usize)?;
        self.buf.put_i32(len as i32);
        Ok(())
    }

    pub fn put_array<T, F>(&mut self, items: &[T], mut f: F) -> Result<()>
    where
        F: FnMut(&mut Self, &T) -> Result<()>,
    {
        self.put_array_len(items.len())?;
        for item in items {
            f(self, item)?;
        }
        Ok(())
    }

    pub fn put_nullable_array<T, F>(&mut self, items: Option<&[T]>, f: F) -> Result<()>
    where
        F: FnMut(&mut Self, &T) -> Result<()>,
    {
        match items {
            Some(items) => self.put_array(items, f),
            None => {
                self.buf.put_i32(-1);
                Ok(())
            }
        }
    }

    pub fn put_string_array(&mut self, items: &[String]) -> Result<()> {
        self.put_array(items, |enc, s| enc.put_string(s))
    }

    pub fn put_i32_array(&mut self, items: &[i32]) -> Result<()> {
        self.put_array(items, |enc, v| {
            enc.put_i32(*v);
            Ok(())
        })
    }

    /// Unsigned LEB128.
    pub fn put_uvarint(&mut self, mut value: u64) {
        while value >= 0x80 {
            self.buf.put_u8((value as u8 & 0x7f) | 0x80);
            value >>= 7;
        }
        self.buf.put_u8(value as u8);
    }

    /// Zig-zag encoded signed 32-bit varint.
    pub fn put_varint(&mut self, value: i32) {
        self.put_uvarint(zigzag_encode_i32(value));
    }

    /// Zig-zag encoded signed 64-bit varint.
    pub fn put_varlong(&mut self, value: i64) {
        self.put_uvarint(zigzag_encode_i64(value));
    }

    /// Varint length-prefixed bytes, -1 for null. Used inside records.
    pub fn put_varint_bytes(&mut self, value: Option<&[u8]>) -> Result<()> {
        match value {
            Some(b) => {
                check_len("varint bytes", b.len(), i32::MAX as usize)?;
                self.put_varint(b.len() as i32);
                self.buf.put_slice(b);
            }
            None => self.put_varint(-1),
        }
        Ok(())
    }

    pub fn put_varint_string(&mut self, value: &str) -> Result<()> {
        self.put_varint_bytes(Some(value.as_bytes()))
    }

    pub fn put_compact_string(&mut self, value: &str) -> Result<()> {
        check_len("compact string", value.len(), i16::MAX as usize)?;
        self.put_uvarint(value.len() as u64 + 1);
        self.buf.put_slice(value.as_bytes());
        Ok(())
    }

    pub fn put_compact_nullable_string(&mut self, value: Option<&str>) -> Result<()> {
        match value {
            Some(s) => self.put_compact_string(s),
            None => {
                self.put_uvarint(0);
                Ok(())
            }
        }
    }

    pub fn put_compact_bytes(&mut self, value: &[u8]) -> Result<()> {
        check_len("compact bytes", value.len(), i32::MAX as usize - 1)?;
        self.put_uvarint(value.len() as u64 + 1);
        self.buf.put_slice(value);
        Ok(())
    }

    pub fn put_compact_nullable_bytes(&mut self, value: Option<&[u8]>) -> Result<()> {
        match value {
            Some(b) => self.put_compact_bytes(b),
            None => {
                self.put_uvarint(0);
                Ok(())
            }
        }
    }

    pub fn put_compact_array_len(&mut self, len: Option<usize>) -> Result<()> {
        match len {
            Some(n) => {
                check_len("compact array", n, i32::MAX as usize - 1)?;
                self.put_uvarint(n as u64 + 1);
            }
            None => self.put_uvarint(0),
        }
        Ok(())
    }

    /// Empty tagged-field section of a flexible version.
    pub fn put_empty_tagged_fields(&mut self) {
        self.put_uvarint(0);
    }

    /// Reserve a CRC-32C field. Everything written until the matching
    /// [`pop_crc32c`](Self::pop_crc32c) is covered by it.
    pub fn push_crc32c(&mut self) {
        self.crc_spans.push(self.buf.len());
        self.buf.put_u32(0);
    }

    /// Close the innermost CRC span and patch the checksum in.
    pub fn pop_crc32c(&mut self) -> Result<u32> {
        let field = self
            .crc_spans
            .pop()
            .ok_or_else(|| CodecError::InvalidFormat("no open crc span".to_string()))?;
        let crc = crc32c::crc32c(&self.buf[field + 4..]);
        self.buf[field..field + 4].copy_from_slice(&crc.to_be_bytes());
        Ok(crc)
    }

    /// Reserve an int32 length covering everything written until the matching
    /// [`pop_length`](Self::pop_length).
    pub fn push_length(&mut self) {
        self.length_spans.push(self.buf.len());
        self.buf.put_i32(0);
    }

    pub fn pop_length(&mut self) -> Result<i32> {
        let field = self
            .length_spans
            .pop()
            .ok_or_else(|| CodecError::InvalidFormat("no open length span".to_string()))?;
        let len = self.buf.len() - field - 4;
        check_len("length span", len, i32::MAX as usize)?;
        let len = len as i32;
        self.buf[field..field + 4].copy_from_slice(&len.to_be_bytes());
        Ok(len)
    }
}

// ============================================================================
// DECODER
// ============================================================================

/// Cursor over a borrowed byte slice.
///
/// Every getter checks the remaining length first, so truncated input fails
/// with [`CodecError::InsufficientData`] rather than panicking.
#[derive(Debug)]
pub struct PacketDecoder<'a> {
    buf: &'a [u8],
    pos: usize,
    crc_spans: Vec<(usize, u32)>,
}

impl<'a> PacketDecoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            crc_spans: Vec::new(),
        }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// The unread tail of the buffer, without consuming it.
    pub fn remaining_slice(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    fn ensure(&self, needed: usize) -> Result<()> {
        let available = self.remaining();
        if available < needed {
            return Err(CodecError::InsufficientData { needed, available });
        }
        Ok(())
    }

    /// Consume `n` bytes without copying.
    pub fn get_raw(&mut self, n: usize) -> Result<&'a [u8]> {
        self.ensure(n)?;
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.get_raw(n).map(|_| ())
    }

    fn get_array_of<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.get_raw(N)?);
        Ok(out)
    }

    pub fn get_i8(&mut self) -> Result<i8> {
        Ok(i8::from_be_bytes(self.get_array_of::<1>()?))
    }

    pub fn get_i16(&mut self) -> Result<i16> {
        Ok(i16::from_be_bytes(self.get_array_of::<2>()?))
    }

    pub fn get_i32(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes(self.get_array_of::<4>()?))
    }

    pub fn get_i64(&mut self) -> Result<i64> {
        Ok(i64::from_be_bytes(self.get_array_of::<8>()?))
    }

    pub fn get_u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.get_array_of::<4>()?))
    }

    pub fn get_bool(&mut self) -> Result<bool> {
        Ok(self.get_i8()? != 0)
    }

    fn utf8(bytes: &[u8]) -> Result<String> {
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| CodecError::InvalidUtf8)
    }

    pub fn get_string(&mut self) -> Result<String> {
        let len = self.get_i16()?;
        if len < 0 {
            return Err(CodecError::InvalidLength {
                kind: "string",
                length: len as i64,
            });
        }
        let bytes = self.get_raw(len as usize)?;
        Self::utf8(bytes)
    }

    pub fn get_nullable_string(&mut self) -> Result<Option<String>> {
        let len = self.get_i16()?;
        match len {
            -1 => Ok(None),
            n if n < 0 => Err(CodecError::InvalidLength {
                kind: "nullable string",
                length: n as i64,
            }),
            n => Self::utf8(self.get_raw(n as usize)?).map(Some),
        }
    }

    pub fn get_bytes(&mut self) -> Result<Bytes> {
        let len = self.get_i32()?;
        if len < 0 {
            return Err(CodecError::InvalidLength {
                kind: "bytes",
                length: len as i64,
            });
        }
        Ok(Bytes::copy_from_slice(self.get_raw(len as usize)?))
    }

    pub fn get_nullable_bytes(&mut self) -> Result<Option<Bytes>> {
        let len = self.get_i32()?;
        match len {
            -1 => Ok(None),
            n if n < 0 => Err(CodecError::InvalidLength {
                kind: "nullable bytes",
                length: n as i64,
            }),
            n => Ok(Some(Bytes::copy_from_slice(self.get_raw(n as usize)?))),
        }
    }

    /// Every array element occupies at least one byte, so a count larger than
    /// the remaining input can only be garbage.
    fn check_count(&self, kind: &'static str, count: i64) -> Result<usize> {
        if count < 0 || count as u64 > self.remaining() as u64 {
            return Err(CodecError::InvalidLength {
                kind,
                length: count,
            });
        }
        Ok(count as usize)
    }

    pub fn get_array_len(&mut self) -> Result<usize> {
        let count = self.get_i32()?;
        self.check_count("array", count as i64)
    }

    pub fn get_nullable_array_len(&mut self) -> Result<Option<usize>> {
        let count = self.get_i32()?;
        if count == -1 {
            return Ok(None);
        }
        self.check_count("nullable array", count as i64).map(Some)
    }

    pub fn get_array<T, F>(&mut self, mut f: F) -> Result<Vec<T>>
    where
        F: FnMut(&mut Self) -> Result<T>,
    {
        let count = self.get_array_len()?;
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            items.push(f(self)?);
        }
        Ok(items)
    }

    pub fn get_nullable_array<T, F>(&mut self, mut f: F) -> Result<Option<Vec<T>>>
    where
        F: FnMut(&mut Self) -> Result<T>,
    {
        let Some(count) = self.get_nullable_array_len()? else {
            return Ok(None);
        };
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            items.push(f(self)?);
        }
        Ok(Some(items))
    }

    pub fn get_string_array(&mut self) -> Result<Vec<String>> {
        self.get_array(|dec| dec.get_string())
    }

    pub fn get_i32_array(&mut self) -> Result<Vec<i32>> {
        self.get_array(|dec| dec.get_i32())
    }

    pub fn get_uvarint(&mut self) -> Result<u64> {
        let mut value = 0u64;
        for i in 0..MAX_UVARINT_BYTES {
            let byte = self.get_raw(1)?[0];
            let bits = (byte & 0x7f) as u64;
            if i == MAX_UVARINT_BYTES - 1 && bits > 1 {
                return Err(CodecError::InvalidVarint);
            }
            value |= bits << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(CodecError::InvalidVarint)
    }

    pub fn get_varint(&mut self) -> Result<i32> {
        let raw = self.get_uvarint()?;
        if raw > u32::MAX as u64 {
            return Err(CodecError::InvalidVarint);
        }
        let raw = raw as u32;
        Ok((raw >> 1) as i32 ^ -((raw & 1) as i32))
    }

    pub fn get_varlong(&mut self) -> Result<i64> {
        let raw = self.get_uvarint()?;
        Ok((raw >> 1) as i64 ^ -((raw & 1) as i64))
    }

    pub fn get_varint_bytes(&mut self) -> Result<Option<Bytes>> {
        let len = self.get_varint()?;
        match len {
            -1 => Ok(None),
            n if n < 0 => Err(CodecError::InvalidLength {
                kind: "varint bytes",
                length: n as i64,
            }),
            n => Ok(Some(Bytes::copy_from_slice(self.get_raw(n as usize)?))),
        }
    }

    pub fn get_varint_string(&mut self) -> Result<String> {
        let len = self.get_varint()?;
        if len < 0 {
            return Err(CodecError::InvalidLength {
                kind: "varint string",
                length: len as i64,
            });
        }
        Self::utf8(self.get_raw(len as usize)?)
    }

    /// Compact length: 0 is null, otherwise `n + 1`.
    fn get_compact_len(&mut self, kind: &'static str) -> Result<Option<usize>> {
        let raw = self.get_uvarint()?;
        if raw == 0 {
            return Ok(None);
        }
        let len = raw - 1;
        if len > i32::MAX as u64 {
            return Err(CodecError::InvalidLength {
                kind,
                length: len as i64,
            });
        }
        Ok(Some(len as usize))
    }

    pub fn get_compact_string(&mut self) -> Result<String> {
        match self.get_compact_len("compact string")? {
            Some(len) => Self::utf8(self.get_raw(len)?),
            None => Err(CodecError::InvalidLength {
                kind: "compact string",
                length: -1,
            }),
        }
    }

    pub fn get_compact_nullable_string(&mut self) -> Result<Option<String>> {
        match self.get_compact_len("compact nullable string")? {
            Some(len) => Self::utf8(self.get_raw(len)?).map(Some),
            None => Ok(None),
        }
    }

    pub fn get_compact_bytes(&mut self) -> Result<Bytes> {
        match self.get_compact_len("compact bytes")? {
            Some(len) => Ok(Bytes::copy_from_slice(self.get_raw(len)?)),
            None => Err(CodecError::InvalidLength {
                kind: "compact bytes",
                length: -1,
            }),
        }
    }

    pub fn get_compact_nullable_bytes(&mut self) -> Result<Option<Bytes>> {
        match self.get_compact_len("compact nullable bytes")? {
            Some(len) => Ok(Some(Bytes::copy_from_slice(self.get_raw(len)?))),
            None => Ok(None),
        }
    }

    pub fn get_compact_array_len(&mut self) -> Result<Option<usize>> {
        match self.get_compact_len("compact array")? {
            Some(count) => self
                .check_count("compact array", count as i64)
                .map(Some),
            None => Ok(None),
        }
    }

    /// Skip a tagged-field section. Unknown tags are ignored.
    pub fn skip_tagged_fields(&mut self) -> Result<()> {
        let count = self.get_uvarint()?;
        for _ in 0..count {
            let _tag = self.get_uvarint()?;
            let size = self.get_uvarint()?;
            if size > self.remaining() as u64 {
                return Err(CodecError::InsufficientData {
                    needed: size as usize,
                    available: self.remaining(),
                });
            }
            self.skip(size as usize)?;
        }
        Ok(())
    }

    /// Read a stored CRC-32C and start the span it covers.
    pub fn push_crc32c(&mut self) -> Result<()> {
        let expected = self.get_u32()?;
        self.crc_spans.push((self.pos, expected));
        Ok(())
    }

    /// Close the innermost CRC span and verify everything read since the
    /// matching [`push_crc32c`](Self::push_crc32c).
    pub fn pop_crc32c(&mut self) -> Result<()> {
        let (start, expected) = self
            .crc_spans
            .pop()
            .ok_or_else(|| CodecError::InvalidFormat("no open crc span".to_string()))?;
        let actual = crc32c::crc32c(&self.buf[start..self.pos]);
        if actual != expected {
            return Err(CodecError::CrcMismatch { expected, actual });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(f: impl FnOnce(&mut PacketEncoder) -> Result<()>) -> Bytes {
        let mut enc = PacketEncoder::new();
        f(&mut enc).unwrap();
        enc.finish().unwrap()
    }

    #[test]
    fn test_string_encoding() {
        let bytes = encoded(|enc| enc.put_string("test-client"));
        assert_eq!(&bytes[..2], &[0x00, 0x0b]);
        assert_eq!(&bytes[2..], b"test-client");

        let mut dec = PacketDecoder::new(&bytes);
        assert_eq!(dec.get_string().unwrap(), "test-client");
        assert!(dec.is_empty());
    }

    #[test]
    fn test_nullable_string_three_states() {
        let bytes = encoded(|enc| {
            enc.put_nullable_string(None)?;
            enc.put_nullable_string(Some(""))?;
            enc.put_nullable_string(Some("gid"))
        });
        assert_eq!(&bytes[..4], &[0xff, 0xff, 0x00, 0x00]);

        let mut dec = PacketDecoder::new(&bytes);
        assert_eq!(dec.get_nullable_string().unwrap(), None);
        assert_eq!(dec.get_nullable_string().unwrap(), Some(String::new()));
        assert_eq!(dec.get_nullable_string().unwrap(), Some("gid".to_string()));
    }

    #[test]
    fn test_non_nullable_string_rejects_null_sentinel() {
        let mut dec = PacketDecoder::new(&[0xff, 0xff]);
        assert!(matches!(
            dec.get_string(),
            Err(CodecError::InvalidLength { length: -1, .. })
        ));
    }

    #[test]
    fn test_nullable_bytes_three_states() {
        let bytes = encoded(|enc| {
            enc.put_nullable_bytes(None)?;
            enc.put_nullable_bytes(Some(&[]))?;
            enc.put_nullable_bytes(Some(&[1, 2, 3]))
        });
        let mut dec = PacketDecoder::new(&bytes);
        assert_eq!(dec.get_nullable_bytes().unwrap(), None);
        assert_eq!(dec.get_nullable_bytes().unwrap(), Some(Bytes::new()));
        assert_eq!(
            dec.get_nullable_bytes().unwrap(),
            Some(Bytes::from_static(&[1, 2, 3]))
        );
    }

    #[test]
    fn test_string_too_long() {
        let long = "x".repeat(i16::MAX as usize + 1);
        let mut enc = PacketEncoder::new();
        assert!(matches!(
            enc.put_string(&long),
            Err(CodecError::ValueOutOfRange { field: "string", .. })
        ));
    }

    #[test]
    fn test_truncated_input() {
        let mut dec = PacketDecoder::new(&[0x00, 0x05, b'a', b'b']);
        assert!(matches!(
            dec.get_string(),
            Err(CodecError::InsufficientData {
                needed: 5,
                available: 2
            })
        ));

        let mut dec = PacketDecoder::new(&[0x00, 0x01]);
        assert!(matches!(
            dec.get_i32(),
            Err(CodecError::InsufficientData { .. })
        ));
    }

    #[test]
    fn test_array_count_larger_than_input() {
        let mut dec = PacketDecoder::new(&[0x7f, 0xff, 0xff, 0xff, 0x00]);
        assert!(matches!(
            dec.get_array_len(),
            Err(CodecError::InvalidLength { kind: "array", .. })
        ));
    }

    #[test]
    fn test_nullable_array() {
        let bytes = encoded(|enc| {
            enc.put_nullable_array::<i32, _>(None, |_, _| Ok(()))?;
            enc.put_i32_array(&[7, 8])
        });
        let mut dec = PacketDecoder::new(&bytes);
        assert_eq!(dec.get_nullable_array_len().unwrap(), None);
        assert_eq!(dec.get_i32_array().unwrap(), vec![7, 8]);
    }

    #[test]
    fn test_varint_zigzag() {
        let cases: &[(i32, &[u8])] = &[
            (0, &[0x00]),
            (-1, &[0x01]),
            (1, &[0x02]),
            (-64, &[0x7f]),
            (64, &[0x80, 0x01]),
            (300, &[0xd8, 0x04]),
        ];
        for (value, wire) in cases {
            let bytes = encoded(|enc| {
                enc.put_varint(*value);
                Ok(())
            });
            assert_eq!(&bytes[..], *wire, "encoding {}", value);
            assert_eq!(PacketDecoder::new(wire).get_varint().unwrap(), *value);
        }

        for value in [i64::MIN, -1, 0, 1, i64::MAX] {
            let bytes = encoded(|enc| {
                enc.put_varlong(value);
                Ok(())
            });
            assert_eq!(PacketDecoder::new(&bytes).get_varlong().unwrap(), value);
        }
    }

    #[test]
    fn test_malformed_varint() {
        let mut dec = PacketDecoder::new(&[0xff; 11]);
        assert!(matches!(dec.get_uvarint(), Err(CodecError::InvalidVarint)));

        let mut dec = PacketDecoder::new(&[0x80, 0x80]);
        assert!(matches!(
            dec.get_uvarint(),
            Err(CodecError::InsufficientData { .. })
        ));
    }

    #[test]
    fn test_compact_forms() {
        let bytes = encoded(|enc| {
            enc.put_compact_string("abc")?;
            enc.put_compact_nullable_string(None)?;
            enc.put_compact_bytes(&[9])?;
            enc.put_compact_array_len(Some(2))?;
            enc.put_empty_tagged_fields();
            Ok(())
        });
        assert_eq!(bytes[0], 4);

        let mut dec = PacketDecoder::new(&bytes);
        assert_eq!(dec.get_compact_string().unwrap(), "abc");
        assert_eq!(dec.get_compact_nullable_string().unwrap(), None);
        assert_eq!(&dec.get_compact_bytes().unwrap()[..], &[9]);
        // Only the tagged-field byte follows, so a count of 2 is rejected.
        assert!(dec.get_compact_array_len().is_err());
    }

    #[test]
    fn test_skip_tagged_fields() {
        // two tags: (0, 2 bytes), (5, 0 bytes), then a trailing i8
        let wire = [0x02, 0x00, 0x02, 0xaa, 0xbb, 0x05, 0x00, 0x7f];
        let mut dec = PacketDecoder::new(&wire);
        dec.skip_tagged_fields().unwrap();
        assert_eq!(dec.get_i8().unwrap(), 0x7f);
    }

    #[test]
    fn test_crc_span_round_trip() {
        let mut enc = PacketEncoder::new();
        enc.put_i8(2);
        enc.push_crc32c();
        enc.put_string("payload").unwrap();
        let crc = enc.pop_crc32c().unwrap();
        let bytes = enc.finish().unwrap();
        assert_eq!(crc, crc32c::crc32c(&bytes[5..]));

        let mut dec = PacketDecoder::new(&bytes);
        dec.get_i8().unwrap();
        dec.push_crc32c().unwrap();
        dec.get_string().unwrap();
        dec.pop_crc32c().unwrap();

        let mut corrupted = bytes.to_vec();
        let last = corrupted.len() - 1;
        corrupted[last] ^= 0xff;
        let mut dec = PacketDecoder::new(&corrupted);
        dec.get_i8().unwrap();
        dec.push_crc32c().unwrap();
        dec.get_string().unwrap();
        assert!(matches!(
            dec.pop_crc32c(),
            Err(CodecError::CrcMismatch { .. })
        ));
    }

    #[test]
    fn test_length_span() {
        let mut enc = PacketEncoder::new();
        enc.push_length();
        enc.put_i64(1);
        enc.put_i16(2);
        assert_eq!(enc.pop_length().unwrap(), 10);
        let bytes = enc.finish().unwrap();
        assert_eq!(&bytes[..4], &[0, 0, 0, 10]);
    }

    #[test]
    fn test_unbalanced_spans() {
        let mut enc = PacketEncoder::new();
        assert!(enc.pop_crc32c().is_err());
        enc.push_length();
        assert!(enc.finish().is_err());
    }
}
