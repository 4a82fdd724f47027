//! Record batches (magic v2)
//!
//! ```text
//! RecordBatch =>
//!   base_offset            int64
//!   batch_length           int32   (bytes after this field)
//!   partition_leader_epoch int32
//!   magic                  int8    (2)
//!   crc                    uint32  (CRC-32C of everything after this field)
//!   attributes             int16
//!   last_offset_delta      int32
//!   first_timestamp        int64
//!   max_timestamp          int64
//!   producer_id            int64
//!   producer_epoch         int16
//!   base_sequence          int32
//!   records                [Record] (int32 count)
//!
//! Record =>
//!   length varint, attributes int8, timestamp_delta varlong,
//!   offset_delta varint, key varbytes, value varbytes,
//!   headers [key varstring, value varbytes] (varint count)
//! ```
//!
//! Only uncompressed batches are supported.

use bytes::Bytes;
use tracing::debug;

use super::codec::{CodecError, PacketDecoder, PacketEncoder, Result};

pub const MAGIC_V2: i8 = 2;

const COMPRESSION_MASK: i16 = 0x07;
const TRANSACTIONAL_FLAG: i16 = 0x10;
const CONTROL_FLAG: i16 = 0x20;

/// base_offset + batch_length
const BATCH_PREFIX: usize = 12;
/// Fixed bytes after batch_length, up to and including the record count.
const BATCH_HEADER_AFTER_LENGTH: usize = 4 + 1 + 4 + 2 + 4 + 8 + 8 + 8 + 2 + 4 + 4;
/// Offset of the magic byte from the start of a batch.
const MAGIC_OFFSET: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RecordHeader {
    pub key: String,
    pub value: Option<Bytes>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Record {
    pub attributes: i8,
    pub timestamp_delta: i64,
    pub offset_delta: i32,
    pub key: Option<Bytes>,
    pub value: Option<Bytes>,
    pub headers: Vec<RecordHeader>,
}

impl Record {
    pub fn new(key: Option<Bytes>, value: Option<Bytes>) -> Self {
        Self {
            key,
            value,
            ..Self::default()
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: Option<Bytes>) -> Self {
        self.headers.push(RecordHeader {
            key: key.into(),
            value,
        });
        self
    }

    fn encode_body(&self, enc: &mut PacketEncoder) -> Result<()> {
        enc.put_i8(self.attributes);
        enc.put_varlong(self.timestamp_delta);
        enc.put_varint(self.offset_delta);
        enc.put_varint_bytes(self.key.as_deref())?;
        enc.put_varint_bytes(self.value.as_deref())?;
        if self.headers.len() > i32::MAX as usize {
            return Err(CodecError::ValueOutOfRange {
                field: "record headers",
                value: self.headers.len() as i64,
            });
        }
        enc.put_varint(self.headers.len() as i32);
        for header in &self.headers {
            enc.put_varint_string(&header.key)?;
            enc.put_varint_bytes(header.value.as_deref())?;
        }
        Ok(())
    }

    fn encode(&self, enc: &mut PacketEncoder) -> Result<()> {
        let mut body = PacketEncoder::new();
        self.encode_body(&mut body)?;
        let body = body.finish()?;
        if body.len() > i32::MAX as usize {
            return Err(CodecError::ValueOutOfRange {
                field: "record length",
                value: body.len() as i64,
            });
        }
        enc.put_varint(body.len() as i32);
        enc.put_raw(&body);
        Ok(())
    }

    fn decode(dec: &mut PacketDecoder<'_>) -> Result<Self> {
        let length = dec.get_varint()?;
        if length < 0 {
            return Err(CodecError::InvalidLength {
                kind: "record",
                length: length as i64,
            });
        }
        let mut body = PacketDecoder::new(dec.get_raw(length as usize)?);

        let attributes = body.get_i8()?;
        let timestamp_delta = body.get_varlong()?;
        let offset_delta = body.get_varint()?;
        let key = body.get_varint_bytes()?;
        let value = body.get_varint_bytes()?;
        let header_count = body.get_varint()?;
        if header_count < 0 || header_count as usize > body.remaining() {
            return Err(CodecError::InvalidLength {
                kind: "record headers",
                length: header_count as i64,
            });
        }
        let mut headers = Vec::with_capacity(header_count as usize);
        for _ in 0..header_count {
            headers.push(RecordHeader {
                key: body.get_varint_string()?,
                value: body.get_varint_bytes()?,
            });
        }
        if !body.is_empty() {
            return Err(CodecError::InvalidFormat(format!(
                "{} bytes left over in record",
                body.remaining()
            )));
        }

        Ok(Self {
            attributes,
            timestamp_delta,
            offset_delta,
            key,
            value,
            headers,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordBatch {
    pub base_offset: i64,
    pub partition_leader_epoch: i32,
    pub attributes: i16,
    pub last_offset_delta: i32,
    pub first_timestamp: i64,
    pub max_timestamp: i64,
    pub producer_id: i64,
    pub producer_epoch: i16,
    pub base_sequence: i32,
    pub records: Vec<Record>,
}

impl RecordBatch {
    /// An empty, non-transactional batch whose records are timed relative to
    /// `first_timestamp` (milliseconds since the epoch).
    pub fn new(first_timestamp: i64) -> Self {
        Self {
            base_offset: 0,
            partition_leader_epoch: -1,
            attributes: 0,
            last_offset_delta: -1,
            first_timestamp,
            max_timestamp: first_timestamp,
            producer_id: -1,
            producer_epoch: -1,
            base_sequence: -1,
            records: Vec::new(),
        }
    }

    /// Append a record, assigning the next offset delta.
    pub fn push(&mut self, mut record: Record) {
        record.offset_delta = self.records.len() as i32;
        self.last_offset_delta = record.offset_delta;
        self.max_timestamp = self
            .max_timestamp
            .max(self.first_timestamp + record.timestamp_delta);
        self.records.push(record);
    }

    pub fn compression(&self) -> i16 {
        self.attributes & COMPRESSION_MASK
    }

    pub fn is_transactional(&self) -> bool {
        self.attributes & TRANSACTIONAL_FLAG != 0
    }

    pub fn is_control(&self) -> bool {
        self.attributes & CONTROL_FLAG != 0
    }

    /// Offset following the last record of this batch.
    pub fn next_offset(&self) -> i64 {
        self.base_offset + self.last_offset_delta as i64 + 1
    }

    /// `(offset, timestamp, record)` for every record.
    pub fn iter_with_offsets(&self) -> impl Iterator<Item = (i64, i64, &Record)> + '_ {
        self.records.iter().map(move |r| {
            (
                self.base_offset + r.offset_delta as i64,
                self.first_timestamp + r.timestamp_delta,
                r,
            )
        })
    }

    pub fn encode(&self, enc: &mut PacketEncoder) -> Result<()> {
        if self.compression() != 0 {
            return Err(CodecError::UnsupportedCompression(self.compression()));
        }
        enc.put_i64(self.base_offset);
        enc.push_length();
        enc.put_i32(self.partition_leader_epoch);
        enc.put_i8(MAGIC_V2);
        enc.push_crc32c();
        enc.put_i16(self.attributes);
        enc.put_i32(self.last_offset_delta);
        enc.put_i64(self.first_timestamp);
        enc.put_i64(self.max_timestamp);
        enc.put_i64(self.producer_id);
        enc.put_i16(self.producer_epoch);
        enc.put_i32(self.base_sequence);
        enc.put_array(&self.records, |enc, record| record.encode(enc))?;
        enc.pop_crc32c()?;
        enc.pop_length()?;
        Ok(())
    }

    pub fn encode_to_bytes(&self) -> Result<Bytes> {
        let mut enc = PacketEncoder::with_capacity(BATCH_PREFIX + BATCH_HEADER_AFTER_LENGTH);
        self.encode(&mut enc)?;
        enc.finish()
    }

    /// Decode one complete batch, verifying its CRC.
    pub fn decode(dec: &mut PacketDecoder<'_>) -> Result<Self> {
        let base_offset = dec.get_i64()?;
        let batch_length = dec.get_i32()?;
        if batch_length < BATCH_HEADER_AFTER_LENGTH as i32 {
            return Err(CodecError::InvalidLength {
                kind: "record batch",
                length: batch_length as i64,
            });
        }
        let mut batch = PacketDecoder::new(dec.get_raw(batch_length as usize)?);

        let partition_leader_epoch = batch.get_i32()?;
        let magic = batch.get_i8()?;
        if magic != MAGIC_V2 {
            return Err(CodecError::InvalidFormat(format!(
                "record batch magic {} is not supported",
                magic
            )));
        }
        batch.push_crc32c()?;
        let attributes = batch.get_i16()?;
        if attributes & COMPRESSION_MASK != 0 {
            return Err(CodecError::UnsupportedCompression(attributes & COMPRESSION_MASK));
        }
        let last_offset_delta = batch.get_i32()?;
        let first_timestamp = batch.get_i64()?;
        let max_timestamp = batch.get_i64()?;
        let producer_id = batch.get_i64()?;
        let producer_epoch = batch.get_i16()?;
        let base_sequence = batch.get_i32()?;
        let records = batch.get_array(Record::decode)?;
        if !batch.is_empty() {
            return Err(CodecError::InvalidFormat(format!(
                "{} bytes left over in record batch",
                batch.remaining()
            )));
        }
        batch.pop_crc32c()?;

        Ok(Self {
            base_offset,
            partition_leader_epoch,
            attributes,
            last_offset_delta,
            first_timestamp,
            max_timestamp,
            producer_id,
            producer_epoch,
            base_sequence,
            records,
        })
    }

    /// Decode a concatenation of batches, as found in Fetch responses. A
    /// trailing partial batch is dropped: brokers cut responses at the size
    /// limit without regard to batch boundaries.
    pub fn decode_all(bytes: &[u8]) -> Result<Vec<RecordBatch>> {
        let mut dec = PacketDecoder::new(bytes);
        let mut batches = Vec::new();
        while dec.remaining() >= BATCH_PREFIX {
            let rest = dec.remaining_slice();
            let mut length = [0u8; 4];
            length.copy_from_slice(&rest[8..BATCH_PREFIX]);
            let batch_length = i32::from_be_bytes(length);
            if batch_length < 0 || rest.len() < BATCH_PREFIX + batch_length as usize {
                debug!(
                    remaining = rest.len(),
                    batch_length, "dropping partial trailing record batch"
                );
                break;
            }
            if rest.len() > MAGIC_OFFSET && rest[MAGIC_OFFSET] as i8 != MAGIC_V2 {
                return Err(CodecError::InvalidFormat(format!(
                    "record batch magic {} is not supported",
                    rest[MAGIC_OFFSET] as i8
                )));
            }
            batches.push(RecordBatch::decode(&mut dec)?);
        }
        Ok(batches)
    }
}
