//! Record chunks: many records in one decoded unit.
//!
//! A chunk is a little-endian [`ChunkHeader`] followed by a payload that
//! decodes to an ascending table of record end-offsets and a contiguous
//! values buffer. [`ChunkEncoder`] accumulates records and writes a chunk
//! through any [`Writer`]; [`ChunkDecoder`] reads the records back, either
//! as raw bytes or parsed as messages.

use std::{borrow::Cow, collections::BTreeSet, io::Cursor};

use binrw::{binrw, prelude::*};
use byteorder::{ByteOrder, LE};
use log::debug;
use prost::{
    encoding::{decode_key, skip_field, DecodeContext},
    Message,
};
use snap::raw::{max_compress_len, Decoder, Encoder};

use crate::{
    buffered::{BufferOptions, BufferedWriter},
    object::ObjectState,
    status::{Status, StreamResult},
    writer::Writer,
};

/// Kinds of chunk, stored in the first header byte.
pub mod chunk_kind {
    /// A chunk of concatenated records with an end-offset table.
    pub const RECORDS: u8 = 0x72;
    /// The stream's leading signature chunk; carries no records.
    pub const FILE_SIGNATURE: u8 = 0x73;
    /// Filler emitted for alignment; carries no records.
    pub const PADDING: u8 = 0x70;
}

/// Compression applied to a chunk's payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Compression {
    /// Raw Snappy over the whole payload.
    Snappy,
}

mod compression {
    pub const NONE: u8 = 0;
    pub const SNAPPY: u8 = 1;
}

/// Fixed-size chunk header, little-endian on the wire.
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkHeader {
    pub chunk_kind: u8,
    pub compression: u8,
    /// Size of the decoded payload: the end-offset table plus the values.
    pub data_size: u64,
    pub num_records: u64,
}

/// Serialized length of a [`ChunkHeader`].
pub const CHUNK_HEADER_LEN: usize = 18;

/// Records larger than 2 GiB cannot be parsed as messages.
const MAX_MESSAGE_LEN: usize = 2 * 1024 * 1024 * 1024;

/// Accumulates records and encodes them as one chunk.
#[derive(Debug, Default)]
pub struct ChunkEncoder {
    limits: Vec<u64>,
    values: Vec<u8>,
}

impl ChunkEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one record.
    pub fn add_record(&mut self, record: &[u8]) {
        self.values.extend_from_slice(record);
        self.limits.push(self.values.len() as u64);
    }

    /// Appends one record serialized from a message.
    pub fn add_message<M: Message>(&mut self, message: &M) -> StreamResult<()> {
        message
            .encode(&mut self.values)
            .map_err(|err| Status::resource_exhausted(err.to_string()))?;
        self.limits.push(self.values.len() as u64);
        Ok(())
    }

    pub fn num_records(&self) -> u64 {
        self.limits.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.limits.is_empty()
    }

    pub fn clear(&mut self) {
        self.limits.clear();
        self.values.clear();
    }

    /// Encodes the chunk through `dest`.
    pub fn encode<W: Writer + ?Sized>(
        &self,
        dest: &mut W,
        compression: Option<Compression>,
    ) -> StreamResult<()> {
        let header = ChunkHeader {
            chunk_kind: chunk_kind::RECORDS,
            compression: match compression {
                None => compression::NONE,
                Some(Compression::Snappy) => compression::SNAPPY,
            },
            data_size: 8 * self.limits.len() as u64 + self.values.len() as u64,
            num_records: self.limits.len() as u64,
        };
        let mut header_buf = Vec::new();
        Cursor::new(&mut header_buf).write_le(&header)?;
        dest.write(&header_buf)?;

        let mut table = vec![0u8; 8 * self.limits.len()];
        for (i, limit) in self.limits.iter().enumerate() {
            LE::write_u64(&mut table[8 * i..8 * (i + 1)], *limit);
        }
        match compression {
            None => dest.write_chunks(&[table.as_slice(), self.values.as_slice()]),
            Some(Compression::Snappy) => {
                let mut payload = table;
                payload.extend_from_slice(&self.values);
                let mut compressed = vec![0u8; max_compress_len(payload.len())];
                let compressed_len = Encoder::new().compress(&payload, &mut compressed)?;
                dest.write(&compressed[..compressed_len])
            }
        }
    }

    /// Encodes the chunk into a fresh byte vector.
    pub fn encode_to_vec(&self, compression: Option<Compression>) -> StreamResult<Vec<u8>> {
        let mut out: Vec<u8> = Vec::new();
        let mut dest: BufferedWriter<'_, Vec<u8>> =
            BufferedWriter::new(&mut out, BufferOptions::default());
        self.encode(&mut dest, compression)?;
        dest.close()?;
        drop(dest);
        Ok(out)
    }
}

/// Keeps only the listed top-level field numbers when parsing records as
/// messages. Raw record reads ignore the projection.
#[derive(Debug, Clone, Default)]
pub struct Projection {
    fields: BTreeSet<u32>,
}

impl Projection {
    pub fn new(fields: impl IntoIterator<Item = u32>) -> Self {
        Self {
            fields: fields.into_iter().collect(),
        }
    }

    pub fn contains(&self, field: u32) -> bool {
        self.fields.contains(&field)
    }

    /// Rewrites `record`, dropping fields outside the projection.
    fn project(&self, record: &[u8]) -> StreamResult<Vec<u8>> {
        let mut out = Vec::with_capacity(record.len());
        let mut rest = record;
        while !rest.is_empty() {
            let before = record.len() - rest.len();
            let (tag, wire_type) = decode_key(&mut rest)?;
            skip_field(wire_type, tag, &mut rest, DecodeContext::default())?;
            let after = record.len() - rest.len();
            if self.fields.contains(&tag) {
                out.extend_from_slice(&record[before..after]);
            }
        }
        Ok(out)
    }
}

/// Reads back the records of one chunk.
///
/// [`reset`](Self::reset) consumes a whole chunk; records then come out in
/// order. Raw reads cannot fail. Parsing a record as a message can latch a
/// recoverable data-loss failure, which [`recover`](Self::recover) clears by
/// leaving the cursor past the unparsable record.
#[derive(Debug, Default)]
pub struct ChunkDecoder {
    state: ObjectState,
    recoverable: bool,
    projection: Option<Projection>,
    limits: Vec<u64>,
    values: Vec<u8>,
    index: usize,
    values_pos: usize,
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts message-form reads to the fields of `projection`.
    pub fn with_projection(projection: Projection) -> Self {
        Self {
            projection: Some(projection),
            ..Self::default()
        }
    }

    /// Replaces the decoder's contents with the records of `chunk`.
    pub fn reset(&mut self, chunk: &[u8]) -> StreamResult<()> {
        self.state = ObjectState::Open;
        self.recoverable = false;
        self.limits.clear();
        self.values.clear();
        self.index = 0;
        self.values_pos = 0;
        if let Err(err) = self.parse(chunk) {
            self.limits.clear();
            self.values.clear();
            return Err(self.state.fail(err));
        }
        Ok(())
    }

    fn parse(&mut self, chunk: &[u8]) -> StreamResult<()> {
        let mut cursor = Cursor::new(chunk);
        let header: ChunkHeader = cursor.read_le()?;
        match header.chunk_kind {
            chunk_kind::RECORDS => {}
            chunk_kind::FILE_SIGNATURE | chunk_kind::PADDING => {
                return Err(Status::invalid_argument(format!(
                    "chunk kind 0x{:02x} carries no records",
                    header.chunk_kind
                )));
            }
            kind => {
                return Err(Status::invalid_argument(format!(
                    "unknown chunk kind 0x{kind:02x}"
                )));
            }
        }

        let payload = &chunk[cursor.position() as usize..];
        let decoded: Cow<'_, [u8]> = match header.compression {
            compression::NONE => Cow::Borrowed(payload),
            compression::SNAPPY => Cow::Owned(Decoder::new().decompress_vec(payload)?),
            other => {
                return Err(Status::invalid_argument(format!(
                    "unknown chunk compression {other}"
                )));
            }
        };
        if decoded.len() as u64 != header.data_size {
            return Err(Status::data_loss(format!(
                "chunk data size mismatch: header says {}, decoded {}",
                header.data_size,
                decoded.len()
            )));
        }

        let num_records = usize::try_from(header.num_records)
            .map_err(|_| Status::resource_exhausted("record count does not fit in memory"))?;
        let table_len = num_records
            .checked_mul(8)
            .filter(|len| *len as u64 <= header.data_size)
            .ok_or_else(|| {
                Status::invalid_argument("record count passes the chunk's own size")
            })?;
        let (table, values) = decoded.split_at(table_len);

        let values_size = values.len() as u64;
        let mut limits = Vec::with_capacity(num_records);
        let mut prev = 0u64;
        for entry in table.chunks_exact(8) {
            let limit = LE::read_u64(entry);
            if limit < prev || limit > values_size {
                return Err(Status::invalid_argument(
                    "record end-offsets are not ascending within the values",
                ));
            }
            prev = limit;
            limits.push(limit);
        }
        match limits.last() {
            Some(&last) if last != values_size => {
                return Err(Status::invalid_argument(format!(
                    "trailing values: last end-offset {last}, values size {values_size}"
                )));
            }
            None if values_size != 0 => {
                return Err(Status::invalid_argument("values present without records"));
            }
            _ => {}
        }

        self.limits = limits;
        self.values = values.to_vec();
        Ok(())
    }

    pub fn num_records(&self) -> usize {
        self.limits.len()
    }

    /// Index of the next record to read.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn healthy(&self) -> bool {
        self.state.healthy()
    }

    pub fn status(&self) -> Option<&Status> {
        self.state.status()
    }

    /// True if [`recover`](Self::recover) can clear the latched failure.
    pub fn recoverable(&self) -> bool {
        self.recoverable
    }

    /// Reads the next record as raw bytes.
    ///
    /// `None` means end of chunk, or a latched failure; the two are
    /// distinguished by [`healthy`](Self::healthy).
    pub fn read_record(&mut self) -> Option<&[u8]> {
        if !self.state.healthy() || self.index == self.limits.len() {
            return None;
        }
        let start = self.values_pos;
        let limit = self.limits[self.index] as usize;
        self.index += 1;
        self.values_pos = limit;
        Some(&self.values[start..limit])
    }

    /// Reads the next record parsed as a message, honoring the projection.
    ///
    /// `Ok(None)` is end of chunk. An unparsable record latches a
    /// recoverable data-loss failure; the cursor is already past the record,
    /// so [`recover`](Self::recover) continues with the next one.
    pub fn read_record_message<M: Message + Default>(&mut self) -> StreamResult<Option<M>> {
        self.state.check_open()?;
        if self.index == self.limits.len() {
            return Ok(None);
        }
        let start = self.values_pos;
        let limit = self.limits[self.index] as usize;
        let record_index = self.index;
        self.index += 1;
        self.values_pos = limit;

        let record = &self.values[start..limit];
        if record.len() > MAX_MESSAGE_LEN {
            return Err(self.state.fail(Status::resource_exhausted(format!(
                "record {record_index} of {} bytes passes the 2 GiB message limit",
                record.len()
            ))));
        }
        let parsed = match &self.projection {
            Some(projection) => projection
                .project(record)
                .and_then(|kept| M::decode(&kept[..]).map_err(Status::from)),
            None => M::decode(record).map_err(Status::from),
        };
        match parsed {
            Ok(message) => Ok(Some(message)),
            Err(err) => {
                self.recoverable = true;
                Err(self
                    .state
                    .fail(err.annotate(format!("record {record_index} is unparsable"))))
            }
        }
    }

    /// Clears a recoverable failure, leaving the cursor past the bad record.
    pub fn recover(&mut self) -> bool {
        if !self.recoverable {
            return false;
        }
        self.recoverable = false;
        self.state.recover();
        debug!(
            "recovered chunk decoder at record {} of {}",
            self.index,
            self.limits.len()
        );
        true
    }

    /// Positions the cursor before record `index`, clamped to the record
    /// count.
    pub fn set_index(&mut self, index: usize) -> StreamResult<()> {
        self.state.check_open()?;
        self.index = index.min(self.limits.len());
        self.values_pos = if self.index == 0 {
            0
        } else {
            self.limits[self.index - 1] as usize
        };
        Ok(())
    }
}
