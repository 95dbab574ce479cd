//! Framed-Snappy streams.
//!
//! The wire format follows the framing description shipped with the Snappy
//! reference implementation: a 10-byte stream identifier, then typed chunks
//! `{type: u8, len: u24 LE, payload}`. Data chunks carry a masked CRC-32C of
//! the uncompressed block ahead of the payload.

use byteorder::{ByteOrder, LE};
use enumset::EnumSet;
use log::warn;
use snap::raw::{max_compress_len, Decoder, Encoder};
use static_assertions::const_assert;

use crate::{
    dependency::Dependency,
    object::ObjectState,
    scratch::Scratch,
    status::{Status, StreamResult},
    writer::{Capability, FlushType, Position, Window, Writer},
};

/// First bytes of every framed-Snappy stream.
pub const STREAM_IDENTIFIER: &[u8] = b"\xff\x06\x00\x00sNaPpY";

/// Maximum number of uncompressed bytes in one data chunk.
pub const MAX_BLOCK_SIZE: usize = 65536;

/// Chunk types of the framing format.
///
/// Types `0x80..=0xfd` are skippable and tolerated by readers; `0x02..=0x7f`
/// are reserved and must be rejected.
pub mod chunk_type {
    /// Snappy-compressed data.
    pub const COMPRESSED: u8 = 0x00;
    /// Literal data.
    pub const UNCOMPRESSED: u8 = 0x01;
    /// Ignored filler.
    pub const PADDING: u8 = 0xfe;
    /// A repeated stream identifier.
    pub const STREAM_IDENTIFIER: u8 = 0xff;
}

// A maximal block plus its checksum must fit the 24-bit chunk length field.
const_assert!(4 + MAX_BLOCK_SIZE <= 0x00ff_ffff);

const CRC_MASK_DELTA: u32 = 0xa282_ead8;

/// Masked CRC-32C over `bytes`, as stored in data chunks.
pub fn masked_crc32c(bytes: &[u8]) -> u32 {
    let crc = crc32c::crc32c(bytes);
    (crc.wrapping_shr(15) | crc.wrapping_shl(17)).wrapping_add(CRC_MASK_DELTA)
}

/// Options for [`FramedSnappyWriter`].
#[derive(Debug, Clone, Default)]
pub struct FramedSnappyOptions {
    size_hint: Option<u64>,
}

impl FramedSnappyOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expected total number of uncompressed bytes, used to right-size the
    /// first block buffer.
    pub fn size_hint(self, size_hint: Option<u64>) -> Self {
        Self { size_hint }
    }
}

/// Writes a framed-Snappy encoding of the pushed bytes to an inner writer.
///
/// The window is an owned uncompressed block of at most [`MAX_BLOCK_SIZE`]
/// bytes; every boundary operation emits the block as one data chunk,
/// compressed when that makes it strictly smaller and literal otherwise.
/// Pushes larger than a block are satisfied from a scratch buffer and
/// replayed across blocks at the next boundary.
///
/// If the inner writer is at position 0 at construction, the stream
/// identifier is emitted first. The identifier is never re-emitted.
pub struct FramedSnappyWriter<'a, W: Writer> {
    state: ObjectState,
    inner: Dependency<'a, W>,
    window: Window,
    scratch: Option<Scratch>,
    enc: Encoder,
    compressed: Vec<u8>,
    initial_compressed_pos: Position,
}

impl<'a, W: Writer> FramedSnappyWriter<'a, W> {
    pub fn new(
        inner: impl Into<Dependency<'a, W>>,
        options: FramedSnappyOptions,
    ) -> StreamResult<Self> {
        let mut inner = inner.into();
        if inner.get().pos() == 0 {
            inner.get_mut().write(STREAM_IDENTIFIER)?;
        }
        let initial_compressed_pos = inner.get().pos();
        let capacity = match options.size_hint {
            Some(hint) => hint.min(MAX_BLOCK_SIZE as u64).max(1) as usize,
            None => MAX_BLOCK_SIZE,
        };
        Ok(Self {
            state: ObjectState::Open,
            inner,
            window: Window::with_capacity(capacity),
            scratch: None,
            enc: Encoder::new(),
            compressed: Vec::new(),
            initial_compressed_pos,
        })
    }

    /// The inner writer, for inspection.
    pub fn get_ref(&self) -> &W {
        self.inner.get()
    }

    /// Replays a filled scratch window through the regular block path.
    fn sync_scratch(&mut self) -> StreamResult<()> {
        if let Some(scratch) = self.scratch.take() {
            self.write_blocks(scratch.filled())?;
        }
        Ok(())
    }

    /// Emits the current block, leaving the window empty.
    fn push_internal(&mut self) -> StreamResult<()> {
        debug_assert!(self.scratch.is_none(), "push_internal under scratch");
        if self.window.start_to_cursor() == 0 {
            return Ok(());
        }
        let Self {
            state,
            inner,
            window,
            enc,
            compressed,
            initial_compressed_pos,
            ..
        } = self;
        emit_chunk(inner.get_mut(), enc, compressed, window.filled())
            .and_then(|()| window.sync())
            .map_err(|err| {
                let at = inner.get().pos().saturating_sub(*initial_compressed_pos);
                state.fail(err.annotate(format!("at compressed byte {at}")))
            })
    }

    fn write_blocks(&mut self, mut bytes: &[u8]) -> StreamResult<()> {
        while !bytes.is_empty() {
            // A whole block with an empty window goes out without a copy.
            if self.window.start_to_cursor() == 0 && bytes.len() >= MAX_BLOCK_SIZE {
                let (block, rest) = bytes.split_at(MAX_BLOCK_SIZE);
                let Self {
                    state,
                    inner,
                    window,
                    enc,
                    compressed,
                    initial_compressed_pos,
                    ..
                } = self;
                emit_chunk(inner.get_mut(), enc, compressed, block)
                    .and_then(|()| window.advance_start_pos(MAX_BLOCK_SIZE as u64))
                    .map_err(|err| {
                        let at = inner.get().pos().saturating_sub(*initial_compressed_pos);
                        state.fail(err.annotate(format!("at compressed byte {at}")))
                    })?;
                bytes = rest;
                continue;
            }
            if self.window.available() == 0 {
                self.push_internal()?;
                self.window.grow(1, MAX_BLOCK_SIZE);
            }
            let take = bytes.len().min(self.window.available());
            self.window.window()[..take].copy_from_slice(&bytes[..take]);
            self.window.advance(take);
            bytes = &bytes[take..];
        }
        Ok(())
    }
}

impl<W: Writer> Writer for FramedSnappyWriter<'_, W> {
    fn push(&mut self, min_length: usize, recommended: usize) -> StreamResult<&mut [u8]> {
        self.state.check_open()?;
        self.sync_scratch()?;
        if self.window.available() < min_length {
            self.push_internal()?;
            if min_length > MAX_BLOCK_SIZE {
                let scratch = self
                    .scratch
                    .insert(Scratch::with_capacity(min_length, recommended));
                return Ok(scratch.window());
            }
            self.window.grow(min_length, MAX_BLOCK_SIZE);
        }
        Ok(self.window.window())
    }

    fn advance(&mut self, n: usize) {
        match &mut self.scratch {
            Some(scratch) => scratch.advance(n),
            None => self.window.advance(n),
        }
    }

    fn available(&self) -> usize {
        match &self.scratch {
            Some(scratch) => scratch.available(),
            None => self.window.available(),
        }
    }

    fn write(&mut self, bytes: &[u8]) -> StreamResult<()> {
        self.state.check_open()?;
        self.sync_scratch()?;
        self.write_blocks(bytes)
    }

    fn flush(&mut self, flush_type: FlushType) -> StreamResult<()> {
        self.state.check_open()?;
        self.sync_scratch()?;
        self.push_internal()?;
        if flush_type > FlushType::FromObject || self.inner.is_owning() {
            self.inner.get_mut().flush(flush_type)?;
        }
        Ok(())
    }

    fn pos(&self) -> Position {
        let scratched = self.scratch.as_ref().map_or(0, |s| s.len() as u64);
        self.window.pos().saturating_add(scratched)
    }

    fn capabilities(&self) -> EnumSet<Capability> {
        // A streaming compressor preserves nothing of its inner writer.
        Capability::PrefersCopying.into()
    }

    fn close(&mut self) -> StreamResult<()> {
        if self.state.is_open() {
            if self.state.healthy() {
                let _ = self.sync_scratch().and_then(|()| self.push_internal());
            }
            if self.inner.is_owning() {
                if let Err(err) = self.inner.get_mut().close() {
                    self.state.fail(err);
                }
            }
            self.state.mark_closed();
        }
        self.state.latched()
    }

    fn healthy(&self) -> bool {
        self.state.healthy() && self.inner.get().healthy()
    }

    fn status(&self) -> Option<&Status> {
        self.state.status().or_else(|| self.inner.get().status())
    }
}

impl<'a, W: Writer> Drop for FramedSnappyWriter<'a, W> {
    fn drop(&mut self) {
        if self.state.is_open() {
            if let Err(err) = self.close() {
                warn!("dropping an unclosed FramedSnappyWriter: {err}");
            }
        }
    }
}

/// Emits one data chunk for `src`.
fn emit_chunk<W: Writer + ?Sized>(
    inner: &mut W,
    enc: &mut Encoder,
    compressed: &mut Vec<u8>,
    src: &[u8],
) -> StreamResult<()> {
    debug_assert!(!src.is_empty() && src.len() <= MAX_BLOCK_SIZE);
    let crc = masked_crc32c(src);
    compressed.resize(max_compress_len(src.len()), 0);
    let compressed_len = enc.compress(src, compressed)?;
    let (ty, payload) = if compressed_len < src.len() {
        (chunk_type::COMPRESSED, &compressed[..compressed_len])
    } else {
        (chunk_type::UNCOMPRESSED, src)
    };
    let mut header = [0u8; 8];
    header[0] = ty;
    LE::write_u24(&mut header[1..4], (4 + payload.len()) as u32);
    LE::write_u32(&mut header[4..8], crc);
    inner.write_chunks(&[header.as_slice(), payload])
}

/// Decodes a complete framed-Snappy stream.
///
/// Padding and skippable chunks are ignored; reserved unskippable chunk
/// types and checksum mismatches are rejected.
pub fn decode(framed: &[u8]) -> StreamResult<Vec<u8>> {
    let Some(mut rest) = framed.strip_prefix(STREAM_IDENTIFIER) else {
        return Err(Status::invalid_argument(
            "missing framed-Snappy stream identifier",
        ));
    };
    let mut out = Vec::new();
    let mut dec = Decoder::new();
    while !rest.is_empty() {
        if rest.len() < 4 {
            return Err(Status::invalid_argument("truncated chunk header"));
        }
        let ty = rest[0];
        let len = LE::read_u24(&rest[1..4]) as usize;
        let payload = rest
            .get(4..4 + len)
            .ok_or_else(|| Status::invalid_argument("truncated chunk payload"))?;
        rest = &rest[4 + len..];
        match ty {
            chunk_type::COMPRESSED | chunk_type::UNCOMPRESSED => {
                if payload.len() < 4 {
                    return Err(Status::invalid_argument("data chunk too short for its CRC"));
                }
                let crc = LE::read_u32(&payload[..4]);
                let block = if ty == chunk_type::COMPRESSED {
                    dec.decompress_vec(&payload[4..])?
                } else {
                    payload[4..].to_vec()
                };
                if block.len() > MAX_BLOCK_SIZE {
                    return Err(Status::data_loss(format!(
                        "block of {} bytes passes the {MAX_BLOCK_SIZE}-byte limit",
                        block.len()
                    )));
                }
                if masked_crc32c(&block) != crc {
                    return Err(Status::data_loss("block checksum mismatch"));
                }
                out.extend_from_slice(&block);
            }
            chunk_type::PADDING => {}
            chunk_type::STREAM_IDENTIFIER => {
                if payload != &STREAM_IDENTIFIER[4..] {
                    return Err(Status::data_loss("malformed repeated stream identifier"));
                }
            }
            0x80..=0xfd => {}
            reserved => {
                return Err(Status::invalid_argument(format!(
                    "unskippable chunk type 0x{reserved:02x}"
                )));
            }
        }
    }
    Ok(out)
}
