//! The writer contract shared by every layer.

use std::io::Read;

use enumset::{EnumSet, EnumSetType};

use crate::status::{Status, StreamResult};

/// Absolute byte position within a stream.
pub type Position = u64;

/// How far [`Writer::flush`] must surface buffered bytes.
///
/// The scopes are ordered: each one implies the weaker ones.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum FlushType {
    /// Only this layer publishes its bytes to the layer below.
    FromObject,
    /// Every layer publishes, down to the operating system.
    FromProcess,
    /// The operating system is asked to persist to stable storage.
    FromMachine,
}

/// Optional operations a writer supports, queried dynamically.
///
/// A composed writer reports a flag only if its inner writer reports it and
/// the layer itself preserves it.
#[derive(EnumSetType, Debug)]
pub enum Capability {
    /// [`Writer::seek`] moves the position.
    RandomAccess,
    /// [`Writer::size`] reports the stream size.
    QuerySize,
    /// [`Writer::truncate`] shortens the stream.
    Truncate,
    /// [`Writer::read_mode`] turns the destination into a reader.
    ReadMode,
    /// The writer would rather receive copies than lend out its window.
    PrefersCopying,
}

/// A push-oriented byte destination.
///
/// Every writer exposes a movable window into memory it owns or borrows:
/// [`push`](Self::push) returns at least `min_length` writable bytes and
/// [`advance`](Self::advance) commits a prefix of them to the stream.
/// [`write`](Self::write) and friends are conveniences over the same window,
/// with a slow path for requests the window cannot satisfy. Layers compose
/// because a writer's destination is itself a writer.
///
/// After a failure every operation short-circuits with the latched status;
/// see [`healthy`](Self::healthy) and [`status`](Self::status). Operations a
/// writer does not advertise through [`capabilities`](Self::capabilities)
/// report [`StatusCode::Unimplemented`](crate::StatusCode::Unimplemented)
/// without latching.
pub trait Writer {
    /// Makes the window at least `min_length` bytes long and returns it.
    ///
    /// `recommended` hints at how many bytes the caller intends to produce;
    /// zero means no preference. Bytes placed in the window do not become
    /// part of the stream until committed with [`advance`](Self::advance).
    fn push(&mut self, min_length: usize, recommended: usize) -> StreamResult<&mut [u8]>;

    /// Commits the first `n` bytes of the window returned by the last
    /// [`push`](Self::push).
    fn advance(&mut self, n: usize);

    /// Bytes that can still be committed without another push.
    fn available(&self) -> usize;

    /// Appends `bytes` to the stream.
    fn write(&mut self, mut bytes: &[u8]) -> StreamResult<()> {
        while !bytes.is_empty() {
            let window = self.push(1, bytes.len())?;
            let n = window.len().min(bytes.len());
            window[..n].copy_from_slice(&bytes[..n]);
            self.advance(n);
            bytes = &bytes[n..];
        }
        Ok(())
    }

    /// Appends every chunk in order, as if concatenated.
    fn write_chunks(&mut self, chunks: &[&[u8]]) -> StreamResult<()> {
        for chunk in chunks {
            self.write(chunk)?;
        }
        Ok(())
    }

    /// Appends `n` zero bytes.
    fn write_zeros(&mut self, mut n: u64) -> StreamResult<()> {
        while n > 0 {
            let want = n.min(4096) as usize;
            let window = self.push(1, want)?;
            let take = window.len().min(want);
            window[..take].fill(0);
            self.advance(take);
            n -= take as u64;
        }
        Ok(())
    }

    /// Surfaces buffered bytes as far as `flush_type` requires.
    fn flush(&mut self, flush_type: FlushType) -> StreamResult<()>;

    /// The logical position: every committed byte counts once.
    ///
    /// Non-decreasing across every operation except [`seek`](Self::seek).
    fn pos(&self) -> Position;

    fn capabilities(&self) -> EnumSet<Capability>;

    /// Moves the logical position. Requires [`Capability::RandomAccess`].
    fn seek(&mut self, new_pos: Position) -> StreamResult<()> {
        let _ = new_pos;
        Err(Status::unimplemented("this writer does not support seeking"))
    }

    /// The total stream size. Requires [`Capability::QuerySize`].
    fn size(&mut self) -> StreamResult<Position> {
        Err(Status::unimplemented("this writer does not support size queries"))
    }

    /// Shortens the stream to `new_size` bytes. Requires
    /// [`Capability::Truncate`].
    fn truncate(&mut self, new_size: Position) -> StreamResult<()> {
        let _ = new_size;
        Err(Status::unimplemented("this writer does not support truncation"))
    }

    /// Synchronizes the stream and returns a reader over it, positioned at
    /// `initial_pos`. Requires [`Capability::ReadMode`].
    fn read_mode(&mut self, initial_pos: Position) -> StreamResult<&mut dyn Read> {
        let _ = initial_pos;
        Err(Status::unimplemented("this writer does not support read mode"))
    }

    /// Synchronizes all layers and closes the writer.
    ///
    /// Idempotent: a second call reports the same outcome as the first. If
    /// the writer owns its destination, closing cascades; a borrowed
    /// destination is left intact.
    fn close(&mut self) -> StreamResult<()>;

    /// True while open with no failure latched.
    fn healthy(&self) -> bool;

    /// The latched failure, if any.
    fn status(&self) -> Option<&Status>;
}

/// A writer-owned window: a growable buffer, the commit cursor, and the
/// absolute stream position of the buffer's first byte.
///
/// Invariants: `pos() = start_pos + cursor` and the cursor never passes the
/// buffer end. [`sync`](Self::sync) publishes the filled prefix, which is the
/// single point where position arithmetic can overflow.
#[derive(Debug, Default)]
pub(crate) struct Window {
    buf: Vec<u8>,
    cursor: usize,
    start_pos: Position,
}

impl Window {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: vec![0; capacity],
            cursor: 0,
            start_pos: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn available(&self) -> usize {
        self.buf.len() - self.cursor
    }

    /// Bytes filled since the last sync.
    pub fn start_to_cursor(&self) -> usize {
        self.cursor
    }

    pub fn pos(&self) -> Position {
        self.start_pos.saturating_add(self.cursor as u64)
    }

    pub fn window(&mut self) -> &mut [u8] {
        &mut self.buf[self.cursor..]
    }

    pub fn advance(&mut self, n: usize) {
        debug_assert!(
            n <= self.available(),
            "advanced {n} bytes past a {}-byte window",
            self.available()
        );
        self.cursor = (self.cursor + n).min(self.buf.len());
    }

    pub fn filled(&self) -> &[u8] {
        &self.buf[..self.cursor]
    }

    /// Grows the buffer until at least `min_length.max(recommended)` bytes
    /// are available. Never shrinks.
    pub fn grow(&mut self, min_length: usize, recommended: usize) {
        let want = self.cursor.saturating_add(min_length.max(recommended));
        if self.buf.len() < want {
            self.buf.resize(want, 0);
        }
    }

    /// Publishes the filled prefix: the caller has delivered it, and the
    /// window restarts at the advanced position.
    pub fn sync(&mut self) -> StreamResult<()> {
        self.start_pos = self
            .start_pos
            .checked_add(self.cursor as u64)
            .ok_or_else(|| Status::resource_exhausted("stream position overflow"))?;
        self.cursor = 0;
        Ok(())
    }

    /// Accounts for bytes that bypassed the window entirely.
    pub fn advance_start_pos(&mut self, n: u64) -> StreamResult<()> {
        debug_assert_eq!(self.cursor, 0, "bypass write with a non-empty window");
        self.start_pos = self
            .start_pos
            .checked_add(n)
            .ok_or_else(|| Status::resource_exhausted("stream position overflow"))?;
        Ok(())
    }
}
