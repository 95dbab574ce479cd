//! A full-capability in-memory destination for exercising writer stacks.
#![allow(dead_code)]

use std::io::{Cursor, Read};

use bytestack::{Capability, EnumSet, FlushType, ObjectState, Position, Status, StreamResult, Writer};

/// Writes into an owned byte vector, exposing the vector's memory directly
/// as the window. Supports every optional capability, which makes it the
/// inner writer of choice for capability-propagation tests.
pub struct MemWriter {
    state: ObjectState,
    buf: Vec<u8>,
    cursor: usize,
    end: usize,
    reading: Option<Cursor<Vec<u8>>>,
}

impl MemWriter {
    pub fn new() -> Self {
        Self {
            state: ObjectState::Open,
            buf: Vec::new(),
            cursor: 0,
            end: 0,
            reading: None,
        }
    }

    /// The bytes written so far.
    pub fn bytes(&self) -> &[u8] {
        &self.buf[..self.end]
    }
}

impl Writer for MemWriter {
    fn push(&mut self, min_length: usize, recommended: usize) -> StreamResult<&mut [u8]> {
        self.state.check_open()?;
        let want = self.cursor + min_length.max(recommended).max(1);
        if self.buf.len() < want {
            let doubled = self.buf.len().saturating_mul(2);
            self.buf.resize(want.max(doubled), 0);
        }
        Ok(&mut self.buf[self.cursor..])
    }

    fn advance(&mut self, n: usize) {
        self.cursor = (self.cursor + n).min(self.buf.len());
        self.end = self.end.max(self.cursor);
    }

    fn available(&self) -> usize {
        self.buf.len() - self.cursor
    }

    fn flush(&mut self, _flush_type: FlushType) -> StreamResult<()> {
        self.state.check_open()
    }

    fn pos(&self) -> Position {
        self.cursor as u64
    }

    fn capabilities(&self) -> EnumSet<Capability> {
        Capability::RandomAccess | Capability::QuerySize | Capability::Truncate | Capability::ReadMode
    }

    fn seek(&mut self, new_pos: Position) -> StreamResult<()> {
        self.state.check_open()?;
        if new_pos > self.end as u64 {
            return Err(self
                .state
                .fail(Status::invalid_argument(format!("seek past the end: {new_pos}"))));
        }
        self.cursor = new_pos as usize;
        Ok(())
    }

    fn size(&mut self) -> StreamResult<Position> {
        self.state.check_open()?;
        Ok(self.end as u64)
    }

    fn truncate(&mut self, new_size: Position) -> StreamResult<()> {
        self.state.check_open()?;
        if new_size > self.end as u64 {
            return Err(self.state.fail(Status::invalid_argument(format!(
                "truncation past the end: {new_size}"
            ))));
        }
        self.end = new_size as usize;
        self.cursor = self.cursor.min(self.end);
        Ok(())
    }

    fn read_mode(&mut self, initial_pos: Position) -> StreamResult<&mut dyn Read> {
        self.state.check_open()?;
        self.buf.truncate(self.end);
        let mut reader = Cursor::new(std::mem::take(&mut self.buf));
        reader.set_position(initial_pos.min(self.end as u64));
        self.reading = Some(reader);
        Ok(self.reading.as_mut().expect("reader was just stored"))
    }

    fn close(&mut self) -> StreamResult<()> {
        if self.state.is_open() {
            self.state.mark_closed();
        }
        self.state.latched()
    }

    fn healthy(&self) -> bool {
        self.state.healthy()
    }

    fn status(&self) -> Option<&Status> {
        self.state.status()
    }
}

/// Deterministic test data: the byte sequence `i & 0xff`.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| i as u8).collect()
}
