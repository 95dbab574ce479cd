//! A writer that caps the absolute position of an inner writer.

use std::io::Read;

use enumset::EnumSet;
use log::warn;

use crate::{
    dependency::Dependency,
    object::ObjectState,
    status::{Status, StreamResult},
    writer::{Capability, FlushType, Position, Writer},
};

/// Caps an inner writer at an absolute byte position.
///
/// Writes that fit are delegated unchanged; a write that would pass the
/// limit delivers the accepted prefix, leaves the inner writer exactly at
/// the limit and latches a resource-exhausted failure. In exact mode,
/// closing before the limit is reached fails instead of succeeding short.
///
/// The wrapper is transparent: all inner capabilities are preserved and
/// failures surface with the inner writer's own annotation chain.
pub struct LimitingWriter<'a, W: Writer> {
    state: ObjectState,
    inner: Dependency<'a, W>,
    max_pos: Position,
    exact: bool,
}

impl<'a, W: Writer> LimitingWriter<'a, W> {
    /// Caps `inner` at `max_pos`, which must not precede its position.
    pub fn new(inner: impl Into<Dependency<'a, W>>, max_pos: Position) -> StreamResult<Self> {
        let inner = inner.into();
        let pos = inner.get().pos();
        if max_pos < pos {
            return Err(Status::invalid_argument(format!(
                "position limit {max_pos} is before the current position {pos}"
            )));
        }
        Ok(Self {
            state: ObjectState::Open,
            inner,
            max_pos,
            exact: false,
        })
    }

    /// Like [`new`](Self::new), but closing fails unless the final position
    /// equals `max_pos`.
    pub fn new_exact(inner: impl Into<Dependency<'a, W>>, max_pos: Position) -> StreamResult<Self> {
        let mut writer = Self::new(inner, max_pos)?;
        writer.exact = true;
        Ok(writer)
    }

    pub fn max_pos(&self) -> Position {
        self.max_pos
    }

    pub fn is_exact(&self) -> bool {
        self.exact
    }

    /// The inner writer, for inspection.
    pub fn get_ref(&self) -> &W {
        self.inner.get()
    }

    fn remaining(&self) -> u64 {
        self.max_pos.saturating_sub(self.inner.get().pos())
    }

    fn exceeded(&mut self) -> Status {
        self.state.fail(Status::resource_exhausted(format!(
            "Position limit of {} exceeded",
            self.max_pos
        )))
    }
}

impl<W: Writer> Writer for LimitingWriter<'_, W> {
    fn push(&mut self, min_length: usize, recommended: usize) -> StreamResult<&mut [u8]> {
        self.state.check_open()?;
        let remaining = self.remaining();
        if min_length as u64 > remaining {
            return Err(self.exceeded());
        }
        let recommended = recommended.min(usize::try_from(remaining).unwrap_or(usize::MAX));
        let window = self.inner.get_mut().push(min_length, recommended)?;
        // Never expose more bytes than the limit allows.
        let cap = window.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
        Ok(&mut window[..cap])
    }

    fn advance(&mut self, n: usize) {
        self.inner.get_mut().advance(n);
    }

    fn available(&self) -> usize {
        let inner = self.inner.get().available() as u64;
        inner.min(self.remaining()) as usize
    }

    fn write(&mut self, bytes: &[u8]) -> StreamResult<()> {
        self.state.check_open()?;
        let remaining = self.remaining();
        if bytes.len() as u64 > remaining {
            self.inner.get_mut().write(&bytes[..remaining as usize])?;
            return Err(self.exceeded());
        }
        self.inner.get_mut().write(bytes)
    }

    fn write_zeros(&mut self, n: u64) -> StreamResult<()> {
        self.state.check_open()?;
        let remaining = self.remaining();
        if n > remaining {
            self.inner.get_mut().write_zeros(remaining)?;
            return Err(self.exceeded());
        }
        self.inner.get_mut().write_zeros(n)
    }

    fn flush(&mut self, flush_type: FlushType) -> StreamResult<()> {
        self.state.check_open()?;
        self.inner.get_mut().flush(flush_type)
    }

    fn pos(&self) -> Position {
        self.inner.get().pos()
    }

    fn capabilities(&self) -> EnumSet<Capability> {
        self.inner.get().capabilities()
    }

    fn seek(&mut self, new_pos: Position) -> StreamResult<()> {
        self.state.check_open()?;
        self.inner.get_mut().seek(new_pos.min(self.max_pos))?;
        if new_pos > self.max_pos {
            return Err(self.state.fail(Status::invalid_argument(format!(
                "seek to {new_pos} passes the position limit of {}",
                self.max_pos
            ))));
        }
        Ok(())
    }

    fn size(&mut self) -> StreamResult<Position> {
        self.state.check_open()?;
        Ok(self.inner.get_mut().size()?.min(self.max_pos))
    }

    fn truncate(&mut self, new_size: Position) -> StreamResult<()> {
        self.state.check_open()?;
        self.inner.get_mut().truncate(new_size.min(self.max_pos))?;
        if new_size > self.max_pos {
            return Err(self.state.fail(Status::invalid_argument(format!(
                "truncation to {new_size} passes the position limit of {}",
                self.max_pos
            ))));
        }
        Ok(())
    }

    fn read_mode(&mut self, initial_pos: Position) -> StreamResult<&mut dyn Read> {
        self.state.check_open()?;
        self.inner.get_mut().read_mode(initial_pos)
    }

    fn close(&mut self) -> StreamResult<()> {
        if self.state.is_open() {
            if self.state.healthy() && self.exact {
                let pos = self.inner.get().pos();
                if pos != self.max_pos {
                    self.state.fail(Status::invalid_argument(format!(
                        "Not enough data: expected {}, got {pos}",
                        self.max_pos
                    )));
                }
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

impl<'a, W: Writer> Drop for LimitingWriter<'a, W> {
    fn drop(&mut self) {
        if self.state.is_open() {
            if let Err(err) = self.close() {
                warn!("dropping an unclosed LimitingWriter: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        buffered::{BufferOptions, BufferedWriter},
        status::StatusCode,
    };

    #[test]
    fn windows_are_narrowed_to_the_limit() {
        let mut out: Vec<u8> = Vec::new();
        {
            let sink: BufferedWriter<'_, Vec<u8>> =
                BufferedWriter::new(&mut out, BufferOptions::default());
            let mut writer = LimitingWriter::new(sink, 6).unwrap();
            let window = writer.push(1, 1024).unwrap();
            assert_eq!(window.len(), 6);
            window[..4].copy_from_slice(b"abcd");
            writer.advance(4);
            assert_eq!(writer.available(), 2);
            writer.close().unwrap();
        }
        assert_eq!(out, b"abcd");
    }

    #[test]
    fn pushes_past_the_limit_latch() {
        let mut out: Vec<u8> = Vec::new();
        let sink: BufferedWriter<'_, Vec<u8>> =
            BufferedWriter::new(&mut out, BufferOptions::default());
        let mut writer = LimitingWriter::new(sink, 3).unwrap();
        writer.write(b"abc").unwrap();
        let err = writer.push(1, 0).unwrap_err();
        assert_eq!(err.code(), StatusCode::ResourceExhausted);
        assert!(!writer.healthy());
    }

    #[test]
    fn capabilities_of_a_streaming_inner_are_preserved() {
        let mut out: Vec<u8> = Vec::new();
        let sink: BufferedWriter<'_, Vec<u8>> =
            BufferedWriter::new(&mut out, BufferOptions::default());
        let mut writer = LimitingWriter::new(sink, 100).unwrap();
        assert_eq!(
            writer.capabilities(),
            EnumSet::only(Capability::PrefersCopying)
        );
        let err = writer.seek(0).unwrap_err();
        assert_eq!(err.code(), StatusCode::Unimplemented);
        writer.close().unwrap();
    }
}
