//! Buffered scaffold for `write(2)`-style destinations.

use std::io::{self, Write};

use enumset::EnumSet;
use log::warn;

use crate::{
    dependency::Dependency,
    object::ObjectState,
    status::{Status, StreamResult},
    writer::{Capability, FlushType, Position, Window, Writer},
};

/// Default size of the private buffer: 64 KiB.
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Options for [`BufferedWriter`].
#[derive(Debug, Clone)]
pub struct BufferOptions {
    buffer_size: usize,
}

impl Default for BufferOptions {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl BufferOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Specifies the size of the private buffer.
    ///
    /// Writes at least this long bypass the buffer entirely.
    pub fn buffer_size(self, buffer_size: usize) -> Self {
        Self {
            buffer_size: buffer_size.max(1),
        }
    }
}

/// Adapts a byte-oriented destination into the [`Writer`] contract by
/// copying through a private buffer.
///
/// The buffer is handed to the destination when it fills, at flush time and
/// on close. Short writes are retried, as are writes interrupted by a
/// signal.
///
/// The destination only needs [`io::Write`], so the writer advertises no
/// random-access capabilities, and a machine-scope flush can reach no deeper
/// than the destination's own flush.
pub struct BufferedWriter<'a, D: Write> {
    state: ObjectState,
    dest: Dependency<'a, D>,
    window: Window,
}

impl<'a, D: Write> BufferedWriter<'a, D> {
    pub fn new(dest: impl Into<Dependency<'a, D>>, options: BufferOptions) -> Self {
        Self {
            state: ObjectState::Open,
            dest: dest.into(),
            window: Window::with_capacity(options.buffer_size),
        }
    }

    /// The destination, for inspection.
    pub fn get_ref(&self) -> &D {
        self.dest.get()
    }

    /// Publishes the filled part of the buffer to the destination.
    fn sync_buffer(&mut self) -> StreamResult<()> {
        if self.window.start_to_cursor() == 0 {
            return Ok(());
        }
        let Self { state, dest, window } = self;
        write_all_retrying(dest.get_mut(), window.filled())
            .map_err(Status::from)
            .and_then(|()| window.sync())
            .map_err(|err| state.fail(err))
    }
}

impl<D: Write> Writer for BufferedWriter<'_, D> {
    fn push(&mut self, min_length: usize, recommended: usize) -> StreamResult<&mut [u8]> {
        self.state.check_open()?;
        if self.window.available() < min_length {
            self.sync_buffer()?;
            self.window.grow(min_length, recommended);
        }
        Ok(self.window.window())
    }

    fn advance(&mut self, n: usize) {
        self.window.advance(n);
    }

    fn available(&self) -> usize {
        self.window.available()
    }

    fn write(&mut self, bytes: &[u8]) -> StreamResult<()> {
        self.state.check_open()?;
        if bytes.len() <= self.window.available() {
            self.window.window()[..bytes.len()].copy_from_slice(bytes);
            self.window.advance(bytes.len());
            return Ok(());
        }
        self.sync_buffer()?;
        if bytes.len() < self.window.capacity() {
            self.window.window()[..bytes.len()].copy_from_slice(bytes);
            self.window.advance(bytes.len());
        } else {
            // At least one buffer long: skip the copy.
            let Self { state, dest, window } = self;
            write_all_retrying(dest.get_mut(), bytes)
                .map_err(Status::from)
                .and_then(|()| window.advance_start_pos(bytes.len() as u64))
                .map_err(|err| state.fail(err))?;
        }
        Ok(())
    }

    fn flush(&mut self, flush_type: FlushType) -> StreamResult<()> {
        self.state.check_open()?;
        self.sync_buffer()?;
        if flush_type > FlushType::FromObject {
            // A transient flush failure does not latch; the delivered bytes
            // are not lost and the writer stays usable.
            self.dest.get_mut().flush().map_err(Status::from)?;
        }
        Ok(())
    }

    fn pos(&self) -> Position {
        self.window.pos()
    }

    fn capabilities(&self) -> EnumSet<Capability> {
        Capability::PrefersCopying.into()
    }

    fn close(&mut self) -> StreamResult<()> {
        if self.state.is_open() {
            if self.state.healthy() {
                let _ = self.sync_buffer();
            }
            if self.state.healthy() && self.dest.is_owning() {
                if let Err(err) = self.dest.get_mut().flush() {
                    self.state.fail(err.into());
                }
            }
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

impl<'a, D: Write> Drop for BufferedWriter<'a, D> {
    fn drop(&mut self) {
        if self.state.is_open() {
            if let Err(err) = self.close() {
                warn!("dropping an unclosed BufferedWriter: {err}");
            }
        }
    }
}

/// Writes all of `buf`, looping over short writes and `EINTR`.
fn write_all_retrying<D: Write>(dest: &mut D, mut buf: &[u8]) -> io::Result<()> {
    while !buf.is_empty() {
        match dest.write(buf) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => buf = &buf[n..],
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(())
}
