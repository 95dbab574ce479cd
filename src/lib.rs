//! Composable, layered byte streams.
//!
//! `bytestack` moves bytes from a producer through zero or more transforms
//! into a destination, behind one push-oriented [`Writer`] contract: the
//! producer asks for a window, fills it, and commits. Layers compose because
//! a writer's destination is itself a writer, down to a
//! [`BufferedWriter`] adapting any [`std::io::Write`] sink.
//!
//! The crate ships two representative layers, a [`LimitingWriter`] that caps
//! the absolute position of its inner writer and a [`FramedSnappyWriter`]
//! that emits the framed-Snappy container, plus a [`ChunkEncoder`] /
//! [`ChunkDecoder`] pair for chunks of length-indexed records.
//!
//! ```
//! use bytestack::{
//!     framed, BufferOptions, BufferedWriter, FramedSnappyOptions, FramedSnappyWriter, Writer,
//! };
//!
//! # fn main() -> bytestack::StreamResult<()> {
//! let mut out: Vec<u8> = Vec::new();
//! let mut sink: BufferedWriter<'_, Vec<u8>> =
//!     BufferedWriter::new(&mut out, BufferOptions::default());
//! let mut writer: FramedSnappyWriter<'_, BufferedWriter<'_, Vec<u8>>> =
//!     FramedSnappyWriter::new(&mut sink, FramedSnappyOptions::default())?;
//! writer.write(b"hello")?;
//! writer.close()?;
//! drop(writer);
//! sink.close()?;
//! drop(sink);
//! assert_eq!(framed::decode(&out)?, b"hello");
//! # Ok(())
//! # }
//! ```

pub mod buffered;
pub mod chunk;
pub mod dependency;
pub mod framed;
pub mod limiting;
pub mod object;
mod scratch;
pub mod status;
pub mod writer;

pub use buffered::{BufferOptions, BufferedWriter};
pub use chunk::{ChunkDecoder, ChunkEncoder, ChunkHeader, Compression, Projection};
pub use dependency::Dependency;
pub use framed::{FramedSnappyOptions, FramedSnappyWriter, MAX_BLOCK_SIZE, STREAM_IDENTIFIER};
pub use limiting::LimitingWriter;
pub use object::ObjectState;
pub use status::{Status, StatusCode, StreamResult};
pub use writer::{Capability, FlushType, Position, Writer};

// Re-exported so implementors of `Writer` can name the capability set type.
pub use enumset::EnumSet;
