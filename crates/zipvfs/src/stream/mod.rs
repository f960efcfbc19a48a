//! Streaming access to entry data.
//!
//! Readers inflate on the fly and writers deflate on the fly, both drawing
//! their codecs from bounded pools owned by the filesystem.

mod input;
mod output;
pub(crate) mod pool;

pub(crate) use input::{ArchiveSlice, Source};
pub use input::EntryReader;
pub(crate) use output::{EntryEncoder, Sink};
pub use output::EntryWriter;
