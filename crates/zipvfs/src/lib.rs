//! A ZIP archive mounted as a hierarchical filesystem.
//!
//! Entries can be listed, read, created, copied, moved and deleted through
//! paths. Changes are staged in memory or in temporary files and written
//! back to the archive in one pass on sync or close.
//!
//! Supported:
//!
//! - ZIP64 archives, entries and END records
//! - Stored and DEFLATE compressed entries
//! - Extended timestamp and NTFS extra fields
//! - Archives with prefixed data such as self-extracting stubs
//! - Streams that keep reading while the archive is rewritten
//!
//! # Example
//!
//! ```no_run
//! use zipvfs::{Config, ZipFileSystem};
//!
//! let fs = ZipFileSystem::open(
//!     "site.zip",
//!     Config {
//!         create_if_missing: true,
//!         ..Config::default()
//!     },
//! )?;
//! fs.create_directory("css")?;
//! fs.write("css/main.css", b"body { margin: 0 }")?;
//!
//! for name in fs.list("/", None)? {
//!     println!("{}", String::from_utf8_lossy(&name));
//! }
//! fs.close()?;
//! # Ok::<(), zipvfs::Error>(())
//! ```

mod channel;
mod config;
mod entry;
mod error;
mod filesystem;
mod index;
mod staging;
mod store;
mod stream;
mod sync;
mod tree;
pub mod zip;

pub use channel::EntryChannel;
pub use config::{Config, DEFAULT_POOL_CAPACITY};
pub use entry::EntryAttributes;
pub use error::{Error, Result};
pub use filesystem::{CopyOptions, OpenOptions, ZipFileSystem};
pub use store::{FileStore, MemoryStore, RandomAccessStore};
pub use stream::{EntryReader, EntryWriter};
pub use zip::CompressionMethod;
