//! Common utilities for zipvfs.
//!
//! This crate provides the foundational pieces used by the archive codec:
//!
//! - [`BinaryReader`] - Zero-copy little-endian reading from byte slices
//! - [`crc`] - CRC-32 (IEEE) hashing as used by the ZIP format

mod error;
mod reader;

pub mod crc;

pub use error::{Error, Result};
pub use reader::BinaryReader;

/// Re-export zerocopy traits for convenience
pub use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};
