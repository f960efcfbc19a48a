//! Local File Header structures.

use std::io::{self, Write};

use byteorder::{LittleEndian, WriteBytesExt};
use zerocopy::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use zipvfs_common::BinaryReader;

use crate::error::{Error, Result};
use crate::store::RandomAccessStore;

/// Local File Header (without signature).
///
/// This structure precedes the actual file data in the archive.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct LocalFileHeader {
    /// Version needed to extract
    pub version_needed: U16,
    /// General purpose bit flag
    pub flags: U16,
    /// Compression method
    pub compression_method: U16,
    /// File last modification time and date (DOS format)
    pub last_modified: U32,
    /// CRC-32 of uncompressed data
    pub crc32: U32,
    /// Compressed size
    pub compressed_size: U32,
    /// Uncompressed size
    pub uncompressed_size: U32,
    /// File name length
    pub file_name_length: U16,
    /// Extra field length
    pub extra_field_length: U16,
}

impl LocalFileHeader {
    /// Local File Header signature bytes.
    pub const MAGIC: [u8; 4] = [0x50, 0x4b, 0x03, 0x04];

    /// Local File Header signature as u32.
    pub const SIGNATURE: u32 = 0x04034b50;

    /// Size of the fixed part including its signature.
    pub const SIZE: usize = 30;

    /// Total variable-length data size following this header.
    pub fn variable_data_size(&self) -> usize {
        self.file_name_length.get() as usize + self.extra_field_length.get() as usize
    }

    /// Read the fixed part of the local header at `offset`.
    pub fn read_at(store: &dyn RandomAccessStore, offset: u64) -> Result<Self> {
        let mut buf = [0u8; Self::SIZE];
        store.read_fully_at(&mut buf, offset)?;
        let mut reader = BinaryReader::new(&buf);
        let signature = reader.read_u32()?;
        if signature != Self::SIGNATURE {
            return Err(Error::InvalidSignature {
                structure: "local header",
                expected: Self::SIGNATURE,
                actual: signature,
            });
        }
        Ok(reader.read_struct()?)
    }

    /// Offset of the entry data for a local header starting at `offset`.
    pub fn data_offset(&self, offset: u64) -> u64 {
        offset + Self::SIZE as u64 + self.variable_data_size() as u64
    }
}

/// Data descriptor that trails entry data when general purpose bit 3 is set.
///
/// The signature is optional on read. It is always written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataDescriptor {
    /// CRC-32 of uncompressed data
    pub crc32: u32,
    /// Compressed size
    pub compressed_size: u64,
    /// Uncompressed size
    pub uncompressed_size: u64,
}

impl DataDescriptor {
    /// Data descriptor signature bytes.
    pub const MAGIC: [u8; 4] = [0x50, 0x4b, 0x07, 0x08];

    /// Data descriptor signature as u32.
    pub const SIGNATURE: u32 = 0x08074b50;

    /// Size of a descriptor with 32-bit sizes, including the signature.
    pub const SIZE: usize = 16;

    /// Size of a descriptor with 64-bit sizes, including the signature.
    pub const SIZE_ZIP64: usize = 24;

    /// Whether the sizes need the 64-bit form.
    pub fn is_zip64(&self) -> bool {
        self.compressed_size >= super::ZIP64_THRESHOLD
            || self.uncompressed_size >= super::ZIP64_THRESHOLD
    }

    /// Write the descriptor with its signature. Returns the bytes written.
    pub fn write<W: Write>(&self, out: &mut W) -> io::Result<u64> {
        out.write_all(&Self::MAGIC)?;
        out.write_u32::<LittleEndian>(self.crc32)?;
        if self.is_zip64() {
            out.write_u64::<LittleEndian>(self.compressed_size)?;
            out.write_u64::<LittleEndian>(self.uncompressed_size)?;
            Ok(Self::SIZE_ZIP64 as u64)
        } else {
            out.write_u32::<LittleEndian>(self.compressed_size as u32)?;
            out.write_u32::<LittleEndian>(self.uncompressed_size as u32)?;
            Ok(Self::SIZE as u64)
        }
    }

    /// Length of the descriptor stored at `offset`, given the sizes already
    /// known from the central directory. Handles descriptors with and
    /// without the optional signature.
    pub fn stored_len(store: &dyn RandomAccessStore, offset: u64, zip64: bool) -> Result<u64> {
        let mut sig = [0u8; 4];
        store.read_fully_at(&mut sig, offset)?;
        let body = if zip64 { 20 } else { 12 };
        if sig == Self::MAGIC {
            Ok(body + 4)
        } else {
            Ok(body)
        }
    }
}
