//! Central Directory Header structures.

use zerocopy::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use zipvfs_common::BinaryReader;

use crate::error::{Error, Result};

/// Central Directory File Header (without signature).
///
/// This structure describes a single file entry in the archive's
/// central directory. The 4-byte signature (0x02014b50) is read
/// separately before this struct.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct CentralDirectoryHeader {
    /// Version made by
    pub version_made_by: U16,
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
    /// File comment length
    pub file_comment_length: U16,
    /// Disk number where file starts
    pub disk_number_start: U16,
    /// Internal file attributes
    pub internal_attrs: U16,
    /// External file attributes
    pub external_attrs: U32,
    /// Relative offset of local file header
    pub local_header_offset: U32,
}

impl CentralDirectoryHeader {
    /// Central Directory signature bytes.
    pub const MAGIC: [u8; 4] = [0x50, 0x4b, 0x01, 0x02];

    /// Central Directory signature as u32.
    pub const SIGNATURE: u32 = 0x02014b50;

    /// Size of the fixed part including its signature.
    pub const SIZE: usize = 46;

    /// Total variable-length data size following this header.
    pub fn variable_data_size(&self) -> usize {
        self.file_name_length.get() as usize
            + self.extra_field_length.get() as usize
            + self.file_comment_length.get() as usize
    }

    /// Total size of the record starting with this header.
    pub fn record_size(&self) -> usize {
        Self::SIZE + self.variable_data_size()
    }
}

/// A central directory record borrowed from the central directory buffer.
#[derive(Debug, Clone, Copy)]
pub struct CentralRecord<'a> {
    /// Fixed header fields.
    pub header: CentralDirectoryHeader,
    /// Raw entry name.
    pub name: &'a [u8],
    /// Raw extra field block.
    pub extra: &'a [u8],
    /// Raw entry comment.
    pub comment: &'a [u8],
}

impl<'a> CentralRecord<'a> {
    /// Decode the record at `pos` within `cen`.
    ///
    /// Fails if the signature does not match or the declared variable-length
    /// fields would run past the end of `cen`.
    pub fn parse(cen: &'a [u8], pos: usize) -> Result<Self> {
        let mut reader = BinaryReader::new_at(cen, pos);
        let signature = reader.read_u32()?;
        if signature != CentralDirectoryHeader::SIGNATURE {
            return Err(Error::InvalidSignature {
                structure: "central directory",
                expected: CentralDirectoryHeader::SIGNATURE,
                actual: signature,
            });
        }
        let header: CentralDirectoryHeader = reader.read_struct()?;
        if pos + header.record_size() > cen.len() {
            return Err(Error::format(
                "central directory",
                "record overruns the central directory",
            ));
        }
        let name = reader.read_bytes(header.file_name_length.get() as usize)?;
        let extra = reader.read_bytes(header.extra_field_length.get() as usize)?;
        let comment = reader.read_bytes(header.file_comment_length.get() as usize)?;
        Ok(Self {
            header,
            name,
            extra,
            comment,
        })
    }

    /// Size of this record in the central directory.
    pub fn size(&self) -> usize {
        self.header.record_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &[u8], extra: &[u8], comment: &[u8]) -> Vec<u8> {
        let header = CentralDirectoryHeader {
            version_made_by: U16::new(20),
            version_needed: U16::new(20),
            flags: U16::new(0),
            compression_method: U16::new(8),
            last_modified: U32::new(0),
            crc32: U32::new(0x3610a686),
            compressed_size: U32::new(7),
            uncompressed_size: U32::new(5),
            file_name_length: U16::new(name.len() as u16),
            extra_field_length: U16::new(extra.len() as u16),
            file_comment_length: U16::new(comment.len() as u16),
            disk_number_start: U16::new(0),
            internal_attrs: U16::new(0),
            external_attrs: U32::new(0),
            local_header_offset: U32::new(0),
        };
        let mut buf = CentralDirectoryHeader::MAGIC.to_vec();
        buf.extend_from_slice(header.as_bytes());
        buf.extend_from_slice(name);
        buf.extend_from_slice(extra);
        buf.extend_from_slice(comment);
        buf
    }

    #[test]
    fn test_header_size() {
        assert_eq!(
            std::mem::size_of::<CentralDirectoryHeader>() + 4,
            CentralDirectoryHeader::SIZE
        );
    }

    #[test]
    fn test_parse_record() {
        let buf = record(b"a/b.txt", b"", b"note");
        let rec = CentralRecord::parse(&buf, 0).unwrap();
        assert_eq!(rec.name, b"a/b.txt");
        assert_eq!(rec.comment, b"note");
        assert_eq!(rec.header.crc32.get(), 0x3610a686);
        assert_eq!(rec.size(), buf.len());
    }

    #[test]
    fn test_parse_overrun() {
        let mut buf = record(b"a/b.txt", b"", b"");
        buf.truncate(buf.len() - 2);
        assert!(matches!(
            CentralRecord::parse(&buf, 0),
            Err(Error::Format { .. })
        ));
    }

    #[test]
    fn test_parse_bad_signature() {
        let mut buf = record(b"x", b"", b"");
        buf[0] = b'Q';
        assert!(matches!(
            CentralRecord::parse(&buf, 0),
            Err(Error::InvalidSignature { .. })
        ));
    }
}
