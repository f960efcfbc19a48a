//! End of Central Directory (END) structures.
//!
//! [`End::locate`] finds the END record by scanning backward from the tail of
//! the archive in small overlapping blocks, and transparently upgrades to the
//! ZIP64 END record when a locator sits immediately before it.

use std::io::{self, Write};

use byteorder::{LittleEndian, WriteBytesExt};
use memchr::memmem;
use zerocopy::little_endian::{U16, U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use zipvfs_common::BinaryReader;

use super::{VERSION_ZIP64, ZIP64_SENTINEL, ZIP64_SENTINEL16, ZIP64_THRESHOLD};
use crate::error::{Error, Result};
use crate::store::RandomAccessStore;

/// Size of the backward scan window.
const READ_BLOCK: usize = 128;

/// End of Central Directory Record (without signature).
///
/// For ZIP64 archives, some fields will contain 0xFFFF or 0xFFFFFFFF
/// to indicate that the actual values are in the ZIP64 END record.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct EocdRecord {
    /// Number of this disk
    pub disk_number: U16,
    /// Disk where central directory starts
    pub central_dir_disk: U16,
    /// Number of central directory records on this disk
    pub central_dir_count_disk: U16,
    /// Total number of central directory records
    pub central_dir_count_total: U16,
    /// Size of central directory (bytes)
    pub central_dir_size: U32,
    /// Offset of start of central directory
    pub central_dir_offset: U32,
    /// Comment length
    pub comment_length: U16,
}

impl EocdRecord {
    /// END signature bytes.
    pub const MAGIC: [u8; 4] = [0x50, 0x4b, 0x05, 0x06];

    /// END signature as u32.
    pub const SIGNATURE: u32 = 0x06054b50;

    /// Size of the record including its signature.
    pub const SIZE: usize = 22;

    /// Largest possible distance from the END signature to the end of the archive.
    pub const MAX_SPAN: u64 = Self::SIZE as u64 + 0xFFFF;

    /// Check whether any field holds a ZIP64 sentinel.
    pub fn is_zip64(&self) -> bool {
        self.central_dir_count_total.get() == ZIP64_SENTINEL16
            || self.central_dir_offset.get() == ZIP64_SENTINEL
            || self.central_dir_size.get() == ZIP64_SENTINEL
    }
}

/// ZIP64 End of Central Directory Locator (without signature).
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct Eocd64Locator {
    /// Disk number containing ZIP64 END
    pub zip64_eocd_disk: U32,
    /// Offset of ZIP64 END record
    pub zip64_eocd_offset: U64,
    /// Total number of disks
    pub total_disks: U32,
}

impl Eocd64Locator {
    /// ZIP64 END locator signature bytes.
    pub const MAGIC: [u8; 4] = [0x50, 0x4b, 0x06, 0x07];

    /// ZIP64 END locator signature as u32.
    pub const SIGNATURE: u32 = 0x07064b50;

    /// Size of the locator including its signature.
    pub const SIZE: usize = 20;
}

/// ZIP64 End of Central Directory Record (without signature).
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct Eocd64Record {
    /// Size of this record (not including signature or this field)
    pub record_size: U64,
    /// Version made by
    pub version_made_by: U16,
    /// Version needed to extract
    pub version_needed: U16,
    /// This disk number
    pub disk_number: U32,
    /// Disk where central directory starts
    pub central_dir_disk: U32,
    /// Number of central directory records on this disk
    pub central_dir_count_disk: U64,
    /// Total number of central directory records
    pub central_dir_count_total: U64,
    /// Size of central directory (bytes)
    pub central_dir_size: U64,
    /// Offset of start of central directory
    pub central_dir_offset: U64,
}

impl Eocd64Record {
    /// ZIP64 END signature bytes.
    pub const MAGIC: [u8; 4] = [0x50, 0x4b, 0x06, 0x06];

    /// ZIP64 END signature as u32.
    pub const SIGNATURE: u32 = 0x06064b50;

    /// Size of the record including its signature.
    pub const SIZE: usize = 56;
}

/// Archive-level summary taken from the END record, or from the ZIP64 END
/// record when one is present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct End {
    /// Total number of central directory records.
    pub entry_count: u64,
    /// Size of the central directory in bytes.
    pub cen_size: u64,
    /// Offset of the central directory, relative to the first local header.
    pub cen_offset: u64,
    /// Position of the END record (the ZIP64 END record, if present).
    pub end_pos: u64,
    /// Archive comment.
    pub comment: Vec<u8>,
    /// Whether the values came from a ZIP64 END record.
    pub zip64: bool,
}

impl End {
    /// Locate and decode the END record of `store`.
    ///
    /// The tail of the archive is scanned backward in overlapping blocks. A
    /// candidate signature is accepted only if its declared comment length
    /// reaches exactly to the end of the archive, so a signature embedded in
    /// the comment is skipped.
    pub fn locate(store: &dyn RandomAccessStore) -> Result<Self> {
        let archive_len = store.size()?;
        if archive_len < EocdRecord::SIZE as u64 {
            return Err(Error::EndNotFound);
        }
        let min_pos = archive_len.saturating_sub(EocdRecord::MAX_SPAN) as i64;
        let step = (READ_BLOCK - EocdRecord::SIZE) as i64;
        let mut buf = [0u8; READ_BLOCK];

        let mut pos = archive_len as i64 - READ_BLOCK as i64;
        loop {
            let mut skip = 0usize;
            if pos < 0 {
                skip = (-pos) as usize;
                buf[..skip].fill(0);
            }
            let start = pos.max(0) as u64;
            store.read_fully_at(&mut buf[skip..], start)?;

            let haystack = &buf[..READ_BLOCK - EocdRecord::SIZE + 4];
            for i in memmem::rfind_iter(haystack, &EocdRecord::MAGIC) {
                if i < skip {
                    continue;
                }
                let candidate = (pos + i as i64) as u64;
                let record: EocdRecord = BinaryReader::new_at(&buf, i + 4).read_struct()?;
                let comment_len = record.comment_length.get() as u64;
                if candidate + EocdRecord::SIZE as u64 + comment_len != archive_len {
                    continue;
                }
                return Self::decode(store, candidate, &record);
            }

            if pos <= min_pos {
                break;
            }
            pos = (pos - step).max(min_pos);
        }

        Err(Error::EndNotFound)
    }

    fn decode(store: &dyn RandomAccessStore, end_pos: u64, record: &EocdRecord) -> Result<Self> {
        let mut comment = vec![0u8; record.comment_length.get() as usize];
        store.read_fully_at(&mut comment, end_pos + EocdRecord::SIZE as u64)?;

        let mut end = End {
            entry_count: record.central_dir_count_total.get() as u64,
            cen_size: record.central_dir_size.get() as u64,
            cen_offset: record.central_dir_offset.get() as u64,
            end_pos,
            comment,
            zip64: false,
        };

        match Self::read_zip64(store, end_pos)? {
            Some((end64_pos, record64)) => {
                end.entry_count = record64.central_dir_count_total.get();
                end.cen_size = record64.central_dir_size.get();
                end.cen_offset = record64.central_dir_offset.get();
                end.end_pos = end64_pos;
                end.zip64 = true;
            }
            None if record.is_zip64() => {
                return Err(Error::format("ZIP64 END", "locator missing for ZIP64 sentinel values"));
            }
            None => {}
        }

        Ok(end)
    }

    /// Look for a ZIP64 locator immediately before the END record and, if
    /// it points at a consistent ZIP64 END record, return that record.
    fn read_zip64(store: &dyn RandomAccessStore, end_pos: u64) -> Result<Option<(u64, Eocd64Record)>> {
        let Some(loc_pos) = end_pos.checked_sub(Eocd64Locator::SIZE as u64) else {
            return Ok(None);
        };
        let mut loc_buf = [0u8; Eocd64Locator::SIZE];
        store.read_fully_at(&mut loc_buf, loc_pos)?;
        let mut reader = BinaryReader::new(&loc_buf);
        if reader.read_bytes(4)? != Eocd64Locator::MAGIC {
            return Ok(None);
        }
        let locator: Eocd64Locator = reader.read_struct()?;

        let end64_pos = locator.zip64_eocd_offset.get();
        if end64_pos.saturating_add(Eocd64Record::SIZE as u64) > loc_pos {
            return Ok(None);
        }
        let mut rec_buf = [0u8; Eocd64Record::SIZE];
        store.read_fully_at(&mut rec_buf, end64_pos)?;
        let mut reader = BinaryReader::new(&rec_buf);
        if reader.read_bytes(4)? != Eocd64Record::MAGIC {
            return Ok(None);
        }
        let record: Eocd64Record = reader.read_struct()?;

        // The central directory has to fit before the ZIP64 END record.
        if record.central_dir_size.get() > end64_pos {
            return Ok(None);
        }

        Ok(Some((end64_pos, record)))
    }

    /// Whether writing this summary needs the ZIP64 END record.
    pub fn needs_zip64(&self) -> bool {
        self.entry_count >= ZIP64_SENTINEL16 as u64
            || self.cen_size >= ZIP64_THRESHOLD
            || self.cen_offset >= ZIP64_THRESHOLD
    }

    /// Write the END record, preceded by the ZIP64 END record and locator
    /// when needed or when `force_zip64` is set.
    ///
    /// `pos` is the archive offset at which writing begins. Returns the
    /// number of bytes written.
    pub fn write<W: Write>(&self, out: &mut W, pos: u64, force_zip64: bool) -> io::Result<u64> {
        let comment = &self.comment[..self.comment.len().min(0xFFFF)];
        let zip64 = force_zip64 || self.needs_zip64();
        let mut written = 0u64;

        let (count, size, offset) = if zip64 {
            let record = Eocd64Record {
                record_size: U64::new(Eocd64Record::SIZE as u64 - 12),
                version_made_by: U16::new(VERSION_ZIP64),
                version_needed: U16::new(VERSION_ZIP64),
                disk_number: U32::new(0),
                central_dir_disk: U32::new(0),
                central_dir_count_disk: U64::new(self.entry_count),
                central_dir_count_total: U64::new(self.entry_count),
                central_dir_size: U64::new(self.cen_size),
                central_dir_offset: U64::new(self.cen_offset),
            };
            out.write_all(&Eocd64Record::MAGIC)?;
            out.write_all(record.as_bytes())?;

            let locator = Eocd64Locator {
                zip64_eocd_disk: U32::new(0),
                zip64_eocd_offset: U64::new(pos),
                total_disks: U32::new(1),
            };
            out.write_all(&Eocd64Locator::MAGIC)?;
            out.write_all(locator.as_bytes())?;
            written += (Eocd64Record::SIZE + Eocd64Locator::SIZE) as u64;

            (ZIP64_SENTINEL16, ZIP64_SENTINEL, ZIP64_SENTINEL)
        } else {
            (
                self.entry_count as u16,
                self.cen_size as u32,
                self.cen_offset as u32,
            )
        };

        out.write_all(&EocdRecord::MAGIC)?;
        out.write_u16::<LittleEndian>(0)?;
        out.write_u16::<LittleEndian>(0)?;
        out.write_u16::<LittleEndian>(count)?;
        out.write_u16::<LittleEndian>(count)?;
        out.write_u32::<LittleEndian>(size)?;
        out.write_u32::<LittleEndian>(offset)?;
        out.write_u16::<LittleEndian>(comment.len() as u16)?;
        out.write_all(comment)?;
        written += (EocdRecord::SIZE + comment.len()) as u64;

        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn empty_archive(comment: &[u8]) -> Vec<u8> {
        let end = End {
            comment: comment.to_vec(),
            ..End::default()
        };
        let mut buf = Vec::new();
        end.write(&mut buf, 0, false).unwrap();
        buf
    }

    #[test]
    fn test_struct_sizes() {
        assert_eq!(std::mem::size_of::<EocdRecord>() + 4, EocdRecord::SIZE);
        assert_eq!(std::mem::size_of::<Eocd64Locator>() + 4, Eocd64Locator::SIZE);
        assert_eq!(std::mem::size_of::<Eocd64Record>() + 4, Eocd64Record::SIZE);
    }

    #[test]
    fn test_locate_empty_archive() {
        let data = empty_archive(b"");
        assert_eq!(data.len(), 22);
        let end = End::locate(&MemoryStore::new(data)).unwrap();
        assert_eq!(end.entry_count, 0);
        assert_eq!(end.end_pos, 0);
        assert!(!end.zip64);
    }

    #[test]
    fn test_locate_skips_signature_in_comment() {
        // A decoy END signature inside the comment must not be chosen because
        // its declared comment length does not reach the end of the archive.
        let mut comment = vec![b'x'; 300];
        comment[100..104].copy_from_slice(&EocdRecord::MAGIC);
        let data = empty_archive(&comment);
        let end = End::locate(&MemoryStore::new(data)).unwrap();
        assert_eq!(end.end_pos, 0);
        assert_eq!(end.comment, comment);
    }

    #[test]
    fn test_locate_with_prefix() {
        let mut data = vec![0xAAu8; 1000];
        data.extend_from_slice(&empty_archive(b"hi"));
        let end = End::locate(&MemoryStore::new(data)).unwrap();
        assert_eq!(end.end_pos, 1000);
        assert_eq!(end.comment, b"hi");
    }

    #[test]
    fn test_locate_missing() {
        let data = vec![0u8; 4096];
        assert!(matches!(
            End::locate(&MemoryStore::new(data)),
            Err(Error::EndNotFound)
        ));
        assert!(matches!(
            End::locate(&MemoryStore::new(vec![1, 2, 3])),
            Err(Error::EndNotFound)
        ));
    }

    #[test]
    fn test_forced_zip64_round_trip() {
        let end = End {
            entry_count: 3,
            cen_size: 120,
            cen_offset: 0,
            ..End::default()
        };
        let mut buf = vec![0u8; 120];
        let written = end.write(&mut buf, 120, true).unwrap();
        assert_eq!(written as usize, 56 + 20 + 22);

        let located = End::locate(&MemoryStore::new(buf)).unwrap();
        assert!(located.zip64);
        assert_eq!(located.entry_count, 3);
        assert_eq!(located.cen_size, 120);
        assert_eq!(located.end_pos, 120);
    }

    #[test]
    fn test_sentinel_without_locator_is_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&EocdRecord::MAGIC);
        buf.extend_from_slice(&[0, 0, 0, 0, 0xFF, 0xFF, 0xFF, 0xFF]);
        buf.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        assert!(matches!(
            End::locate(&MemoryStore::new(buf)),
            Err(Error::Format { .. })
        ));
    }

    #[test]
    fn test_needs_zip64_boundary() {
        let mut end = End {
            cen_offset: ZIP64_THRESHOLD - 1,
            ..End::default()
        };
        assert!(!end.needs_zip64());
        end.cen_offset = ZIP64_THRESHOLD;
        assert!(end.needs_zip64());
        end.cen_offset = 0;
        end.entry_count = 0xFFFF;
        assert!(end.needs_zip64());
    }
}
