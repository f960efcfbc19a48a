//! Archive entries.
//!
//! An [`Entry`] is the full metadata of one archive member plus a record of
//! where its data currently lives. Entries are decoded lazily from the
//! central directory and are only materialized in the index once they are
//! created or modified.

use std::fmt;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use zerocopy::little_endian::{U16, U32};
use zerocopy::IntoBytes;

use crate::error::{Error, Result};
use crate::staging::StagingFile;
use crate::store::RandomAccessStore;
use crate::zip::central_dir::CentralRecord;
use crate::zip::extra::{self, Timestamps, Zip64Sizes};
use crate::zip::{
    flags, time, CentralDirectoryHeader, CompressionMethod, DataDescriptor, LocalFileHeader,
    VERSION_ZIP64, ZIP64_SENTINEL, ZIP64_THRESHOLD,
};

/// Data of an entry created or rewritten since the last sync.
#[derive(Debug, Clone)]
pub(crate) enum Content {
    /// Already compressed with the entry's method.
    Bytes(Arc<[u8]>),
    /// Already compressed with the entry's method, held in a staging file.
    Staged(StagingFile),
}

impl Content {
    pub fn empty() -> Self {
        Self::Bytes(Arc::from(Vec::new()))
    }

    /// Make an independent copy, so that later changes to one side are not
    /// visible through the other.
    pub fn duplicate(&self, staging_dir: &Path) -> io::Result<Self> {
        match self {
            Self::Bytes(bytes) => Ok(Self::Bytes(Arc::from(bytes.to_vec()))),
            Self::Staged(file) => Ok(Self::Staged(file.duplicate(staging_dir)?)),
        }
    }
}

/// Where an entry's data lives.
#[derive(Debug, Clone)]
pub(crate) enum EntryState {
    /// Unmodified, at `local_header_offset` in the current archive.
    Archived,
    /// Copy of a record in the current archive; the local header at
    /// `source_offset` is rewritten with this entry's metadata on sync.
    Copied { source_offset: u64 },
    /// Compressed data held by the filesystem.
    New(Content),
    /// Uncompressed data in a staging file written through a byte channel.
    /// Compression happens on sync.
    ChannelBacked(StagingFile),
}

/// One archive member.
#[derive(Debug, Clone)]
pub(crate) struct Entry {
    /// Raw name. Directories end with `/`; there is no leading `/`.
    pub name: Vec<u8>,
    pub version_made_by: u16,
    pub flags: u16,
    pub method: CompressionMethod,
    pub mtime: SystemTime,
    pub atime: Option<SystemTime>,
    pub ctime: Option<SystemTime>,
    /// Timestamps are stored as an NTFS record instead of an extended
    /// timestamp.
    pub ntfs_times: bool,
    pub crc32: u32,
    pub compressed_size: u64,
    pub size: u64,
    /// Extra records other than ZIP64 and timestamps.
    pub extra: Vec<u8>,
    pub comment: Vec<u8>,
    pub external_attrs: u32,
    /// Absolute offset of the local header in the current archive.
    pub local_header_offset: u64,
    pub state: EntryState,
}

/// A decoded local header.
#[derive(Debug, Clone)]
pub(crate) struct LocalRecord {
    pub entry: Entry,
    /// Absolute offset of the entry data.
    pub data_offset: u64,
    /// Length of the trailing data descriptor, or 0 if there is none.
    pub descriptor_len: u64,
}

impl LocalRecord {
    /// Total length of header, data and descriptor.
    pub fn total_len(&self) -> u64 {
        self.data_offset - self.entry.local_header_offset
            + self.entry.compressed_size
            + self.descriptor_len
    }
}

impl Entry {
    /// Create an entry for new content. Directory names end with `/`.
    pub fn new(name: Vec<u8>, method: CompressionMethod, now: SystemTime, utf8: bool) -> Self {
        let is_directory = name.ends_with(b"/");
        Self {
            name,
            version_made_by: 0,
            flags: if utf8 { flags::UTF8 } else { 0 },
            method: if is_directory {
                CompressionMethod::Store
            } else {
                method
            },
            mtime: now,
            atime: None,
            ctime: None,
            ntfs_times: false,
            crc32: 0,
            compressed_size: 0,
            size: 0,
            extra: Vec::new(),
            comment: Vec::new(),
            external_attrs: if is_directory { 0x10 } else { 0 },
            local_header_offset: 0,
            state: EntryState::New(Content::empty()),
        }
    }

    /// Decode a central directory record.
    ///
    /// `loc_base` is the position of the first local header, nonzero when
    /// the archive has a prefix. When `local` is given and the record
    /// carries an extended timestamp, access and creation times are read
    /// from the local header.
    pub fn from_central(
        record: &CentralRecord<'_>,
        loc_base: u64,
        local: Option<&dyn RandomAccessStore>,
    ) -> Result<Self> {
        let header = &record.header;
        let entry_flags = header.flags.get();
        if entry_flags & flags::ENCRYPTED != 0 {
            return Err(Error::EncryptedEntry(
                String::from_utf8_lossy(record.name).into_owned(),
            ));
        }
        let method = CompressionMethod::try_from(header.compression_method.get())
            .map_err(Error::UnsupportedCompression)?;

        let mut sizes = Zip64Sizes {
            size: header.uncompressed_size.get() as u64,
            compressed_size: header.compressed_size.get() as u64,
            local_header_offset: header.local_header_offset.get() as u64,
        };
        let parsed = extra::parse(record.extra, &mut sizes)?;

        let mut entry = Self {
            name: strip_leading_slashes(record.name).to_vec(),
            version_made_by: header.version_made_by.get(),
            flags: entry_flags,
            method,
            mtime: parsed
                .timestamps
                .mtime
                .unwrap_or_else(|| dos_time(header.last_modified.get())),
            atime: parsed.timestamps.atime,
            ctime: parsed.timestamps.ctime,
            ntfs_times: parsed.has_ntfs_timestamp,
            crc32: header.crc32.get(),
            compressed_size: sizes.compressed_size,
            size: sizes.size,
            extra: parsed.retained,
            comment: record.comment.to_vec(),
            external_attrs: header.external_attrs.get(),
            local_header_offset: loc_base + sizes.local_header_offset,
            state: EntryState::Archived,
        };

        if let (true, false, Some(store)) = (
            parsed.has_extended_timestamp,
            parsed.has_ntfs_timestamp,
            local,
        ) {
            entry.read_local_times(store)?;
        }

        Ok(entry)
    }

    fn read_local_times(&mut self, store: &dyn RandomAccessStore) -> Result<()> {
        let header = LocalFileHeader::read_at(store, self.local_header_offset)?;
        let extra_len = header.extra_field_length.get() as usize;
        if extra_len < 9 {
            return Ok(());
        }
        let mut buf = vec![0u8; extra_len];
        let at = self.local_header_offset
            + LocalFileHeader::SIZE as u64
            + header.file_name_length.get() as u64;
        store.read_fully_at(&mut buf, at)?;
        if let Some(times) = extra::find_extended_timestamp(&buf) {
            self.apply_timestamps(&times);
        }
        Ok(())
    }

    fn apply_timestamps(&mut self, times: &Timestamps) {
        if let Some(mtime) = times.mtime {
            self.mtime = mtime;
        }
        if times.atime.is_some() {
            self.atime = times.atime;
        }
        if times.ctime.is_some() {
            self.ctime = times.ctime;
        }
    }

    /// Decode the local header at `offset`.
    ///
    /// When the header defers its sizes to a data descriptor, they are
    /// taken from `central`; without it such a header cannot be decoded.
    pub fn read_local(
        store: &dyn RandomAccessStore,
        offset: u64,
        central: Option<&Entry>,
    ) -> Result<LocalRecord> {
        let header = LocalFileHeader::read_at(store, offset)?;
        let mut var = vec![0u8; header.variable_data_size()];
        store.read_fully_at(&mut var, offset + LocalFileHeader::SIZE as u64)?;
        let (name, extra_block) = var.split_at(header.file_name_length.get() as usize);

        let entry_flags = header.flags.get();
        let method = CompressionMethod::try_from(header.compression_method.get())
            .map_err(Error::UnsupportedCompression)?;

        let mut sizes = Zip64Sizes {
            size: header.uncompressed_size.get() as u64,
            compressed_size: header.compressed_size.get() as u64,
            local_header_offset: offset,
        };
        let parsed = extra::parse(extra_block, &mut sizes)?;

        let mut crc32 = header.crc32.get();
        if entry_flags & flags::DATA_DESCRIPTOR != 0 {
            let central = central.ok_or_else(|| {
                Error::format(
                    "local header",
                    "sizes are in a data descriptor and no central record was given",
                )
            })?;
            sizes.size = central.size;
            sizes.compressed_size = central.compressed_size;
            crc32 = central.crc32;
        }

        let mut entry = Self {
            name: strip_leading_slashes(name).to_vec(),
            version_made_by: central.map_or(0, |c| c.version_made_by),
            flags: entry_flags,
            method,
            mtime: dos_time(header.last_modified.get()),
            atime: None,
            ctime: None,
            ntfs_times: parsed.has_ntfs_timestamp,
            crc32,
            compressed_size: sizes.compressed_size,
            size: sizes.size,
            extra: parsed.retained,
            comment: central.map(|c| c.comment.clone()).unwrap_or_default(),
            external_attrs: central.map_or(0, |c| c.external_attrs),
            local_header_offset: offset,
            state: EntryState::Archived,
        };
        entry.apply_timestamps(&parsed.timestamps);

        let data_offset = header.data_offset(offset);
        let descriptor_len = if entry.has_data_descriptor() {
            let zip64 = entry.size >= ZIP64_THRESHOLD || entry.compressed_size >= ZIP64_THRESHOLD;
            DataDescriptor::stored_len(store, data_offset + entry.compressed_size, zip64)?
        } else {
            0
        };

        Ok(LocalRecord {
            entry,
            data_offset,
            descriptor_len,
        })
    }

    #[inline]
    pub fn is_directory(&self) -> bool {
        self.name.ends_with(b"/")
    }

    #[inline]
    pub fn has_data_descriptor(&self) -> bool {
        self.flags & flags::DATA_DESCRIPTOR != 0
    }

    /// Name for messages.
    pub fn display_name(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }

    pub fn timestamps(&self) -> Timestamps {
        Timestamps {
            mtime: Some(self.mtime),
            atime: self.atime,
            ctime: self.ctime,
        }
    }

    /// Set all three timestamps. `None` leaves a timestamp unchanged.
    pub fn set_times(
        &mut self,
        mtime: Option<SystemTime>,
        atime: Option<SystemTime>,
        ctime: Option<SystemTime>,
    ) {
        self.apply_timestamps(&Timestamps { mtime, atime, ctime });
    }

    /// Write the central directory record. Returns the bytes written.
    pub fn write_cen<W: Write>(&self, out: &mut W) -> io::Result<u64> {
        let mut zip64 = Vec::with_capacity(3);
        let size = zip64_field(self.size, &mut zip64);
        let compressed_size = zip64_field(self.compressed_size, &mut zip64);
        let offset = zip64_field(self.local_header_offset, &mut zip64);

        let zip64_len = if zip64.is_empty() { 0 } else { 4 + 8 * zip64.len() };
        let extra_len = zip64_len + self.times_len(true) as usize + self.extra.len();
        let comment = &self.comment[..self.comment.len().min(0xFFFF)];
        let version = self.version_needed(!zip64.is_empty());

        let header = CentralDirectoryHeader {
            version_made_by: U16::new((self.version_made_by & 0xFF00) | version),
            version_needed: U16::new(version),
            flags: U16::new(self.flags),
            compression_method: U16::new(self.method as u16),
            last_modified: U32::new(time::system_time_to_dos(self.mtime)),
            crc32: U32::new(self.crc32),
            compressed_size: U32::new(compressed_size),
            uncompressed_size: U32::new(size),
            file_name_length: U16::new(checked_len(self.name.len(), "name")?),
            extra_field_length: U16::new(checked_len(extra_len, "extra field")?),
            file_comment_length: U16::new(comment.len() as u16),
            disk_number_start: U16::new(0),
            internal_attrs: U16::new(0),
            external_attrs: U32::new(self.external_attrs),
            local_header_offset: U32::new(offset),
        };

        out.write_all(&CentralDirectoryHeader::MAGIC)?;
        out.write_all(header.as_bytes())?;
        out.write_all(&self.name)?;
        if !zip64.is_empty() {
            extra::write_zip64(out, &zip64)?;
        }
        self.write_times(out, true)?;
        out.write_all(&self.extra)?;
        out.write_all(comment)?;

        Ok((CentralDirectoryHeader::SIZE + self.name.len() + extra_len + comment.len()) as u64)
    }

    /// Write the local header. Returns the bytes written.
    ///
    /// Entries with a data descriptor get zero CRC and sizes here; the real
    /// values follow the data.
    pub fn write_loc<W: Write>(&self, out: &mut W) -> io::Result<u64> {
        let mut zip64 = Vec::new();
        let (crc32, compressed_size, size) = if self.has_data_descriptor() {
            (0, 0, 0)
        } else if self.size >= ZIP64_THRESHOLD || self.compressed_size >= ZIP64_THRESHOLD {
            zip64.extend_from_slice(&[self.size, self.compressed_size]);
            (self.crc32, ZIP64_SENTINEL, ZIP64_SENTINEL)
        } else {
            (
                self.crc32,
                self.compressed_size as u32,
                self.size as u32,
            )
        };

        let zip64_len = if zip64.is_empty() { 0 } else { 4 + 8 * zip64.len() };
        let extra_len = zip64_len + self.times_len(false) as usize + self.extra.len();
        let version = self.version_needed(!zip64.is_empty());

        let header = LocalFileHeader {
            version_needed: U16::new(version),
            flags: U16::new(self.flags),
            compression_method: U16::new(self.method as u16),
            last_modified: U32::new(time::system_time_to_dos(self.mtime)),
            crc32: U32::new(crc32),
            compressed_size: U32::new(compressed_size),
            uncompressed_size: U32::new(size),
            file_name_length: U16::new(checked_len(self.name.len(), "name")?),
            extra_field_length: U16::new(checked_len(extra_len, "extra field")?),
        };

        out.write_all(&LocalFileHeader::MAGIC)?;
        out.write_all(header.as_bytes())?;
        out.write_all(&self.name)?;
        if !zip64.is_empty() {
            extra::write_zip64(out, &zip64)?;
        }
        self.write_times(out, false)?;
        out.write_all(&self.extra)?;

        Ok((LocalFileHeader::SIZE + self.name.len() + extra_len) as u64)
    }

    /// Write the data descriptor. Returns the bytes written.
    pub fn write_descriptor<W: Write>(&self, out: &mut W) -> io::Result<u64> {
        DataDescriptor {
            crc32: self.crc32,
            compressed_size: self.compressed_size,
            uncompressed_size: self.size,
        }
        .write(out)
    }

    fn times_len(&self, central: bool) -> u64 {
        if self.ntfs_times {
            extra::NTFS_LEN
        } else {
            extra::extended_timestamp_len(&self.timestamps(), central)
        }
    }

    fn write_times<W: Write>(&self, out: &mut W, central: bool) -> io::Result<u64> {
        let times = self.timestamps();
        if self.ntfs_times {
            extra::write_ntfs(out, &times)
        } else {
            extra::write_extended_timestamp(out, &times, central)
        }
    }

    fn version_needed(&self, zip64: bool) -> u16 {
        if zip64 {
            VERSION_ZIP64
        } else {
            self.method.version_needed()
        }
    }

    pub fn attributes(&self) -> EntryAttributes {
        EntryAttributes {
            name: self.display_name(),
            is_directory: self.is_directory(),
            size: self.size,
            compressed_size: self.compressed_size,
            crc32: self.crc32,
            method: self.method,
            last_modified: self.mtime,
            last_access: self.atime,
            creation: self.ctime,
            comment: self.comment.clone(),
            extra: self.extra.clone(),
        }
    }
}

fn zip64_field(value: u64, zip64: &mut Vec<u64>) -> u32 {
    if value >= ZIP64_THRESHOLD {
        zip64.push(value);
        ZIP64_SENTINEL
    } else {
        value as u32
    }
}

fn checked_len(len: usize, what: &str) -> io::Result<u16> {
    u16::try_from(len).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{what} too long for a ZIP header: {len} bytes"),
        )
    })
}

fn dos_time(dos: u32) -> SystemTime {
    time::dos_to_system_time(dos).unwrap_or(UNIX_EPOCH)
}

/// Remove any leading `/` from an entry name.
pub(crate) fn strip_leading_slashes(name: &[u8]) -> &[u8] {
    let start = name.iter().position(|&b| b != b'/').unwrap_or(name.len());
    &name[start..]
}

/// Attribute snapshot of an entry or directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryAttributes {
    /// Entry name as stored, without a leading `/`.
    pub name: String,
    pub is_directory: bool,
    /// Uncompressed size.
    pub size: u64,
    /// Compressed size. Data written through a byte channel is compressed on
    /// sync, so this stays 0 for such entries until then.
    pub compressed_size: u64,
    pub crc32: u32,
    pub method: CompressionMethod,
    pub last_modified: SystemTime,
    pub last_access: Option<SystemTime>,
    pub creation: Option<SystemTime>,
    pub comment: Vec<u8>,
    /// Unrecognized extra records.
    pub extra: Vec<u8>,
}

impl EntryAttributes {
    /// Attributes of a directory that exists only through its descendants.
    pub(crate) fn implied_directory(name: &[u8], time: SystemTime) -> Self {
        Self {
            name: String::from_utf8_lossy(name).into_owned(),
            is_directory: true,
            size: 0,
            compressed_size: 0,
            crc32: 0,
            method: CompressionMethod::Store,
            last_modified: time,
            last_access: None,
            creation: None,
            comment: Vec::new(),
            extra: Vec::new(),
        }
    }
}

impl fmt::Display for EntryAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |t: Option<SystemTime>| {
            match t.map(time::to_datetime) {
                Some(Some(dt)) => dt.to_rfc3339(),
                Some(None) => "out of range".to_string(),
                None => "-".to_string(),
            }
        };
        writeln!(f, "[{}]", self.name)?;
        writeln!(f, "    creationTime    : {}", show(self.creation))?;
        writeln!(f, "    lastAccessTime  : {}", show(self.last_access))?;
        writeln!(f, "    lastModifiedTime: {}", show(Some(self.last_modified)))?;
        writeln!(f, "    isDirectory     : {}", self.is_directory)?;
        writeln!(f, "    size            : {}", self.size)?;
        writeln!(f, "    compressedSize  : {}", self.compressed_size)?;
        writeln!(f, "    crc             : {:08x}", self.crc32)?;
        writeln!(f, "    method          : {}", self.method as u16)?;
        if !self.comment.is_empty() {
            writeln!(f, "    comment         : {}", String::from_utf8_lossy(&self.comment))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::time::Duration;

    fn file_entry(name: &str) -> Entry {
        let mut entry = Entry::new(
            name.as_bytes().to_vec(),
            CompressionMethod::Deflate,
            UNIX_EPOCH + Duration::from_secs(1_710_506_096),
            true,
        );
        entry.crc32 = 0x3610a686;
        entry.size = 5;
        entry.compressed_size = 7;
        entry
    }

    #[test]
    fn test_directory_entries_are_stored() {
        let dir = Entry::new(b"a/".to_vec(), CompressionMethod::Deflate, UNIX_EPOCH, true);
        assert!(dir.is_directory());
        assert_eq!(dir.method, CompressionMethod::Store);
        assert!(!file_entry("a").is_directory());
    }

    #[test]
    fn test_central_round_trip() {
        let mut entry = file_entry("a/b.txt");
        entry.comment = b"note".to_vec();
        entry.extra = vec![0x34, 0x12, 0x01, 0x00, 0xFF];
        entry.local_header_offset = 1234;

        let mut buf = Vec::new();
        let written = entry.write_cen(&mut buf).unwrap();
        assert_eq!(written as usize, buf.len());

        let record = CentralRecord::parse(&buf, 0).unwrap();
        assert_eq!(record.header.version_needed.get(), 20);
        let decoded = Entry::from_central(&record, 0, None).unwrap();
        assert_eq!(decoded.name, b"a/b.txt");
        assert_eq!(decoded.crc32, 0x3610a686);
        assert_eq!(decoded.size, 5);
        assert_eq!(decoded.compressed_size, 7);
        assert_eq!(decoded.local_header_offset, 1234);
        assert_eq!(decoded.mtime, entry.mtime);
        assert_eq!(decoded.comment, b"note");
        assert_eq!(decoded.extra, entry.extra);
    }

    #[test]
    fn test_zip64_decided_per_field() {
        let mut entry = file_entry("big");
        entry.size = ZIP64_THRESHOLD - 1;
        let mut buf = Vec::new();
        entry.write_cen(&mut buf).unwrap();
        let record = CentralRecord::parse(&buf, 0).unwrap();
        assert_eq!(record.header.version_needed.get(), 20);
        assert_eq!(record.header.uncompressed_size.get(), 0xFFFF_FFFE);

        entry.size = ZIP64_THRESHOLD;
        let mut buf = Vec::new();
        entry.write_cen(&mut buf).unwrap();
        let record = CentralRecord::parse(&buf, 0).unwrap();
        assert_eq!(record.header.version_needed.get(), VERSION_ZIP64);
        assert_eq!(record.header.uncompressed_size.get(), ZIP64_SENTINEL);
        assert_eq!(record.header.compressed_size.get(), 7);
        let decoded = Entry::from_central(&record, 0, None).unwrap();
        assert_eq!(decoded.size, ZIP64_THRESHOLD);
        assert_eq!(decoded.compressed_size, 7);
    }

    #[test]
    fn test_local_zip64_threshold() {
        let mut entry = file_entry("big");
        entry.size = ZIP64_THRESHOLD - 1;
        let mut buf = Vec::new();
        entry.write_loc(&mut buf).unwrap();
        let header = LocalFileHeader::read_at(&MemoryStore::new(buf), 0).unwrap();
        assert_eq!(header.version_needed.get(), 20);
        assert_eq!(header.uncompressed_size.get(), 0xFFFF_FFFE);
        assert_eq!(header.compressed_size.get(), 7);

        entry.size = ZIP64_THRESHOLD;
        let mut buf = Vec::new();
        let header_len = entry.write_loc(&mut buf).unwrap();
        let store = MemoryStore::new(buf);
        let header = LocalFileHeader::read_at(&store, 0).unwrap();
        assert_eq!(header.version_needed.get(), VERSION_ZIP64);
        assert_eq!(header.uncompressed_size.get(), ZIP64_SENTINEL);
        assert_eq!(header.compressed_size.get(), ZIP64_SENTINEL);

        let local = Entry::read_local(&store, 0, None).unwrap();
        assert_eq!(local.data_offset, header_len);
        assert_eq!(local.entry.size, ZIP64_THRESHOLD);
        assert_eq!(local.entry.compressed_size, 7);
    }

    #[test]
    fn test_ntfs_times_survive_rewrite() {
        let mut entry = file_entry("n.txt");
        entry.ntfs_times = true;
        entry.mtime = UNIX_EPOCH + Duration::from_nanos(1_710_506_096_250_000_000);
        entry.atime = Some(UNIX_EPOCH + Duration::from_secs(2_000_000));
        entry.ctime = Some(UNIX_EPOCH + Duration::from_secs(3_000_000));

        let mut cen = Vec::new();
        entry.write_cen(&mut cen).unwrap();
        let record = CentralRecord::parse(&cen, 0).unwrap();
        let decoded = Entry::from_central(&record, 0, None).unwrap();
        assert!(decoded.ntfs_times);
        assert_eq!(decoded.mtime, entry.mtime);
        assert_eq!(decoded.atime, entry.atime);
        assert_eq!(decoded.ctime, entry.ctime);
        assert!(decoded.extra.is_empty());

        let mut again = Vec::new();
        decoded.write_cen(&mut again).unwrap();
        assert_eq!(again, cen);

        let mut loc = Vec::new();
        entry.write_loc(&mut loc).unwrap();
        let local = Entry::read_local(&MemoryStore::new(loc), 0, None).unwrap();
        assert_eq!(local.entry.atime, entry.atime);
        assert_eq!(local.entry.ctime, entry.ctime);
    }

    #[test]
    fn test_display_out_of_range_time() {
        let mut attrs = file_entry("far").attributes();
        attrs.last_modified = UNIX_EPOCH + Duration::from_secs(1 << 45);
        attrs.last_access = Some(UNIX_EPOCH);
        let text = attrs.to_string();
        assert!(text.contains("lastModifiedTime: out of range"));
        assert!(text.contains("lastAccessTime  : 1970-01-01T00:00:00+00:00"));
        assert!(text.contains("creationTime    : -"));
    }

    #[test]
    fn test_encrypted_and_unknown_method_rejected() {
        let entry = file_entry("x");
        let mut buf = Vec::new();
        entry.write_cen(&mut buf).unwrap();

        let mut encrypted = buf.clone();
        encrypted[8] |= 0x01;
        let record = CentralRecord::parse(&encrypted, 0).unwrap();
        assert!(matches!(
            Entry::from_central(&record, 0, None),
            Err(Error::EncryptedEntry(_))
        ));

        let mut bzip = buf;
        bzip[10] = 12;
        let record = CentralRecord::parse(&bzip, 0).unwrap();
        assert!(matches!(
            Entry::from_central(&record, 0, None),
            Err(Error::UnsupportedCompression(12))
        ));
    }

    #[test]
    fn test_local_round_trip_with_times() {
        let mut entry = file_entry("a/b.txt");
        entry.atime = Some(UNIX_EPOCH + Duration::from_secs(2_000));
        entry.ctime = Some(UNIX_EPOCH + Duration::from_secs(3_000));

        let mut buf = Vec::new();
        let header_len = entry.write_loc(&mut buf).unwrap();
        buf.extend_from_slice(&[0u8; 7]);
        let store = MemoryStore::new(buf);

        let local = Entry::read_local(&store, 0, None).unwrap();
        assert_eq!(local.data_offset, header_len);
        assert_eq!(local.descriptor_len, 0);
        assert_eq!(local.entry.atime, entry.atime);
        assert_eq!(local.entry.ctime, entry.ctime);
        assert_eq!(local.entry.compressed_size, 7);
        assert_eq!(local.total_len(), header_len + 7);
    }

    #[test]
    fn test_local_with_descriptor_needs_central() {
        let mut entry = file_entry("d.bin");
        entry.flags |= flags::DATA_DESCRIPTOR;

        let mut buf = Vec::new();
        let header_len = entry.write_loc(&mut buf).unwrap();
        buf.extend_from_slice(&[0u8; 7]);
        let descriptor_len = entry.write_descriptor(&mut buf).unwrap();
        let store = MemoryStore::new(buf);

        assert!(Entry::read_local(&store, 0, None).is_err());

        let local = Entry::read_local(&store, 0, Some(&entry)).unwrap();
        assert_eq!(local.entry.crc32, 0x3610a686);
        assert_eq!(local.descriptor_len, descriptor_len);
        assert_eq!(local.total_len(), header_len + 7 + 16);
    }

    #[test]
    fn test_central_reads_local_times() {
        let mut entry = file_entry("t.txt");
        entry.atime = Some(UNIX_EPOCH + Duration::from_secs(2_000));

        let mut archive = Vec::new();
        entry.write_loc(&mut archive).unwrap();
        let store = MemoryStore::new(archive);

        let mut cen = Vec::new();
        entry.write_cen(&mut cen).unwrap();
        let record = CentralRecord::parse(&cen, 0).unwrap();

        let without = Entry::from_central(&record, 0, None).unwrap();
        assert_eq!(without.atime, None);
        let with = Entry::from_central(&record, 0, Some(&store)).unwrap();
        assert_eq!(with.atime, entry.atime);
    }

    #[test]
    fn test_leading_slash_stripped() {
        assert_eq!(strip_leading_slashes(b"//a/b"), b"a/b");
        assert_eq!(strip_leading_slashes(b"/"), b"");
        assert_eq!(strip_leading_slashes(b"a"), b"a");
    }
}
