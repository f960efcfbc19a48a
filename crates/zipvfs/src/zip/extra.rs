//! Extra field blocks: ZIP64 sizes, NTFS timestamps and extended timestamps.
//!
//! An extra block is a sequence of `tag(2) size(2) data(size)` records.
//! Recognized records are decoded into entry fields and dropped from the
//! retained block; everything else is kept verbatim and written back.

use std::io::{self, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use byteorder::{LittleEndian, WriteBytesExt};
use zipvfs_common::BinaryReader;

use super::time;
use super::ZIP64_THRESHOLD;
use crate::error::{Error, Result};

/// Extra field tags.
pub mod tag {
    /// ZIP64 extended information.
    pub const ZIP64: u16 = 0x0001;
    /// NTFS timestamps.
    pub const NTFS: u16 = 0x000a;
    /// Info-ZIP extended timestamp.
    pub const EXTENDED_TIMESTAMP: u16 = 0x5455;
}

/// One record of an extra block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtraField<'a> {
    /// Header ID.
    pub tag: u16,
    /// Record payload.
    pub data: &'a [u8],
}

/// Iterator over the records of an extra block.
///
/// Stops at the first record whose declared size runs past the block.
#[derive(Debug, Clone)]
pub struct ExtraFields<'a> {
    reader: BinaryReader<'a>,
    done: bool,
}

impl<'a> ExtraFields<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            reader: BinaryReader::new(data),
            done: false,
        }
    }

    fn read_field(&mut self) -> zipvfs_common::Result<ExtraField<'a>> {
        let tag = self.reader.read_u16()?;
        let size = self.reader.read_u16()? as usize;
        let data = self.reader.read_bytes(size)?;
        Ok(ExtraField { tag, data })
    }
}

impl<'a> Iterator for ExtraFields<'a> {
    type Item = ExtraField<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.reader.remaining() < 4 {
            return None;
        }
        let field = self.read_field().ok();
        self.done = field.is_none();
        field
    }
}

/// Timestamps recovered from extra fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timestamps {
    pub mtime: Option<SystemTime>,
    pub atime: Option<SystemTime>,
    pub ctime: Option<SystemTime>,
}

/// Sizes that may be superseded by a ZIP64 record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Zip64Sizes {
    pub size: u64,
    pub compressed_size: u64,
    pub local_header_offset: u64,
}

/// Decoded contents of an extra block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedExtra {
    /// Timestamps from NTFS or extended timestamp records.
    pub timestamps: Timestamps,
    /// Whether an extended timestamp record was present.
    pub has_extended_timestamp: bool,
    /// Whether the timestamps came from an NTFS record.
    pub has_ntfs_timestamp: bool,
    /// Records that were not recognized, kept verbatim.
    pub retained: Vec<u8>,
}

/// Decode an extra block, replacing sentinel values in `sizes` with their
/// ZIP64 counterparts.
///
/// ZIP64 values are stored in a fixed order (size, compressed size, local
/// header offset) and only for fields that hold the sentinel.
pub fn parse(extra: &[u8], sizes: &mut Zip64Sizes) -> Result<ParsedExtra> {
    let mut parsed = ParsedExtra::default();

    for field in ExtraFields::new(extra) {
        match field.tag {
            tag::ZIP64 => apply_zip64(field.data, sizes)?,
            tag::NTFS => {
                if let Some(times) = parse_ntfs(field.data) {
                    parsed.timestamps = times;
                    parsed.has_ntfs_timestamp = true;
                }
            }
            tag::EXTENDED_TIMESTAMP => {
                parsed.has_extended_timestamp = true;
                let times = parse_extended_timestamp(field.data);
                // NTFS times take precedence.
                if times.mtime.is_some() && !parsed.has_ntfs_timestamp {
                    parsed.timestamps.mtime = times.mtime;
                }
            }
            _ => {
                parsed.retained.write_u16::<LittleEndian>(field.tag)?;
                parsed.retained.write_u16::<LittleEndian>(field.data.len() as u16)?;
                parsed.retained.extend_from_slice(field.data);
            }
        }
    }

    Ok(parsed)
}

fn apply_zip64(data: &[u8], sizes: &mut Zip64Sizes) -> Result<()> {
    let mut reader = BinaryReader::new(data);
    for field in [
        &mut sizes.size,
        &mut sizes.compressed_size,
        &mut sizes.local_header_offset,
    ] {
        if *field == ZIP64_THRESHOLD {
            *field = reader
                .read_u64()
                .map_err(|_| Error::format("ZIP64 extra field", "missing value for sentinel"))?;
        }
    }
    Ok(())
}

/// Decode an NTFS record: 4 reserved bytes, then attribute 0x0001 of
/// size 24 holding modification, access and creation times.
pub fn parse_ntfs(data: &[u8]) -> Option<Timestamps> {
    let mut reader = BinaryReader::new(data);
    reader.read_bytes(4).ok()?;
    let attr = reader.read_u16().ok()?;
    let size = reader.read_u16().ok()?;
    if attr != NTFS_ATTR_TIMES || size != 24 || reader.remaining() < 24 {
        return None;
    }
    let mut read = || reader.read_u64().ok().and_then(time::ntfs_to_system_time);
    Some(Timestamps {
        mtime: read(),
        atime: read(),
        ctime: read(),
    })
}

/// Decode an extended timestamp record. The flag byte announces which of
/// modification, access and creation times follow; a central directory
/// copy usually carries only the modification time even when the flags
/// announce more.
pub fn parse_extended_timestamp(data: &[u8]) -> Timestamps {
    let mut times = Timestamps::default();
    let mut reader = BinaryReader::new(data);
    let Ok(flags) = reader.read_u8() else {
        return times;
    };
    let mut next = |present: bool| -> Option<SystemTime> {
        if !present {
            return None;
        }
        let secs = reader.read_u32().ok()? as i32;
        Some(time::unix_to_system_time(secs))
    };
    times.mtime = next(flags & 0x1 != 0);
    times.atime = next(flags & 0x2 != 0);
    times.ctime = next(flags & 0x4 != 0);
    times
}

/// Find the extended timestamp record in a local header's extra block.
pub fn find_extended_timestamp(extra: &[u8]) -> Option<Timestamps> {
    ExtraFields::new(extra)
        .find(|field| field.tag == tag::EXTENDED_TIMESTAMP)
        .map(|field| parse_extended_timestamp(field.data))
}

/// Write a ZIP64 record holding `values`. Returns the bytes written.
pub fn write_zip64<W: Write>(out: &mut W, values: &[u64]) -> io::Result<u64> {
    out.write_u16::<LittleEndian>(tag::ZIP64)?;
    out.write_u16::<LittleEndian>((values.len() * 8) as u16)?;
    for value in values {
        out.write_u64::<LittleEndian>(*value)?;
    }
    Ok(4 + values.len() as u64 * 8)
}

/// Size of the NTFS record [`write_ntfs`] emits.
pub const NTFS_LEN: u64 = 4 + 32;

/// NTFS attribute tag of the timestamp triple.
const NTFS_ATTR_TIMES: u16 = 0x0001;

/// Write an NTFS record. Missing access or creation times repeat the
/// modification time.
pub fn write_ntfs<W: Write>(out: &mut W, times: &Timestamps) -> io::Result<u64> {
    let mtime = times.mtime.unwrap_or(UNIX_EPOCH);
    out.write_u16::<LittleEndian>(tag::NTFS)?;
    out.write_u16::<LittleEndian>((NTFS_LEN - 4) as u16)?;
    out.write_u32::<LittleEndian>(0)?;
    out.write_u16::<LittleEndian>(NTFS_ATTR_TIMES)?;
    out.write_u16::<LittleEndian>(24)?;
    for t in [Some(mtime), times.atime, times.ctime] {
        out.write_u64::<LittleEndian>(time::system_time_to_ntfs(t.unwrap_or(mtime)))?;
    }
    Ok(NTFS_LEN)
}

/// Size of the extended timestamp record [`write_extended_timestamp`] emits.
pub fn extended_timestamp_len(times: &Timestamps, central: bool) -> u64 {
    let mut len = 4 + 1;
    if times.mtime.is_some() {
        len += 4;
    }
    if !central {
        len += 4 * (times.atime.is_some() as u64 + times.ctime.is_some() as u64);
    }
    len
}

/// Write an extended timestamp record. The central form carries only the
/// modification time but keeps the flags of the local form.
pub fn write_extended_timestamp<W: Write>(
    out: &mut W,
    times: &Timestamps,
    central: bool,
) -> io::Result<u64> {
    let len = extended_timestamp_len(times, central);
    let flags = times.mtime.is_some() as u8
        | (times.atime.is_some() as u8) << 1
        | (times.ctime.is_some() as u8) << 2;

    out.write_u16::<LittleEndian>(tag::EXTENDED_TIMESTAMP)?;
    out.write_u16::<LittleEndian>((len - 4) as u16)?;
    out.write_u8(flags)?;
    if let Some(mtime) = times.mtime {
        out.write_i32::<LittleEndian>(time::system_time_to_unix(mtime))?;
    }
    if !central {
        for t in [times.atime, times.ctime].into_iter().flatten() {
            out.write_i32::<LittleEndian>(time::system_time_to_unix(t))?;
        }
    }
    Ok(len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn secs(s: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(s)
    }

    #[test]
    fn test_zip64_only_sentinels_replaced() {
        let mut extra = Vec::new();
        write_zip64(&mut extra, &[0x1_0000_0000]).unwrap();

        let mut sizes = Zip64Sizes {
            size: 10,
            compressed_size: ZIP64_THRESHOLD,
            local_header_offset: 7,
        };
        let parsed = parse(&extra, &mut sizes).unwrap();
        assert_eq!(sizes.size, 10);
        assert_eq!(sizes.compressed_size, 0x1_0000_0000);
        assert_eq!(sizes.local_header_offset, 7);
        assert!(parsed.retained.is_empty());
    }

    #[test]
    fn test_zip64_missing_value() {
        let mut extra = Vec::new();
        write_zip64(&mut extra, &[1]).unwrap();
        let mut sizes = Zip64Sizes {
            size: ZIP64_THRESHOLD,
            compressed_size: ZIP64_THRESHOLD,
            local_header_offset: 0,
        };
        assert!(parse(&extra, &mut sizes).is_err());
    }

    #[test]
    fn test_unknown_fields_retained() {
        let extra = [0x34, 0x12, 0x02, 0x00, 0xAA, 0xBB];
        let parsed = parse(&extra, &mut Zip64Sizes::default()).unwrap();
        assert_eq!(parsed.retained, extra);
    }

    #[test]
    fn test_truncated_field_stops_iteration() {
        let extra = [0x34, 0x12, 0x09, 0x00, 0xAA];
        assert_eq!(ExtraFields::new(&extra).count(), 0);
    }

    #[test]
    fn test_extended_timestamp_local_and_central() {
        let times = Timestamps {
            mtime: Some(secs(1_000)),
            atime: Some(secs(2_000)),
            ctime: Some(secs(3_000)),
        };

        let mut local = Vec::new();
        let written = write_extended_timestamp(&mut local, &times, false).unwrap();
        assert_eq!(written, 17);
        assert_eq!(local.len(), 17);
        assert_eq!(find_extended_timestamp(&local), Some(times));

        let mut central = Vec::new();
        assert_eq!(write_extended_timestamp(&mut central, &times, true).unwrap(), 9);
        // flags still announce all three, but only mtime follows
        assert_eq!(central[4], 0x7);
        let parsed = parse(&central, &mut Zip64Sizes::default()).unwrap();
        assert!(parsed.has_extended_timestamp);
        assert_eq!(parsed.timestamps.mtime, Some(secs(1_000)));
        assert_eq!(parsed.timestamps.atime, None);
    }

    #[test]
    fn test_ntfs() {
        let mut data = vec![0u8; 4];
        data.extend_from_slice(&1u16.to_le_bytes());
        data.extend_from_slice(&24u16.to_le_bytes());
        for t in [secs(10), secs(20), secs(30)] {
            data.extend_from_slice(&time::system_time_to_ntfs(t).to_le_bytes());
        }
        let mut extra = Vec::new();
        extra.extend_from_slice(&tag::NTFS.to_le_bytes());
        extra.extend_from_slice(&(data.len() as u16).to_le_bytes());
        extra.extend_from_slice(&data);

        let parsed = parse(&extra, &mut Zip64Sizes::default()).unwrap();
        assert_eq!(parsed.timestamps.mtime, Some(secs(10)));
        assert_eq!(parsed.timestamps.atime, Some(secs(20)));
        assert_eq!(parsed.timestamps.ctime, Some(secs(30)));
        assert!(parsed.has_ntfs_timestamp);
        assert!(!parsed.has_extended_timestamp);
    }

    #[test]
    fn test_ntfs_write_keeps_precision() {
        let times = Timestamps {
            mtime: Some(UNIX_EPOCH + Duration::from_nanos(1_700_000_000_123_456_700)),
            atime: Some(secs(2_000_000)),
            ctime: None,
        };
        let mut extra = Vec::new();
        assert_eq!(write_ntfs(&mut extra, &times).unwrap(), NTFS_LEN);
        assert_eq!(extra.len() as u64, NTFS_LEN);

        // An extended timestamp after the NTFS record does not truncate mtime.
        write_extended_timestamp(&mut extra, &times, true).unwrap();
        let parsed = parse(&extra, &mut Zip64Sizes::default()).unwrap();
        assert_eq!(parsed.timestamps.mtime, times.mtime);
        assert_eq!(parsed.timestamps.atime, times.atime);
        assert_eq!(parsed.timestamps.ctime, times.mtime);
        assert!(parsed.retained.is_empty());
    }

    #[test]
    fn test_truncated_ntfs_ignored() {
        let times = Timestamps {
            mtime: Some(secs(5)),
            ..Timestamps::default()
        };
        let mut extra = Vec::new();
        write_ntfs(&mut extra, &times).unwrap();
        let short = &extra[4..extra.len() - 8];
        assert_eq!(parse_ntfs(short), None);
    }
}
