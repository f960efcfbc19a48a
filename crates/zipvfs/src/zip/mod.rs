//! ZIP format structures.
//!
//! This module contains the low-level structures for reading and writing
//! ZIP archives, including ZIP64 extensions. Every function here is pure:
//! it decodes from a byte buffer or encodes into a `Write` sink.

pub mod central_dir;
pub mod eocd;
pub mod extra;
pub mod local;
pub mod time;

pub use central_dir::CentralDirectoryHeader;
pub use eocd::{Eocd64Locator, Eocd64Record, EocdRecord, End};
pub use local::{DataDescriptor, LocalFileHeader};

/// Value stored in a 32-bit field whose real value lives in the ZIP64 extra field.
pub const ZIP64_SENTINEL: u32 = 0xFFFF_FFFF;

/// Value stored in a 16-bit count whose real value lives in the ZIP64 END record.
pub const ZIP64_SENTINEL16: u16 = 0xFFFF;

/// Values at or above this need ZIP64 treatment when written.
pub const ZIP64_THRESHOLD: u64 = ZIP64_SENTINEL as u64;

/// Version needed to extract archives using ZIP64 structures.
pub const VERSION_ZIP64: u16 = 45;

/// General purpose bit flags.
pub mod flags {
    /// Entry data is encrypted.
    pub const ENCRYPTED: u16 = 0x0001;
    /// Sizes and CRC follow the data in a data descriptor.
    pub const DATA_DESCRIPTOR: u16 = 0x0008;
    /// Name and comment are UTF-8.
    pub const UTF8: u16 = 0x0800;
}

/// Compression methods supported by the filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[repr(u16)]
pub enum CompressionMethod {
    /// No compression (stored).
    Store = 0,
    /// Raw DEFLATE compression.
    Deflate = 8,
}

impl CompressionMethod {
    /// Version needed to extract an entry using this method.
    pub fn version_needed(self) -> u16 {
        match self {
            Self::Store => 10,
            Self::Deflate => 20,
        }
    }
}

impl TryFrom<u16> for CompressionMethod {
    type Error = u16;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Store),
            8 => Ok(Self::Deflate),
            other => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_round_trip() {
        assert_eq!(CompressionMethod::try_from(0), Ok(CompressionMethod::Store));
        assert_eq!(CompressionMethod::try_from(8), Ok(CompressionMethod::Deflate));
        assert_eq!(CompressionMethod::try_from(12), Err(12));
    }

    #[test]
    fn test_version_needed() {
        assert_eq!(CompressionMethod::Store.version_needed(), 10);
        assert_eq!(CompressionMethod::Deflate.version_needed(), 20);
    }
}
