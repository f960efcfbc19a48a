//! CRC-32 hashing utilities.
//!
//! ZIP archives checksum entry data with the IEEE 802.3 polynomial
//! (the same CRC used by zlib and gzip).

/// Incremental CRC-32 state, fed as entry bytes stream through.
pub use crc32fast::Hasher as Crc32;

/// Compute the CRC-32 of a byte slice.
#[inline]
pub fn hash_bytes(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Continue a CRC-32 computation from a previous value.
#[inline]
pub fn hash_bytes_with_seed(data: &[u8], seed: u32) -> u32 {
    let mut hasher = Crc32::new_with_initial(seed);
    hasher.update(data);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_hash() {
        assert_eq!(hash_bytes(&[]), 0);
    }

    #[test]
    fn test_known_hash() {
        assert_eq!(hash_bytes(b"hello"), 0x3610a686);
    }

    #[test]
    fn test_seeded_hash_continues() {
        let first = hash_bytes(b"hel");
        assert_eq!(hash_bytes_with_seed(b"lo", first), hash_bytes(b"hello"));
    }
}
