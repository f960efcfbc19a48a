//! Positioned byte storage.
//!
//! [`RandomAccessStore`] is the seam between the archive logic and the bytes
//! underneath it. The archive file, staging files behind writable byte
//! channels and in-memory buffers all implement it.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

/// Byte storage addressed by absolute position.
pub trait RandomAccessStore: Send + Sync {
    /// Read up to `buf.len()` bytes at `pos`. Returns 0 at end of storage.
    fn read_at(&self, buf: &mut [u8], pos: u64) -> io::Result<usize>;

    /// Write `buf` at `pos`, extending the storage if needed.
    fn write_at(&self, buf: &[u8], pos: u64) -> io::Result<usize>;

    /// Current size in bytes.
    fn size(&self) -> io::Result<u64>;

    /// Shrink or extend the storage to `size` bytes.
    fn truncate(&self, size: u64) -> io::Result<()>;

    /// Fill `buf` from `pos`, failing with `UnexpectedEof` if the storage ends first.
    fn read_fully_at(&self, mut buf: &mut [u8], mut pos: u64) -> io::Result<()> {
        while !buf.is_empty() {
            match self.read_at(buf, pos) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("storage ended at {pos}"),
                    ))
                }
                Ok(n) => {
                    buf = &mut buf[n..];
                    pos += n as u64;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// A file accessed by position.
///
/// The seek and the transfer that follows it happen under one lock, so
/// concurrent positioned reads never observe each other's cursor.
#[derive(Debug)]
pub struct FileStore {
    file: Mutex<File>,
    writable: bool,
}

impl FileStore {
    /// Open `path` for reading, and for writing if `writable`.
    pub fn open(path: impl AsRef<Path>, writable: bool) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(writable).open(path)?;
        Ok(Self::from_file(file, writable))
    }

    /// Wrap an already open file.
    pub fn from_file(file: File, writable: bool) -> Self {
        Self {
            file: Mutex::new(file),
            writable,
        }
    }
}

impl RandomAccessStore for FileStore {
    fn read_at(&self, buf: &mut [u8], pos: u64) -> io::Result<usize> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(pos))?;
        file.read(buf)
    }

    fn write_at(&self, buf: &[u8], pos: u64) -> io::Result<usize> {
        if !self.writable {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "store opened read-only",
            ));
        }
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(pos))?;
        file.write(buf)
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.file.lock().metadata()?.len())
    }

    fn truncate(&self, size: u64) -> io::Result<()> {
        self.file.lock().set_len(size)
    }
}

/// An in-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<Vec<u8>>,
}

impl MemoryStore {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }
}

impl RandomAccessStore for MemoryStore {
    fn read_at(&self, buf: &mut [u8], pos: u64) -> io::Result<usize> {
        let data = self.data.read();
        let Ok(start) = usize::try_from(pos) else {
            return Ok(0);
        };
        if start >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        Ok(n)
    }

    fn write_at(&self, buf: &[u8], pos: u64) -> io::Result<usize> {
        let start = usize::try_from(pos)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "position out of range"))?;
        let mut data = self.data.write();
        if data.len() < start + buf.len() {
            data.resize(start + buf.len(), 0);
        }
        data[start..start + buf.len()].copy_from_slice(buf);
        Ok(buf.len())
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn truncate(&self, size: u64) -> io::Result<()> {
        let size = usize::try_from(size)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "size out of range"))?;
        self.data.write().resize(size, 0);
        Ok(())
    }
}

/// The open archive file shared between the filesystem and its readers.
///
/// Readers hold a [`ReaderLease`]; the count of live leases decides whether
/// a superseded archive can be released right away after a sync.
#[derive(Debug)]
pub(crate) struct ArchiveHandle {
    store: FileStore,
    readers: AtomicUsize,
}

impl ArchiveHandle {
    pub fn open(path: &Path) -> io::Result<Arc<Self>> {
        Ok(Arc::new(Self {
            store: FileStore::open(path, false)?,
            readers: AtomicUsize::new(0),
        }))
    }

    pub fn store(&self) -> &FileStore {
        &self.store
    }

    /// Number of readers still holding a lease.
    pub fn open_readers(&self) -> usize {
        self.readers.load(Ordering::Acquire)
    }

    /// Register a reader.
    pub fn lease(self: &Arc<Self>) -> ReaderLease {
        self.readers.fetch_add(1, Ordering::AcqRel);
        ReaderLease {
            handle: Arc::clone(self),
        }
    }
}

/// A registered reader of an [`ArchiveHandle`]. Dropping it deregisters.
#[derive(Debug)]
pub(crate) struct ReaderLease {
    handle: Arc<ArchiveHandle>,
}

impl ReaderLease {
    pub fn store(&self) -> &FileStore {
        &self.handle.store
    }
}

impl Drop for ReaderLease {
    fn drop(&mut self) {
        self.handle.readers.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store() {
        let store = MemoryStore::new(b"hello".to_vec());
        let mut buf = [0u8; 3];
        store.read_fully_at(&mut buf, 2).unwrap();
        assert_eq!(&buf, b"llo");
        assert!(store.read_fully_at(&mut buf, 3).is_err());

        assert_eq!(store.write_at(b"XY", 6).unwrap(), 2);
        assert_eq!(store.size().unwrap(), 8);
        let mut gap = [9u8; 3];
        store.read_fully_at(&mut gap, 5).unwrap();
        assert_eq!(&gap, &[0, b'X', b'Y']);

        store.truncate(2).unwrap();
        let mut rest = [0u8; 2];
        store.read_fully_at(&mut rest, 0).unwrap();
        assert_eq!(&rest, b"he");
        assert_eq!(store.read_at(&mut rest, 2).unwrap(), 0);
    }

    #[test]
    fn test_file_store() {
        let file = tempfile::tempfile().unwrap();
        let store = FileStore::from_file(file, true);
        assert_eq!(store.write_at(b"0123456789", 0).unwrap(), 10);
        assert_eq!(store.write_at(b"ab", 4).unwrap(), 2);

        let mut buf = [0u8; 4];
        store.read_fully_at(&mut buf, 3).unwrap();
        assert_eq!(&buf, b"3ab6");

        store.truncate(5).unwrap();
        assert_eq!(store.size().unwrap(), 5);
        assert_eq!(store.read_at(&mut buf, 5).unwrap(), 0);
    }

    #[test]
    fn test_read_only_file_store_rejects_writes() {
        let store = FileStore::from_file(tempfile::tempfile().unwrap(), false);
        let err = store.write_at(b"x", 0).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
    }

    #[test]
    fn test_reader_leases_are_counted() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let handle = ArchiveHandle::open(tmp.path()).unwrap();
        assert_eq!(handle.open_readers(), 0);
        let a = handle.lease();
        let b = handle.lease();
        assert_eq!(handle.open_readers(), 2);
        drop(a);
        assert_eq!(handle.open_readers(), 1);
        drop(b);
        assert_eq!(handle.open_readers(), 0);
    }
}
