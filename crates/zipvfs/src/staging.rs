//! Staging files that hold entry data outside of memory until the next sync.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::Arc;

use tempfile::{Builder, NamedTempFile};

/// Prefix for every temporary file the filesystem creates next to the archive.
pub(crate) const TEMP_PREFIX: &str = "zipfstmp";

/// A temporary file deleted once the last handle to it is dropped.
///
/// Clones share the same file. Use [`StagingFile::duplicate`] for an
/// independent copy.
#[derive(Debug, Clone)]
pub(crate) struct StagingFile(Arc<NamedTempFile>);

impl StagingFile {
    /// Create an empty staging file in `dir`.
    pub fn create_in(dir: &Path) -> io::Result<Self> {
        let file = Builder::new().prefix(TEMP_PREFIX).tempfile_in(dir)?;
        Ok(Self(Arc::new(file)))
    }

    pub fn path(&self) -> &Path {
        self.0.path()
    }

    /// Open a new read handle with its own cursor.
    pub fn open_read(&self) -> io::Result<File> {
        File::open(self.path())
    }

    /// Open a new read/write handle with its own cursor.
    pub fn open_write(&self) -> io::Result<File> {
        OpenOptions::new().read(true).write(true).open(self.path())
    }

    #[cfg(test)]
    pub fn len(&self) -> io::Result<u64> {
        Ok(fs::metadata(self.path())?.len())
    }

    /// Copy the contents into a new, independent staging file in `dir`.
    pub fn duplicate(&self, dir: &Path) -> io::Result<Self> {
        let copy = Self::create_in(dir)?;
        fs::copy(self.path(), copy.path())?;
        Ok(copy)
    }
}
