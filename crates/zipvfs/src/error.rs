//! Error types for the zipvfs crate.

use std::io;

use thiserror::Error;

/// Errors that can occur when working with a ZIP filesystem.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Common library error.
    #[error("{0}")]
    Common(#[from] zipvfs_common::Error),

    /// Structurally invalid archive data.
    #[error("invalid {structure}: {reason}")]
    Format {
        structure: &'static str,
        reason: String,
    },

    /// Invalid ZIP signature.
    #[error("invalid {structure} signature: expected {expected:#010x}, got {actual:#010x}")]
    InvalidSignature {
        structure: &'static str,
        expected: u32,
        actual: u32,
    },

    /// Could not find the end of central directory record.
    #[error("could not find end of central directory record")]
    EndNotFound,

    /// Unsupported compression method.
    #[error("unsupported compression method: {0}")]
    UnsupportedCompression(u16),

    /// Entry data is encrypted.
    #[error("encrypted entries are not supported: {0}")]
    EncryptedEntry(String),

    /// No entry or directory with this name.
    #[error("no such file: {0}")]
    NotFound(String),

    /// Target already exists.
    #[error("file already exists: {0}")]
    AlreadyExists(String),

    /// Expected a directory.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// Expected a regular entry.
    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// Directory still has children.
    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),

    /// Archive was opened read-only.
    #[error("filesystem is read-only")]
    ReadOnly,

    /// Operation is not supported by ZIP filesystems.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    /// Conflicting or disallowed open options.
    #[error("invalid open options: {0}")]
    InvalidOptions(&'static str),

    /// Filesystem has been closed.
    #[error("filesystem is closed")]
    Closed,

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Shorthand for [`Error::Format`].
    pub(crate) fn format(structure: &'static str, reason: impl Into<String>) -> Self {
        Self::Format {
            structure,
            reason: reason.into(),
        }
    }

    fn io_kind(&self) -> io::ErrorKind {
        match self {
            Self::Io(err) => err.kind(),
            Self::NotFound(_) => io::ErrorKind::NotFound,
            Self::AlreadyExists(_) => io::ErrorKind::AlreadyExists,
            Self::ReadOnly => io::ErrorKind::PermissionDenied,
            Self::Unsupported(_) => io::ErrorKind::Unsupported,
            Self::InvalidOptions(_) | Self::InvalidConfig(_) => io::ErrorKind::InvalidInput,
            Self::Format { .. }
            | Self::InvalidSignature { .. }
            | Self::EndNotFound
            | Self::UnsupportedCompression(_)
            | Self::EncryptedEntry(_)
            | Self::Common(_) => io::ErrorKind::InvalidData,
            _ => io::ErrorKind::Other,
        }
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(err) => err,
            other => io::Error::new(other.io_kind(), other),
        }
    }
}

/// Result type for zipvfs operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_conversion_keeps_kind() {
        let err: io::Error = Error::NotFound("a/b".into()).into();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);

        let err: io::Error = Error::EndNotFound.into();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        let inner = io::Error::new(io::ErrorKind::TimedOut, "slow");
        let err: io::Error = Error::Io(inner).into();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn test_display() {
        let err = Error::format("central directory", "bad length");
        assert_eq!(err.to_string(), "invalid central directory: bad length");
    }
}
