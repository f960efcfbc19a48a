//! Seekable channels over entry content.

use std::fmt;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::sync::Arc;
use std::time::SystemTime;

use crate::entry::{Entry, EntryState};
use crate::error::{Error, Result};
use crate::filesystem::Shared;
use crate::staging::StagingFile;
use crate::store::{FileStore, RandomAccessStore};

/// A positioned reader and writer over one entry.
///
/// Read-only channels hold the uncompressed content in memory. Writable
/// channels work on a staging file; closing or dropping the channel
/// replaces the entry with its content.
pub struct EntryChannel {
    kind: ChannelKind,
}

enum ChannelKind {
    Reading(Cursor<Vec<u8>>),
    Writing(Box<Writing>),
    Closed,
}

struct Writing {
    shared: Arc<Shared>,
    entry: Entry,
    staging: StagingFile,
    store: FileStore,
    position: u64,
    append: bool,
}

impl Writing {
    fn commit(self) -> Result<()> {
        let Writing {
            shared,
            mut entry,
            staging,
            store,
            ..
        } = self;
        entry.size = store.size()?;
        drop(store);
        // Compressed on sync.
        entry.crc32 = 0;
        entry.compressed_size = 0;
        entry.mtime = SystemTime::now();
        entry.state = EntryState::ChannelBacked(staging);
        shared.commit(entry)
    }
}

impl EntryChannel {
    pub(crate) fn read_only(data: Vec<u8>) -> Self {
        Self {
            kind: ChannelKind::Reading(Cursor::new(data)),
        }
    }

    /// Writable channel over `staging`, which already holds any content
    /// kept from the entry being replaced.
    pub(crate) fn writable(
        shared: Arc<Shared>,
        entry: Entry,
        staging: StagingFile,
        append: bool,
    ) -> Result<Self> {
        let store = FileStore::from_file(staging.open_write()?, true);
        let position = if append { store.size()? } else { 0 };
        Ok(Self {
            kind: ChannelKind::Writing(Box::new(Writing {
                shared,
                entry,
                staging,
                store,
                position,
                append,
            })),
        })
    }

    pub fn is_open(&self) -> bool {
        !matches!(self.kind, ChannelKind::Closed)
    }

    pub fn is_writable(&self) -> bool {
        matches!(self.kind, ChannelKind::Writing(_))
    }

    pub fn position(&self) -> u64 {
        match &self.kind {
            ChannelKind::Reading(cursor) => cursor.position(),
            ChannelKind::Writing(channel) => channel.position,
            ChannelKind::Closed => 0,
        }
    }

    /// Current size of the content.
    pub fn size(&self) -> Result<u64> {
        match &self.kind {
            ChannelKind::Reading(cursor) => Ok(cursor.get_ref().len() as u64),
            ChannelKind::Writing(channel) => Ok(channel.store.size()?),
            ChannelKind::Closed => Err(Error::Closed),
        }
    }

    /// Shrink the content to `size` bytes. A larger `size` leaves the
    /// content unchanged; the position never stays past the end.
    pub fn truncate(&mut self, size: u64) -> Result<()> {
        match &mut self.kind {
            ChannelKind::Writing(channel) => {
                if size < channel.store.size()? {
                    channel.store.truncate(size)?;
                }
                channel.position = channel.position.min(size);
                Ok(())
            }
            ChannelKind::Reading(_) => Err(Error::InvalidOptions("channel is not writable")),
            ChannelKind::Closed => Err(Error::Closed),
        }
    }

    /// Close the channel, publishing the entry of a writable channel.
    /// Closing again does nothing.
    pub fn close(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.kind, ChannelKind::Closed) {
            ChannelKind::Writing(channel) => channel.commit(),
            _ => Ok(()),
        }
    }
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "channel is closed")
}

impl Read for EntryChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.kind {
            ChannelKind::Reading(cursor) => cursor.read(buf),
            ChannelKind::Writing(channel) => {
                let n = channel.store.read_at(buf, channel.position)?;
                channel.position += n as u64;
                Ok(n)
            }
            ChannelKind::Closed => Err(closed()),
        }
    }
}

impl Write for EntryChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.kind {
            ChannelKind::Writing(channel) => {
                if channel.append {
                    channel.position = channel.store.size()?;
                }
                let n = channel.store.write_at(buf, channel.position)?;
                channel.position += n as u64;
                Ok(n)
            }
            ChannelKind::Reading(_) => Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "channel is not writable",
            )),
            ChannelKind::Closed => Err(closed()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for EntryChannel {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match &mut self.kind {
            ChannelKind::Reading(cursor) => cursor.seek(pos),
            ChannelKind::Writing(channel) => {
                let target = match pos {
                    SeekFrom::Start(offset) => Some(offset),
                    SeekFrom::Current(delta) => channel.position.checked_add_signed(delta),
                    SeekFrom::End(delta) => channel.store.size()?.checked_add_signed(delta),
                };
                let target = target.ok_or_else(|| {
                    io::Error::new(io::ErrorKind::InvalidInput, "seek to a negative position")
                })?;
                channel.position = target;
                Ok(target)
            }
            ChannelKind::Closed => Err(closed()),
        }
    }
}

impl Drop for EntryChannel {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            log::warn!("failed to close channel: {err}");
        }
    }
}

impl fmt::Debug for EntryChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("EntryChannel");
        match &self.kind {
            ChannelKind::Reading(cursor) => debug
                .field("mode", &"read")
                .field("position", &cursor.position()),
            ChannelKind::Writing(channel) => debug
                .field("mode", &"write")
                .field("entry", &channel.entry.display_name())
                .field("position", &channel.position),
            ChannelKind::Closed => debug.field("mode", &"closed"),
        };
        debug.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_only_channel() {
        let mut channel = EntryChannel::read_only(b"0123456789".to_vec());
        assert!(!channel.is_writable());
        channel.seek(SeekFrom::End(-3)).unwrap();
        let mut tail = String::new();
        channel.read_to_string(&mut tail).unwrap();
        assert_eq!(tail, "789");
        assert_eq!(channel.size().unwrap(), 10);
        assert!(channel.write(b"x").is_err());
        assert!(matches!(channel.truncate(1), Err(Error::InvalidOptions(_))));

        channel.close().unwrap();
        assert!(!channel.is_open());
        assert!(matches!(channel.size(), Err(Error::Closed)));
    }
}
