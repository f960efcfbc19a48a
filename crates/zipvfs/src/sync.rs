//! Writing a changed filesystem back to its archive.
//!
//! A sync streams every entry into a temporary file next to the archive,
//! appends a fresh central directory and END record, and moves the
//! temporary file over the archive. Unmodified entries are copied byte for
//! byte. An entry that cannot be written is logged and left out; the output
//! is rolled back to where that entry started.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Seek, SeekFrom, Write};
use std::sync::Arc;
use std::time::Instant;

use tempfile::{Builder, TempPath};

use crate::entry::{Content, Entry, EntryState};
use crate::error::Result;
use crate::filesystem::{FsState, Shared};
use crate::index::{ArchiveIndex, Slot};
use crate::staging::{StagingFile, TEMP_PREFIX};
use crate::store::{ArchiveHandle, RandomAccessStore};
use crate::stream::pool::Pools;
use crate::stream::EntryEncoder;
use crate::zip::{flags, End};

const COPY_BUFFER: usize = 64 * 1024;

/// A superseded archive kept alive for the streams still reading it.
///
/// The file has been renamed to `shadow` and is deleted once no reader
/// holds a lease on `archive`.
#[derive(Debug)]
pub(crate) struct PendingDisposal {
    shadow: TempPath,
    archive: Arc<ArchiveHandle>,
}

/// Delete superseded archives that nobody reads any more. With `force`,
/// delete all of them.
pub(crate) fn reap(pending: &mut Vec<PendingDisposal>, force: bool) {
    let mut kept = Vec::new();
    for disposal in pending.drain(..) {
        if !force && disposal.archive.open_readers() > 0 {
            kept.push(disposal);
            continue;
        }
        let PendingDisposal { shadow, archive } = disposal;
        drop(archive);
        let path = shadow.to_path_buf();
        match shadow.close() {
            Ok(()) => log::debug!("removed superseded archive {}", path.display()),
            Err(err) => log::warn!("failed to remove {}: {err}", path.display()),
        }
    }
    *pending = kept;
}

/// Write all changes of `state` to the archive. Does nothing when there
/// are no changes.
pub(crate) fn sync(shared: &Shared, state: &mut FsState) -> Result<()> {
    reap(&mut state.pending, false);
    if !state.dirty {
        return Ok(());
    }
    let started = Instant::now();

    let temp = Builder::new()
        .prefix(TEMP_PREFIX)
        .tempfile_in(&shared.staging_dir)?;
    let mut out = ArchiveWriter::new(temp.as_file().try_clone()?);

    let store = state.archive.store();
    let mut written = Vec::with_capacity(state.index.len());
    let mut skipped = 0usize;
    for (key, slot) in state.index.iter() {
        let start = out.position();
        match write_slot(&state.index, store, &shared.pools, slot, &mut out) {
            Ok(entry) => written.push(entry),
            Err(err) => {
                log::warn!(
                    "leaving {:?} out of {}: {err}",
                    String::from_utf8_lossy(key),
                    shared.path.display()
                );
                out.rewind_to(start)?;
                skipped += 1;
            }
        }
    }

    let cen_offset = out.position();
    for entry in &written {
        entry.write_cen(&mut out)?;
    }
    let end = End {
        entry_count: written.len() as u64,
        cen_size: out.position() - cen_offset,
        cen_offset,
        comment: state.index.end().comment.clone(),
        ..End::default()
    };
    let end_pos = out.position();
    end.write(&mut out, end_pos, shared.config.force_zip64_end)?;
    out.finish()?;

    if state.archive.open_readers() > 0 {
        let shadow = Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(&shared.staging_dir)?
            .into_temp_path();
        fs::rename(&shared.path, &shadow)?;
        if let Err(err) = temp.persist(&shared.path) {
            if let Err(restore) = fs::rename(&shadow, &shared.path) {
                log::error!(
                    "could not restore {} from {}: {restore}",
                    shared.path.display(),
                    shadow.display()
                );
                match shadow.keep() {
                    Ok(kept) => log::error!("previous archive kept at {}", kept.display()),
                    Err(err) => log::error!("previous archive may be lost: {}", err.error),
                }
            }
            return Err(err.error.into());
        }
        log::debug!(
            "{} readers still open on the previous archive",
            state.archive.open_readers()
        );
        state.pending.push(PendingDisposal {
            shadow,
            archive: Arc::clone(&state.archive),
        });
    } else {
        temp.persist(&shared.path).map_err(|err| err.error)?;
    }

    state.dirty = false;
    state.tree = None;
    if state.open {
        state.archive = ArchiveHandle::open(&shared.path)?;
        state.index = ArchiveIndex::open(state.archive.store())?;
    }

    log::debug!(
        "synced {} entries ({skipped} skipped) to {} in {:?}",
        written.len(),
        shared.path.display(),
        started.elapsed()
    );
    Ok(())
}

/// Write the local header, data and descriptor of one slot. Returns the
/// entry as it must appear in the new central directory.
fn write_slot(
    index: &ArchiveIndex,
    store: &dyn RandomAccessStore,
    pools: &Pools,
    slot: &Slot,
    out: &mut ArchiveWriter,
) -> Result<Entry> {
    let (entry, rewrite) = match slot {
        Slot::Node { cen_pos } => {
            // Names stored with a leading `/` get a fresh local header.
            let rewrite = index.central_record(*cen_pos)?.name.starts_with(b"/");
            (index.materialize(slot, None)?, rewrite)
        }
        Slot::Entry(entry) => ((**entry).clone(), true),
    };
    match entry.state.clone() {
        EntryState::Archived => {
            let offset = entry.local_header_offset;
            copy_entry(store, entry, offset, rewrite, out)
        }
        EntryState::Copied { source_offset } => copy_entry(store, entry, source_offset, true, out),
        EntryState::New(content) => write_new(entry, &content, out),
        EntryState::ChannelBacked(file) => write_channel(entry, &file, pools, out),
    }
}

/// Copy an entry whose local header is at `offset` in the current archive.
///
/// With `rewrite`, a new local header is generated from `entry` and only
/// the data and descriptor are copied.
fn copy_entry(
    store: &dyn RandomAccessStore,
    mut entry: Entry,
    offset: u64,
    rewrite: bool,
    out: &mut ArchiveWriter,
) -> Result<Entry> {
    let local = Entry::read_local(store, offset, Some(&entry))?;
    entry.local_header_offset = out.position();
    entry.state = EntryState::Archived;
    if rewrite {
        entry.flags = (entry.flags & !flags::DATA_DESCRIPTOR)
            | (local.entry.flags & flags::DATA_DESCRIPTOR);
        entry.write_loc(out)?;
        copy_range(
            store,
            local.data_offset,
            local.entry.compressed_size + local.descriptor_len,
            out,
        )?;
    } else {
        copy_range(store, offset, local.total_len(), out)?;
    }
    Ok(entry)
}

fn write_new(mut entry: Entry, content: &Content, out: &mut ArchiveWriter) -> Result<Entry> {
    entry.local_header_offset = out.position();
    entry.write_loc(out)?;
    match content {
        Content::Bytes(bytes) => out.write_all(bytes)?,
        Content::Staged(file) => {
            io::copy(&mut BufReader::new(file.open_read()?), out)?;
        }
    }
    if entry.has_data_descriptor() {
        entry.write_descriptor(out)?;
    }
    entry.state = EntryState::Archived;
    Ok(entry)
}

/// Compress uncompressed channel data while writing it out.
fn write_channel(
    mut entry: Entry,
    file: &StagingFile,
    pools: &Pools,
    out: &mut ArchiveWriter,
) -> Result<Entry> {
    entry.flags |= flags::DATA_DESCRIPTOR;
    entry.local_header_offset = out.position();
    entry.write_loc(out)?;

    let mut encoder = EntryEncoder::new(&mut *out, entry.method, pools);
    io::copy(&mut BufReader::new(file.open_read()?), &mut encoder)?;
    let (_, sizes) = encoder.finish()?;
    entry.crc32 = sizes.crc32;
    entry.size = sizes.size;
    entry.compressed_size = sizes.compressed_size;

    entry.write_descriptor(out)?;
    entry.state = EntryState::Archived;
    Ok(entry)
}

fn copy_range(
    store: &dyn RandomAccessStore,
    mut pos: u64,
    mut len: u64,
    out: &mut impl Write,
) -> Result<()> {
    let mut buf = vec![0u8; usize::try_from(len).unwrap_or(usize::MAX).min(COPY_BUFFER)];
    while len > 0 {
        let n = len.min(buf.len() as u64) as usize;
        store.read_fully_at(&mut buf[..n], pos)?;
        out.write_all(&buf[..n])?;
        pos += n as u64;
        len -= n as u64;
    }
    Ok(())
}

/// Buffered output that tracks its position and can be cut back.
struct ArchiveWriter {
    out: BufWriter<File>,
    written: u64,
}

impl ArchiveWriter {
    fn new(file: File) -> Self {
        Self {
            out: BufWriter::with_capacity(COPY_BUFFER, file),
            written: 0,
        }
    }

    fn position(&self) -> u64 {
        self.written
    }

    /// Discard everything written after `pos`.
    fn rewind_to(&mut self, pos: u64) -> io::Result<()> {
        self.out.flush()?;
        let file = self.out.get_mut();
        file.set_len(pos)?;
        file.seek(SeekFrom::Start(pos))?;
        self.written = pos;
        Ok(())
    }

    fn finish(mut self) -> io::Result<()> {
        self.out.flush()?;
        self.out.get_ref().sync_all()
    }
}

impl Write for ArchiveWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.out.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_rewind_discards_tail() {
        let file = tempfile::tempfile().unwrap();
        let mut out = ArchiveWriter::new(file.try_clone().unwrap());
        out.write_all(b"keep").unwrap();
        out.write_all(b"drop this").unwrap();
        out.rewind_to(4).unwrap();
        out.write_all(b"!").unwrap();
        assert_eq!(out.position(), 5);
        out.finish().unwrap();
        assert_eq!(file.metadata().unwrap().len(), 5);
    }

    #[test]
    fn test_copy_range() {
        let data: Vec<u8> = (0..200_000u32).map(|i| i as u8).collect();
        let store = MemoryStore::new(data.clone());
        let mut out = Vec::new();
        copy_range(&store, 10, 150_000, &mut out).unwrap();
        assert_eq!(out, &data[10..150_010]);

        out.clear();
        copy_range(&store, 0, 0, &mut out).unwrap();
        assert!(out.is_empty());
        assert!(copy_range(&store, 199_990, 20, &mut out).is_err());
    }
}
