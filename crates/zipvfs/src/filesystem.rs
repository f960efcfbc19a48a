//! The filesystem view of a ZIP archive.
//!
//! Paths are byte strings separated by `/`. Relative paths resolve against
//! the configured working directory. Changes are kept in the index and only
//! reach the archive file when it is synced, which happens on
//! [`ZipFileSystem::sync`], [`ZipFileSystem::close`] and
//! [`ZipFileSystem::dump_attributes`].

use std::fmt;
use std::fs;
use std::io::{self, BufReader, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::{Mutex, MutexGuard};

use crate::channel::EntryChannel;
use crate::config::Config;
use crate::entry::{Content, Entry, EntryAttributes, EntryState};
use crate::error::{Error, Result};
use crate::index::{parent_of, trim_trailing_slash, ArchiveIndex};
use crate::staging::StagingFile;
use crate::store::{ArchiveHandle, RandomAccessStore};
use crate::stream::pool::Pools;
use crate::stream::{ArchiveSlice, EntryReader, EntryWriter, Sink, Source};
use crate::sync::{self, PendingDisposal};
use crate::tree::{DirectoryTree, TreeNode};
use crate::zip::{flags, CompressionMethod, End, LocalFileHeader};

/// How an entry is opened for writing.
///
/// Mirrors [`std::fs::OpenOptions`]. Options with nothing set open for
/// writing, creating or truncating the entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpenOptions {
    read: bool,
    write: bool,
    append: bool,
    truncate: bool,
    create: bool,
    create_new: bool,
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&mut self, read: bool) -> &mut Self {
        self.read = read;
        self
    }

    pub fn write(&mut self, write: bool) -> &mut Self {
        self.write = write;
        self
    }

    /// Keep existing content and write after it.
    pub fn append(&mut self, append: bool) -> &mut Self {
        self.append = append;
        self
    }

    pub fn truncate(&mut self, truncate: bool) -> &mut Self {
        self.truncate = truncate;
        self
    }

    /// Create the entry if it does not exist.
    pub fn create(&mut self, create: bool) -> &mut Self {
        self.create = create;
        self
    }

    /// Create the entry, failing if it exists.
    pub fn create_new(&mut self, create_new: bool) -> &mut Self {
        self.create_new = create_new;
        self
    }

    fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    fn is_write(&self) -> bool {
        self.write || self.append
    }

    fn allows_create(&self) -> bool {
        self.create || self.create_new
    }
}

/// Options for [`ZipFileSystem::copy`] and [`ZipFileSystem::move_entry`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyOptions {
    /// Replace an existing target. A non-empty target directory is never replaced.
    pub replace_existing: bool,
    /// Keep the source's timestamps on a copy. Moves always keep them.
    pub copy_attributes: bool,
}

/// State guarded by the filesystem lock.
pub(crate) struct FsState {
    pub open: bool,
    pub archive: Arc<ArchiveHandle>,
    pub index: ArchiveIndex,
    /// Built on first use and dropped on every change.
    pub tree: Option<DirectoryTree>,
    pub dirty: bool,
    /// Superseded archives still read by open streams.
    pub pending: Vec<PendingDisposal>,
    use_tree: bool,
    local_times: bool,
}

impl FsState {
    fn update(&mut self, entry: Entry) {
        self.index.insert(entry);
        self.tree = None;
        self.dirty = true;
    }

    fn remove(&mut self, key: &[u8]) {
        if self.index.remove(key).is_some() {
            self.tree = None;
            self.dirty = true;
        }
    }

    fn tree(&mut self) -> &DirectoryTree {
        let index = &self.index;
        self.tree
            .get_or_insert_with(|| DirectoryTree::build(index.keys()))
    }

    pub fn local_store(&self) -> Option<&dyn RandomAccessStore> {
        if self.local_times {
            Some(self.archive.store() as &dyn RandomAccessStore)
        } else {
            None
        }
    }

    fn lookup(&self, name: &[u8]) -> Option<Vec<u8>> {
        self.index.resolve(name).map(<[u8]>::to_vec)
    }

    fn entry(&self, key: &[u8]) -> Result<Option<Entry>> {
        self.index.entry(key, self.local_store())
    }

    /// Whether `name` is the root, a declared directory or a directory
    /// implied by its descendants.
    fn is_directory(&mut self, name: &[u8]) -> bool {
        if name.is_empty() {
            return true;
        }
        if self.use_tree {
            return self.tree().find(name).is_some_and(TreeNode::is_directory);
        }
        match self.index.resolve(name) {
            Some(key) => key.ends_with(b"/"),
            None => self.index.has_descendants(name),
        }
    }

    fn exists(&mut self, name: &[u8]) -> bool {
        name.is_empty() || self.index.resolve(name).is_some() || self.is_directory(name)
    }

    fn has_children(&mut self, name: &[u8]) -> bool {
        if self.use_tree {
            self.tree()
                .find(name)
                .is_some_and(|node| node.first_child.is_some())
        } else {
            self.index.has_descendants(name)
        }
    }

    fn children(&mut self, name: &[u8]) -> Vec<Vec<u8>> {
        if self.use_tree {
            let tree = self.tree();
            tree.find(name)
                .map(|node| tree.child_names(node))
                .unwrap_or_default()
        } else {
            self.index.children(name)
        }
    }

    /// Fail if an ancestor of `name` is a regular entry. Missing ancestors
    /// are implied by the new entry.
    fn check_parents(&self, name: &[u8]) -> Result<()> {
        let mut parent = parent_of(name);
        while !parent.is_empty() {
            let dir = trim_trailing_slash(parent);
            if self.index.contains(dir) {
                return Err(Error::NotADirectory(display_path(dir)));
            }
            parent = parent_of(dir);
        }
        Ok(())
    }
}

/// Everything shared between the filesystem and its open streams.
pub(crate) struct Shared {
    pub path: PathBuf,
    /// Directory holding staging and temporary files, next to the archive.
    pub staging_dir: PathBuf,
    pub config: Config,
    pub pools: Arc<Pools>,
    pub read_only: bool,
    /// Reported as the modification time of implied directories.
    pub opened_at: SystemTime,
    pub state: Mutex<FsState>,
}

impl Shared {
    /// Lock the state of an open filesystem.
    pub fn lock(&self) -> Result<MutexGuard<'_, FsState>> {
        let state = self.state.lock();
        if !state.open {
            return Err(Error::Closed);
        }
        Ok(state)
    }

    /// Lock the state for a change.
    pub fn lock_writable(&self) -> Result<MutexGuard<'_, FsState>> {
        if self.read_only {
            return Err(Error::ReadOnly);
        }
        self.lock()
    }

    /// Publish a finished entry, replacing any entry of the same name.
    pub fn commit(&self, entry: Entry) -> Result<()> {
        let mut state = self.lock_writable()?;
        log::trace!("committing {}", entry.display_name());
        state.update(entry);
        Ok(())
    }

    fn resolve_path(&self, path: &[u8]) -> Vec<u8> {
        normalize(self.config.default_working_directory.as_bytes(), path)
    }

    fn new_entry(&self, name: Vec<u8>, method: CompressionMethod) -> Entry {
        Entry::new(name, method, SystemTime::now(), self.config.is_utf8())
    }

    /// The entry under `name`, which must not be a directory.
    fn regular_entry(&self, state: &mut FsState, name: &[u8]) -> Result<Entry> {
        let entry = match state.lookup(name) {
            Some(key) => state.entry(&key)?,
            None => None,
        };
        match entry {
            Some(entry) if !entry.is_directory() => Ok(entry),
            Some(_) => Err(Error::IsADirectory(display_path(name))),
            None if state.is_directory(name) => Err(Error::IsADirectory(display_path(name))),
            None => Err(Error::NotFound(display_path(name))),
        }
    }

    /// Open a reader over the uncompressed content of `entry`.
    fn reader(&self, state: &FsState, entry: &Entry) -> Result<EntryReader> {
        let source = match &entry.state {
            EntryState::Archived | EntryState::Copied { .. } => {
                let offset = match entry.state {
                    EntryState::Copied { source_offset } => source_offset,
                    _ => entry.local_header_offset,
                };
                let header = LocalFileHeader::read_at(state.archive.store(), offset)?;
                Source::Archive(ArchiveSlice::new(
                    state.archive.lease(),
                    header.data_offset(offset),
                    entry.compressed_size,
                ))
            }
            EntryState::New(Content::Bytes(bytes)) => Source::Memory(Cursor::new(Arc::clone(bytes))),
            EntryState::New(Content::Staged(file)) => {
                Source::Staged(BufReader::new(file.open_read()?))
            }
            EntryState::ChannelBacked(file) => {
                let source = Source::Staged(BufReader::new(file.open_read()?));
                return Ok(EntryReader::raw(source, entry.size));
            }
        };
        Ok(match entry.method {
            CompressionMethod::Store => EntryReader::raw(source, entry.size),
            CompressionMethod::Deflate => {
                EntryReader::inflating(source, self.pools.inflaters.acquire(), entry.size)
            }
        })
    }

    fn create_directory(&self, state: &mut FsState, name: &[u8]) -> Result<()> {
        if state.exists(name) {
            return Err(Error::AlreadyExists(display_path(name)));
        }
        state.check_parents(name)?;
        let mut key = name.to_vec();
        key.push(b'/');
        state.update(self.new_entry(key, CompressionMethod::Store));
        Ok(())
    }

    /// Prepare the entry that will replace or create `name` for writing.
    /// Returns the new entry and the entry it replaces.
    fn prepare_write(
        &self,
        state: &mut FsState,
        name: &[u8],
        options: &OpenOptions,
    ) -> Result<(Entry, Option<Entry>)> {
        if name.is_empty() {
            return Err(Error::AlreadyExists(display_path(name)));
        }
        match state.lookup(name) {
            Some(key) => {
                let old = state
                    .entry(&key)?
                    .ok_or_else(|| Error::NotFound(display_path(name)))?;
                if old.is_directory() || options.create_new {
                    return Err(Error::AlreadyExists(display_path(name)));
                }
                let mut entry = old.clone();
                entry.mtime = SystemTime::now();
                entry.flags |= flags::DATA_DESCRIPTOR;
                entry.crc32 = 0;
                entry.size = 0;
                entry.compressed_size = 0;
                entry.state = EntryState::New(Content::empty());
                Ok((entry, Some(old)))
            }
            None => {
                if state.is_directory(name) {
                    return Err(Error::AlreadyExists(display_path(name)));
                }
                if !options.allows_create() {
                    return Err(Error::NotFound(display_path(name)));
                }
                state.check_parents(name)?;
                let mut entry = self.new_entry(name.to_vec(), self.config.default_method);
                entry.flags |= flags::DATA_DESCRIPTOR;
                Ok((entry, None))
            }
        }
    }
}

/// A ZIP archive mounted as a hierarchical filesystem.
///
/// All operations are safe to call from several threads. Streams and
/// channels stay usable while other operations run, and readers keep
/// working across a sync.
///
/// # Example
///
/// ```no_run
/// use std::io::Read;
/// use zipvfs::{Config, ZipFileSystem};
///
/// let config = Config {
///     create_if_missing: true,
///     ..Config::default()
/// };
/// let fs = ZipFileSystem::open("archive.zip", config)?;
/// fs.write("docs/readme.txt", b"hello")?;
///
/// let mut text = String::new();
/// fs.new_input_stream("docs/readme.txt")?.read_to_string(&mut text)?;
/// fs.close()?;
/// # Ok::<(), zipvfs::Error>(())
/// ```
pub struct ZipFileSystem {
    shared: Arc<Shared>,
}

impl ZipFileSystem {
    /// Open the archive at `path`.
    ///
    /// With [`Config::create_if_missing`], a missing archive is created
    /// empty. An archive that cannot be opened for writing is mounted
    /// read-only.
    pub fn open<P: AsRef<Path>>(path: P, config: Config) -> Result<Self> {
        config.validate()?;
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            if !config.create_if_missing {
                return Err(Error::NotFound(path.display().to_string()));
            }
            create_empty(&path, config.force_zip64_end)?;
        }

        let read_only = !is_writable(&path);
        let archive = ArchiveHandle::open(&path)?;
        let index = ArchiveIndex::open(archive.store())?;
        let staging_dir = path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        log::debug!(
            "opened {} with {} entries{}",
            path.display(),
            index.len(),
            if read_only { " (read-only)" } else { "" }
        );

        let state = FsState {
            open: true,
            archive,
            index,
            tree: None,
            dirty: false,
            pending: Vec::new(),
            use_tree: config.build_directory_tree,
            local_times: config.read_local_times,
        };
        Ok(Self {
            shared: Arc::new(Shared {
                path,
                staging_dir,
                pools: Pools::new(config.pool_capacity),
                config,
                read_only,
                opened_at: SystemTime::now(),
                state: Mutex::new(state),
            }),
        })
    }

    /// Path of the archive file.
    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    pub fn is_read_only(&self) -> bool {
        self.shared.read_only
    }

    pub fn is_open(&self) -> bool {
        self.shared.state.lock().open
    }

    /// Whether `path` names an entry or a directory. False once closed.
    pub fn exists(&self, path: impl AsRef<[u8]>) -> bool {
        let name = self.shared.resolve_path(path.as_ref());
        match self.shared.lock() {
            Ok(mut state) => state.exists(&name),
            Err(_) => false,
        }
    }

    /// Whether `path` is a directory, declared or implied. False once closed.
    pub fn is_directory(&self, path: impl AsRef<[u8]>) -> bool {
        let name = self.shared.resolve_path(path.as_ref());
        match self.shared.lock() {
            Ok(mut state) => state.is_directory(&name),
            Err(_) => false,
        }
    }

    /// Attributes of the entry or directory at `path`.
    pub fn attributes(&self, path: impl AsRef<[u8]>) -> Result<EntryAttributes> {
        let name = self.shared.resolve_path(path.as_ref());
        let mut state = self.shared.lock()?;
        if let Some(key) = state.lookup(&name) {
            if let Some(entry) = state.entry(&key)? {
                return Ok(entry.attributes());
            }
        }
        if state.is_directory(&name) {
            let shown: &[u8] = if name.is_empty() { b"/" } else { &name };
            return Ok(EntryAttributes::implied_directory(
                shown,
                self.shared.opened_at,
            ));
        }
        Err(Error::NotFound(display_path(&name)))
    }

    /// Full names of the direct children of directory `path`, without a
    /// trailing `/`. With `filter`, only names it accepts are returned.
    ///
    /// The listing does not sync. Changes made since the last sync are
    /// already reflected in it.
    pub fn list(
        &self,
        path: impl AsRef<[u8]>,
        filter: Option<&dyn Fn(&[u8]) -> bool>,
    ) -> Result<Vec<Vec<u8>>> {
        let name = self.shared.resolve_path(path.as_ref());
        let mut state = self.shared.lock()?;
        if !state.is_directory(&name) {
            return Err(Error::NotADirectory(display_path(&name)));
        }
        let children = state.children(&name);
        Ok(match filter {
            Some(accept) => children
                .into_iter()
                .filter(|child| accept(child.as_slice()))
                .collect(),
            None => children,
        })
    }

    /// Create a directory entry. Missing parents are implied.
    pub fn create_directory(&self, path: impl AsRef<[u8]>) -> Result<()> {
        let name = self.shared.resolve_path(path.as_ref());
        let mut state = self.shared.lock_writable()?;
        self.shared.create_directory(&mut state, &name)
    }

    /// Copy the entry at `source` to `target`.
    ///
    /// Copying a directory creates an empty directory at `target`.
    pub fn copy(
        &self,
        source: impl AsRef<[u8]>,
        target: impl AsRef<[u8]>,
        options: CopyOptions,
    ) -> Result<()> {
        self.transfer(source.as_ref(), target.as_ref(), options, false)
    }

    /// Move the entry at `source` to `target`. Directories can only be
    /// moved when empty.
    pub fn move_entry(
        &self,
        source: impl AsRef<[u8]>,
        target: impl AsRef<[u8]>,
        options: CopyOptions,
    ) -> Result<()> {
        self.transfer(source.as_ref(), target.as_ref(), options, true)
    }

    fn transfer(
        &self,
        source: &[u8],
        target: &[u8],
        options: CopyOptions,
        remove_source: bool,
    ) -> Result<()> {
        let src = self.shared.resolve_path(source);
        let dst = self.shared.resolve_path(target);
        let mut state = self.shared.lock_writable()?;
        if src == dst {
            return Ok(());
        }
        if src.is_empty() {
            return Err(Error::Unsupported("copying or moving the root directory"));
        }

        let src_key = state.lookup(&src);
        let entry = match &src_key {
            Some(key) => state.entry(key)?,
            None if state.is_directory(&src) => None,
            None => return Err(Error::NotFound(display_path(&src))),
        };
        let is_directory = entry.as_ref().map_or(true, Entry::is_directory);
        if is_directory && remove_source {
            let dir_key = src_key.as_deref().unwrap_or(&src);
            if state.has_children(dir_key) {
                return Err(Error::DirectoryNotEmpty(display_path(&src)));
            }
        }

        let replaced = match state.lookup(&dst) {
            Some(dst_key) => {
                if !options.replace_existing {
                    return Err(Error::AlreadyExists(display_path(&dst)));
                }
                if dst_key.ends_with(b"/") && state.has_children(&dst_key) {
                    return Err(Error::DirectoryNotEmpty(display_path(&dst)));
                }
                Some(dst_key)
            }
            None if dst.is_empty() => return Err(Error::AlreadyExists(display_path(&dst))),
            None if state.is_directory(&dst) => {
                return Err(if options.replace_existing {
                    Error::DirectoryNotEmpty(display_path(&dst))
                } else {
                    Error::AlreadyExists(display_path(&dst))
                });
            }
            None => {
                state.check_parents(&dst)?;
                None
            }
        };

        // The target is only dropped once its replacement exists.
        let keep_times = options.copy_attributes || remove_source;
        let copy = match entry {
            Some(entry) if !entry.is_directory() => {
                let mut copy = entry.clone();
                copy.name = dst;
                copy.state = match entry.state {
                    EntryState::Archived => EntryState::Copied {
                        source_offset: entry.local_header_offset,
                    },
                    EntryState::Copied { source_offset } => EntryState::Copied { source_offset },
                    EntryState::New(content) if remove_source => EntryState::New(content),
                    EntryState::New(content) => {
                        EntryState::New(content.duplicate(&self.shared.staging_dir)?)
                    }
                    EntryState::ChannelBacked(file) if remove_source => {
                        EntryState::ChannelBacked(file)
                    }
                    EntryState::ChannelBacked(file) => {
                        EntryState::ChannelBacked(file.duplicate(&self.shared.staging_dir)?)
                    }
                };
                if !keep_times {
                    let now = SystemTime::now();
                    copy.set_times(Some(now), Some(now), Some(now));
                }
                copy
            }
            source_dir => {
                let mut key = dst;
                key.push(b'/');
                let mut dir = self.shared.new_entry(key, CompressionMethod::Store);
                if let Some(source_dir) = source_dir.filter(|_| keep_times) {
                    dir.set_times(Some(source_dir.mtime), source_dir.atime, source_dir.ctime);
                }
                dir
            }
        };
        if let Some(dst_key) = replaced {
            state.remove(&dst_key);
        }
        state.update(copy);

        if remove_source {
            if let Some(key) = src_key {
                state.remove(&key);
            }
        }
        Ok(())
    }

    /// Delete the entry or empty directory at `path`.
    pub fn delete(&self, path: impl AsRef<[u8]>) -> Result<()> {
        self.remove(path.as_ref(), true).map(|_| ())
    }

    /// Delete the entry or empty directory at `path` if it exists. Returns
    /// whether something was deleted.
    pub fn delete_if_exists(&self, path: impl AsRef<[u8]>) -> Result<bool> {
        self.remove(path.as_ref(), false)
    }

    fn remove(&self, path: &[u8], fail_if_missing: bool) -> Result<bool> {
        let name = self.shared.resolve_path(path);
        let mut state = self.shared.lock_writable()?;
        if name.is_empty() {
            return Err(Error::Unsupported("deleting the root directory"));
        }
        let Some(key) = state.lookup(&name) else {
            if state.is_directory(&name) {
                return Err(Error::DirectoryNotEmpty(display_path(&name)));
            }
            if fail_if_missing {
                return Err(Error::NotFound(display_path(&name)));
            }
            return Ok(false);
        };
        if key.ends_with(b"/") && state.has_children(&key) {
            return Err(Error::DirectoryNotEmpty(display_path(&name)));
        }
        state.remove(&key);
        Ok(true)
    }

    /// Set the timestamps of the entry at `path`. `None` leaves a
    /// timestamp unchanged. Implied directories have no timestamps to set.
    pub fn set_times(
        &self,
        path: impl AsRef<[u8]>,
        mtime: Option<SystemTime>,
        atime: Option<SystemTime>,
        ctime: Option<SystemTime>,
    ) -> Result<()> {
        let name = self.shared.resolve_path(path.as_ref());
        let mut state = self.shared.lock_writable()?;
        let mut entry = match state.lookup(&name) {
            Some(key) => state.entry(&key)?,
            None => None,
        }
        .ok_or_else(|| Error::NotFound(display_path(&name)))?;
        if let EntryState::Archived = entry.state {
            entry.state = EntryState::Copied {
                source_offset: entry.local_header_offset,
            };
        }
        entry.set_times(mtime, atime, ctime);
        state.update(entry);
        Ok(())
    }

    /// Open the content of the entry at `path` for reading.
    pub fn new_input_stream(&self, path: impl AsRef<[u8]>) -> Result<EntryReader> {
        let name = self.shared.resolve_path(path.as_ref());
        let mut state = self.shared.lock()?;
        let entry = self.shared.regular_entry(&mut state, &name)?;
        self.shared.reader(&state, &entry)
    }

    /// Open the entry at `path` for writing. The entry is replaced when
    /// the writer is finished or dropped.
    pub fn new_output_stream(
        &self,
        path: impl AsRef<[u8]>,
        options: &OpenOptions,
    ) -> Result<EntryWriter> {
        let mut options = options.clone();
        if options.is_empty() {
            options.write(true).create(true).truncate(true);
        }
        if options.read {
            return Err(Error::InvalidOptions("output streams cannot read"));
        }
        if options.append && options.truncate {
            return Err(Error::InvalidOptions("append and truncate cannot be combined"));
        }

        let name = self.shared.resolve_path(path.as_ref());
        let mut state = self.shared.lock_writable()?;
        let (entry, old) = self.shared.prepare_write(&mut state, &name, &options)?;
        let existing = match old {
            Some(old) if options.append => Some(self.shared.reader(&state, &old)?),
            _ => None,
        };
        let sink = if self.shared.config.use_staging_files {
            Sink::staged(StagingFile::create_in(&self.shared.staging_dir)?)?
        } else {
            Sink::Memory(Vec::new())
        };
        drop(state);

        let mut writer = EntryWriter::new(Arc::clone(&self.shared), entry, sink);
        if let Some(mut existing) = existing {
            if let Err(err) = io::copy(&mut existing, &mut writer) {
                writer.discard();
                return Err(err.into());
            }
        }
        Ok(writer)
    }

    /// Open a seekable channel on the entry at `path`.
    ///
    /// Without write or append, the channel is read-only. Writable channels
    /// buffer uncompressed content in a staging file; the entry is replaced
    /// when the channel is closed or dropped.
    pub fn new_byte_channel(
        &self,
        path: impl AsRef<[u8]>,
        options: &OpenOptions,
    ) -> Result<EntryChannel> {
        let name = self.shared.resolve_path(path.as_ref());
        if !options.is_write() {
            let mut state = self.shared.lock()?;
            let entry = self.shared.regular_entry(&mut state, &name)?;
            let mut reader = self.shared.reader(&state, &entry)?;
            drop(state);
            let mut data = Vec::new();
            reader.read_to_end(&mut data)?;
            return Ok(EntryChannel::read_only(data));
        }
        if options.append && options.truncate {
            return Err(Error::InvalidOptions("append and truncate cannot be combined"));
        }

        let mut state = self.shared.lock_writable()?;
        let (entry, old) = self.shared.prepare_write(&mut state, &name, options)?;
        let staging = StagingFile::create_in(&self.shared.staging_dir)?;
        let existing = match old {
            Some(old) if !options.truncate => Some(self.shared.reader(&state, &old)?),
            _ => None,
        };
        drop(state);

        if let Some(mut existing) = existing {
            io::copy(&mut existing, &mut staging.open_write()?)?;
        }
        EntryChannel::writable(Arc::clone(&self.shared), entry, staging, options.append)
    }

    /// Read the whole content of the entry at `path`.
    pub fn read(&self, path: impl AsRef<[u8]>) -> Result<Vec<u8>> {
        let mut reader = self.new_input_stream(path)?;
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        Ok(data)
    }

    /// Create or replace the entry at `path` with `data`.
    pub fn write(&self, path: impl AsRef<[u8]>, data: &[u8]) -> Result<()> {
        let mut writer = self.new_output_stream(path, &OpenOptions::new())?;
        writer.write_all(data)?;
        writer.finish()
    }

    /// Symbolic links cannot be represented.
    pub fn create_symbolic_link(
        &self,
        _link: impl AsRef<[u8]>,
        _target: impl AsRef<[u8]>,
    ) -> Result<()> {
        Err(Error::Unsupported("symbolic links"))
    }

    /// Write pending changes to the archive file.
    pub fn sync(&self) -> Result<()> {
        let mut state = self.shared.lock()?;
        sync::sync(&self.shared, &mut state)
    }

    /// Sync and release the archive. Later operations fail with
    /// [`Error::Closed`]; closing again does nothing.
    pub fn close(&self) -> Result<()> {
        let mut state = self.shared.state.lock();
        if !state.open {
            return Ok(());
        }
        state.open = false;
        let result = sync::sync(&self.shared, &mut state);
        sync::reap(&mut state.pending, true);
        state.index = ArchiveIndex::empty();
        state.tree = None;
        self.shared.pools.clear();
        log::debug!("closed {}", self.shared.path.display());
        result
    }

    /// Sync, then return the attributes of every entry in archive order.
    pub fn dump_attributes(&self) -> Result<Vec<EntryAttributes>> {
        let mut state = self.shared.lock()?;
        sync::sync(&self.shared, &mut state)?;
        state
            .index
            .iter()
            .map(|(_, slot)| {
                state
                    .index
                    .materialize(slot, state.local_store())
                    .map(|entry| entry.attributes())
            })
            .collect()
    }
}

impl Drop for ZipFileSystem {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            log::warn!("failed to close {}: {err}", self.shared.path.display());
        }
    }
}

impl fmt::Debug for ZipFileSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZipFileSystem")
            .field("path", &self.shared.path)
            .field("read_only", &self.shared.read_only)
            .finish_non_exhaustive()
    }
}

/// Resolve `path` against `working_dir` into an index name: `.` and `..`
/// collapsed, no leading or trailing `/`. The root is the empty name.
pub(crate) fn normalize(working_dir: &[u8], path: &[u8]) -> Vec<u8> {
    let base: &[u8] = if path.starts_with(b"/") { b"" } else { working_dir };
    let mut segments: Vec<&[u8]> = Vec::new();
    for segment in base.split(|&b| b == b'/').chain(path.split(|&b| b == b'/')) {
        match segment {
            b"" | b"." => {}
            b".." => {
                segments.pop();
            }
            _ => segments.push(segment),
        }
    }
    segments.join(&b'/')
}

fn display_path(name: &[u8]) -> String {
    format!("/{}", String::from_utf8_lossy(name))
}

fn create_empty(path: &Path, force_zip64: bool) -> Result<()> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)?;
    End::default().write(&mut file, 0, force_zip64)?;
    file.sync_all()?;
    log::debug!("created empty archive {}", path.display());
    Ok(())
}

fn is_writable(path: &Path) -> bool {
    let read_only = fs::metadata(path).map_or(true, |meta| meta.permissions().readonly());
    !read_only && fs::OpenOptions::new().write(true).open(path).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(b"/", b"a/b.txt"), b"a/b.txt");
        assert_eq!(normalize(b"/", b"/a//b/"), b"a/b");
        assert_eq!(normalize(b"/", b"/"), b"");
        assert_eq!(normalize(b"/", b"a/./c/../b"), b"a/b");
        assert_eq!(normalize(b"/", b"../../x"), b"x");
        assert_eq!(normalize(b"/work", b"x"), b"work/x");
        assert_eq!(normalize(b"/work", b"/x"), b"x");
    }

    #[test]
    fn test_display_path() {
        assert_eq!(display_path(b""), "/");
        assert_eq!(display_path(b"a/b"), "/a/b");
    }

    #[test]
    fn test_open_options() {
        assert!(OpenOptions::new().is_empty());
        let mut options = OpenOptions::new();
        options.append(true);
        assert!(options.is_write());
        assert!(!options.allows_create());
        options.create_new(true);
        assert!(options.allows_create());
    }

    #[test]
    fn test_open_missing_without_create() {
        let dir = tempfile::tempdir().unwrap();
        let err = ZipFileSystem::open(dir.path().join("missing.zip"), Config::default()).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_check_parents_rejects_file_ancestor() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            create_if_missing: true,
            ..Config::default()
        };
        let fs = ZipFileSystem::open(dir.path().join("t.zip"), config).unwrap();
        fs.write("a", b"file").unwrap();
        assert!(matches!(
            fs.write("a/b", b"nested"),
            Err(Error::NotADirectory(_))
        ));
        assert!(matches!(
            fs.create_directory("a/c/d"),
            Err(Error::NotADirectory(_))
        ));
    }
}
