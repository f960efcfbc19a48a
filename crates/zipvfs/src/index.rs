//! Name-keyed index of archive entries.
//!
//! Archived entries are kept as a position into the raw central directory
//! and decoded on demand. Created or modified entries replace their slot
//! with a fully materialized [`Entry`].

use indexmap::{IndexMap, IndexSet};
use rustc_hash::FxBuildHasher;

use crate::entry::{strip_leading_slashes, Entry};
use crate::error::{Error, Result};
use crate::store::RandomAccessStore;
use crate::zip::central_dir::CentralRecord;
use crate::zip::{flags, CentralDirectoryHeader, CompressionMethod, End};

/// One index slot.
#[derive(Debug, Clone)]
pub(crate) enum Slot {
    /// Unmodified entry whose record starts at `cen_pos` in the central directory.
    Node { cen_pos: usize },
    /// Created or modified entry.
    Entry(Box<Entry>),
}

/// Entries of an archive keyed by name, in central directory order.
///
/// Keys have no leading `/`; directory keys end with `/`.
#[derive(Debug)]
pub(crate) struct ArchiveIndex {
    slots: IndexMap<Vec<u8>, Slot, FxBuildHasher>,
    cen: Vec<u8>,
    end: End,
    loc_base: u64,
}

impl ArchiveIndex {
    /// An index with no entries.
    pub fn empty() -> Self {
        Self {
            slots: IndexMap::with_hasher(FxBuildHasher),
            cen: Vec::new(),
            end: End::default(),
            loc_base: 0,
        }
    }

    /// Read the central directory of `store` and index its records.
    ///
    /// Every record is checked for a valid signature, a supported method,
    /// no encryption and lengths that stay inside the central directory.
    /// The records must fill the central directory exactly.
    pub fn open(store: &dyn RandomAccessStore) -> Result<Self> {
        let end = End::locate(store)?;
        if end.cen_size > end.end_pos {
            return Err(Error::format(
                "central directory",
                "size runs past the END record",
            ));
        }
        let cen_pos = end.end_pos - end.cen_size;
        let loc_base = cen_pos.checked_sub(end.cen_offset).ok_or_else(|| {
            Error::format("central directory", "offset runs past the END record")
        })?;

        let mut cen = vec![0u8; end.cen_size as usize];
        store.read_fully_at(&mut cen, cen_pos)?;

        let capacity = (end.entry_count as usize).min(cen.len() / CentralDirectoryHeader::SIZE);
        let mut slots = IndexMap::with_capacity_and_hasher(capacity, FxBuildHasher);

        let mut pos = 0usize;
        while pos < cen.len() {
            let record = CentralRecord::parse(&cen, pos)?;
            let entry_flags = record.header.flags.get();
            if entry_flags & flags::ENCRYPTED != 0 {
                return Err(Error::EncryptedEntry(
                    String::from_utf8_lossy(record.name).into_owned(),
                ));
            }
            let method = record.header.compression_method.get();
            CompressionMethod::try_from(method).map_err(Error::UnsupportedCompression)?;

            let name = strip_leading_slashes(record.name);
            if !name.is_empty()
                && slots
                    .insert(name.to_vec(), Slot::Node { cen_pos: pos })
                    .is_some()
            {
                log::warn!(
                    "duplicate entry {:?}, the later record wins",
                    String::from_utf8_lossy(name)
                );
            }
            pos += record.size();
        }
        if pos != cen.len() {
            return Err(Error::format(
                "central directory",
                "records do not fill the declared size",
            ));
        }

        log::debug!(
            "indexed {} entries ({} bytes of central directory at {cen_pos})",
            slots.len(),
            cen.len()
        );

        Ok(Self {
            slots,
            cen,
            end,
            loc_base,
        })
    }

    pub fn end(&self) -> &End {
        &self.end
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Resolve `name` to its stored key, trying `name/` when `name` itself
    /// is absent.
    pub fn resolve(&self, name: &[u8]) -> Option<&[u8]> {
        if let Some((key, _)) = self.slots.get_key_value(name) {
            return Some(key);
        }
        let mut dir = Vec::with_capacity(name.len() + 1);
        dir.extend_from_slice(name);
        dir.push(b'/');
        self.slots.get_key_value(&dir).map(|(key, _)| key.as_slice())
    }

    #[cfg(test)]
    pub fn get(&self, key: &[u8]) -> Option<&Slot> {
        self.slots.get(key)
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.slots.contains_key(key)
    }

    /// Decode the record at `cen_pos`.
    pub fn central_record(&self, cen_pos: usize) -> Result<CentralRecord<'_>> {
        CentralRecord::parse(&self.cen, cen_pos)
    }

    /// Materialize the entry stored under `key`. With `local`, extended
    /// timestamps are completed from the local header.
    pub fn entry(
        &self,
        key: &[u8],
        local: Option<&dyn RandomAccessStore>,
    ) -> Result<Option<Entry>> {
        match self.slots.get(key) {
            None => Ok(None),
            Some(slot) => self.materialize(slot, local).map(Some),
        }
    }

    pub fn materialize(&self, slot: &Slot, local: Option<&dyn RandomAccessStore>) -> Result<Entry> {
        match slot {
            Slot::Entry(entry) => Ok((**entry).clone()),
            Slot::Node { cen_pos } => {
                let record = self.central_record(*cen_pos)?;
                Entry::from_central(&record, self.loc_base, local)
            }
        }
    }

    /// Insert or replace the entry under its name. A replaced entry keeps its position.
    pub fn insert(&mut self, entry: Entry) {
        self.slots
            .insert(entry.name.clone(), Slot::Entry(Box::new(entry)));
    }

    /// Remove the entry under `key`, keeping the order of the others.
    pub fn remove(&mut self, key: &[u8]) -> Option<Slot> {
        self.slots.shift_remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &Slot)> {
        self.slots.iter().map(|(key, slot)| (key.as_slice(), slot))
    }

    pub fn keys(&self) -> impl Iterator<Item = &[u8]> {
        self.slots.keys().map(Vec::as_slice)
    }

    /// Whether any key other than `dir` itself lies below directory `dir`.
    pub fn has_descendants(&self, dir: &[u8]) -> bool {
        let dir = trim_trailing_slash(dir);
        self.keys()
            .any(|key| trim_trailing_slash(key) != dir && is_ancestor_of(dir, trim_trailing_slash(key)))
    }

    /// Direct children of directory `dir`, including directories that exist
    /// only through their descendants. Names carry no trailing `/`.
    pub fn children(&self, dir: &[u8]) -> Vec<Vec<u8>> {
        let dir = trim_trailing_slash(dir);
        let mut children: IndexSet<Vec<u8>, FxBuildHasher> = IndexSet::default();
        for key in self.keys() {
            let name = trim_trailing_slash(key);
            if name == dir || !is_ancestor_of(dir, name) {
                continue;
            }
            let rest = if dir.is_empty() {
                name
            } else {
                &name[dir.len() + 1..]
            };
            let first = rest.split(|&b| b == b'/').next().unwrap_or(rest);
            children.insert(name[..name.len() - rest.len() + first.len()].to_vec());
        }
        children.into_iter().collect()
    }
}

/// Whether `name` equals `dir` or lies below it. The empty name is the
/// root and is an ancestor of everything. Neither side may end with `/`.
pub(crate) fn is_ancestor_of(dir: &[u8], name: &[u8]) -> bool {
    if dir.is_empty() {
        return true;
    }
    name.starts_with(dir) && (name.len() == dir.len() || name[dir.len()] == b'/')
}

/// Parent key of `key`: `a/b/` and `a/b` both have parent `a/`; top-level
/// names have the root `""` as parent.
pub(crate) fn parent_of(key: &[u8]) -> &[u8] {
    let name = trim_trailing_slash(key);
    match name.iter().rposition(|&b| b == b'/') {
        Some(slash) => &name[..=slash],
        None => &[],
    }
}

pub(crate) fn trim_trailing_slash(name: &[u8]) -> &[u8] {
    name.strip_suffix(b"/").unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::time::UNIX_EPOCH;

    fn archive(names: &[&str]) -> Vec<u8> {
        let mut cen = Vec::new();
        for name in names {
            let entry = Entry::new(
                name.as_bytes().to_vec(),
                CompressionMethod::Store,
                UNIX_EPOCH,
                true,
            );
            entry.write_cen(&mut cen).unwrap();
        }
        let end = End {
            entry_count: names.len() as u64,
            cen_size: cen.len() as u64,
            cen_offset: 0,
            ..End::default()
        };
        let pos = cen.len() as u64;
        end.write(&mut cen, pos, false).unwrap();
        cen
    }

    #[test]
    fn test_open_and_resolve() {
        let index = ArchiveIndex::open(&MemoryStore::new(archive(&["a/", "a/b.txt", "c"]))).unwrap();
        assert_eq!(index.len(), 3);
        assert_eq!(index.resolve(b"a"), Some(&b"a/"[..]));
        assert_eq!(index.resolve(b"a/b.txt"), Some(&b"a/b.txt"[..]));
        assert_eq!(index.resolve(b"missing"), None);

        let entry = index.entry(b"a/b.txt", None).unwrap().unwrap();
        assert_eq!(entry.name, b"a/b.txt");
    }

    #[test]
    fn test_leading_slash_and_root_records() {
        let index = ArchiveIndex::open(&MemoryStore::new(archive(&["/", "/x.txt"]))).unwrap();
        assert_eq!(index.len(), 1);
        assert!(index.contains(b"x.txt"));
    }

    #[test]
    fn test_duplicates_keep_last() {
        let index = ArchiveIndex::open(&MemoryStore::new(archive(&["d", "e", "d"]))).unwrap();
        assert_eq!(index.len(), 2);
        let Some(Slot::Node { cen_pos }) = index.get(b"d") else {
            panic!("expected an archived slot");
        };
        assert!(*cen_pos > 0);
    }

    #[test]
    fn test_truncated_central_directory() {
        let mut data = archive(&["a", "b"]);
        // Shrink the declared central directory size by one byte.
        let size_at = data.len() - 22 + 12;
        data[size_at] -= 1;
        assert!(ArchiveIndex::open(&MemoryStore::new(data)).is_err());
    }

    #[test]
    fn test_insert_replaces_in_place() {
        let mut index = ArchiveIndex::open(&MemoryStore::new(archive(&["a", "b"]))).unwrap();
        let mut entry = index.entry(b"a", None).unwrap().unwrap();
        entry.comment = b"changed".to_vec();
        index.insert(entry);
        let keys: Vec<_> = index.keys().collect();
        assert_eq!(keys, [&b"a"[..], &b"b"[..]]);
        assert!(matches!(index.get(b"a"), Some(Slot::Entry(_))));

        index.remove(b"a");
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_children_include_implied_directories() {
        let index =
            ArchiveIndex::open(&MemoryStore::new(archive(&["a/b/c.txt", "a/d.txt", "e"]))).unwrap();
        let mut root = index.children(b"");
        root.sort();
        assert_eq!(root, [b"a".to_vec(), b"e".to_vec()]);

        let mut a = index.children(b"a");
        a.sort();
        assert_eq!(a, [b"a/b".to_vec(), b"a/d.txt".to_vec()]);
        assert!(index.has_descendants(b"a/b"));
        assert!(!index.has_descendants(b"e"));
    }

    #[test]
    fn test_ancestry_helpers() {
        assert!(is_ancestor_of(b"a", b"a/b"));
        assert!(is_ancestor_of(b"a", b"a"));
        assert!(!is_ancestor_of(b"a", b"ab"));
        assert!(is_ancestor_of(b"", b"anything"));

        assert_eq!(parent_of(b"a/b/"), b"a/");
        assert_eq!(parent_of(b"a/b"), b"a/");
        assert_eq!(parent_of(b"a"), b"");
        assert_eq!(parent_of(b"a/"), b"");
    }
}
