//! Directory tree synthesized from the index.
//!
//! Archives need not contain entries for the directories their members
//! live in. The tree adds such directories as pseudo nodes so that
//! directory queries can be answered without scanning every name.

use hashbrown::HashMap;
use rustc_hash::FxBuildHasher;

use crate::index::{parent_of, trim_trailing_slash};

/// A node of the directory tree. Links are arena indices.
#[derive(Debug, Clone)]
pub(crate) struct TreeNode {
    /// Index key; directories end with `/`, the root is empty.
    pub name: Vec<u8>,
    /// Synthesized for a directory the archive does not declare.
    pub pseudo: bool,
    pub first_child: Option<usize>,
    pub next_sibling: Option<usize>,
}

impl TreeNode {
    #[inline]
    pub fn is_directory(&self) -> bool {
        self.pseudo || self.name.ends_with(b"/")
    }
}

/// Arena of [`TreeNode`]s with a name lookup. Node 0 is the root.
#[derive(Debug)]
pub(crate) struct DirectoryTree {
    nodes: Vec<TreeNode>,
    lookup: HashMap<Vec<u8>, usize, FxBuildHasher>,
}

impl DirectoryTree {
    pub const ROOT: usize = 0;

    /// Build the tree for the given index keys.
    pub fn build<'a>(keys: impl Iterator<Item = &'a [u8]>) -> Self {
        let mut tree = Self {
            nodes: vec![TreeNode {
                name: Vec::new(),
                pseudo: true,
                first_child: None,
                next_sibling: None,
            }],
            lookup: HashMap::with_hasher(FxBuildHasher),
        };
        tree.lookup.insert(Vec::new(), Self::ROOT);
        for key in keys {
            tree.insert(key, false);
        }
        tree
    }

    fn insert(&mut self, name: &[u8], pseudo: bool) -> usize {
        if let Some(&idx) = self.lookup.get(name) {
            if !pseudo {
                self.nodes[idx].pseudo = false;
            }
            return idx;
        }
        let parent = self.insert(parent_of(name), true);
        let idx = self.nodes.len();
        self.nodes.push(TreeNode {
            name: name.to_vec(),
            pseudo,
            first_child: None,
            next_sibling: self.nodes[parent].first_child,
        });
        self.nodes[parent].first_child = Some(idx);
        self.lookup.insert(name.to_vec(), idx);
        idx
    }

    /// Find the node for `name`, trying the directory form `name/` as well.
    pub fn find(&self, name: &[u8]) -> Option<&TreeNode> {
        if let Some(&idx) = self.lookup.get(name) {
            return Some(&self.nodes[idx]);
        }
        let mut dir = name.to_vec();
        dir.push(b'/');
        self.lookup.get(&dir).map(|&idx| &self.nodes[idx])
    }

    /// Iterate over the children of `node`.
    pub fn children<'a>(&'a self, node: &TreeNode) -> impl Iterator<Item = &'a TreeNode> + 'a {
        let mut next = node.first_child;
        std::iter::from_fn(move || {
            let idx = next?;
            let child = &self.nodes[idx];
            next = child.next_sibling;
            Some(child)
        })
    }

    /// Child names of `node` without trailing `/`.
    pub fn child_names(&self, node: &TreeNode) -> Vec<Vec<u8>> {
        self.children(node)
            .map(|child| trim_trailing_slash(&child.name).to_vec())
            .collect()
    }
}
