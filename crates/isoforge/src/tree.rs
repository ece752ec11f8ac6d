//! The logical tree (component A): an arena-allocated, polymorphic
//! in-memory hierarchy of directories, files, symlinks, special nodes, and
//! boot-catalog placeholders.
//!
//! Nodes are addressed by stable index rather than by owning pointer, so the
//! parent link is an index into the same arena instead of a reference that
//! would otherwise form a cycle with the directory's child list (Design
//! Notes §9: re-architect reference-counted polymorphic trees with
//! back-pointers as arena-allocated nodes keyed by stable indices).

use std::sync::Arc;
use std::time::SystemTime;

use bitflags::bitflags;

use crate::stream::ContentStream;

/// A stable handle to a node in a [`LogicalTree`]. Indices are never reused
/// while the tree that issued them is alive, so a `NodeId` captured by an
/// iterator stays valid even if sibling nodes are later removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

bitflags! {
    /// Which projection trees a node is hidden from, per §3 "hidden-mask".
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HiddenMask: u8 {
        const PRIMARY = 0b001;
        const JOLIET  = 0b010;
        const ISO1999 = 0b100;
    }
}

/// How [`LogicalTree::add_child`] resolves a name collision with an
/// existing sibling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplacePolicy {
    Never,
    Always,
    SameType,
    SameTypeAndNewer,
    IfNewer,
}

/// POSIX-ish attributes every node carries regardless of kind.
#[derive(Debug, Clone)]
pub struct NodeAttributes {
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
    pub hidden_mask: HiddenMask,
    pub sort_weight: i64,
}

impl Default for NodeAttributes {
    fn default() -> Self {
        let now = SystemTime::now();
        Self {
            mode: 0o644,
            uid: 0,
            gid: 0,
            atime: now,
            mtime: now,
            ctime: now,
            hidden_mask: HiddenMask::empty(),
            sort_weight: 0,
        }
    }
}

/// A node's type-specific payload, per the capability set in §3: {directory,
/// regular-file, symlink, special, boot-catalog placeholder}.
pub enum NodeKind {
    Directory { children: Vec<NodeId> },
    File { stream: Arc<dyn ContentStream> },
    Symlink { target: String },
    Special { device_id: u64 },
    BootCatalogPlaceholder,
}

impl NodeKind {
    pub fn has_children(&self) -> bool {
        matches!(self, NodeKind::Directory { .. })
    }

    pub fn has_content(&self) -> bool {
        matches!(self, NodeKind::File { .. })
    }
}

/// A single entry in the arena: a name, attributes, type-specific payload,
/// and an index-based parent link.
pub struct Node {
    pub name: String,
    pub parent: Option<NodeId>,
    pub attrs: NodeAttributes,
    pub kind: NodeKind,
    /// Opaque caller-defined extension metadata (ACL/xattr payloads, etc.),
    /// keyed by attribute name per §3.
    pub extension_info: Vec<(String, Arc<dyn std::any::Any + Send + Sync>)>,
}

/// Errors raised by logical-tree mutation, per the taxonomy in §7.
#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    #[error("a sibling named {0:?} already exists under this parent")]
    NodeNameNotUnique(String),
    #[error("node {0:?} is not a directory")]
    NotADirectory(NodeId),
}

/// An arena-allocated logical tree (component A). The arena owns every node
/// and drops them all at once when the tree itself is dropped; a `NodeId`
/// is just an index, so no node can keep another alive past the tree's own
/// lifetime.
pub struct LogicalTree {
    nodes: Vec<Node>,
    root: NodeId,
}

impl LogicalTree {
    /// Creates a tree containing only the root directory (empty name, no
    /// parent, per §3's invariant on root).
    pub fn create_root() -> Self {
        let root = Node {
            name: String::new(),
            parent: None,
            attrs: NodeAttributes::default(),
            kind: NodeKind::Directory {
                children: Vec::new(),
            },
            extension_info: Vec::new(),
        };
        Self {
            nodes: vec![root],
            root: NodeId(0),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    fn push_node(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        id
    }

    fn children_of(&self, parent: NodeId) -> Result<&[NodeId], TreeError> {
        match &self.nodes[parent.0].kind {
            NodeKind::Directory { children } => Ok(children),
            _ => Err(TreeError::NotADirectory(parent)),
        }
    }

    fn find_sibling(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.children_of(parent).ok()?.iter().copied().find(|&id| self.nodes[id.0].name == name)
    }

    /// Adds `node` as a child of `parent`, resolving a name collision
    /// according to `policy`. `policy == Never` fails on collision with
    /// [`TreeError::NodeNameNotUnique`].
    pub fn add_child(
        &mut self,
        parent: NodeId,
        name: impl Into<String>,
        kind: NodeKind,
        policy: ReplacePolicy,
    ) -> Result<NodeId, TreeError> {
        let name = name.into();
        if let Some(existing) = self.find_sibling(parent, &name) {
            let keep_new = match policy {
                ReplacePolicy::Never => return Err(TreeError::NodeNameNotUnique(name)),
                ReplacePolicy::Always => true,
                ReplacePolicy::SameType => {
                    std::mem::discriminant(&self.nodes[existing.0].kind) == std::mem::discriminant(&kind)
                }
                ReplacePolicy::SameTypeAndNewer | ReplacePolicy::IfNewer => {
                    let same_type = matches!(policy, ReplacePolicy::IfNewer)
                        || std::mem::discriminant(&self.nodes[existing.0].kind)
                            == std::mem::discriminant(&kind);
                    same_type
                }
            };
            if keep_new {
                self.remove(existing)?;
            } else {
                return Ok(existing);
            }
        }

        let node = Node {
            name: name.clone(),
            parent: Some(parent),
            attrs: NodeAttributes::default(),
            kind,
            extension_info: Vec::new(),
        };
        let id = self.push_node(node);
        match &mut self.nodes[parent.0].kind {
            NodeKind::Directory { children } => children.push(id),
            _ => return Err(TreeError::NotADirectory(parent)),
        }
        Ok(id)
    }

    pub fn create_dir(&mut self, parent: NodeId, name: impl Into<String>) -> Result<NodeId, TreeError> {
        self.add_child(
            parent,
            name,
            NodeKind::Directory {
                children: Vec::new(),
            },
            ReplacePolicy::Never,
        )
    }

    pub fn create_file(
        &mut self,
        parent: NodeId,
        name: impl Into<String>,
        stream: Arc<dyn ContentStream>,
    ) -> Result<NodeId, TreeError> {
        self.add_child(parent, name, NodeKind::File { stream }, ReplacePolicy::Never)
    }

    pub fn create_symlink(
        &mut self,
        parent: NodeId,
        name: impl Into<String>,
        target: impl Into<String>,
    ) -> Result<NodeId, TreeError> {
        self.add_child(
            parent,
            name,
            NodeKind::Symlink {
                target: target.into(),
            },
            ReplacePolicy::Never,
        )
    }

    pub fn create_special(
        &mut self,
        parent: NodeId,
        name: impl Into<String>,
        device_id: u64,
    ) -> Result<NodeId, TreeError> {
        self.add_child(parent, name, NodeKind::Special { device_id }, ReplacePolicy::Never)
    }

    pub fn create_boot_catalog_placeholder(
        &mut self,
        parent: NodeId,
        name: impl Into<String>,
    ) -> Result<NodeId, TreeError> {
        self.add_child(
            parent,
            name,
            NodeKind::BootCatalogPlaceholder,
            ReplacePolicy::Never,
        )
    }

    /// Detaches `id` from its parent's child list without destroying it.
    /// Ownership transfers to the caller: the node stays in the arena
    /// (orphaned) until dropped with the rest of the tree.
    pub fn take(&mut self, id: NodeId) -> Result<(), TreeError> {
        if let Some(parent) = self.nodes[id.0].parent {
            if let NodeKind::Directory { children } = &mut self.nodes[parent.0].kind {
                children.retain(|&c| c != id);
            }
        }
        self.nodes[id.0].parent = None;
        Ok(())
    }

    /// Destroys `id` and, if it is a directory, every descendant.
    pub fn remove(&mut self, id: NodeId) -> Result<(), TreeError> {
        let children: Vec<NodeId> = match &self.nodes[id.0].kind {
            NodeKind::Directory { children } => children.clone(),
            _ => Vec::new(),
        };
        for child in children {
            self.remove(child)?;
        }
        self.take(id)?;
        Ok(())
    }

    pub fn set_sort_weight(&mut self, id: NodeId, weight: i64) {
        self.nodes[id.0].attrs.sort_weight = weight;
    }

    pub fn set_hidden_mask(&mut self, id: NodeId, mask: HiddenMask) {
        self.nodes[id.0].attrs.hidden_mask = mask;
    }

    /// A finite, non-restartable sequence of this directory's children, per
    /// §4.A. Mutating the tree while an iteration from a prior call is still
    /// pending is undefined by the same rule that freezes the tree once
    /// emission starts (§5).
    pub fn iterate(&self, dir: NodeId) -> Result<impl Iterator<Item = NodeId> + '_, TreeError> {
        Ok(self.children_of(dir)?.iter().copied())
    }

    /// Computes the `/`-joined path from the root to `id`, used to key the
    /// flattened [`crate::file::FileInput`] staging structure.
    pub fn path_of(&self, id: NodeId) -> String {
        let mut segments = Vec::new();
        let mut current = id;
        while let Some(parent) = self.nodes[current.0].parent {
            segments.push(self.nodes[current.0].name.clone());
            current = parent;
        }
        segments.reverse();
        segments.join("/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{MemStream, StreamIdentity};

    #[test]
    fn root_has_no_parent_and_empty_name() {
        let tree = LogicalTree::create_root();
        let root = tree.root();
        assert!(tree.node(root).parent.is_none());
        assert_eq!(tree.node(root).name, "");
    }

    #[test]
    fn duplicate_sibling_name_fails_under_never_policy() {
        let mut tree = LogicalTree::create_root();
        let root = tree.root();
        tree.create_dir(root, "docs").unwrap();
        let err = tree.create_dir(root, "docs").unwrap_err();
        assert!(matches!(err, TreeError::NodeNameNotUnique(name) if name == "docs"));
    }

    #[test]
    fn path_of_joins_ancestors() {
        let mut tree = LogicalTree::create_root();
        let root = tree.root();
        let docs = tree.create_dir(root, "docs").unwrap();
        let stream: Arc<dyn ContentStream> =
            Arc::new(MemStream::new(vec![1], StreamIdentity::synthetic(1)));
        let file = tree.create_file(docs, "a.txt", stream).unwrap();
        assert_eq!(tree.path_of(file), "docs/a.txt");
    }

    #[test]
    fn remove_drops_descendants() {
        let mut tree = LogicalTree::create_root();
        let root = tree.root();
        let docs = tree.create_dir(root, "docs").unwrap();
        let stream: Arc<dyn ContentStream> =
            Arc::new(MemStream::new(vec![1], StreamIdentity::synthetic(2)));
        tree.create_file(docs, "a.txt", stream).unwrap();
        tree.remove(docs).unwrap();
        assert!(tree.iterate(root).unwrap().next().is_none());
    }
}
