//! A flattened, path-keyed view of the files and directories that make up an
//! image, and the primitive content sources ([`FileData`]) file-source
//! entries are built from.
//!
//! This is the staging area the writer chain and layout planner actually
//! walk. It can be built directly (`FileInput::from_fs`) for the common
//! case, or assembled from a [`crate::tree::LogicalTree`] via
//! [`FileInput::from_tree`] when the caller needs sort weights or a
//! per-projection hidden mask per node. The logical tree's symlink,
//! special-device, and boot-catalog-placeholder node kinds have no
//! counterpart here yet: they carry no bytes for the writer chain to stage,
//! and emitting them needs Rock Ridge record support the core engine does
//! not know the layout of (component J's job). `from_tree` skips them with
//! a warning rather than silently dropping them without a trace.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::stream::ContentStream;
use crate::tree::{HiddenMask, LogicalTree, NodeId, NodeKind};

/// The source of a regular file's bytes.
pub enum FileData {
    /// Bytes already resident in memory (e.g. a synthesized boot catalog).
    Data(Vec<u8>),
    /// Bytes read lazily from a host path when the file-content writer runs.
    Fs(PathBuf),
    /// A pre-built content stream, carrying its own [`StreamIdentity`] for
    /// dedup in [`crate::source::FileSourceTable`]. Used by
    /// [`FileInput::from_tree`] so two logical-tree nodes sharing one
    /// `Arc<dyn ContentStream>` still fold into a single file-source entry.
    Stream(Arc<dyn ContentStream>),
    /// A directory; its entries are every other [`File`] whose path is
    /// `"{this.path}/{entry}"` for some `entry` in [`File::children`].
    Directory,
}

impl std::fmt::Debug for FileData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileData::Data(data) => f.debug_tuple("Data").field(&data.len()).finish(),
            FileData::Fs(path) => f.debug_tuple("Fs").field(path).finish(),
            FileData::Stream(stream) => f.debug_tuple("Stream").field(&stream.identity()).finish(),
            FileData::Directory => write!(f, "Directory"),
        }
    }
}

impl Clone for FileData {
    fn clone(&self) -> Self {
        match self {
            FileData::Data(data) => FileData::Data(data.clone()),
            FileData::Fs(path) => FileData::Fs(path.clone()),
            FileData::Stream(stream) => FileData::Stream(stream.clone()),
            FileData::Directory => FileData::Directory,
        }
    }
}

impl FileData {
    pub fn len(&self) -> usize {
        match self {
            FileData::Data(data) => data.len(),
            FileData::Fs(path) => std::fs::metadata(path).map(|m| m.len() as usize).unwrap_or(0),
            FileData::Stream(stream) => stream.size() as usize,
            FileData::Directory => 0,
        }
    }
}

/// One entry in the flattened file list: either a directory or a regular
/// file, addressed by its full path (`/`-separated, root is `""`).
#[derive(Debug, Clone)]
pub struct File {
    pub path: String,
    pub data: FileData,
    /// Direct child names, populated for directories only.
    pub(crate) children: Vec<String>,
    /// Carried through to the file-source table so [`FormatOption::sort_files_by_weight`](crate::FormatOption::sort_files_by_weight)
    /// can place it, per §4.C. Zero (the default) sorts by insertion order.
    pub sort_weight: i64,
    /// Which projections this node is omitted from, per §3 "hidden-mask".
    pub hidden_mask: HiddenMask,
    /// The [`LogicalTree`] node this entry was staged from, when built via
    /// [`FileInput::from_tree`]. Lets the extension chain (component J) look
    /// up per-node attributes during layout; entries staged any other way
    /// (`from_fs`, synthesized entries like a boot catalog) carry no
    /// extension metadata, so this stays `None`.
    pub(crate) node_id: Option<NodeId>,
}

impl File {
    pub fn new(path: impl Into<String>, data: FileData) -> Self {
        Self {
            path: path.into(),
            data,
            children: Vec::new(),
            sort_weight: 0,
            hidden_mask: HiddenMask::empty(),
            node_id: None,
        }
    }

    pub fn directory(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            data: FileData::Directory,
            children: Vec::new(),
            sort_weight: 0,
            hidden_mask: HiddenMask::empty(),
            node_id: None,
        }
    }

    pub fn with_sort_weight(mut self, weight: i64) -> Self {
        self.sort_weight = weight;
        self
    }

    pub fn with_hidden_mask(mut self, mask: HiddenMask) -> Self {
        self.hidden_mask = mask;
        self
    }

    pub fn is_directory(&self) -> bool {
        matches!(self.data, FileData::Directory)
    }

    /// Reads the file's full content. For `Fs` sources this opens and reads
    /// the host path; a source that shrank, grew, or vanished between
    /// `compute-layout` and emission is the MISHAP case the file-content
    /// writer pads or truncates for, per the engine's size-drift policy.
    pub fn get_data(&self) -> Vec<u8> {
        match &self.data {
            FileData::Data(data) => data.clone(),
            FileData::Fs(path) => std::fs::read(path).unwrap_or_else(|err| {
                log::warn!("Failed to read {}: {err}, treating as empty", path.display());
                Vec::new()
            }),
            FileData::Stream(stream) => {
                if let Err(err) = stream.open() {
                    log::warn!("Failed to open stream for {}: {err}, treating as empty", self.path);
                    return Vec::new();
                }
                let mut out = Vec::new();
                let mut cursor = 0usize;
                let mut buf = [0u8; 8192];
                loop {
                    match stream.read(&mut cursor, &mut buf) {
                        Ok(0) => break,
                        Ok(n) => out.extend_from_slice(&buf[..n]),
                        Err(err) => {
                            log::warn!("Failed to read stream for {}: {err}, truncating", self.path);
                            break;
                        }
                    }
                }
                out
            }
            FileData::Directory => Vec::new(),
        }
    }

    /// The names of this directory's direct children, in insertion order.
    pub fn get_children(&self) -> impl Iterator<Item = &str> {
        self.children.iter().map(|s| s.as_str())
    }
}

/// A flattened set of files and directories ready to be staged by the
/// writer chain. Paths are `/`-separated and relative to the image root,
/// which itself is represented by the empty-path directory entry.
#[derive(Debug, Clone, Default)]
pub struct FileInput {
    files: Vec<File>,
}

impl FileInput {
    pub fn empty() -> Self {
        let mut input = Self { files: Vec::new() };
        input.files.push(File::directory(""));
        input
    }

    /// Walks a host directory tree and stages every entry under it.
    /// Symlinks are not followed (re-architected as a separate logical node
    /// kind by [`crate::tree`], not silently inlined here).
    pub fn from_fs<P: AsRef<Path>>(root: P) -> std::io::Result<Self> {
        let mut input = Self::empty();
        input.walk_fs(root.as_ref(), "")?;
        Ok(input)
    }

    fn walk_fs(&mut self, host_path: &Path, logical_path: &str) -> std::io::Result<()> {
        let mut names = Vec::new();
        let mut entries: Vec<_> = std::fs::read_dir(host_path)?.collect::<Result<_, _>>()?;
        entries.sort_by_key(|e| e.file_name());
        for entry in entries {
            let name = entry.file_name().to_string_lossy().into_owned();
            let child_path = if logical_path.is_empty() {
                name.clone()
            } else {
                format!("{logical_path}/{name}")
            };
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                self.files.push(File::directory(child_path.clone()));
                self.walk_fs(&entry.path(), &child_path)?;
            } else if file_type.is_file() {
                self.files
                    .push(File::new(child_path.clone(), FileData::Fs(entry.path())));
            } else {
                log::debug!("Skipping non-regular entry {}", entry.path().display());
                continue;
            }
            names.push(name);
        }
        self.dir_mut(logical_path).children = names;
        Ok(())
    }

    /// Flattens a [`LogicalTree`] into a [`FileInput`], carrying each node's
    /// sort weight and hidden mask along so the projection builder and
    /// file-source table see what the tree's caller set. Directory and
    /// regular-file nodes are staged directly; symlinks, special-device
    /// nodes, and boot-catalog placeholders have no flattened counterpart
    /// (see the module doc) and are logged and skipped.
    pub fn from_tree(tree: &LogicalTree) -> Self {
        let mut input = Self::empty();
        input.walk_tree(tree, tree.root(), "");
        input
    }

    fn walk_tree(&mut self, tree: &LogicalTree, id: NodeId, logical_path: &str) {
        let node = tree.node(id);
        match &node.kind {
            NodeKind::Directory { children } => {
                let children = children.clone();
                let mut names = Vec::with_capacity(children.len());
                for child_id in children {
                    let child = tree.node(child_id);
                    let child_path = if logical_path.is_empty() {
                        child.name.clone()
                    } else {
                        format!("{logical_path}/{}", child.name)
                    };
                    match &child.kind {
                        NodeKind::Directory { .. } => {
                            let mut entry = File::directory(child_path.clone())
                                .with_sort_weight(child.attrs.sort_weight)
                                .with_hidden_mask(child.attrs.hidden_mask);
                            entry.node_id = Some(child_id);
                            self.files.push(entry);
                            names.push(child.name.clone());
                            self.walk_tree(tree, child_id, &child_path);
                        }
                        NodeKind::File { stream } => {
                            let mut entry = File::new(child_path.clone(), FileData::Stream(stream.clone()))
                                .with_sort_weight(child.attrs.sort_weight)
                                .with_hidden_mask(child.attrs.hidden_mask);
                            entry.node_id = Some(child_id);
                            self.files.push(entry);
                            names.push(child.name.clone());
                        }
                        NodeKind::Symlink { .. }
                        | NodeKind::Special { .. }
                        | NodeKind::BootCatalogPlaceholder => {
                            log::warn!(
                                "Skipping {child_path:?}: symlink/special/boot-catalog-placeholder \
                                 nodes have no flattened FileInput counterpart yet"
                            );
                        }
                    }
                }
                self.dir_mut(logical_path).children = names;
            }
            _ => unreachable!("walk_tree is only ever called on a directory node"),
        }
    }

    fn dir_mut(&mut self, path: &str) -> &mut File {
        self.files
            .iter_mut()
            .find(|f| f.path == path && f.is_directory())
            .expect("directory must be staged before its children")
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.len() <= 1
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.iter().any(|f| f.path == path)
    }

    /// Stages a pre-built entry, e.g. a synthesized boot catalog, appending
    /// it (and registering it as a child of its parent directory).
    pub fn append(&mut self, file: File) {
        let parent = file.path.rsplit_once('/').map(|(p, _)| p).unwrap_or("");
        let name = file
            .path
            .rsplit_once('/')
            .map(|(_, n)| n)
            .unwrap_or(file.path.as_str())
            .to_string();
        if let Some(dir) = self.files.iter_mut().find(|f| f.path == parent && f.is_directory()) {
            dir.children.push(name);
        }
        self.files.push(file);
    }

    /// Splits the staged set into directories and regular files, each
    /// ordered as inserted.
    pub fn split(self) -> (Vec<File>, Vec<File>) {
        self.files.into_iter().partition(|f| f.is_directory())
    }

    pub fn iter(&self) -> impl Iterator<Item = &File> {
        self.files.iter()
    }
}

impl<'a> IntoIterator for &'a FileInput {
    type Item = &'a File;
    type IntoIter = std::slice::Iter<'a, File>;

    fn into_iter(self) -> Self::IntoIter {
        self.files.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_has_only_root() {
        let input = FileInput::empty();
        assert_eq!(input.len(), 1);
        assert!(input.contains(""));
    }

    #[test]
    fn append_registers_child() {
        let mut input = FileInput::empty();
        input.append(File::new("boot.catalog", FileData::Data(vec![0; 32])));
        assert!(input.contains("boot.catalog"));
        let (dirs, _files) = input.split();
        let root = dirs.iter().find(|d| d.path.is_empty()).unwrap();
        assert_eq!(root.get_children().collect::<Vec<_>>(), vec!["boot.catalog"]);
    }

    #[test]
    fn from_tree_flattens_directories_and_files_with_their_weight() {
        use crate::stream::{MemStream, StreamIdentity};
        use crate::tree::LogicalTree;

        let mut tree = LogicalTree::create_root();
        let root = tree.root();
        let docs = tree.create_dir(root, "docs").unwrap();
        let stream: Arc<dyn ContentStream> =
            Arc::new(MemStream::new(vec![1, 2, 3], StreamIdentity::synthetic(1)));
        let a = tree.create_file(docs, "a.txt", stream).unwrap();
        tree.set_sort_weight(a, 7);

        let input = FileInput::from_tree(&tree);
        assert!(input.contains("docs"));
        assert!(input.contains("docs/a.txt"));
        let staged = input.iter().find(|f| f.path == "docs/a.txt").unwrap();
        assert_eq!(staged.sort_weight, 7);
        assert_eq!(staged.get_data(), vec![1, 2, 3]);
    }

    #[test]
    fn from_tree_skips_symlinks_with_no_flattened_counterpart() {
        use crate::tree::LogicalTree;

        let mut tree = LogicalTree::create_root();
        let root = tree.root();
        tree.create_symlink(root, "link", "docs/a.txt").unwrap();

        let input = FileInput::from_tree(&tree);
        assert!(!input.contains("link"));
        let root_entry = input.iter().find(|f| f.path.is_empty()).unwrap();
        assert_eq!(root_entry.get_children().count(), 0);
    }
}
