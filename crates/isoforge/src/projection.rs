//! The projection-tree builder (component D): turns a [`crate::file::FileInput`]
//! (or, eventually, a [`crate::tree::LogicalTree`]) into the name-translated,
//! mangled, sorted tree each writer in the chain actually serializes.
//!
//! Three independent projections may be built from the same logical input: a
//! primary (ISO 9660) tree, a Joliet tree, and an ISO 9660:1999 tree. Each
//! applies its own charset, length limit, and mangling rule, which is why
//! this is a builder rather than a single fixed pass.

use std::collections::BTreeMap;

use isoforge_common::str::{Charset, CharsetError, CharsetFile, IsoStringFile};

use crate::file::{File, FileData, FileInput};
use crate::tree::HiddenMask;

/// Which on-disc convention a projection targets. Each has its own name
/// charset and length ceiling per §4.D.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectionKind {
    Primary,
    Joliet,
    Iso1999,
}

/// Errors raised while building a projection tree, per the taxonomy in §7.
#[derive(Debug, thiserror::Error)]
pub enum ProjectionError {
    #[error("path nesting exceeds the {0}-directory depth limit for this projection")]
    PathTooDeep(usize),
    #[error("path length exceeds the {0}-character limit for this projection")]
    PathTooLong(usize),
    #[error("more than {0} siblings collide after mangling and cannot be disambiguated")]
    TooManyFilesToMangle(usize),
    #[error(transparent)]
    Charset(#[from] CharsetError),
}

/// Options governing how names are translated into a projection, matching
/// the toggles enumerated in §6.
#[derive(Debug, Clone)]
pub struct ProjectionOptions {
    pub kind: ProjectionKind,
    /// Disallow more than 8 directory levels (primary-tree interchange
    /// rule); `allow-deep-paths` lifts this.
    pub allow_deep_paths: bool,
    /// Disallow a full path longer than 255 characters; `allow-longer-paths`
    /// lifts this ceiling to what the block addressing can still reach.
    pub allow_longer_paths: bool,
    /// Widen the per-component limit from 30 to 37 characters (still within
    /// a single directory record's 8-bit length field).
    pub max_37_char_filenames: bool,
    /// Append a trailing dot to extension-less names instead of leaving them
    /// bare; `no_force_dots` disables this ECMA-119 §7.5.1 convention.
    pub no_force_dots: bool,
    /// Keep lowercase letters instead of folding to uppercase (a common, if
    /// non-conformant, relaxation many readers tolerate).
    pub allow_lowercase: bool,
    /// Allow the full ASCII printable range rather than restricting to
    /// `d-characters` (non-conformant; readers vary in tolerance).
    pub allow_full_ascii: bool,
    /// Omit the `;1` version suffix ECMA-119 otherwise mandates on files.
    pub omit_version_numbers: bool,
    /// Joliet's own length ceiling is normally 64 UCS-2 units per component;
    /// this raises it to 103, matching what most Joliet readers accept.
    pub joliet_longer_paths: bool,
}

impl Default for ProjectionOptions {
    fn default() -> Self {
        Self {
            kind: ProjectionKind::Primary,
            allow_deep_paths: false,
            allow_longer_paths: false,
            max_37_char_filenames: false,
            no_force_dots: false,
            allow_lowercase: false,
            allow_full_ascii: false,
            omit_version_numbers: false,
            joliet_longer_paths: false,
        }
    }
}

/// A node in a built projection tree: an on-disc name plus either a
/// directory's children or a file-source-table index for its content.
#[derive(Debug, Clone)]
pub enum ProjectionNodeKind {
    Directory { children: Vec<ProjectionNode> },
    File { source_index: usize },
}

#[derive(Debug, Clone)]
pub struct ProjectionNode {
    /// The name as it will be written into a directory record: already
    /// validated, cased, suffixed, and mangled for this projection.
    pub name: String,
    pub kind: ProjectionNodeKind,
    /// Set once the layout planner (component F) assigns this directory a
    /// starting block; `None` until then.
    pub block: Option<u64>,
    pub size: u64,
    /// The logical-tree node this entry was projected from, if any (see
    /// [`crate::file::File::node_id`]). Lets the writer chain's extension
    /// plug-points (component J) query per-node metadata during layout.
    pub node_id: Option<crate::tree::NodeId>,
}

impl ProjectionNode {
    pub fn is_directory(&self) -> bool {
        matches!(self.kind, ProjectionNodeKind::Directory { .. })
    }
}

/// A fully built projection tree, ready for the layout planner and writer
/// chain to walk.
#[derive(Debug, Clone)]
pub struct ProjectionTree {
    pub root: ProjectionNode,
    pub kind: ProjectionKind,
}

/// The hidden-mask bit this projection kind checks, per §3.
fn hidden_bit(kind: ProjectionKind) -> HiddenMask {
    match kind {
        ProjectionKind::Primary => HiddenMask::PRIMARY,
        ProjectionKind::Joliet => HiddenMask::JOLIET,
        ProjectionKind::Iso1999 => HiddenMask::ISO1999,
    }
}

/// Per-component length ceiling, in characters, before mangling. ECMA-119
/// level 1 caps stems at 8 + 3, level 2/3 at 30; Joliet is UCS-2-unit based
/// but we operate on chars since the encoder widens at serialization time.
fn component_limit(opts: &ProjectionOptions) -> usize {
    match opts.kind {
        ProjectionKind::Primary if opts.max_37_char_filenames => 37,
        ProjectionKind::Primary => 30,
        ProjectionKind::Joliet if opts.joliet_longer_paths => 103,
        ProjectionKind::Joliet => 64,
        ProjectionKind::Iso1999 => 207,
    }
}

/// Translates one logical component name into its on-disc form: casing,
/// forced dot, and (for the primary tree) the `;1` version suffix.
fn translate_name(name: &str, is_directory: bool, opts: &ProjectionOptions) -> String {
    let mut s = if opts.allow_lowercase || opts.allow_full_ascii {
        name.to_string()
    } else {
        name.to_ascii_uppercase()
    };

    if !is_directory && opts.kind == ProjectionKind::Primary {
        if !s.contains('.') && !opts.no_force_dots {
            s.push('.');
        }
        if !opts.omit_version_numbers {
            s.push_str(";1");
        }
    }
    s
}

/// The highest mangling counter tried before giving up, per §4.D scenario 5
/// (a directory with over 10 million colliding siblings still must fail
/// cleanly rather than hang).
const MAX_MANGLE_COUNTER: u32 = 9_999_999;

/// The shortest an extension may be shrunk to while disambiguating a
/// collision, before the stem itself is touched.
const MIN_MANGLED_EXT_LEN: usize = 3;

/// Resolves a mangling collision by appending a numeric counter, trying
/// increasing counter widths until a unique name is found or the component
/// limit is exhausted, per §4.D. When `stem + tag + extension` would overflow
/// the component limit, the extension is shrunk first (down to
/// [`MIN_MANGLED_EXT_LEN`] characters) and only then is the stem truncated.
fn mangle(base: &str, limit: usize, taken: &BTreeMap<String, ()>) -> Result<String, ProjectionError> {
    if !taken.contains_key(base) {
        return Ok(base.to_string());
    }
    let (stem, ext) = match base.rsplit_once('.') {
        Some((stem, ext)) => (stem.to_string(), ext.to_string()),
        None => (base.to_string(), String::new()),
    };
    for n in 1..=MAX_MANGLE_COUNTER {
        let tag = format!("{n}");
        let dot_cost = if ext.is_empty() { 0 } else { 1 };
        let needed = stem.len() + dot_cost + ext.len() + tag.len();
        let overflow = needed.saturating_sub(limit);
        let ext_shrink = overflow.min(ext.len().saturating_sub(MIN_MANGLED_EXT_LEN));
        let shrunk_ext: String = ext.chars().take(ext.len() - ext_shrink).collect();
        let remaining_overflow = overflow - ext_shrink;
        let max_stem = stem.len().saturating_sub(remaining_overflow);
        if max_stem == 0 && !stem.is_empty() {
            continue;
        }
        let truncated_stem: String = stem.chars().take(max_stem).collect();
        let candidate = if shrunk_ext.is_empty() {
            format!("{truncated_stem}{tag}")
        } else {
            format!("{truncated_stem}{tag}.{shrunk_ext}")
        };
        if candidate.len() > limit {
            continue;
        }
        if !taken.contains_key(&candidate) {
            return Ok(candidate);
        }
    }
    Err(ProjectionError::TooManyFilesToMangle(MAX_MANGLE_COUNTER as usize))
}

/// Builds a projection tree from a flattened [`FileInput`], per §4.D: name
/// translation, forced uniqueness via mangling, collation sort, then depth
/// and total-path-length policing.
pub struct ProjectionBuilder<'a> {
    opts: ProjectionOptions,
    input: &'a FileInput,
}

impl<'a> ProjectionBuilder<'a> {
    pub fn new(input: &'a FileInput, opts: ProjectionOptions) -> Self {
        Self { opts, input }
    }

    pub fn build(
        &self,
        sources: &mut crate::source::FileSourceTable,
    ) -> Result<ProjectionTree, ProjectionError> {
        let (tree, _) = self.build_with_source_paths(sources)?;
        Ok(tree)
    }

    /// Like [`Self::build`], but also returns a map from each regular file's
    /// original logical path to the file-source-table index it landed at, so
    /// a caller that staged synthetic entries (e.g. El Torito's boot catalog)
    /// can find their assigned blocks after layout without re-parsing the
    /// tree it just built.
    pub fn build_with_source_paths(
        &self,
        sources: &mut crate::source::FileSourceTable,
    ) -> Result<(ProjectionTree, BTreeMap<String, usize>), ProjectionError> {
        let root_file = self
            .input
            .iter()
            .find(|f| f.path.is_empty())
            .expect("FileInput always seeds a root directory entry");
        let mut source_paths = BTreeMap::new();
        let root = self.build_node(root_file, 0, sources, &mut source_paths)?;
        Ok((
            ProjectionTree {
                root,
                kind: self.opts.kind,
            },
            source_paths,
        ))
    }

    fn build_node(
        &self,
        file: &File,
        depth: usize,
        sources: &mut crate::source::FileSourceTable,
        source_paths: &mut BTreeMap<String, usize>,
    ) -> Result<ProjectionNode, ProjectionError> {
        if file.is_directory() {
            if depth > 8 && !self.opts.allow_deep_paths {
                return Err(ProjectionError::PathTooDeep(8));
            }
            let limit = component_limit(&self.opts);
            let mut translated: Vec<(&File, String)> = Vec::new();
            let mut taken = BTreeMap::new();
            for child_name in file.get_children() {
                let child_path = if file.path.is_empty() {
                    child_name.to_string()
                } else {
                    format!("{}/{child_name}", file.path)
                };
                let child = self
                    .input
                    .iter()
                    .find(|f| f.path == child_path)
                    .expect("child path registered in FileInput must exist");
                if child.hidden_mask.contains(hidden_bit(self.opts.kind)) {
                    continue;
                }
                let name = translate_name(child_name, child.is_directory(), &self.opts);
                let name = mangle(&name, limit, &taken)?;
                if self.opts.kind == ProjectionKind::Primary && !self.opts.allow_full_ascii {
                    to_iso_string_file(&name)?;
                }
                taken.insert(name.clone(), ());
                translated.push((child, name));
            }
            translated.sort_by(|(_, a), (_, b)| a.cmp(b));

            let mut children = Vec::with_capacity(translated.len());
            for (child, name) in translated {
                let mut node = self.build_node(child, depth + 1, sources, source_paths)?;
                node.name = name;
                children.push(node);
            }
            Ok(ProjectionNode {
                name: String::new(),
                kind: ProjectionNodeKind::Directory { children },
                block: None,
                size: 0,
                node_id: file.node_id,
            })
        } else {
            let size = file.data.len() as u64;
            let stream: std::sync::Arc<dyn crate::stream::ContentStream> = match &file.data {
                FileData::Data(bytes) => {
                    let identity = crate::stream::StreamIdentity::synthetic(sources.len() as u64);
                    std::sync::Arc::new(crate::stream::MemStream::new(bytes.clone(), identity))
                }
                FileData::Fs(path) => {
                    let identity = crate::stream::StreamIdentity::synthetic(sources.len() as u64);
                    std::sync::Arc::new(crate::stream::FsStream::new(path.clone(), identity, size))
                }
                FileData::Stream(stream) => stream.clone(),
                FileData::Directory => unreachable!("directory handled above"),
            };
            let source_index = sources.insert(stream, file.sort_weight);
            source_paths.insert(file.path.clone(), source_index);
            Ok(ProjectionNode {
                name: String::new(),
                kind: ProjectionNodeKind::File { source_index },
                block: None,
                size,
                node_id: file.node_id,
            })
        }
    }

    /// Validates that no `/`-joined path in the built tree exceeds the
    /// allowed total length, per §4.D. Call once after [`Self::build`].
    pub fn check_path_lengths(&self, tree: &ProjectionTree) -> Result<(), ProjectionError> {
        let limit = if self.opts.allow_longer_paths { 4096 } else { 255 };
        fn walk(node: &ProjectionNode, prefix: &str, limit: usize) -> Result<(), ProjectionError> {
            let path = if prefix.is_empty() {
                node.name.clone()
            } else {
                format!("{prefix}/{}", node.name)
            };
            if path.len() > limit {
                return Err(ProjectionError::PathTooLong(limit));
            }
            if let ProjectionNodeKind::Directory { children } = &node.kind {
                for child in children {
                    walk(child, &path, limit)?;
                }
            }
            Ok(())
        }
        walk(&tree.root, "", limit)
    }
}

/// Converts a translated name into the fixed identifier type a directory
/// record actually stores, failing on any character the primary charset
/// rejects (e.g. when `allow_lowercase`/`allow_full_ascii` was not set but
/// the caller supplied mixed-case input).
pub fn to_iso_string_file(name: &str) -> Result<IsoStringFile, CharsetError> {
    if !CharsetFile::is_valid(name.as_bytes()) {
        return Err(CharsetError::InvalidChar);
    }
    Ok(IsoStringFile::from_bytes(name.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::{File, FileData, FileInput};

    fn sample_input() -> FileInput {
        let mut input = FileInput::empty();
        input.append(File::new("readme.txt", FileData::Data(vec![1, 2, 3])));
        input.append(File::new("README.TXT".to_ascii_lowercase(), FileData::Data(vec![4])));
        input
    }

    #[test]
    fn translate_name_uppercases_and_forces_dot_and_version() {
        let opts = ProjectionOptions::default();
        assert_eq!(translate_name("readme", false, &opts), "README.;1");
    }

    #[test]
    fn mangle_disambiguates_collision() {
        let mut taken = BTreeMap::new();
        taken.insert("FOO.TXT".to_string(), ());
        let result = mangle("FOO.TXT", 12, &taken).unwrap();
        assert_eq!(result, "FOO1.TXT");
    }

    #[test]
    fn mangle_shrinks_extension_before_stem() {
        let mut taken = BTreeMap::new();
        taken.insert("LONGSTEM.TXT".to_string(), ());
        // limit only leaves room for the stem plus counter if the extension
        // shrinks from 3 to its floor of 3 first; here it must fall back to
        // trimming the stem since the extension is already at the floor.
        let result = mangle("LONGSTEM.TXT", 9, &taken).unwrap();
        assert!(result.ends_with(".TXT"));
        assert!(result.len() <= 9);
    }

    #[test]
    fn mangle_accepts_collisions_past_the_old_four_digit_ceiling() {
        let mut taken = BTreeMap::new();
        taken.insert("F.TXT".to_string(), ());
        for n in 1..=10_000u32 {
            taken.insert(format!("F{n}.TXT"), ());
        }
        let result = mangle("F.TXT", 40, &taken).unwrap();
        assert!(!taken.contains_key(&result));
    }

    #[test]
    fn build_sorts_children_and_dedupes_identical_content() {
        let mut input = sample_input();
        // second file has a distinct path key so both survive flattening,
        // but we only dedup at the source-table level, not the name level.
        input.append(File::new("readme2.txt", FileData::Data(vec![1, 2, 3])));
        let mut sources = crate::source::FileSourceTable::new();
        let builder = ProjectionBuilder::new(&input, ProjectionOptions::default());
        let tree = builder.build(&mut sources).unwrap();
        match tree.root.kind {
            ProjectionNodeKind::Directory { children } => {
                assert_eq!(children.len(), 3);
            }
            _ => panic!("root must be a directory"),
        }
    }

    #[test]
    fn path_too_long_is_rejected_without_allow_longer_paths() {
        let mut input = FileInput::empty();
        let long_name = "a".repeat(300);
        input.append(File::new(long_name, FileData::Data(vec![1])));
        let mut sources = crate::source::FileSourceTable::new();
        let builder = ProjectionBuilder::new(&input, ProjectionOptions::default());
        let tree = builder.build(&mut sources).unwrap();
        assert!(builder.check_path_lengths(&tree).is_err());
    }
}
