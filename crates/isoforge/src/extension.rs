//! Extension plug-points (component J): the hook a caller implements to add
//! per-node metadata to a directory record (Rock Ridge System Use entries,
//! AAIP extended attributes, or a private vendor format) without the writer
//! chain needing to know anything about the specific extension.
//!
//! An extension only ever appends bytes after a directory record's own
//! fixed-size fields (the "system use" area ECMA-119 reserves for exactly
//! this purpose), so the contract is narrow: given a node, how many extra
//! bytes does it need, and what are they.

use crate::tree::NodeId;

/// Errors an extension can raise while sizing or emitting its suffix.
#[derive(Debug, thiserror::Error)]
pub enum ExtensionError {
    #[error("extension suffix of {len} bytes would overflow the directory record's 8-bit length field")]
    SuffixTooLong { len: usize },
}

/// A plug-in that contributes a system-use suffix to directory records,
/// per §4.J.
pub trait DirectoryRecordExtension: Send + Sync {
    /// Stable short tag recorded in diagnostics; never written to disc.
    fn name(&self) -> &str;

    /// How many bytes this extension will append to the given node's
    /// directory record. Called once per node during layout so the record's
    /// total length is known before any bytes are emitted.
    fn suffix_len(&self, node: NodeId) -> Result<usize, ExtensionError>;

    /// Writes exactly `suffix_len(node)` bytes into `out`.
    fn emit_suffix(&self, node: NodeId, out: &mut Vec<u8>) -> Result<(), ExtensionError>;

    /// How many whole blocks this extension needs reserved in a
    /// "continuation area" — Rock Ridge's mechanism for system-use entries
    /// too large to fit inline (`CE` entries pointing at an out-of-line
    /// block). Zero for extensions that never overflow.
    fn continuation_area_blocks(&self, node: NodeId) -> u64 {
        let _ = node;
        0
    }
}

/// Runs a fixed list of extensions over one node, concatenating their
/// suffixes in registration order and validating the combined length fits
/// an 8-bit record-length field once added to the record's fixed portion.
pub struct ExtensionChain {
    extensions: Vec<Box<dyn DirectoryRecordExtension>>,
}

impl std::fmt::Debug for ExtensionChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionChain")
            .field("extensions", &self.extensions.iter().map(|e| e.name()).collect::<Vec<_>>())
            .finish()
    }
}

impl Default for ExtensionChain {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtensionChain {
    pub fn new() -> Self {
        Self {
            extensions: Vec::new(),
        }
    }

    pub fn push(&mut self, extension: Box<dyn DirectoryRecordExtension>) {
        self.extensions.push(extension);
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    pub fn suffix_len(&self, node: NodeId) -> Result<usize, ExtensionError> {
        let mut total = 0;
        for ext in &self.extensions {
            total += ext.suffix_len(node)?;
        }
        Ok(total)
    }

    pub fn emit_suffix(&self, node: NodeId, out: &mut Vec<u8>) -> Result<(), ExtensionError> {
        for ext in &self.extensions {
            ext.emit_suffix(node, out)?;
        }
        Ok(())
    }

    pub fn continuation_area_blocks(&self, node: NodeId) -> u64 {
        self.extensions
            .iter()
            .map(|ext| ext.continuation_area_blocks(node))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::LogicalTree;

    struct FixedSuffix(Vec<u8>);

    impl DirectoryRecordExtension for FixedSuffix {
        fn name(&self) -> &str {
            "fixed"
        }

        fn suffix_len(&self, _node: NodeId) -> Result<usize, ExtensionError> {
            Ok(self.0.len())
        }

        fn emit_suffix(&self, _node: NodeId, out: &mut Vec<u8>) -> Result<(), ExtensionError> {
            out.extend_from_slice(&self.0);
            Ok(())
        }
    }

    #[test]
    fn chain_concatenates_in_registration_order() {
        let tree = LogicalTree::create_root();
        let root = tree.root();
        let mut chain = ExtensionChain::new();
        chain.push(Box::new(FixedSuffix(vec![1, 2])));
        chain.push(Box::new(FixedSuffix(vec![3])));
        assert_eq!(chain.suffix_len(root).unwrap(), 3);
        let mut out = Vec::new();
        chain.emit_suffix(root, &mut out).unwrap();
        assert_eq!(out, vec![1, 2, 3]);
    }

    #[test]
    fn empty_chain_contributes_nothing() {
        let chain = ExtensionChain::new();
        let tree = LogicalTree::create_root();
        assert_eq!(chain.suffix_len(tree.root()).unwrap(), 0);
    }
}
