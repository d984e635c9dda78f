//! Two-pass B+Tree image encoder.

use crate::btree::{lcp, BTreeError, HAS_PARENT, NO_PARENT};
use crate::codec::varint::write_uvarint;

/// The default fanout used when a caller doesn't need to tune node size.
pub const DEFAULT_FANOUT: usize = 64;

/// Accumulates sorted `(key, value)` pairs and serializes them into the
/// B+Tree byte image described in spec.md §4.4.
#[derive(Debug, Default)]
pub struct BTreeBuilder {
    entries: Vec<(Vec<u8>, u64)>,
}

/// Per-node bookkeeping carried between the shape pass and the serialize
/// pass: every node (leaf or branch) knows the bounds of its own subtree.
struct NodeMeta {
    subtree_min: Vec<u8>,
    subtree_max: Vec<u8>,
    /// Byte offset of this node within its level's serialized buffer,
    /// filled in once the level below (or the leaf entries) is laid out.
    offset: u64,
}

impl BTreeBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a `(key, value)` pair. Keys must be pushed in strictly
    /// ascending order — the builder does not re-sort or deduplicate.
    pub fn push(&mut self, key: impl Into<Vec<u8>>, value: u64) {
        self.entries.push((key.into(), value));
    }

    /// Number of entries accumulated so far.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` if no entries have been pushed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serializes the accumulated entries into the tree's byte image, using
    /// up to `fanout` entries/children per node.
    pub fn build(self, fanout: usize) -> Result<Vec<u8>, BTreeError> {
        if fanout < 2 {
            return Err(BTreeError::Corrupt("fanout must be at least 2"));
        }
        if self.entries.is_empty() {
            return Err(BTreeError::Corrupt("cannot build an empty B+Tree"));
        }

        // Leaf level: serialize chunks of up to `fanout` entries each,
        // recording each leaf's subtree bounds and its offset within the
        // leaf level's buffer.
        let mut leaf_buf = Vec::new();
        let mut leaf_meta = Vec::new();
        for chunk in self.entries.chunks(fanout) {
            let offset = leaf_buf.len() as u64;
            let subtree_min = chunk.first().unwrap().0.clone();
            let subtree_max = chunk.last().unwrap().0.clone();
            serialize_leaf_node(chunk, &mut leaf_buf);
            leaf_meta.push(NodeMeta {
                subtree_min,
                subtree_max,
                offset,
            });
        }

        // Levels, in build order: level_bufs[0] is the leaf level (spec
        // level = height), level_bufs.last() is the root (spec level 1).
        let mut level_bufs = vec![leaf_buf];
        let mut current_meta = leaf_meta;

        while current_meta.len() > 1 {
            let mut next_buf = Vec::new();
            let mut next_meta = Vec::new();

            for chunk in current_meta.chunks(fanout) {
                let offset = next_buf.len() as u64;
                let subtree_min = chunk.first().unwrap().subtree_min.clone();
                let subtree_max = chunk.last().unwrap().subtree_max.clone();
                serialize_branch_node(chunk, &mut next_buf);
                next_meta.push(NodeMeta {
                    subtree_min,
                    subtree_max,
                    offset,
                });
            }

            level_bufs.push(next_buf);
            current_meta = next_meta;
        }

        let height = level_bufs.len();
        let has_children: u8 = if height > 1 { 1 } else { 0 };

        let mut image = Vec::new();
        image.push(has_children);
        write_uvarint(height as u64, &mut image);

        // `level_bufs` is in build order (leaves first); spec level 1 is
        // the root, i.e. the last entry of `level_bufs`.
        let mut level_start = 0u64;
        let mut level_starts = Vec::with_capacity(height);
        for buf in level_bufs.iter().rev() {
            level_starts.push(level_start);
            level_start += buf.len() as u64;
        }
        for (i, start) in level_starts.iter().enumerate() {
            write_uvarint((i + 1) as u64, &mut image);
            write_uvarint(*start, &mut image);
        }

        for buf in level_bufs.iter().rev() {
            image.extend_from_slice(buf);
        }

        Ok(image)
    }
}

/// Serializes one leaf node: `uvarint leafCount, uvarint lcpLen, lcp bytes`
/// then `leafCount` entries of `{uvarint suffixLen, suffix, uvarint value}`.
fn serialize_leaf_node(entries: &[(Vec<u8>, u64)], out: &mut Vec<u8>) {
    let min_key = &entries.first().unwrap().0;
    let max_key = &entries.last().unwrap().0;
    let lcp_len = lcp(min_key, max_key);
    let lcp_bytes = &min_key[..lcp_len];

    write_uvarint(entries.len() as u64, out);
    write_uvarint(lcp_len as u64, out);
    out.extend_from_slice(lcp_bytes);

    for (key, value) in entries {
        let suffix = &key[lcp_len..];
        write_uvarint(suffix.len() as u64, out);
        out.extend_from_slice(suffix);
        write_uvarint(*value, out);
    }
}

/// Serializes one branch node from a chunk of child subtrees: `uvarint
/// nodeCount, uvarint lcpLen, lcp bytes` then `nodeCount` entries of
/// `{byte hasParent, uvarint suffixLen, suffix, uvarint childStart}`.
///
/// Entry `i` (for `i < nodeCount - 1`) separates child `i` from child `i+1`
/// using child `i+1`'s minimum key as a strict upper bound (`hasParent=1`);
/// the last entry uses its own child's maximum key as an inclusive sentinel
/// (`hasParent=0`) since there is no further sibling to borrow a bound from.
fn serialize_branch_node(children: &[NodeMeta], out: &mut Vec<u8>) {
    let subtree_min = &children.first().unwrap().subtree_min;
    let subtree_max = &children.last().unwrap().subtree_max;
    let lcp_len = lcp(subtree_min, subtree_max);
    let lcp_bytes = &subtree_min[..lcp_len];

    write_uvarint(children.len() as u64, out);
    write_uvarint(lcp_len as u64, out);
    out.extend_from_slice(lcp_bytes);

    for (i, child) in children.iter().enumerate() {
        let (full_key, has_parent) = if i + 1 < children.len() {
            (&children[i + 1].subtree_min, HAS_PARENT)
        } else {
            (&child.subtree_max, NO_PARENT)
        };
        let suffix = &full_key[lcp_len..];
        out.push(has_parent);
        write_uvarint(suffix.len() as u64, out);
        out.extend_from_slice(suffix);
        write_uvarint(child.offset, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::reader::BTreeReader;

    #[test]
    fn builds_single_leaf_tree() {
        let mut b = BTreeBuilder::new();
        b.push(b"a".to_vec(), 1);
        b.push(b"b".to_vec(), 2);
        b.push(b"c".to_vec(), 3);
        let image = b.build(16).unwrap();

        let reader = BTreeReader::new(image).unwrap();
        assert_eq!(reader.get(b"a").unwrap(), 1);
        assert_eq!(reader.get(b"b").unwrap(), 2);
        assert_eq!(reader.get(b"c").unwrap(), 3);
        assert!(reader.get(b"d").is_err());
    }

    #[test]
    fn builds_multi_level_tree() {
        let mut b = BTreeBuilder::new();
        for i in 0..1000u32 {
            b.push(format!("key-{i:06}").into_bytes(), i as u64);
        }
        let image = b.build(8).unwrap();
        let reader = BTreeReader::new(image).unwrap();
        for i in 0..1000u32 {
            let key = format!("key-{i:06}");
            assert_eq!(reader.get(key.as_bytes()).unwrap(), i as u64);
        }
        assert!(reader.get(b"key-999999").is_err());
    }
}
