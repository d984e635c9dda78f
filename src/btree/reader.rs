//! Reader for the B+Tree byte image: point lookup, prefix seek, and range
//! iteration.
//!
//! Descent is linear suffix search at branch nodes with an LCP short-circuit,
//! and a linear scan at the leaf — the "latest unified form" of the three
//! divergent reader drafts found in `original_source/tsdb/tree/btree_reader.go`
//! (that file also carries commented-out binary-search variants; a reader
//! built over an explicit per-node offsets table is an equivalent permitted
//! implementation, not built here so this format has one reader, not three).

use crate::btree::{BTreeError, HAS_PARENT, NO_PARENT};
use crate::codec::varint::read_uvarint;

/// A parsed branch-node entry.
struct BranchEntry {
    has_parent: u8,
    suffix: Vec<u8>,
    child_start: u64,
}

/// A parsed leaf-node entry: its full key (LCP + suffix) and value.
struct LeafEntry {
    key: Vec<u8>,
    value: u64,
}

/// Reads a B+Tree byte image produced by [`crate::btree::BTreeBuilder`].
///
/// Generic over the backing storage so the same reader works over an owned
/// `Vec<u8>` (tests, in-memory use) or a `memmap2::Mmap` (the on-disk,
/// zero-copy path, mirroring the teacher's `sstable` mmap idiom).
pub struct BTreeReader<S> {
    data: S,
    height: usize,
    body_offset: usize,
    /// `level_starts[h]` is the byte offset of spec-level `h` (1-indexed)
    /// within the body; index 0 is unused.
    level_starts: Vec<u64>,
}

impl<S: AsRef<[u8]>> BTreeReader<S> {
    /// Parses the header of `data` and returns a reader over it.
    pub fn new(data: S) -> Result<Self, BTreeError> {
        let bytes = data.as_ref();
        if bytes.is_empty() {
            return Err(BTreeError::Truncated);
        }
        let _has_children = bytes[0];
        let mut off = 1;

        let (height, n) = read_uvarint(&bytes[off..]).ok_or(BTreeError::Truncated)?;
        off += n;
        let height = height as usize;
        if height == 0 {
            return Err(BTreeError::Corrupt("height must be at least 1"));
        }

        let mut level_starts = vec![0u64; height + 1];
        for _ in 0..height {
            let (level, n) = read_uvarint(&bytes[off..]).ok_or(BTreeError::Truncated)?;
            off += n;
            let (start, n) = read_uvarint(&bytes[off..]).ok_or(BTreeError::Truncated)?;
            off += n;
            let level = level as usize;
            if level == 0 || level > height {
                return Err(BTreeError::Corrupt("level index out of range"));
            }
            level_starts[level] = start;
        }

        Ok(Self {
            data,
            height,
            body_offset: off,
            level_starts,
        })
    }

    fn bytes(&self) -> &[u8] {
        self.data.as_ref()
    }

    /// The byte slice of spec-level `level` (1-indexed, 1 = root).
    fn level_bytes(&self, level: usize) -> Result<&[u8], BTreeError> {
        let start = self.body_offset + self.level_starts[level] as usize;
        let end = if level == self.height {
            self.bytes().len()
        } else {
            self.body_offset + self.level_starts[level + 1] as usize
        };
        self.bytes().get(start..end).ok_or(BTreeError::Truncated)
    }

    /// Looks up `key`, returning its value or [`BTreeError::NotFound`].
    pub fn get(&self, key: &[u8]) -> Result<u64, BTreeError> {
        let mut child_offset = 0usize;

        for level in 1..self.height {
            let level_bytes = self.level_bytes(level)?;
            let (lcp_bytes, entries, _) = parse_branch_node(level_bytes, child_offset)?;
            if !key_matches_prefix(key, &lcp_bytes) {
                return Err(BTreeError::NotFound);
            }
            let target_suffix = &key[lcp_bytes.len()..];

            let found = entries.iter().find(|e| {
                e.suffix.as_slice() > target_suffix
                    || (e.suffix.as_slice() == target_suffix && e.has_parent == NO_PARENT)
            });
            match found {
                Some(entry) => child_offset = entry.child_start as usize,
                None => return Err(BTreeError::NotFound),
            }
        }

        let leaf_bytes = self.level_bytes(self.height)?;
        let (lcp_bytes, entries, _) = parse_leaf_node(leaf_bytes, child_offset)?;
        if !key_matches_prefix(key, &lcp_bytes) {
            return Err(BTreeError::NotFound);
        }
        let target_suffix = &key[lcp_bytes.len()..];

        entries
            .iter()
            .find(|e| &e.key[lcp_bytes.len()..] == target_suffix)
            .map(|e| e.value)
            .ok_or(BTreeError::NotFound)
    }

    /// Descends to the leaf block that would contain `target` (or the
    /// position just past where it would be), returning the byte offset of
    /// that leaf node within the leaf level's buffer.
    fn descend_to_leaf(&self, target: &[u8]) -> Result<usize, BTreeError> {
        let mut child_offset = 0usize;
        for level in 1..self.height {
            let level_bytes = self.level_bytes(level)?;
            let (lcp_bytes, entries, _) = parse_branch_node(level_bytes, child_offset)?;

            if !key_matches_prefix(target, &lcp_bytes) {
                // Target diverges from this subtree; pick whichever side of
                // the divergence is reachable so forward iteration can still
                // start at the nearest bound, matching `Seek`'s best-effort
                // positioning semantics (spec.md §4.4).
                let side = if target < lcp_bytes.as_slice() {
                    entries.first()
                } else {
                    entries.last()
                };
                match side {
                    Some(entry) => {
                        child_offset = entry.child_start as usize;
                        continue;
                    }
                    None => return Err(BTreeError::NotFound),
                }
            }

            let target_suffix = &target[lcp_bytes.len()..];
            let found = entries
                .iter()
                .find(|e| {
                    e.suffix.as_slice() > target_suffix
                        || (e.suffix.as_slice() == target_suffix && e.has_parent == NO_PARENT)
                })
                .or_else(|| entries.last());
            match found {
                Some(entry) => child_offset = entry.child_start as usize,
                None => return Err(BTreeError::NotFound),
            }
        }
        Ok(child_offset)
    }

    /// Returns a forward iterator over every key carrying `prefix`.
    pub fn seek(&self, prefix: &[u8]) -> Result<RangeIter<'_>, BTreeError> {
        let leaf_bytes = self.level_bytes(self.height)?;
        let start_offset = self.descend_to_leaf(prefix)?;
        Ok(RangeIter::new(
            leaf_bytes,
            start_offset,
            Bound::Prefix(prefix.to_vec()),
        ))
    }

    /// Returns a forward iterator over every key in `[start, end]`.
    pub fn range(&self, start: &[u8], end: &[u8]) -> Result<RangeIter<'_>, BTreeError> {
        let leaf_bytes = self.level_bytes(self.height)?;
        let start_offset = self.descend_to_leaf(start)?;
        Ok(RangeIter::new(
            leaf_bytes,
            start_offset,
            Bound::Range(start.to_vec(), end.to_vec()),
        ))
    }
}

fn key_matches_prefix(key: &[u8], prefix: &[u8]) -> bool {
    key.len() >= prefix.len() && &key[..prefix.len()] == prefix
}

/// Parses one branch node starting at `offset` within `level_bytes`,
/// returning its LCP, its entries, and the offset immediately past it.
fn parse_branch_node(
    level_bytes: &[u8],
    offset: usize,
) -> Result<(Vec<u8>, Vec<BranchEntry>, usize), BTreeError> {
    let buf = level_bytes.get(offset..).ok_or(BTreeError::Truncated)?;
    let mut off = 0;

    let (node_count, n) = read_uvarint(&buf[off..]).ok_or(BTreeError::Truncated)?;
    off += n;
    let (lcp_len, n) = read_uvarint(&buf[off..]).ok_or(BTreeError::Truncated)?;
    off += n;
    let lcp_len = lcp_len as usize;
    let lcp_bytes = buf.get(off..off + lcp_len).ok_or(BTreeError::Truncated)?.to_vec();
    off += lcp_len;

    let mut entries = Vec::with_capacity(node_count as usize);
    for _ in 0..node_count {
        let has_parent = *buf.get(off).ok_or(BTreeError::Truncated)?;
        off += 1;
        let (suffix_len, n) = read_uvarint(&buf[off..]).ok_or(BTreeError::Truncated)?;
        off += n;
        let suffix_len = suffix_len as usize;
        let suffix = buf
            .get(off..off + suffix_len)
            .ok_or(BTreeError::Truncated)?
            .to_vec();
        off += suffix_len;
        let (child_start, n) = read_uvarint(&buf[off..]).ok_or(BTreeError::Truncated)?;
        off += n;

        if has_parent != HAS_PARENT && has_parent != NO_PARENT {
            return Err(BTreeError::Corrupt("invalid hasParent byte"));
        }
        entries.push(BranchEntry {
            has_parent,
            suffix,
            child_start,
        });
    }

    Ok((lcp_bytes, entries, offset + off))
}

/// Parses one leaf node starting at `offset` within `leaf_bytes`, returning
/// its LCP, its (full-key, value) entries, and the offset immediately past
/// it.
fn parse_leaf_node(
    leaf_bytes: &[u8],
    offset: usize,
) -> Result<(Vec<u8>, Vec<LeafEntry>, usize), BTreeError> {
    let buf = leaf_bytes.get(offset..).ok_or(BTreeError::Truncated)?;
    let mut off = 0;

    let (leaf_count, n) = read_uvarint(&buf[off..]).ok_or(BTreeError::Truncated)?;
    off += n;
    let (lcp_len, n) = read_uvarint(&buf[off..]).ok_or(BTreeError::Truncated)?;
    off += n;
    let lcp_len = lcp_len as usize;
    let lcp_bytes = buf.get(off..off + lcp_len).ok_or(BTreeError::Truncated)?.to_vec();
    off += lcp_len;

    let mut entries = Vec::with_capacity(leaf_count as usize);
    for _ in 0..leaf_count {
        let (suffix_len, n) = read_uvarint(&buf[off..]).ok_or(BTreeError::Truncated)?;
        off += n;
        let suffix_len = suffix_len as usize;
        let suffix = buf.get(off..off + suffix_len).ok_or(BTreeError::Truncated)?;
        let mut key = lcp_bytes.clone();
        key.extend_from_slice(suffix);
        off += suffix_len;
        let (value, n) = read_uvarint(&buf[off..]).ok_or(BTreeError::Truncated)?;
        off += n;
        entries.push(LeafEntry { key, value });
    }

    Ok((lcp_bytes, entries, offset + off))
}

enum Bound {
    Prefix(Vec<u8>),
    Range(Vec<u8>, Vec<u8>),
}

impl Bound {
    fn accepts(&self, key: &[u8]) -> bool {
        match self {
            Bound::Prefix(p) => key.starts_with(p.as_slice()),
            Bound::Range(start, end) => key >= start.as_slice() && key <= end.as_slice(),
        }
    }

    fn past_end(&self, key: &[u8]) -> bool {
        match self {
            Bound::Prefix(_) => false,
            Bound::Range(_, end) => key > end.as_slice(),
        }
    }
}

/// A forward iterator over `(key, value)` pairs yielded by
/// [`BTreeReader::seek`] or [`BTreeReader::range`]. Single-pass, not
/// restartable once exhausted — spec.md §4.4.
pub struct RangeIter<'a> {
    leaf_bytes: &'a [u8],
    cursor: Option<usize>,
    pending: std::vec::IntoIter<LeafEntry>,
    bound: Bound,
    done: bool,
}

impl<'a> RangeIter<'a> {
    fn new(leaf_bytes: &'a [u8], start_offset: usize, bound: Bound) -> Self {
        Self {
            leaf_bytes,
            cursor: Some(start_offset),
            pending: Vec::new().into_iter(),
            bound,
            done: false,
        }
    }

    fn advance_node(&mut self) -> Result<bool, BTreeError> {
        let Some(offset) = self.cursor else {
            return Ok(false);
        };
        if offset >= self.leaf_bytes.len() {
            self.cursor = None;
            return Ok(false);
        }
        let (_, entries, next_offset) = parse_leaf_node(self.leaf_bytes, offset)?;
        self.cursor = Some(next_offset);
        self.pending = entries.into_iter();
        Ok(true)
    }
}

impl<'a> Iterator for RangeIter<'a> {
    type Item = Result<(Vec<u8>, u64), BTreeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            match self.pending.next() {
                Some(entry) => {
                    if self.bound.past_end(&entry.key) {
                        self.done = true;
                        return None;
                    }
                    if self.bound.accepts(&entry.key) {
                        return Some(Ok((entry.key, entry.value)));
                    }
                    // A prefix seek that has moved past matching keys ends
                    // the iterator instead of scanning the whole tree.
                    continue;
                }
                None => match self.advance_node() {
                    Ok(true) => continue,
                    Ok(false) => {
                        self.done = true;
                        return None;
                    }
                    Err(e) => {
                        self.done = true;
                        return Some(Err(e));
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::BTreeBuilder;

    fn build_sequential(n: u32, fanout: usize) -> Vec<u8> {
        let mut b = BTreeBuilder::new();
        for i in 0..n {
            b.push(format!("key-{i:06}").into_bytes(), i as u64);
        }
        b.build(fanout).unwrap()
    }

    #[test]
    fn point_lookup_hits_and_misses() {
        let image = build_sequential(1_000_000u32.min(2000), 32);
        let reader = BTreeReader::new(image).unwrap();
        assert_eq!(reader.get(b"key-001234").unwrap(), 1234);
        assert!(reader.get(b"key-xyz").is_err());
    }

    #[test]
    fn seek_yields_all_keys_with_prefix_exactly_once() {
        let mut b = BTreeBuilder::new();
        for i in 0..20000u32 {
            b.push(format!("key-{i:06}").into_bytes(), i as u64);
        }
        let image = b.build(32).unwrap();
        let reader = BTreeReader::new(image).unwrap();

        let hits: Vec<_> = reader.seek(b"key-0012").unwrap().collect::<Result<_, _>>().unwrap();
        // key-001200..key-001299 inclusive = 100 keys.
        assert_eq!(hits.len(), 100);
        for (i, (key, value)) in hits.iter().enumerate() {
            assert_eq!(*key, format!("key-{:06}", 1200 + i).into_bytes());
            assert_eq!(*value, (1200 + i) as u64);
        }
    }

    #[test]
    fn range_stops_past_end_key() {
        let image = build_sequential(2000, 16);
        let reader = BTreeReader::new(image).unwrap();
        let hits: Vec<_> = reader
            .range(b"key-000100", b"key-000105")
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(hits.len(), 6);
        assert_eq!(hits[0].0, b"key-000100");
        assert_eq!(hits[5].0, b"key-000105");
    }
}
