//! A static, write-once, prefix-compressed B+Tree byte image.
//!
//! Maps variable-length byte keys to non-negative integer values, supporting
//! point [`reader::BTreeReader::get`], prefix `seek`, and ranged forward
//! iteration. The in-memory [`builder::BTreeBuilder`] is a standard order-k
//! B+Tree producing the image via a two-pass encoder: bottom-up longest
//! common prefix (LCP) extraction, then per-level serialization.
//!
//! Grounded on `original_source/tsdb/tree/{btree_writer.go,btree_reader.go,
//! tree_common.go}` and the teacher's `src/sstable` mmap-backed immutable
//! block idiom.

pub mod builder;
pub mod reader;

pub use builder::BTreeBuilder;
pub use reader::{BTreeReader, RangeIter};

use thiserror::Error;

/// Errors produced by the B+Tree reader and builder.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BTreeError {
    /// The queried key is not present in the tree.
    #[error("key not found")]
    NotFound,

    /// The byte image ended before a field could be fully read.
    #[error("B+Tree image truncated")]
    Truncated,

    /// A header or node field was outside its valid range.
    #[error("corrupt B+Tree image: {0}")]
    Corrupt(&'static str),
}

/// `hasParent='1'`: the entry's key is a real separator, a strict upper
/// bound on its subtree (equality means "go right").
const HAS_PARENT: u8 = 1;
/// `hasParent='0'`: sentinel, the last child of a node — an inclusive
/// upper bound (equality means "this subtree").
const NO_PARENT: u8 = 0;

/// Bytewise longest common prefix of `a` and `b`.
fn lcp(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}
