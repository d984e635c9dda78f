//! Tag-mapping block: bidirectional mapping between series-ids and tag
//! key/value tuples within a metric.
//!
//! Layout (spec.md §4.5):
//!
//! ```text
//! [uvarint dicLen] [dicLen bytes of length-prefixed strings]
//! [uvarint groupCount]
//!   per group: [uvarint keyCount]
//!              [uvarint keyOffsetIntoDic] × keyCount
//!              [uvarint blockLen] [blockLen bytes: TagBlock]
//! ```
//!
//! Every series belongs to exactly one group — the one keyed by its sorted
//! tag-key set. A `TagBlock` holds a roaring bitmap of the group's
//! series-ids, an [`crate::codec::IntPackingEncoder`]-packed array of
//! per-entry byte offsets, and the concatenated tag-value-id streams those
//! offsets point into.
//!
//! Grounded on `original_source/tsdb/index/tags_mapping.go`.

pub mod builder;
pub mod reader;

pub use builder::TagsMappingBuilder;
pub use reader::TagsMappingReader;

use thiserror::Error;

/// Errors produced by the tag-mapping block.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TagIndexError {
    /// The same series-id was added twice, or added out of ascending order
    /// (the builder requires series-ids across the whole block to be
    /// strictly increasing, since a group's `IntPacking` offsets must be
    /// recorded in the same order the roaring bitmap ranks them).
    #[error("series-id added out of order or twice")]
    DuplicateSeries,

    /// The queried series-id has no recorded tag tuple.
    #[error("series-id not found")]
    NotFound,

    /// The byte image ended before a field could be fully read.
    #[error("tag-mapping block truncated")]
    Truncated,

    /// A header or block field was outside its valid range.
    #[error("corrupt tag-mapping block: {0}")]
    Corrupt(&'static str),
}

impl From<crate::codec::CodecError> for TagIndexError {
    fn from(e: crate::codec::CodecError) -> Self {
        match e {
            crate::codec::CodecError::Truncated => TagIndexError::Truncated,
            crate::codec::CodecError::Corrupt(m) => TagIndexError::Corrupt(m),
            crate::codec::CodecError::OutOfOrder => TagIndexError::DuplicateSeries,
            crate::codec::CodecError::OutOfBounds { .. } => {
                TagIndexError::Corrupt("intPacking index out of bounds")
            }
        }
    }
}
