//! Time-Series Data (TSD) segment store.
//!
//! Per (series, field) the in-memory representation is a sorted list of
//! [`Segment`]s keyed by family-time. Each segment carries the previously
//! flushed `encoded-bytes` image plus a mutable [`Block`] holding the
//! current time window; writes outside the window trigger a compaction
//! that merges the block into the encoded image by slot-wise agg-func
//! reduction.
//!
//! Grounded on `original_source/tsdb/memdb/{database.go,field_type.go}` and
//! its associated `field_store_test.go`/`segment_store_test.go` scenarios.

mod block;
mod segment;

pub use block::{Block, ValueKind};
pub use segment::{Segment, SegmentStore};

use thiserror::Error;

/// Errors produced by the TSD segment store.
#[derive(Debug, Error, PartialEq)]
pub enum TsdError {
    /// `slot_range()` was called on a segment that never accepted a value.
    #[error("segment has never been written")]
    Empty,

    /// The encoded block buffer ended before a field could be fully read.
    #[error("TSD block truncated")]
    Truncated,

    /// A header value was outside its valid range.
    #[error("corrupt TSD block: {0}")]
    Corrupt(&'static str),
}

impl From<crate::bitstream::BitStreamError> for TsdError {
    fn from(e: crate::bitstream::BitStreamError) -> Self {
        match e {
            crate::bitstream::BitStreamError::Truncated { .. } => TsdError::Truncated,
            crate::bitstream::BitStreamError::InvalidWidth(_) => {
                TsdError::Corrupt("bit width out of range")
            }
        }
    }
}

/// A single slot value: either an integer (varint/ZigZag on the wire) or a
/// float (raw 64-bit image on the wire) — spec.md §4.3.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SlotValue {
    /// A signed integer sample (counters, sums of whole units).
    Int(i64),
    /// A floating-point sample (gauges, averages).
    Float(f64),
}

impl SlotValue {
    fn as_f64(self) -> f64 {
        match self {
            SlotValue::Int(v) => v as f64,
            SlotValue::Float(v) => v,
        }
    }

    fn kind(self) -> ValueKind {
        match self {
            SlotValue::Int(_) => ValueKind::Int,
            SlotValue::Float(_) => ValueKind::Float,
        }
    }
}

/// The aggregation function applied when two values land on the same slot,
/// either within a live block or during compaction's slot-wise merge.
///
/// Modeled as a tagged variant rather than a virtual-dispatch callback:
/// resolved once per field-store from the field's [`FieldType`] and cached
/// (spec.md §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggFunc {
    /// Accumulate by addition.
    Sum,
    /// Keep the smaller value.
    Min,
    /// Keep the larger value.
    Max,
    /// Keep whichever value was written first.
    First,
    /// Keep whichever value was written last (gauges).
    Last,
}

impl AggFunc {
    /// Combines an existing slot value with an incoming one.
    pub fn apply(self, existing: SlotValue, incoming: SlotValue) -> SlotValue {
        match self {
            AggFunc::Sum => match (existing, incoming) {
                (SlotValue::Int(a), SlotValue::Int(b)) => SlotValue::Int(a + b),
                _ => SlotValue::Float(existing.as_f64() + incoming.as_f64()),
            },
            AggFunc::Min => {
                if incoming.as_f64() < existing.as_f64() {
                    incoming
                } else {
                    existing
                }
            }
            AggFunc::Max => {
                if incoming.as_f64() > existing.as_f64() {
                    incoming
                } else {
                    existing
                }
            }
            AggFunc::First => existing,
            AggFunc::Last => incoming,
        }
    }
}

/// The type tag carried by a field, scoped to a metric (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// Monotonic accumulator; compacted by addition.
    Sum,
    /// Running minimum.
    Min,
    /// Running maximum.
    Max,
    /// Instantaneous reading; compacted by last-write-wins.
    Gauge,
    /// Expands into per-bucket sum sub-streams.
    Histogram,
    /// No associated aggregation semantics; defaults to last-write-wins.
    Unknown,
}

impl FieldType {
    /// Resolves the [`AggFunc`] associated with this field type, once, so
    /// the hot write path never re-dispatches on the type tag.
    pub fn agg_func(self) -> AggFunc {
        match self {
            FieldType::Sum => AggFunc::Sum,
            FieldType::Min => AggFunc::Min,
            FieldType::Max => AggFunc::Max,
            FieldType::Gauge => AggFunc::Last,
            FieldType::Histogram => AggFunc::Sum,
            FieldType::Unknown => AggFunc::Last,
        }
    }

    /// The tag's on-disk byte, used to round-trip a field-type through a
    /// flushed block without re-deriving it from an external schema.
    pub fn as_u8(self) -> u8 {
        match self {
            FieldType::Sum => 0,
            FieldType::Min => 1,
            FieldType::Max => 2,
            FieldType::Gauge => 3,
            FieldType::Histogram => 4,
            FieldType::Unknown => 5,
        }
    }

    /// Inverse of [`FieldType::as_u8`]. Fails with *Corrupt* on an
    /// unrecognized tag.
    pub fn from_u8(b: u8) -> Result<Self, TsdError> {
        match b {
            0 => Ok(FieldType::Sum),
            1 => Ok(FieldType::Min),
            2 => Ok(FieldType::Max),
            3 => Ok(FieldType::Gauge),
            4 => Ok(FieldType::Histogram),
            5 => Ok(FieldType::Unknown),
            _ => Err(TsdError::Corrupt("unknown field-type tag")),
        }
    }
}
