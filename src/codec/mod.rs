//! Columnar codecs: ZigZag, delta-bit-packing for signed int32 streams, and
//! median-delta byte-packing for monotonically non-decreasing uint32 arrays.
//!
//! Grounded on `original_source/pkg/encoding/{delta_bit_packing.go,
//! int_packing.go}` — the Go implementation this format was distilled from.
//! Varint framing here uses the same zigzag-then-LEB128 convention as that
//! source; header fields are written with [`crate::encoding`]'s fixed-width
//! primitives where the format calls for a fixed-width byte (bit-width,
//! delta-byte-length) and with LEB128 varints elsewhere, matching
//! spec.md §4.2's literal byte layout.

pub mod delta;
pub mod int_packing;
pub mod varint;
pub mod zigzag;

pub use delta::{DeltaBitPackingDecoder, DeltaBitPackingEncoder};
pub use int_packing::{IntPackingDecoder, IntPackingEncoder};
pub use zigzag::{zigzag_decode, zigzag_encode};

use thiserror::Error;

/// Errors shared by the columnar codecs (spec.md §7's codec-scoped kinds).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// The encoded buffer ended before a field could be fully read.
    #[error("codec buffer truncated")]
    Truncated,

    /// A header value was outside its valid range (e.g. bit-width > 32).
    #[error("corrupt codec header: {0}")]
    Corrupt(&'static str),

    /// `IntPackingEncoder::add` received a value smaller than the previous one.
    #[error("uint32 sequence must be non-decreasing")]
    OutOfOrder,

    /// `IntPackingDecoder::get` was called with an index `>= size`.
    #[error("index {index} out of bounds (size {size})")]
    OutOfBounds {
        /// The requested index.
        index: usize,
        /// The number of entries actually encoded.
        size: usize,
    },
}

impl From<crate::bitstream::BitStreamError> for CodecError {
    fn from(e: crate::bitstream::BitStreamError) -> Self {
        match e {
            crate::bitstream::BitStreamError::Truncated { .. } => CodecError::Truncated,
            crate::bitstream::BitStreamError::InvalidWidth(_) => {
                CodecError::Corrupt("bit width out of range")
            }
        }
    }
}
