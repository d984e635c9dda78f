//! Median-delta byte-packing for monotonically non-decreasing `u32` arrays.
//!
//! Header: `uvarint(size)`, `uvarint(median)`, `byte(delta-byte-length)`.
//! Body: `size` fixed-width little-endian integers, each the absolute
//! distance from `median` truncated to `delta-byte-length` bytes — values at
//! or before the median index are encoded as `median - v`, values after it as
//! `v - median`.
//!
//! Grounded on `original_source/pkg/encoding/int_packing.go`.

use crate::codec::varint::{read_uvarint, write_uvarint};
use crate::codec::CodecError;

/// Accumulates a non-decreasing `u32` stream and produces its packed encoding.
#[derive(Debug, Default, Clone)]
pub struct IntPackingEncoder {
    values: Vec<u32>,
    previous: u32,
}

impl IntPackingEncoder {
    /// Creates an empty encoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the next value of the stream.
    ///
    /// Returns [`CodecError::OutOfOrder`] if `v` is smaller than the last
    /// accepted value; the encoder's state is left unchanged and earlier
    /// values may still be serialized with [`IntPackingEncoder::bytes`].
    pub fn add(&mut self, v: u32) -> Result<(), CodecError> {
        if !self.values.is_empty() && v < self.previous {
            return Err(CodecError::OutOfOrder);
        }
        self.values.push(v);
        self.previous = v;
        Ok(())
    }

    /// Serializes the accumulated stream into its on-disk form.
    pub fn bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        let size = self.values.len();
        write_uvarint(size as u64, &mut buf);

        if size == 0 {
            return buf;
        }

        let mid_idx = size / 2;
        let mid_value = self.values[mid_idx];
        let max_delta = self.values[size - 1]
            .saturating_sub(mid_value)
            .max(mid_value.saturating_sub(self.values[0]));
        let delta_len = bytes_needed(max_delta);

        write_uvarint(mid_value as u64, &mut buf);
        buf.push(delta_len);

        for (idx, &v) in self.values.iter().enumerate() {
            let delta = if idx <= mid_idx {
                mid_value - v
            } else {
                v - mid_value
            };
            buf.extend_from_slice(&delta.to_le_bytes()[..delta_len as usize]);
        }

        buf
    }
}

/// Reads values from a buffer produced by [`IntPackingEncoder`].
#[derive(Debug, Clone, Copy)]
pub struct IntPackingDecoder<'a> {
    buf: &'a [u8],
    body_offset: usize,
    size: usize,
    mid_value: u32,
    delta_len: u8,
}

impl<'a> IntPackingDecoder<'a> {
    /// Parses the header of `buf`.
    pub fn new(buf: &'a [u8]) -> Result<Self, CodecError> {
        let (size, n) = read_uvarint(buf).ok_or(CodecError::Truncated)?;
        let mut off = n;
        let size = size as usize;

        if size == 0 {
            return Ok(Self {
                buf,
                body_offset: off,
                size: 0,
                mid_value: 0,
                delta_len: 0,
            });
        }

        let (mid_value, n) = read_uvarint(&buf[off..]).ok_or(CodecError::Truncated)?;
        off += n;
        let delta_len = *buf.get(off).ok_or(CodecError::Truncated)?;
        off += 1;
        if delta_len == 0 || delta_len > 4 {
            return Err(CodecError::Corrupt("int-packing delta length out of range"));
        }

        let body_len = size * delta_len as usize;
        if buf.len() - off < body_len {
            return Err(CodecError::Truncated);
        }

        Ok(Self {
            buf,
            body_offset: off,
            size,
            mid_value: mid_value as u32,
            delta_len,
        })
    }

    /// Number of values encoded.
    pub fn len(&self) -> usize {
        self.size
    }

    /// `true` if no values are encoded.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Returns the value at `idx`.
    pub fn get(&self, idx: usize) -> Result<u32, CodecError> {
        if idx >= self.size {
            return Err(CodecError::OutOfBounds {
                index: idx,
                size: self.size,
            });
        }

        let off = self.body_offset + idx * self.delta_len as usize;
        let mut raw = [0u8; 4];
        raw[..self.delta_len as usize].copy_from_slice(&self.buf[off..off + self.delta_len as usize]);
        let delta = u32::from_le_bytes(raw);

        let mid_idx = self.size / 2;
        if idx <= mid_idx {
            Ok(self.mid_value - delta)
        } else {
            Ok(self.mid_value + delta)
        }
    }

    /// Decodes every value into a `Vec<u32>`.
    pub fn decode_all(&self) -> Result<Vec<u32>, CodecError> {
        (0..self.size).map(|i| self.get(i)).collect()
    }
}

/// Minimum number of little-endian bytes (1-4) needed to hold `v`.
fn bytes_needed(v: u32) -> u8 {
    if v < 1 << 8 {
        1
    } else if v < 1 << 16 {
        2
    } else if v < 1 << 24 {
        3
    } else {
        4
    }
}

/// Encodes `values` (must be non-decreasing) into a packed buffer.
pub fn encode(values: &[u32]) -> Result<Vec<u8>, CodecError> {
    let mut enc = IntPackingEncoder::new();
    for &v in values {
        enc.add(v)?;
    }
    Ok(enc.bytes())
}

/// Decodes a buffer produced by [`encode`].
pub fn decode(buf: &[u8]) -> Result<Vec<u32>, CodecError> {
    IntPackingDecoder::new(buf)?.decode_all()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_small_sequence() {
        let values: Vec<u32> = (0..10).map(|i| i * 10).collect();
        let buf = encode(&values).unwrap();
        assert_eq!(decode(&buf).unwrap(), values);
    }

    #[test]
    fn round_trips_large_monotonic_sequence_spec_example() {
        let values: Vec<u32> = (0..100_000).map(|i| i * 10).collect();
        let buf = encode(&values).unwrap();
        let dec = IntPackingDecoder::new(&buf).unwrap();

        assert_eq!(dec.len(), 100_000);
        assert_eq!(dec.get(0).unwrap(), 0);
        assert_eq!(dec.get(50_000).unwrap(), 500_000);
        assert_eq!(dec.get(99_999).unwrap(), 999_990);
        assert_eq!(
            dec.get(100_000).unwrap_err(),
            CodecError::OutOfBounds {
                index: 100_000,
                size: 100_000
            }
        );
    }

    #[test]
    fn rejects_out_of_order_input() {
        let mut enc = IntPackingEncoder::new();
        enc.add(10).unwrap();
        enc.add(20).unwrap();
        assert_eq!(enc.add(5).unwrap_err(), CodecError::OutOfOrder);
        // Values accepted before the failure still encode correctly.
        assert_eq!(decode(&enc.bytes()).unwrap(), vec![10, 20]);
    }

    #[test]
    fn round_trips_empty_and_single_value() {
        assert_eq!(decode(&encode(&[]).unwrap()).unwrap(), Vec::<u32>::new());
        assert_eq!(decode(&encode(&[42]).unwrap()).unwrap(), vec![42]);
    }

    #[test]
    fn median_index_itself_round_trips() {
        // Exercises the `idx <= mid_idx` boundary: the value at the median
        // index is encoded on the "below median" branch as delta 0.
        let values = [1u32, 5, 9, 20, 40];
        let buf = encode(&values).unwrap();
        assert_eq!(decode(&buf).unwrap(), values);
    }

    #[test]
    fn truncated_buffer_is_detected() {
        let buf = encode(&[1, 2, 3, 4]).unwrap();
        assert!(matches!(
            IntPackingDecoder::new(&buf[..buf.len() - 1]),
            Err(CodecError::Truncated)
        ));
    }
}
