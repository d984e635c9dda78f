//! Delta-bit-packing for signed int32 streams.
//!
//! Header: `varint(count-1)`, `byte(bit-width)`, `varint(zigzag(min-delta))`,
//! `varint(zigzag(first-value))`. Body: `count-1` fields of `bit-width` bits
//! each. Deltas are computed as `previous - current` (note the order);
//! `min-delta` is the minimum delta observed; `bit-width` is the number of
//! bits needed to hold `max(delta - min-delta)`, with an all-equal-deltas
//! stream collapsing to a zero-bit body.
//!
//! Grounded on `original_source/pkg/encoding/delta_bit_packing.go`.

use crate::bitstream::{BitReader, BitWriter};
use crate::codec::varint::{read_uvarint, write_uvarint};
use crate::codec::zigzag::{zigzag_decode, zigzag_encode};
use crate::codec::CodecError;

/// Accumulates an int32 stream and produces its delta-bit-packed encoding.
///
/// Single-threaded, one instance per column — no interior synchronization
/// (spec.md §5: codecs rely on external synchronization).
#[derive(Debug, Default, Clone)]
pub struct DeltaBitPackingEncoder {
    first: i32,
    previous: i32,
    min_delta: i32,
    deltas: Vec<i32>,
    has_first: bool,
}

impl DeltaBitPackingEncoder {
    /// Creates an empty encoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the next value of the stream.
    pub fn add(&mut self, v: i32) {
        if !self.has_first {
            self.has_first = true;
            self.first = v;
            self.previous = v;
            return;
        }

        let delta = self.previous.wrapping_sub(v);
        self.deltas.push(delta);
        if delta < self.min_delta {
            self.min_delta = delta;
        }
        self.previous = v;
    }

    /// Serializes the accumulated stream into its on-disk form.
    ///
    /// Returns [`CodecError::Corrupt`] if the computed bit-width would
    /// exceed 32 bits (only reachable via `i32` arithmetic overflow, which
    /// cannot happen for genuine `i32` inputs — kept as a defensive check
    /// mirroring the decoder's symmetric validation).
    pub fn bytes(&self) -> Result<Vec<u8>, CodecError> {
        let mut buf = Vec::new();
        write_uvarint(self.deltas.len() as u64, &mut buf);

        let max_delta_delta = self
            .deltas
            .iter()
            .map(|d| d.wrapping_sub(self.min_delta) as u32)
            .max()
            .unwrap_or(0);
        let width = 32 - max_delta_delta.leading_zeros();
        if width > 32 {
            return Err(CodecError::Corrupt("delta bit-width exceeds 32"));
        }
        buf.push(width as u8);

        write_uvarint(zigzag_encode(self.min_delta as i64), &mut buf);
        write_uvarint(zigzag_encode(self.first as i64), &mut buf);

        if width > 0 {
            let mut bw = BitWriter::new();
            for d in &self.deltas {
                let delta_delta = d.wrapping_sub(self.min_delta) as u32;
                bw.write_bits(delta_delta as u64, width)?;
            }
            buf.extend(bw.finish());
        }

        Ok(buf)
    }
}

/// Decodes a stream produced by [`DeltaBitPackingEncoder`].
pub struct DeltaBitPackingDecoder<'a> {
    reader: BitReader<'a>,
    count: usize,
    pos: usize,
    width: u32,
    min_delta: i32,
    first: i32,
    previous: i32,
    started: bool,
}

impl<'a> DeltaBitPackingDecoder<'a> {
    /// Parses the header of `buf` and returns a decoder positioned to
    /// yield the stream's first value.
    pub fn new(buf: &'a [u8]) -> Result<Self, CodecError> {
        let (count_minus_1, n) = read_uvarint(buf).ok_or(CodecError::Truncated)?;
        let mut off = n;

        let width_byte = *buf.get(off).ok_or(CodecError::Truncated)?;
        off += 1;
        let width = width_byte as u32;
        if width > 32 {
            return Err(CodecError::Corrupt("delta bit-width exceeds 32"));
        }

        let (min_delta_zz, n) = read_uvarint(&buf[off..]).ok_or(CodecError::Truncated)?;
        off += n;
        let min_delta = zigzag_decode(min_delta_zz) as i32;

        let (first_zz, n) = read_uvarint(&buf[off..]).ok_or(CodecError::Truncated)?;
        off += n;
        let first = zigzag_decode(first_zz) as i32;

        Ok(Self {
            reader: BitReader::new(&buf[off..]),
            count: count_minus_1 as usize + 1,
            pos: 0,
            width,
            min_delta,
            first,
            previous: 0,
            started: false,
        })
    }

    /// `true` if at least one more value remains to be read.
    pub fn has_next(&self) -> bool {
        self.pos < self.count
    }

    /// Returns the next value of the stream.
    pub fn next(&mut self) -> Result<i32, CodecError> {
        if !self.started {
            self.started = true;
            self.pos += 1;
            self.previous = self.first;
            return Ok(self.first);
        }

        let raw = if self.width > 0 {
            self.reader.read_bits(self.width)? as u32
        } else {
            0
        };
        self.pos += 1;
        let v = (raw as i32).wrapping_add(self.min_delta);
        let decoded = self.previous.wrapping_sub(v);
        self.previous = decoded;
        Ok(decoded)
    }

    /// Decodes the full stream into a `Vec<i32>`.
    pub fn decode_all(mut self) -> Result<Vec<i32>, CodecError> {
        let mut out = Vec::with_capacity(self.count);
        while self.has_next() {
            out.push(self.next()?);
        }
        Ok(out)
    }
}

/// Encodes `values` and decodes them back, for convenience call sites that
/// don't need streaming access.
pub fn encode(values: &[i32]) -> Result<Vec<u8>, CodecError> {
    let mut enc = DeltaBitPackingEncoder::new();
    for &v in values {
        enc.add(v);
    }
    enc.bytes()
}

/// Decodes a buffer produced by [`encode`].
pub fn decode(buf: &[u8]) -> Result<Vec<i32>, CodecError> {
    DeltaBitPackingDecoder::new(buf)?.decode_all()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_spec_example() {
        let values = [3, 4, 7, 1, 10];
        let mut enc = DeltaBitPackingEncoder::new();
        for v in values {
            enc.add(v);
        }
        assert_eq!(enc.min_delta, -9);
        assert_eq!(enc.first, 3);

        let buf = enc.bytes().unwrap();
        let decoded = decode(&buf).unwrap();
        assert_eq!(decoded, values);
    }

    #[test]
    fn round_trips_single_value() {
        let buf = encode(&[42]).unwrap();
        assert_eq!(decode(&buf).unwrap(), vec![42]);
    }

    #[test]
    fn round_trips_constant_sequence_zero_bit_width() {
        let values = [5, 5, 5, 5, 5];
        let buf = encode(&values).unwrap();
        // width byte directly follows the count varint (which is 1 byte for 4).
        assert_eq!(buf[1], 0);
        assert_eq!(decode(&buf).unwrap(), values);
    }

    #[test]
    fn round_trips_negative_values() {
        let values = [-100, -50, 0, 50, 100, -1000];
        let buf = encode(&values).unwrap();
        assert_eq!(decode(&buf).unwrap(), values);
    }

    #[test]
    fn round_trips_arbitrary_sequences_property() {
        // Property 1 (spec.md §8): decode(encode(s)) == s for any int32 sequence.
        let mut state: u64 = 0x2545F4914F6CDD1D;
        let mut next = || {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state >> 32) as i32
        };

        for len in [1usize, 2, 5, 17, 64] {
            let values: Vec<i32> = (0..len).map(|_| next()).collect();
            let buf = encode(&values).unwrap();
            assert_eq!(decode(&buf).unwrap(), values);
        }
    }
}
