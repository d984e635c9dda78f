//! The mutable time-window block and its bit-stream encoding.

use std::collections::BTreeMap;

use crate::bitstream::{BitReader, BitWriter};
use crate::codec::varint::{read_uvarint, write_uvarint};
use crate::codec::zigzag::{zigzag_decode, zigzag_encode};
use crate::tsd::{AggFunc, SlotValue, TsdError};

/// Whether a block's slot values are integers or floats. Not carried in the
/// wire format itself (spec.md §4.3's header is just `startSlot, endSlot`);
/// the field-store that owns a segment already knows its field's kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// Varint + ZigZag on the wire.
    Int,
    /// Raw 64-bit image on the wire.
    Float,
}

/// A mutable time window of `time_window` slots anchored at `start`.
///
/// Values are kept sparse (a `BTreeMap` from absolute slot index to value)
/// since a freshly opened window is typically far from full.
#[derive(Debug, Clone)]
pub struct Block {
    time_window: u32,
    start: Option<u32>,
    values: BTreeMap<u32, SlotValue>,
}

impl Block {
    /// Creates an empty, unanchored block covering `time_window` slots.
    pub fn new(time_window: u32) -> Self {
        Self {
            time_window,
            start: None,
            values: BTreeMap::new(),
        }
    }

    /// The block's configured time window.
    pub fn time_window(&self) -> u32 {
        self.time_window
    }

    /// `true` if the block has never accepted a value.
    pub fn is_empty(&self) -> bool {
        self.start.is_none()
    }

    /// `true` if `slot` falls inside the block's current window.
    pub fn contains_slot(&self, slot: u32) -> bool {
        match self.start {
            None => false,
            Some(start) => slot >= start && slot < start + self.time_window,
        }
    }

    /// Re-anchors the block at `slot`, discarding any values it held.
    pub fn reset(&mut self, slot: u32) {
        self.start = Some(slot);
        self.values.clear();
    }

    /// Writes `value` at `slot`, applying `agg` against any existing value.
    ///
    /// Callers must ensure `contains_slot(slot)` (or the block is freshly
    /// reset at `slot`) before calling this — the segment state machine in
    /// [`crate::tsd::segment`] enforces that.
    pub fn set(&mut self, slot: u32, value: SlotValue, agg: AggFunc) {
        self.values
            .entry(slot)
            .and_modify(|existing| *existing = agg.apply(*existing, value))
            .or_insert(value);
    }

    /// The inclusive `[startSlot, endSlot]` range of slots this block has
    /// recorded a value for. Fails with [`TsdError::Empty`] when the block
    /// has never accepted a value.
    pub fn slot_range(&self) -> Result<(u32, u32), TsdError> {
        let start = *self.values.keys().next().ok_or(TsdError::Empty)?;
        let end = *self.values.keys().next_back().ok_or(TsdError::Empty)?;
        Ok((start, end))
    }

    /// Serializes the block into the TSD bit-stream format, returning
    /// `(bytes, startSlot, endSlot)`.
    pub fn encode(&self, kind: ValueKind) -> Result<(Vec<u8>, u32, u32), TsdError> {
        let (start, end) = self.slot_range()?;
        let bytes = encode_slots(start, end, &self.values, kind);
        Ok((bytes, start, end))
    }
}

/// Encodes a dense `[start, end]` slot range into the on-disk format: a
/// varint header, a one-bit-per-slot presence bitmap, then the present
/// values in slot order (ZigZag varint for ints, raw little-endian 8 bytes
/// for floats).
pub fn encode_slots(
    start: u32,
    end: u32,
    values: &BTreeMap<u32, SlotValue>,
    kind: ValueKind,
) -> Vec<u8> {
    let mut buf = Vec::new();
    write_uvarint(start as u64, &mut buf);
    write_uvarint(end as u64, &mut buf);

    let mut presence = BitWriter::new();
    for slot in start..=end {
        presence
            .write_bits(values.contains_key(&slot) as u64, 1)
            .expect("1-bit field is always valid width");
    }
    let presence_bytes = presence.finish();
    write_uvarint(presence_bytes.len() as u64, &mut buf);
    buf.extend(presence_bytes);

    for slot in start..=end {
        if let Some(v) = values.get(&slot) {
            match (kind, v) {
                (ValueKind::Int, SlotValue::Int(i)) => {
                    write_uvarint(zigzag_encode(*i), &mut buf);
                }
                (ValueKind::Float, SlotValue::Float(f)) => {
                    buf.extend_from_slice(&f.to_le_bytes());
                }
                _ => unreachable!("slot value kind must match the block's declared kind"),
            }
        }
    }

    buf
}

/// Decodes a buffer produced by [`encode_slots`] back into a dense slot map.
pub fn decode_slots(
    buf: &[u8],
    kind: ValueKind,
) -> Result<(u32, u32, BTreeMap<u32, SlotValue>), TsdError> {
    let (start, n) = read_uvarint(buf).ok_or(TsdError::Truncated)?;
    let mut off = n;
    let (end, n) = read_uvarint(&buf[off..]).ok_or(TsdError::Truncated)?;
    off += n;
    let start = start as u32;
    let end = end as u32;
    if end < start {
        return Err(TsdError::Corrupt("endSlot before startSlot"));
    }

    let (presence_len, n) = read_uvarint(&buf[off..]).ok_or(TsdError::Truncated)?;
    off += n;
    let presence_len = presence_len as usize;
    let presence_bytes = buf.get(off..off + presence_len).ok_or(TsdError::Truncated)?;
    off += presence_len;

    let slot_count = (end - start) as u64 + 1;
    let mut reader = BitReader::new(presence_bytes);
    let mut present_slots = Vec::new();
    for i in 0..slot_count {
        if reader.read_bits(1)? == 1 {
            present_slots.push(start + i as u32);
        }
    }

    let mut values = BTreeMap::new();
    for slot in present_slots {
        let value = match kind {
            ValueKind::Int => {
                let (zz, n) = read_uvarint(&buf[off..]).ok_or(TsdError::Truncated)?;
                off += n;
                SlotValue::Int(zigzag_decode(zz))
            }
            ValueKind::Float => {
                let raw: [u8; 8] = buf
                    .get(off..off + 8)
                    .ok_or(TsdError::Truncated)?
                    .try_into()
                    .unwrap();
                off += 8;
                SlotValue::Float(f64::from_le_bytes(raw))
            }
        };
        values.insert(slot, value);
    }

    Ok((start, end, values))
}

/// Merges two encoded slot maps per spec.md §4.3's compaction rule: slots
/// present in both are combined via `agg`; slots present in only one source
/// pass through unchanged.
pub fn merge_slots(
    a: (u32, u32, BTreeMap<u32, SlotValue>),
    b: (u32, u32, BTreeMap<u32, SlotValue>),
    agg: AggFunc,
) -> (u32, u32, BTreeMap<u32, SlotValue>) {
    let (a_start, a_end, a_values) = a;
    let (b_start, b_end, b_values) = b;

    let start = a_start.min(b_start);
    let end = a_end.max(b_end);

    let mut merged = a_values;
    for (slot, value) in b_values {
        merged
            .entry(slot)
            .and_modify(|existing| *existing = agg.apply(*existing, value))
            .or_insert(value);
    }

    (start, end, merged)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_int_block() {
        let mut values = BTreeMap::new();
        values.insert(10, SlotValue::Int(300));
        values.insert(11, SlotValue::Int(110));
        values.insert(40, SlotValue::Int(20));

        let buf = encode_slots(10, 40, &values, ValueKind::Int);
        let (start, end, decoded) = decode_slots(&buf, ValueKind::Int).unwrap();
        assert_eq!((start, end), (10, 40));
        assert_eq!(decoded, values);
    }

    #[test]
    fn round_trips_float_block() {
        let mut values = BTreeMap::new();
        values.insert(0, SlotValue::Float(1.5));
        values.insert(3, SlotValue::Float(-2.25));

        let buf = encode_slots(0, 3, &values, ValueKind::Float);
        let (_, _, decoded) = decode_slots(&buf, ValueKind::Float).unwrap();
        assert_eq!(decoded, values);
    }

    #[test]
    fn block_slot_range_fails_when_never_written() {
        let block = Block::new(64);
        assert_eq!(block.slot_range().unwrap_err(), TsdError::Empty);
    }

    #[test]
    fn merge_applies_agg_func_on_overlapping_slots() {
        let mut a = BTreeMap::new();
        a.insert(10, SlotValue::Int(200));
        let mut b = BTreeMap::new();
        b.insert(10, SlotValue::Int(100));
        b.insert(40, SlotValue::Int(20));

        let (start, end, merged) = merge_slots((10, 10, a), (10, 40, b), AggFunc::Sum);
        assert_eq!((start, end), (10, 40));
        assert_eq!(merged.get(&10), Some(&SlotValue::Int(300)));
        assert_eq!(merged.get(&40), Some(&SlotValue::Int(20)));
    }
}
