//! Segments (one per family-time) and the per-(series, field) segment store.

use std::collections::BTreeMap;

use crate::tsd::block::{merge_slots, Block, ValueKind};
use crate::tsd::{AggFunc, SlotValue, TsdError};

/// A contiguous run of encoded slot-values for one (series, field,
/// family-time) — spec.md §3.
///
/// Owns the previously flushed/compacted `encoded` image plus a mutable
/// [`Block`] covering the current time window.
#[derive(Debug, Clone)]
pub struct Segment {
    family_time: i64,
    value_kind: ValueKind,
    agg: AggFunc,
    encoded: Option<(Vec<u8>, u32, u32)>,
    block: Block,
}

impl Segment {
    /// Creates a new, empty segment for `family_time`.
    pub fn new(family_time: i64, time_window: u32, value_kind: ValueKind, agg: AggFunc) -> Self {
        Self {
            family_time,
            value_kind,
            agg,
            encoded: None,
            block: Block::new(time_window),
        }
    }

    /// The family-time this segment is keyed by.
    pub fn family_time(&self) -> i64 {
        self.family_time
    }

    /// Writes `value` at `slot`, compacting the current block into the
    /// encoded image first if `slot` falls outside its window (spec.md
    /// §4.3's state machine).
    pub fn write(&mut self, slot: u32, value: SlotValue) -> Result<(), TsdError> {
        if self.block.is_empty() {
            self.block.reset(slot);
        } else if !self.block.contains_slot(slot) {
            self.compact()?;
            self.block.reset(slot);
        }
        self.block.set(slot, value, self.agg);
        Ok(())
    }

    /// Serializes the live block and merges it into the encoded image.
    fn compact(&mut self) -> Result<(), TsdError> {
        if self.block.is_empty() {
            return Ok(());
        }
        let (bytes, start, end) = self.block.encode(self.value_kind)?;
        self.encoded = Some(match self.encoded.take() {
            None => (bytes, start, end),
            Some((prev_bytes, prev_start, prev_end)) => {
                let prev = crate::tsd::block::decode_slots(&prev_bytes, self.value_kind)?;
                let cur = crate::tsd::block::decode_slots(&bytes, self.value_kind)?;
                debug_assert_eq!((prev.0, prev.1), (prev_start, prev_end));
                debug_assert_eq!((cur.0, cur.1), (start, end));
                let (merged_start, merged_end, merged_values) =
                    merge_slots(prev, cur, self.agg);
                let merged_bytes = crate::tsd::block::encode_slots(
                    merged_start,
                    merged_end,
                    &merged_values,
                    self.value_kind,
                );
                (merged_bytes, merged_start, merged_end)
            }
        });
        Ok(())
    }

    /// The inclusive slot range this segment has recorded a value for,
    /// across both the encoded image and the live block.
    pub fn slot_range(&self) -> Result<(u32, u32), TsdError> {
        match (&self.encoded, self.block.is_empty()) {
            (None, true) => Err(TsdError::Empty),
            (Some((_, s, e)), true) => Ok((*s, *e)),
            (None, false) => self.block.slot_range(),
            (Some((_, es, ee)), false) => {
                let (bs, be) = self.block.slot_range()?;
                Ok(((*es).min(bs), (*ee).max(be)))
            }
        }
    }

    /// Finalizes the segment (compacting any live block) and returns
    /// `(bytes, startSlot, endSlot)` per spec.md §4.3.
    pub fn bytes(&mut self) -> Result<(Vec<u8>, u32, u32), TsdError> {
        self.compact()?;
        self.encoded.clone().ok_or(TsdError::Empty)
    }

    /// Finalizes the segment and decodes it into a `slot -> value` map, for
    /// callers (e.g. aggregation iterators) that want resolved values
    /// rather than the encoded image.
    pub fn decode(&mut self) -> Result<BTreeMap<u32, SlotValue>, TsdError> {
        let (bytes, _, _) = self.bytes()?;
        let (_, _, values) = crate::tsd::block::decode_slots(&bytes, self.value_kind)?;
        Ok(values)
    }
}

/// Per-(series, field) sorted list of segments, keyed by family-time
/// (spec.md §3's entity list; invariant 2: family-times strictly increase
/// between successive segments).
#[derive(Debug, Clone, Default)]
pub struct SegmentStore {
    time_window: u32,
    value_kind: ValueKind,
    agg: AggFunc,
    segments: Vec<Segment>,
}

impl SegmentStore {
    /// Creates an empty segment store.
    pub fn new(time_window: u32, value_kind: ValueKind, agg: AggFunc) -> Self {
        Self {
            time_window,
            value_kind,
            agg,
            segments: Vec::new(),
        }
    }

    /// Writes `value` at `(family_time, slot)`, creating the segment for
    /// `family_time` if it doesn't exist yet.
    pub fn write(&mut self, family_time: i64, slot: u32, value: SlotValue) -> Result<(), TsdError> {
        let idx = match self
            .segments
            .binary_search_by_key(&family_time, |s| s.family_time())
        {
            Ok(idx) => idx,
            Err(idx) => {
                self.segments.insert(
                    idx,
                    Segment::new(family_time, self.time_window, self.value_kind, self.agg),
                );
                idx
            }
        };
        self.segments[idx].write(slot, value)
    }

    /// Looks up the segment for `family_time`, if present.
    pub fn segment(&self, family_time: i64) -> Option<&Segment> {
        self.segments
            .binary_search_by_key(&family_time, |s| s.family_time())
            .ok()
            .map(|idx| &self.segments[idx])
    }

    /// Looks up the segment for `family_time` mutably, if present.
    pub fn segment_mut(&mut self, family_time: i64) -> Option<&mut Segment> {
        let idx = self
            .segments
            .binary_search_by_key(&family_time, |s| s.family_time())
            .ok()?;
        Some(&mut self.segments[idx])
    }

    /// All family-times currently held, in ascending order.
    pub fn family_times(&self) -> impl Iterator<Item = i64> + '_ {
        self.segments.iter().map(Segment::family_time)
    }

    /// `true` if no segments have ever been created.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Removes and returns the segment for `family_time`, if present.
    ///
    /// Used by flush to retire a segment once its bytes have been handed to
    /// the sink, so a second flush of the same family-time finds nothing
    /// left to serialize (spec.md §8's flush-idempotence property).
    pub fn remove_segment(&mut self, family_time: i64) -> Option<Segment> {
        let idx = self
            .segments
            .binary_search_by_key(&family_time, |s| s.family_time())
            .ok()?;
        Some(self.segments.remove(idx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compaction_merges_overlapping_slots_by_agg_func() {
        // spec.md §8's literal segment-compaction scenario.
        let mut seg = Segment::new(7, 32, ValueKind::Int, AggFunc::Sum);
        seg.write(10, SlotValue::Int(100)).unwrap();
        seg.write(11, SlotValue::Int(110)).unwrap();
        seg.write(10, SlotValue::Int(100)).unwrap(); // 200 -> within window, same block
        seg.write(40, SlotValue::Int(20)).unwrap(); // outside window: triggers compact
        seg.write(10, SlotValue::Int(100)).unwrap(); // merges into the already-compacted image
        seg.write(41, SlotValue::Int(50)).unwrap();

        let (bytes, start, end) = seg.bytes().unwrap();
        let (s, e, values) = crate::tsd::block::decode_slots(&bytes, ValueKind::Int).unwrap();
        assert_eq!((s, e), (start, end));
        assert_eq!(values.get(&10), Some(&SlotValue::Int(300)));
        assert_eq!(values.get(&11), Some(&SlotValue::Int(110)));
        assert_eq!(values.get(&40), Some(&SlotValue::Int(20)));
        assert_eq!(values.get(&41), Some(&SlotValue::Int(50)));
    }

    #[test]
    fn segment_store_keeps_family_times_sorted() {
        let mut store = SegmentStore::new(64, ValueKind::Int, AggFunc::Last);
        store.write(300, 1, SlotValue::Int(1)).unwrap();
        store.write(100, 1, SlotValue::Int(1)).unwrap();
        store.write(200, 1, SlotValue::Int(1)).unwrap();

        let times: Vec<i64> = store.family_times().collect();
        assert_eq!(times, vec![100, 200, 300]);
    }

    #[test]
    fn slot_range_fails_on_never_written_segment() {
        let seg = Segment::new(1, 32, ValueKind::Int, AggFunc::Sum);
        assert_eq!(seg.slot_range().unwrap_err(), TsdError::Empty);
    }

    #[test]
    fn remove_segment_is_gone_on_the_second_call() {
        let mut store = SegmentStore::new(64, ValueKind::Int, AggFunc::Sum);
        store.write(100, 1, SlotValue::Int(1)).unwrap();

        assert!(store.remove_segment(100).is_some());
        assert!(store.remove_segment(100).is_none());
        assert!(store.segment(100).is_none());
    }
}
