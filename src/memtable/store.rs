//! Per-metric, per-tag, and per-field in-memory stores nested inside a
//! [`super::shard::ShardBucket`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use crate::memtable::MemtableError;
use crate::tsd::{FieldType, SegmentStore, SlotValue, TsdError, ValueKind};

/// Owns a capped mapping from tag-hash to [`TagStore`], plus the metric's
/// id and tag-count limit (spec.md §4.6).
pub struct MetricStore {
    metric_id: u32,
    max_tags: AtomicU32,
    tags: RwLock<HashMap<u64, Arc<Mutex<TagStore>>>>,
}

impl MetricStore {
    /// Creates an empty metric-store for `metric_id`, capped at `max_tags`
    /// distinct tag-hashes.
    pub fn new(metric_id: u32, max_tags: u32) -> Self {
        Self {
            metric_id,
            max_tags: AtomicU32::new(max_tags),
            tags: RwLock::new(HashMap::new()),
        }
    }

    /// This metric's id.
    pub fn metric_id(&self) -> u32 {
        self.metric_id
    }

    /// Number of distinct tag-hashes currently tracked.
    pub fn tags_count(&self) -> Result<usize, MemtableError> {
        Ok(read_lock(&self.tags)?.len())
    }

    /// `true` if no tag-stores remain (a candidate for eviction from the
    /// shard's metric list).
    pub fn is_empty(&self) -> Result<bool, MemtableError> {
        Ok(read_lock(&self.tags)?.is_empty())
    }

    /// Updates the tag-count limit applied to future writes (the tag-limit
    /// syncer's effect).
    pub fn set_max_tags_limit(&self, limit: u32) {
        self.max_tags.store(limit, Ordering::Relaxed);
    }

    /// Looks up (or creates, failing if the metric is at its tag-hash
    /// limit) the tag-store for `tag_hash`. On creation, `tags` is recorded
    /// as the tag-store's literal tag-set and `gen_series_id` is called
    /// exactly once to assign its series-id (spec.md §3: "SeriesID ...
    /// assigned on first sight of a tag-set for that metric").
    fn get_or_create_tag_store(
        &self,
        tag_hash: u64,
        tags: &[(String, String)],
        gen_series_id: impl FnOnce() -> u32,
    ) -> Result<Arc<Mutex<TagStore>>, MemtableError> {
        if let Some(store) = read_lock(&self.tags)?.get(&tag_hash) {
            return Ok(store.clone());
        }

        let mut guard = write_lock(&self.tags)?;
        if let Some(store) = guard.get(&tag_hash) {
            return Ok(store.clone());
        }

        let limit = self.max_tags.load(Ordering::Relaxed);
        if guard.len() as u32 >= limit {
            return Err(MemtableError::TagLimitExceeded {
                metric_id: self.metric_id,
                limit,
            });
        }

        let store = Arc::new(Mutex::new(TagStore::new(gen_series_id(), tags.to_vec())));
        guard.insert(tag_hash, store.clone());
        Ok(store)
    }

    /// Forwards one point write to the tag-store for `tag_hash`, creating
    /// field-stores (and, on first sight of `tag_hash`, the tag-store
    /// itself, via `gen_series_id`) on demand (spec.md §4.6 steps 1–3).
    #[allow(clippy::too_many_arguments)]
    pub fn write(
        &self,
        tag_hash: u64,
        tags: &[(String, String)],
        gen_series_id: impl FnOnce() -> u32,
        field_id: u16,
        field_type: FieldType,
        time_window: u32,
        family_time: i64,
        slot: u32,
        value: SlotValue,
    ) -> Result<(), MemtableError> {
        let tag_store = self.get_or_create_tag_store(tag_hash, tags, gen_series_id)?;
        let mut guard = tag_store.lock().map_err(|_| MemtableError::LockPoisoned)?;
        guard.write(field_id, field_type, time_window, family_time, slot, value)?;
        Ok(())
    }

    /// Prunes tag-stores idle for longer than `idle_after`.
    pub fn evict(&self, idle_after: Duration) -> Result<(), MemtableError> {
        let mut guard = write_lock(&self.tags)?;
        let mut stale = Vec::new();
        for (hash, store) in guard.iter() {
            let locked = store.lock().map_err(|_| MemtableError::LockPoisoned)?;
            if locked.idle_since(idle_after) {
                stale.push(*hash);
            }
        }
        for hash in stale {
            guard.remove(&hash);
        }
        Ok(())
    }

    /// Finalizes and retires every field-store's segment for `family_time`,
    /// returning one [`DrainedSeries`] per tag-store that had data for it
    /// (series-id ascending, ready to feed straight into a tag-mapping
    /// block builder and a B+Tree builder in the order both require).
    ///
    /// Retiring a segment removes it from its `SegmentStore` (spec.md §8's
    /// flush-idempotence property): a second `drain_family` call for the
    /// same `family_time` finds nothing left and returns an empty vector.
    pub fn drain_family(&self, family_time: i64) -> Result<Vec<DrainedSeries>, MemtableError> {
        let guard = read_lock(&self.tags)?;
        let mut out = Vec::new();
        for tag_store in guard.values() {
            let mut locked = tag_store.lock().map_err(|_| MemtableError::LockPoisoned)?;
            let mut fields = Vec::new();
            for ((field_id, field_type), field_store) in locked.fields.iter_mut() {
                match field_store.take_bytes(family_time) {
                    Ok(bytes) => fields.push((*field_id, *field_type, bytes)),
                    Err(TsdError::Empty) => {}
                    Err(e) => return Err(e.into()),
                }
            }
            if !fields.is_empty() {
                out.push(DrainedSeries {
                    series_id: locked.series_id,
                    tags: locked.tags.clone(),
                    fields,
                });
            }
        }
        out.sort_by_key(|s| s.series_id);
        Ok(out)
    }
}

/// One series' drained flush payload: its series-id, literal tag-set, and
/// the finalized TSD bytes for each of its fields written in the flushed
/// family-time.
pub struct DrainedSeries {
    /// This series' id, scoped to the owning metric.
    pub series_id: u32,
    /// The canonical (key-sorted) tag-set this series-id was assigned for.
    pub tags: Vec<(String, String)>,
    /// `(field_id, field_type, encoded TSD bytes)` for each field with data
    /// in the drained family-time.
    pub fields: Vec<(u16, FieldType, Vec<u8>)>,
}

/// One tag-combination's field-stores, keyed by `(field_id, field_type)`
/// (spec.md §4.6 step 2), plus the series-id assigned to this tag-set and
/// the literal tags themselves — needed at flush time to build the
/// tag-mapping block and B+Tree (spec.md §3, §4.6, §6).
pub struct TagStore {
    series_id: u32,
    tags: Vec<(String, String)>,
    last_write: Instant,
    fields: HashMap<(u16, FieldType), FieldStore>,
}

impl TagStore {
    /// Creates an empty tag-store for `series_id`, carrying `tags` as its
    /// canonical (key-sorted) tag-set.
    pub fn new(series_id: u32, tags: Vec<(String, String)>) -> Self {
        Self {
            series_id,
            tags,
            last_write: Instant::now(),
            fields: HashMap::new(),
        }
    }

    /// This tag-store's series-id.
    pub fn series_id(&self) -> u32 {
        self.series_id
    }

    /// This tag-store's literal tag-set.
    pub fn tags(&self) -> &[(String, String)] {
        &self.tags
    }

    fn write(
        &mut self,
        field_id: u16,
        field_type: FieldType,
        time_window: u32,
        family_time: i64,
        slot: u32,
        value: SlotValue,
    ) -> Result<(), TsdError> {
        self.last_write = Instant::now();
        self.fields
            .entry((field_id, field_type))
            .or_insert_with(|| FieldStore::new(field_type, time_window))
            .write(family_time, slot, value)
    }

    /// `true` if this tag-store has not been written to for at least
    /// `idle_after`.
    pub fn idle_since(&self, idle_after: Duration) -> bool {
        self.last_write.elapsed() >= idle_after
    }
}

/// Delegates `(family-time, slot, value)` writes to a [`SegmentStore`]
/// (spec.md §4.3), lazily choosing the segment store's value kind from
/// the first value ever written to this field.
pub struct FieldStore {
    field_type: FieldType,
    time_window: u32,
    segments: Option<SegmentStore>,
}

impl FieldStore {
    /// Creates an empty field-store for `field_type`, deferring segment
    /// allocation until the first write.
    pub fn new(field_type: FieldType, time_window: u32) -> Self {
        Self {
            field_type,
            time_window,
            segments: None,
        }
    }

    fn write(&mut self, family_time: i64, slot: u32, value: SlotValue) -> Result<(), TsdError> {
        let segments = self.segments.get_or_insert_with(|| {
            let kind = match value {
                SlotValue::Int(_) => ValueKind::Int,
                SlotValue::Float(_) => ValueKind::Float,
            };
            SegmentStore::new(self.time_window, kind, self.field_type.agg_func())
        });
        segments.write(family_time, slot, value)
    }

    /// Finalizes the segment for `family_time`, removes it from the
    /// underlying segment store, and returns its encoded TSD bytes.
    /// Retiring the segment here is what makes a repeat flush of the same
    /// `family_time` a no-op (spec.md §8's flush-idempotence property).
    pub fn take_bytes(&mut self, family_time: i64) -> Result<Vec<u8>, TsdError> {
        let segments = self.segments.as_mut().ok_or(TsdError::Empty)?;
        let segment = segments.segment_mut(family_time).ok_or(TsdError::Empty)?;
        let (bytes, _, _) = segment.bytes()?;
        segments.remove_segment(family_time);
        Ok(bytes)
    }
}

fn read_lock<T>(lock: &RwLock<T>) -> Result<std::sync::RwLockReadGuard<'_, T>, MemtableError> {
    lock.read().map_err(|_| MemtableError::LockPoisoned)
}

fn write_lock<T>(lock: &RwLock<T>) -> Result<std::sync::RwLockWriteGuard<'_, T>, MemtableError> {
    lock.write().map_err(|_| MemtableError::LockPoisoned)
}
