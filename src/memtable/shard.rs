//! One shard's metric-store arena plus its live family-time set.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::memtable::MemtableError;
use crate::memtable::store::MetricStore;

/// A shard's dense metric-store arena: `stores[idx]` is looked up via
/// `hash_to_index[metric_hash]`, replacing the Go source's cyclic
/// shard-to-store reference with a plain index (spec.md §9).
struct ShardInner {
    stores: Vec<Arc<MetricStore>>,
    hash_to_index: HashMap<u64, usize>,
}

/// One of the memtable's fixed shards (spec.md §4.6's sharding scheme).
pub struct ShardBucket {
    inner: RwLock<ShardInner>,
    family_times: RwLock<HashSet<i64>>,
}

impl ShardBucket {
    /// Creates an empty shard.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(ShardInner {
                stores: Vec::new(),
                hash_to_index: HashMap::new(),
            }),
            family_times: RwLock::new(HashSet::new()),
        }
    }

    /// Returns the metric-store for `metric_hash`, if one has been
    /// created in this shard.
    pub fn get(&self, metric_hash: u64) -> Result<Option<Arc<MetricStore>>, MemtableError> {
        let guard = self.inner.read().map_err(|_| MemtableError::LockPoisoned)?;
        Ok(guard
            .hash_to_index
            .get(&metric_hash)
            .map(|&idx| guard.stores[idx].clone()))
    }

    /// Returns the metric-store for `metric_hash`, creating it via
    /// `make` (called at most once, under the shard's write lock) if
    /// absent.
    pub fn get_or_create(
        &self,
        metric_hash: u64,
        make: impl FnOnce() -> MetricStore,
    ) -> Result<Arc<MetricStore>, MemtableError> {
        if let Some(store) = self.get(metric_hash)? {
            return Ok(store);
        }

        let mut guard = self.inner.write().map_err(|_| MemtableError::LockPoisoned)?;
        if let Some(&idx) = guard.hash_to_index.get(&metric_hash) {
            return Ok(guard.stores[idx].clone());
        }

        let store = Arc::new(make());
        let idx = guard.stores.len();
        guard.stores.push(store.clone());
        guard.hash_to_index.insert(metric_hash, idx);
        Ok(store)
    }

    /// Records that `family_time` has live (unflushed) data in this
    /// shard.
    pub fn add_family_time(&self, family_time: i64) -> Result<(), MemtableError> {
        self.family_times
            .write()
            .map_err(|_| MemtableError::LockPoisoned)?
            .insert(family_time);
        Ok(())
    }

    /// Atomically drains and returns the live family-time set.
    pub fn drain_family_times(&self) -> Result<HashSet<i64>, MemtableError> {
        let mut guard = self.family_times.write().map_err(|_| MemtableError::LockPoisoned)?;
        Ok(std::mem::take(&mut *guard))
    }

    /// Unions `times` back into the live family-time set (used to restore
    /// eligibility after a failed flush).
    pub fn union_family_times(&self, times: HashSet<i64>) -> Result<(), MemtableError> {
        let mut guard = self.family_times.write().map_err(|_| MemtableError::LockPoisoned)?;
        guard.extend(times);
        Ok(())
    }

    /// Returns every family-time currently marked live, without draining.
    pub fn family_times(&self) -> Result<HashSet<i64>, MemtableError> {
        Ok(self
            .family_times
            .read()
            .map_err(|_| MemtableError::LockPoisoned)?
            .clone())
    }

    /// All `(metric_hash, metric_store)` pairs currently held.
    pub fn all_stores(&self) -> Result<Vec<(u64, Arc<MetricStore>)>, MemtableError> {
        let guard = self.inner.read().map_err(|_| MemtableError::LockPoisoned)?;
        Ok(guard
            .hash_to_index
            .iter()
            .map(|(&hash, &idx)| (hash, guard.stores[idx].clone()))
            .collect())
    }

    /// Evicts idle tag-stores across every metric-store in this shard;
    /// metric-stores left with no tag-stores are dropped from the arena.
    ///
    /// The index/id reverse map is compacted too: removing from the
    /// middle of `stores` would invalidate every later index, so emptied
    /// slots are filled with the last element (swap-remove) and the
    /// displaced entry's `hash_to_index` slot is repointed.
    pub fn evict(&self, idle_after: Duration) -> Result<Vec<u64>, MemtableError> {
        let candidates = self.all_stores()?;
        for (_, store) in &candidates {
            store.evict(idle_after)?;
        }

        let mut guard = self.inner.write().map_err(|_| MemtableError::LockPoisoned)?;
        let mut removed_hashes = Vec::new();
        let empty_hashes: Vec<u64> = guard
            .hash_to_index
            .iter()
            .filter_map(|(&h, &idx)| {
                if guard.stores[idx].is_empty().unwrap_or(false) {
                    Some(h)
                } else {
                    None
                }
            })
            .collect();

        for h in empty_hashes {
            let Some(idx) = guard.hash_to_index.remove(&h) else {
                continue;
            };
            let last_idx = guard.stores.len() - 1;
            guard.stores.swap_remove(idx);
            if idx != last_idx {
                // whatever metric_hash previously pointed at `last_idx` now
                // lives at `idx`; repoint it.
                if let Some((&moved_hash, _)) =
                    guard.hash_to_index.iter().find(|(_, &v)| v == last_idx)
                {
                    guard.hash_to_index.insert(moved_hash, idx);
                }
            }
            removed_hashes.push(h);
        }

        Ok(removed_hashes)
    }
}

impl Default for ShardBucket {
    fn default() -> Self {
        Self::new()
    }
}
