//! # Memtable (Ingest Store)
//!
//! The mutable, in-memory write buffer metric points land in before they
//! are flushed to an immutable on-disk block (spec.md §4.6).
//!
//! ## Sharding
//!
//! A fixed, power-of-two number of shards, each owning an arena of
//! [`MetricStore`]s indexed by metric-hash (64-bit FNV-1a of the metric
//! name). Shard index is `metric_hash & (shard_count - 1)`. A memtable-wide
//! side table maps metric-id back to metric-hash for reverse lookup after
//! eviction.
//!
//! ## Concurrency
//!
//! Every shard has its own structural read-write lock guarding the
//! metric-hash arena; looking up an existing metric-store only needs the
//! read side. Each metric-store in turn guards its own tag-hash map the
//! same way, and each tag-store serializes its own field writes behind a
//! `Mutex` — so two writers touching different tag-sets of the same metric
//! never block each other. The evictor and flush routines take at most one
//! shard's structural lock at a time.
//!
//! ## Background tasks
//!
//! This crate carries no async runtime, so "background task" is a plain
//! `std::thread::spawn` coordinated over a `crossbeam::channel` — the
//! evictor wakes on a non-blocking notification (coalesced: a pending
//! notification is not queued twice) or an idle timer, and the tag-limit
//! syncer relays a `metric name -> limit` map onto matching metric-stores
//! until its channel closes or the memtable is dropped.
//!
//! Grounded on `original_source/tsdb/memdb/database.go`'s shard/evict/flush
//! orchestration and this crate's own `src/memtable/mod.rs` lineage (the
//! `RwLock`-guarded-map idiom generalized to an arena-per-shard).

pub mod shard;
pub mod store;

pub use store::{DrainedSeries, FieldStore, MetricStore, TagStore};

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender};
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::btree::BTreeBuilder;
use crate::codec::varint::write_uvarint;
use crate::interfaces::{Flusher, IdGenerator};
use crate::memtable::shard::ShardBucket;
use crate::tagindex::TagsMappingBuilder;
use crate::tsd::{FieldType, SlotValue, TsdError};

/// Magic trailer identifying a flushed per-metric block (spec.md §6's
/// footer: `[tagMapOffset][btreeOffset][tsdOffset][magic]`).
const FOOTER_MAGIC: [u8; 4] = *b"CDB1";

/// Default shard count (spec.md §4.6's worked example).
pub const DEFAULT_SHARD_COUNT: usize = 256;

/// Default time a tag-store may go unwritten before the evictor prunes it.
pub const DEFAULT_TAG_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Default period between idle-timer evictor wakeups.
pub const DEFAULT_EVICT_IDLE_INTERVAL: Duration = Duration::from_secs(60);

/// Errors produced by the memtable.
#[derive(Debug, Error)]
pub enum MemtableError {
    /// A metric-store's tag-hash count is already at its configured limit.
    #[error("metric {metric_id} has reached its tag limit of {limit}")]
    TagLimitExceeded {
        /// The metric whose limit was hit.
        metric_id: u32,
        /// The limit that was hit.
        limit: u32,
    },

    /// `FlushFamilyTo` failed midway; the caller's drained family-times
    /// have already been unioned back into their shards.
    #[error("flush failed: {0}")]
    FlushFailed(String),

    /// An internal `RwLock`/`Mutex` was poisoned by a panicking holder.
    #[error("memtable lock poisoned")]
    LockPoisoned,

    /// Propagated from the underlying TSD segment store.
    #[error(transparent)]
    Tsd(#[from] TsdError),
}

/// FNV-1a 64-bit hash, used to map metric names to shard/arena keys
/// (spec.md §4.6; matches the Go source's `fnv1a.HashString64`).
fn fnv1a_64(s: &str) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;
    let mut hash = OFFSET_BASIS;
    for byte in s.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// Hashes a point's canonical tag string: each `key=value` pair in
/// ascending key order, separated by a byte that cannot appear in a tag
/// key or value (spec.md §4.6 step 1: "Hash the canonical tag string").
/// `tags` must already be in canonical (key-sorted) order.
fn canonical_tag_hash(tags: &[(String, String)]) -> u64 {
    let mut s = String::new();
    for (k, v) in tags {
        s.push_str(k);
        s.push('=');
        s.push_str(v);
        s.push('\u{1f}');
    }
    fnv1a_64(&s)
}

enum EvictSignal {
    Wake,
    Shutdown,
}

/// Shared state behind the [`Memtable`] handle: the shard arena and the
/// configuration background tasks need to see.
struct Shared<G> {
    shards: Vec<ShardBucket>,
    shard_mask: u64,
    metric_id_to_hash: std::sync::RwLock<std::collections::HashMap<u32, u64>>,
    generator: G,
    time_window: u32,
    default_max_tags: std::sync::atomic::AtomicU32,
    tag_idle_timeout: Duration,
}

impl<G: IdGenerator> Shared<G> {
    fn shard_for(&self, metric_hash: u64) -> &ShardBucket {
        &self.shards[(metric_hash & self.shard_mask) as usize]
    }

    fn get_or_create_metric_store(
        &self,
        metric_name: &str,
        metric_hash: u64,
    ) -> Result<Arc<MetricStore>, MemtableError> {
        let shard = self.shard_for(metric_hash);
        let default_limit = self.default_max_tags.load(Ordering::Relaxed);
        let store = shard.get_or_create(metric_hash, || {
            let metric_id = self.generator.gen_metric_id(metric_name);
            MetricStore::new(metric_id, default_limit)
        })?;

        let mut reverse = self
            .metric_id_to_hash
            .write()
            .map_err(|_| MemtableError::LockPoisoned)?;
        reverse.entry(store.metric_id()).or_insert(metric_hash);
        Ok(store)
    }
}

/// The sharded, in-memory ingest store (spec.md §4.6).
pub struct Memtable<G: IdGenerator + Send + Sync + 'static> {
    shared: Arc<Shared<G>>,
    cancel: Arc<AtomicBool>,
    evict_tx: Sender<EvictSignal>,
    evictor: Option<JoinHandle<()>>,
    syncer_started: AtomicBool,
}

impl<G: IdGenerator + Send + Sync + 'static> Memtable<G> {
    /// Creates a memtable with `shard_count` shards (must be a power of
    /// two), a `time_window`-sized TSD window, and `default_max_tags` as
    /// the starting per-metric tag-hash limit. `generator` is a required
    /// argument — there is no default id generator, so misconfiguration
    /// fails at construction rather than silently at write time.
    pub fn new(
        generator: G,
        shard_count: usize,
        time_window: u32,
        default_max_tags: u32,
    ) -> Self {
        Self::with_tag_idle_timeout(
            generator,
            shard_count,
            time_window,
            default_max_tags,
            DEFAULT_TAG_IDLE_TIMEOUT,
        )
    }

    /// Like [`Memtable::new`] but with an explicit tag-store idle timeout.
    pub fn with_tag_idle_timeout(
        generator: G,
        shard_count: usize,
        time_window: u32,
        default_max_tags: u32,
        tag_idle_timeout: Duration,
    ) -> Self {
        assert!(shard_count.is_power_of_two(), "shard_count must be a power of two");

        let shards = (0..shard_count).map(|_| ShardBucket::new()).collect();
        let shared = Arc::new(Shared {
            shards,
            shard_mask: shard_count as u64 - 1,
            metric_id_to_hash: std::sync::RwLock::new(std::collections::HashMap::new()),
            generator,
            time_window,
            default_max_tags: std::sync::atomic::AtomicU32::new(default_max_tags),
            tag_idle_timeout,
        });

        let (evict_tx, evict_rx) = bounded(1);
        let cancel = Arc::new(AtomicBool::new(false));

        let evictor = {
            let shared = shared.clone();
            let cancel = cancel.clone();
            std::thread::spawn(move || evictor_loop(shared, evict_rx, cancel))
        };

        Self {
            shared,
            cancel,
            evict_tx,
            evictor: Some(evictor),
            syncer_started: AtomicBool::new(false),
        }
    }

    /// Writes one point: `(metric, tag-set, field_id, field_type,
    /// family_time, slot, value)`. Creates the metric-store and tag-store
    /// on demand, assigning a series-id on first sight of `tags` for this
    /// metric (spec.md §3); fails with [`MemtableError::TagLimitExceeded`]
    /// if the tag-set is new and the metric is already at its limit.
    #[allow(clippy::too_many_arguments)]
    pub fn write(
        &self,
        metric_name: &str,
        tags: &[(&str, &str)],
        field_id: u16,
        field_type: FieldType,
        family_time: i64,
        slot: u32,
        value: SlotValue,
    ) -> Result<(), MemtableError> {
        let metric_hash = fnv1a_64(metric_name);
        let store = self.shared.get_or_create_metric_store(metric_name, metric_hash)?;

        let mut canonical_tags: Vec<(String, String)> =
            tags.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        canonical_tags.sort_by(|a, b| a.0.cmp(&b.0));
        let tag_hash = canonical_tag_hash(&canonical_tags);

        let metric_id = store.metric_id();
        let generator = &self.shared.generator;
        store.write(
            tag_hash,
            &canonical_tags,
            || generator.gen_tag_id(metric_id, tag_hash),
            field_id,
            field_type,
            self.shared.time_window,
            family_time,
            slot,
            value,
        )?;
        self.shared.shard_for(metric_hash).add_family_time(family_time)?;
        Ok(())
    }

    /// Starts (at most once) a task relaying a `metric name -> tag limit`
    /// map onto matching metric-stores. The task exits when `rx` is
    /// closed or the memtable is dropped. `None` entries in a batch are
    /// ignored, mirroring the Go source's nil-skip rule.
    pub fn with_max_tags_limit(
        &self,
        rx: Receiver<std::collections::HashMap<String, u32>>,
    ) {
        if self.syncer_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let shared = self.shared.clone();
        let cancel = self.cancel.clone();
        std::thread::spawn(move || loop {
            if cancel.load(Ordering::SeqCst) {
                return;
            }
            match rx.recv_timeout(Duration::from_millis(200)) {
                Ok(limits) => {
                    for (metric_name, limit) in limits {
                        let hash = fnv1a_64(&metric_name);
                        if let Ok(Some(store)) = shared.shard_for(hash).get(hash) {
                            store.set_max_tags_limit(limit);
                        }
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return,
            }
        });
    }

    /// Walks every shard, draining its live family-times and flushing
    /// every metric-store's data for `family_time` to `sink` (spec.md
    /// §4.6's `FlushFamilyTo`). On any error the drained family-times are
    /// unioned back so the caller may retry.
    pub fn flush_family_to<F: Flusher>(
        &self,
        sink: &mut F,
        family_time: i64,
    ) -> Result<(), MemtableError> {
        let result = self.flush_family_inner(sink, family_time);
        self.notify_evictor();
        result
    }

    fn flush_family_inner<F: Flusher>(
        &self,
        sink: &mut F,
        family_time: i64,
    ) -> Result<(), MemtableError> {
        for shard in &self.shared.shards {
            let mut drained = shard.drain_family_times()?;
            let flush_result = self.flush_shard(shard, sink, family_time);
            if flush_result.is_err() {
                shard.union_family_times(drained)?;
                return flush_result;
            }
            drained.remove(&family_time);
            shard.union_family_times(drained)?;
        }
        sink.commit().map_err(|e| MemtableError::FlushFailed(e.to_string()))
    }

    /// Flushes one shard's metric-stores, appending one assembled payload
    /// per metric to `sink`. Does not commit: `Commit` is called once per
    /// `flush_family_to` call, after every shard has been flushed, so the
    /// whole family-time flush becomes visible as a unit (spec.md §6).
    fn flush_shard<F: Flusher>(
        &self,
        shard: &ShardBucket,
        sink: &mut F,
        family_time: i64,
    ) -> Result<(), MemtableError> {
        for (_, store) in shard.all_stores()? {
            let series = store.drain_family(family_time)?;
            if series.is_empty() {
                continue;
            }
            let payload = assemble_metric_payload(&series)?;
            sink.add(&store.metric_id().to_be_bytes(), &payload)
                .map_err(|e| MemtableError::FlushFailed(e.to_string()))?;
        }
        Ok(())
    }

    /// Every family-time currently live (not yet flushed) across shards,
    /// sorted ascending.
    pub fn families(&self) -> Result<Vec<i64>, MemtableError> {
        let mut set = HashSet::new();
        for shard in &self.shared.shards {
            set.extend(shard.family_times()?);
        }
        let mut out: Vec<i64> = set.into_iter().collect();
        out.sort_unstable();
        Ok(out)
    }

    /// Count of distinct metrics tracked across all shards.
    pub fn count_metrics(&self) -> Result<usize, MemtableError> {
        let mut total = 0;
        for shard in &self.shared.shards {
            total += shard.all_stores()?.len();
        }
        Ok(total)
    }

    fn notify_evictor(&self) {
        // Non-blocking, coalesced: if a notification is already pending
        // the bounded(1) channel is full and the send is simply dropped.
        if self.evict_tx.try_send(EvictSignal::Wake).is_err() {
            trace!("evictor already has a pending wakeup, dropping notification");
        }
    }
}

impl<G: IdGenerator + Send + Sync + 'static> Drop for Memtable<G> {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::SeqCst);
        let _ = self.evict_tx.try_send(EvictSignal::Shutdown);
        if let Some(handle) = self.evictor.take() {
            let _ = handle.join();
        }
    }
}

fn evictor_loop<G: IdGenerator>(
    shared: Arc<Shared<G>>,
    rx: Receiver<EvictSignal>,
    cancel: Arc<AtomicBool>,
) {
    loop {
        match rx.recv_timeout(DEFAULT_EVICT_IDLE_INTERVAL) {
            Ok(EvictSignal::Shutdown) => return,
            Ok(EvictSignal::Wake) | Err(RecvTimeoutError::Timeout) => {
                if cancel.load(Ordering::SeqCst) {
                    return;
                }
                run_eviction_pass(&shared);
            }
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

fn run_eviction_pass<G: IdGenerator>(shared: &Shared<G>) {
    for shard in &shared.shards {
        match shard.evict(shared.tag_idle_timeout) {
            Ok(removed) => {
                if !removed.is_empty() {
                    debug!(count = removed.len(), "evicted empty metric-stores");
                }
            }
            Err(e) => warn!(error = %e, "eviction pass failed for shard"),
        }
    }
    trace!("eviction pass complete");
}

/// Assembles one metric's flush payload from its drained series: a
/// tag-mapping block, a B+Tree keyed by big-endian series-id mapping to an
/// offset into the TSD region, the TSD region itself, and a trailing
/// footer (spec.md §6: "the payload is the concatenation of a tag-mapping
/// block, a B+Tree block, and a TSD region with a trailing fixed footer
/// `[tagMapOffset][btreeOffset][tsdOffset][magic]`").
///
/// `series` must already be sorted by ascending series-id — both
/// [`TagsMappingBuilder::add`] and [`BTreeBuilder::push`] require it.
fn assemble_metric_payload(series: &[DrainedSeries]) -> Result<Vec<u8>, MemtableError> {
    let mut tag_map = TagsMappingBuilder::new();
    let mut tree = BTreeBuilder::new();
    let mut tsd_region = Vec::new();

    for s in series {
        let keys: Vec<&str> = s.tags.iter().map(|(k, _)| k.as_str()).collect();
        let values: Vec<&str> = s.tags.iter().map(|(_, v)| v.as_str()).collect();
        tag_map
            .add(s.series_id, &keys, &values)
            .map_err(|e| MemtableError::FlushFailed(e.to_string()))?;

        // One series sub-block: each field as
        // [uvarint field_id][byte field_type][uvarint len][bytes].
        let series_offset = tsd_region.len() as u64;
        for (field_id, field_type, bytes) in &s.fields {
            write_uvarint(*field_id as u64, &mut tsd_region);
            tsd_region.push(field_type.as_u8());
            write_uvarint(bytes.len() as u64, &mut tsd_region);
            tsd_region.extend_from_slice(bytes);
        }
        tree.push(s.series_id.to_be_bytes().to_vec(), series_offset);
    }

    let tag_map_bytes = tag_map.build().map_err(|e| MemtableError::FlushFailed(e.to_string()))?;
    let tree_bytes = tree
        .build(crate::btree::builder::DEFAULT_FANOUT)
        .map_err(|e| MemtableError::FlushFailed(e.to_string()))?;

    let tag_map_offset = 0u64;
    let btree_offset = tag_map_bytes.len() as u64;
    let tsd_offset = btree_offset + tree_bytes.len() as u64;

    let mut payload =
        Vec::with_capacity(tag_map_bytes.len() + tree_bytes.len() + tsd_region.len() + 32);
    payload.extend_from_slice(&tag_map_bytes);
    payload.extend_from_slice(&tree_bytes);
    payload.extend_from_slice(&tsd_region);
    write_uvarint(tag_map_offset, &mut payload);
    write_uvarint(btree_offset, &mut payload);
    write_uvarint(tsd_offset, &mut payload);
    payload.extend_from_slice(&FOOTER_MAGIC);

    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex as StdMutex;

    #[derive(Debug, thiserror::Error)]
    #[error("fake id generator error")]
    struct FakeGenError;

    struct FakeIdGenerator {
        next_metric_id: StdMutex<u32>,
        next_series_id: AtomicU32,
    }

    impl FakeIdGenerator {
        fn new() -> Self {
            Self {
                next_metric_id: StdMutex::new(1),
                next_series_id: AtomicU32::new(1),
            }
        }
    }

    impl IdGenerator for FakeIdGenerator {
        type Error = FakeGenError;

        fn gen_metric_id(&self, _name: &str) -> u32 {
            let mut guard = self.next_metric_id.lock().unwrap();
            let id = *guard;
            *guard += 1;
            id
        }

        fn gen_field_id(
            &self,
            _metric_id: u32,
            _name: &str,
            _field_type: FieldType,
        ) -> Result<u16, Self::Error> {
            Ok(1)
        }

        fn gen_tag_id(&self, _metric_id: u32, _tag_hash: u64) -> u32 {
            self.next_series_id.fetch_add(1, Ordering::Relaxed)
        }
    }

    struct FakeFlusher {
        adds: Vec<(Vec<u8>, Vec<u8>)>,
        commits: Cell<u32>,
    }

    impl FakeFlusher {
        fn new() -> Self {
            Self {
                adds: Vec::new(),
                commits: Cell::new(0),
            }
        }
    }

    impl Flusher for FakeFlusher {
        type Error = std::convert::Infallible;

        fn add(&mut self, key: &[u8], payload: &[u8]) -> Result<(), Self::Error> {
            self.adds.push((key.to_vec(), payload.to_vec()));
            Ok(())
        }

        fn commit(&mut self) -> Result<(), Self::Error> {
            self.commits.set(self.commits.get() + 1);
            Ok(())
        }
    }

    fn memtable() -> Memtable<FakeIdGenerator> {
        Memtable::new(FakeIdGenerator::new(), 4, 64, 8)
    }

    #[test]
    fn write_then_read_back_family_times() {
        let mt = memtable();
        mt.write("cpu.load", &[("host", "a")], 1, FieldType::Gauge, 100, 5, SlotValue::Float(0.5))
            .unwrap();
        mt.write("cpu.load", &[("host", "a")], 1, FieldType::Gauge, 200, 1, SlotValue::Float(0.7))
            .unwrap();

        assert_eq!(mt.families().unwrap(), vec![100, 200]);
        assert_eq!(mt.count_metrics().unwrap(), 1);
    }

    #[test]
    fn flush_family_to_drains_only_the_requested_family_time() {
        let mt = memtable();
        mt.write("cpu.load", &[("host", "a")], 1, FieldType::Sum, 100, 0, SlotValue::Int(10))
            .unwrap();
        mt.write("cpu.load", &[("host", "a")], 1, FieldType::Sum, 200, 0, SlotValue::Int(20))
            .unwrap();

        let mut sink = FakeFlusher::new();
        mt.flush_family_to(&mut sink, 100).unwrap();

        assert_eq!(sink.adds.len(), 1, "one assembled payload for the one metric flushed");
        assert_eq!(sink.commits.get(), 1);
        assert_eq!(mt.families().unwrap(), vec![200]);
    }

    #[test]
    fn flushing_the_same_family_time_twice_is_a_no_op() {
        let mt = memtable();
        mt.write("cpu.load", &[("host", "a")], 1, FieldType::Sum, 100, 0, SlotValue::Int(10))
            .unwrap();

        let mut sink = FakeFlusher::new();
        mt.flush_family_to(&mut sink, 100).unwrap();
        assert_eq!(sink.adds.len(), 1);

        // The family-time was retired from the shard's live set, so a
        // second flush walks every metric-store but finds nothing left to
        // serialize for family-time 100.
        mt.flush_family_to(&mut sink, 100).unwrap();
        assert_eq!(sink.adds.len(), 1, "second flush of the same family-time added nothing");
        assert_eq!(sink.commits.get(), 2, "commit is still called even with no adds");
    }

    #[test]
    fn tag_limit_exceeded_surfaces_to_the_caller() {
        let mt = Memtable::new(FakeIdGenerator::new(), 4, 64, 1);
        mt.write("cpu.load", &[("host", "a")], 1, FieldType::Sum, 100, 0, SlotValue::Int(1))
            .unwrap();
        let err = mt
            .write("cpu.load", &[("host", "b")], 1, FieldType::Sum, 100, 0, SlotValue::Int(1))
            .unwrap_err();
        assert!(matches!(err, MemtableError::TagLimitExceeded { .. }));
    }

    #[test]
    fn different_metric_names_get_different_metric_ids() {
        let mt = memtable();
        mt.write("cpu.load", &[("host", "a")], 1, FieldType::Sum, 100, 0, SlotValue::Int(1))
            .unwrap();
        mt.write("mem.used", &[("host", "a")], 1, FieldType::Sum, 100, 0, SlotValue::Int(1))
            .unwrap();
        assert_eq!(mt.count_metrics().unwrap(), 2);
    }

    #[test]
    fn a_metric_with_many_series_flushes_as_one_assembled_payload() {
        let mt = Memtable::new(FakeIdGenerator::new(), 4, 64, 100);
        for i in 0..16u32 {
            let host = format!("host-{i}");
            mt.write(
                "shared.metric",
                &[("host", &host)],
                1,
                FieldType::Sum,
                0,
                0,
                SlotValue::Int(i as i64),
            )
            .unwrap();
        }

        let mut sink = FakeFlusher::new();
        mt.flush_family_to(&mut sink, 0).unwrap();
        assert_eq!(sink.adds.len(), 1, "16 distinct tag-sets of one metric still yield one payload");

        let (key, payload) = &sink.adds[0];
        assert_eq!(key, &1u32.to_be_bytes().to_vec());
        assert!(payload.ends_with(&FOOTER_MAGIC));
    }

    #[test]
    fn fnv1a_matches_known_test_vector() {
        // FNV-1a 64-bit of the empty string is the offset basis.
        assert_eq!(fnv1a_64(""), 0xcbf29ce484222325);
    }

    #[test]
    fn canonical_tag_hash_is_order_independent_once_sorted() {
        let a = vec![("dc".to_string(), "us-east".to_string()), ("host".to_string(), "a".to_string())];
        let b = vec![("dc".to_string(), "us-east".to_string()), ("host".to_string(), "a".to_string())];
        assert_eq!(canonical_tag_hash(&a), canonical_tag_hash(&b));
    }
}
