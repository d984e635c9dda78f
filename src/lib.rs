//! # chronodb-core
//!
//! On-disk storage and compression core for a distributed time-series
//! database: a bit-level stream codec, columnar compression (ZigZag,
//! delta-of-delta bit-packing, frame-of-reference int-packing), a
//! time-series-data (TSD) segment store, a persistent prefix-compressed
//! B+Tree, a tag-mapping block, and a sharded in-memory ingest store.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                        Memtable                            │
//! │  ┌───────────┐   ┌───────────┐         ┌───────────┐       │
//! │  │  Shard 0  │   │  Shard 1  │   ...   │  Shard N  │       │
//! │  │  metric   │   │  metric   │         │  metric   │       │
//! │  │  arena    │   │  arena    │         │  arena    │       │
//! │  └─────┬─────┘   └─────┬─────┘         └─────┬─────┘       │
//! │        │  tag-hash -> TagStore{series-id,tags} -> FieldStore │             │
//! │        └───────────────┬──────────────────────┘             │
//! │                 flush_family_to(Flusher, family_time)       │
//! └────────────────────────┬────────────────────────────────────┘
//!                          │
//!              ┌───────────┴───────────┐
//!              │     tag-mapping       │  dictionary + per-series
//!              │     block             │  tag key/value group
//!              ├───────────────────────┤
//!              │     B+Tree            │  series-id -> TSD offset
//!              ├───────────────────────┤
//!              │     TSD segments      │  ZigZag / delta / int-packed
//!              └───────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`bitstream`] | MSB-first bit reader/writer underlying every codec |
//! | [`codec`] | ZigZag, LEB128 varint, delta bit-packing, int-packing |
//! | [`tsd`] | Per-(series, field) segment store: blocks, compaction, agg-func merge |
//! | [`btree`] | Persistent, prefix-compressed, immutable B+Tree |
//! | [`tagindex`] | Tag-mapping block: dictionary + roaring-bitmap group index |
//! | [`memtable`] | Sharded, in-memory ingest store with background eviction |
//! | [`agg`] | Aggregator specs and the field/primitive iterator contract |
//! | [`interfaces`] | Narrow traits at the boundary to the rest of the system |
//! | [`storelock`] | Advisory exclusive file lock for a store's on-disk root |
//! | [`encoding`] | Deterministic fixed-width binary encode/decode primitives |
//!
//! ## Key properties
//!
//! - **Columnar compression** — slot values are delta-bit-packed or
//!   int-packed with a frame-of-reference base, not stored as raw
//!   fixed-width words.
//! - **Lock-tiered concurrency** — shard, metric-store, and tag-store each
//!   guard a narrower slice of state, so concurrent writers to different
//!   tag-sets of the same metric never serialize on a coarser lock.
//! - **Prefix-compressed B+Tree** — leaf keys share a longest-common-prefix
//!   per block instead of being stored in full.
//! - **Roaring-bitmap tag index** — tag-mapping groups use `rank`/`contains`
//!   over a `RoaringBitmap` instead of a per-series linear scan.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use chronodb_core::memtable::Memtable;
//! use chronodb_core::interfaces::{Flusher, IdGenerator};
//! use chronodb_core::tsd::{FieldType, SlotValue};
//! use std::sync::atomic::{AtomicU32, Ordering};
//!
//! struct SeqIdGenerator {
//!     next_metric_id: AtomicU32,
//!     next_series_id: AtomicU32,
//! }
//!
//! #[derive(Debug, thiserror::Error)]
//! #[error("id generator error")]
//! struct IdGenError;
//!
//! impl IdGenerator for SeqIdGenerator {
//!     type Error = IdGenError;
//!     fn gen_metric_id(&self, _name: &str) -> u32 {
//!         self.next_metric_id.fetch_add(1, Ordering::Relaxed)
//!     }
//!     fn gen_field_id(&self, _m: u32, _n: &str, _t: FieldType) -> Result<u16, Self::Error> {
//!         Ok(1)
//!     }
//!     fn gen_tag_id(&self, _m: u32, _h: u64) -> u32 {
//!         self.next_series_id.fetch_add(1, Ordering::Relaxed)
//!     }
//! }
//!
//! struct NullSink;
//! impl Flusher for NullSink {
//!     type Error = std::convert::Infallible;
//!     fn add(&mut self, _key: &[u8], _payload: &[u8]) -> Result<(), Self::Error> { Ok(()) }
//!     fn commit(&mut self) -> Result<(), Self::Error> { Ok(()) }
//! }
//!
//! let mt = Memtable::new(
//!     SeqIdGenerator { next_metric_id: AtomicU32::new(1), next_series_id: AtomicU32::new(1) },
//!     4,
//!     60,
//!     10_000,
//! );
//! mt.write("cpu.load", &[("host", "a")], 1, FieldType::Gauge, 0, 5, SlotValue::Float(0.8)).unwrap();
//!
//! let mut sink = NullSink;
//! mt.flush_family_to(&mut sink, 0).unwrap();
//! ```

#![allow(dead_code)]

pub mod agg;
pub mod bitstream;
pub mod btree;
pub mod codec;
pub mod encoding;
pub mod interfaces;
pub mod memtable;
pub mod storelock;
pub mod tagindex;
pub mod tsd;
