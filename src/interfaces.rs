//! Narrow traits at the boundary between this crate and the rest of the
//! system: the flush sink, the id-generation service, and the tag filter
//! query path. None of these ships a concrete implementation here — they
//! are the documented seam to the HTTP surface, cluster coordinator, gRPC
//! handlers, SQL planner, and replication manager, none of which this
//! crate builds.
//!
//! Grounded on `src/engine/mod.rs`'s `CompactionStrategy` trait-boundary
//! idiom: a small trait, no default impl, callers supply their own.

use roaring::RoaringBitmap;

/// Accepts flushed per-metric byte payloads and commits them as a unit.
///
/// A caller writes a payload per metric-id via repeated [`Flusher::add`]
/// calls, then calls [`Flusher::commit`] once to make the whole family
/// flush visible. The key is the big-endian metric-id; the payload is the
/// concatenation of a tag-mapping block, a B+Tree block, and a TSD region
/// with a trailing footer, fully assembled by the memtable before it
/// reaches this sink.
pub trait Flusher {
    /// The sink's error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Appends `payload` under `key` (big-endian metric-id).
    fn add(&mut self, key: &[u8], payload: &[u8]) -> Result<(), Self::Error>;

    /// Commits all payloads added since the last commit.
    fn commit(&mut self) -> Result<(), Self::Error>;
}

/// Generates monotonically increasing, persistent identifiers for metrics,
/// fields, and tags. Implementations externalize the counters to a state
/// repository so ids survive process restarts.
pub trait IdGenerator {
    /// The generator's error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Returns the metric-id for `name`, allocating one if unseen.
    fn gen_metric_id(&self, name: &str) -> u32;

    /// Returns the field-id for `(metric_id, name, field_type)`, allocating
    /// one if unseen.
    fn gen_field_id(
        &self,
        metric_id: u32,
        name: &str,
        field_type: crate::tsd::FieldType,
    ) -> Result<u16, Self::Error>;

    /// Returns the series-id for `(metric_id, tag_hash)`, allocating one on
    /// first sight of that tag-hash within the metric.
    fn gen_tag_id(&self, metric_id: u32, tag_hash: u64) -> u32;
}

/// A tag filter expression, evaluated by a [`TagFilter`] implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagExpr {
    /// `key == val`.
    Equals { key: String, val: String },
    /// `key` matches the glob `pattern`.
    Like { key: String, pattern: String },
    /// `key` matches the regular expression `pattern`.
    Regex { key: String, pattern: String },
    /// `key` is one of `vals`.
    In { key: String, vals: Vec<String> },
    /// Logical negation of `inner`.
    Not { inner: Box<TagExpr> },
    /// Logical conjunction.
    And { l: Box<TagExpr>, r: Box<TagExpr> },
    /// Logical disjunction.
    Or { l: Box<TagExpr>, r: Box<TagExpr> },
}

/// Resolves tag filter expressions to series-id sets. Consumed by the
/// memtable and by query execution, backed by the tag-mapping block and
/// an inverted tag index outside this crate's scope.
pub trait TagFilter {
    /// The filter's error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Returns the series-ids matching `expr` for `metric_id` within
    /// `time_range` (start/end, caller-defined units).
    fn find_series_ids_by_expr(
        &self,
        metric_id: u32,
        expr: &TagExpr,
        time_range: (i64, i64),
    ) -> Result<RoaringBitmap, Self::Error>;

    /// Returns every series-id carrying `tag_key` (any value) for
    /// `metric_id` within `time_range`.
    fn get_series_ids_for_tag(
        &self,
        metric_id: u32,
        tag_key: &str,
        time_range: (i64, i64),
    ) -> Result<RoaringBitmap, Self::Error>;
}

/// Evaluates `expr` against `filter`, per spec: `Not` is the set
/// difference between all series for the tag key and the inner result.
pub fn eval_tag_expr<F: TagFilter>(
    filter: &F,
    metric_id: u32,
    expr: &TagExpr,
    time_range: (i64, i64),
) -> Result<RoaringBitmap, F::Error> {
    match expr {
        TagExpr::Equals { key, val } => filter.find_series_ids_by_expr(
            metric_id,
            &TagExpr::Equals {
                key: key.clone(),
                val: val.clone(),
            },
            time_range,
        ),
        TagExpr::Like { .. } | TagExpr::Regex { .. } | TagExpr::In { .. } => {
            filter.find_series_ids_by_expr(metric_id, expr, time_range)
        }
        TagExpr::Not { inner } => {
            let key = tag_expr_key(inner);
            let all = filter.get_series_ids_for_tag(metric_id, key, time_range)?;
            let excluded = eval_tag_expr(filter, metric_id, inner, time_range)?;
            Ok(&all - &excluded)
        }
        TagExpr::And { l, r } => {
            let lhs = eval_tag_expr(filter, metric_id, l, time_range)?;
            let rhs = eval_tag_expr(filter, metric_id, r, time_range)?;
            Ok(&lhs & &rhs)
        }
        TagExpr::Or { l, r } => {
            let lhs = eval_tag_expr(filter, metric_id, l, time_range)?;
            let rhs = eval_tag_expr(filter, metric_id, r, time_range)?;
            Ok(&lhs | &rhs)
        }
    }
}

fn tag_expr_key(expr: &TagExpr) -> &str {
    match expr {
        TagExpr::Equals { key, .. }
        | TagExpr::Like { key, .. }
        | TagExpr::Regex { key, .. }
        | TagExpr::In { key, .. } => key,
        TagExpr::Not { inner } => tag_expr_key(inner),
        TagExpr::And { l, .. } | TagExpr::Or { l, .. } => tag_expr_key(l),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;

    #[derive(Debug, thiserror::Error)]
    #[error("fake tag filter error")]
    struct FakeError;

    struct FakeTagFilter {
        by_tag: RefCell<HashMap<(u32, String), RoaringBitmap>>,
        by_value: RefCell<HashMap<(u32, String, String), RoaringBitmap>>,
    }

    impl TagFilter for FakeTagFilter {
        type Error = FakeError;

        fn find_series_ids_by_expr(
            &self,
            metric_id: u32,
            expr: &TagExpr,
            _time_range: (i64, i64),
        ) -> Result<RoaringBitmap, Self::Error> {
            match expr {
                TagExpr::Equals { key, val } => Ok(self
                    .by_value
                    .borrow()
                    .get(&(metric_id, key.clone(), val.clone()))
                    .cloned()
                    .unwrap_or_default()),
                _ => Ok(RoaringBitmap::new()),
            }
        }

        fn get_series_ids_for_tag(
            &self,
            metric_id: u32,
            tag_key: &str,
            _time_range: (i64, i64),
        ) -> Result<RoaringBitmap, Self::Error> {
            Ok(self
                .by_tag
                .borrow()
                .get(&(metric_id, tag_key.to_string()))
                .cloned()
                .unwrap_or_default())
        }
    }

    #[test]
    fn not_is_set_difference_of_all_minus_inner() {
        let mut all = RoaringBitmap::new();
        all.insert(1);
        all.insert(2);
        all.insert(3);
        let mut matching = RoaringBitmap::new();
        matching.insert(2);

        let filter = FakeTagFilter {
            by_tag: RefCell::new(HashMap::from([((1, "host".to_string()), all)])),
            by_value: RefCell::new(HashMap::from([(
                (1, "host".to_string(), "a".to_string()),
                matching,
            )])),
        };

        let expr = TagExpr::Not {
            inner: Box::new(TagExpr::Equals {
                key: "host".to_string(),
                val: "a".to_string(),
            }),
        };
        let result = eval_tag_expr(&filter, 1, &expr, (0, 0)).unwrap();
        assert_eq!(result.iter().collect::<Vec<_>>(), vec![1, 3]);
    }

    #[test]
    fn and_or_combine_results() {
        let mut hosts = RoaringBitmap::new();
        hosts.insert(1);
        hosts.insert(2);
        let mut disks = RoaringBitmap::new();
        disks.insert(2);
        disks.insert(3);

        let filter = FakeTagFilter {
            by_tag: RefCell::new(HashMap::new()),
            by_value: RefCell::new(HashMap::from([
                ((1, "host".to_string(), "a".to_string()), hosts),
                ((1, "disk".to_string(), "sda".to_string()), disks),
            ])),
        };

        let host_a = TagExpr::Equals {
            key: "host".to_string(),
            val: "a".to_string(),
        };
        let disk_sda = TagExpr::Equals {
            key: "disk".to_string(),
            val: "sda".to_string(),
        };

        let and_result = eval_tag_expr(
            &filter,
            1,
            &TagExpr::And {
                l: Box::new(host_a.clone()),
                r: Box::new(disk_sda.clone()),
            },
            (0, 0),
        )
        .unwrap();
        assert_eq!(and_result.iter().collect::<Vec<_>>(), vec![2]);

        let or_result = eval_tag_expr(
            &filter,
            1,
            &TagExpr::Or {
                l: Box::new(host_a),
                r: Box::new(disk_sda),
            },
            (0, 0),
        )
        .unwrap();
        assert_eq!(or_result.iter().collect::<Vec<_>>(), vec![1, 2, 3]);
    }
}
