//! Aggregator specs and the nested field/primitive iterator contract used
//! when a storage plan reads fields back out of the TSD segment store for
//! aggregation (spec.md §4.7).
//!
//! Grounded on `original_source/pkg/field/iterator.go`'s nested
//! `Iterator`/`PrimitiveIterator` pair — expressed here as Rust `Iterator`
//! adaptors instead of Go's pull-based `HasNext`/`Next`.

use std::collections::HashSet;

use crate::tsd::{FieldType, Segment, SlotValue};

/// One of the functions an [`AggregatorSpec`] may request over a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionType {
    /// Sum of all values in the window.
    Sum,
    /// Smallest value in the window.
    Min,
    /// Largest value in the window.
    Max,
    /// Count of values in the window.
    Count,
    /// Arithmetic mean of the window.
    Avg,
    /// Earliest value in the window.
    First,
    /// Latest value in the window.
    Last,
}

/// Describes the aggregation a storage plan wants applied to one field.
/// Two specs with the same fields compare equal (value equality, not
/// identity) so a plan can dedupe requests across series.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AggregatorSpec {
    /// The field's id, scoped to its metric.
    pub field_id: u16,
    /// The field's name.
    pub field_name: String,
    /// The field's declared type.
    pub field_type: FieldType,
    /// The set of functions the plan wants computed over this field.
    pub functions: HashSet<FunctionType>,
}

impl AggregatorSpec {
    /// Creates a spec requesting `functions` over `(field_id, field_name,
    /// field_type)`.
    pub fn new(
        field_id: u16,
        field_name: impl Into<String>,
        field_type: FieldType,
        functions: impl IntoIterator<Item = FunctionType>,
    ) -> Self {
        Self {
            field_id,
            field_name: field_name.into(),
            field_type,
            functions: functions.into_iter().collect(),
        }
    }
}

/// Yields `(slot_index, value)` pairs in strictly increasing slot order.
/// Finite, single-pass, not restartable once exhausted — mirrors the
/// segment store's own slot ordering.
pub trait PrimitiveIterator: Iterator<Item = (u16, f64)> {}

impl<T: Iterator<Item = (u16, f64)>> PrimitiveIterator for T {}

/// A field iterator lazily produces one [`PrimitiveIterator`] per
/// primitive sub-stream: a single stream for scalar field types, or one
/// stream per bucket for [`FieldType::Histogram`] fields.
pub trait FieldIterator: Iterator<Item = Box<dyn PrimitiveIterator>> {
    /// The field's id.
    fn field_id(&self) -> u16;
    /// The field's declared type.
    fn field_type(&self) -> FieldType;
}

/// A [`FieldIterator`] over a single [`Segment`]'s decoded slot values.
///
/// Scalar field types yield exactly one primitive stream; histograms are
/// not decomposed into real sub-buckets by the segment store (spec.md §9
/// resolves histograms to a single Sum-aggregated stream), so this
/// iterator always yields one stream regardless of `field_type` — the
/// bucket-expansion contract is the trait boundary, future bucket-aware
/// storage can implement [`FieldIterator`] without changing callers.
pub struct SegmentFieldIterator {
    field_id: u16,
    field_type: FieldType,
    stream: Option<Vec<(u16, f64)>>,
}

impl SegmentFieldIterator {
    /// Finalizes `segment` (compacting any live block) and decodes it into
    /// a field iterator yielding one primitive stream.
    pub fn new(
        field_id: u16,
        field_type: FieldType,
        segment: &mut Segment,
    ) -> Result<Self, crate::tsd::TsdError> {
        let values = segment.decode()?;
        let stream = values
            .into_iter()
            .map(|(slot, value)| (slot as u16, slot_value_as_f64(value)))
            .collect();
        Ok(Self {
            field_id,
            field_type,
            stream: Some(stream),
        })
    }
}

fn slot_value_as_f64(v: SlotValue) -> f64 {
    match v {
        SlotValue::Int(i) => i as f64,
        SlotValue::Float(f) => f,
    }
}

impl Iterator for SegmentFieldIterator {
    type Item = Box<dyn PrimitiveIterator>;

    fn next(&mut self) -> Option<Self::Item> {
        let stream = self.stream.take()?;
        Some(Box::new(stream.into_iter()))
    }
}

impl FieldIterator for SegmentFieldIterator {
    fn field_id(&self) -> u16 {
        self.field_id
    }

    fn field_type(&self) -> FieldType {
        self.field_type
    }
}

/// Applies `function` over a primitive stream's values, consuming it.
pub fn apply_function(function: FunctionType, values: impl Iterator<Item = (u16, f64)>) -> Option<f64> {
    let values: Vec<f64> = values.map(|(_, v)| v).collect();
    if values.is_empty() {
        return None;
    }
    Some(match function {
        FunctionType::Sum => values.iter().sum(),
        FunctionType::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
        FunctionType::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        FunctionType::Count => values.len() as f64,
        FunctionType::Avg => values.iter().sum::<f64>() / values.len() as f64,
        FunctionType::First => values[0],
        FunctionType::Last => values[values.len() - 1],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tsd::{AggFunc, Segment, ValueKind};

    #[test]
    fn specs_compare_by_value_not_identity() {
        let a = AggregatorSpec::new(1, "latency", FieldType::Gauge, [FunctionType::Avg]);
        let b = AggregatorSpec::new(1, "latency", FieldType::Gauge, [FunctionType::Avg]);
        assert_eq!(a, b);

        let c = AggregatorSpec::new(1, "latency", FieldType::Gauge, [FunctionType::Sum]);
        assert_ne!(a, c);
    }

    #[test]
    fn field_iterator_yields_one_primitive_stream_in_slot_order() {
        let mut seg = Segment::new(1, 64, ValueKind::Float, AggFunc::Sum);
        seg.write(5, SlotValue::Float(1.0)).unwrap();
        seg.write(2, SlotValue::Float(2.0)).unwrap();
        seg.write(9, SlotValue::Float(3.0)).unwrap();

        let mut field_iter =
            SegmentFieldIterator::new(7, FieldType::Sum, &mut seg).unwrap();
        assert_eq!(field_iter.field_id(), 7);

        let primitive = field_iter.next().expect("one primitive stream");
        let collected: Vec<(u16, f64)> = primitive.collect();
        assert_eq!(collected, vec![(2, 2.0), (5, 1.0), (9, 3.0)]);

        assert!(field_iter.next().is_none());
    }

    #[test]
    fn apply_function_computes_aggregates_over_a_stream() {
        let stream = vec![(0u16, 1.0), (1, 2.0), (2, 3.0)];
        assert_eq!(
            apply_function(FunctionType::Sum, stream.clone().into_iter()),
            Some(6.0)
        );
        assert_eq!(
            apply_function(FunctionType::Avg, stream.clone().into_iter()),
            Some(2.0)
        );
        assert_eq!(
            apply_function(FunctionType::Count, stream.clone().into_iter()),
            Some(3.0)
        );
        assert_eq!(apply_function(FunctionType::First, stream.into_iter()), Some(1.0));
        assert_eq!(apply_function(FunctionType::Max, std::iter::empty()), None);
    }
}
