//! Tag-mapping block builder.

use std::collections::HashMap;

use roaring::RoaringBitmap;

use crate::codec::int_packing;
use crate::codec::varint::write_uvarint;
use crate::tagindex::TagIndexError;

/// One tag-combination group: a sorted key-id list, the series-ids that
/// share it (ascending), and the concatenated per-entry value-id streams.
struct GroupBuilder {
    key_ids: Vec<u32>,
    series_ids: Vec<u32>,
    /// Byte offset (into `values_stream`) where each series's entry starts,
    /// parallel to `series_ids`.
    offsets: Vec<u32>,
    values_stream: Vec<u8>,
}

/// Accumulates (series-id, tag key/value tuple) entries and serializes them
/// into the tag-mapping block byte image.
#[derive(Default)]
pub struct TagsMappingBuilder {
    dict: Vec<String>,
    dict_ids: HashMap<String, u32>,
    groups: Vec<GroupBuilder>,
    group_index: HashMap<Vec<u32>, usize>,
    last_series_id: Option<u32>,
}

impl TagsMappingBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    fn intern(&mut self, s: &str) -> u32 {
        if let Some(&id) = self.dict_ids.get(s) {
            return id;
        }
        let id = self.dict.len() as u32;
        self.dict.push(s.to_string());
        self.dict_ids.insert(s.to_string(), id);
        id
    }

    /// Records that `series_id` carries the tag tuple `keys[i] = values[i]`.
    ///
    /// `series_id` must be strictly greater than every previously added
    /// series-id (across all groups): the group's packed offsets are
    /// recorded in insertion order, which must coincide with the roaring
    /// bitmap's ascending rank order for `GetTags` to resolve the right
    /// entry.
    pub fn add(&mut self, series_id: u32, keys: &[&str], values: &[&str]) -> Result<(), TagIndexError> {
        if keys.len() != values.len() {
            return Err(TagIndexError::Corrupt("keys and values length mismatch"));
        }
        if let Some(last) = self.last_series_id {
            if series_id <= last {
                return Err(TagIndexError::DuplicateSeries);
            }
        }

        let mut pairs: Vec<(u32, u32)> = keys
            .iter()
            .zip(values.iter())
            .map(|(k, v)| (self.intern(k), self.intern(v)))
            .collect();
        pairs.sort_by_key(|(k, _)| *k);

        let key_ids: Vec<u32> = pairs.iter().map(|(k, _)| *k).collect();
        let value_ids: Vec<u32> = pairs.iter().map(|(_, v)| *v).collect();

        let idx = *self
            .group_index
            .entry(key_ids.clone())
            .or_insert_with(|| {
                self.groups.push(GroupBuilder {
                    key_ids: key_ids.clone(),
                    series_ids: Vec::new(),
                    offsets: Vec::new(),
                    values_stream: Vec::new(),
                });
                self.groups.len() - 1
            });

        let group = &mut self.groups[idx];
        group.offsets.push(group.values_stream.len() as u32);
        group.series_ids.push(series_id);
        for vid in value_ids {
            write_uvarint(vid as u64, &mut group.values_stream);
        }

        self.last_series_id = Some(series_id);
        Ok(())
    }

    /// Serializes the accumulated dictionary and groups into the on-disk
    /// tag-mapping block format.
    pub fn build(&self) -> Result<Vec<u8>, TagIndexError> {
        let mut out = Vec::new();

        let mut dict_blob = Vec::new();
        for s in &self.dict {
            let bytes = s.as_bytes();
            write_uvarint(bytes.len() as u64, &mut dict_blob);
            dict_blob.extend_from_slice(bytes);
        }
        write_uvarint(dict_blob.len() as u64, &mut out);
        out.extend_from_slice(&dict_blob);

        write_uvarint(self.groups.len() as u64, &mut out);
        for group in &self.groups {
            write_uvarint(group.key_ids.len() as u64, &mut out);
            for key_id in &group.key_ids {
                write_uvarint(*key_id as u64, &mut out);
            }

            let block = serialize_tag_block(group)?;
            write_uvarint(block.len() as u64, &mut out);
            out.extend_from_slice(&block);
        }

        Ok(out)
    }
}

/// `[uvarint bmpLen][bmpLen bytes: roaring bitmap]
///  [uvarint offLen][offLen bytes: IntPacking of per-entry offsets]
///  [remainder: concatenated per-entry tag-value-id streams]`
fn serialize_tag_block(group: &GroupBuilder) -> Result<Vec<u8>, TagIndexError> {
    let bitmap: RoaringBitmap = group.series_ids.iter().copied().collect();
    let mut bmp_bytes = Vec::new();
    bitmap
        .serialize_into(&mut bmp_bytes)
        .map_err(|_| TagIndexError::Corrupt("failed to serialize roaring bitmap"))?;

    let off_bytes = int_packing::encode(&group.offsets)?;

    let mut out = Vec::new();
    write_uvarint(bmp_bytes.len() as u64, &mut out);
    out.extend_from_slice(&bmp_bytes);
    write_uvarint(off_bytes.len() as u64, &mut out);
    out.extend_from_slice(&off_bytes);
    out.extend_from_slice(&group.values_stream);

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tagindex::reader::TagsMappingReader;

    #[test]
    fn round_trips_spec_scenario() {
        // spec.md §8: 4 hosts x 20 disks x 100 partitions, series-ids 1..8000.
        let mut b = TagsMappingBuilder::new();
        let mut series_id = 1u32;
        let mut expected = Vec::new();
        for h in 0..4 {
            for d in 0..20 {
                for p in 0..100 {
                    let host = format!("host-{h}");
                    let disk = format!("disk-{d}");
                    let partition = format!("partition-{p}");
                    b.add(
                        series_id,
                        &["host", "disk", "partition"],
                        &[host.as_str(), disk.as_str(), partition.as_str()],
                    )
                    .unwrap();
                    expected.push((series_id, host, disk, partition));
                    series_id += 1;
                }
            }
        }

        let bytes = b.build().unwrap();
        let reader = TagsMappingReader::new(&bytes).unwrap();

        let (id0, host0, disk0, part0) = &expected[0];
        let tags0 = reader.get_tags(*id0).unwrap();
        assert_eq!(tags0.get("host").unwrap(), host0);
        assert_eq!(tags0.get("disk").unwrap(), disk0);
        assert_eq!(tags0.get("partition").unwrap(), part0);

        let (idn, hostn, diskn, partn) = expected.last().unwrap();
        let tagsn = reader.get_tags(*idn).unwrap();
        assert_eq!(tagsn.get("host").unwrap(), hostn);
        assert_eq!(tagsn.get("disk").unwrap(), diskn);
        assert_eq!(tagsn.get("partition").unwrap(), partn);
    }

    #[test]
    fn rejects_non_increasing_series_ids() {
        let mut b = TagsMappingBuilder::new();
        b.add(5, &["a"], &["1"]).unwrap();
        assert_eq!(
            b.add(5, &["a"], &["2"]).unwrap_err(),
            TagIndexError::DuplicateSeries
        );
        assert_eq!(
            b.add(3, &["a"], &["3"]).unwrap_err(),
            TagIndexError::DuplicateSeries
        );
    }

    #[test]
    fn unknown_series_id_is_not_found() {
        let mut b = TagsMappingBuilder::new();
        b.add(1, &["a"], &["x"]).unwrap();
        let bytes = b.build().unwrap();
        let reader = TagsMappingReader::new(&bytes).unwrap();
        assert_eq!(reader.get_tags(2).unwrap_err(), TagIndexError::NotFound);
    }
}
