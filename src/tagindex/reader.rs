//! Tag-mapping block reader.

use std::collections::HashMap;

use roaring::RoaringBitmap;

use crate::codec::int_packing::IntPackingDecoder;
use crate::codec::varint::read_uvarint;
use crate::tagindex::TagIndexError;

struct GroupView<'a> {
    keys: Vec<String>,
    bitmap: RoaringBitmap,
    offsets_bytes: &'a [u8],
    values_bytes: &'a [u8],
}

/// Reads a tag-mapping block produced by
/// [`crate::tagindex::TagsMappingBuilder`].
pub struct TagsMappingReader<'a> {
    dict: Vec<String>,
    groups: Vec<GroupView<'a>>,
}

impl<'a> TagsMappingReader<'a> {
    /// Parses `buf` into a reader.
    pub fn new(buf: &'a [u8]) -> Result<Self, TagIndexError> {
        let mut off = 0;

        let (dic_len, n) = read_uvarint(&buf[off..]).ok_or(TagIndexError::Truncated)?;
        off += n;
        let dic_len = dic_len as usize;
        let dict_blob = buf.get(off..off + dic_len).ok_or(TagIndexError::Truncated)?;
        off += dic_len;

        let mut dict = Vec::new();
        let mut dict_off = 0;
        while dict_off < dict_blob.len() {
            let (len, n) = read_uvarint(&dict_blob[dict_off..]).ok_or(TagIndexError::Truncated)?;
            dict_off += n;
            let len = len as usize;
            let s = dict_blob
                .get(dict_off..dict_off + len)
                .ok_or(TagIndexError::Truncated)?;
            dict.push(
                String::from_utf8(s.to_vec())
                    .map_err(|_| TagIndexError::Corrupt("dictionary entry is not UTF-8"))?,
            );
            dict_off += len;
        }

        let (group_count, n) = read_uvarint(&buf[off..]).ok_or(TagIndexError::Truncated)?;
        off += n;

        let mut groups = Vec::with_capacity(group_count as usize);
        for _ in 0..group_count {
            let (key_count, n) = read_uvarint(&buf[off..]).ok_or(TagIndexError::Truncated)?;
            off += n;

            let mut keys = Vec::with_capacity(key_count as usize);
            for _ in 0..key_count {
                let (key_id, n) = read_uvarint(&buf[off..]).ok_or(TagIndexError::Truncated)?;
                off += n;
                let key = dict
                    .get(key_id as usize)
                    .ok_or(TagIndexError::Corrupt("key id out of dictionary range"))?
                    .clone();
                keys.push(key);
            }

            let (block_len, n) = read_uvarint(&buf[off..]).ok_or(TagIndexError::Truncated)?;
            off += n;
            let block_len = block_len as usize;
            let block = buf.get(off..off + block_len).ok_or(TagIndexError::Truncated)?;
            off += block_len;

            groups.push(parse_tag_block(keys, block)?);
        }

        Ok(Self { dict, groups })
    }

    /// Resolves `series_id`'s tag tuple, if recorded in this block.
    pub fn get_tags(&self, series_id: u32) -> Result<HashMap<String, String>, TagIndexError> {
        for group in &self.groups {
            if !group.bitmap.contains(series_id) {
                continue;
            }
            let rank = group.bitmap.rank(series_id);
            let idx = (rank - 1) as usize;

            let decoder = IntPackingDecoder::new(group.offsets_bytes)?;
            let offset = decoder.get(idx)? as usize;

            let mut values = Vec::with_capacity(group.keys.len());
            let mut pos = offset;
            for _ in 0..group.keys.len() {
                let (value_id, n) =
                    read_uvarint(&group.values_bytes[pos..]).ok_or(TagIndexError::Truncated)?;
                pos += n;
                let value = self
                    .dict
                    .get(value_id as usize)
                    .ok_or(TagIndexError::Corrupt("value id out of dictionary range"))?
                    .clone();
                values.push(value);
            }

            return Ok(group
                .keys
                .iter()
                .cloned()
                .zip(values)
                .collect::<HashMap<_, _>>());
        }

        Err(TagIndexError::NotFound)
    }
}

fn parse_tag_block<'a>(keys: Vec<String>, block: &'a [u8]) -> Result<GroupView<'a>, TagIndexError> {
    let mut off = 0;

    let (bmp_len, n) = read_uvarint(&block[off..]).ok_or(TagIndexError::Truncated)?;
    off += n;
    let bmp_len = bmp_len as usize;
    let bmp_bytes = block.get(off..off + bmp_len).ok_or(TagIndexError::Truncated)?;
    off += bmp_len;
    let bitmap = RoaringBitmap::deserialize_from(bmp_bytes)
        .map_err(|_| TagIndexError::Corrupt("failed to deserialize roaring bitmap"))?;

    let (off_len, n) = read_uvarint(&block[off..]).ok_or(TagIndexError::Truncated)?;
    off += n;
    let off_len = off_len as usize;
    let offsets_bytes = block.get(off..off + off_len).ok_or(TagIndexError::Truncated)?;
    off += off_len;

    let values_bytes = block.get(off..).ok_or(TagIndexError::Truncated)?;

    if bitmap.len() != IntPackingDecoder::new(offsets_bytes)?.len() as u64 {
        return Err(TagIndexError::Corrupt(
            "bitmap cardinality does not match IntPacking size",
        ));
    }

    Ok(GroupView {
        keys,
        bitmap,
        offsets_bytes,
        values_bytes,
    })
}
