use super::*;

#[test]
fn round_trips_single_field() {
    let mut w = BitWriter::new();
    w.write_bits(0b1011, 4).unwrap();
    let buf = w.finish();
    let mut r = BitReader::new(&buf);
    assert_eq!(r.read_bits(4).unwrap(), 0b1011);
}

#[test]
fn round_trips_across_byte_boundaries() {
    let mut w = BitWriter::new();
    // 3 + 5 + 9 + 7 = 24 bits, none aligned to a byte boundary individually.
    w.write_bits(0b101, 3).unwrap();
    w.write_bits(0b11010, 5).unwrap();
    w.write_bits(0b1_1111_0000, 9).unwrap();
    w.write_bits(0b0101010, 7).unwrap();
    let buf = w.finish();
    assert_eq!(buf.len(), 3);

    let mut r = BitReader::new(&buf);
    assert_eq!(r.read_bits(3).unwrap(), 0b101);
    assert_eq!(r.read_bits(5).unwrap(), 0b11010);
    assert_eq!(r.read_bits(9).unwrap(), 0b1_1111_0000);
    assert_eq!(r.read_bits(7).unwrap(), 0b0101010);
}

#[test]
fn full_width_64_bits() {
    let mut w = BitWriter::new();
    w.write_bits(u64::MAX, 64).unwrap();
    let buf = w.finish();
    assert_eq!(buf.len(), 8);
    let mut r = BitReader::new(&buf);
    assert_eq!(r.read_bits(64).unwrap(), u64::MAX);
}

#[test]
fn finish_pads_partial_byte_with_zero_bits() {
    let mut w = BitWriter::new();
    w.write_bits(0b1, 1).unwrap();
    let buf = w.finish();
    assert_eq!(buf, vec![0b1000_0000]);
}

#[test]
fn rejects_invalid_width() {
    let mut w = BitWriter::new();
    assert_eq!(
        w.write_bits(0, 0).unwrap_err(),
        BitStreamError::InvalidWidth(0)
    );
    assert_eq!(
        w.write_bits(0, 65).unwrap_err(),
        BitStreamError::InvalidWidth(65)
    );

    let mut r = BitReader::new(&[0u8]);
    assert_eq!(
        r.read_bits(0).unwrap_err(),
        BitStreamError::InvalidWidth(0)
    );
}

#[test]
fn truncated_read_past_end_of_buffer() {
    let mut r = BitReader::new(&[0xFF]);
    assert_eq!(r.read_bits(4).unwrap(), 0b1111);
    let err = r.read_bits(5).unwrap_err();
    assert_eq!(err, BitStreamError::Truncated { width: 5 });
}

#[test]
fn many_small_fields_sequence() {
    let values: Vec<u64> = (0..100).map(|i| i % 8).collect();
    let mut w = BitWriter::new();
    for v in &values {
        w.write_bits(*v, 3).unwrap();
    }
    let buf = w.finish();
    let mut r = BitReader::new(&buf);
    for v in &values {
        assert_eq!(r.read_bits(3).unwrap(), *v);
    }
}
