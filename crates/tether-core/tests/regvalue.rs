//! Tests for variable-width register values

use tether_core::data::DataBuf;
use tether_core::regvalue::{RegValue, MAX_DECODED_BITS};

const WIDTHS: [u32; 13] = [1, 7, 8, 9, 31, 32, 63, 64, 65, 127, 128, 255, 256];

fn expected_masked(bits: u32) -> Vec<u8>
{
    let len = bits.div_ceil(8) as usize;
    let mut out = vec![0xff; len];
    let spare = bits % 8;
    if spare != 0 {
        out[len - 1] = (1u8 << spare) - 1;
    }
    out
}

#[test]
fn test_all_ones_buffer_masks_trailing_bits()
{
    for bits in WIDTHS {
        let len = bits.div_ceil(8) as usize;
        let src = DataBuf::from_vec(vec![0xff; len]);
        let value = RegValue::from_data(&src, bits);

        let mut out = vec![0xaa; len];
        let copied = value.copy_to_buffer(&mut out);
        assert_eq!(copied, len, "bits={bits}");
        assert_eq!(out, expected_masked(bits), "bits={bits}");
        assert_eq!(value.bit_size(), bits);
    }
}

#[test]
fn test_larger_source_buffer_is_masked()
{
    let src = DataBuf::from_vec(vec![0xff; 40]);
    for bits in WIDTHS {
        let value = RegValue::from_data(&src, bits);
        assert_eq!(value.to_bytes(), expected_masked(bits), "bits={bits}");
    }
}

#[test]
fn test_resize_is_idempotent()
{
    let x = RegValue::from_words(&[u64::MAX, 0x1234_5678_9abc_def0, u64::MAX, 7], 256);
    for bits in WIDTHS {
        let mut once = x.clone();
        once.resize(bits);
        let mut twice = once.clone();
        twice.resize(bits);
        assert_eq!(once, twice, "bits={bits}");
    }
}

#[test]
fn test_resize_truncates_and_zero_extends()
{
    let mut v = RegValue::from_u64(0xffff_ffff_ffff_ffff, 64);
    v.resize(12);
    assert_eq!(v.value_as::<u64>(), 0x0fff);
    v.resize(128);
    assert_eq!(v.bit_size(), 128);
    assert_eq!(v.indexed_word::<u64>(0), 0x0fff);
    assert_eq!(v.indexed_word::<u64>(1), 0);
    v.resize(64);
    assert_eq!(v.value_as::<u64>(), 0x0fff);
}

#[test]
fn test_from_u64_masks_narrow_widths()
{
    assert_eq!(RegValue::from_u64(0x1ff, 8).value_as::<u32>(), 0xff);
    assert_eq!(RegValue::from_u64(0xff, 1).value_as::<u32>(), 1);
    assert_eq!(RegValue::from_u64(0xdead_beef, 16).value_as::<u64>(), 0xbeef);
}

#[test]
fn test_from_u64_zero_extends_wide_widths()
{
    let v = RegValue::from_u64(0x1122_3344_5566_7788, 80);
    assert_eq!(v.byte_size(), 10);
    assert_eq!(v.indexed_word::<u64>(0), 0x1122_3344_5566_7788);
    assert_eq!(v.indexed_word::<u16>(4), 0);
}

#[test]
fn test_value_as_truncates_to_type()
{
    let v = RegValue::from_u128_parts(0x1122_3344_5566_7788, 0x99aa_bbcc_ddee_ff00, 128);
    assert_eq!(v.value_as::<u8>(), 0x88);
    assert_eq!(v.value_as::<u32>(), 0x5566_7788);
    assert_eq!(v.value_as::<u128>(), 0x99aa_bbcc_ddee_ff00_1122_3344_5566_7788);
}

#[test]
fn test_indexed_word_partial_and_out_of_range()
{
    let v = RegValue::from_bytes(&[1, 2, 3, 4, 5], 0);
    assert_eq!(v.bit_size(), 40);
    assert_eq!(v.indexed_word::<u32>(0), 0x0403_0201);
    assert_eq!(v.indexed_word::<u32>(1), 0x05);
    assert_eq!(v.indexed_word::<u32>(2), 0);
    assert_eq!(v.indexed_word::<u32>(usize::MAX), 0);
}

#[test]
fn test_from_words_ymm()
{
    let v = RegValue::from_words(&[1, 2, 3, 4], 256);
    for i in 0..4 {
        assert_eq!(v.indexed_word::<u64>(i), i as u64 + 1);
    }
    assert_eq!(v.indexed_word::<u128>(1), (4u128 << 64) | 3);
}

#[test]
fn test_zero_width_from_empty_buffer()
{
    let v = RegValue::from_data(&DataBuf::new(), 0);
    assert_eq!(v.bit_size(), 0);
    assert_eq!(v.byte_size(), 0);
    assert_eq!(v.value_as::<u64>(), 0);
    assert!(v.to_bytes().is_empty());
    assert_eq!(v, RegValue::new());
}

#[test]
fn test_zero_width_from_integers()
{
    assert_eq!(RegValue::from_u64(0x1234, 0), RegValue::new());
    assert_eq!(RegValue::from_u128_parts(1, 2, 0).bit_size(), 0);

    let mut v = RegValue::from_u64(7, 32);
    v.assign_u64(0x55, 0);
    assert_eq!(v.bit_size(), 0);
    assert_eq!(v.value_as::<u64>(), 0);

    let mut r = RegValue::from_u64(7, 32);
    r.resize(0);
    assert_eq!(r, RegValue::new());
}

#[test]
fn test_address_sized_value()
{
    let v = RegValue::from_address(0x7fff_0000);
    assert_eq!(v.bit_size(), usize::BITS);
    assert_eq!(v.value_as::<usize>(), 0x7fff_0000);
}

#[test]
fn test_copy_to_buffer_bounded_by_output()
{
    let v = RegValue::from_u64(0x0102_0304, 32);
    let mut small = [0u8; 2];
    assert_eq!(v.copy_to_buffer(&mut small), 2);
    assert_eq!(small, [0x04, 0x03]);
}

#[test]
fn test_wide_copy_to_data_shares_storage()
{
    let v = RegValue::from_words(&[1, 2, 3, 4], 256);
    let mut out = DataBuf::new();
    v.copy_to_data(&mut out);
    assert_eq!(out.len(), 32);
    assert!(out.is_shared());

    // Writing to the copy leaves the register untouched.
    out.writable()[0] = 0xff;
    assert_eq!(v.value_as::<u8>(), 1);
}

#[test]
fn test_equality_ignores_representation()
{
    let mut wide = RegValue::from_u64(5, 128);
    wide.resize(32);
    assert_eq!(wide, RegValue::from_u64(5, 32));
}

#[test]
fn test_serde_round_trip()
{
    let v = RegValue::from_u64(0x1ff, 9);
    let json = serde_json::to_string(&v).unwrap();
    assert_eq!(json, r#"{"bits":9,"bytes":"ff01"}"#);
    let back: RegValue = serde_json::from_str(&json).unwrap();
    assert_eq!(back, v);
}

#[test]
fn test_decode_rejects_oversized_width()
{
    let huge = r#"{"bits":4294967295,"bytes":""}"#;
    assert!(serde_json::from_str::<RegValue>(huge).is_err());

    let limit = format!(r#"{{"bits":{MAX_DECODED_BITS},"bytes":"01"}}"#);
    let v: RegValue = serde_json::from_str(&limit).unwrap();
    assert_eq!(v.bit_size(), MAX_DECODED_BITS);
    assert_eq!(v.value_as::<u8>(), 1);
}

#[test]
fn test_display_is_msb_first()
{
    assert_eq!(RegValue::from_u64(0xbeef, 16).to_string(), "0xbeef");
    assert_eq!(RegValue::new().to_string(), "0x0");
}
