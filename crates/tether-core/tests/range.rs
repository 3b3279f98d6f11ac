//! Tests for address ranges and the address newtype

use tether_core::range::{AddrRange, AnyRange};
use tether_core::Address;

#[test]
fn test_contains_boundaries()
{
    let r = AnyRange::new(0x1000, 0x100);
    assert!(r.contains(0x1000));
    assert!(r.contains(0x10ff));
    assert!(!r.contains(0x1100));
    assert!(!r.contains(0x0fff));
    assert!(!r.contains(0));
    assert!(!r.contains(u64::MAX));
}

#[test]
fn test_empty_range_contains_nothing()
{
    let r = AnyRange::new(0x1000, 0);
    assert!(r.is_empty());
    assert!(!r.contains(0x1000));
}

#[test]
fn test_end_is_base_plus_size()
{
    let r = AnyRange::new(0x4000, 0x20);
    assert_eq!(r.end(), 0x4020);
    assert_eq!(AnyRange::from_bounds(0x4000, 0x4020), r);
}

#[test]
fn test_range_at_top_of_address_space()
{
    let r = AddrRange::new(u32::MAX - 0xf, 0x10);
    assert_eq!(r.end(), 0);
    assert!(r.contains(u32::MAX));
    assert!(r.contains(u32::MAX - 0xf));
    assert!(!r.contains(0));
    assert!(!r.contains(u32::MAX - 0x10));
}

#[test]
fn test_narrow_address_type_wraps_size()
{
    let r = AddrRange::new(0u32, 0x1_0000_0010);
    assert_eq!(r.size(), 0x10);
}

#[test]
fn test_align_endpoints()
{
    let mut r = AnyRange::new(0x1003, 0x10);
    r.align_endpoints(0x10);
    assert_eq!(r.base(), 0x1000);
    assert_eq!(r.end(), 0x1020);

    let mut aligned = AnyRange::new(0x2000, 0x1000);
    aligned.align_endpoints(0x1000);
    assert_eq!(aligned, AnyRange::new(0x2000, 0x1000));

    let mut unchanged = AnyRange::new(0x1003, 5);
    unchanged.align_endpoints(1);
    assert_eq!(unchanged, AnyRange::new(0x1003, 5));
    unchanged.align_endpoints(0);
    assert_eq!(unchanged, AnyRange::new(0x1003, 5));
}

#[test]
fn test_align_endpoints_non_power_of_two()
{
    let mut r = AnyRange::new(7, 5);
    r.align_endpoints(6);
    assert_eq!(r.base(), 6);
    assert_eq!(r.end(), 12);
}

#[test]
fn test_overlaps_and_contains_range()
{
    let a = AnyRange::new(0x100, 0x100);
    let b = AnyRange::new(0x180, 0x100);
    let c = AnyRange::new(0x200, 0x10);
    assert!(a.overlaps(&b));
    assert!(b.overlaps(&a));
    assert!(!a.overlaps(&c));
    assert!(a.contains_range(&AnyRange::new(0x110, 0x20)));
    assert!(a.contains_range(&AnyRange::new(0x100, 0x100)));
    assert!(!a.contains_range(&b));
}

#[test]
fn test_range_over_address_newtype()
{
    let r = AddrRange::new(Address::new(0x5000), 0x10);
    assert!(r.contains(Address::new(0x500f)));
    assert!(!r.contains(Address::new(0x5010)));
    assert_eq!(r.to_string(), "[0x5000, 0x5010)");
}

#[test]
fn test_address_parse_and_display()
{
    assert_eq!("0x1000".parse::<Address>().unwrap(), Address::new(0x1000));
    assert_eq!("4096".parse::<Address>().unwrap(), Address::new(0x1000));
    assert!("xyz".parse::<Address>().is_err());
    assert_eq!(Address::new(0x1000).to_string(), "0x0000000000001000");
}

#[test]
fn test_address_arithmetic()
{
    let addr = Address::from(0x1000);
    assert_eq!(addr + 0x10, Address::new(0x1010));
    assert_eq!(addr - 0x10, Address::new(0xff0));
    assert_eq!(addr.checked_sub(0x2000), None);
    assert_eq!(Address::new(0x1010).offset_from(addr), 0x10);
}
