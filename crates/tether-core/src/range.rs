//! # Address Ranges
//!
//! [`AddrRange`] is a half-open interval `[base, base + size)` over any
//! address-like type. All arithmetic wraps modulo the width of the address
//! type, so a range may end exactly at the top of the address space and
//! containment never mistakes an address below `base` for one inside the
//! range.
//!
//! ## Example
//!
//! ```rust
//! use tether_core::range::AddrRange;
//!
//! let mut r = AddrRange::new(0x1003u64, 0x10);
//! assert!(r.contains(0x1003));
//! assert!(r.contains(0x1012));
//! assert!(!r.contains(0x1013));
//! assert!(!r.contains(0x1002));
//!
//! r.align_endpoints(0x10);
//! assert_eq!(r.base(), 0x1000);
//! assert_eq!(r.end(), 0x1020);
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::address::Address;

/// Address types an [`AddrRange`] can be built over
pub trait RangeAddress: Copy + Eq + fmt::Debug
{
    /// Width of the address space in bits
    const BITS: u32;

    /// The address as a raw integer
    fn to_raw(self) -> u64;

    /// An address from a raw integer, truncated to `BITS`
    fn from_raw(raw: u64) -> Self;

    /// Mask selecting the valid bits of a raw address
    #[must_use]
    fn mask() -> u64
    {
        if Self::BITS >= 64 {
            u64::MAX
        } else {
            (1u64 << Self::BITS) - 1
        }
    }
}

impl RangeAddress for u64
{
    const BITS: u32 = 64;

    fn to_raw(self) -> u64
    {
        self
    }

    fn from_raw(raw: u64) -> Self
    {
        raw
    }
}

impl RangeAddress for u32
{
    const BITS: u32 = 32;

    fn to_raw(self) -> u64
    {
        u64::from(self)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn from_raw(raw: u64) -> Self
    {
        raw as u32
    }
}

impl RangeAddress for usize
{
    const BITS: u32 = usize::BITS;

    fn to_raw(self) -> u64
    {
        self as u64
    }

    #[allow(clippy::cast_possible_truncation)]
    fn from_raw(raw: u64) -> Self
    {
        raw as usize
    }
}

impl RangeAddress for Address
{
    const BITS: u32 = 64;

    fn to_raw(self) -> u64
    {
        self.value()
    }

    fn from_raw(raw: u64) -> Self
    {
        Address::new(raw)
    }
}

/// Contiguous address interval `[base, base + size)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AddrRange<A>
{
    base: A,
    size: u64,
}

/// A range over the widest address type.
pub type AnyRange = AddrRange<u64>;

/// The widest address type.
pub type AnyAddr = u64;

impl<A: RangeAddress> AddrRange<A>
{
    /// Create a range of `size` bytes starting at `base`.
    #[must_use]
    pub fn new(base: A, size: u64) -> Self
    {
        AddrRange {
            base,
            size: size & A::mask(),
        }
    }

    /// Create the range `[base, end)`.
    ///
    /// The size is `end - base` in wrapping arithmetic.
    #[must_use]
    pub fn from_bounds(base: A, end: A) -> Self
    {
        AddrRange::new(base, end.to_raw().wrapping_sub(base.to_raw()))
    }

    /// First address in the range.
    #[must_use]
    pub fn base(&self) -> A
    {
        self.base
    }

    /// Number of bytes in the range.
    #[must_use]
    pub fn size(&self) -> u64
    {
        self.size
    }

    /// One past the last address, `base + size` (wrapping).
    #[must_use]
    pub fn end(&self) -> A
    {
        A::from_raw(self.base.to_raw().wrapping_add(self.size) & A::mask())
    }

    /// Whether the range holds no addresses.
    #[must_use]
    pub fn is_empty(&self) -> bool
    {
        self.size == 0
    }

    /// Whether `addr` lies in the range.
    ///
    /// True iff `addr - base < size` in the address type's wrapping
    /// arithmetic.
    #[must_use]
    pub fn contains(&self, addr: A) -> bool
    {
        (addr.to_raw().wrapping_sub(self.base.to_raw()) & A::mask()) < self.size
    }

    /// Whether every address of `other` lies in this range.
    #[must_use]
    pub fn contains_range(&self, other: &AddrRange<A>) -> bool
    {
        if other.is_empty() {
            return self.contains(other.base) || other.base == self.end();
        }
        let offset = other.base.to_raw().wrapping_sub(self.base.to_raw()) & A::mask();
        offset < self.size && other.size <= self.size - offset
    }

    /// Whether the two ranges share at least one address.
    #[must_use]
    pub fn overlaps(&self, other: &AddrRange<A>) -> bool
    {
        if self.is_empty() || other.is_empty() {
            return false;
        }
        self.contains(other.base) || other.contains(self.base)
    }

    /// Grow the range to the smallest super-interval whose base and end are
    /// both multiples of `alignment`.
    ///
    /// An alignment of 0 or 1 leaves the range unchanged.
    pub fn align_endpoints(&mut self, alignment: u64)
    {
        if alignment <= 1 {
            return;
        }
        let mask = A::mask();
        let base = self.base.to_raw();
        let end = base.wrapping_add(self.size) & mask;

        let new_base = base - base % alignment;
        let rem = end % alignment;
        let new_end = if rem == 0 { end } else { end.wrapping_add(alignment - rem) & mask };

        self.base = A::from_raw(new_base);
        self.size = new_end.wrapping_sub(new_base) & mask;
    }
}

impl<A: RangeAddress> fmt::Display for AddrRange<A>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "[0x{:x}, 0x{:x})", self.base.to_raw(), self.end().to_raw())
    }
}
