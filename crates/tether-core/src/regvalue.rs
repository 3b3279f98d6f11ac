//! # Register Values
//!
//! [`RegValue`] holds the value of a machine register of any bit width.
//! Values up to the native word size live inline; wider values (vector
//! registers, x87 stack slots) are kept in an owned [`DataBuf`].
//!
//! ## Byte order
//!
//! Register contents are always exchanged as **little-endian** byte
//! sequences, whatever the host's own byte order. On little-endian hosts this
//! is the same as host order.
//!
//! ## Invariants
//!
//! - Bits at positions `>= bit_size()` are always zero. A width that isn't a
//!   multiple of 8 is stored in `ceil(bits / 8)` bytes with the unused high
//!   bits of the last byte cleared.
//! - Which representation is active is invisible to callers: every accessor
//!   gives the same answer for the same width and bytes.
//!
//! ## Example
//!
//! ```rust
//! use tether_core::regvalue::RegValue;
//!
//! let xmm0 = RegValue::from_u128_parts(0x1122_3344_5566_7788, 0x99aa_bbcc_ddee_ff00, 128);
//! assert_eq!(xmm0.indexed_word::<u64>(1), 0x99aa_bbcc_ddee_ff00);
//!
//! let al = RegValue::from_u64(0x1234, 8);
//! assert_eq!(al.value_as::<u64>(), 0x34);
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::data::DataBuf;

/// Integer types that can be read out of a [`RegValue`]
///
/// Implemented for all primitive integers.
pub trait RegisterWord: Copy
{
    /// Size of the word in bytes
    const BYTES: usize;

    /// Build a word from up to `BYTES` little-endian bytes, zero-padding the
    /// missing high bytes.
    fn from_le_prefix(bytes: &[u8]) -> Self;
}

macro_rules! impl_register_word {
    ($($t:ty),* $(,)?) => {
        $(
            impl RegisterWord for $t
            {
                const BYTES: usize = std::mem::size_of::<$t>();

                fn from_le_prefix(bytes: &[u8]) -> Self
                {
                    let mut raw = [0u8; std::mem::size_of::<$t>()];
                    let n = bytes.len().min(raw.len());
                    raw[..n].copy_from_slice(&bytes[..n]);
                    <$t>::from_le_bytes(raw)
                }
            }
        )*
    };
}

impl_register_word!(u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize);

/// Widest value accepted when decoding a [`RegValue`].
///
/// This is far above any real register (an AMX tile is 8192 bits) and keeps
/// a peer from forcing a huge allocation with a tiny message.
pub const MAX_DECODED_BITS: u32 = 1 << 16;

const WORD_BITS: u32 = usize::BITS;
const WORD_BYTES: usize = std::mem::size_of::<usize>();

#[derive(Clone)]
enum Repr
{
    Inline(usize),
    Heap(DataBuf),
}

/// Variable-width register value
#[derive(Clone)]
pub struct RegValue
{
    bits: u32,
    repr: Repr,
}

impl RegValue
{
    /// A zero-width register whose value is zero.
    #[must_use]
    pub const fn new() -> Self
    {
        RegValue {
            bits: 0,
            repr: Repr::Inline(0),
        }
    }

    /// A native address-sized value.
    #[must_use]
    pub const fn from_address(value: usize) -> Self
    {
        RegValue {
            bits: WORD_BITS,
            repr: Repr::Inline(value),
        }
    }

    /// A `bits`-wide value taken from `value`.
    ///
    /// Narrower widths keep only the low bits. Wider widths are zero
    /// extended. A width of zero gives the zero-width value.
    #[must_use]
    pub fn from_u64(value: u64, bits: u32) -> Self
    {
        RegValue::with_width(&value.to_le_bytes(), bits)
    }

    /// A 128-bit style value made of a low and a high quad word.
    #[must_use]
    pub fn from_u128_parts(lo: u64, hi: u64, bits: u32) -> Self
    {
        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&lo.to_le_bytes());
        bytes[8..].copy_from_slice(&hi.to_le_bytes());
        RegValue::with_width(&bytes, bits)
    }

    /// A 256-bit style value made of four quad words, least significant
    /// first.
    #[must_use]
    pub fn from_words(words: &[u64; 4], bits: u32) -> Self
    {
        let mut bytes = [0u8; 32];
        for (chunk, word) in bytes.chunks_exact_mut(8).zip(words) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        RegValue::with_width(&bytes, bits)
    }

    /// A value read from the bytes of `data`.
    ///
    /// A `bits` of zero means "use the whole buffer", i.e. `data.len() * 8`.
    #[must_use]
    pub fn from_data(data: &DataBuf, bits: u32) -> Self
    {
        RegValue::from_bytes(data.as_slice(), bits)
    }

    /// A value read from little-endian `bytes`.
    ///
    /// A `bits` of zero means `bytes.len() * 8`. If `bytes` is shorter than
    /// the width the value is zero extended; if longer, the extra bytes and
    /// bits are ignored.
    #[must_use]
    pub fn from_bytes(bytes: &[u8], bits: u32) -> Self
    {
        let mut value = RegValue::new();
        value.assign_bytes(bytes, bits);
        value
    }

    /// Re-set this value from `bytes`, as [`RegValue::from_bytes`] does.
    pub fn assign_bytes(&mut self, bytes: &[u8], bits: u32)
    {
        let bits = if bits == 0 {
            u32::try_from(bytes.len().saturating_mul(8)).unwrap_or(u32::MAX)
        } else {
            bits
        };
        self.store(bytes, bits);
    }

    /// Re-set this value from `value`, as [`RegValue::from_u64`] does.
    pub fn assign_u64(&mut self, value: u64, bits: u32)
    {
        self.store(&value.to_le_bytes(), bits);
    }

    /// Change the width, truncating or zero-extending the value.
    pub fn resize(&mut self, bits: u32)
    {
        if bits == self.bits {
            return;
        }
        let bytes = self.to_bytes();
        self.store(&bytes, bits);
    }

    /// Width of the register in bits.
    #[must_use]
    pub const fn bit_size(&self) -> u32
    {
        self.bits
    }

    /// Number of bytes needed to hold the value, `ceil(bits / 8)`.
    #[must_use]
    pub const fn byte_size(&self) -> usize
    {
        self.bits.div_ceil(8) as usize
    }

    /// Replace `out` with the value's bytes.
    ///
    /// Wide values share their storage with `out` rather than copying it.
    pub fn copy_to_data(&self, out: &mut DataBuf)
    {
        *out = self.to_data();
    }

    /// The value's bytes as a buffer.
    #[must_use]
    pub fn to_data(&self) -> DataBuf
    {
        match &self.repr {
            Repr::Heap(data) => data.clone(),
            Repr::Inline(_) => DataBuf::from_vec(self.to_bytes()),
        }
    }

    /// Write the value's bytes into the start of `out`.
    ///
    /// Copies `min(out.len(), byte_size())` bytes and returns how many were
    /// written.
    pub fn copy_to_buffer(&self, out: &mut [u8]) -> usize
    {
        let n = out.len().min(self.byte_size());
        match &self.repr {
            Repr::Inline(v) => out[..n].copy_from_slice(&v.to_le_bytes()[..n]),
            Repr::Heap(data) => out[..n].copy_from_slice(&data.as_slice()[..n]),
        }
        n
    }

    /// The value's bytes as a `Vec`, `byte_size()` long.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8>
    {
        let mut out = vec![0; self.byte_size()];
        self.copy_to_buffer(&mut out);
        out
    }

    /// The low `size_of::<T>() * 8` bits of the value as a `T`.
    #[must_use]
    pub fn value_as<T: RegisterWord>(&self) -> T
    {
        self.indexed_word(0)
    }

    /// The `index`-th `T`-sized word of the value, least significant first.
    ///
    /// A word that lies entirely past the end of the register is zero. A word
    /// that straddles the end is zero-padded in its missing high bytes.
    ///
    /// ## Example
    ///
    /// ```rust
    /// use tether_core::regvalue::RegValue;
    ///
    /// let v = RegValue::from_bytes(&[0x11, 0x22, 0x33], 0);
    /// assert_eq!(v.indexed_word::<u16>(0), 0x2211);
    /// assert_eq!(v.indexed_word::<u16>(1), 0x0033);
    /// assert_eq!(v.indexed_word::<u16>(2), 0);
    /// ```
    #[must_use]
    pub fn indexed_word<T: RegisterWord>(&self, index: usize) -> T
    {
        let byte_size = self.byte_size();
        let offset = index.saturating_mul(T::BYTES);
        if offset >= byte_size {
            return T::from_le_prefix(&[]);
        }
        let end = offset.saturating_add(T::BYTES).min(byte_size);
        match &self.repr {
            Repr::Inline(v) => T::from_le_prefix(&v.to_le_bytes()[offset..end]),
            Repr::Heap(data) => T::from_le_prefix(&data.as_slice()[offset..end]),
        }
    }

    fn with_width(bytes: &[u8], bits: u32) -> Self
    {
        let mut value = RegValue::new();
        value.store(bytes, bits);
        value
    }

    // Every mutation funnels through here so the width invariants hold.
    // A zero width always yields the zero-width value.
    fn store(&mut self, bytes: &[u8], bits: u32)
    {
        if bits == 0 {
            *self = RegValue::new();
            return;
        }

        let byte_size = bits.div_ceil(8) as usize;
        let mut buf = vec![0u8; byte_size.max(WORD_BYTES)];
        let n = bytes.len().min(byte_size);
        buf[..n].copy_from_slice(&bytes[..n]);
        let spare = bits % 8;
        if spare != 0 {
            buf[byte_size - 1] &= (1u8 << spare) - 1;
        }

        self.bits = bits;
        self.repr = if bits <= WORD_BITS {
            Repr::Inline(usize::from_le_prefix(&buf))
        } else {
            buf.truncate(byte_size);
            Repr::Heap(DataBuf::from_vec(buf))
        };
    }
}

impl Default for RegValue
{
    fn default() -> Self
    {
        RegValue::new()
    }
}

impl PartialEq for RegValue
{
    fn eq(&self, other: &Self) -> bool
    {
        self.bits == other.bits && self.to_bytes() == other.to_bytes()
    }
}

impl Eq for RegValue {}

impl From<u64> for RegValue
{
    fn from(value: u64) -> Self
    {
        RegValue::from_u64(value, 64)
    }
}

impl fmt::Debug for RegValue
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("RegValue")
            .field("bits", &self.bits)
            .field("value", &format_args!("{self}"))
            .finish()
    }
}

/// Formats the value as a most-significant-first hex number.
impl fmt::Display for RegValue
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.write_str("0x")?;
        let bytes = self.to_bytes();
        if bytes.is_empty() {
            return f.write_str("0");
        }
        for b in bytes.iter().rev() {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct RegValueWire
{
    bits: u32,
    bytes: DataBuf,
}

impl Serialize for RegValue
{
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error>
    {
        RegValueWire {
            bits: self.bits,
            bytes: self.to_data(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for RegValue
{
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error>
    {
        let wire = RegValueWire::deserialize(deserializer)?;
        if wire.bits > MAX_DECODED_BITS {
            return Err(serde::de::Error::custom(format_args!(
                "register width {} exceeds {MAX_DECODED_BITS} bits",
                wire.bits
            )));
        }
        if wire.bits == 0 {
            return Ok(RegValue::new());
        }
        Ok(RegValue::from_data(&wire.bytes, wire.bits))
    }
}
