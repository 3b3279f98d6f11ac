//! # Byte Buffers
//!
//! [`DataBuf`] is a cheaply cloneable view over a block of bytes. Clones and
//! slices share the same storage block; the block is only copied when one of
//! the views asks to write to it.
//!
//! ## Storage kinds
//!
//! - **Owned**: a heap block allocated by the buffer itself.
//! - **Lazy**: a block the buffer merely references (`&'static [u8]` or an
//!   `Arc<[u8]>` the caller keeps). Lazy storage is never written in place;
//!   the first write copies it into an owned block.
//!
//! ## Writing
//!
//! Mutable access goes through [`DataBuf::writable`], which returns a
//! [`WritableBuf`] guard. While the guard is alive it holds a unique borrow of
//! the buffer, so no other buffer can start sharing the block being written.
//! Dropping the guard (or calling [`WritableBuf::release`]) returns the buffer
//! to ordinary shared reference counting.
//!
//! ## Example
//!
//! ```rust
//! use tether_core::data::{DataBuf, Fill};
//!
//! let mut a = DataBuf::from_slice(b"hello world");
//! let b = a.slice_len(6, 5);
//! assert_eq!(b.as_slice(), b"world");
//!
//! // Writing to `a` never changes what `b` sees.
//! a.writable()[6] = b'W';
//! assert_eq!(a.as_slice(), b"hello World");
//! assert_eq!(b.as_slice(), b"world");
//!
//! let z = DataBuf::with_size(4, Fill::Zero);
//! assert_eq!(z.as_slice(), &[0, 0, 0, 0]);
//! ```

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::trace;

use crate::error::{CoreError, Result};

/// How newly allocated bytes are initialised
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Fill
{
    /// The caller makes no assumption about the contents
    #[default]
    Unspecified,
    /// New bytes are zero
    Zero,
}

/// Storage block shared between buffers
#[derive(Clone)]
enum Block
{
    /// Heap block owned by one or more `DataBuf`s
    Owned(Arc<Vec<u8>>),
    /// Borrowed static memory, copied before the first write
    Static(&'static [u8]),
    /// Memory owned by the caller, copied before the first write
    Shared(Arc<[u8]>),
}

impl Block
{
    fn bytes(&self) -> &[u8]
    {
        match self {
            Block::Owned(v) => v.as_slice(),
            Block::Static(s) => s,
            Block::Shared(s) => s,
        }
    }

    fn is_lazy(&self) -> bool
    {
        !matches!(self, Block::Owned(_))
    }
}

/// Copy-on-write byte buffer
///
/// A `DataBuf` is a `(block, start, len)` triple. The logical bytes are
/// `block[start..start + len]` and `start + len` never exceeds the block's
/// length. None of the operations fail: offsets and lengths that run past the
/// end are clamped.
///
/// Buffers are `Send + Sync`. Two buffers that share a block may be read
/// concurrently; writes always go to a private copy.
#[derive(Clone, Default)]
pub struct DataBuf
{
    block: Option<Block>,
    start: usize,
    len: usize,
}

impl DataBuf
{
    /// Create an empty buffer with no storage block.
    #[must_use]
    pub const fn new() -> Self
    {
        DataBuf {
            block: None,
            start: 0,
            len: 0,
        }
    }

    /// Allocate a new owned block of `size` bytes.
    ///
    /// The contents are always initialised (Rust has no uninitialised
    /// reads), but with [`Fill::Unspecified`] callers must not rely on them.
    #[must_use]
    pub fn with_size(size: usize, _fill: Fill) -> Self
    {
        if size == 0 {
            return DataBuf::new();
        }
        DataBuf::from_vec(vec![0; size])
    }

    /// Copy `bytes` into a new owned block.
    #[must_use]
    pub fn from_slice(bytes: &[u8]) -> Self
    {
        DataBuf::from_vec(bytes.to_vec())
    }

    /// Take ownership of `bytes` without copying.
    #[must_use]
    pub fn from_vec(bytes: Vec<u8>) -> Self
    {
        if bytes.is_empty() {
            return DataBuf::new();
        }
        let len = bytes.len();
        DataBuf {
            block: Some(Block::Owned(Arc::new(bytes))),
            start: 0,
            len,
        }
    }

    /// Decode a hex string such as `"deadbeef"` into an owned buffer.
    ///
    /// ## Errors
    ///
    /// Returns [`CoreError::InvalidHex`] if `text` has odd length or a
    /// non-hex digit.
    pub fn from_hex(text: &str) -> Result<Self>
    {
        hex::decode(text.trim())
            .map(DataBuf::from_vec)
            .map_err(|_| CoreError::InvalidHex(text.to_string()))
    }

    /// Reference static memory lazily. The bytes are copied only when the
    /// buffer is first written.
    #[must_use]
    pub fn from_static(bytes: &'static [u8]) -> Self
    {
        DataBuf::lazy(Block::Static(bytes), bytes.len())
    }

    /// Reference caller-owned memory lazily.
    ///
    /// The buffer never writes through `bytes`, so the caller may keep other
    /// handles to the same allocation.
    #[must_use]
    pub fn from_shared(bytes: Arc<[u8]>) -> Self
    {
        let len = bytes.len();
        DataBuf::lazy(Block::Shared(bytes), len)
    }

    fn lazy(block: Block, len: usize) -> Self
    {
        if len == 0 {
            return DataBuf::new();
        }
        DataBuf {
            block: Some(block),
            start: 0,
            len,
        }
    }

    /// View this buffer from `offset` to the end.
    ///
    /// The result shares storage with `self`. An offset at or past the end
    /// gives an empty buffer.
    #[must_use]
    pub fn slice(&self, offset: usize) -> Self
    {
        let mut out = self.clone();
        out.restrict(offset, usize::MAX);
        out
    }

    /// View at most `len` bytes of this buffer starting at `offset`.
    ///
    /// ## Example
    ///
    /// ```rust
    /// use tether_core::data::DataBuf;
    ///
    /// let a = DataBuf::from_slice(&[1, 2, 3, 4]);
    /// assert_eq!(a.slice_len(1, 2).as_slice(), &[2, 3]);
    /// assert_eq!(a.slice_len(3, 10).as_slice(), &[4]);
    /// assert!(a.slice_len(4, 1).is_empty());
    /// ```
    #[must_use]
    pub fn slice_len(&self, offset: usize, len: usize) -> Self
    {
        let mut out = self.clone();
        out.restrict(offset, len);
        out
    }

    /// Make this buffer a view of `other`'s bytes starting at `offset`.
    pub fn assign_slice(&mut self, other: &DataBuf, offset: usize, len: usize)
    {
        *self = other.slice_len(offset, len);
    }

    /// Replace the contents with an owned copy of `bytes`.
    pub fn assign_bytes(&mut self, bytes: &[u8])
    {
        *self = DataBuf::from_slice(bytes);
    }

    /// Replace the contents with a fresh block of `size` bytes.
    pub fn assign_size(&mut self, size: usize, fill: Fill)
    {
        *self = DataBuf::with_size(size, fill);
    }

    /// Narrow this buffer in place to `[offset, offset + len)`.
    ///
    /// This is the self-slicing form of [`DataBuf::slice_len`]; it only
    /// adjusts the view and never touches storage.
    pub fn restrict(&mut self, offset: usize, len: usize)
    {
        if offset >= self.len {
            self.clear();
            return;
        }
        self.start += offset;
        self.len = (self.len - offset).min(len);
        if self.len == 0 {
            self.clear();
        }
    }

    /// Release the storage block and become empty.
    pub fn clear(&mut self)
    {
        self.block = None;
        self.start = 0;
        self.len = 0;
    }

    /// Drop `n` bytes from the front. Dropping everything empties the buffer.
    pub fn pop_front(&mut self, n: usize)
    {
        self.restrict(n, usize::MAX);
    }

    /// Drop `n` bytes from the back. Dropping everything empties the buffer.
    pub fn pop_back(&mut self, n: usize)
    {
        if n >= self.len {
            self.clear();
        } else {
            self.len -= n;
        }
    }

    /// Change the length of the buffer.
    ///
    /// Shrinking only narrows the view. Growing always allocates a new block
    /// holding the old contents followed by the new bytes, so any buffer that
    /// shared the old block keeps seeing the old bytes.
    pub fn resize(&mut self, new_len: usize, fill: Fill)
    {
        if new_len == 0 {
            self.clear();
            return;
        }
        if new_len <= self.len {
            self.len = new_len;
            return;
        }

        trace!(old_len = self.len, new_len, ?fill, "growing data buffer");
        let mut bytes = Vec::with_capacity(new_len);
        bytes.extend_from_slice(self.as_slice());
        bytes.resize(new_len, 0);
        *self = DataBuf::from_vec(bytes);
    }

    /// Ensure this buffer is the only owner of its storage.
    ///
    /// Copies the bytes if the block is referenced by another buffer or is
    /// lazy storage. After this call the block can be written without
    /// affecting anyone else.
    pub fn make_unique(&mut self)
    {
        let needs_copy = match &self.block {
            None => false,
            Some(Block::Owned(v)) => Arc::strong_count(v) > 1,
            Some(_) => true,
        };
        if needs_copy {
            trace!(len = self.len, lazy = self.is_lazy(), "copying shared data buffer");
            *self = DataBuf::from_slice(self.as_slice());
        }
    }

    /// Get a writable view of the bytes.
    ///
    /// This forces a private, owned copy first (see [`DataBuf::make_unique`]).
    /// The returned guard keeps the buffer exclusively borrowed, so nothing
    /// can share the block until the guard is dropped.
    pub fn writable(&mut self) -> WritableBuf<'_>
    {
        self.make_unique();
        let range = self.start..self.start + self.len;
        let bytes: &mut [u8] = match &mut self.block {
            Some(Block::Owned(v)) => &mut Arc::make_mut(v)[range],
            _ => &mut [],
        };
        WritableBuf { bytes }
    }

    /// Number of bytes in the buffer.
    #[must_use]
    pub const fn len(&self) -> usize
    {
        self.len
    }

    /// Whether the buffer holds no bytes.
    #[must_use]
    pub const fn is_empty(&self) -> bool
    {
        self.len == 0
    }

    /// Read-only view of the bytes.
    #[must_use]
    pub fn as_slice(&self) -> &[u8]
    {
        match &self.block {
            Some(block) => &block.bytes()[self.start..self.start + self.len],
            None => &[],
        }
    }

    /// Whether the buffer references memory it doesn't own.
    #[must_use]
    pub fn is_lazy(&self) -> bool
    {
        self.block.as_ref().is_some_and(Block::is_lazy)
    }

    /// Number of handles to this buffer's storage block.
    ///
    /// Returns `0` for an empty buffer and `1` for static storage. For
    /// caller-shared storage the caller's own handles are counted too.
    #[must_use]
    pub fn share_count(&self) -> usize
    {
        match &self.block {
            None => 0,
            Some(Block::Owned(v)) => Arc::strong_count(v),
            Some(Block::Static(_)) => 1,
            Some(Block::Shared(s)) => Arc::strong_count(s),
        }
    }

    /// Whether another handle references this buffer's storage block.
    #[must_use]
    pub fn is_shared(&self) -> bool
    {
        self.share_count() > 1
    }

    /// Copy the bytes into a new `Vec`.
    #[must_use]
    pub fn to_vec(&self) -> Vec<u8>
    {
        self.as_slice().to_vec()
    }
}

/// Exclusive writable view of a [`DataBuf`]
///
/// Obtained from [`DataBuf::writable`]. Dereferences to `[u8]`.
pub struct WritableBuf<'a>
{
    bytes: &'a mut [u8],
}

impl WritableBuf<'_>
{
    /// Give up the writable view. Equivalent to dropping the guard.
    pub fn release(self) {}
}

impl Deref for WritableBuf<'_>
{
    type Target = [u8];

    fn deref(&self) -> &[u8]
    {
        self.bytes
    }
}

impl DerefMut for WritableBuf<'_>
{
    fn deref_mut(&mut self) -> &mut [u8]
    {
        self.bytes
    }
}

impl PartialEq for DataBuf
{
    fn eq(&self, other: &Self) -> bool
    {
        self.as_slice() == other.as_slice()
    }
}

impl Eq for DataBuf {}

impl AsRef<[u8]> for DataBuf
{
    fn as_ref(&self) -> &[u8]
    {
        self.as_slice()
    }
}

impl From<Vec<u8>> for DataBuf
{
    fn from(bytes: Vec<u8>) -> Self
    {
        DataBuf::from_vec(bytes)
    }
}

impl From<&[u8]> for DataBuf
{
    fn from(bytes: &[u8]) -> Self
    {
        DataBuf::from_slice(bytes)
    }
}

impl From<&str> for DataBuf
{
    fn from(s: &str) -> Self
    {
        DataBuf::from_slice(s.as_bytes())
    }
}

impl fmt::Debug for DataBuf
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("DataBuf")
            .field("len", &self.len)
            .field("lazy", &self.is_lazy())
            .field("bytes", &hex::encode(self.as_slice()))
            .finish()
    }
}

// On the wire a buffer is a lowercase hex string.
impl Serialize for DataBuf
{
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    {
        serializer.serialize_str(&hex::encode(self.as_slice()))
    }
}

impl<'de> Deserialize<'de> for DataBuf
{
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error>
    {
        struct HexVisitor;

        impl Visitor<'_> for HexVisitor
        {
            type Value = DataBuf;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
            {
                f.write_str("a hex encoded byte string")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<DataBuf, E>
            {
                hex::decode(v).map(DataBuf::from_vec).map_err(E::custom)
            }
        }

        deserializer.deserialize_str(HexVisitor)
    }
}
