//! # tether-core
//!
//! Value types carried by the Tether debugger protocol.
//!
//! - [`DataBuf`]: copy-on-write byte buffer used for memory contents and
//!   wide register values.
//! - [`RegValue`]: register value of any bit width with the high bits beyond
//!   the width always zero.
//! - [`AddrRange`]: `[base, base + size)` interval over an address type.
//! - [`Address`]: strongly typed 64-bit target address.
//!
//! None of these types panic or fail on bad offsets or widths; they clamp.

pub mod address;
pub mod data;
pub mod error;
pub mod range;
pub mod regvalue;

pub use address::Address;
pub use data::{DataBuf, Fill, WritableBuf};
pub use error::{CoreError, Result};
pub use range::{AddrRange, AnyAddr, AnyRange, RangeAddress};
pub use regvalue::{RegValue, RegisterWord, MAX_DECODED_BITS};
