//! # Error Types
//!
//! The value types in this crate never fail: out-of-range offsets clamp and
//! odd widths degenerate to zero. The only fallible operation is parsing
//! user input, which reports through [`CoreError`].

use thiserror::Error;

/// Errors produced while parsing values
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError
{
    /// The text is neither a `0x`-prefixed hex number nor a decimal number
    #[error("Invalid address: {0:?}")]
    InvalidAddress(String),

    /// The text is not an even-length hex string
    #[error("Invalid hex bytes: {0:?}")]
    InvalidHex(String),
}

/// Convenience alias for results that use [`CoreError`]
pub type Result<T> = std::result::Result<T, CoreError>;
