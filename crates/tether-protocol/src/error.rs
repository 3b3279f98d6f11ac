//! # Error Types
//!
//! Every fallible protocol operation returns [`ProtocolResult`].
//!
//! An interrupted blocking call is not an error: the blocking entry points
//! report interruption through their success value
//! ([`Completion::Interrupted`](crate::types::Completion),
//! [`SessionEnd::Interrupted`](crate::types::SessionEnd),
//! [`NotifyOutcome::Interrupted`](crate::types::NotifyOutcome)).

use thiserror::Error;

use crate::types::{Reg, SessionState};

/// Errors produced by the front-end, the back-end and the wire layer
#[derive(Error, Debug)]
pub enum ProtocolError
{
    /// Socket failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A frame couldn't be encoded or decoded
    #[error("Malformed message: {0}")]
    Codec(#[from] serde_json::Error),

    /// The peer closed the connection
    #[error("Peer closed the connection")]
    Disconnected,

    /// A frame exceeded the negotiated length limit
    #[error("Frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge
    {
        /// Length announced by the frame header
        len: usize,
        /// Largest accepted length
        max: usize,
    },

    /// The peer sent a message that doesn't fit the current exchange
    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),

    /// A bounded wait ran out
    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    /// The operation isn't allowed in the current session mode
    #[error("Operation requires {expected} but the session is in {actual}")]
    WrongMode
    {
        /// Mode the operation needs
        expected: SessionState,
        /// Mode the session is in
        actual: SessionState,
    },

    /// No peer is connected
    #[error("Not connected")]
    NotConnected,

    /// A peer is already connected
    #[error("Already connected")]
    AlreadyConnected,

    /// Register access before a register set was installed
    #[error("No register set has been installed")]
    RegistersNotSet,

    /// The register set can't change once registers were accessed
    #[error("Register set is locked after first register access")]
    RegistersLocked,

    /// The register set description is inconsistent
    #[error("Invalid register set: {0}")]
    InvalidRegisterSet(String),

    /// Register ID not present in the register set
    #[error("Unknown register {0}")]
    InvalidRegister(Reg),

    /// Every thread is frozen, so a resume would deadlock
    #[error("All threads are frozen")]
    AllThreadsFrozen,

    /// Argument rejected by validation
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Server-only operation on a client endpoint
    #[error("Endpoint is not a server")]
    NotServer,

    /// Client-only operation on a server endpoint
    #[error("Endpoint is not a client")]
    NotClient,

    /// The remote side failed to execute a command
    #[error("Remote error: {0}")]
    Remote(String),

    /// The capability or mode wasn't advertised by the peer
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// [`initialize`](crate::initialize) wasn't called for the transport
    #[error("Protocol library is not initialized for {0}")]
    NotInitialized(&'static str),

    /// The target terminated while the operation was pending
    #[error("Target process terminated")]
    TargetTerminated,

    /// The endpoint was shut down by a reset and can't be reused
    #[error("Endpoint is disabled")]
    Disabled,
}

/// Convenience alias for results that use [`ProtocolError`]
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;

impl ProtocolError
{
    /// Whether the error means the connection is gone
    #[must_use]
    pub fn is_connection_lost(&self) -> bool
    {
        matches!(self, ProtocolError::Io(_) | ProtocolError::Disconnected)
    }
}
