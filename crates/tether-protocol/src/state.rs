//! # Session Mode and Interrupts
//!
//! [`ModeGate`] holds the front-end's [`SessionState`] and rejects commands
//! issued in the wrong mode. [`InterruptFlag`] is the sticky flag behind
//! every interruptible blocking call.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use crate::error::{ProtocolError, ProtocolResult};
use crate::types::SessionState;

/// Current [`SessionState`], readable from any thread
#[derive(Debug, Default)]
pub struct ModeGate
{
    state: AtomicU8,
}

const fn encode(state: SessionState) -> u8
{
    match state {
        SessionState::Disconnected => 0,
        SessionState::CommandMode => 1,
        SessionState::RunMode => 2,
    }
}

const fn decode(raw: u8) -> SessionState
{
    match raw {
        1 => SessionState::CommandMode,
        2 => SessionState::RunMode,
        _ => SessionState::Disconnected,
    }
}

impl ModeGate
{
    #[must_use]
    pub fn new(state: SessionState) -> Self
    {
        Self {
            state: AtomicU8::new(encode(state)),
        }
    }

    #[must_use]
    pub fn get(&self) -> SessionState
    {
        decode(self.state.load(Ordering::Acquire))
    }

    pub fn set(&self, state: SessionState)
    {
        self.state.store(encode(state), Ordering::Release);
    }

    /// Fail unless the session is in `expected`.
    ///
    /// ## Errors
    ///
    /// Returns [`ProtocolError::NotConnected`] when disconnected and
    /// [`ProtocolError::WrongMode`] for any other mismatch.
    pub fn require(&self, expected: SessionState) -> ProtocolResult<()>
    {
        let actual = self.get();
        if actual == expected {
            Ok(())
        } else {
            Err(mismatch(expected, actual))
        }
    }

    /// Move from `from` to `to` atomically.
    ///
    /// ## Errors
    ///
    /// Same as [`ModeGate::require`] when the session isn't in `from`.
    pub fn transition(&self, from: SessionState, to: SessionState) -> ProtocolResult<()>
    {
        match self
            .state
            .compare_exchange(encode(from), encode(to), Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Ok(()),
            Err(actual) => Err(mismatch(from, decode(actual))),
        }
    }
}

fn mismatch(expected: SessionState, actual: SessionState) -> ProtocolError
{
    match actual {
        SessionState::Disconnected => ProtocolError::NotConnected,
        actual => ProtocolError::WrongMode { expected, actual },
    }
}

/// Sticky interrupt request
///
/// Raising the flag makes the current or next interruptible blocking call
/// return its `Interrupted` outcome.
#[derive(Debug, Default)]
pub struct InterruptFlag
{
    raised: AtomicBool,
}

impl InterruptFlag
{
    pub fn raise(&self)
    {
        self.raised.store(true, Ordering::Release);
    }

    pub fn clear(&self)
    {
        self.raised.store(false, Ordering::Release);
    }

    #[must_use]
    pub fn is_raised(&self) -> bool
    {
        self.raised.load(Ordering::Acquire)
    }

    /// Clear the flag, returning whether it was raised
    pub fn take(&self) -> bool
    {
        self.raised.swap(false, Ordering::AcqRel)
    }
}

/// Handle that interrupts an endpoint from another thread
///
/// Obtained from [`FrontEnd::interrupter`](crate::FrontEnd::interrupter) or
/// [`BackEnd::interrupter`](crate::BackEnd::interrupter). Raising it only
/// touches an atomic, so it is safe to call from a Ctrl-C handler.
#[derive(Debug, Clone)]
pub struct Interrupter
{
    flag: Arc<InterruptFlag>,
}

impl Interrupter
{
    pub(crate) fn new(flag: Arc<InterruptFlag>) -> Self
    {
        Self { flag }
    }

    /// Interrupt the endpoint's blocking call
    pub fn interrupt(&self)
    {
        self.flag.raise();
    }
}
