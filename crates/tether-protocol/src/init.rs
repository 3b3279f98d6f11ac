//! # Library Initialization
//!
//! Transports must be initialized before an endpoint that uses them is
//! created. Initialization is reference counted per transport, so several
//! independent components in one process may each call
//! [`initialize`] and [`cleanup`].

use std::sync::Mutex;

use once_cell::sync::Lazy;
use tracing::debug;

use crate::error::{ProtocolError, ProtocolResult};
use crate::types::InitializeFlags;

static TCP_USERS: Lazy<Mutex<usize>> = Lazy::new(|| Mutex::new(0));

fn users() -> std::sync::MutexGuard<'static, usize>
{
    TCP_USERS.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Initialize the transports named by `flags`.
///
/// ## Errors
///
/// Returns [`ProtocolError::InvalidArgument`] if `flags` names no known
/// transport.
pub fn initialize(flags: InitializeFlags) -> ProtocolResult<()>
{
    if !flags.contains(InitializeFlags::TCP) {
        return Err(ProtocolError::InvalidArgument(format!("no transport in {flags:?}")));
    }
    let mut count = users();
    *count += 1;
    debug!(users = *count, "TCP transport initialized");
    Ok(())
}

/// Release one [`initialize`] call for the transports named by `flags`.
///
/// ## Errors
///
/// Returns [`ProtocolError::NotInitialized`] if there is no matching
/// [`initialize`] call.
pub fn cleanup(flags: InitializeFlags) -> ProtocolResult<()>
{
    if !flags.contains(InitializeFlags::TCP) {
        return Err(ProtocolError::InvalidArgument(format!("no transport in {flags:?}")));
    }
    let mut count = users();
    if *count == 0 {
        return Err(ProtocolError::NotInitialized("tcp"));
    }
    *count -= 1;
    debug!(users = *count, "TCP transport released");
    Ok(())
}

/// Whether every transport named by `flags` is initialized
#[must_use]
pub fn is_initialized(flags: InitializeFlags) -> bool
{
    !flags.contains(InitializeFlags::TCP) || *users() > 0
}

pub(crate) fn require_tcp() -> ProtocolResult<()>
{
    if is_initialized(InitializeFlags::TCP) {
        Ok(())
    } else {
        Err(ProtocolError::NotInitialized("tcp"))
    }
}
