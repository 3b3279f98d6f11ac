//! # Stop Multiplexing
//!
//! Several threads can stop at the same moment. A front-end that advertises
//! [`FrontEndFeatures::MULTIPLE_STOP_REASONS`] sees all of their reasons at
//! once. Any other front-end sees one stop at a time: one thread reports its
//! real reason, the others report [`StopReason::Stopped`], and their real
//! reasons are replayed one per resume without actually running the
//! target.
//!
//! [`StopQueue`] implements that bookkeeping for back-end targets.
//!
//! ## Example
//!
//! ```rust
//! use tether_protocol::stops::{StopMode, StopQueue, ThreadStop};
//! use tether_protocol::types::{StopReason, ThreadId};
//!
//! let (t1, t2) = (ThreadId(1), ThreadId(2));
//! let mut queue = StopQueue::new(StopMode::Single);
//! let focus = queue.report(&[t1, t2], [
//!     ThreadStop::breakpoint(t1, 0x1000),
//!     ThreadStop::breakpoint(t2, 0x2000),
//! ]);
//! assert_eq!(focus, Some(t1));
//! assert_eq!(queue.stop_reason(t2), StopReason::Stopped);
//!
//! // Next resume: T2's breakpoint is still set, so it is reported without
//! // running anything.
//! let replay = queue.take_replay(|_| true, |_| true);
//! assert_eq!(replay, Some(t2));
//! assert_eq!(queue.stop_reason(t2), StopReason::Breakpoint);
//! ```

use std::collections::{HashMap, VecDeque};

use tether_core::AnyAddr;
use tracing::debug;

use crate::types::{FrontEndFeatures, StopReason, ThreadId};

/// How simultaneous stops are reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopMode
{
    /// One stop reason per notification
    #[default]
    Single,
    /// Every stop reason in one notification
    Batch,
}

impl From<FrontEndFeatures> for StopMode
{
    fn from(features: FrontEndFeatures) -> Self
    {
        if features.contains(FrontEndFeatures::MULTIPLE_STOP_REASONS) {
            StopMode::Batch
        } else {
            StopMode::Single
        }
    }
}

/// A stop detected by the target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadStop
{
    pub thread: ThreadId,
    pub reason: StopReason,
    /// Breakpoint address, for breakpoint stops
    pub breakpoint: Option<AnyAddr>,
}

impl ThreadStop
{
    #[must_use]
    pub const fn new(thread: ThreadId, reason: StopReason) -> Self
    {
        Self {
            thread,
            reason,
            breakpoint: None,
        }
    }

    #[must_use]
    pub const fn breakpoint(thread: ThreadId, addr: AnyAddr) -> Self
    {
        Self {
            thread,
            reason: StopReason::Breakpoint,
            breakpoint: Some(addr),
        }
    }
}

/// Per-thread stop reasons plus stops not yet reported
#[derive(Debug, Default)]
pub struct StopQueue
{
    mode: StopMode,
    reasons: HashMap<ThreadId, StopReason>,
    deferred: VecDeque<ThreadStop>,
}

impl StopQueue
{
    #[must_use]
    pub fn new(mode: StopMode) -> Self
    {
        Self {
            mode,
            reasons: HashMap::new(),
            deferred: VecDeque::new(),
        }
    }

    #[must_use]
    pub fn mode(&self) -> StopMode
    {
        self.mode
    }

    pub fn set_mode(&mut self, mode: StopMode)
    {
        self.mode = mode;
    }

    /// Record the stops that ended a resume and pick the focus thread.
    ///
    /// Every thread in `resumed` that doesn't appear in `stops` reports
    /// [`StopReason::Stopped`]. Threads that weren't resumed keep their
    /// previous reason. Returns `None` if `stops` is empty.
    pub fn report<I>(&mut self, resumed: &[ThreadId], stops: I) -> Option<ThreadId>
    where
        I: IntoIterator<Item = ThreadStop>,
    {
        for thread in resumed {
            self.reasons.insert(*thread, StopReason::Stopped);
        }

        let mut stops = stops.into_iter();
        let first = stops.next()?;
        self.reasons.insert(first.thread, first.reason);

        for stop in stops {
            match self.mode {
                StopMode::Batch => {
                    self.reasons.insert(stop.thread, stop.reason);
                }
                StopMode::Single => {
                    debug!(thread = %stop.thread, reason = ?stop.reason, "Deferring simultaneous stop");
                    self.reasons.insert(stop.thread, StopReason::Stopped);
                    self.deferred.push_back(stop);
                }
            }
        }
        Some(first.thread)
    }

    /// Pop the next deferred stop to report instead of resuming.
    ///
    /// `resuming` tells whether a thread is about to run; deferred stops of
    /// frozen threads stay queued. Breakpoint stops whose breakpoint is no
    /// longer present (per `breakpoint_present`) are dropped. The other
    /// resuming threads report [`StopReason::Stopped`].
    pub fn take_replay<R, B>(&mut self, resuming: R, breakpoint_present: B) -> Option<ThreadId>
    where
        R: Fn(ThreadId) -> bool,
        B: Fn(AnyAddr) -> bool,
    {
        self.deferred.retain(|stop| {
            let keep = stop.breakpoint.is_none_or(&breakpoint_present);
            if !keep {
                debug!(thread = %stop.thread, "Dropping deferred stop for removed breakpoint");
            }
            keep
        });

        let index = self.deferred.iter().position(|stop| resuming(stop.thread))?;
        let stop = self.deferred.remove(index)?;

        for (thread, reason) in &mut self.reasons {
            if *thread != stop.thread && resuming(*thread) {
                *reason = StopReason::Stopped;
            }
        }
        self.reasons.insert(stop.thread, stop.reason);
        debug!(thread = %stop.thread, reason = ?stop.reason, "Replaying deferred stop");
        Some(stop.thread)
    }

    /// Drop deferred stops at a breakpoint that was just removed
    pub fn breakpoint_removed(&mut self, addr: AnyAddr)
    {
        self.deferred.retain(|stop| stop.breakpoint != Some(addr));
    }

    /// Forget everything about an exited thread
    pub fn forget_thread(&mut self, thread: ThreadId)
    {
        self.reasons.remove(&thread);
        self.deferred.retain(|stop| stop.thread != thread);
    }

    /// Force the reported reason of a thread
    pub fn set_reason(&mut self, thread: ThreadId, reason: StopReason)
    {
        self.reasons.insert(thread, reason);
    }

    /// Reported reason of `thread`; [`StopReason::Invalid`] if it never
    /// stopped
    #[must_use]
    pub fn stop_reason(&self, thread: ThreadId) -> StopReason
    {
        self.reasons.get(&thread).copied().unwrap_or_default()
    }

    /// Whether `thread` has an unreported stop
    #[must_use]
    pub fn is_deferred(&self, thread: ThreadId) -> bool
    {
        self.deferred.iter().any(|stop| stop.thread == thread)
    }

    /// Number of unreported stops
    #[must_use]
    pub fn deferred_len(&self) -> usize
    {
        self.deferred.len()
    }

    pub fn clear(&mut self)
    {
        self.reasons.clear();
        self.deferred.clear();
    }
}
