//! # Target Events
//!
//! An [`Event`] is an OS-specific number describing something that happened
//! in the target, such as a signal or an exception. On Linux targets the
//! numbers are signal numbers; see [`linux`].

use std::fmt;

use serde::{Deserialize, Serialize};
use tether_core::DataBuf;

/// OS-specific event number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Event(pub u32);

impl Event
{
    /// No event
    pub const NONE: Event = Event(0);

    /// The raw event number
    #[must_use]
    pub const fn raw(self) -> u32
    {
        self.0
    }
}

impl fmt::Display for Event
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match linux::name(*self) {
            Some(name) => write!(f, "{name}"),
            None => write!(f, "event {}", self.0),
        }
    }
}

/// An event plus its optional OS-specific payload
///
/// On Linux the payload is the raw `siginfo` bytes. Only back-ends that
/// advertise [`BackEndFeatures::EVENT_INFO`](crate::types::BackEndFeatures)
/// accept or report a payload.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EventDetails
{
    /// The event number
    pub event: Event,
    /// Opaque payload, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<DataBuf>,
}

impl EventDetails
{
    /// Details without a payload
    #[must_use]
    pub const fn new(event: Event) -> Self
    {
        Self { event, info: None }
    }

    /// Details carrying `info`
    #[must_use]
    pub fn with_info(event: Event, info: DataBuf) -> Self
    {
        Self {
            event,
            info: Some(info),
        }
    }
}

/// Linux signal numbers
pub mod linux
{
    use super::Event;

    pub const SIGHUP: Event = Event(1);
    pub const SIGINT: Event = Event(2);
    pub const SIGQUIT: Event = Event(3);
    pub const SIGILL: Event = Event(4);
    pub const SIGTRAP: Event = Event(5);
    pub const SIGABRT: Event = Event(6);
    pub const SIGBUS: Event = Event(7);
    pub const SIGFPE: Event = Event(8);
    pub const SIGKILL: Event = Event(9);
    pub const SIGUSR1: Event = Event(10);
    pub const SIGSEGV: Event = Event(11);
    pub const SIGUSR2: Event = Event(12);
    pub const SIGPIPE: Event = Event(13);
    pub const SIGALRM: Event = Event(14);
    pub const SIGTERM: Event = Event(15);
    pub const SIGSTKFLT: Event = Event(16);
    pub const SIGCHLD: Event = Event(17);
    pub const SIGCONT: Event = Event(18);
    pub const SIGSTOP: Event = Event(19);
    pub const SIGTSTP: Event = Event(20);
    pub const SIGTTIN: Event = Event(21);
    pub const SIGTTOU: Event = Event(22);
    pub const SIGURG: Event = Event(23);
    pub const SIGXCPU: Event = Event(24);
    pub const SIGXFSZ: Event = Event(25);
    pub const SIGVTALRM: Event = Event(26);
    pub const SIGPROF: Event = Event(27);
    pub const SIGWINCH: Event = Event(28);
    pub const SIGPOLL: Event = Event(29);
    pub const SIGPWR: Event = Event(30);
    pub const SIGSYS: Event = Event(31);
    /// First real-time signal
    pub const SIGRTMIN: Event = Event(32);
    /// Last real-time signal
    pub const SIGRTMAX: Event = Event(63);

    /// Signals GDB lets through to the target without stopping
    ///
    /// Back-ends with event interception start with these events marked
    /// not intercepted.
    pub const NOT_INTERCEPTED_BY_GDB: [Event; 9] = [
        SIGALRM,
        SIGURG,
        SIGCHLD,
        SIGVTALRM,
        SIGPROF,
        SIGWINCH,
        SIGPOLL,
        SIGRTMIN,
        Event(33),
    ];

    const NAMES: [&str; 31] = [
        "SIGHUP", "SIGINT", "SIGQUIT", "SIGILL", "SIGTRAP", "SIGABRT", "SIGBUS", "SIGFPE", "SIGKILL", "SIGUSR1",
        "SIGSEGV", "SIGUSR2", "SIGPIPE", "SIGALRM", "SIGTERM", "SIGSTKFLT", "SIGCHLD", "SIGCONT", "SIGSTOP",
        "SIGTSTP", "SIGTTIN", "SIGTTOU", "SIGURG", "SIGXCPU", "SIGXFSZ", "SIGVTALRM", "SIGPROF", "SIGWINCH",
        "SIGPOLL", "SIGPWR", "SIGSYS",
    ];

    /// Symbolic name of a standard signal
    #[must_use]
    pub fn name(event: Event) -> Option<&'static str>
    {
        let index = usize::try_from(event.0).ok()?.checked_sub(1)?;
        NAMES.get(index).copied()
    }

    /// Whether the event is a real-time signal
    #[must_use]
    pub fn is_realtime(event: Event) -> bool
    {
        (SIGRTMIN.0..=SIGRTMAX.0).contains(&event.0)
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_signal_names()
    {
        assert_eq!(linux::name(linux::SIGINT), Some("SIGINT"));
        assert_eq!(linux::name(linux::SIGSYS), Some("SIGSYS"));
        assert_eq!(linux::name(Event(0)), None);
        assert_eq!(linux::name(linux::SIGRTMIN), None);
        assert_eq!(linux::SIGTRAP.to_string(), "SIGTRAP");
        assert_eq!(Event(40).to_string(), "event 40");
    }

    #[test]
    fn test_gdb_pass_list_is_realtime_or_standard()
    {
        assert!(linux::is_realtime(Event(33)));
        assert!(!linux::is_realtime(linux::SIGCHLD));
        assert!(linux::NOT_INTERCEPTED_BY_GDB.contains(&linux::SIGWINCH));
    }
}
