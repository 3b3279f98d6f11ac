//! # Commands and Notifications
//!
//! The debugger drives the target through [`Commands`] and the target reports
//! back through [`Notifications`].
//!
//! Both directions are implemented twice. On the front-end side,
//! [`RemoteCommands`](crate::RemoteCommands) implements [`Commands`] by
//! sending requests to the back-end, and the debugger implements
//! [`Notifications`] to receive stops. On the back-end side, the target
//! implements [`Commands`] and uses
//! [`NotificationSender`](crate::NotificationSender), which implements
//! [`Notifications`], to report stops.
//!
//! ## Modes
//!
//! Commands are only valid in command mode. The single exception is
//! [`Commands::break_target`], which is valid in run mode and a no-op in
//! command mode. Notifications are only valid in run mode.
//!
//! ## Capabilities
//!
//! Optional interfaces are reached through accessors such as
//! [`Commands::breakpoints`], or generically through
//! [`Commands::interface`]. An accessor returns `None` when the back-end
//! doesn't advertise the matching [`BackEndFeatures`](crate::types::BackEndFeatures) bit.

use tether_core::{AnyAddr, AnyRange, DataBuf, RegValue};

use crate::error::ProtocolResult;
use crate::event::{Event, EventDetails};
use crate::types::{
    ContinueMode, CustomCommandReply, ImageId, ImageInfo, ImageNotifications, InterfaceId, ProcessId, Reg, StopReason,
    ThreadId, ThreadInfo, ThreadNotifications,
};

/// Commands the debugger sends to the target
pub trait Commands
{
    /// Number of threads in the target
    fn thread_count(&mut self) -> ProtocolResult<usize>;

    /// ID of the `index`th thread, or [`ThreadId::INVALID`] past the end
    fn thread_id(&mut self, index: usize) -> ProtocolResult<ThreadId>;

    /// The thread that triggered the current stop
    fn focus_thread(&mut self) -> ProtocolResult<ThreadId>;

    fn thread_exists(&mut self, thread: ThreadId) -> ProtocolResult<bool>;

    /// Choose how `thread` behaves at the next [`Commands::continue_threads`].
    ///
    /// The setting lasts until the next resume; threads without a setting
    /// stay frozen. The `*NewEvent` modes need `event`.
    fn set_continue_mode(&mut self, thread: ThreadId, mode: ContinueMode, event: Option<EventDetails>)
        -> ProtocolResult<()>;

    /// Resume the target according to the continue modes and switch to
    /// run mode.
    ///
    /// Fails when every thread is frozen.
    fn continue_threads(&mut self) -> ProtocolResult<()>;

    /// Why `thread` stopped
    ///
    /// A thread that stayed frozen keeps the reason from its last stop.
    fn thread_stop_reason(&mut self, thread: ThreadId) -> ProtocolResult<StopReason>;

    /// Event `thread` stopped with, for [`StopReason::Event`]
    fn thread_stop_event(&mut self, thread: ThreadId) -> ProtocolResult<EventDetails>;

    /// Ask a running target to stop. A no-op in command mode.
    fn break_target(&mut self) -> ProtocolResult<()>;

    /// Terminate the target and end the session
    fn kill(&mut self) -> ProtocolResult<()>;

    /// Let the target run free and end the session
    fn detach(&mut self) -> ProtocolResult<()>;

    fn register_value(&mut self, thread: ThreadId, reg: Reg) -> ProtocolResult<RegValue>;

    fn set_register_value(&mut self, thread: ThreadId, reg: Reg, value: &RegValue) -> ProtocolResult<()>;

    /// Read target memory.
    ///
    /// The result may be shorter than `range` when part of it isn't
    /// readable.
    fn memory_value(&mut self, range: AnyRange) -> ProtocolResult<DataBuf>;

    /// Write target memory, returning the number of bytes written
    fn set_memory_value(&mut self, addr: AnyAddr, value: &DataBuf) -> ProtocolResult<usize>;

    fn breakpoints(&mut self) -> Option<&mut dyn Breakpoints>
    {
        None
    }

    fn custom_breakpoints(&mut self) -> Option<&mut dyn CustomBreakpoints>
    {
        None
    }

    fn custom_commands(&mut self) -> Option<&mut dyn CustomCommands>
    {
        None
    }

    fn kill_with_notification(&mut self) -> Option<&mut dyn KillWithNotification>
    {
        None
    }

    fn target_description(&mut self) -> Option<&mut dyn TargetDescription>
    {
        None
    }

    fn event_interception(&mut self) -> Option<&mut dyn EventInterception>
    {
        None
    }

    fn image_extensions(&mut self) -> Option<&mut dyn ImageExtensions>
    {
        None
    }

    fn thread_extensions(&mut self) -> Option<&mut dyn ThreadExtensions>
    {
        None
    }

    fn process_info(&mut self) -> Option<&mut dyn ProcessInfo>
    {
        None
    }

    /// Look up a capability by ID.
    ///
    /// Returns `None` if the capability is unsupported.
    fn interface(&mut self, id: InterfaceId) -> Option<Capability<'_>>
    {
        match id {
            InterfaceId::Breakpoints => self.breakpoints().map(Capability::Breakpoints),
            InterfaceId::CustomBreakpoints => self.custom_breakpoints().map(Capability::CustomBreakpoints),
            InterfaceId::CustomCommands => self.custom_commands().map(Capability::CustomCommands),
            InterfaceId::KillWithNotification => self.kill_with_notification().map(Capability::KillWithNotification),
            InterfaceId::TargetDescription => self.target_description().map(Capability::TargetDescription),
            InterfaceId::EventInterception => self.event_interception().map(Capability::EventInterception),
            InterfaceId::ImageExtensions => self.image_extensions().map(Capability::ImageExtensions),
            InterfaceId::ThreadExtensions => self.thread_extensions().map(Capability::ThreadExtensions),
            InterfaceId::ProcessInfo => self.process_info().map(Capability::ProcessInfo),
        }
    }
}

/// Borrowed capability returned by [`Commands::interface`]
pub enum Capability<'a>
{
    Breakpoints(&'a mut dyn Breakpoints),
    CustomBreakpoints(&'a mut dyn CustomBreakpoints),
    CustomCommands(&'a mut dyn CustomCommands),
    KillWithNotification(&'a mut dyn KillWithNotification),
    TargetDescription(&'a mut dyn TargetDescription),
    EventInterception(&'a mut dyn EventInterception),
    ImageExtensions(&'a mut dyn ImageExtensions),
    ThreadExtensions(&'a mut dyn ThreadExtensions),
    ProcessInfo(&'a mut dyn ProcessInfo),
}

impl Capability<'_>
{
    #[must_use]
    pub fn id(&self) -> InterfaceId
    {
        match self {
            Capability::Breakpoints(_) => InterfaceId::Breakpoints,
            Capability::CustomBreakpoints(_) => InterfaceId::CustomBreakpoints,
            Capability::CustomCommands(_) => InterfaceId::CustomCommands,
            Capability::KillWithNotification(_) => InterfaceId::KillWithNotification,
            Capability::TargetDescription(_) => InterfaceId::TargetDescription,
            Capability::EventInterception(_) => InterfaceId::EventInterception,
            Capability::ImageExtensions(_) => InterfaceId::ImageExtensions,
            Capability::ThreadExtensions(_) => InterfaceId::ThreadExtensions,
            Capability::ProcessInfo(_) => InterfaceId::ProcessInfo,
        }
    }
}

impl std::fmt::Debug for Capability<'_>
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        f.debug_tuple("Capability").field(&self.id()).finish()
    }
}

/// Breakpoints implemented by the back-end
///
/// Breakpoints have hardware semantics: a thread stops *before* executing
/// the instruction at the breakpoint address, and resuming simply executes
/// it. Threads stopped at a breakpoint report [`StopReason::Breakpoint`].
pub trait Breakpoints
{
    /// Insert a breakpoint at `addr`, returning whether it was set.
    ///
    /// `size` is the size of the breakpoint instruction the debugger
    /// would use, or 0 if unknown.
    fn set_breakpoint(&mut self, addr: AnyAddr, size: usize) -> ProtocolResult<bool>;

    /// Remove the breakpoint at `addr`, returning whether one was there
    fn clear_breakpoint(&mut self, addr: AnyAddr) -> ProtocolResult<bool>;
}

/// Back-end defined breakpoints that explain themselves
pub trait CustomBreakpoints
{
    /// Message for a thread stopped with [`StopReason::CustomBreak`].
    ///
    /// Empty for threads stopped for any other reason.
    fn thread_stop_message(&mut self, thread: ThreadId) -> ProtocolResult<String>;
}

/// Free-form text commands interpreted by the back-end
pub trait CustomCommands
{
    fn custom_command(&mut self, thread: ThreadId, command: &str) -> ProtocolResult<CustomCommandReply>;
}

/// Kill that reports the exit through a notification
pub trait KillWithNotification
{
    /// Terminate the target with `exit_code` and switch to run mode.
    ///
    /// The back-end then reports the termination as a normal exit
    /// notification.
    fn kill_with_notification(&mut self, exit_code: i64) -> ProtocolResult<()>;
}

/// Target description documents
pub trait TargetDescription
{
    /// Contents of the named document, empty if unknown
    fn target_description(&mut self, name: &str) -> ProtocolResult<DataBuf>;
}

/// Control over which events stop the target
///
/// All events are intercepted by default. Settings are sticky and take
/// effect at the next resume.
pub trait EventInterception
{
    /// Deliver `event` straight to the target without stopping
    fn mark_event_not_intercepted(&mut self, event: Event) -> ProtocolResult<()>;

    /// Intercept every event again
    fn mark_all_events_intercepted(&mut self) -> ProtocolResult<()>;
}

/// Image load and unload tracking
pub trait ImageExtensions
{
    /// Choose which image events stop the target. Nothing stops by
    /// default.
    fn set_image_notifications(&mut self, flags: ImageNotifications) -> ProtocolResult<()>;

    fn image_count(&mut self) -> ProtocolResult<usize>;

    fn image_id(&mut self, index: usize) -> ProtocolResult<ImageId>;

    fn image_info(&mut self, image: ImageId) -> ProtocolResult<ImageInfo>;

    /// Image involved in a [`StopReason::ImageLoad`] or
    /// [`StopReason::ImageUnload`] stop
    fn thread_stop_image(&mut self, thread: ThreadId) -> ProtocolResult<ImageId>;
}

/// Thread lifecycle tracking
pub trait ThreadExtensions
{
    /// Choose which thread events stop the target. Nothing stops by
    /// default.
    fn set_thread_notifications(&mut self, flags: ThreadNotifications) -> ProtocolResult<()>;

    fn thread_info(&mut self, thread: ThreadId) -> ProtocolResult<ThreadInfo>;

    /// Exit status of a thread stopped with [`StopReason::ThreadExit`]
    fn thread_exit_status(&mut self, thread: ThreadId) -> ProtocolResult<i64>;
}

/// Process-wide facts
pub trait ProcessInfo
{
    fn process_id(&mut self) -> ProtocolResult<ProcessId>;

    /// Address of the dynamic loader's information block, 0 if none
    fn loader_info_addr(&mut self) -> ProtocolResult<AnyAddr>;

    /// Architecture name of the target application
    fn target_arch(&mut self) -> ProtocolResult<String>;
}

/// Reports from the target to the debugger
///
/// Exactly one method is called per stop or termination.
pub trait Notifications
{
    /// The target stopped; `focus` is the thread that triggered the stop.
    fn notify_stopped(&mut self, focus: ThreadId) -> ProtocolResult<()>;

    /// The target exited with `exit_code`.
    fn notify_terminated_exit(&mut self, exit_code: i64) -> ProtocolResult<()>;

    /// The target was terminated by `event`.
    fn notify_terminated_event(&mut self, event: EventDetails) -> ProtocolResult<()>;
}

/// Receiver of an endpoint's debug log
///
/// Endpoints report every protocol message they send or receive to each
/// registered receiver.
pub trait LogNotifications: Send + Sync
{
    fn notify_log_message(&self, message: &str);
}
