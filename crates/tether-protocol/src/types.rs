//! # Protocol Types
//!
//! Identifiers, enumerations and feature flags shared by both endpoints.
//!
//! Feature sets are [`bitflags`] types. A back-end advertises
//! [`BackEndFeatures`] and a front-end advertises [`FrontEndFeatures`];
//! both are exchanged during the connection handshake and decide which
//! optional capabilities and stop-reporting modes a session uses.

use std::collections::HashSet;
use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use tether_core::AnyRange;

use crate::error::{ProtocolError, ProtocolResult};

/// Target thread identifier
///
/// Thread IDs are assigned by the back-end and are never reused within a
/// session. `0` is never a valid thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(pub u64);

impl ThreadId
{
    /// The invalid thread
    pub const INVALID: ThreadId = ThreadId(0);

    /// Whether this is a real thread ID
    #[must_use]
    pub const fn is_valid(self) -> bool
    {
        self.0 != 0
    }
}

impl fmt::Display for ThreadId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "thread {}", self.0)
    }
}

/// Register identifier
///
/// Values `1..=4` are the generic registers, which every register set maps
/// onto one of its concrete registers. Concrete registers start at
/// [`Reg::END`] and follow the order of the installed register set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Reg(pub u32);

impl Reg
{
    /// Not a register
    pub const INVALID: Reg = Reg(0);
    /// Generic program counter
    pub const PC: Reg = Reg(1);
    /// Generic frame pointer
    pub const FP: Reg = Reg(2);
    /// Generic stack pointer
    pub const SP: Reg = Reg(3);
    /// Generic flags register
    pub const FLAGS: Reg = Reg(4);
    /// First concrete register
    pub const END: Reg = Reg(5);

    const GENERICS: [Reg; 4] = [Reg::PC, Reg::FP, Reg::SP, Reg::FLAGS];

    /// The `index`th register of the installed register set
    #[must_use]
    pub fn concrete(index: usize) -> Reg
    {
        let index = u32::try_from(index).unwrap_or(u32::MAX - Reg::END.0);
        Reg(Reg::END.0.saturating_add(index))
    }

    /// Whether this is one of the generic registers
    #[must_use]
    pub fn is_generic(self) -> bool
    {
        Reg::GENERICS.contains(&self)
    }

    /// Position in the register set, for concrete registers
    #[must_use]
    pub fn index(self) -> Option<usize>
    {
        self.0.checked_sub(Reg::END.0).and_then(|i| usize::try_from(i).ok())
    }
}

impl fmt::Display for Reg
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match *self {
            Reg::INVALID => write!(f, "<invalid>"),
            Reg::PC => write!(f, "pc"),
            Reg::FP => write!(f, "fp"),
            Reg::SP => write!(f, "sp"),
            Reg::FLAGS => write!(f, "flags"),
            Reg(n) => write!(f, "r{}", n - Reg::END.0),
        }
    }
}

/// Identifier of a loaded image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageId(pub u64);

/// OS process identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessId(pub u32);

impl From<u32> for ProcessId
{
    fn from(pid: u32) -> Self
    {
        ProcessId(pid)
    }
}

impl fmt::Display for ProcessId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.0)
    }
}

/// Operating system and pointer width of the target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Os
{
    #[default]
    Invalid,
    Linux32,
    Linux64,
    Windows32,
    Windows64,
    Mac32,
    Mac64,
}

impl Os
{
    /// The OS this program runs on
    #[must_use]
    pub fn host() -> Os
    {
        let wide = cfg!(target_pointer_width = "64");
        if cfg!(target_os = "linux") {
            if wide { Os::Linux64 } else { Os::Linux32 }
        } else if cfg!(target_os = "windows") {
            if wide { Os::Windows64 } else { Os::Windows32 }
        } else if cfg!(target_os = "macos") {
            if wide { Os::Mac64 } else { Os::Mac32 }
        } else {
            Os::Invalid
        }
    }

    /// Pointer width in bits, or 0 for [`Os::Invalid`]
    #[must_use]
    pub const fn pointer_bits(self) -> u32
    {
        match self {
            Os::Invalid => 0,
            Os::Linux32 | Os::Windows32 | Os::Mac32 => 32,
            Os::Linux64 | Os::Windows64 | Os::Mac64 => 64,
        }
    }
}

/// Kind of debugger driving the front-end
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FrontEndType
{
    #[default]
    Unknown,
    Gdb,
    Idb,
    VisualStudioVsdbg,
    VisualStudio,
}

/// Kind of system implementing the back-end
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BackEndType
{
    #[default]
    Unknown,
    /// A dynamic binary instrumentation engine
    Instrumentation,
    /// The in-process simulated target
    Simulator,
}

bitflags! {
    /// Transports to set up with [`initialize`](crate::initialize)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct InitializeFlags: u32 {
        const TCP = 1;
    }
}

bitflags! {
    /// Optional behaviour a front-end supports
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct FrontEndFeatures: u32 {
        /// Registers may be renegotiated from a target description
        const DYNAMIC_REGISTERS = 1 << 0;
        /// Several threads may report a stop reason at once
        const MULTIPLE_STOP_REASONS = 1 << 1;
        /// The front-end understands "no resumed threads" stops
        const NO_RESUMED = 1 << 2;
    }
}

bitflags! {
    /// Optional behaviour a back-end supports
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct BackEndFeatures: u32 {
        const BREAKPOINTS = 1 << 0;
        const CUSTOM_BREAKPOINTS = 1 << 1;
        const CUSTOM_COMMANDS = 1 << 2;
        const KILL_WITH_NOTIFICATION = 1 << 3;
        const TARGET_DESCRIPTION = 1 << 4;
        const EVENT_INTERCEPTION = 1 << 5;
        const IMAGE_EXTENSIONS = 1 << 6;
        const THREAD_EXTENSIONS = 1 << 7;
        /// Events may carry an OS-specific payload
        const EVENT_INFO = 1 << 8;
        /// Threads may be resumed with a different event than the one
        /// they stopped with
        const CONTINUE_WITH_NEW_EVENT = 1 << 9;
        const PROCESS_INFO = 1 << 10;
    }
}

bitflags! {
    /// Options tuning one endpoint's transport
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct EndpointOptions: u32 {
        /// Accepted for compatibility; frames are never compressed
        const NO_COMPRESSION = 1 << 0;
        /// Listen on every interface instead of loopback only
        const ALLOW_REMOTE_CLIENTS = 1 << 1;
        /// Stop notifications always name the focus thread
        const ALWAYS_SEND_THREAD = 1 << 2;
        /// Stop notifications carry the focus thread's stop reason
        const SEND_STOP_REASON = 1 << 3;
        /// No upper bound on frame length
        const UNLIMITED_LENGTH_PACKETS = 1 << 4;
    }
}

bitflags! {
    /// Image events that stop the target
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct ImageNotifications: u32 {
        const LOAD = 1 << 0;
        const UNLOAD = 1 << 1;
    }
}

bitflags! {
    /// Thread lifecycle events that stop the target
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct ThreadNotifications: u32 {
        const START = 1 << 0;
        const EXIT = 1 << 1;
    }
}

bitflags! {
    /// Cached state a front-end should forget
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct InvalidateFlags: u32 {
        const REGISTERS = 1 << 0;
    }
}

/// How a thread behaves at the next resume
///
/// The `*SquashEvent`, `*PassEvent` and `*NewEvent` variants decide what
/// happens to the event a thread stopped with: it is discarded, delivered
/// to the target's handler, or replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ContinueMode
{
    /// Stay stopped
    #[default]
    Frozen,
    GoSquashEvent,
    GoPassEvent,
    GoNewEvent,
    StepSquashEvent,
    StepPassEvent,
    StepNewEvent,
}

impl ContinueMode
{
    /// Whether the thread stays stopped
    #[must_use]
    pub const fn is_frozen(self) -> bool
    {
        matches!(self, ContinueMode::Frozen)
    }

    /// Whether the thread executes a single instruction
    #[must_use]
    pub const fn is_step(self) -> bool
    {
        matches!(
            self,
            ContinueMode::StepSquashEvent | ContinueMode::StepPassEvent | ContinueMode::StepNewEvent
        )
    }

    /// Whether the pending event is discarded
    #[must_use]
    pub const fn squashes_event(self) -> bool
    {
        matches!(self, ContinueMode::GoSquashEvent | ContinueMode::StepSquashEvent)
    }

    /// Whether the pending event is delivered to the target
    #[must_use]
    pub const fn passes_event(self) -> bool
    {
        matches!(self, ContinueMode::GoPassEvent | ContinueMode::StepPassEvent)
    }

    /// Whether the thread resumes with a caller supplied event
    #[must_use]
    pub const fn needs_new_event(self) -> bool
    {
        matches!(self, ContinueMode::GoNewEvent | ContinueMode::StepNewEvent)
    }
}

/// Why a thread stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum StopReason
{
    /// The thread hasn't stopped yet
    #[default]
    Invalid,
    /// Hit a breakpoint set through the breakpoints capability
    Breakpoint,
    /// Hit a back-end defined breakpoint; see the custom-breakpoint message
    CustomBreak,
    /// Stopped because another thread stopped
    Stopped,
    /// Completed a single step
    Step,
    /// Received an event
    Event,
    /// Just started
    ThreadStart,
    /// About to exit
    ThreadExit,
    /// An image was loaded
    ImageLoad,
    /// An image is about to be unloaded
    ImageUnload,
    /// Several images changed at once
    ImageMultiple,
}

/// Optional capability interfaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InterfaceId
{
    Breakpoints,
    CustomBreakpoints,
    CustomCommands,
    KillWithNotification,
    TargetDescription,
    EventInterception,
    ImageExtensions,
    ThreadExtensions,
    ProcessInfo,
}

impl InterfaceId
{
    /// Every capability interface
    pub const ALL: [InterfaceId; 9] = [
        InterfaceId::Breakpoints,
        InterfaceId::CustomBreakpoints,
        InterfaceId::CustomCommands,
        InterfaceId::KillWithNotification,
        InterfaceId::TargetDescription,
        InterfaceId::EventInterception,
        InterfaceId::ImageExtensions,
        InterfaceId::ThreadExtensions,
        InterfaceId::ProcessInfo,
    ];

    /// Back-end feature that must be advertised for the interface to exist
    #[must_use]
    pub const fn required_feature(self) -> BackEndFeatures
    {
        match self {
            InterfaceId::Breakpoints => BackEndFeatures::BREAKPOINTS,
            InterfaceId::CustomBreakpoints => BackEndFeatures::CUSTOM_BREAKPOINTS,
            InterfaceId::CustomCommands => BackEndFeatures::CUSTOM_COMMANDS,
            InterfaceId::KillWithNotification => BackEndFeatures::KILL_WITH_NOTIFICATION,
            InterfaceId::TargetDescription => BackEndFeatures::TARGET_DESCRIPTION,
            InterfaceId::EventInterception => BackEndFeatures::EVENT_INTERCEPTION,
            InterfaceId::ImageExtensions => BackEndFeatures::IMAGE_EXTENSIONS,
            InterfaceId::ThreadExtensions => BackEndFeatures::THREAD_EXTENSIONS,
            InterfaceId::ProcessInfo => BackEndFeatures::PROCESS_INFO,
        }
    }
}

/// Session mode
///
/// ```text
/// Disconnected --connect + initial stop--> CommandMode
/// CommandMode  --continue-->               RunMode
/// RunMode      --stop notification-->      CommandMode
/// RunMode      --exit notification-->      Disconnected
/// CommandMode  --kill / detach-->          Disconnected
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SessionState
{
    #[default]
    Disconnected,
    /// Target stopped, the front-end may issue commands
    CommandMode,
    /// Target running, only notifications and break are valid
    RunMode,
}

impl fmt::Display for SessionState
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            SessionState::Disconnected => write!(f, "disconnected state"),
            SessionState::CommandMode => write!(f, "command mode"),
            SessionState::RunMode => write!(f, "run mode"),
        }
    }
}

/// Outcome of an interruptible blocking call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Completion
{
    Ok,
    Interrupted,
}

/// How a back-end command session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum SessionEnd
{
    /// The target process terminated
    Terminated,
    /// The front-end detached
    Detached,
    /// Another thread interrupted the command loop
    Interrupted,
}

/// Outcome of one front-end notification poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum NotifyOutcome
{
    /// A notification was delivered to the receiver
    Dispatched,
    /// Nothing arrived
    NoNotification,
    /// Another thread interrupted the wait
    Interrupted,
}

/// Transport used by an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionType
{
    #[default]
    None,
    TcpServer,
    TcpClient,
}

/// Transport parameters for an endpoint
///
/// A server binds `tcp_port` (`0` picks a free port). A client connects to
/// `tcp_host:tcp_port`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectionProperties
{
    pub kind: ConnectionType,
    pub tcp_port: u16,
    pub tcp_host: String,
}

impl ConnectionProperties
{
    /// Properties for a server listening on `port`
    #[must_use]
    pub fn tcp_server(port: u16) -> Self
    {
        Self {
            kind: ConnectionType::TcpServer,
            tcp_port: port,
            tcp_host: String::new(),
        }
    }

    /// Properties for a client connecting to `host:port`
    #[must_use]
    pub fn tcp_client(host: impl Into<String>, port: u16) -> Self
    {
        Self {
            kind: ConnectionType::TcpClient,
            tcp_port: port,
            tcp_host: host.into(),
        }
    }
}

/// Where a server endpoint is listening
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpInfo
{
    pub local_port: u16,
}

/// Description of one register of the target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegDescription
{
    /// Width in bits, a non-zero multiple of 8
    pub width_bits: u32,
    /// Generic register this register stands for, or [`Reg::INVALID`]
    pub generic: Reg,
    /// Sent along with every stop notification
    pub accelerated: bool,
    /// Name as reported to the debugger
    pub name: String,
    /// Register number in the compiler's debug information
    pub compiler_id: Option<u32>,
}

impl RegDescription
{
    /// A plain register with no generic alias
    #[must_use]
    pub fn new(name: impl Into<String>, width_bits: u32) -> Self
    {
        Self {
            width_bits,
            generic: Reg::INVALID,
            accelerated: false,
            name: name.into(),
            compiler_id: None,
        }
    }

    /// Mark this register as the generic register `generic`.
    #[must_use]
    pub fn generic(mut self, generic: Reg) -> Self
    {
        self.generic = generic;
        self
    }

    /// Mark this register as sent with every stop.
    #[must_use]
    pub fn accelerated(mut self) -> Self
    {
        self.accelerated = true;
        self
    }

    /// Set the compiler's register number.
    #[must_use]
    pub fn compiler_id(mut self, id: u32) -> Self
    {
        self.compiler_id = Some(id);
        self
    }
}

/// Validated register set installed on an endpoint
///
/// The `i`th description is register [`Reg::concrete`]`(i)`. Exactly one
/// register maps to [`Reg::PC`]; the other generic registers are optional.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterSet
{
    regs: Vec<RegDescription>,
    generics: [Reg; 4],
}

impl RegisterSet
{
    /// Validate `regs` and build the set.
    ///
    /// ## Errors
    ///
    /// Returns [`ProtocolError::InvalidRegisterSet`] if the list is empty,
    /// a width isn't a non-zero multiple of 8, a name is empty or repeated,
    /// a generic register is mapped twice or onto a non-generic ID, or no
    /// register maps to the program counter.
    pub fn new(regs: Vec<RegDescription>) -> ProtocolResult<Self>
    {
        let invalid = |msg: String| Err(ProtocolError::InvalidRegisterSet(msg));
        if regs.is_empty() {
            return invalid("no registers".to_string());
        }

        let mut generics = [Reg::INVALID; 4];
        let mut names = HashSet::new();
        for (i, desc) in regs.iter().enumerate() {
            if desc.width_bits == 0 || desc.width_bits % 8 != 0 {
                return invalid(format!("{} has width {}", desc.name, desc.width_bits));
            }
            if desc.name.is_empty() {
                return invalid(format!("register {i} has no name"));
            }
            if !names.insert(desc.name.as_str()) {
                return invalid(format!("duplicate register {}", desc.name));
            }
            if desc.generic == Reg::INVALID {
                continue;
            }
            if !desc.generic.is_generic() {
                return invalid(format!("{} maps to non-generic {}", desc.name, desc.generic));
            }
            let slot = &mut generics[(desc.generic.0 - Reg::PC.0) as usize];
            if *slot != Reg::INVALID {
                return invalid(format!("{} is mapped twice", desc.generic));
            }
            *slot = Reg::concrete(i);
        }
        if generics[0] == Reg::INVALID {
            return invalid("no register maps to pc".to_string());
        }

        Ok(Self { regs, generics })
    }

    /// Number of concrete registers
    #[must_use]
    pub fn len(&self) -> usize
    {
        self.regs.len()
    }

    /// Always false; a valid set has at least one register
    #[must_use]
    pub fn is_empty(&self) -> bool
    {
        self.regs.is_empty()
    }

    /// Translate a generic register to its concrete register.
    ///
    /// Concrete registers are returned unchanged.
    ///
    /// ## Errors
    ///
    /// Returns [`ProtocolError::InvalidRegister`] if the register isn't in
    /// the set or is a generic register the set doesn't map.
    pub fn resolve(&self, reg: Reg) -> ProtocolResult<Reg>
    {
        let resolved = if reg.is_generic() {
            self.generics[(reg.0 - Reg::PC.0) as usize]
        } else {
            reg
        };
        match resolved.index() {
            Some(i) if i < self.regs.len() => Ok(resolved),
            _ => Err(ProtocolError::InvalidRegister(reg)),
        }
    }

    /// Description of a register, generic or concrete
    #[must_use]
    pub fn description(&self, reg: Reg) -> Option<&RegDescription>
    {
        let index = self.resolve(reg).ok()?.index()?;
        self.regs.get(index)
    }

    /// Concrete register with the given name
    #[must_use]
    pub fn find(&self, name: &str) -> Option<Reg>
    {
        self.regs.iter().position(|d| d.name == name).map(Reg::concrete)
    }

    /// Registers with their IDs, in set order
    pub fn iter(&self) -> impl Iterator<Item = (Reg, &RegDescription)>
    {
        self.regs.iter().enumerate().map(|(i, d)| (Reg::concrete(i), d))
    }

    /// Registers sent with every stop notification
    pub fn accelerated(&self) -> impl Iterator<Item = Reg> + '_
    {
        self.iter().filter(|(_, d)| d.accelerated).map(|(r, _)| r)
    }
}

/// Result of a custom command
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CustomCommandReply
{
    /// Whether the back-end knew the command
    pub recognized: bool,
    /// Text to show the user
    pub response: String,
}

/// A loaded image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInfo
{
    /// Path of the image file
    pub name: String,
    /// Address range the image occupies
    pub range: AnyRange,
}

/// OS level information about a thread
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ThreadInfo
{
    /// Thread name, if the OS has one
    pub name: String,
    /// OS thread ID (e.g. the Linux TID)
    pub os_id: u64,
}

#[cfg(test)]
mod tests
{
    use super::*;

    fn sample_regs() -> Vec<RegDescription>
    {
        vec![
            RegDescription::new("rax", 64),
            RegDescription::new("rsp", 64).generic(Reg::SP),
            RegDescription::new("rip", 64).generic(Reg::PC).accelerated(),
        ]
    }

    #[test]
    fn test_register_set_resolves_generics()
    {
        let set = RegisterSet::new(sample_regs()).unwrap();
        assert_eq!(set.resolve(Reg::PC).unwrap(), Reg::concrete(2));
        assert_eq!(set.resolve(Reg::SP).unwrap(), Reg::concrete(1));
        assert_eq!(set.resolve(Reg::concrete(0)).unwrap(), Reg::concrete(0));
        assert!(matches!(set.resolve(Reg::FP), Err(ProtocolError::InvalidRegister(Reg::FP))));
        assert!(set.resolve(Reg::concrete(3)).is_err());
        assert_eq!(set.description(Reg::PC).unwrap().name, "rip");
        assert_eq!(set.accelerated().collect::<Vec<_>>(), vec![Reg::concrete(2)]);
        assert_eq!(set.find("rsp"), Some(Reg::concrete(1)));
    }

    #[test]
    fn test_register_set_validation()
    {
        let mut odd = sample_regs();
        odd[0].width_bits = 12;
        assert!(RegisterSet::new(odd).is_err());

        let mut twice = sample_regs();
        twice[0].generic = Reg::PC;
        assert!(RegisterSet::new(twice).is_err());

        let no_pc = vec![RegDescription::new("rax", 64)];
        assert!(RegisterSet::new(no_pc).is_err());

        let mut dup = sample_regs();
        dup[1].name = "rax".to_string();
        assert!(RegisterSet::new(dup).is_err());

        assert!(RegisterSet::new(Vec::new()).is_err());
    }

    #[test]
    fn test_reg_display_and_index()
    {
        assert_eq!(Reg::PC.to_string(), "pc");
        assert_eq!(Reg::concrete(3).to_string(), "r3");
        assert_eq!(Reg::concrete(3).index(), Some(3));
        assert_eq!(Reg::SP.index(), None);
    }

    #[test]
    fn test_continue_mode_classes()
    {
        assert!(ContinueMode::default().is_frozen());
        assert!(ContinueMode::StepNewEvent.is_step());
        assert!(ContinueMode::StepNewEvent.needs_new_event());
        assert!(ContinueMode::GoSquashEvent.squashes_event());
        assert!(ContinueMode::GoPassEvent.passes_event());
        assert!(!ContinueMode::GoPassEvent.is_step());
    }

    #[test]
    fn test_feature_flags_serialize_by_name()
    {
        let f = BackEndFeatures::BREAKPOINTS | BackEndFeatures::PROCESS_INFO;
        let json = serde_json::to_string(&f).unwrap();
        let back: BackEndFeatures = serde_json::from_str(&json).unwrap();
        assert_eq!(back, f);
    }

    #[test]
    fn test_interface_feature_mapping()
    {
        for id in InterfaceId::ALL {
            assert_eq!(id.required_feature().bits().count_ones(), 1, "{id:?}");
        }
    }
}
