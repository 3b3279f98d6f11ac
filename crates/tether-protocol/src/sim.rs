//! # Simulated Target
//!
//! [`SimTarget`] is an in-process target for a [`BackEnd`](crate::BackEnd).
//! It has no real CPU. Each thread has a program counter that advances in
//! fixed-size instructions, and a resumed thread runs until it reaches a
//! breakpoint or an address with a scripted [`Action`]. It is enough to
//! drive every command and notification of a session, which makes it the
//! back-end of the `tether demo` command and of the integration tests.
//!
//! Threads that reach their stop at the same instruction count stop
//! together, so simultaneous stops and their replay can be exercised.
//!
//! ## Example
//!
//! ```rust
//! use tether_protocol::event::{linux, EventDetails};
//! use tether_protocol::sim::{Action, SimTarget, CODE_BASE, INSTRUCTION_LEN};
//!
//! let mut target = SimTarget::new();
//! target.script(CODE_BASE + 4 * INSTRUCTION_LEN, Action::Event(EventDetails::new(linux::SIGUSR1)));
//! target.script(CODE_BASE + 8 * INSTRUCTION_LEN, Action::ProcessExit(0));
//! assert_eq!(target.thread_ids().len(), 1);
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Write as _;

use tether_core::{AnyAddr, AnyRange, DataBuf, RegValue};
use tracing::{debug, info, trace};

use crate::backend::NotificationSender;
use crate::commands::{
    Breakpoints, Commands, CustomBreakpoints, CustomCommands, EventInterception, ImageExtensions,
    KillWithNotification, Notifications, ProcessInfo, TargetDescription, ThreadExtensions,
};
use crate::error::{ProtocolError, ProtocolResult};
use crate::event::{Event, EventDetails};
use crate::stops::{StopMode, StopQueue, ThreadStop};
use crate::types::{
    ContinueMode, CustomCommandReply, ImageId, ImageInfo, ImageNotifications, ProcessId, Reg, RegDescription,
    RegisterSet, StopReason, ThreadId, ThreadInfo, ThreadNotifications,
};

/// Load address of the simulated program
pub const CODE_BASE: AnyAddr = 0x40_0000;
/// Size of the simulated program image
pub const CODE_SIZE: u64 = 0x1_0000;
/// Bytes per simulated instruction
pub const INSTRUCTION_LEN: u64 = 4;
/// Start of the only mapped data region
pub const MEMORY_BASE: AnyAddr = 0x60_0000;
/// Size of the mapped data region
pub const MEMORY_SIZE: usize = 0x1_0000;
/// Process ID the target reports
pub const SIM_PID: u32 = 4242;

const MAIN_THREAD: ThreadId = ThreadId(1);
const MAIN_IMAGE: ImageId = ImageId(1);

struct RegLayout
{
    name: &'static str,
    width_bits: u32,
    generic: Reg,
    accelerated: bool,
    dwarf: u32,
}

const fn layout(name: &'static str, width_bits: u32, generic: Reg, accelerated: bool, dwarf: u32) -> RegLayout
{
    RegLayout {
        name,
        width_bits,
        generic,
        accelerated,
        dwarf,
    }
}

const LAYOUT: [RegLayout; 13] = [
    layout("rax", 64, Reg::INVALID, false, 0),
    layout("rbx", 64, Reg::INVALID, false, 3),
    layout("rcx", 64, Reg::INVALID, false, 2),
    layout("rdx", 64, Reg::INVALID, false, 1),
    layout("rsi", 64, Reg::INVALID, false, 4),
    layout("rdi", 64, Reg::INVALID, false, 5),
    layout("rbp", 64, Reg::FP, false, 6),
    layout("rsp", 64, Reg::SP, true, 7),
    layout("rip", 64, Reg::PC, true, 16),
    layout("eflags", 32, Reg::FLAGS, false, 49),
    layout("xmm0", 128, Reg::INVALID, false, 17),
    layout("ymm0", 256, Reg::INVALID, false, 67),
    layout("st0", 80, Reg::INVALID, false, 33),
];

/// Registers of the simulated target, laid out like x86-64
///
/// ## Errors
///
/// Never fails in practice; the layout is validated like any other.
pub fn register_set() -> ProtocolResult<RegisterSet>
{
    let regs = LAYOUT
        .iter()
        .map(|l| {
            let mut desc = RegDescription::new(l.name, l.width_bits).compiler_id(l.dwarf);
            if l.generic != Reg::INVALID {
                desc = desc.generic(l.generic);
            }
            if l.accelerated {
                desc = desc.accelerated();
            }
            desc
        })
        .collect();
    RegisterSet::new(regs)
}

fn index_of(name: &str) -> usize
{
    LAYOUT.iter().position(|l| l.name == name).unwrap_or_default()
}

/// Something that happens when a thread reaches a scripted address
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action
{
    /// The thread receives an event
    Event(EventDetails),
    /// The thread hits a back-end breakpoint
    CustomBreak(String),
    /// The thread exits with a status
    ThreadExit(i64),
    /// The process exits with a status
    ProcessExit(i64),
    /// The process is killed by an event
    Terminate(EventDetails),
    LoadImage(ImageInfo),
    UnloadImage(ImageId),
    /// A new thread starts at `entry`
    SpawnThread
    {
        name: String,
        entry: AnyAddr,
    },
}

/// How the process ended
#[derive(Debug, Clone)]
enum Termination
{
    Exit(i64),
    Event(EventDetails),
}

/// What ended a thread's run
#[derive(Debug, Clone, Copy)]
enum Hit
{
    Step,
    Breakpoint(AnyAddr),
    Script(AnyAddr),
}

#[derive(Debug, Clone)]
struct SimThread
{
    name: String,
    os_id: u64,
    pc: AnyAddr,
    regs: HashMap<Reg, RegValue>,
    mode: ContinueMode,
    new_event: Option<EventDetails>,
    stop_event: EventDetails,
    stop_message: String,
    stop_image: ImageId,
    exit_status: Option<i64>,
}

impl SimThread
{
    fn new(name: impl Into<String>, os_id: u64, pc: AnyAddr, stack: AnyAddr) -> Self
    {
        let mut regs = HashMap::new();
        for (i, l) in LAYOUT.iter().enumerate() {
            regs.insert(Reg::concrete(i), RegValue::from_u64(0, l.width_bits));
        }
        regs.insert(Reg::concrete(index_of("rsp")), RegValue::from_u64(stack, 64));
        regs.insert(Reg::concrete(index_of("rbp")), RegValue::from_u64(stack, 64));
        regs.insert(Reg::concrete(index_of("eflags")), RegValue::from_u64(0x202, 32));
        let mut thread = Self {
            name: name.into(),
            os_id,
            pc,
            regs,
            mode: ContinueMode::Frozen,
            new_event: None,
            stop_event: EventDetails::default(),
            stop_message: String::new(),
            stop_image: ImageId::default(),
            exit_status: None,
        };
        thread.sync_pc();
        thread
    }

    fn sync_pc(&mut self)
    {
        self.regs
            .insert(Reg::concrete(index_of("rip")), RegValue::from_u64(self.pc, 64));
    }
}

/// In-process target driven by a back-end
#[derive(Debug)]
pub struct SimTarget
{
    sender: Option<NotificationSender>,
    threads: BTreeMap<ThreadId, SimThread>,
    exited: HashMap<ThreadId, i64>,
    next_thread: u64,
    breakpoints: BTreeMap<AnyAddr, usize>,
    script: BTreeMap<AnyAddr, Action>,
    queue: StopQueue,
    focus: Option<ThreadId>,
    running: Vec<ThreadId>,
    memory: Vec<u8>,
    images: BTreeMap<ImageId, ImageInfo>,
    next_image: u64,
    image_notifications: ImageNotifications,
    thread_notifications: ThreadNotifications,
    not_intercepted: HashSet<Event>,
    delivered: Vec<(ThreadId, Event)>,
    killed: bool,
}

impl Default for SimTarget
{
    fn default() -> Self
    {
        Self::new()
    }
}

impl SimTarget
{
    /// A target with one thread stopped at [`CODE_BASE`]
    #[must_use]
    pub fn new() -> Self
    {
        let mut images = BTreeMap::new();
        images.insert(
            MAIN_IMAGE,
            ImageInfo {
                name: "sim.elf".to_string(),
                range: AnyRange::new(CODE_BASE, CODE_SIZE),
            },
        );
        let mut target = Self {
            sender: None,
            threads: BTreeMap::new(),
            exited: HashMap::new(),
            next_thread: MAIN_THREAD.0,
            breakpoints: BTreeMap::new(),
            script: BTreeMap::new(),
            queue: StopQueue::default(),
            focus: None,
            running: Vec::new(),
            memory: vec![0; MEMORY_SIZE],
            images,
            next_image: MAIN_IMAGE.0 + 1,
            image_notifications: ImageNotifications::empty(),
            thread_notifications: ThreadNotifications::empty(),
            not_intercepted: HashSet::new(),
            delivered: Vec::new(),
            killed: false,
        };
        target.spawn("main", CODE_BASE);
        target
    }

    /// Connect the target to its back-end's notification channel
    pub fn attach(&mut self, sender: NotificationSender)
    {
        self.sender = Some(sender);
    }

    /// Choose how simultaneous stops are reported, usually from the
    /// front-end's features
    pub fn set_stop_mode(&mut self, mode: StopMode)
    {
        self.queue.set_mode(mode);
    }

    /// Add a stopped thread at `pc`
    pub fn spawn(&mut self, name: impl Into<String>, pc: AnyAddr) -> ThreadId
    {
        let id = ThreadId(self.next_thread);
        self.next_thread += 1;
        let stack = MEMORY_BASE + MEMORY_SIZE as u64 - 0x100 * id.0;
        self.threads.insert(id, SimThread::new(name, 1000 + id.0, pc, stack));
        debug!(thread = %id, pc = format_args!("{pc:#x}"), "Simulated thread created");
        id
    }

    /// Trigger `action` when any thread reaches `addr`. Each action fires
    /// once.
    pub fn script(&mut self, addr: AnyAddr, action: Action)
    {
        self.script.insert(addr, action);
    }

    /// Report the first stop after a front-end connected.
    ///
    /// ## Errors
    ///
    /// Fails if the target isn't attached or the back-end rejects the
    /// report.
    pub fn report_initial_stop(&mut self) -> ProtocolResult<()>
    {
        let focus = self.threads.keys().next().copied().unwrap_or(MAIN_THREAD);
        self.queue.set_reason(focus, StopReason::Stopped);
        self.focus = Some(focus);
        self.sender()?.notify_stopped(focus)
    }

    #[must_use]
    pub fn thread_ids(&self) -> Vec<ThreadId>
    {
        self.threads.keys().copied().collect()
    }

    #[must_use]
    pub fn pc(&self, thread: ThreadId) -> Option<AnyAddr>
    {
        self.threads.get(&thread).map(|t| t.pc)
    }

    /// Events handed to the target's own handlers, in order
    #[must_use]
    pub fn delivered_events(&self) -> &[(ThreadId, Event)]
    {
        &self.delivered
    }

    /// Whether any thread is running
    #[must_use]
    pub fn is_running(&self) -> bool
    {
        !self.running.is_empty()
    }

    #[must_use]
    pub fn is_killed(&self) -> bool
    {
        self.killed
    }

    fn sender(&self) -> ProtocolResult<NotificationSender>
    {
        self.sender
            .clone()
            .ok_or(ProtocolError::NotInitialized("simulated target is not attached"))
    }

    fn thread(&self, thread: ThreadId) -> ProtocolResult<&SimThread>
    {
        self.threads
            .get(&thread)
            .ok_or_else(|| ProtocolError::InvalidArgument(format!("no {thread}")))
    }

    fn thread_mut(&mut self, thread: ThreadId) -> ProtocolResult<&mut SimThread>
    {
        self.threads
            .get_mut(&thread)
            .ok_or_else(|| ProtocolError::InvalidArgument(format!("no {thread}")))
    }

    fn resolve(reg: Reg) -> ProtocolResult<(Reg, u32)>
    {
        let index = if reg.is_generic() {
            LAYOUT.iter().position(|l| l.generic == reg)
        } else {
            reg.index().filter(|i| *i < LAYOUT.len())
        };
        index
            .map(|i| (Reg::concrete(i), LAYOUT[i].width_bits))
            .ok_or(ProtocolError::InvalidRegister(reg))
    }

    /// Clip `range` to the mapped data region. Returns the offset into
    /// the region and the length.
    fn mapped(base: AnyAddr, len: u64) -> Option<(usize, usize)>
    {
        let offset = usize::try_from(base.checked_sub(MEMORY_BASE)?).ok()?;
        if offset >= MEMORY_SIZE {
            return None;
        }
        let len = usize::try_from(len).unwrap_or(usize::MAX).min(MEMORY_SIZE - offset);
        Some((offset, len))
    }

    /// Next stop of a resumed thread, with its distance
    fn next_hit(&self, thread: &SimThread) -> Option<(u64, Hit)>
    {
        // Nothing lies past the top of the address space.
        if thread.mode.is_step() {
            return thread.pc.checked_add(INSTRUCTION_LEN).map(|_| (INSTRUCTION_LEN, Hit::Step));
        }
        let after = thread.pc.checked_add(1)?;
        let bp = self.breakpoints.range(after..).next().map(|(a, _)| (*a, Hit::Breakpoint(*a)));
        let sc = self.script.range(after..).next().map(|(a, _)| (*a, Hit::Script(*a)));
        let (addr, hit) = match (bp, sc) {
            (Some(b), Some(s)) => {
                if s.0 <= b.0 {
                    s
                } else {
                    b
                }
            }
            (b, s) => b.or(s)?,
        };
        Some((addr - thread.pc, hit))
    }

    /// Apply the continue modes' event handling to resumed threads.
    fn dispose_events(&mut self, resuming: &[ThreadId])
    {
        for id in resuming {
            let Some(thread) = self.threads.get_mut(id) else {
                continue;
            };
            let event = if thread.mode.needs_new_event() {
                thread.new_event.take().map(|e| e.event)
            } else if thread.mode.passes_event() && thread.stop_event.event != Event::NONE {
                Some(thread.stop_event.event)
            } else {
                None
            };
            if let Some(event) = event {
                debug!(thread = %id, event = %event, "Delivering event to target");
                self.delivered.push((*id, event));
            }
            thread.stop_event = EventDetails::default();
        }
    }

    fn reap_exited(&mut self)
    {
        let gone: Vec<ThreadId> = self
            .threads
            .iter()
            .filter(|(_, t)| t.exit_status.is_some())
            .map(|(id, _)| *id)
            .collect();
        for id in gone {
            if let Some(thread) = self.threads.remove(&id) {
                self.exited.insert(id, thread.exit_status.unwrap_or_default());
                self.queue.forget_thread(id);
            }
        }
    }

    fn freeze_all(&mut self)
    {
        for thread in self.threads.values_mut() {
            thread.mode = ContinueMode::Frozen;
            thread.new_event = None;
        }
    }

    /// Run the resumed threads until something stops them.
    fn run(&mut self, mut resuming: Vec<ThreadId>) -> ProtocolResult<()>
    {
        let mut sender = self.sender()?;
        let reported = resuming.clone();
        loop {
            let hits: Vec<(ThreadId, u64, Hit)> = resuming
                .iter()
                .filter_map(|id| {
                    let thread = self.threads.get(id)?;
                    self.next_hit(thread).map(|(distance, hit)| (*id, distance, hit))
                })
                .collect();
            let Some(distance) = hits.iter().map(|(_, d, _)| *d).min() else {
                debug!(threads = ?resuming, "Running until interrupted");
                self.running = reported;
                return Ok(());
            };

            for id in &resuming {
                if let Some(thread) = self.threads.get_mut(id) {
                    thread.pc = thread.pc.saturating_add(distance);
                    thread.sync_pc();
                }
            }

            let mut stops = Vec::new();
            for (id, _, hit) in hits.into_iter().filter(|(_, d, _)| *d == distance) {
                match hit {
                    Hit::Step => stops.push(ThreadStop::new(id, StopReason::Step)),
                    Hit::Breakpoint(addr) => stops.push(ThreadStop::breakpoint(id, addr)),
                    Hit::Script(addr) => {
                        let Some(action) = self.script.remove(&addr) else {
                            continue;
                        };
                        if let Some(end) = self.perform(id, action, &mut stops, &mut resuming) {
                            info!(end = ?end, "Simulated process ended");
                            self.running.clear();
                            self.threads.clear();
                            return match end {
                                Termination::Exit(code) => sender.notify_terminated_exit(code),
                                Termination::Event(event) => sender.notify_terminated_event(event),
                            };
                        }
                    }
                }
            }

            if stops.is_empty() {
                if self.threads.is_empty() {
                    info!("Last simulated thread exited");
                    return sender.notify_terminated_exit(0);
                }
                trace!(pc_advance = distance, "No reportable stop; still running");
                continue;
            }

            let Some(focus) = self.queue.report(&reported, stops) else {
                continue;
            };
            self.freeze_all();
            self.running.clear();
            self.focus = Some(focus);
            return sender.notify_stopped(focus);
        }
    }

    /// Carry out a scripted action. Returns how the process ended, if it
    /// did.
    fn perform(
        &mut self,
        id: ThreadId,
        action: Action,
        stops: &mut Vec<ThreadStop>,
        resuming: &mut Vec<ThreadId>,
    ) -> Option<Termination>
    {
        debug!(thread = %id, action = ?action, "Scripted action");
        match action {
            Action::ProcessExit(code) => return Some(Termination::Exit(code)),
            Action::Terminate(event) => return Some(Termination::Event(event)),
            Action::Event(details) => {
                if self.not_intercepted.contains(&details.event) {
                    self.delivered.push((id, details.event));
                } else if let Some(thread) = self.threads.get_mut(&id) {
                    thread.stop_event = details;
                    stops.push(ThreadStop::new(id, StopReason::Event));
                }
            }
            Action::CustomBreak(message) => {
                if let Some(thread) = self.threads.get_mut(&id) {
                    thread.stop_message = message;
                    stops.push(ThreadStop::new(id, StopReason::CustomBreak));
                }
            }
            Action::ThreadExit(code) => {
                if self.thread_notifications.contains(ThreadNotifications::EXIT) {
                    if let Some(thread) = self.threads.get_mut(&id) {
                        thread.exit_status = Some(code);
                    }
                    stops.push(ThreadStop::new(id, StopReason::ThreadExit));
                } else {
                    self.threads.remove(&id);
                    self.exited.insert(id, code);
                    self.queue.forget_thread(id);
                }
                resuming.retain(|t| *t != id);
            }
            Action::LoadImage(info) => {
                let image = ImageId(self.next_image);
                self.next_image += 1;
                self.images.insert(image, info);
                if self.image_notifications.contains(ImageNotifications::LOAD) {
                    if let Some(thread) = self.threads.get_mut(&id) {
                        thread.stop_image = image;
                    }
                    stops.push(ThreadStop::new(id, StopReason::ImageLoad));
                }
            }
            Action::UnloadImage(image) => {
                self.images.remove(&image);
                if self.image_notifications.contains(ImageNotifications::UNLOAD) {
                    if let Some(thread) = self.threads.get_mut(&id) {
                        thread.stop_image = image;
                    }
                    stops.push(ThreadStop::new(id, StopReason::ImageUnload));
                }
            }
            Action::SpawnThread { name, entry } => {
                let child = self.spawn(name, entry);
                if self.thread_notifications.contains(ThreadNotifications::START) {
                    stops.push(ThreadStop::new(child, StopReason::ThreadStart));
                }
            }
        }
        None
    }
}

impl Commands for SimTarget
{
    fn thread_count(&mut self) -> ProtocolResult<usize>
    {
        Ok(self.threads.len())
    }

    fn thread_id(&mut self, index: usize) -> ProtocolResult<ThreadId>
    {
        self.threads
            .keys()
            .nth(index)
            .copied()
            .ok_or_else(|| ProtocolError::InvalidArgument(format!("thread index {index}")))
    }

    fn focus_thread(&mut self) -> ProtocolResult<ThreadId>
    {
        self.focus
            .filter(|id| self.threads.contains_key(id))
            .or_else(|| self.threads.keys().next().copied())
            .ok_or(ProtocolError::TargetTerminated)
    }

    fn thread_exists(&mut self, thread: ThreadId) -> ProtocolResult<bool>
    {
        Ok(self.threads.contains_key(&thread))
    }

    fn set_continue_mode(&mut self, thread: ThreadId, mode: ContinueMode, event: Option<EventDetails>)
        -> ProtocolResult<()>
    {
        let thread = self.thread_mut(thread)?;
        thread.mode = mode;
        thread.new_event = event;
        Ok(())
    }

    fn continue_threads(&mut self) -> ProtocolResult<()>
    {
        self.reap_exited();
        let resuming: Vec<ThreadId> = self
            .threads
            .iter()
            .filter(|(_, t)| !t.mode.is_frozen())
            .map(|(id, _)| *id)
            .collect();
        if resuming.is_empty() {
            return Err(ProtocolError::AllThreadsFrozen);
        }
        let breakpoints = &self.breakpoints;
        if let Some(focus) = self
            .queue
            .take_replay(|t| resuming.contains(&t), |addr| breakpoints.contains_key(&addr))
        {
            // Nothing executes, so pending events stay with their threads.
            self.freeze_all();
            self.focus = Some(focus);
            return self.sender()?.notify_stopped(focus);
        }
        self.dispose_events(&resuming);
        self.run(resuming)
    }

    fn thread_stop_reason(&mut self, thread: ThreadId) -> ProtocolResult<StopReason>
    {
        self.thread(thread)?;
        Ok(self.queue.stop_reason(thread))
    }

    fn thread_stop_event(&mut self, thread: ThreadId) -> ProtocolResult<EventDetails>
    {
        Ok(self.thread(thread)?.stop_event.clone())
    }

    fn break_target(&mut self) -> ProtocolResult<()>
    {
        let Some(focus) = self.running.first().copied() else {
            return Ok(());
        };
        let running = std::mem::take(&mut self.running);
        self.queue
            .report(&running, [ThreadStop::new(focus, StopReason::Stopped)]);
        self.freeze_all();
        self.focus = Some(focus);
        info!(focus = %focus, "Simulated target broke in");
        self.sender()?.notify_stopped(focus)
    }

    fn kill(&mut self) -> ProtocolResult<()>
    {
        info!("Simulated target killed");
        self.threads.clear();
        self.running.clear();
        self.queue.clear();
        self.focus = None;
        self.killed = true;
        Ok(())
    }

    fn detach(&mut self) -> ProtocolResult<()>
    {
        info!("Detached from simulated target");
        self.breakpoints.clear();
        self.freeze_all();
        Ok(())
    }

    fn register_value(&mut self, thread: ThreadId, reg: Reg) -> ProtocolResult<RegValue>
    {
        let (reg, width) = Self::resolve(reg)?;
        let thread = self.thread(thread)?;
        Ok(thread
            .regs
            .get(&reg)
            .cloned()
            .unwrap_or_else(|| RegValue::from_u64(0, width)))
    }

    fn set_register_value(&mut self, thread: ThreadId, reg: Reg, value: &RegValue) -> ProtocolResult<()>
    {
        let (reg, width) = Self::resolve(reg)?;
        let thread = self.thread_mut(thread)?;
        let mut value = value.clone();
        value.resize(width);
        if reg == Reg::concrete(index_of("rip")) {
            thread.pc = value.value_as::<u64>();
        }
        thread.regs.insert(reg, value);
        Ok(())
    }

    fn memory_value(&mut self, range: AnyRange) -> ProtocolResult<DataBuf>
    {
        Ok(match Self::mapped(range.base(), range.size()) {
            Some((offset, len)) => DataBuf::from_slice(&self.memory[offset..offset + len]),
            None => DataBuf::new(),
        })
    }

    fn set_memory_value(&mut self, addr: AnyAddr, value: &DataBuf) -> ProtocolResult<usize>
    {
        let Some((offset, len)) = Self::mapped(addr, value.len() as u64) else {
            return Ok(0);
        };
        self.memory[offset..offset + len].copy_from_slice(&value.as_slice()[..len]);
        Ok(len)
    }

    fn breakpoints(&mut self) -> Option<&mut dyn Breakpoints>
    {
        Some(self)
    }

    fn custom_breakpoints(&mut self) -> Option<&mut dyn CustomBreakpoints>
    {
        Some(self)
    }

    fn custom_commands(&mut self) -> Option<&mut dyn CustomCommands>
    {
        Some(self)
    }

    fn kill_with_notification(&mut self) -> Option<&mut dyn KillWithNotification>
    {
        Some(self)
    }

    fn target_description(&mut self) -> Option<&mut dyn TargetDescription>
    {
        Some(self)
    }

    fn event_interception(&mut self) -> Option<&mut dyn EventInterception>
    {
        Some(self)
    }

    fn image_extensions(&mut self) -> Option<&mut dyn ImageExtensions>
    {
        Some(self)
    }

    fn thread_extensions(&mut self) -> Option<&mut dyn ThreadExtensions>
    {
        Some(self)
    }

    fn process_info(&mut self) -> Option<&mut dyn ProcessInfo>
    {
        Some(self)
    }
}

impl Breakpoints for SimTarget
{
    fn set_breakpoint(&mut self, addr: AnyAddr, size: usize) -> ProtocolResult<bool>
    {
        let code = AnyRange::new(CODE_BASE, CODE_SIZE);
        if !code.contains(addr) {
            return Ok(false);
        }
        self.breakpoints.insert(addr, size);
        Ok(true)
    }

    fn clear_breakpoint(&mut self, addr: AnyAddr) -> ProtocolResult<bool>
    {
        let removed = self.breakpoints.remove(&addr).is_some();
        if removed {
            self.queue.breakpoint_removed(addr);
        }
        Ok(removed)
    }
}

impl CustomBreakpoints for SimTarget
{
    fn thread_stop_message(&mut self, thread: ThreadId) -> ProtocolResult<String>
    {
        Ok(self.thread(thread)?.stop_message.clone())
    }
}

impl CustomCommands for SimTarget
{
    fn custom_command(&mut self, thread: ThreadId, command: &str) -> ProtocolResult<CustomCommandReply>
    {
        let mut words = command.split_whitespace();
        let response = match words.next() {
            Some("threads") => {
                let mut out = String::new();
                for (id, t) in &self.threads {
                    let _ = writeln!(out, "{id} {} pc={:#x}", t.name, t.pc);
                }
                out
            }
            Some("pc") => format!("{:#x}\n", self.thread(thread)?.pc),
            Some("echo") => format!("{}\n", words.collect::<Vec<_>>().join(" ")),
            _ => {
                return Ok(CustomCommandReply {
                    recognized: false,
                    response: String::new(),
                })
            }
        };
        Ok(CustomCommandReply {
            recognized: true,
            response,
        })
    }
}

impl KillWithNotification for SimTarget
{
    fn kill_with_notification(&mut self, exit_code: i64) -> ProtocolResult<()>
    {
        self.kill()?;
        self.sender()?.notify_terminated_exit(exit_code)
    }
}

impl TargetDescription for SimTarget
{
    fn target_description(&mut self, name: &str) -> ProtocolResult<DataBuf>
    {
        if name != "target.xml" {
            return Ok(DataBuf::new());
        }
        let mut xml = String::from("<?xml version=\"1.0\"?>\n<target version=\"1.0\">\n");
        xml.push_str("  <architecture>i386:x86-64</architecture>\n  <feature name=\"org.gnu.gdb.i386.core\">\n");
        for (i, l) in LAYOUT.iter().enumerate() {
            let _ = writeln!(
                xml,
                "    <reg name=\"{}\" bitsize=\"{}\" regnum=\"{i}\"/>",
                l.name, l.width_bits
            );
        }
        xml.push_str("  </feature>\n</target>\n");
        Ok(DataBuf::from_vec(xml.into_bytes()))
    }
}

impl EventInterception for SimTarget
{
    fn mark_event_not_intercepted(&mut self, event: Event) -> ProtocolResult<()>
    {
        self.not_intercepted.insert(event);
        Ok(())
    }

    fn mark_all_events_intercepted(&mut self) -> ProtocolResult<()>
    {
        self.not_intercepted.clear();
        Ok(())
    }
}

impl ImageExtensions for SimTarget
{
    fn set_image_notifications(&mut self, flags: ImageNotifications) -> ProtocolResult<()>
    {
        self.image_notifications = flags;
        Ok(())
    }

    fn image_count(&mut self) -> ProtocolResult<usize>
    {
        Ok(self.images.len())
    }

    fn image_id(&mut self, index: usize) -> ProtocolResult<ImageId>
    {
        self.images
            .keys()
            .nth(index)
            .copied()
            .ok_or_else(|| ProtocolError::InvalidArgument(format!("image index {index}")))
    }

    fn image_info(&mut self, image: ImageId) -> ProtocolResult<ImageInfo>
    {
        self.images
            .get(&image)
            .cloned()
            .ok_or_else(|| ProtocolError::InvalidArgument(format!("no image {}", image.0)))
    }

    fn thread_stop_image(&mut self, thread: ThreadId) -> ProtocolResult<ImageId>
    {
        Ok(self.thread(thread)?.stop_image)
    }
}

impl ThreadExtensions for SimTarget
{
    fn set_thread_notifications(&mut self, flags: ThreadNotifications) -> ProtocolResult<()>
    {
        self.thread_notifications = flags;
        Ok(())
    }

    fn thread_info(&mut self, thread: ThreadId) -> ProtocolResult<ThreadInfo>
    {
        let t = self.thread(thread)?;
        Ok(ThreadInfo {
            name: t.name.clone(),
            os_id: t.os_id,
        })
    }

    fn thread_exit_status(&mut self, thread: ThreadId) -> ProtocolResult<i64>
    {
        if let Some(status) = self.threads.get(&thread).and_then(|t| t.exit_status) {
            return Ok(status);
        }
        self.exited
            .get(&thread)
            .copied()
            .ok_or_else(|| ProtocolError::InvalidArgument(format!("{thread} has not exited")))
    }
}

impl ProcessInfo for SimTarget
{
    fn process_id(&mut self) -> ProtocolResult<ProcessId>
    {
        Ok(ProcessId(SIM_PID))
    }

    fn loader_info_addr(&mut self) -> ProtocolResult<AnyAddr>
    {
        Ok(MEMORY_BASE)
    }

    fn target_arch(&mut self) -> ProtocolResult<String>
    {
        Ok("i386:x86-64".to_string())
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::event::linux;

    fn pc_at(n: u64) -> AnyAddr
    {
        CODE_BASE + n * INSTRUCTION_LEN
    }

    #[test]
    fn test_register_set_is_valid()
    {
        let set = register_set().unwrap();
        assert_eq!(set.len(), LAYOUT.len());
        assert_eq!(set.resolve(Reg::PC).unwrap(), Reg::concrete(index_of("rip")));
        assert_eq!(set.accelerated().count(), 2);
    }

    #[test]
    fn test_memory_reads_clamp_to_mapped_region()
    {
        let mut target = SimTarget::new();
        let end = MEMORY_BASE + MEMORY_SIZE as u64;
        let written = target
            .set_memory_value(end - 2, &DataBuf::from_slice(&[1, 2, 3, 4]))
            .unwrap();
        assert_eq!(written, 2);

        let data = target.memory_value(AnyRange::new(end - 2, 16)).unwrap();
        assert_eq!(data.as_slice(), &[1, 2]);
        assert!(target.memory_value(AnyRange::new(0x10, 4)).unwrap().is_empty());
    }

    #[test]
    fn test_generic_registers_resolve()
    {
        let mut target = SimTarget::new();
        let pc = target.register_value(MAIN_THREAD, Reg::PC).unwrap();
        assert_eq!(pc.value_as::<u64>(), CODE_BASE);
        assert_eq!(pc.bit_size(), 64);

        let flags = target.register_value(MAIN_THREAD, Reg::FLAGS).unwrap();
        assert_eq!(flags.bit_size(), 32);

        target
            .set_register_value(MAIN_THREAD, Reg::PC, &RegValue::from_u64(pc_at(3), 64))
            .unwrap();
        assert_eq!(target.pc(MAIN_THREAD), Some(pc_at(3)));
    }

    #[test]
    fn test_continue_requires_a_running_thread()
    {
        let mut target = SimTarget::new();
        assert!(matches!(target.continue_threads(), Err(ProtocolError::AllThreadsFrozen)));
    }

    #[test]
    fn test_continue_requires_attachment()
    {
        let mut target = SimTarget::new();
        target
            .set_continue_mode(MAIN_THREAD, ContinueMode::GoPassEvent, None)
            .unwrap();
        assert!(matches!(
            target.continue_threads(),
            Err(ProtocolError::NotInitialized(_))
        ));
    }

    #[test]
    fn test_breakpoints_outside_code_are_refused()
    {
        let mut target = SimTarget::new();
        assert!(!target.set_breakpoint(MEMORY_BASE, 1).unwrap());
        assert!(target.set_breakpoint(pc_at(2), 1).unwrap());
        assert!(target.clear_breakpoint(pc_at(2)).unwrap());
        assert!(!target.clear_breakpoint(pc_at(2)).unwrap());
    }

    #[test]
    fn test_next_hit_prefers_nearest()
    {
        let mut target = SimTarget::new();
        target.set_breakpoint(pc_at(5), 1).unwrap();
        target.script(pc_at(3), Action::Event(EventDetails::new(linux::SIGUSR1)));
        let thread = target.threads[&MAIN_THREAD].clone();
        let (distance, hit) = target.next_hit(&thread).unwrap();
        assert_eq!(distance, 3 * INSTRUCTION_LEN);
        assert!(matches!(hit, Hit::Script(a) if a == pc_at(3)));
    }

    #[test]
    fn test_no_hit_past_the_end_of_the_address_space()
    {
        let mut target = SimTarget::new();
        target.set_breakpoint(pc_at(5), 1).unwrap();
        target
            .set_register_value(MAIN_THREAD, Reg::PC, &RegValue::from_u64(u64::MAX - 1, 64))
            .unwrap();

        let mut thread = target.threads[&MAIN_THREAD].clone();
        thread.mode = ContinueMode::StepPassEvent;
        assert!(target.next_hit(&thread).is_none());
        thread.mode = ContinueMode::GoPassEvent;
        assert!(target.next_hit(&thread).is_none());
    }

    #[test]
    fn test_focus_survives_only_while_its_thread_lives()
    {
        let mut target = SimTarget::new();
        let worker = target.spawn("worker", CODE_BASE + 0x100);
        assert_eq!(target.focus_thread().unwrap(), MAIN_THREAD);
        target.focus = Some(worker);
        assert_eq!(target.focus_thread().unwrap(), worker);
        target.kill().unwrap();
        assert!(matches!(target.focus_thread(), Err(ProtocolError::TargetTerminated)));
    }

    #[test]
    fn test_custom_commands()
    {
        let mut target = SimTarget::new();
        let reply = target.custom_command(MAIN_THREAD, "echo hello  world").unwrap();
        assert!(reply.recognized);
        assert_eq!(reply.response, "hello world\n");
        assert!(!target.custom_command(MAIN_THREAD, "frobnicate").unwrap().recognized);
    }

    #[test]
    fn test_target_description_lists_registers()
    {
        let mut target = SimTarget::new();
        let xml = TargetDescription::target_description(&mut target, "target.xml").unwrap();
        let text = String::from_utf8(xml.to_vec()).unwrap();
        assert!(text.contains("name=\"rip\""));
        assert!(TargetDescription::target_description(&mut target, "other.xml")
            .unwrap()
            .is_empty());
    }
}
