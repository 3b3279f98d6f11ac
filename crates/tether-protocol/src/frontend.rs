//! # Front-End Endpoint
//!
//! The front-end sits next to the debugger. Once connected it hands out
//! [`RemoteCommands`], a cloneable [`Commands`] implementation that forwards
//! each call to the back-end, and delivers the back-end's stop reports to a
//! [`Notifications`] receiver through [`FrontEnd::handle_notifications`].
//!
//! ## Threads
//!
//! All methods take `&self`. A debugger usually runs
//! [`FrontEnd::handle_notifications`] on one thread while another thread
//! may call [`Commands::break_target`] or
//! [`FrontEnd::interrupt_notification_thread`] at any time.
//!
//! ## Caching
//!
//! Register values and stop reasons are cached until the target resumes.
//! Accelerated registers arrive with each stop and are served without a
//! round trip.
//!
//! ## Example
//!
//! ```rust,no_run
//! use tether_protocol::{initialize, sim, Commands, FrontEnd, FrontEndConfig, InitializeFlags, Reg};
//!
//! initialize(InitializeFlags::TCP)?;
//! let front = FrontEnd::new(FrontEndConfig::client("127.0.0.1", 7777))?;
//! let mut target = front.connect_to_server()?;
//! front.set_registers(sim::register_set()?)?;
//!
//! let focus = target.focus_thread()?;
//! let pc = target.register_value(focus, Reg::PC)?;
//! println!("{focus} stopped at {pc}");
//! # Ok::<(), tether_protocol::ProtocolError>(())
//! ```

use std::collections::{HashMap, VecDeque};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tether_core::{AnyAddr, AnyRange, DataBuf, RegValue};
use tether_utils::SessionConfig;
use tracing::{debug, info, warn};

use crate::backend::validate_continue_mode;
use crate::commands::{
    Breakpoints, Commands, CustomBreakpoints, CustomCommands, EventInterception, ImageExtensions,
    KillWithNotification, LogNotifications, Notifications, ProcessInfo, TargetDescription, ThreadExtensions,
};
use crate::debug_log::DebugLog;
use crate::error::{ProtocolError, ProtocolResult};
use crate::event::{Event, EventDetails};
use crate::init;
use crate::state::{InterruptFlag, Interrupter, ModeGate};
use crate::transport;
use crate::types::{
    BackEndFeatures, BackEndType, ConnectionProperties, ConnectionType, ContinueMode, CustomCommandReply,
    EndpointOptions, FrontEndFeatures, FrontEndType, ImageId, ImageInfo, ImageNotifications, InterfaceId,
    InvalidateFlags, NotifyOutcome, Os, ProcessId, Reg, RegisterSet, SessionState, StopReason, TcpInfo, ThreadId,
    ThreadInfo, ThreadNotifications,
};
use crate::wire::{FrameReader, FrameWriter, Hello, Message, Notice, Peer, Reply, Request, PROTOCOL_VERSION};

/// Construction parameters for a [`FrontEnd`]
#[derive(Debug, Clone)]
pub struct FrontEndConfig
{
    pub kind: FrontEndType,
    pub features: FrontEndFeatures,
    pub options: EndpointOptions,
    pub connection: ConnectionProperties,
    pub session: SessionConfig,
}

impl FrontEndConfig
{
    /// A server front-end listening on `port` (`0` for any free port)
    #[must_use]
    pub fn server(port: u16) -> Self
    {
        Self::with_connection(ConnectionProperties::tcp_server(port))
    }

    /// A client front-end that connects to a back-end at `host:port`
    #[must_use]
    pub fn client(host: impl Into<String>, port: u16) -> Self
    {
        Self::with_connection(ConnectionProperties::tcp_client(host, port))
    }

    fn with_connection(connection: ConnectionProperties) -> Self
    {
        Self {
            kind: FrontEndType::Unknown,
            features: FrontEndFeatures::empty(),
            options: EndpointOptions::empty(),
            connection,
            session: SessionConfig::default(),
        }
    }

    #[must_use]
    pub fn with_kind(mut self, kind: FrontEndType) -> Self
    {
        self.kind = kind;
        self
    }

    #[must_use]
    pub fn with_features(mut self, features: FrontEndFeatures) -> Self
    {
        self.features = features;
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: EndpointOptions) -> Self
    {
        self.options = options;
        self
    }

    #[must_use]
    pub fn with_session(mut self, session: SessionConfig) -> Self
    {
        self.session = session;
        self
    }

    #[must_use]
    pub fn is_server(&self) -> bool
    {
        self.connection.kind == ConnectionType::TcpServer
    }
}

#[derive(Debug, Clone, Copy)]
struct BackEndPeer
{
    kind: BackEndType,
    features: BackEndFeatures,
    os: Os,
}

#[derive(Debug, Default)]
struct Cache
{
    registers: Option<RegisterSet>,
    registers_locked: bool,
    values: HashMap<(ThreadId, Reg), RegValue>,
    stop_reasons: HashMap<ThreadId, StopReason>,
    continue_modes: HashMap<ThreadId, ContinueMode>,
    /// Notifications that arrived while a reply was awaited
    queued: VecDeque<Notice>,
}

impl Cache
{
    fn forget_stop(&mut self)
    {
        self.values.clear();
        self.stop_reasons.clear();
        self.continue_modes.clear();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T>
{
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
struct Session
{
    config: FrontEndConfig,
    state: ModeGate,
    interrupt: Arc<InterruptFlag>,
    reader: Mutex<Option<FrameReader<TcpStream>>>,
    writer: Mutex<Option<FrameWriter<TcpStream>>>,
    peer: Mutex<Option<BackEndPeer>>,
    cache: Mutex<Cache>,
    seq: AtomicU64,
    log: DebugLog,
}

impl Session
{
    fn peer(&self) -> Option<BackEndPeer>
    {
        *lock(&self.peer)
    }

    fn send(&self, message: &Message) -> ProtocolResult<()>
    {
        self.log.emit(|| format!("-> {message:?}"));
        let mut writer = lock(&self.writer);
        writer.as_mut().ok_or(ProtocolError::NotConnected)?.send(message)
    }

    fn disconnect(&self)
    {
        self.state.set(SessionState::Disconnected);
        lock(&self.reader).take();
        lock(&self.writer).take();
        let mut cache = lock(&self.cache);
        cache.forget_stop();
        cache.queued.clear();
        info!("Disconnected from back-end");
    }

    /// Apply a notice to the session and hand it to `receiver`.
    fn dispatch(&self, notice: Notice, receiver: &mut dyn Notifications) -> ProtocolResult<NotifyOutcome>
    {
        info!(notice = ?notice, "Notification");
        match notice {
            Notice::Stopped {
                focus,
                reason,
                registers,
            } => {
                self.record_stop(focus, reason, registers);
                receiver.notify_stopped(focus)?;
            }
            Notice::Exited { exit_code } => {
                self.disconnect();
                receiver.notify_terminated_exit(exit_code)?;
            }
            Notice::Terminated { event } => {
                self.disconnect();
                receiver.notify_terminated_event(event)?;
            }
        }
        Ok(NotifyOutcome::Dispatched)
    }

    fn record_stop<I>(&self, focus: ThreadId, reason: Option<StopReason>, registers: I)
    where
        I: IntoIterator<Item = (Reg, RegValue)>,
    {
        let mut cache = lock(&self.cache);
        cache.forget_stop();
        if let Some(reason) = reason {
            cache.stop_reasons.insert(focus, reason);
        }
        for (reg, value) in registers {
            cache.values.insert((focus, reg), value);
        }
        drop(cache);
        self.state.set(SessionState::CommandMode);
    }
}

/// Front-end side of a debugger session
#[derive(Debug)]
pub struct FrontEnd
{
    session: Arc<Session>,
    listener: Option<TcpListener>,
}

impl FrontEnd
{
    /// Create a front-end. A server starts listening immediately.
    ///
    /// ## Errors
    ///
    /// Returns [`ProtocolError::NotInitialized`] before
    /// [`initialize`](crate::initialize), [`ProtocolError::InvalidArgument`]
    /// without a TCP connection type, or an I/O error if binding fails.
    pub fn new(config: FrontEndConfig) -> ProtocolResult<Self>
    {
        init::require_tcp()?;
        let listener = match config.connection.kind {
            ConnectionType::TcpServer => Some(transport::bind(
                config.connection.tcp_port,
                config.options,
                &config.session,
            )?),
            ConnectionType::TcpClient => None,
            ConnectionType::None => {
                return Err(ProtocolError::InvalidArgument("front-end needs a TCP connection".to_string()))
            }
        };

        info!(kind = ?config.kind, features = ?config.features, "Front-end created");
        Ok(Self {
            session: Arc::new(Session {
                config,
                state: ModeGate::default(),
                interrupt: Arc::new(InterruptFlag::default()),
                reader: Mutex::new(None),
                writer: Mutex::new(None),
                peer: Mutex::new(None),
                cache: Mutex::new(Cache::default()),
                seq: AtomicU64::new(1),
                log: DebugLog::default(),
            }),
            listener,
        })
    }

    /// Where the server is listening.
    ///
    /// ## Errors
    ///
    /// Returns [`ProtocolError::NotServer`] for a client front-end.
    pub fn server_info(&self) -> ProtocolResult<TcpInfo>
    {
        let listener = self.listener.as_ref().ok_or(ProtocolError::NotServer)?;
        Ok(TcpInfo {
            local_port: listener.local_addr()?.port(),
        })
    }

    /// Wait for a back-end to connect, then for the target's first stop.
    ///
    /// `timeout` bounds the wait for the connection; `None` waits forever.
    /// On success the session is in command mode.
    ///
    /// ## Errors
    ///
    /// Fails on a client front-end, when already connected, on timeout, or
    /// with [`ProtocolError::TargetTerminated`] if the target exits before
    /// stopping.
    pub fn connect_from_client(&self, timeout: Option<Duration>) -> ProtocolResult<RemoteCommands>
    {
        let listener = self.listener.as_ref().ok_or(ProtocolError::NotServer)?;
        self.require_disconnected()?;
        let stream = transport::accept(listener, timeout, &self.session.config.session, || false)?
            .ok_or(ProtocolError::Timeout("a back-end connection"))?;
        self.establish(stream)
    }

    /// Connect to the back-end server named in the configuration, then
    /// wait for the target's first stop.
    ///
    /// ## Errors
    ///
    /// Fails on a server front-end, when already connected, or if the
    /// connection or handshake fails. Returns [`ProtocolError::Timeout`]
    /// if the first stop doesn't arrive within
    /// [`SessionConfig::connect_timeout`].
    pub fn connect_to_server(&self) -> ProtocolResult<RemoteCommands>
    {
        let config = &self.session.config;
        if config.is_server() {
            return Err(ProtocolError::NotClient);
        }
        self.require_disconnected()?;
        let stream = transport::connect(&config.connection.tcp_host, config.connection.tcp_port, &config.session)?;
        self.establish(stream)
    }

    fn require_disconnected(&self) -> ProtocolResult<()>
    {
        if self.session.state.get() == SessionState::Disconnected {
            Ok(())
        } else {
            Err(ProtocolError::AlreadyConnected)
        }
    }

    fn establish(&self, stream: TcpStream) -> ProtocolResult<RemoteCommands>
    {
        let session = &self.session;
        let config = &session.config;
        let hello = Hello {
            version: PROTOCOL_VERSION,
            peer: Peer::FrontEnd {
                kind: config.kind,
                features: config.features,
            },
        };
        let max_len = transport::frame_limit(config.options, &config.session);
        let (mut connection, theirs) = transport::handshake(stream, hello, max_len, &config.session, &session.log)?;
        let Peer::BackEnd { kind, features, os } = theirs.peer else {
            return Err(ProtocolError::UnexpectedMessage("peer is not a back-end".to_string()));
        };
        info!(back_end = ?kind, features = ?features, os = ?os, "Back-end connected");

        let deadline = config.session.connect_timeout.map(|t| Instant::now() + t);
        let initial = loop {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                warn!("Back-end never reported the target's first stop");
                return Err(ProtocolError::Timeout("the target's first stop"));
            }
            match connection.reader.poll()? {
                Some(Message::Notify(notice)) => break notice,
                Some(other) => {
                    return Err(ProtocolError::UnexpectedMessage(format!(
                        "{} before the first stop",
                        other.kind()
                    )))
                }
                None => {}
            }
        };
        session.log.emit(|| format!("<- {initial:?}"));
        let Notice::Stopped {
            focus,
            reason,
            registers,
        } = initial
        else {
            warn!(notice = ?initial, "Target terminated before stopping");
            return Err(ProtocolError::TargetTerminated);
        };

        *lock(&session.peer) = Some(BackEndPeer { kind, features, os });
        *lock(&session.reader) = Some(connection.reader);
        *lock(&session.writer) = Some(connection.writer);
        session.record_stop(focus, reason, registers);
        info!(focus = %focus, "Target stopped; command mode");
        Ok(self.remote())
    }

    fn remote(&self) -> RemoteCommands
    {
        RemoteCommands {
            session: Arc::clone(&self.session),
        }
    }

    /// Another handle for sending commands.
    ///
    /// ## Errors
    ///
    /// Returns [`ProtocolError::NotConnected`] when disconnected.
    pub fn commands(&self) -> ProtocolResult<RemoteCommands>
    {
        if self.session.state.get() == SessionState::Disconnected {
            return Err(ProtocolError::NotConnected);
        }
        Ok(self.remote())
    }

    /// Install the register set used to interpret register IDs.
    ///
    /// Must be called before any register access, resume, or stop-reason
    /// query.
    ///
    /// ## Errors
    ///
    /// Returns [`ProtocolError::RegistersLocked`] once any of those
    /// happened.
    pub fn set_registers(&self, registers: RegisterSet) -> ProtocolResult<()>
    {
        let mut cache = lock(&self.session.cache);
        if cache.registers_locked {
            return Err(ProtocolError::RegistersLocked);
        }
        debug!(count = registers.len(), "Register set installed");
        cache.registers = Some(registers);
        Ok(())
    }

    /// Wait for one notification in run mode and pass it to `receiver`.
    ///
    /// With `block` false, gives up after one poll interval. Returns
    /// [`NotifyOutcome::Interrupted`] while the interrupt flag is raised;
    /// the flag stays raised until [`FrontEnd::clear_interrupt_flag`] or
    /// the next resume. In command mode there is nothing to wait for and
    /// [`NotifyOutcome::NoNotification`] is returned.
    ///
    /// ## Errors
    ///
    /// Returns [`ProtocolError::NotConnected`] when disconnected, any error
    /// from `receiver`, or a transport error.
    pub fn handle_notifications(&self, receiver: &mut dyn Notifications, block: bool) -> ProtocolResult<NotifyOutcome>
    {
        let session = &self.session;
        match session.state.get() {
            SessionState::Disconnected => return Err(ProtocolError::NotConnected),
            SessionState::CommandMode => return Ok(NotifyOutcome::NoNotification),
            SessionState::RunMode => {}
        }

        let queued = lock(&session.cache).queued.pop_front();
        if let Some(notice) = queued {
            return session.dispatch(notice, receiver);
        }

        let polled = {
            let mut reader = lock(&session.reader);
            let reader = reader.as_mut().ok_or(ProtocolError::NotConnected)?;
            loop {
                if session.interrupt.is_raised() {
                    debug!("Notification wait interrupted");
                    return Ok(NotifyOutcome::Interrupted);
                }
                match reader.poll() {
                    Ok(Some(Message::Notify(notice))) => break Ok(notice),
                    Ok(Some(other)) => warn!(kind = other.kind(), "Ignoring unexpected message in run mode"),
                    Ok(None) if !block => return Ok(NotifyOutcome::NoNotification),
                    Ok(None) => {}
                    Err(ProtocolError::FrameTooLarge { len, max }) => {
                        warn!(len, max, "Dropped oversized frame from back-end");
                    }
                    Err(e) => break Err(e),
                }
            }
        };

        match polled {
            Ok(notice) => {
                session.log.emit(|| format!("<- {notice:?}"));
                session.dispatch(notice, receiver)
            }
            Err(e) => {
                if e.is_connection_lost() {
                    session.disconnect();
                }
                Err(e)
            }
        }
    }

    /// Handle that interrupts [`FrontEnd::handle_notifications`] from any
    /// thread or signal handler
    #[must_use]
    pub fn interrupter(&self) -> Interrupter
    {
        Interrupter::new(Arc::clone(&self.session.interrupt))
    }

    /// Raise the sticky interrupt flag
    pub fn interrupt_notification_thread(&self)
    {
        self.session.interrupt.raise();
    }

    pub fn clear_interrupt_flag(&self)
    {
        self.session.interrupt.clear();
    }

    /// Forget cached state of `thread`, e.g. after the debugger changed it
    /// behind the front-end's back.
    pub fn invalidate_cached_state(&self, thread: ThreadId, flags: InvalidateFlags)
    {
        if flags.contains(InvalidateFlags::REGISTERS) {
            lock(&self.session.cache).values.retain(|(t, _), _| *t != thread);
            debug!(thread = %thread, "Register cache invalidated");
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState
    {
        self.session.state.get()
    }

    /// Type of the connected back-end, [`BackEndType::Unknown`] before
    /// connecting
    #[must_use]
    pub fn back_end_type(&self) -> BackEndType
    {
        self.session.peer().map_or(BackEndType::Unknown, |p| p.kind)
    }

    /// Features of the connected back-end, empty before connecting
    #[must_use]
    pub fn back_end_features(&self) -> BackEndFeatures
    {
        self.session.peer().map_or_else(BackEndFeatures::empty, |p| p.features)
    }

    /// OS of the connected back-end, [`Os::Invalid`] before connecting
    #[must_use]
    pub fn back_end_os(&self) -> Os
    {
        self.session.peer().map_or(Os::Invalid, |p| p.os)
    }

    pub fn add_log_notifications(&self, receiver: Arc<dyn LogNotifications>)
    {
        self.session.log.add(receiver);
    }

    pub fn remove_log_notifications(&self, receiver: &Arc<dyn LogNotifications>) -> bool
    {
        self.session.log.remove(receiver)
    }
}

/// [`Commands`] forwarded to the back-end
///
/// Cloning gives another handle to the same session. Every call except
/// [`Commands::break_target`] requires command mode and fails with
/// [`ProtocolError::WrongMode`] otherwise.
#[derive(Debug, Clone)]
pub struct RemoteCommands
{
    session: Arc<Session>,
}

impl RemoteCommands
{
    /// Send `request` and wait for its reply.
    fn call(&self, request: Request) -> ProtocolResult<Reply>
    {
        let session = &self.session;
        session.state.require(SessionState::CommandMode)?;

        let outcome = {
            let mut reader = lock(&session.reader);
            let reader = reader.as_mut().ok_or(ProtocolError::NotConnected)?;
            let seq = session.seq.fetch_add(1, Ordering::Relaxed);
            session.send(&Message::Request { seq, request })?;
            loop {
                match reader.poll() {
                    Ok(Some(Message::Reply { seq: got, reply })) if got == seq => {
                        session.log.emit(|| format!("<- {reply:?}"));
                        break Ok(reply);
                    }
                    Ok(Some(Message::Notify(notice))) => {
                        warn!(notice = ?notice, "Notification while awaiting a reply");
                        lock(&session.cache).queued.push_back(notice);
                    }
                    Ok(Some(other)) => warn!(kind = other.kind(), "Ignoring unexpected message"),
                    Ok(None) => {}
                    Err(e) => break Err(e),
                }
            }
        };

        match outcome {
            Ok(Reply::Fault(fault)) => Err(fault.into()),
            Ok(reply) => Ok(reply),
            Err(e) => {
                if e.is_connection_lost() {
                    session.disconnect();
                }
                Err(e)
            }
        }
    }

    fn has(&self, id: InterfaceId) -> bool
    {
        self.session
            .peer()
            .is_some_and(|p| p.features.contains(id.required_feature()))
    }

    fn back_end_features(&self) -> BackEndFeatures
    {
        self.session.peer().map_or_else(BackEndFeatures::empty, |p| p.features)
    }

    /// Lock the register set and resolve `reg` to a concrete register and
    /// its width.
    fn register_slot(&self, reg: Reg) -> ProtocolResult<(Reg, u32)>
    {
        let mut cache = lock(&self.session.cache);
        let registers = cache.registers.as_ref().ok_or(ProtocolError::RegistersNotSet)?;
        let concrete = registers.resolve(reg)?;
        let width = registers.description(concrete).map_or(0, |d| d.width_bits);
        cache.registers_locked = true;
        Ok((concrete, width))
    }

    /// Mark the register set as in use.
    fn lock_registers(&self) -> ProtocolResult<()>
    {
        let mut cache = lock(&self.session.cache);
        if cache.registers.is_none() {
            return Err(ProtocolError::RegistersNotSet);
        }
        cache.registers_locked = true;
        Ok(())
    }

    /// Bookkeeping after the back-end accepted a resume
    fn resumed(&self)
    {
        lock(&self.session.cache).forget_stop();
        self.session.interrupt.clear();
        self.session.state.set(SessionState::RunMode);
        debug!("Target resumed; run mode");
    }

    fn finish(&self, what: &str)
    {
        info!("Session ended by {what}");
        self.session.disconnect();
    }
}

fn unexpected(reply: &Reply) -> ProtocolError
{
    ProtocolError::UnexpectedMessage(format!("reply {reply:?}"))
}

macro_rules! expect_reply {
    ($reply:expr, $variant:ident) => {
        match $reply {
            Reply::$variant(value) => Ok(value),
            other => Err(unexpected(&other)),
        }
    };
    ($reply:expr) => {
        match $reply {
            Reply::Done => Ok(()),
            other => Err(unexpected(&other)),
        }
    };
}

impl Commands for RemoteCommands
{
    fn thread_count(&mut self) -> ProtocolResult<usize>
    {
        expect_reply!(self.call(Request::ThreadCount)?, Count)
    }

    fn thread_id(&mut self, index: usize) -> ProtocolResult<ThreadId>
    {
        expect_reply!(self.call(Request::ThreadId { index })?, Thread)
    }

    fn focus_thread(&mut self) -> ProtocolResult<ThreadId>
    {
        expect_reply!(self.call(Request::FocusThread)?, Thread)
    }

    fn thread_exists(&mut self, thread: ThreadId) -> ProtocolResult<bool>
    {
        expect_reply!(self.call(Request::ThreadExists { thread })?, Flag)
    }

    fn set_continue_mode(&mut self, thread: ThreadId, mode: ContinueMode, event: Option<EventDetails>)
        -> ProtocolResult<()>
    {
        validate_continue_mode(self.back_end_features(), mode, event.as_ref())?;
        expect_reply!(self.call(Request::SetContinueMode { thread, mode, event })?)?;
        lock(&self.session.cache).continue_modes.insert(thread, mode);
        Ok(())
    }

    fn continue_threads(&mut self) -> ProtocolResult<()>
    {
        self.lock_registers()?;
        self.session.state.require(SessionState::CommandMode)?;
        let any_running = lock(&self.session.cache)
            .continue_modes
            .values()
            .any(|mode| !mode.is_frozen());
        if !any_running {
            return Err(ProtocolError::AllThreadsFrozen);
        }
        expect_reply!(self.call(Request::ContinueThreads)?)?;
        self.resumed();
        Ok(())
    }

    fn thread_stop_reason(&mut self, thread: ThreadId) -> ProtocolResult<StopReason>
    {
        self.lock_registers()?;
        self.session.state.require(SessionState::CommandMode)?;
        if let Some(reason) = lock(&self.session.cache).stop_reasons.get(&thread) {
            return Ok(*reason);
        }
        let reason = expect_reply!(self.call(Request::ThreadStopReason { thread })?, StopReason)?;
        lock(&self.session.cache).stop_reasons.insert(thread, reason);
        Ok(reason)
    }

    fn thread_stop_event(&mut self, thread: ThreadId) -> ProtocolResult<EventDetails>
    {
        self.lock_registers()?;
        expect_reply!(self.call(Request::ThreadStopEvent { thread })?, Event)
    }

    fn break_target(&mut self) -> ProtocolResult<()>
    {
        match self.session.state.get() {
            SessionState::Disconnected => Err(ProtocolError::NotConnected),
            SessionState::CommandMode => Ok(()),
            SessionState::RunMode => {
                info!("Sending break");
                self.session.send(&Message::Break)
            }
        }
    }

    fn kill(&mut self) -> ProtocolResult<()>
    {
        expect_reply!(self.call(Request::Kill)?)?;
        self.finish("kill");
        Ok(())
    }

    fn detach(&mut self) -> ProtocolResult<()>
    {
        expect_reply!(self.call(Request::Detach)?)?;
        self.finish("detach");
        Ok(())
    }

    fn register_value(&mut self, thread: ThreadId, reg: Reg) -> ProtocolResult<RegValue>
    {
        let (reg, width) = self.register_slot(reg)?;
        self.session.state.require(SessionState::CommandMode)?;
        if let Some(value) = lock(&self.session.cache).values.get(&(thread, reg)) {
            let mut value = value.clone();
            value.resize(width);
            return Ok(value);
        }
        let mut value = expect_reply!(self.call(Request::RegisterValue { thread, reg })?, Register)?;
        value.resize(width);
        lock(&self.session.cache).values.insert((thread, reg), value.clone());
        Ok(value)
    }

    fn set_register_value(&mut self, thread: ThreadId, reg: Reg, value: &RegValue) -> ProtocolResult<()>
    {
        let (reg, width) = self.register_slot(reg)?;
        let mut value = value.clone();
        value.resize(width);
        expect_reply!(self.call(Request::SetRegisterValue {
            thread,
            reg,
            value: value.clone(),
        })?)?;
        lock(&self.session.cache).values.insert((thread, reg), value);
        Ok(())
    }

    fn memory_value(&mut self, range: AnyRange) -> ProtocolResult<DataBuf>
    {
        expect_reply!(self.call(Request::MemoryValue { range })?, Memory)
    }

    fn set_memory_value(&mut self, addr: AnyAddr, value: &DataBuf) -> ProtocolResult<usize>
    {
        expect_reply!(
            self.call(Request::SetMemoryValue {
                addr,
                value: value.clone(),
            })?,
            Written
        )
    }

    fn breakpoints(&mut self) -> Option<&mut dyn Breakpoints>
    {
        if self.has(InterfaceId::Breakpoints) { Some(self) } else { None }
    }

    fn custom_breakpoints(&mut self) -> Option<&mut dyn CustomBreakpoints>
    {
        if self.has(InterfaceId::CustomBreakpoints) { Some(self) } else { None }
    }

    fn custom_commands(&mut self) -> Option<&mut dyn CustomCommands>
    {
        if self.has(InterfaceId::CustomCommands) { Some(self) } else { None }
    }

    fn kill_with_notification(&mut self) -> Option<&mut dyn KillWithNotification>
    {
        if self.has(InterfaceId::KillWithNotification) { Some(self) } else { None }
    }

    fn target_description(&mut self) -> Option<&mut dyn TargetDescription>
    {
        if self.has(InterfaceId::TargetDescription) { Some(self) } else { None }
    }

    fn event_interception(&mut self) -> Option<&mut dyn EventInterception>
    {
        if self.has(InterfaceId::EventInterception) { Some(self) } else { None }
    }

    fn image_extensions(&mut self) -> Option<&mut dyn ImageExtensions>
    {
        if self.has(InterfaceId::ImageExtensions) { Some(self) } else { None }
    }

    fn thread_extensions(&mut self) -> Option<&mut dyn ThreadExtensions>
    {
        if self.has(InterfaceId::ThreadExtensions) { Some(self) } else { None }
    }

    fn process_info(&mut self) -> Option<&mut dyn ProcessInfo>
    {
        if self.has(InterfaceId::ProcessInfo) { Some(self) } else { None }
    }
}

impl Breakpoints for RemoteCommands
{
    fn set_breakpoint(&mut self, addr: AnyAddr, size: usize) -> ProtocolResult<bool>
    {
        expect_reply!(self.call(Request::SetBreakpoint { addr, size })?, Flag)
    }

    fn clear_breakpoint(&mut self, addr: AnyAddr) -> ProtocolResult<bool>
    {
        expect_reply!(self.call(Request::ClearBreakpoint { addr })?, Flag)
    }
}

impl CustomBreakpoints for RemoteCommands
{
    fn thread_stop_message(&mut self, thread: ThreadId) -> ProtocolResult<String>
    {
        expect_reply!(self.call(Request::ThreadStopMessage { thread })?, Text)
    }
}

impl CustomCommands for RemoteCommands
{
    fn custom_command(&mut self, thread: ThreadId, command: &str) -> ProtocolResult<CustomCommandReply>
    {
        expect_reply!(
            self.call(Request::CustomCommand {
                thread,
                command: command.to_string(),
            })?,
            Custom
        )
    }
}

impl KillWithNotification for RemoteCommands
{
    fn kill_with_notification(&mut self, exit_code: i64) -> ProtocolResult<()>
    {
        expect_reply!(self.call(Request::KillWithNotification { exit_code })?)?;
        self.resumed();
        Ok(())
    }
}

impl TargetDescription for RemoteCommands
{
    fn target_description(&mut self, name: &str) -> ProtocolResult<DataBuf>
    {
        expect_reply!(self.call(Request::TargetDescription { name: name.to_string() })?, Memory)
    }
}

impl EventInterception for RemoteCommands
{
    fn mark_event_not_intercepted(&mut self, event: Event) -> ProtocolResult<()>
    {
        expect_reply!(self.call(Request::MarkEventNotIntercepted { event })?)
    }

    fn mark_all_events_intercepted(&mut self) -> ProtocolResult<()>
    {
        expect_reply!(self.call(Request::MarkAllEventsIntercepted)?)
    }
}

impl ImageExtensions for RemoteCommands
{
    fn set_image_notifications(&mut self, flags: ImageNotifications) -> ProtocolResult<()>
    {
        expect_reply!(self.call(Request::SetImageNotifications { flags })?)
    }

    fn image_count(&mut self) -> ProtocolResult<usize>
    {
        expect_reply!(self.call(Request::ImageCount)?, Count)
    }

    fn image_id(&mut self, index: usize) -> ProtocolResult<ImageId>
    {
        expect_reply!(self.call(Request::ImageId { index })?, Image)
    }

    fn image_info(&mut self, image: ImageId) -> ProtocolResult<ImageInfo>
    {
        expect_reply!(self.call(Request::ImageInfo { image })?, ImageInfo)
    }

    fn thread_stop_image(&mut self, thread: ThreadId) -> ProtocolResult<ImageId>
    {
        expect_reply!(self.call(Request::ThreadStopImage { thread })?, Image)
    }
}

impl ThreadExtensions for RemoteCommands
{
    fn set_thread_notifications(&mut self, flags: ThreadNotifications) -> ProtocolResult<()>
    {
        expect_reply!(self.call(Request::SetThreadNotifications { flags })?)
    }

    fn thread_info(&mut self, thread: ThreadId) -> ProtocolResult<ThreadInfo>
    {
        expect_reply!(self.call(Request::ThreadInfo { thread })?, ThreadInfo)
    }

    fn thread_exit_status(&mut self, thread: ThreadId) -> ProtocolResult<i64>
    {
        self.lock_registers()?;
        expect_reply!(self.call(Request::ThreadExitStatus { thread })?, ExitStatus)
    }
}

impl ProcessInfo for RemoteCommands
{
    fn process_id(&mut self) -> ProtocolResult<ProcessId>
    {
        expect_reply!(self.call(Request::ProcessId)?, Process)
    }

    fn loader_info_addr(&mut self) -> ProtocolResult<AnyAddr>
    {
        expect_reply!(self.call(Request::LoaderInfoAddr)?, Address)
    }

    fn target_arch(&mut self) -> ProtocolResult<String>
    {
        expect_reply!(self.call(Request::TargetArch)?, Text)
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::types::InitializeFlags;

    fn client() -> FrontEnd
    {
        crate::initialize(InitializeFlags::TCP).unwrap();
        FrontEnd::new(FrontEndConfig::client("127.0.0.1", 1)).unwrap()
    }

    #[test]
    fn test_disconnected_front_end_defaults()
    {
        let front = client();
        assert_eq!(front.state(), SessionState::Disconnected);
        assert_eq!(front.back_end_type(), BackEndType::Unknown);
        assert_eq!(front.back_end_os(), Os::Invalid);
        assert!(front.back_end_features().is_empty());
        assert!(matches!(front.server_info(), Err(ProtocolError::NotServer)));
        assert!(matches!(front.commands(), Err(ProtocolError::NotConnected)));
    }

    #[test]
    fn test_handle_notifications_needs_connection()
    {
        struct Ignore;
        impl Notifications for Ignore
        {
            fn notify_stopped(&mut self, _: ThreadId) -> ProtocolResult<()>
            {
                Ok(())
            }

            fn notify_terminated_exit(&mut self, _: i64) -> ProtocolResult<()>
            {
                Ok(())
            }

            fn notify_terminated_event(&mut self, _: EventDetails) -> ProtocolResult<()>
            {
                Ok(())
            }
        }

        let front = client();
        assert!(matches!(
            front.handle_notifications(&mut Ignore, false),
            Err(ProtocolError::NotConnected)
        ));
    }

    #[test]
    fn test_server_front_end_reports_port()
    {
        crate::initialize(InitializeFlags::TCP).unwrap();
        let front = FrontEnd::new(FrontEndConfig::server(0)).unwrap();
        assert_ne!(front.server_info().unwrap().local_port, 0);
        assert!(matches!(front.connect_to_server(), Err(ProtocolError::NotClient)));
    }

    #[test]
    fn test_invalidate_drops_only_that_thread()
    {
        let front = client();
        {
            let mut cache = lock(&front.session.cache);
            cache.values.insert((ThreadId(1), Reg::concrete(0)), RegValue::from_u64(1, 64));
            cache.values.insert((ThreadId(2), Reg::concrete(0)), RegValue::from_u64(2, 64));
        }
        front.invalidate_cached_state(ThreadId(1), InvalidateFlags::REGISTERS);
        let cache = lock(&front.session.cache);
        assert!(!cache.values.contains_key(&(ThreadId(1), Reg::concrete(0))));
        assert!(cache.values.contains_key(&(ThreadId(2), Reg::concrete(0))));
    }
}
