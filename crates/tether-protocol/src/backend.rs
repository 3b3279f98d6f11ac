//! # Back-End Endpoint
//!
//! The back-end sits next to the target. It receives requests from the
//! front-end, executes them through the target's [`Commands`]
//! implementation, and forwards the target's stop reports, which arrive
//! through a [`NotificationSender`], to the front-end.
//!
//! ## Threads
//!
//! A typical back-end has a command thread blocked in
//! [`BackEnd::handle_commands`] and one or more target threads reporting
//! stops through cloned [`NotificationSender`]s. Notifications are only
//! accepted while the target runs; the command thread forwards them on its
//! next poll.
//!
//! ## Example
//!
//! ```rust,no_run
//! use tether_protocol::sim::SimTarget;
//! use tether_protocol::{initialize, BackEnd, BackEndConfig, Completion, InitializeFlags};
//!
//! initialize(InitializeFlags::TCP)?;
//! let mut backend = BackEnd::new(BackEndConfig::server(0))?;
//! let mut target = SimTarget::new();
//! backend.set_registers(tether_protocol::sim::register_set()?)?;
//! target.attach(backend.notification_sender());
//!
//! if backend.connect_from_client(None)? == Completion::Ok {
//!     target.report_initial_stop()?;
//!     let _ = backend.wait_for_stop_after_connect(None)?;
//!     let end = backend.handle_commands(&mut target)?;
//!     println!("session ended: {end:?}");
//! }
//! # Ok::<(), tether_protocol::ProtocolError>(())
//! ```

use std::collections::HashMap;
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use tether_utils::SessionConfig;

use crate::commands::{Commands, LogNotifications, Notifications};
use crate::debug_log::DebugLog;
use crate::error::{ProtocolError, ProtocolResult};
use crate::event::EventDetails;
use crate::init;
use crate::state::{InterruptFlag, Interrupter};
use crate::transport::{self, Connection};
use crate::types::{
    BackEndFeatures, BackEndType, Completion, ConnectionProperties, ConnectionType, ContinueMode, EndpointOptions,
    FrontEndFeatures, FrontEndType, InterfaceId, Os, RegisterSet, SessionEnd, SessionState, TcpInfo, ThreadId,
};
use crate::wire::{ExpeditedRegisters, Fault, Hello, Message, Notice, Peer, Reply, Request, PROTOCOL_VERSION};

/// Construction parameters for a [`BackEnd`]
#[derive(Debug, Clone)]
pub struct BackEndConfig
{
    pub os: Os,
    pub kind: BackEndType,
    pub features: BackEndFeatures,
    pub options: EndpointOptions,
    pub connection: ConnectionProperties,
    pub session: SessionConfig,
}

impl BackEndConfig
{
    /// A server back-end listening on `port` (`0` for any free port)
    #[must_use]
    pub fn server(port: u16) -> Self
    {
        Self::with_connection(ConnectionProperties::tcp_server(port))
    }

    /// A client back-end that connects to a front-end at `host:port`
    #[must_use]
    pub fn client(host: impl Into<String>, port: u16) -> Self
    {
        Self::with_connection(ConnectionProperties::tcp_client(host, port))
    }

    fn with_connection(connection: ConnectionProperties) -> Self
    {
        Self {
            os: Os::host(),
            kind: BackEndType::Unknown,
            features: BackEndFeatures::empty(),
            options: EndpointOptions::empty(),
            connection,
            session: SessionConfig::default(),
        }
    }

    #[must_use]
    pub fn with_os(mut self, os: Os) -> Self
    {
        self.os = os;
        self
    }

    #[must_use]
    pub fn with_kind(mut self, kind: BackEndType) -> Self
    {
        self.kind = kind;
        self
    }

    #[must_use]
    pub fn with_features(mut self, features: BackEndFeatures) -> Self
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

    /// Whether this back-end waits for the front-end to connect
    #[must_use]
    pub fn is_server(&self) -> bool
    {
        self.connection.kind == ConnectionType::TcpServer
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase
{
    /// No front-end connected
    Idle,
    /// Connected, waiting for the target's first stop
    AwaitingStop,
    Command,
    Running,
    Terminated,
    /// Shut down by [`BackEnd::reset_after_fork`]
    Disabled,
}

impl Phase
{
    fn session_state(self) -> SessionState
    {
        match self {
            Phase::Command => SessionState::CommandMode,
            Phase::Running => SessionState::RunMode,
            Phase::Idle | Phase::AwaitingStop | Phase::Terminated | Phase::Disabled => SessionState::Disconnected,
        }
    }
}

/// A notification accepted from the target but not yet forwarded
#[derive(Debug, Clone)]
enum Pending
{
    Stopped(ThreadId),
    Exited(i64),
    Terminated(EventDetails),
}

#[derive(Debug)]
struct Control
{
    phase: Phase,
    pending: Option<Pending>,
}

#[derive(Debug)]
struct Shared
{
    control: Mutex<Control>,
    changed: Condvar,
    interrupt: Arc<InterruptFlag>,
}

impl Shared
{
    fn control(&self) -> MutexGuard<'_, Control>
    {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_phase(&self, phase: Phase)
    {
        self.control().phase = phase;
        self.changed.notify_all();
    }
}

/// Target-side handle for reporting stops and termination
///
/// Cheap to clone and usable from any thread. Each report is validated
/// against the session mode: the target may only report while it runs, and
/// only once per resume.
#[derive(Debug, Clone)]
pub struct NotificationSender
{
    shared: Arc<Shared>,
}

impl NotificationSender
{
    fn post(&self, pending: Pending) -> ProtocolResult<()>
    {
        let mut control = self.shared.control();
        match control.phase {
            Phase::Idle | Phase::AwaitingStop | Phase::Running => {}
            Phase::Command => {
                return Err(ProtocolError::WrongMode {
                    expected: SessionState::RunMode,
                    actual: SessionState::CommandMode,
                })
            }
            Phase::Terminated => return Err(ProtocolError::TargetTerminated),
            Phase::Disabled => return Err(ProtocolError::Disabled),
        }

        debug!(notification = ?pending, "Target reported");
        control.phase = match pending {
            Pending::Stopped(_) => Phase::Command,
            Pending::Exited(_) | Pending::Terminated(_) => Phase::Terminated,
        };
        control.pending = Some(pending);
        drop(control);
        self.shared.changed.notify_all();
        Ok(())
    }
}

impl Notifications for NotificationSender
{
    fn notify_stopped(&mut self, focus: ThreadId) -> ProtocolResult<()>
    {
        if !focus.is_valid() {
            return Err(ProtocolError::InvalidArgument("stop without a focus thread".to_string()));
        }
        self.post(Pending::Stopped(focus))
    }

    fn notify_terminated_exit(&mut self, exit_code: i64) -> ProtocolResult<()>
    {
        self.post(Pending::Exited(exit_code))
    }

    fn notify_terminated_event(&mut self, event: EventDetails) -> ProtocolResult<()>
    {
        self.post(Pending::Terminated(event))
    }
}

/// Back-end side of a debugger session
#[derive(Debug)]
pub struct BackEnd
{
    config: BackEndConfig,
    features: BackEndFeatures,
    shared: Arc<Shared>,
    listener: Option<TcpListener>,
    connection: Option<Connection>,
    peer: Option<(FrontEndType, FrontEndFeatures)>,
    registers: Option<RegisterSet>,
    registers_in_use: bool,
    continue_modes: HashMap<ThreadId, ContinueMode>,
    log: DebugLog,
}

impl BackEnd
{
    /// Create a back-end. A server starts listening immediately.
    ///
    /// ## Errors
    ///
    /// Returns [`ProtocolError::NotInitialized`] before
    /// [`initialize`](crate::initialize), [`ProtocolError::InvalidArgument`]
    /// without a TCP connection type, or an I/O error if binding fails.
    pub fn new(config: BackEndConfig) -> ProtocolResult<Self>
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
                return Err(ProtocolError::InvalidArgument("back-end needs a TCP connection".to_string()))
            }
        };

        info!(kind = ?config.kind, os = ?config.os, features = ?config.features, "Back-end created");
        Ok(Self {
            features: config.features,
            config,
            shared: Arc::new(Shared {
                control: Mutex::new(Control {
                    phase: Phase::Idle,
                    pending: None,
                }),
                changed: Condvar::new(),
                interrupt: Arc::new(InterruptFlag::default()),
            }),
            listener,
            connection: None,
            peer: None,
            registers: None,
            registers_in_use: false,
            continue_modes: HashMap::new(),
            log: DebugLog::default(),
        })
    }

    /// Where the server is listening.
    ///
    /// ## Errors
    ///
    /// Returns [`ProtocolError::NotServer`] for a client back-end.
    pub fn server_info(&self) -> ProtocolResult<TcpInfo>
    {
        if !self.config.is_server() {
            return Err(ProtocolError::NotServer);
        }
        let listener = self.listener.as_ref().ok_or(ProtocolError::Disabled)?;
        Ok(TcpInfo {
            local_port: listener.local_addr()?.port(),
        })
    }

    /// Features advertised to the front-end, after masking
    #[must_use]
    pub fn features(&self) -> BackEndFeatures
    {
        self.features
    }

    /// Stop advertising the features in `mask`.
    ///
    /// ## Errors
    ///
    /// Returns [`ProtocolError::AlreadyConnected`] once a front-end is
    /// connected.
    pub fn mask_features(&mut self, mask: BackEndFeatures) -> ProtocolResult<()>
    {
        if self.connection.is_some() {
            return Err(ProtocolError::AlreadyConnected);
        }
        self.features.remove(mask);
        debug!(features = ?self.features, "Features masked");
        Ok(())
    }

    /// Install the target's register set.
    ///
    /// ## Errors
    ///
    /// Returns [`ProtocolError::RegistersLocked`] once
    /// [`BackEnd::handle_commands`] has run.
    pub fn set_registers(&mut self, registers: RegisterSet) -> ProtocolResult<()>
    {
        if self.registers_in_use {
            return Err(ProtocolError::RegistersLocked);
        }
        debug!(count = registers.len(), "Register set installed");
        self.registers = Some(registers);
        Ok(())
    }

    #[must_use]
    pub fn registers(&self) -> Option<&RegisterSet>
    {
        self.registers.as_ref()
    }

    /// Handle the target uses to report stops
    #[must_use]
    pub fn notification_sender(&self) -> NotificationSender
    {
        NotificationSender {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Handle that interrupts the command thread from elsewhere
    #[must_use]
    pub fn interrupter(&self) -> Interrupter
    {
        Interrupter::new(Arc::clone(&self.shared.interrupt))
    }

    /// Interrupt a blocked [`BackEnd::connect_from_client`],
    /// [`BackEnd::wait_for_stop_after_connect`] or
    /// [`BackEnd::handle_commands`], or the next one to be called.
    pub fn interrupt_command_thread(&self)
    {
        self.shared.interrupt.raise();
        self.shared.changed.notify_all();
    }

    #[must_use]
    pub fn state(&self) -> SessionState
    {
        self.shared.control().phase.session_state()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool
    {
        self.connection.is_some()
    }

    /// Type of the connected front-end, [`FrontEndType::Unknown`] before
    /// connecting
    #[must_use]
    pub fn front_end_type(&self) -> FrontEndType
    {
        self.peer.map_or(FrontEndType::Unknown, |(kind, _)| kind)
    }

    /// Features of the connected front-end, empty before connecting
    #[must_use]
    pub fn front_end_features(&self) -> FrontEndFeatures
    {
        self.peer.map_or_else(FrontEndFeatures::empty, |(_, features)| features)
    }

    pub fn add_log_notifications(&self, receiver: Arc<dyn LogNotifications>)
    {
        self.log.add(receiver);
    }

    pub fn remove_log_notifications(&self, receiver: &Arc<dyn LogNotifications>) -> bool
    {
        self.log.remove(receiver)
    }

    /// Wait for a front-end to connect.
    ///
    /// `timeout` of `None` waits forever. Returns
    /// [`Completion::Interrupted`] if the command thread is interrupted or
    /// the target terminates first; the call may then be repeated.
    ///
    /// ## Errors
    ///
    /// Fails on a client back-end, when already connected, on timeout, or
    /// if the handshake fails.
    pub fn connect_from_client(&mut self, timeout: Option<Duration>) -> ProtocolResult<Completion>
    {
        if !self.config.is_server() {
            return Err(ProtocolError::NotServer);
        }
        if self.connection.is_some() {
            return Err(ProtocolError::AlreadyConnected);
        }
        let listener = self.listener.as_ref().ok_or(ProtocolError::Disabled)?;

        let shared = Arc::clone(&self.shared);
        let stream = transport::accept(listener, timeout, &self.config.session, || {
            shared.interrupt.take() || shared.control().phase == Phase::Terminated
        })?;
        let Some(stream) = stream else {
            info!("Connect interrupted");
            return Ok(Completion::Interrupted);
        };
        self.establish(stream)?;
        Ok(Completion::Ok)
    }

    /// Connect to a front-end acting as server.
    ///
    /// ## Errors
    ///
    /// Fails on a server back-end, when already connected, or if the
    /// connection or handshake fails.
    pub fn connect_to_server(&mut self) -> ProtocolResult<()>
    {
        if self.config.is_server() {
            return Err(ProtocolError::NotClient);
        }
        if self.connection.is_some() {
            return Err(ProtocolError::AlreadyConnected);
        }
        if self.shared.control().phase == Phase::Disabled {
            return Err(ProtocolError::Disabled);
        }
        let stream = transport::connect(
            &self.config.connection.tcp_host,
            self.config.connection.tcp_port,
            &self.config.session,
        )?;
        self.establish(stream)
    }

    fn establish(&mut self, stream: TcpStream) -> ProtocolResult<()>
    {
        let hello = Hello {
            version: PROTOCOL_VERSION,
            peer: Peer::BackEnd {
                kind: self.config.kind,
                features: self.features,
                os: self.config.os,
            },
        };
        let max_len = transport::frame_limit(self.config.options, &self.config.session);
        let (connection, theirs) = transport::handshake(stream, hello, max_len, &self.config.session, &self.log)?;
        let Peer::FrontEnd { kind, features } = theirs.peer else {
            return Err(ProtocolError::UnexpectedMessage("peer is not a front-end".to_string()));
        };

        info!(front_end = ?kind, features = ?features, peer = ?connection.peer_addr, "Front-end connected");
        self.peer = Some((kind, features));
        self.connection = Some(connection);

        let mut control = self.shared.control();
        if control.phase == Phase::Idle {
            control.phase = Phase::AwaitingStop;
        }
        Ok(())
    }

    /// Wait until the target reports its first stop after connecting.
    ///
    /// Returns at once if the target already stopped or terminated.
    /// `timeout` of `None` waits forever.
    ///
    /// ## Errors
    ///
    /// Returns [`ProtocolError::NotConnected`] before connecting and
    /// [`ProtocolError::Timeout`] if the timeout elapses.
    pub fn wait_for_stop_after_connect(&mut self, timeout: Option<Duration>) -> ProtocolResult<Completion>
    {
        if self.connection.is_none() {
            return Err(ProtocolError::NotConnected);
        }
        let poll = self.config.session.poll_interval;
        let deadline = timeout.map(|t| Instant::now() + t);

        let mut control = self.shared.control();
        loop {
            if matches!(control.phase, Phase::Command | Phase::Terminated) {
                debug!(phase = ?control.phase, "Initial stop received");
                return Ok(Completion::Ok);
            }
            if self.shared.interrupt.take() {
                return Ok(Completion::Interrupted);
            }
            let wait = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(ProtocolError::Timeout("the target's first stop"));
                    }
                    (deadline - now).min(poll)
                }
                None => poll,
            };
            control = self
                .shared
                .changed
                .wait_timeout(control, wait)
                .map_or_else(|e| e.into_inner().0, |(guard, _)| guard);
        }
    }

    /// Serve front-end requests until the session ends.
    ///
    /// Stop reports from the target are forwarded as they arrive. Returns
    /// immediately with [`SessionEnd::Terminated`] if the target already
    /// exited.
    ///
    /// ## Errors
    ///
    /// Fails without a register set or connection, and when the connection
    /// breaks.
    pub fn handle_commands(&mut self, receiver: &mut dyn Commands) -> ProtocolResult<SessionEnd>
    {
        if self.registers.is_none() {
            return Err(ProtocolError::RegistersNotSet);
        }
        if self.connection.is_none() {
            return Err(ProtocolError::NotConnected);
        }
        self.registers_in_use = true;
        info!("Handling commands");

        loop {
            if self.shared.interrupt.take() {
                info!("Command loop interrupted");
                return Ok(SessionEnd::Interrupted);
            }

            let (pending, phase) = {
                let mut control = self.shared.control();
                (control.pending.take(), control.phase)
            };
            if let Some(pending) = pending {
                if self.deliver(receiver, pending)? {
                    self.end_session();
                    return Ok(SessionEnd::Terminated);
                }
            } else if phase == Phase::Terminated {
                self.end_session();
                return Ok(SessionEnd::Terminated);
            }

            let polled = match self.connection.as_mut() {
                Some(connection) => connection.reader.poll(),
                None => return Err(ProtocolError::NotConnected),
            };
            let message = match polled {
                Ok(Some(message)) => message,
                Ok(None) => continue,
                Err(ProtocolError::FrameTooLarge { len, max }) => {
                    warn!(len, max, "Dropped oversized frame from front-end");
                    continue;
                }
                Err(e) => {
                    if e.is_connection_lost() {
                        warn!(error = %e, "Front-end connection lost");
                        self.drop_connection();
                    }
                    return Err(e);
                }
            };
            self.log.emit(|| format!("<- {message:?}"));

            match message {
                Message::Request { seq, request } => {
                    if let Some(end) = self.handle_request(receiver, seq, request)? {
                        return Ok(end);
                    }
                }
                Message::Break => self.handle_break(receiver),
                other => warn!(kind = other.kind(), "Ignoring unexpected message"),
            }
        }
    }

    /// Forward a pending notification. Returns whether it ended the
    /// session.
    fn deliver(&mut self, receiver: &mut dyn Commands, pending: Pending) -> ProtocolResult<bool>
    {
        let notice = match pending {
            Pending::Stopped(focus) => {
                let reason = if self.config.options.contains(EndpointOptions::SEND_STOP_REASON) {
                    receiver.thread_stop_reason(focus).ok()
                } else {
                    None
                };
                Notice::Stopped {
                    focus,
                    reason,
                    registers: self.expedited_registers(receiver, focus),
                }
            }
            Pending::Exited(exit_code) => Notice::Exited { exit_code },
            Pending::Terminated(event) => Notice::Terminated { event },
        };
        info!(notice = ?notice, "Notifying front-end");
        let terminal = notice.is_terminal();
        self.send(&Message::Notify(notice))?;
        Ok(terminal)
    }

    fn expedited_registers(&self, receiver: &mut dyn Commands, focus: ThreadId) -> ExpeditedRegisters
    {
        let mut out = ExpeditedRegisters::new();
        let Some(registers) = self.registers.as_ref() else {
            return out;
        };
        for reg in registers.accelerated() {
            match receiver.register_value(focus, reg) {
                Ok(value) => out.push((reg, value)),
                Err(e) => debug!(reg = %reg, error = %e, "Skipping accelerated register"),
            }
        }
        out
    }

    fn handle_request(
        &mut self,
        receiver: &mut dyn Commands,
        seq: u64,
        request: Request,
    ) -> ProtocolResult<Option<SessionEnd>>
    {
        let phase = self.shared.control().phase;
        if phase != Phase::Command {
            let fault = Fault::WrongMode {
                expected: SessionState::CommandMode,
                actual: phase.session_state(),
            };
            self.reply(seq, Reply::Fault(fault))?;
            return Ok(None);
        }

        let mut end = None;
        let result = match request {
            Request::ContinueThreads => self.continue_threads(receiver),
            Request::KillWithNotification { exit_code } => self.kill_with_notification(receiver, exit_code),
            Request::Kill => receiver.kill().map(|()| {
                end = Some(SessionEnd::Terminated);
                Reply::Done
            }),
            Request::Detach => receiver.detach().map(|()| {
                end = Some(SessionEnd::Detached);
                Reply::Done
            }),
            Request::SetContinueMode { thread, mode, event } => {
                self.set_continue_mode(receiver, thread, mode, event)
            }
            other => dispatch(receiver, self.features, other),
        };
        let reply = result.unwrap_or_else(|e| {
            debug!(seq, error = %e, "Request failed");
            Reply::Fault(Fault::from(&e))
        });
        self.reply(seq, reply)?;

        if let Some(end) = end {
            info!(end = ?end, "Session ended by front-end");
            self.shared.set_phase(match end {
                SessionEnd::Detached => Phase::Idle,
                _ => Phase::Terminated,
            });
            self.end_session();
        }
        Ok(end)
    }

    fn set_continue_mode(
        &mut self,
        receiver: &mut dyn Commands,
        thread: ThreadId,
        mode: ContinueMode,
        event: Option<EventDetails>,
    ) -> ProtocolResult<Reply>
    {
        validate_continue_mode(self.features, mode, event.as_ref())?;
        receiver.set_continue_mode(thread, mode, event)?;
        self.continue_modes.insert(thread, mode);
        Ok(Reply::Done)
    }

    fn continue_threads(&mut self, receiver: &mut dyn Commands) -> ProtocolResult<Reply>
    {
        if self.continue_modes.values().all(|mode| mode.is_frozen()) {
            return Err(ProtocolError::AllThreadsFrozen);
        }
        self.resume(|| receiver.continue_threads())?;
        self.continue_modes.clear();
        Ok(Reply::Done)
    }

    fn kill_with_notification(&mut self, receiver: &mut dyn Commands, exit_code: i64) -> ProtocolResult<Reply>
    {
        let target = supported(self.features, InterfaceId::KillWithNotification, receiver.kill_with_notification())?;
        self.resume(|| target.kill_with_notification(exit_code))?;
        Ok(Reply::Done)
    }

    /// Enter run mode around `start`, so the target may report from inside
    /// it, and fall back to command mode if it fails.
    fn resume<F>(&self, start: F) -> ProtocolResult<()>
    where
        F: FnOnce() -> ProtocolResult<()>,
    {
        self.shared.set_phase(Phase::Running);
        debug!("Target resumed");
        start().inspect_err(|_| {
            let mut control = self.shared.control();
            if control.phase == Phase::Running && control.pending.is_none() {
                control.phase = Phase::Command;
            }
        })
    }

    fn handle_break(&mut self, receiver: &mut dyn Commands)
    {
        if self.shared.control().phase != Phase::Running {
            debug!("Break ignored in command mode");
            return;
        }
        info!("Break requested");
        if let Err(e) = receiver.break_target() {
            warn!(error = %e, "Target failed to break");
        }
    }

    fn reply(&mut self, seq: u64, reply: Reply) -> ProtocolResult<()>
    {
        match self.send(&Message::Reply { seq, reply }) {
            Err(ProtocolError::FrameTooLarge { len, max }) => {
                let fault = Fault::Failed(format!("reply of {len} bytes exceeds the {max} byte limit"));
                self.send(&Message::Reply {
                    seq,
                    reply: Reply::Fault(fault),
                })
            }
            other => other,
        }
    }

    fn send(&mut self, message: &Message) -> ProtocolResult<()>
    {
        self.log.emit(|| format!("-> {message:?}"));
        let connection = self.connection.as_mut().ok_or(ProtocolError::NotConnected)?;
        let result = connection.writer.send(message);
        if let Err(e) = &result {
            if e.is_connection_lost() {
                warn!(error = %e, "Front-end connection lost");
                self.drop_connection();
            }
        }
        result
    }

    fn end_session(&mut self)
    {
        self.drop_connection();
        self.continue_modes.clear();
    }

    fn drop_connection(&mut self)
    {
        if self.connection.take().is_some() {
            debug!("Connection closed");
        }
    }

    /// Drop the front-end and wait for a new one on the same port.
    ///
    /// ## Errors
    ///
    /// Returns [`ProtocolError::NotServer`] on a client back-end.
    pub fn reset_server_connection(&mut self) -> ProtocolResult<()>
    {
        if !self.config.is_server() {
            return Err(ProtocolError::NotServer);
        }
        self.reset_session(Phase::Idle);
        info!("Server connection reset");
        Ok(())
    }

    /// Reset after the target forked.
    ///
    /// Following the child keeps the endpoint alive on a fresh port so a
    /// debugger can attach to the child; otherwise the endpoint is shut
    /// down for good.
    ///
    /// ## Errors
    ///
    /// Following the child is only possible on a server.
    pub fn reset_after_fork(&mut self, follow_child: bool) -> ProtocolResult<()>
    {
        if follow_child && !self.config.is_server() {
            return Err(ProtocolError::NotServer);
        }
        if follow_child {
            self.listener = Some(transport::bind(0, self.config.options, &self.config.session)?);
            self.reset_session(Phase::Idle);
            info!(port = ?self.server_info().ok(), "Reset to follow the child");
        } else {
            self.listener = None;
            self.reset_session(Phase::Disabled);
            info!("Endpoint disabled after fork");
        }
        Ok(())
    }

    fn reset_session(&mut self, phase: Phase)
    {
        self.drop_connection();
        self.peer = None;
        self.registers_in_use = false;
        self.continue_modes.clear();
        self.shared.interrupt.clear();
        let mut control = self.shared.control();
        control.phase = phase;
        control.pending = None;
    }
}

/// Check a continue mode against the back-end's features.
pub(crate) fn validate_continue_mode(
    features: BackEndFeatures,
    mode: ContinueMode,
    event: Option<&EventDetails>,
) -> ProtocolResult<()>
{
    if mode.needs_new_event() {
        if !features.contains(BackEndFeatures::CONTINUE_WITH_NEW_EVENT) {
            return Err(ProtocolError::Unsupported("continuing with a new event".to_string()));
        }
        if event.is_none() {
            return Err(ProtocolError::InvalidArgument(format!("{mode:?} needs an event")));
        }
    }
    if event.is_some_and(|e| e.info.is_some()) && !features.contains(BackEndFeatures::EVENT_INFO) {
        return Err(ProtocolError::Unsupported("event info".to_string()));
    }
    Ok(())
}

/// The capability `cap`, if the back-end advertises it
fn supported<T: ?Sized>(features: BackEndFeatures, id: InterfaceId, cap: Option<&mut T>) -> ProtocolResult<&mut T>
{
    if !features.contains(id.required_feature()) {
        return Err(ProtocolError::Unsupported(format!("{id:?} is not advertised")));
    }
    cap.ok_or_else(|| ProtocolError::Unsupported(format!("{id:?} is not implemented")))
}

/// Execute a request that needs no session bookkeeping
fn dispatch(receiver: &mut dyn Commands, features: BackEndFeatures, request: Request) -> ProtocolResult<Reply>
{
    use InterfaceId as I;

    Ok(match request {
        Request::ThreadCount => Reply::Count(receiver.thread_count()?),
        Request::ThreadId { index } => Reply::Thread(receiver.thread_id(index)?),
        Request::FocusThread => Reply::Thread(receiver.focus_thread()?),
        Request::ThreadExists { thread } => Reply::Flag(receiver.thread_exists(thread)?),
        Request::ThreadStopReason { thread } => Reply::StopReason(receiver.thread_stop_reason(thread)?),
        Request::ThreadStopEvent { thread } => Reply::Event(receiver.thread_stop_event(thread)?),
        Request::RegisterValue { thread, reg } => Reply::Register(receiver.register_value(thread, reg)?),
        Request::SetRegisterValue { thread, reg, value } => {
            receiver.set_register_value(thread, reg, &value)?;
            Reply::Done
        }
        Request::MemoryValue { range } => Reply::Memory(receiver.memory_value(range)?),
        Request::SetMemoryValue { addr, value } => Reply::Written(receiver.set_memory_value(addr, &value)?),

        Request::SetBreakpoint { addr, size } => {
            Reply::Flag(supported(features, I::Breakpoints, receiver.breakpoints())?.set_breakpoint(addr, size)?)
        }
        Request::ClearBreakpoint { addr } => {
            Reply::Flag(supported(features, I::Breakpoints, receiver.breakpoints())?.clear_breakpoint(addr)?)
        }
        Request::ThreadStopMessage { thread } => Reply::Text(
            supported(features, I::CustomBreakpoints, receiver.custom_breakpoints())?.thread_stop_message(thread)?,
        ),
        Request::CustomCommand { thread, command } => Reply::Custom(
            supported(features, I::CustomCommands, receiver.custom_commands())?.custom_command(thread, &command)?,
        ),
        Request::TargetDescription { name } => Reply::Memory(
            supported(features, I::TargetDescription, receiver.target_description())?.target_description(&name)?,
        ),
        Request::MarkEventNotIntercepted { event } => {
            supported(features, I::EventInterception, receiver.event_interception())?
                .mark_event_not_intercepted(event)?;
            Reply::Done
        }
        Request::MarkAllEventsIntercepted => {
            supported(features, I::EventInterception, receiver.event_interception())?.mark_all_events_intercepted()?;
            Reply::Done
        }
        Request::SetImageNotifications { flags } => {
            supported(features, I::ImageExtensions, receiver.image_extensions())?.set_image_notifications(flags)?;
            Reply::Done
        }
        Request::ImageCount => {
            Reply::Count(supported(features, I::ImageExtensions, receiver.image_extensions())?.image_count()?)
        }
        Request::ImageId { index } => {
            Reply::Image(supported(features, I::ImageExtensions, receiver.image_extensions())?.image_id(index)?)
        }
        Request::ImageInfo { image } => {
            Reply::ImageInfo(supported(features, I::ImageExtensions, receiver.image_extensions())?.image_info(image)?)
        }
        Request::ThreadStopImage { thread } => Reply::Image(
            supported(features, I::ImageExtensions, receiver.image_extensions())?.thread_stop_image(thread)?,
        ),
        Request::SetThreadNotifications { flags } => {
            supported(features, I::ThreadExtensions, receiver.thread_extensions())?.set_thread_notifications(flags)?;
            Reply::Done
        }
        Request::ThreadInfo { thread } => {
            Reply::ThreadInfo(supported(features, I::ThreadExtensions, receiver.thread_extensions())?.thread_info(thread)?)
        }
        Request::ThreadExitStatus { thread } => Reply::ExitStatus(
            supported(features, I::ThreadExtensions, receiver.thread_extensions())?.thread_exit_status(thread)?,
        ),
        Request::ProcessId => Reply::Process(supported(features, I::ProcessInfo, receiver.process_info())?.process_id()?),
        Request::LoaderInfoAddr => {
            Reply::Address(supported(features, I::ProcessInfo, receiver.process_info())?.loader_info_addr()?)
        }
        Request::TargetArch => Reply::Text(supported(features, I::ProcessInfo, receiver.process_info())?.target_arch()?),

        Request::ContinueThreads
        | Request::KillWithNotification { .. }
        | Request::Kill
        | Request::Detach
        | Request::SetContinueMode { .. } => {
            return Err(ProtocolError::InvalidArgument("session request routed to dispatch".to_string()))
        }
    })
}
