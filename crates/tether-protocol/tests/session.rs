//! End-to-end sessions over loopback TCP against the simulated target

use std::sync::{mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tether_core::{AnyRange, DataBuf, RegValue};
use tether_protocol::event::linux;
use tether_protocol::sim::{self, Action, SimTarget, CODE_BASE, INSTRUCTION_LEN, MEMORY_BASE};
use tether_protocol::{
    initialize, BackEnd, BackEndConfig, BackEndFeatures, BackEndType, Commands, Completion, ContinueMode,
    EventDetails, FrontEnd, FrontEndConfig, FrontEndFeatures, InitializeFlags, InterfaceId, LogNotifications,
    Notifications, NotifyOutcome, Os, ProtocolError, ProtocolResult, Reg, RemoteCommands, SessionEnd, SessionState,
    StopReason, ThreadId, ThreadNotifications,
};
use tether_utils::SessionConfig;

const T1: ThreadId = ThreadId(1);
const T2: ThreadId = ThreadId(2);

type BackEndThread = JoinHandle<(SimTarget, ProtocolResult<SessionEnd>)>;

fn pc_at(n: u64) -> u64
{
    CODE_BASE + n * INSTRUCTION_LEN
}

fn session_config() -> SessionConfig
{
    SessionConfig::default()
        .with_poll_interval(Duration::from_millis(10))
        .with_connect_timeout(Some(Duration::from_secs(5)))
}

fn serve(back: &mut BackEnd, target: &mut SimTarget) -> ProtocolResult<SessionEnd>
{
    let connected = back.connect_from_client(Some(Duration::from_secs(5)))?;
    assert_eq!(connected, Completion::Ok);
    target.attach(back.notification_sender());
    target.set_stop_mode(back.front_end_features().into());
    back.set_registers(sim::register_set()?)?;
    target.report_initial_stop()?;
    back.handle_commands(target)
}

struct Harness
{
    front: FrontEnd,
    remote: RemoteCommands,
    back: BackEndThread,
}

impl Harness
{
    /// Connect a front-end to a simulated back-end without installing
    /// registers on the front-end
    fn connect(target: SimTarget, features: BackEndFeatures, front_features: FrontEndFeatures) -> Self
    {
        initialize(InitializeFlags::TCP).unwrap();
        let mut back = BackEnd::new(
            BackEndConfig::server(0)
                .with_kind(BackEndType::Simulator)
                .with_features(features)
                .with_os(Os::host())
                .with_session(session_config()),
        )
        .unwrap();
        let port = back.server_info().unwrap().local_port;
        let handle = thread::spawn(move || {
            let mut target = target;
            let result = serve(&mut back, &mut target);
            (target, result)
        });

        let front = FrontEnd::new(
            FrontEndConfig::client("127.0.0.1", port)
                .with_features(front_features)
                .with_session(session_config()),
        )
        .unwrap();
        let remote = front.connect_to_server().unwrap();
        Self {
            front,
            remote,
            back: handle,
        }
    }

    fn start(target: SimTarget, features: BackEndFeatures) -> Self
    {
        let harness = Self::connect(target, features, FrontEndFeatures::empty());
        harness.front.set_registers(sim::register_set().unwrap()).unwrap();
        harness
    }

    fn resume(&mut self, threads: &[(ThreadId, ContinueMode)])
    {
        for (thread, mode) in threads {
            self.remote.set_continue_mode(*thread, *mode, None).unwrap();
        }
        self.remote.continue_threads().unwrap();
        assert_eq!(self.front.state(), SessionState::RunMode);
    }

    fn wait(&self, recorder: &mut Recorder) -> NotifyOutcome
    {
        self.front.handle_notifications(recorder, true).unwrap()
    }

    /// Wait for a notification that must arrive
    fn dispatch(&self, recorder: &mut Recorder)
    {
        assert_eq!(self.wait(recorder), NotifyOutcome::Dispatched);
    }

    fn finish(self) -> (SimTarget, SessionEnd)
    {
        let (target, result) = self.back.join().unwrap();
        (target, result.unwrap())
    }
}

#[derive(Debug, Default)]
struct Recorder
{
    stops: Vec<ThreadId>,
    exit: Option<i64>,
    terminated: Option<EventDetails>,
}

impl Notifications for Recorder
{
    fn notify_stopped(&mut self, focus: ThreadId) -> ProtocolResult<()>
    {
        self.stops.push(focus);
        Ok(())
    }

    fn notify_terminated_exit(&mut self, exit_code: i64) -> ProtocolResult<()>
    {
        self.exit = Some(exit_code);
        Ok(())
    }

    fn notify_terminated_event(&mut self, event: EventDetails) -> ProtocolResult<()>
    {
        self.terminated = Some(event);
        Ok(())
    }
}

#[test]
fn test_breakpoint_then_exit()
{
    let mut target = SimTarget::new();
    target.script(pc_at(6), Action::ProcessExit(3));
    let mut h = Harness::start(target, BackEndFeatures::BREAKPOINTS);
    assert_eq!(h.front.back_end_type(), BackEndType::Simulator);
    assert_eq!(h.front.back_end_os(), Os::host());

    let bps = h.remote.breakpoints().unwrap();
    assert!(bps.set_breakpoint(pc_at(4), 1).unwrap());

    let mut rec = Recorder::default();
    h.resume(&[(T1, ContinueMode::GoPassEvent)]);
    assert_eq!(h.wait(&mut rec), NotifyOutcome::Dispatched);
    assert_eq!(rec.stops, vec![T1]);
    assert_eq!(h.front.state(), SessionState::CommandMode);
    assert_eq!(h.remote.thread_stop_reason(T1).unwrap(), StopReason::Breakpoint);
    let pc = h.remote.register_value(T1, Reg::PC).unwrap();
    assert_eq!(pc.value_as::<u64>(), pc_at(4));

    h.resume(&[(T1, ContinueMode::GoPassEvent)]);
    assert_eq!(h.wait(&mut rec), NotifyOutcome::Dispatched);
    assert_eq!(rec.exit, Some(3));
    assert_eq!(h.front.state(), SessionState::Disconnected);

    let (_, end) = h.finish();
    assert_eq!(end, SessionEnd::Terminated);
}

#[test]
fn test_squashed_event_is_not_delivered()
{
    let mut target = SimTarget::new();
    target.script(pc_at(2), Action::Event(EventDetails::new(linux::SIGUSR1)));
    target.script(pc_at(3), Action::Event(EventDetails::new(linux::SIGUSR2)));
    let mut h = Harness::start(target, BackEndFeatures::BREAKPOINTS);
    h.remote.breakpoints().unwrap().set_breakpoint(pc_at(5), 1).unwrap();
    let mut rec = Recorder::default();

    h.resume(&[(T1, ContinueMode::GoPassEvent)]);
    h.dispatch(&mut rec);
    assert_eq!(h.remote.thread_stop_reason(T1).unwrap(), StopReason::Event);
    assert_eq!(h.remote.thread_stop_event(T1).unwrap().event, linux::SIGUSR1);

    h.resume(&[(T1, ContinueMode::GoSquashEvent)]);
    h.dispatch(&mut rec);
    assert_eq!(h.remote.thread_stop_event(T1).unwrap().event, linux::SIGUSR2);

    h.resume(&[(T1, ContinueMode::GoPassEvent)]);
    h.dispatch(&mut rec);
    assert_eq!(h.remote.thread_stop_reason(T1).unwrap(), StopReason::Breakpoint);

    h.remote.kill().unwrap();
    assert_eq!(h.front.state(), SessionState::Disconnected);
    let (target, end) = h.finish();
    assert_eq!(end, SessionEnd::Terminated);
    assert!(target.is_killed());
    assert_eq!(target.delivered_events(), &[(T1, linux::SIGUSR2)]);
}

#[test]
fn test_new_event_needs_back_end_support()
{
    let mut h = Harness::start(SimTarget::new(), BackEndFeatures::empty());
    let event = Some(EventDetails::new(linux::SIGTERM));
    assert!(matches!(
        h.remote.set_continue_mode(T1, ContinueMode::GoNewEvent, event),
        Err(ProtocolError::Unsupported(_))
    ));
    assert!(matches!(h.remote.continue_threads(), Err(ProtocolError::AllThreadsFrozen)));
    h.remote.detach().unwrap();
    let (_, end) = h.finish();
    assert_eq!(end, SessionEnd::Detached);
}

#[test]
fn test_new_event_is_delivered()
{
    let mut target = SimTarget::new();
    target.script(pc_at(2), Action::ProcessExit(0));
    let mut h = Harness::start(target, BackEndFeatures::CONTINUE_WITH_NEW_EVENT);
    assert!(matches!(
        h.remote.set_continue_mode(T1, ContinueMode::GoNewEvent, None),
        Err(ProtocolError::InvalidArgument(_))
    ));
    h.remote
        .set_continue_mode(T1, ContinueMode::GoNewEvent, Some(EventDetails::new(linux::SIGTERM)))
        .unwrap();
    h.remote.continue_threads().unwrap();

    let mut rec = Recorder::default();
    h.dispatch(&mut rec);
    assert_eq!(rec.exit, Some(0));
    let (target, _) = h.finish();
    assert_eq!(target.delivered_events(), &[(T1, linux::SIGTERM)]);
}

#[test]
fn test_fatal_event_terminates_session()
{
    let mut target = SimTarget::new();
    target.script(pc_at(3), Action::Terminate(EventDetails::new(linux::SIGSEGV)));
    let mut h = Harness::start(target, BackEndFeatures::empty());
    let mut rec = Recorder::default();

    h.resume(&[(T1, ContinueMode::StepPassEvent)]);
    h.dispatch(&mut rec);
    assert_eq!(h.remote.thread_stop_reason(T1).unwrap(), StopReason::Step);
    assert_eq!(h.remote.register_value(T1, Reg::PC).unwrap().value_as::<u64>(), pc_at(1));

    h.resume(&[(T1, ContinueMode::GoPassEvent)]);
    h.dispatch(&mut rec);
    assert_eq!(rec.terminated.map(|e| e.event), Some(linux::SIGSEGV));
    assert!(matches!(h.remote.thread_count(), Err(ProtocolError::NotConnected)));
    let (_, end) = h.finish();
    assert_eq!(end, SessionEnd::Terminated);
}

fn two_threads_at_breakpoints() -> SimTarget
{
    let mut target = SimTarget::new();
    let t2 = target.spawn("worker", CODE_BASE + 0x100);
    assert_eq!(t2, T2);
    target.script(pc_at(10), Action::ProcessExit(0));
    target
}

fn set_twin_breakpoints(remote: &mut RemoteCommands)
{
    let bps = remote.breakpoints().unwrap();
    bps.set_breakpoint(pc_at(4), 1).unwrap();
    bps.set_breakpoint(CODE_BASE + 0x100 + 4 * INSTRUCTION_LEN, 1).unwrap();
}

#[test]
fn test_simultaneous_stops_are_replayed_one_at_a_time()
{
    let mut h = Harness::start(two_threads_at_breakpoints(), BackEndFeatures::BREAKPOINTS);
    set_twin_breakpoints(&mut h.remote);
    let mut rec = Recorder::default();
    let both = [(T1, ContinueMode::GoPassEvent), (T2, ContinueMode::GoPassEvent)];

    h.resume(&both);
    h.dispatch(&mut rec);
    assert_eq!(rec.stops, vec![T1]);
    assert_eq!(h.remote.thread_stop_reason(T1).unwrap(), StopReason::Breakpoint);
    assert_eq!(h.remote.thread_stop_reason(T2).unwrap(), StopReason::Stopped);

    h.resume(&both);
    h.dispatch(&mut rec);
    assert_eq!(rec.stops, vec![T1, T2]);
    assert_eq!(h.remote.thread_stop_reason(T2).unwrap(), StopReason::Breakpoint);
    assert_eq!(h.remote.thread_stop_reason(T1).unwrap(), StopReason::Stopped);
    let pc = h.remote.register_value(T1, Reg::PC).unwrap();
    assert_eq!(pc.value_as::<u64>(), pc_at(4));

    h.remote.kill().unwrap();
    let _ = h.finish();
}

#[test]
fn test_removed_breakpoint_discards_pending_stop()
{
    let mut h = Harness::start(two_threads_at_breakpoints(), BackEndFeatures::BREAKPOINTS);
    set_twin_breakpoints(&mut h.remote);
    let mut rec = Recorder::default();
    let both = [(T1, ContinueMode::GoPassEvent), (T2, ContinueMode::GoPassEvent)];

    h.resume(&both);
    h.dispatch(&mut rec);
    assert_eq!(rec.stops, vec![T1]);

    let later = CODE_BASE + 0x100 + 8 * INSTRUCTION_LEN;
    let bps = h.remote.breakpoints().unwrap();
    assert!(bps.clear_breakpoint(CODE_BASE + 0x100 + 4 * INSTRUCTION_LEN).unwrap());
    assert!(bps.set_breakpoint(later, 1).unwrap());

    // T2 runs on from the removed breakpoint instead of replaying it.
    h.resume(&both);
    h.dispatch(&mut rec);
    assert_eq!(rec.stops, vec![T1, T2]);
    assert_eq!(h.remote.thread_stop_reason(T2).unwrap(), StopReason::Breakpoint);
    assert_eq!(h.remote.register_value(T2, Reg::PC).unwrap().value_as::<u64>(), later);

    h.resume(&both);
    h.dispatch(&mut rec);
    assert_eq!(rec.exit, Some(0));
    let _ = h.finish();
}

#[test]
fn test_replayed_stop_keeps_pending_events()
{
    let mut target = SimTarget::new();
    target.spawn("worker", CODE_BASE + 0x100);
    target.script(pc_at(2), Action::Event(EventDetails::new(linux::SIGUSR1)));
    target.script(pc_at(10), Action::ProcessExit(0));
    let mut h = Harness::start(target, BackEndFeatures::BREAKPOINTS);
    h.remote
        .breakpoints()
        .unwrap()
        .set_breakpoint(CODE_BASE + 0x100 + 2 * INSTRUCTION_LEN, 1)
        .unwrap();
    let mut rec = Recorder::default();

    h.resume(&[(T1, ContinueMode::GoPassEvent), (T2, ContinueMode::GoPassEvent)]);
    h.dispatch(&mut rec);
    assert_eq!(rec.stops, vec![T1]);
    assert_eq!(h.remote.thread_stop_reason(T1).unwrap(), StopReason::Event);

    // T2's deferred breakpoint is replayed; T1 doesn't execute.
    h.resume(&[(T1, ContinueMode::GoPassEvent), (T2, ContinueMode::GoPassEvent)]);
    h.dispatch(&mut rec);
    assert_eq!(rec.stops, vec![T1, T2]);
    assert_eq!(h.remote.thread_stop_reason(T2).unwrap(), StopReason::Breakpoint);
    assert_eq!(h.remote.register_value(T1, Reg::PC).unwrap().value_as::<u64>(), pc_at(2));
    assert_eq!(h.remote.thread_stop_event(T1).unwrap().event, linux::SIGUSR1);

    h.resume(&[(T1, ContinueMode::GoSquashEvent), (T2, ContinueMode::GoPassEvent)]);
    h.dispatch(&mut rec);
    assert_eq!(rec.exit, Some(0));
    let (target, _) = h.finish();
    assert!(target.delivered_events().is_empty());
}

#[test]
fn test_focus_thread_is_the_last_reported_stop()
{
    let mut target = SimTarget::new();
    target.spawn("worker", CODE_BASE + 0x100);
    let mut h = Harness::start(target, BackEndFeatures::BREAKPOINTS);
    h.remote.breakpoints().unwrap().set_breakpoint(pc_at(4), 1).unwrap();
    let mut rec = Recorder::default();

    h.resume(&[(T1, ContinueMode::GoPassEvent)]);
    h.dispatch(&mut rec);
    assert_eq!(h.remote.focus_thread().unwrap(), T1);

    h.resume(&[(T2, ContinueMode::StepPassEvent)]);
    h.dispatch(&mut rec);
    assert_eq!(rec.stops, vec![T1, T2]);
    assert_eq!(h.remote.focus_thread().unwrap(), T2);
    assert_eq!(h.remote.thread_stop_reason(T2).unwrap(), StopReason::Step);
    assert_eq!(h.remote.thread_stop_reason(T1).unwrap(), StopReason::Breakpoint);

    h.remote.kill().unwrap();
    let _ = h.finish();
}

#[test]
fn test_pc_at_top_of_address_space_runs_until_break()
{
    let mut h = Harness::start(SimTarget::new(), BackEndFeatures::empty());
    h.remote
        .set_register_value(T1, Reg::PC, &RegValue::from_u64(u64::MAX, 64))
        .unwrap();
    let mut rec = Recorder::default();

    for mode in [ContinueMode::StepPassEvent, ContinueMode::GoPassEvent] {
        h.resume(&[(T1, mode)]);
        h.remote.break_target().unwrap();
        h.dispatch(&mut rec);
        assert_eq!(h.remote.thread_stop_reason(T1).unwrap(), StopReason::Stopped);
        assert_eq!(h.remote.register_value(T1, Reg::PC).unwrap().value_as::<u64>(), u64::MAX);
    }

    h.remote.kill().unwrap();
    let (_, end) = h.finish();
    assert_eq!(end, SessionEnd::Terminated);
}

#[test]
fn test_connect_times_out_without_first_stop()
{
    initialize(InitializeFlags::TCP).unwrap();
    let mut back = BackEnd::new(BackEndConfig::server(0).with_session(session_config())).unwrap();
    let port = back.server_info().unwrap().local_port;
    let (release, released) = mpsc::channel::<()>();
    let handle = thread::spawn(move || {
        let connected = back.connect_from_client(Some(Duration::from_secs(5)));
        let _ = released.recv();
        connected
    });

    let front = FrontEnd::new(
        FrontEndConfig::client("127.0.0.1", port)
            .with_session(session_config().with_connect_timeout(Some(Duration::from_millis(200)))),
    )
    .unwrap();
    assert!(matches!(front.connect_to_server(), Err(ProtocolError::Timeout(_))));
    assert_eq!(front.state(), SessionState::Disconnected);

    release.send(()).unwrap();
    assert_eq!(handle.join().unwrap().unwrap(), Completion::Ok);
}

#[test]
fn test_batch_front_end_sees_every_reason()
{
    let target = two_threads_at_breakpoints();
    let mut h = Harness::connect(target, BackEndFeatures::BREAKPOINTS, FrontEndFeatures::MULTIPLE_STOP_REASONS);
    h.front.set_registers(sim::register_set().unwrap()).unwrap();
    set_twin_breakpoints(&mut h.remote);
    let mut rec = Recorder::default();

    h.resume(&[(T1, ContinueMode::GoPassEvent), (T2, ContinueMode::GoPassEvent)]);
    h.dispatch(&mut rec);
    assert_eq!(h.remote.thread_stop_reason(T1).unwrap(), StopReason::Breakpoint);
    assert_eq!(h.remote.thread_stop_reason(T2).unwrap(), StopReason::Breakpoint);
    h.remote.kill().unwrap();
    let _ = h.finish();
}

#[test]
fn test_commands_are_rejected_while_running()
{
    let mut h = Harness::start(SimTarget::new(), BackEndFeatures::empty());
    let mut rec = Recorder::default();
    h.resume(&[(T1, ContinueMode::GoPassEvent)]);

    assert!(matches!(
        h.remote.thread_count(),
        Err(ProtocolError::WrongMode {
            expected: SessionState::CommandMode,
            actual: SessionState::RunMode,
        })
    ));
    assert_eq!(
        h.front.handle_notifications(&mut rec, false).unwrap(),
        NotifyOutcome::NoNotification
    );

    h.remote.break_target().unwrap();
    assert_eq!(h.wait(&mut rec), NotifyOutcome::Dispatched);
    assert_eq!(rec.stops, vec![T1]);
    assert_eq!(h.remote.thread_stop_reason(T1).unwrap(), StopReason::Stopped);
    assert_eq!(h.remote.thread_count().unwrap(), 1);

    // Nothing to wait for in command mode, and break is a no-op
    assert_eq!(h.wait(&mut rec), NotifyOutcome::NoNotification);
    h.remote.break_target().unwrap();

    h.remote.detach().unwrap();
    let (_, end) = h.finish();
    assert_eq!(end, SessionEnd::Detached);
}

#[test]
fn test_interrupt_is_sticky_until_cleared()
{
    let mut h = Harness::start(SimTarget::new(), BackEndFeatures::empty());
    let mut rec = Recorder::default();
    h.resume(&[(T1, ContinueMode::GoPassEvent)]);

    h.front.interrupter().interrupt();
    assert_eq!(h.wait(&mut rec), NotifyOutcome::Interrupted);
    assert_eq!(h.wait(&mut rec), NotifyOutcome::Interrupted);

    h.front.clear_interrupt_flag();
    assert_eq!(
        h.front.handle_notifications(&mut rec, false).unwrap(),
        NotifyOutcome::NoNotification
    );

    h.remote.break_target().unwrap();
    assert_eq!(h.wait(&mut rec), NotifyOutcome::Dispatched);

    // Resuming clears a raised flag
    h.front.interrupt_notification_thread();
    h.resume(&[(T1, ContinueMode::GoPassEvent)]);
    assert_eq!(
        h.front.handle_notifications(&mut rec, false).unwrap(),
        NotifyOutcome::NoNotification
    );

    h.remote.break_target().unwrap();
    h.dispatch(&mut rec);
    h.remote.kill().unwrap();
    let _ = h.finish();
}

#[test]
fn test_capabilities_follow_advertised_features()
{
    let mut h = Harness::start(SimTarget::new(), BackEndFeatures::BREAKPOINTS);
    assert!(h.remote.breakpoints().is_some());
    assert!(h.remote.custom_commands().is_none());
    assert!(h.remote.image_extensions().is_none());
    assert!(h.remote.interface(InterfaceId::ProcessInfo).is_none());
    assert_eq!(
        h.remote.interface(InterfaceId::Breakpoints).map(|c| c.id()),
        Some(InterfaceId::Breakpoints)
    );
    h.remote.detach().unwrap();
    let _ = h.finish();
}

#[test]
fn test_optional_interfaces()
{
    let mut h = Harness::start(SimTarget::new(), BackEndFeatures::all());

    let reply = h.remote.custom_commands().unwrap().custom_command(T1, "echo hi").unwrap();
    assert!(reply.recognized);
    assert_eq!(reply.response, "hi\n");

    let info = h.remote.process_info().unwrap();
    assert_eq!(info.process_id().unwrap().0, sim::SIM_PID);
    assert_eq!(info.target_arch().unwrap(), "i386:x86-64");

    let xml = Commands::target_description(&mut h.remote)
        .unwrap()
        .target_description("target.xml")
        .unwrap();
    assert!(String::from_utf8(xml.to_vec()).unwrap().contains("<target"));

    let images = h.remote.image_extensions().unwrap();
    assert_eq!(images.image_count().unwrap(), 1);
    let main = images.image_id(0).unwrap();
    assert_eq!(images.image_info(main).unwrap().name, "sim.elf");

    h.remote.detach().unwrap();
    let _ = h.finish();
}

#[test]
fn test_thread_lifecycle_notifications()
{
    let mut target = SimTarget::new();
    target.script(pc_at(2), Action::SpawnThread {
        name: "worker".to_string(),
        entry: CODE_BASE + 0x200,
    });
    target.script(CODE_BASE + 0x204, Action::ThreadExit(7));
    let mut h = Harness::start(target, BackEndFeatures::THREAD_EXTENSIONS);
    h.remote
        .thread_extensions()
        .unwrap()
        .set_thread_notifications(ThreadNotifications::START | ThreadNotifications::EXIT)
        .unwrap();
    let mut rec = Recorder::default();

    h.resume(&[(T1, ContinueMode::GoPassEvent)]);
    h.dispatch(&mut rec);
    assert_eq!(rec.stops, vec![T2]);
    assert_eq!(h.remote.thread_stop_reason(T2).unwrap(), StopReason::ThreadStart);
    assert_eq!(h.remote.thread_extensions().unwrap().thread_info(T2).unwrap().name, "worker");

    h.resume(&[(T1, ContinueMode::GoPassEvent), (T2, ContinueMode::GoPassEvent)]);
    h.dispatch(&mut rec);
    assert_eq!(rec.stops, vec![T2, T2]);
    assert_eq!(h.remote.thread_stop_reason(T2).unwrap(), StopReason::ThreadExit);
    assert_eq!(h.remote.thread_extensions().unwrap().thread_exit_status(T2).unwrap(), 7);

    h.remote.kill().unwrap();
    let _ = h.finish();
}

#[test]
fn test_kill_with_notification_ends_in_exit()
{
    let mut h = Harness::start(SimTarget::new(), BackEndFeatures::KILL_WITH_NOTIFICATION);
    Commands::kill_with_notification(&mut h.remote)
        .unwrap()
        .kill_with_notification(9)
        .unwrap();
    assert_eq!(h.front.state(), SessionState::RunMode);

    let mut rec = Recorder::default();
    h.dispatch(&mut rec);
    assert_eq!(rec.exit, Some(9));
    let (target, end) = h.finish();
    assert_eq!(end, SessionEnd::Terminated);
    assert!(target.is_killed());
}

#[test]
fn test_register_set_locks_on_first_use()
{
    let mut h = Harness::connect(SimTarget::new(), BackEndFeatures::empty(), FrontEndFeatures::empty());
    assert!(matches!(
        h.remote.register_value(T1, Reg::PC),
        Err(ProtocolError::RegistersNotSet)
    ));

    h.front.set_registers(sim::register_set().unwrap()).unwrap();
    let pc = h.remote.register_value(T1, Reg::PC).unwrap();
    assert_eq!(pc.value_as::<u64>(), CODE_BASE);
    assert!(matches!(
        h.front.set_registers(sim::register_set().unwrap()),
        Err(ProtocolError::RegistersLocked)
    ));

    h.remote.detach().unwrap();
    let _ = h.finish();
}

#[test]
fn test_register_and_memory_writes()
{
    let mut h = Harness::start(SimTarget::new(), BackEndFeatures::empty());
    let set = sim::register_set().unwrap();
    let rax = set.find("rax").unwrap();
    let xmm0 = set.find("xmm0").unwrap();

    h.remote
        .set_register_value(T1, rax, &RegValue::from_u64(0xdead_beef, 64))
        .unwrap();
    h.front.invalidate_cached_state(T1, tether_protocol::InvalidateFlags::REGISTERS);
    assert_eq!(h.remote.register_value(T1, rax).unwrap().value_as::<u64>(), 0xdead_beef);

    let wide = RegValue::from_u128_parts(1, 2, 128);
    h.remote.set_register_value(T1, xmm0, &wide).unwrap();
    assert_eq!(h.remote.register_value(T1, xmm0).unwrap(), wide);

    let data = DataBuf::from_slice(&[1, 2, 3, 4]);
    assert_eq!(h.remote.set_memory_value(MEMORY_BASE, &data).unwrap(), 4);
    let read = h.remote.memory_value(AnyRange::new(MEMORY_BASE, 4)).unwrap();
    assert_eq!(read.as_slice(), data.as_slice());

    h.remote.detach().unwrap();
    let _ = h.finish();
}

#[derive(Default)]
struct Collector
{
    lines: Mutex<Vec<String>>,
}

impl LogNotifications for Collector
{
    fn notify_log_message(&self, message: &str)
    {
        self.lines.lock().unwrap().push(message.to_string());
    }
}

#[test]
fn test_log_receivers_see_traffic()
{
    let mut h = Harness::start(SimTarget::new(), BackEndFeatures::empty());
    let collector = Arc::new(Collector::default());
    let receiver: Arc<dyn LogNotifications> = collector.clone();
    h.front.add_log_notifications(Arc::clone(&receiver));

    h.remote.thread_count().unwrap();
    assert!(collector.lines.lock().unwrap().iter().any(|l| l.starts_with("->")));

    assert!(h.front.remove_log_notifications(&receiver));
    assert!(!h.front.remove_log_notifications(&receiver));
    h.remote.detach().unwrap();
    let _ = h.finish();
}

#[test]
fn test_front_end_as_server()
{
    initialize(InitializeFlags::TCP).unwrap();
    let front = FrontEnd::new(FrontEndConfig::server(0).with_session(session_config())).unwrap();
    let port = front.server_info().unwrap().local_port;

    let back_thread = thread::spawn(move || {
        let mut back = BackEnd::new(
            BackEndConfig::client("127.0.0.1", port)
                .with_kind(BackEndType::Simulator)
                .with_session(session_config()),
        )
        .unwrap();
        let mut target = SimTarget::new();
        back.connect_to_server().unwrap();
        target.attach(back.notification_sender());
        back.set_registers(sim::register_set().unwrap()).unwrap();
        target.report_initial_stop().unwrap();
        back.handle_commands(&mut target).unwrap()
    });

    let mut remote = front.connect_from_client(Some(Duration::from_secs(5))).unwrap();
    assert_eq!(front.state(), SessionState::CommandMode);
    assert_eq!(remote.focus_thread().unwrap(), T1);
    remote.detach().unwrap();
    assert_eq!(back_thread.join().unwrap(), SessionEnd::Detached);
}
