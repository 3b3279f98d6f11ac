use std::error::Error;
use std::process;
use std::thread;

use clap::{Parser, Subcommand};
use tether_core::{Address, AnyRange};
use tether_protocol::sim::{self, Action, SimTarget, CODE_BASE, INSTRUCTION_LEN};
use tether_protocol::{
    cleanup, initialize, BackEnd, BackEndConfig, BackEndFeatures, BackEndType, Commands, Completion, ContinueMode,
    EndpointOptions, EventDetails, FrontEnd, FrontEndConfig, FrontEndFeatures, ImageInfo, InitializeFlags,
    Notifications, NotifyOutcome, Os, ProtocolResult, Reg, RemoteCommands, SessionEnd, SessionState, ThreadId,
};
use tether_utils::{info, init_logging, init_logging_with_level, warn, LogFormat, LogLevel, SessionConfig};

type CliResult<T> = Result<T, Box<dyn Error>>;

/// Debugger session endpoints for the Tether front-end/back-end protocol.
#[derive(Parser, Debug)]
#[command(name = "tether")]
#[command(version)]
#[command(about = "Debugger session endpoints for the Tether front-end/back-end protocol", long_about = None)]
struct Cli
{
    /// Log level (overrides RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,
    /// Log format: pretty or json
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command
{
    /// Serve a simulated target as a back-end, one debugger session at a time
    Serve
    {
        /// Port to listen on (0 picks a free port)
        #[arg(short, long, default_value_t = 0)]
        port: u16,
        /// Accept front-ends from other hosts
        #[arg(long, default_value_t = false)]
        allow_remote: bool,
    },
    /// Connect to a back-end as a front-end and show its threads
    Connect
    {
        /// Back-end host
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        /// Back-end port
        port: u16,
        /// Breakpoint address to set (hex format: 0x1000 or decimal), may be repeated
        #[arg(short, long = "break")]
        breakpoints: Vec<Address>,
        /// Run the target until it exits, printing every stop
        #[arg(long, default_value_t = false)]
        run: bool,
    },
    /// Run a simulated back-end and a front-end in one process
    Demo,
}

fn main()
{
    let cli = Cli::parse();

    let logging = match cli.log_level {
        Some(level) => init_logging_with_level(level, cli.log_format.unwrap_or_default()),
        None => init_logging(),
    };
    let _guard = match logging {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            process::exit(1);
        }
    };

    if let Err(e) = run(cli.command) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run(command: Command) -> CliResult<()>
{
    let config = SessionConfig::from_env()?;
    initialize(InitializeFlags::TCP)?;
    let result = match command {
        Command::Serve { port, allow_remote } => serve(port, allow_remote, config),
        Command::Connect {
            host,
            port,
            breakpoints,
            run,
        } => connect(&host, port, &breakpoints, run, config),
        Command::Demo => demo(config),
    };
    cleanup(InitializeFlags::TCP)?;
    result
}

fn pc_at(n: u64) -> u64
{
    CODE_BASE + n * INSTRUCTION_LEN
}

/// Two threads, an event, an image load and an exit
fn demo_target() -> SimTarget
{
    let mut target = SimTarget::new();
    let worker_entry = CODE_BASE + 0x100;
    target.spawn("worker", worker_entry);
    target.script(pc_at(6), Action::Event(EventDetails::new(tether_protocol::event::linux::SIGUSR1)));
    target.script(
        pc_at(8),
        Action::LoadImage(ImageInfo {
            name: "libdemo.so".to_string(),
            range: AnyRange::new(0x7f00_0000, 0x1000),
        }),
    );
    target.script(worker_entry + 8 * INSTRUCTION_LEN, Action::ThreadExit(0));
    target.script(pc_at(20), Action::ProcessExit(0));
    target
}

fn back_end_config(port: u16, options: EndpointOptions, config: SessionConfig) -> BackEndConfig
{
    BackEndConfig::server(port)
        .with_kind(BackEndType::Simulator)
        .with_features(BackEndFeatures::all())
        .with_os(Os::host())
        .with_options(options | EndpointOptions::SEND_STOP_REASON)
        .with_session(config)
}

/// Run one session with a connected front-end
fn serve_session(back: &mut BackEnd) -> ProtocolResult<SessionEnd>
{
    let mut target = demo_target();
    target.attach(back.notification_sender());
    target.set_stop_mode(back.front_end_features().into());
    target.report_initial_stop()?;
    back.handle_commands(&mut target)
}

fn serve(port: u16, allow_remote: bool, config: SessionConfig) -> CliResult<()>
{
    let options = if allow_remote {
        EndpointOptions::ALLOW_REMOTE_CLIENTS
    } else {
        EndpointOptions::empty()
    };
    let mut back = BackEnd::new(back_end_config(port, options, config))?;
    back.set_registers(sim::register_set()?)?;
    let interrupter = back.interrupter();
    ctrlc::set_handler(move || interrupter.interrupt())?;
    println!("Listening on port {}", back.server_info()?.local_port);

    loop {
        if back.connect_from_client(None)? == Completion::Interrupted {
            println!("Interrupted");
            return Ok(());
        }
        println!("Front-end connected: {:?}", back.front_end_type());
        let end = serve_session(&mut back)?;
        println!("Session ended: {end:?}");
        if end == SessionEnd::Interrupted {
            return Ok(());
        }
        back.reset_server_connection()?;
        back.set_registers(sim::register_set()?)?;
    }
}

/// Prints notifications as they arrive
#[derive(Debug, Default)]
struct StopPrinter
{
    focus: Option<ThreadId>,
}

impl Notifications for StopPrinter
{
    fn notify_stopped(&mut self, focus: ThreadId) -> ProtocolResult<()>
    {
        self.focus = Some(focus);
        Ok(())
    }

    fn notify_terminated_exit(&mut self, exit_code: i64) -> ProtocolResult<()>
    {
        println!("Target exited with status {exit_code}");
        Ok(())
    }

    fn notify_terminated_event(&mut self, event: EventDetails) -> ProtocolResult<()>
    {
        println!("Target terminated by {}", event.event);
        Ok(())
    }
}

fn print_threads(remote: &mut RemoteCommands) -> ProtocolResult<()>
{
    let count = remote.thread_count()?;
    println!("Threads: {count}");
    for index in 0..count {
        let thread = remote.thread_id(index)?;
        let pc = remote.register_value(thread, Reg::PC)?;
        let reason = remote.thread_stop_reason(thread)?;
        let name = match remote.thread_extensions() {
            Some(ext) => ext.thread_info(thread)?.name,
            None => String::new(),
        };
        println!("  {thread} {name:<8} pc={pc} {reason:?}");
    }
    Ok(())
}

fn resume_all(remote: &mut RemoteCommands) -> ProtocolResult<()>
{
    for index in 0..remote.thread_count()? {
        let thread = remote.thread_id(index)?;
        remote.set_continue_mode(thread, ContinueMode::GoPassEvent, None)?;
    }
    remote.continue_threads()
}

fn connect(host: &str, port: u16, breakpoints: &[Address], run: bool, config: SessionConfig) -> CliResult<()>
{
    let front = FrontEnd::new(
        FrontEndConfig::client(host, port)
            .with_features(FrontEndFeatures::MULTIPLE_STOP_REASONS)
            .with_session(config),
    )?;
    let interrupter = front.interrupter();
    ctrlc::set_handler(move || interrupter.interrupt())?;

    let mut remote = front.connect_to_server()?;
    front.set_registers(sim::register_set()?)?;
    println!(
        "Connected to {:?} back-end ({:?}, features {:?})",
        front.back_end_type(),
        front.back_end_os(),
        front.back_end_features()
    );
    print_threads(&mut remote)?;

    for addr in breakpoints {
        let Some(bps) = remote.breakpoints() else {
            return Err("back-end does not support breakpoints".into());
        };
        if bps.set_breakpoint(addr.value(), 1)? {
            println!("Breakpoint set at {addr}");
        } else {
            warn!(addr = %addr, "Back-end refused breakpoint");
        }
    }

    if !run {
        remote.detach()?;
        return Ok(());
    }

    let mut printer = StopPrinter::default();
    let mut stopping = false;
    loop {
        resume_all(&mut remote)?;
        loop {
            match front.handle_notifications(&mut printer, true)? {
                NotifyOutcome::Dispatched => break,
                NotifyOutcome::NoNotification => {}
                NotifyOutcome::Interrupted => {
                    info!("Interrupted; breaking into the target");
                    front.clear_interrupt_flag();
                    stopping = true;
                    remote.break_target()?;
                }
            }
        }
        if front.state() == SessionState::Disconnected {
            return Ok(());
        }
        if let Some(focus) = printer.focus.take() {
            println!("Stopped: {focus} ({:?})", remote.thread_stop_reason(focus)?);
        }
        print_threads(&mut remote)?;
        if stopping {
            remote.detach()?;
            println!("Detached");
            return Ok(());
        }
    }
}

fn demo(config: SessionConfig) -> CliResult<()>
{
    let mut back = BackEnd::new(back_end_config(0, EndpointOptions::empty(), config.clone()))?;
    back.set_registers(sim::register_set()?)?;
    let port = back.server_info()?.local_port;
    info!(port, "Demo back-end listening");

    let server = thread::spawn(move || -> ProtocolResult<SessionEnd> {
        if back.connect_from_client(None)? == Completion::Interrupted {
            return Ok(SessionEnd::Interrupted);
        }
        serve_session(&mut back)
    });

    connect("127.0.0.1", port, &[Address::new(pc_at(4))], true, config)?;
    match server.join() {
        Ok(end) => {
            println!("Back-end session ended: {:?}", end?);
            Ok(())
        }
        Err(_) => Err("back-end thread panicked".into()),
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_breakpoint_addresses_parse_hex_or_decimal()
    {
        let cli = Cli::parse_from(["tether", "connect", "1", "-b", "0x1000", "--break", "4096"]);
        let Command::Connect { breakpoints, .. } = cli.command else {
            panic!("expected connect");
        };
        assert_eq!(breakpoints, vec![Address::new(0x1000), Address::new(4096)]);

        assert!(Cli::try_parse_from(["tether", "connect", "1", "-b", "0xzz"]).is_err());
    }

    #[test]
    fn test_cli_parses_connect()
    {
        let cli = Cli::parse_from(["tether", "--log-level", "debug", "connect", "7777", "-b", "0x400010", "--run"]);
        assert_eq!(cli.log_level, Some(LogLevel::Debug));
        let Command::Connect {
            host,
            port,
            breakpoints,
            run,
        } = cli.command
        else {
            panic!("expected connect");
        };
        assert_eq!(host, "127.0.0.1");
        assert_eq!(port, 7777);
        assert_eq!(breakpoints, vec![Address::new(0x40_0010)]);
        assert!(run);
    }

    #[test]
    fn test_demo_target_threads()
    {
        let target = demo_target();
        assert_eq!(target.thread_ids(), vec![ThreadId(1), ThreadId(2)]);
    }
}
