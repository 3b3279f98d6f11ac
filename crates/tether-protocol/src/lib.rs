//! # tether-protocol
//!
//! The session protocol between a debugger front-end and a target back-end.
//!
//! A [`FrontEnd`] lives next to the debugger and a [`BackEnd`] next to the
//! target. They talk over one TCP connection: the front-end sends
//! [`Commands`] while the target is stopped, and the back-end sends
//! [`Notifications`] when the target stops or terminates.
//!
//! ## Session lifecycle
//!
//! 1. Call [`initialize`] once per process.
//! 2. One endpoint listens (`server`), the other connects (`client`).
//! 3. The back-end reports the target's first stop; the front-end enters
//!    command mode.
//! 4. The front-end resumes the target with
//!    [`Commands::continue_threads`] and waits in
//!    [`FrontEnd::handle_notifications`] for the next stop.
//! 5. The session ends when the target exits, or the front-end kills or
//!    detaches.
//!
//! Optional back-end capabilities (breakpoints, images, custom commands,
//! ...) are advertised with [`BackEndFeatures`] and reached through the
//! accessors on [`Commands`].

pub mod backend;
pub mod commands;
mod debug_log;
pub mod error;
pub mod event;
pub mod frontend;
pub mod init;
pub mod sim;
pub mod state;
pub mod stops;
mod transport;
pub mod types;
pub mod wire;

pub use backend::{BackEnd, BackEndConfig, NotificationSender};
pub use commands::{
    Breakpoints, Capability, Commands, CustomBreakpoints, CustomCommands, EventInterception, ImageExtensions,
    KillWithNotification, LogNotifications, Notifications, ProcessInfo, TargetDescription, ThreadExtensions,
};
pub use error::{ProtocolError, ProtocolResult};
pub use event::{Event, EventDetails};
pub use frontend::{FrontEnd, FrontEndConfig, RemoteCommands};
pub use init::{cleanup, initialize, is_initialized};
pub use state::Interrupter;
pub use types::*;
