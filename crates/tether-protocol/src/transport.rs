//! # TCP Transport
//!
//! Listening, accepting and connecting, plus the handshake both endpoints
//! run once a socket is up. Accepting polls a non-blocking listener so that
//! a pending accept can be interrupted.

use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use tether_utils::SessionConfig;

use crate::debug_log::DebugLog;
use crate::error::{ProtocolError, ProtocolResult};
use crate::types::EndpointOptions;
use crate::wire::{FrameReader, FrameWriter, Hello, Message, PROTOCOL_VERSION};

const LOOPBACK: &str = "127.0.0.1";

/// Read and write halves of an established session socket
#[derive(Debug)]
pub(crate) struct Connection
{
    pub(crate) reader: FrameReader<TcpStream>,
    pub(crate) writer: FrameWriter<TcpStream>,
    pub(crate) peer_addr: Option<SocketAddr>,
}

/// Frame limit implied by the endpoint options
pub(crate) fn frame_limit(options: EndpointOptions, config: &SessionConfig) -> Option<usize>
{
    if options.contains(EndpointOptions::UNLIMITED_LENGTH_PACKETS) {
        None
    } else {
        Some(config.max_frame_len)
    }
}

/// Bind a listening socket for a server endpoint.
///
/// Servers only accept loopback clients unless `ALLOW_REMOTE_CLIENTS` is
/// set, in which case they bind [`SessionConfig::bind_host`].
pub(crate) fn bind(port: u16, options: EndpointOptions, config: &SessionConfig) -> ProtocolResult<TcpListener>
{
    let host = if options.contains(EndpointOptions::ALLOW_REMOTE_CLIENTS) {
        config.bind_host.as_str()
    } else {
        LOOPBACK
    };
    let listener = TcpListener::bind((host, port))?;
    listener.set_nonblocking(true)?;
    info!(address = %listener.local_addr()?, "Listening for a peer");
    Ok(listener)
}

/// Wait for a client.
///
/// Returns `Ok(None)` when `should_stop` returns true, which is checked
/// every poll interval, and [`ProtocolError::Timeout`] when `timeout`
/// elapses.
pub(crate) fn accept<F>(
    listener: &TcpListener,
    timeout: Option<Duration>,
    config: &SessionConfig,
    mut should_stop: F,
) -> ProtocolResult<Option<TcpStream>>
where
    F: FnMut() -> bool,
{
    let deadline = timeout.map(|t| Instant::now() + t);
    loop {
        if should_stop() {
            debug!("Accept interrupted");
            return Ok(None);
        }
        match listener.accept() {
            Ok((stream, addr)) => {
                info!(peer = %addr, "Accepted connection");
                stream.set_nonblocking(false)?;
                return Ok(Some(stream));
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(e) => return Err(e.into()),
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(ProtocolError::Timeout("a client connection"));
        }
        thread::sleep(config.poll_interval);
    }
}

/// Connect to a server at `host:port`.
pub(crate) fn connect(host: &str, port: u16, config: &SessionConfig) -> ProtocolResult<TcpStream>
{
    let mut last_err = None;
    for addr in (host, port).to_socket_addrs()? {
        let attempt = match config.connect_timeout {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
            None => TcpStream::connect(addr),
        };
        match attempt {
            Ok(stream) => {
                info!(server = %addr, "Connected");
                return Ok(stream);
            }
            Err(e) => {
                debug!(server = %addr, error = %e, "Connect attempt failed");
                last_err = Some(e);
            }
        }
    }
    Err(last_err.map_or_else(
        || ProtocolError::InvalidArgument(format!("{host}:{port} resolves to no address")),
        ProtocolError::Io,
    ))
}

/// Exchange [`Hello`] messages on a fresh socket.
///
/// Both sides send first and then wait for the peer, so the exchange
/// can't deadlock.
pub(crate) fn handshake(
    stream: TcpStream,
    ours: Hello,
    max_len: Option<usize>,
    config: &SessionConfig,
    log: &DebugLog,
) -> ProtocolResult<(Connection, Hello)>
{
    stream.set_nodelay(true)?;
    stream.set_read_timeout(Some(config.poll_interval))?;
    let peer_addr = stream.peer_addr().ok();
    let mut writer = FrameWriter::new(stream.try_clone()?, max_len);
    let mut reader = FrameReader::new(stream, max_len);

    let hello = Message::Hello(ours);
    log.emit(|| format!("-> {hello:?}"));
    writer.send(&hello)?;

    let deadline = config.connect_timeout.map(|t| Instant::now() + t);
    let theirs = loop {
        match reader.poll()? {
            Some(Message::Hello(hello)) => break hello,
            Some(other) => {
                return Err(ProtocolError::UnexpectedMessage(format!(
                    "{} before handshake",
                    other.kind()
                )))
            }
            None if deadline.is_some_and(|d| Instant::now() >= d) => {
                return Err(ProtocolError::Timeout("the peer's handshake"));
            }
            None => {}
        }
    };
    log.emit(|| format!("<- {theirs:?}"));

    if theirs.version != PROTOCOL_VERSION {
        warn!(ours = PROTOCOL_VERSION, theirs = theirs.version, "Protocol version mismatch");
        return Err(ProtocolError::UnexpectedMessage(format!(
            "peer speaks protocol version {}",
            theirs.version
        )));
    }

    Ok((
        Connection {
            reader,
            writer,
            peer_addr,
        },
        theirs,
    ))
}
