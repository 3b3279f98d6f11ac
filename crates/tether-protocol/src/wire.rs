//! # Wire Format
//!
//! Every message is one frame: a 4-byte big-endian length followed by that
//! many bytes of JSON.
//!
//! ```text
//! +----------------+---------------------------+
//! | length (u32be) | JSON encoded [`Message`]  |
//! +----------------+---------------------------+
//! ```
//!
//! Both sides open with a [`Hello`]. After that the front-end sends
//! [`Message::Request`] and [`Message::Break`], the back-end answers with
//! [`Message::Reply`] and reports stops with [`Message::Notify`].
//!
//! Unless an endpoint enables
//! [`EndpointOptions::UNLIMITED_LENGTH_PACKETS`](crate::types::EndpointOptions),
//! it rejects frames longer than its configured maximum. An oversized
//! incoming frame is skipped so the stream stays in sync.

use std::io::{ErrorKind, Read, Write};

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tether_core::{AnyAddr, AnyRange, DataBuf, RegValue};

use crate::error::{ProtocolError, ProtocolResult};
use crate::event::{Event, EventDetails};
use crate::types::{
    BackEndFeatures, BackEndType, ContinueMode, CustomCommandReply, FrontEndFeatures, FrontEndType, ImageId,
    ImageInfo, ImageNotifications, Os, ProcessId, Reg, SessionState, StopReason, ThreadId, ThreadInfo,
    ThreadNotifications,
};

/// Version carried in [`Hello`]; peers with a different version are refused
pub const PROTOCOL_VERSION: u32 = 1;

/// Bytes in a frame header
pub const FRAME_HEADER_LEN: usize = 4;

const READ_CHUNK: usize = 8 * 1024;

/// Registers sent along with a stop
pub type ExpeditedRegisters = SmallVec<[(Reg, RegValue); 4]>;

/// One frame's payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body", rename_all = "snake_case")]
pub enum Message
{
    Hello(Hello),
    Request
    {
        seq: u64,
        request: Request,
    },
    Reply
    {
        seq: u64,
        reply: Reply,
    },
    /// Stop a running target; ignored in command mode
    Break,
    Notify(Notice),
}

impl Message
{
    /// Short name for logs
    #[must_use]
    pub fn kind(&self) -> &'static str
    {
        match self {
            Message::Hello(_) => "hello",
            Message::Request { .. } => "request",
            Message::Reply { .. } => "reply",
            Message::Break => "break",
            Message::Notify(_) => "notify",
        }
    }
}

/// Handshake sent by both sides right after connecting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello
{
    pub version: u32,
    pub peer: Peer,
}

/// What an endpoint tells its peer about itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Peer
{
    FrontEnd
    {
        kind: FrontEndType,
        features: FrontEndFeatures,
    },
    BackEnd
    {
        kind: BackEndType,
        features: BackEndFeatures,
        os: Os,
    },
}

/// Front-end to back-end command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Request
{
    ThreadCount,
    ThreadId
    {
        index: usize,
    },
    FocusThread,
    ThreadExists
    {
        thread: ThreadId,
    },
    SetContinueMode
    {
        thread: ThreadId,
        mode: ContinueMode,
        event: Option<EventDetails>,
    },
    ContinueThreads,
    ThreadStopReason
    {
        thread: ThreadId,
    },
    ThreadStopEvent
    {
        thread: ThreadId,
    },
    Kill,
    Detach,
    RegisterValue
    {
        thread: ThreadId,
        reg: Reg,
    },
    SetRegisterValue
    {
        thread: ThreadId,
        reg: Reg,
        value: RegValue,
    },
    MemoryValue
    {
        range: AnyRange,
    },
    SetMemoryValue
    {
        addr: AnyAddr,
        value: DataBuf,
    },
    SetBreakpoint
    {
        addr: AnyAddr,
        size: usize,
    },
    ClearBreakpoint
    {
        addr: AnyAddr,
    },
    ThreadStopMessage
    {
        thread: ThreadId,
    },
    CustomCommand
    {
        thread: ThreadId,
        command: String,
    },
    KillWithNotification
    {
        exit_code: i64,
    },
    TargetDescription
    {
        name: String,
    },
    MarkEventNotIntercepted
    {
        event: Event,
    },
    MarkAllEventsIntercepted,
    SetImageNotifications
    {
        flags: ImageNotifications,
    },
    ImageCount,
    ImageId
    {
        index: usize,
    },
    ImageInfo
    {
        image: ImageId,
    },
    ThreadStopImage
    {
        thread: ThreadId,
    },
    SetThreadNotifications
    {
        flags: ThreadNotifications,
    },
    ThreadInfo
    {
        thread: ThreadId,
    },
    ThreadExitStatus
    {
        thread: ThreadId,
    },
    ProcessId,
    LoaderInfoAddr,
    TargetArch,
}

/// Back-end answer to a [`Request`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Reply
{
    Done,
    Count(usize),
    Thread(ThreadId),
    Flag(bool),
    StopReason(StopReason),
    Event(EventDetails),
    Register(RegValue),
    Memory(DataBuf),
    Written(usize),
    Text(String),
    Custom(CustomCommandReply),
    Image(ImageId),
    ImageInfo(ImageInfo),
    ThreadInfo(ThreadInfo),
    ExitStatus(i64),
    Process(ProcessId),
    Address(AnyAddr),
    Fault(Fault),
}

/// Failure reported in place of a [`Reply`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Fault
{
    Unsupported(String),
    AllThreadsFrozen,
    InvalidArgument(String),
    WrongMode
    {
        expected: SessionState,
        actual: SessionState,
    },
    RegistersNotSet,
    Failed(String),
}

impl From<&ProtocolError> for Fault
{
    fn from(err: &ProtocolError) -> Self
    {
        match err {
            ProtocolError::Unsupported(what) => Fault::Unsupported(what.clone()),
            ProtocolError::AllThreadsFrozen => Fault::AllThreadsFrozen,
            ProtocolError::InvalidArgument(what) => Fault::InvalidArgument(what.clone()),
            ProtocolError::WrongMode { expected, actual } => Fault::WrongMode {
                expected: *expected,
                actual: *actual,
            },
            ProtocolError::RegistersNotSet => Fault::RegistersNotSet,
            other => Fault::Failed(other.to_string()),
        }
    }
}

impl From<Fault> for ProtocolError
{
    fn from(fault: Fault) -> Self
    {
        match fault {
            Fault::Unsupported(what) => ProtocolError::Unsupported(what),
            Fault::AllThreadsFrozen => ProtocolError::AllThreadsFrozen,
            Fault::InvalidArgument(what) => ProtocolError::InvalidArgument(what),
            Fault::WrongMode { expected, actual } => ProtocolError::WrongMode { expected, actual },
            Fault::RegistersNotSet => ProtocolError::RegistersNotSet,
            Fault::Failed(what) => ProtocolError::Remote(what),
        }
    }
}

/// Back-end to front-end report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Notice
{
    /// The target stopped in `focus`
    Stopped
    {
        focus: ThreadId,
        /// Present when the back-end sends stop reasons
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<StopReason>,
        /// Accelerated registers of the focus thread
        #[serde(default)]
        registers: ExpeditedRegisters,
    },
    Exited
    {
        exit_code: i64,
    },
    Terminated
    {
        event: EventDetails,
    },
}

impl Notice
{
    /// Whether the notice ends the session
    #[must_use]
    pub fn is_terminal(&self) -> bool
    {
        !matches!(self, Notice::Stopped { .. })
    }
}

/// Serialize `message` into a frame.
///
/// ## Errors
///
/// Returns [`ProtocolError::FrameTooLarge`] if the body exceeds `max_len`.
pub fn encode_frame(message: &Message, max_len: Option<usize>) -> ProtocolResult<Vec<u8>>
{
    let body = serde_json::to_vec(message)?;
    let limit = max_len.unwrap_or(u32::MAX as usize).min(u32::MAX as usize);
    if body.len() > limit {
        return Err(ProtocolError::FrameTooLarge {
            len: body.len(),
            max: limit,
        });
    }
    let len = u32::try_from(body.len()).map_err(|_| ProtocolError::FrameTooLarge {
        len: body.len(),
        max: limit,
    })?;

    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Incremental frame decoder over a byte stream
///
/// Reads that time out are not errors: [`FrameReader::poll`] returns
/// `Ok(None)` so the caller can check its interrupt flag and poll again.
#[derive(Debug)]
pub struct FrameReader<R>
{
    inner: R,
    buf: Vec<u8>,
    max_len: Option<usize>,
    skip: usize,
}

impl<R: Read> FrameReader<R>
{
    pub fn new(inner: R, max_len: Option<usize>) -> Self
    {
        Self {
            inner,
            buf: Vec::new(),
            max_len,
            skip: 0,
        }
    }

    /// Read once from the stream and return the next complete message, if
    /// any.
    ///
    /// ## Errors
    ///
    /// - [`ProtocolError::Disconnected`] when the peer closed the stream
    /// - [`ProtocolError::FrameTooLarge`] for an oversized frame, which is
    ///   then skipped
    /// - [`ProtocolError::Codec`] for a frame that isn't a valid message
    pub fn poll(&mut self) -> ProtocolResult<Option<Message>>
    {
        if let Some(message) = self.take_frame()? {
            return Ok(Some(message));
        }

        let mut chunk = [0u8; READ_CHUNK];
        match self.inner.read(&mut chunk) {
            Ok(0) => Err(ProtocolError::Disconnected),
            Ok(n) => {
                self.buf.extend_from_slice(&chunk[..n]);
                self.take_frame()
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted) => {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn take_frame(&mut self) -> ProtocolResult<Option<Message>>
    {
        if self.skip > 0 {
            let n = self.skip.min(self.buf.len());
            self.buf.drain(..n);
            self.skip -= n;
            if self.skip > 0 {
                return Ok(None);
            }
        }
        if self.buf.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }

        let mut header = [0u8; FRAME_HEADER_LEN];
        header.copy_from_slice(&self.buf[..FRAME_HEADER_LEN]);
        let len = u32::from_be_bytes(header) as usize;
        if let Some(max) = self.max_len {
            if len > max {
                self.buf.drain(..FRAME_HEADER_LEN);
                self.skip = len;
                return Err(ProtocolError::FrameTooLarge { len, max });
            }
        }
        if self.buf.len() < FRAME_HEADER_LEN + len {
            return Ok(None);
        }

        let frame: Vec<u8> = self.buf.drain(..FRAME_HEADER_LEN + len).skip(FRAME_HEADER_LEN).collect();
        Ok(Some(serde_json::from_slice(&frame)?))
    }

    pub fn get_ref(&self) -> &R
    {
        &self.inner
    }
}

/// Frame encoder over a byte stream
#[derive(Debug)]
pub struct FrameWriter<W>
{
    inner: W,
    max_len: Option<usize>,
}

impl<W: Write> FrameWriter<W>
{
    pub fn new(inner: W, max_len: Option<usize>) -> Self
    {
        Self { inner, max_len }
    }

    /// Encode and flush one message.
    ///
    /// ## Errors
    ///
    /// Returns an error if the message is too large or the write fails.
    pub fn send(&mut self, message: &Message) -> ProtocolResult<()>
    {
        let frame = encode_frame(message, self.max_len)?;
        self.inner.write_all(&frame)?;
        self.inner.flush()?;
        Ok(())
    }

    pub fn get_ref(&self) -> &W
    {
        &self.inner
    }
}

#[cfg(test)]
mod tests
{
    use std::io::Cursor;

    use super::*;

    fn stopped() -> Message
    {
        let mut registers = ExpeditedRegisters::new();
        registers.push((Reg::concrete(16), RegValue::from_u64(0x40_1000, 64)));
        Message::Notify(Notice::Stopped {
            focus: ThreadId(1),
            reason: Some(StopReason::Breakpoint),
            registers,
        })
    }

    #[test]
    fn test_frames_decode_in_order()
    {
        let mut bytes = encode_frame(&Message::Break, None).unwrap();
        bytes.extend(encode_frame(&stopped(), None).unwrap());

        let mut reader = FrameReader::new(Cursor::new(bytes), Some(1024));
        assert_eq!(reader.poll().unwrap(), Some(Message::Break));
        assert_eq!(reader.poll().unwrap(), Some(stopped()));
        assert!(matches!(reader.poll(), Err(ProtocolError::Disconnected)));
    }

    /// Delivers at most one byte per read.
    struct Trickle(Cursor<Vec<u8>>);

    impl Read for Trickle
    {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize>
        {
            let n = buf.len().min(1);
            self.0.read(&mut buf[..n])
        }
    }

    #[test]
    fn test_partial_frames_wait_for_more_bytes()
    {
        let bytes = encode_frame(&Message::Break, None).unwrap();
        let total = bytes.len();
        let mut reader = FrameReader::new(Trickle(Cursor::new(bytes)), None);
        for _ in 1..total {
            assert_eq!(reader.poll().unwrap(), None);
        }
        assert_eq!(reader.poll().unwrap(), Some(Message::Break));
    }

    #[test]
    fn test_oversized_frame_is_skipped()
    {
        let big = Message::Reply {
            seq: 1,
            reply: Reply::Memory(DataBuf::from_vec(vec![0xab; 256])),
        };
        let mut bytes = encode_frame(&big, None).unwrap();
        bytes.extend(encode_frame(&Message::Break, None).unwrap());

        let mut reader = FrameReader::new(Cursor::new(bytes), Some(64));
        assert!(matches!(reader.poll(), Err(ProtocolError::FrameTooLarge { max: 64, .. })));
        let mut next = None;
        while next.is_none() {
            next = reader.poll().unwrap();
        }
        assert_eq!(next, Some(Message::Break));
    }

    #[test]
    fn test_writer_refuses_oversized_frame()
    {
        let mut writer = FrameWriter::new(Vec::new(), Some(8));
        let err = writer.send(&stopped()).unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTooLarge { max: 8, .. }));
        assert!(writer.get_ref().is_empty());
    }

    #[test]
    fn test_garbage_frame_is_codec_error()
    {
        let mut bytes = 3u32.to_be_bytes().to_vec();
        bytes.extend_from_slice(b"{x}");
        let mut reader = FrameReader::new(Cursor::new(bytes), None);
        assert!(matches!(reader.poll(), Err(ProtocolError::Codec(_))));
    }

    #[test]
    fn test_fault_maps_back_to_error()
    {
        let fault = Fault::from(&ProtocolError::AllThreadsFrozen);
        assert!(matches!(ProtocolError::from(fault), ProtocolError::AllThreadsFrozen));
        let fault = Fault::from(&ProtocolError::Disconnected);
        assert!(matches!(ProtocolError::from(fault), ProtocolError::Remote(_)));
    }
}
