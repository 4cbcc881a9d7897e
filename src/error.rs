//! Error codes and error types.

use core::fmt;
use std::sync::Arc;

/// Protocol-level close codes carried by GoAway frames.
///
/// The low codes align with common HTTP/2-style transports so that peers
/// built on such stacks interpret them sensibly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ErrorCode {
    NoError = 0x0,
    ProtocolError = 0x1,
    InternalError = 0x2,
    FlowControlError = 0x3,
    SettingsError = 0x4,
    Cancelled = 0x8,
    Shutdown = 0xB,
}

impl ErrorCode {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0x0 => Some(Self::NoError),
            0x1 => Some(Self::ProtocolError),
            0x2 => Some(Self::InternalError),
            0x3 => Some(Self::FlowControlError),
            0x4 => Some(Self::SettingsError),
            0x8 => Some(Self::Cancelled),
            0xB => Some(Self::Shutdown),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoError => write!(f, "no error"),
            Self::ProtocolError => write!(f, "protocol error"),
            Self::InternalError => write!(f, "internal error"),
            Self::FlowControlError => write!(f, "flow control error"),
            Self::SettingsError => write!(f, "settings error"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Transport-level errors reported by the endpoint port.
///
/// I/O errors are wrapped in `Arc` so the error can be cloned into both the
/// handshake completion and the connection's own result.
#[derive(Debug, Clone)]
pub enum TransportError {
    Closed,
    Io(Arc<std::io::Error>),
    Timeout,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "transport closed"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Timeout => write!(f, "idle timeout expired"),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(Arc::new(e))
    }
}

/// Frame serialization errors from the encoder port.
///
/// An encode error never yields partial bytes.
#[derive(Debug, Clone)]
pub enum EncodeError {
    FrameTooLarge { len: u32, max: u32 },
    EncodeFailed(String),
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FrameTooLarge { len, max } => {
                write!(f, "frame {len} bytes exceeds max {max}")
            }
            Self::EncodeFailed(msg) => write!(f, "encode failed: {msg}"),
        }
    }
}

impl std::error::Error for EncodeError {}

/// Frame parsing errors from the decoder port.
#[derive(Debug, Clone)]
pub enum DecodeError {
    UnexpectedEof,
    FrameTooLarge { len: u32, max: u32 },
    TooManySettings { count: usize, max: usize },
    Malformed(String),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedEof => write!(f, "unexpected end of input"),
            Self::FrameTooLarge { len, max } => {
                write!(f, "inbound frame {len} bytes exceeds max {max}")
            }
            Self::TooManySettings { count, max } => {
                write!(f, "settings frame with {count} keys exceeds max {max}")
            }
            Self::Malformed(msg) => write!(f, "malformed frame: {msg}"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Rejection of a locally supplied settings value.
///
/// Detected before anything is transmitted; an out-of-range value surfaces
/// as a handshake failure, never as bytes on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsError {
    pub key: u16,
    pub value: u32,
    pub min: u32,
    pub max: u32,
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "setting {:#06x} value {} out of range [{}, {}]",
            self.key, self.value, self.min, self.max
        )
    }
}

impl std::error::Error for SettingsError {}

/// Flow-control window over/underflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowError {
    Overflow { current: i64, delta: i32 },
    Underflow { current: i64, delta: i32 },
}

impl fmt::Display for WindowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Overflow { current, delta } => {
                write!(f, "window overflow: {current} + {delta}")
            }
            Self::Underflow { current, delta } => {
                write!(f, "window underflow: {current} + {delta}")
            }
        }
    }
}

impl std::error::Error for WindowError {}

/// Handshake outcome errors delivered through the session completion.
#[derive(Debug, Clone)]
pub enum HandshakeError {
    InvalidSettings(SettingsError),
    Encode(EncodeError),
    Transport(TransportError),
    Cancelled,
    /// The driving side went away without resolving the completion.
    Abandoned,
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSettings(e) => write!(f, "invalid settings: {e}"),
            Self::Encode(e) => write!(f, "encode error: {e}"),
            Self::Transport(e) => write!(f, "transport error: {e}"),
            Self::Cancelled => write!(f, "handshake cancelled"),
            Self::Abandoned => write!(f, "handshake abandoned"),
        }
    }
}

impl std::error::Error for HandshakeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidSettings(e) => Some(e),
            Self::Encode(e) => Some(e),
            Self::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl From<SettingsError> for HandshakeError {
    fn from(e: SettingsError) -> Self {
        Self::InvalidSettings(e)
    }
}

impl From<EncodeError> for HandshakeError {
    fn from(e: EncodeError) -> Self {
        Self::Encode(e)
    }
}

impl From<TransportError> for HandshakeError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

/// Session-fatal errors after establishment.
#[derive(Debug, Clone)]
pub enum SessionError {
    FlowControl(WindowError),
    /// The session receive window was driven negative by peer data.
    WindowNegative { value: i64 },
    Transport(TransportError),
    Encode(EncodeError),
    Decode(DecodeError),
    Handshake(HandshakeError),
    /// An inbound frame that is illegal for the client role.
    Protocol(String),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FlowControl(e) => write!(f, "flow control error: {e}"),
            Self::WindowNegative { value } => {
                write!(f, "session receive window driven negative ({value})")
            }
            Self::Transport(e) => write!(f, "transport error: {e}"),
            Self::Encode(e) => write!(f, "encode error: {e}"),
            Self::Decode(e) => write!(f, "decode error: {e}"),
            Self::Handshake(e) => write!(f, "handshake failed: {e}"),
            Self::Protocol(msg) => write!(f, "protocol violation: {msg}"),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::FlowControl(e) => Some(e),
            Self::Transport(e) => Some(e),
            Self::Encode(e) => Some(e),
            Self::Decode(e) => Some(e),
            Self::Handshake(e) => Some(e),
            _ => None,
        }
    }
}

impl From<WindowError> for SessionError {
    fn from(e: WindowError) -> Self {
        Self::FlowControl(e)
    }
}

impl From<TransportError> for SessionError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl From<EncodeError> for SessionError {
    fn from(e: EncodeError) -> Self {
        Self::Encode(e)
    }
}

impl From<DecodeError> for SessionError {
    fn from(e: DecodeError) -> Self {
        Self::Decode(e)
    }
}

impl From<HandshakeError> for SessionError {
    fn from(e: HandshakeError) -> Self {
        Self::Handshake(e)
    }
}
