//! Structured frame values crossing the codec ports.
//!
//! The core never touches wire bytes: outbound frames are handed to the
//! encoder port as these values, and the decoder port dispatches inbound
//! frames in the same shape. Byte layout is the codec's business.

use bytes::Bytes;

use crate::{ErrorCode, Settings};

/// Stream identifier `0` addresses the session itself.
pub const SESSION_STREAM_ID: u32 = 0;

#[derive(Debug, Clone)]
pub enum Frame {
    /// The fixed client preface; must precede all other outbound traffic.
    Preface,
    /// Per-connection limits, exchanged once per handshake side.
    Settings(Settings),
    /// Grants `delta` flow-control credits on a stream (0 = session).
    WindowUpdate { stream_id: u32, delta: u32 },
    /// Application payload on a stream; the core only accounts its length.
    Data {
        stream_id: u32,
        payload: Bytes,
        end_stream: bool,
    },
    /// Orderly or abnormal connection close.
    GoAway { code: ErrorCode, reason: String },
}

impl Frame {
    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Preface => "preface",
            Self::Settings(_) => "settings",
            Self::WindowUpdate { .. } => "window_update",
            Self::Data { .. } => "data",
            Self::GoAway { .. } => "go_away",
        }
    }
}
