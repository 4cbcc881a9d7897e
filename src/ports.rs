//! Collaborator interfaces consumed by the core.
//!
//! The session engine performs no byte-level serialization and no socket
//! I/O itself. Everything it needs from the outside world arrives through
//! the object-safe ports defined here: a frame encoder/decoder pair, an
//! endpoint (the transport), a scheduler for deadlines, and the
//! caller-supplied session listener. The ports are boxed-future based so
//! they stay usable behind `Arc<dyn ...>` across tasks.

use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;

use crate::{
    DecodeError, EncodeError, ErrorCode, Frame, SessionError, Settings, TransportError,
};
use crate::session::Session;

/// Serializes outgoing frames. A failure never yields partial bytes.
pub trait FrameEncoder: Send + Sync {
    fn encode(&self, frame: &Frame) -> Result<Bytes, EncodeError>;
}

/// Receives decoded frames from the decoder, one call per frame.
pub trait FrameSink {
    fn on_frame(&mut self, frame: Frame) -> Result<(), SessionError>;
}

/// Parses inbound bytes and dispatches decoded frames to a sink.
///
/// The limits are enforced by the decoder before dispatch: an oversized
/// frame or an over-long settings list is a decode error, and the sink
/// never sees the offending frame.
pub trait FrameDecoder: Send {
    fn feed(&mut self, bytes: &[u8], sink: &mut dyn FrameSink) -> Result<(), DecodeError>;

    fn set_max_frame_length(&mut self, len: u32);
    fn max_frame_length(&self) -> u32;
    fn set_max_settings_keys(&mut self, max: usize);
}

/// The transport underneath one connection.
///
/// `write` resolving successfully is the flush completion the handshake
/// orders itself around. `close` is idempotent and never blocks.
pub trait Endpoint: Send + Sync {
    fn write(&self, bytes: Bytes) -> BoxFuture<'_, Result<(), TransportError>>;
    fn read(&self) -> BoxFuture<'_, Result<Bytes, TransportError>>;
    fn close(&self);
    fn is_closed(&self) -> bool;
}

/// Caller-supplied observer for session lifecycle events.
///
/// `on_preface` is invoked exactly once per handshake, before any frame is
/// sent; returning `None` means "no overrides". A panicking listener is
/// contained and treated as `None`. A listener that blocks indefinitely
/// stalls its own handshake; that is the caller's responsibility, no hidden
/// timeout is applied here.
pub trait SessionListener: Send + Sync {
    fn on_preface(&self, session: &Session) -> Option<Settings> {
        let _ = session;
        None
    }

    fn on_close(&self, session: &Session, code: ErrorCode, reason: &str) {
        let _ = (session, code, reason);
    }
}

/// Schedules a deadline callback; supports cancellation.
pub trait Scheduler: Send + Sync {
    fn schedule(&self, delay: Duration, task: Box<dyn FnOnce() + Send>) -> Box<dyn Timeout>;
}

/// Handle to a scheduled deadline.
pub trait Timeout: Send + Sync {
    /// Best-effort: a callback already running may still complete.
    fn cancel(&self);
}

/// Tokio-backed [`Scheduler`].
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: Box<dyn FnOnce() + Send>) -> Box<dyn Timeout> {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task();
        });
        Box::new(TokioTimeout {
            handle: handle.abort_handle(),
        })
    }
}

struct TokioTimeout {
    handle: tokio::task::AbortHandle,
}

impl Timeout for TokioTimeout {
    fn cancel(&self) {
        self.handle.abort();
    }
}
