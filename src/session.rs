//! Session engine: stream counters, flow-control windows, negotiated limits.
//!
//! A [`Session`] is the long-lived object behind one established connection.
//! It owns the handshake state machine, both session-level windows, and the
//! monotonic stream counters, and it is the dispatch target for decoded
//! inbound frames. All mutation goes through the operations here; each one
//! takes the state lock (or an atomic) for the whole read-modify-write, so
//! they are safe to call from whichever task a completion lands on.
//!
//! The session performs no direct peer I/O: its only observable side
//! effects are counter/window state and frames emitted through the codec
//! ports.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::handshake::HandshakeState;
use crate::ports::{Endpoint, FrameEncoder};
use crate::settings::setting;
use crate::window::{DEFAULT_WINDOW_SIZE, FlowControlWindow};
use crate::{ErrorCode, Frame, SessionError, Settings};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Per-connection configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Desired session-level receive window. Anything above the protocol
    /// default is advertised to the peer as a window update at handshake
    /// time.
    pub initial_session_recv_window: i32,
    /// Advertised initial per-stream receive window.
    pub initial_stream_recv_window: i32,
    /// Maximum concurrent streams we allow the peer to open.
    pub max_concurrent_streams: u32,
    /// Largest inbound frame the decoder will accept.
    pub max_frame_length: u32,
    /// Largest inbound settings map the decoder will accept.
    pub max_settings_keys: usize,
    /// Fail the session when no inbound traffic arrives within this
    /// duration. `None` disables the deadline.
    pub stream_idle_timeout: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            initial_session_recv_window: DEFAULT_WINDOW_SIZE,
            initial_stream_recv_window: DEFAULT_WINDOW_SIZE,
            max_concurrent_streams: 128,
            max_frame_length: crate::settings::MIN_FRAME_SIZE,
            max_settings_keys: 64,
            stream_idle_timeout: None,
        }
    }
}

/// One logical multiplexed connection, client role.
pub struct Session {
    id: u64,
    state: Mutex<HandshakeState>,
    recv_window: FlowControlWindow,
    send_window: FlowControlWindow,
    streams_opened: AtomicU64,
    streams_closed: AtomicU64,
    local_max_streams: u32,
    remote_max_streams: AtomicU32,
    remote_initial_stream_window: AtomicU32,
    max_frame_length: AtomicU32,
    stream_idle_timeout: Option<Duration>,
    close_code: Mutex<Option<(ErrorCode, String)>>,
    encoder: Arc<dyn FrameEncoder>,
    endpoint: Arc<dyn Endpoint>,
}

impl Session {
    pub(crate) fn new(
        config: &SessionConfig,
        encoder: Arc<dyn FrameEncoder>,
        endpoint: Arc<dyn Endpoint>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            state: Mutex::new(HandshakeState::Created),
            recv_window: FlowControlWindow::new(DEFAULT_WINDOW_SIZE),
            send_window: FlowControlWindow::new(DEFAULT_WINDOW_SIZE),
            streams_opened: AtomicU64::new(0),
            streams_closed: AtomicU64::new(0),
            local_max_streams: config.max_concurrent_streams,
            remote_max_streams: AtomicU32::new(u32::MAX),
            remote_initial_stream_window: AtomicU32::new(DEFAULT_WINDOW_SIZE as u32),
            max_frame_length: AtomicU32::new(config.max_frame_length),
            stream_idle_timeout: config.stream_idle_timeout,
            close_code: Mutex::new(None),
            encoder,
            endpoint,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> HandshakeState {
        *self.state.lock()
    }

    pub fn is_established(&self) -> bool {
        self.state() == HandshakeState::Established
    }

    // ------------------------------------------------------------------
    // Stream accounting
    // ------------------------------------------------------------------

    pub fn record_stream_opened(&self) {
        self.streams_opened.fetch_add(1, Ordering::Relaxed);
    }

    /// Closed never exceeds opened: a violating call is dropped and logged
    /// instead of corrupting the metrics.
    pub fn record_stream_closed(&self) {
        let opened = self.streams_opened.load(Ordering::Relaxed);
        let result = self
            .streams_closed
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |closed| {
                (closed < opened).then_some(closed + 1)
            });
        if result.is_err() {
            tracing::warn!(
                session_id = self.id,
                opened,
                "stream close recorded with no matching open; ignored"
            );
        }
    }

    pub fn streams_opened(&self) -> u64 {
        self.streams_opened.load(Ordering::Relaxed)
    }

    pub fn streams_closed(&self) -> u64 {
        self.streams_closed.load(Ordering::Relaxed)
    }

    pub fn local_max_concurrent_streams(&self) -> u32 {
        self.local_max_streams
    }

    /// Peer-advertised limit; unlimited until a settings frame says
    /// otherwise. Enforced only after handshake completion.
    pub fn remote_max_concurrent_streams(&self) -> u32 {
        self.remote_max_streams.load(Ordering::Relaxed)
    }

    pub fn stream_idle_timeout(&self) -> Option<Duration> {
        self.stream_idle_timeout
    }

    /// Largest frame we may currently send, as negotiated by the peer.
    pub fn max_frame_length(&self) -> u32 {
        self.max_frame_length.load(Ordering::Relaxed)
    }

    pub fn remote_initial_stream_window(&self) -> u32 {
        self.remote_initial_stream_window.load(Ordering::Relaxed)
    }

    // ------------------------------------------------------------------
    // Settings and windows
    // ------------------------------------------------------------------

    /// Merge peer-advertised settings into session limits.
    ///
    /// Unknown keys are ignored, not errors.
    pub fn apply_inbound_settings(&self, settings: &Settings) {
        for (key, value) in settings.iter() {
            match key {
                setting::MAX_FRAME_SIZE => {
                    self.max_frame_length.store(value, Ordering::Relaxed);
                    tracing::debug!(session_id = self.id, value, "peer max frame length applied");
                }
                setting::MAX_CONCURRENT_STREAMS => {
                    self.remote_max_streams.store(value, Ordering::Relaxed);
                    tracing::debug!(session_id = self.id, value, "peer max streams applied");
                }
                setting::INITIAL_WINDOW_SIZE => {
                    self.remote_initial_stream_window
                        .store(value, Ordering::Relaxed);
                }
                _ => {
                    tracing::trace!(session_id = self.id, key, value, "ignoring unknown setting");
                }
            }
        }
    }

    pub fn recv_window(&self) -> i64 {
        self.recv_window.value()
    }

    pub fn send_window(&self) -> i64 {
        self.send_window.value()
    }

    /// Adjust the session receive window.
    ///
    /// A negative result means the peer sent more than it was allowed to:
    /// a session-fatal flow-control violation.
    pub fn update_recv_window(&self, delta: i32) -> Result<i64, SessionError> {
        let value = self.recv_window.delta(delta)?;
        if value < 0 {
            return Err(SessionError::WindowNegative { value });
        }
        Ok(value)
    }

    pub fn update_send_window(&self, delta: i32) -> Result<i64, SessionError> {
        Ok(self.send_window.delta(delta)?)
    }

    fn consume_recv_window(&self, len: usize) -> Result<i64, SessionError> {
        let delta = i32::try_from(len)
            .map_err(|_| SessionError::Protocol(format!("data frame of {len} bytes")))?;
        self.update_recv_window(-delta)
    }

    // ------------------------------------------------------------------
    // Inbound frame dispatch
    // ------------------------------------------------------------------

    /// Dispatch target wired to the decoder port.
    pub fn on_frame(&self, frame: Frame) -> Result<(), SessionError> {
        tracing::trace!(session_id = self.id, kind = frame.kind(), "inbound frame");
        match frame {
            Frame::Settings(settings) => {
                self.apply_inbound_settings(&settings);
                Ok(())
            }
            Frame::WindowUpdate { stream_id: 0, delta } => {
                let delta = i32::try_from(delta).map_err(|_| {
                    SessionError::Protocol(format!("window update delta {delta} out of range"))
                })?;
                self.update_send_window(delta)?;
                Ok(())
            }
            Frame::WindowUpdate { stream_id, .. } => {
                // Per-stream windows are the stream layer's concern.
                tracing::trace!(session_id = self.id, stream_id, "stream window update ignored");
                Ok(())
            }
            Frame::Data { payload, .. } => {
                self.consume_recv_window(payload.len())?;
                Ok(())
            }
            Frame::GoAway { code, reason } => {
                self.peer_go_away(code, &reason);
                Ok(())
            }
            Frame::Preface => Err(SessionError::Protocol(
                "unexpected preface from peer".into(),
            )),
        }
    }

    // ------------------------------------------------------------------
    // Close paths
    // ------------------------------------------------------------------

    /// Issue an abnormal or orderly close to the peer.
    ///
    /// Emits a GoAway frame and closes the endpoint once the write has been
    /// dispatched; does not wait for peer acknowledgment. Idempotent: a
    /// session already closing or terminal is left alone.
    pub fn close(&self, code: ErrorCode, reason: &str) -> Result<(), SessionError> {
        {
            let mut state = self.state.lock();
            match *state {
                HandshakeState::Closing | HandshakeState::Closed | HandshakeState::Failed => {
                    return Ok(());
                }
                _ => *state = HandshakeState::Closing,
            }
        }
        self.record_close_code(code, reason);
        tracing::debug!(session_id = self.id, %code, reason, "closing session");

        let bytes = match self.encoder.encode(&Frame::GoAway {
            code,
            reason: reason.to_string(),
        }) {
            Ok(bytes) => bytes,
            Err(e) => {
                // Could not even serialize the close; drop the transport.
                self.endpoint.close();
                return Err(e.into());
            }
        };

        let endpoint = Arc::clone(&self.endpoint);
        let session_id = self.id;
        tokio::spawn(async move {
            if let Err(e) = endpoint.write(bytes).await {
                tracing::debug!(session_id, error = %e, "close frame write failed");
            }
            endpoint.close();
        });
        Ok(())
    }

    /// The last close code observed, whether sent or received.
    pub fn close_code(&self) -> Option<(ErrorCode, String)> {
        self.close_code.lock().clone()
    }

    fn peer_go_away(&self, code: ErrorCode, reason: &str) {
        tracing::debug!(session_id = self.id, %code, reason, "peer closed session");
        self.record_close_code(code, reason);
        {
            let mut state = self.state.lock();
            if !state.is_terminal() {
                *state = HandshakeState::Closing;
            }
        }
        self.endpoint.close();
    }

    /// Route any session-fatal condition through the single failure path:
    /// record a close code, transition to `Failed`, drop the transport.
    /// Later calls are no-ops.
    pub(crate) fn fail(&self, error: &SessionError) {
        if !self.try_fail() {
            return;
        }
        let code = match error {
            SessionError::FlowControl(_) | SessionError::WindowNegative { .. } => {
                ErrorCode::FlowControlError
            }
            SessionError::Decode(_) | SessionError::Protocol(_) => ErrorCode::ProtocolError,
            SessionError::Handshake(crate::HandshakeError::InvalidSettings(_)) => {
                ErrorCode::SettingsError
            }
            SessionError::Handshake(crate::HandshakeError::Cancelled) => ErrorCode::Cancelled,
            _ => ErrorCode::InternalError,
        };
        self.record_close_code(code, &error.to_string());
        tracing::error!(session_id = self.id, error = %error, "session failed");
        self.endpoint.close();
    }

    fn record_close_code(&self, code: ErrorCode, reason: &str) {
        let mut slot = self.close_code.lock();
        if slot.is_none() {
            *slot = Some((code, reason.to_string()));
        }
    }

    // ------------------------------------------------------------------
    // State transitions (idempotent-guarded)
    // ------------------------------------------------------------------

    pub(crate) fn mark_preface_queued(&self) {
        let mut state = self.state.lock();
        if *state == HandshakeState::Created {
            *state = HandshakeState::PrefaceQueued;
        }
    }

    pub(crate) fn mark_awaiting_flush(&self) {
        let mut state = self.state.lock();
        if *state == HandshakeState::PrefaceQueued {
            *state = HandshakeState::AwaitingFlush;
        }
    }

    /// Flush-success transition. False when the handshake already failed or
    /// was cancelled, in which case the caller must not resolve success.
    pub(crate) fn try_establish(&self) -> bool {
        let mut state = self.state.lock();
        match *state {
            HandshakeState::PrefaceQueued | HandshakeState::AwaitingFlush => {
                *state = HandshakeState::Established;
                true
            }
            _ => false,
        }
    }

    /// Failure transition. False when already terminal; guards against a
    /// transport redundantly reporting completion.
    pub(crate) fn try_fail(&self) -> bool {
        let mut state = self.state.lock();
        if state.is_terminal() {
            false
        } else {
            *state = HandshakeState::Failed;
            true
        }
    }

    pub(crate) fn finish_close(&self) {
        let mut state = self.state.lock();
        if *state == HandshakeState::Closing {
            *state = HandshakeState::Closed;
        }
    }
}


impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("recv_window", &self.recv_window.value())
            .field("send_window", &self.send_window.value())
            .field("streams_opened", &self.streams_opened())
            .field("streams_closed", &self.streams_closed())
            .finish()
    }
}
