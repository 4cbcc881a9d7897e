//! Connection handshake: preface batching and single-resolution promise.
//!
//! The coordinator assembles the entire client preface (magic bytes,
//! initial settings, optional session window update) into one buffer and
//! hands it to the transport as a single write. Nothing inbound may be
//! dispatched before that write completes; the bootstrap pump only starts
//! reading after [`HandshakeCoordinator::run`] returns.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use bytes::BytesMut;

use crate::completion::Completer;
use crate::ports::{Endpoint, FrameDecoder, FrameEncoder, SessionListener};
use crate::session::{Session, SessionConfig};
use crate::settings::setting;
use crate::window::DEFAULT_WINDOW_SIZE;
use crate::{Frame, HandshakeError, Settings};

/// Lifecycle of a session, from construction to teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Session object exists, nothing sent yet.
    Created,
    /// Preface batch assembled and queued for the transport.
    PrefaceQueued,
    /// Waiting on the transport to confirm the flush.
    AwaitingFlush,
    /// Preface flushed; the session is usable.
    Established,
    /// Orderly shutdown in progress, GoAway sent or received.
    Closing,
    /// Orderly shutdown finished.
    Closed,
    /// Session is dead from an error, timeout, or cancellation.
    Failed,
}

impl HandshakeState {
    /// Terminal states admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, HandshakeState::Closed | HandshakeState::Failed)
    }
}

pub(crate) struct HandshakeCoordinator {
    session: Arc<Session>,
    listener: Arc<dyn SessionListener>,
    completer: Completer<Arc<Session>>,
    config: SessionConfig,
    encoder: Arc<dyn FrameEncoder>,
    endpoint: Arc<dyn Endpoint>,
}

impl HandshakeCoordinator {
    pub(crate) fn new(
        session: Arc<Session>,
        listener: Arc<dyn SessionListener>,
        completer: Completer<Arc<Session>>,
        config: SessionConfig,
        encoder: Arc<dyn FrameEncoder>,
        endpoint: Arc<dyn Endpoint>,
    ) -> Self {
        Self {
            session,
            listener,
            completer,
            config,
            encoder,
            endpoint,
        }
    }

    /// Drive the handshake to exactly one resolution.
    ///
    /// On success the session is `Established` and the completion resolves
    /// with it. On any failure the session is failed, the transport closed,
    /// and the completion resolves with the same error this returns. A
    /// concurrent cancellation that wins the state race simply makes the
    /// success transition a no-op; the completion was already resolved by
    /// the canceller.
    pub(crate) async fn run(
        &self,
        decoder: &mut dyn FrameDecoder,
    ) -> Result<Arc<Session>, HandshakeError> {
        match self.drive(decoder).await {
            Ok(()) => Ok(Arc::clone(&self.session)),
            Err(e) => {
                if self.session.try_fail() {
                    self.endpoint.close();
                }
                self.completer.fail(e.clone());
                Err(e)
            }
        }
    }

    async fn drive(&self, decoder: &mut dyn FrameDecoder) -> Result<(), HandshakeError> {
        let settings = self.gather_settings();

        // The frame size we advertise is the largest the peer may send us,
        // so the inbound decoder must honor it before any byte arrives.
        if let Some(max) = settings.get(setting::MAX_FRAME_SIZE) {
            decoder.set_max_frame_length(max);
        }
        settings.validate()?;

        let mut batch = BytesMut::new();
        let mut frames = vec![Frame::Preface, Frame::Settings(settings)];

        // Grow the session receive window beyond the protocol default by
        // advertising the surplus. Shrinking below the default is not
        // expressible on the wire, so a non-positive request sends nothing;
        // saturation keeps an absurdly negative request from overflowing.
        let delta = self
            .config
            .initial_session_recv_window
            .saturating_sub(DEFAULT_WINDOW_SIZE);
        if delta > 0 {
            self.session
                .update_recv_window(delta)
                .map_err(|_| HandshakeError::InvalidSettings(crate::SettingsError {
                    key: setting::INITIAL_WINDOW_SIZE,
                    value: self.config.initial_session_recv_window as u32,
                    min: 0,
                    max: crate::settings::MAX_WINDOW_SIZE,
                }))?;
            frames.push(Frame::WindowUpdate {
                stream_id: crate::frame::SESSION_STREAM_ID,
                delta: delta as u32,
            });
        }

        for frame in &frames {
            batch.extend_from_slice(&self.encoder.encode(frame)?);
        }
        self.session.mark_preface_queued();

        tracing::debug!(
            session_id = self.session.id(),
            frames = frames.len(),
            bytes = batch.len(),
            "flushing client preface"
        );
        self.session.mark_awaiting_flush();
        self.endpoint.write(batch.freeze()).await?;

        if self.session.try_establish() {
            self.completer.succeed(Arc::clone(&self.session));
            tracing::info!(session_id = self.session.id(), "session established");
        } else {
            tracing::debug!(
                session_id = self.session.id(),
                state = ?self.session.state(),
                "flush completed after session left handshake"
            );
        }
        Ok(())
    }

    /// Ask the listener for overrides, then fill in configured defaults for
    /// anything it left unset. A panicking listener contributes nothing.
    fn gather_settings(&self) -> Settings {
        let overrides = catch_unwind(AssertUnwindSafe(|| {
            self.listener.on_preface(&self.session)
        }))
        .unwrap_or_else(|_| {
            tracing::warn!(
                session_id = self.session.id(),
                "listener panicked in on_preface, using defaults"
            );
            None
        });

        let mut settings = overrides.unwrap_or_default();
        settings.set_if_absent(
            setting::INITIAL_WINDOW_SIZE,
            self.config.initial_stream_recv_window as u32,
        );
        settings.set_if_absent(
            setting::MAX_CONCURRENT_STREAMS,
            self.config.max_concurrent_streams,
        );
        settings
    }
}
