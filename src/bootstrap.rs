//! Connection bootstrap: wires the ports together, runs the handshake, and
//! pumps inbound bytes into the session until the connection ends.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::completion::{Completer, Completion, completion};
use crate::handshake::{HandshakeCoordinator, HandshakeState};
use crate::ports::{
    Endpoint, FrameDecoder, FrameEncoder, FrameSink, Scheduler, SessionListener, TokioScheduler,
};
use crate::registry::SessionRegistry;
use crate::session::{Session, SessionConfig};
use crate::{ErrorCode, Frame, HandshakeError, SessionError, TransportError};

/// Factory for client connections sharing one configuration and registry.
pub struct Connector {
    config: SessionConfig,
    registry: Arc<SessionRegistry>,
    scheduler: Arc<dyn Scheduler>,
}

impl Connector {
    pub fn new(config: SessionConfig) -> Self {
        Self::with_scheduler(config, Arc::new(TokioScheduler))
    }

    pub fn with_scheduler(config: SessionConfig, scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            config,
            registry: Arc::new(SessionRegistry::new()),
            scheduler,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Wire up a new connection over an already-open transport.
    ///
    /// Nothing is sent yet; the caller drives the returned [`Connection`]
    /// with [`Connection::run`] and observes the handshake outcome through
    /// the returned completion. The decoder is clamped to the configured
    /// inbound limits here, before any byte can reach it.
    pub fn connect(
        &self,
        endpoint: Arc<dyn Endpoint>,
        encoder: Arc<dyn FrameEncoder>,
        mut decoder: Box<dyn FrameDecoder>,
        listener: Arc<dyn SessionListener>,
    ) -> (Connection, Completion<Arc<Session>>) {
        decoder.set_max_frame_length(self.config.max_frame_length);
        decoder.set_max_settings_keys(self.config.max_settings_keys);

        let session = Session::new(&self.config, Arc::clone(&encoder), Arc::clone(&endpoint));
        let (completer, handle) = completion();
        tracing::debug!(session_id = session.id(), "connection wired");

        let connection = Connection {
            session,
            config: self.config.clone(),
            registry: Arc::clone(&self.registry),
            scheduler: Arc::clone(&self.scheduler),
            endpoint,
            encoder,
            decoder,
            listener,
            completer,
        };
        (connection, handle)
    }
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish()
    }
}

/// One wired connection, ready to be driven.
pub struct Connection {
    session: Arc<Session>,
    config: SessionConfig,
    registry: Arc<SessionRegistry>,
    scheduler: Arc<dyn Scheduler>,
    endpoint: Arc<dyn Endpoint>,
    encoder: Arc<dyn FrameEncoder>,
    decoder: Box<dyn FrameDecoder>,
    listener: Arc<dyn SessionListener>,
    completer: Completer<Arc<Session>>,
}

impl Connection {
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Handle for aborting the connection from another task.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            session: Arc::clone(&self.session),
            completer: self.completer.clone(),
        }
    }

    /// Drive the connection to completion.
    ///
    /// Runs the handshake, registers the session, then pumps inbound bytes
    /// until the transport closes or a session-fatal error occurs. The
    /// handshake completion is resolved from inside; this future's own
    /// result is for the task that owns the pump.
    pub async fn run(mut self) -> Result<(), SessionError> {
        let coordinator = HandshakeCoordinator::new(
            Arc::clone(&self.session),
            Arc::clone(&self.listener),
            self.completer.clone(),
            self.config.clone(),
            Arc::clone(&self.encoder),
            Arc::clone(&self.endpoint),
        );
        let session = coordinator.run(self.decoder.as_mut()).await?;
        if session.state() == HandshakeState::Failed {
            // A cancellation won the race while the flush was in flight;
            // the completion is already resolved.
            return Err(SessionError::Handshake(HandshakeError::Cancelled));
        }

        self.registry.register(&session);
        let result = self.pump().await;
        self.registry.unregister(session.id());

        let result = match result {
            Ok(()) => {
                session.finish_close();
                Ok(())
            }
            Err(e) => {
                session.fail(&e);
                Err(e)
            }
        };

        let (code, reason) = session
            .close_code()
            .unwrap_or((ErrorCode::NoError, String::new()));
        self.notify_close(code, &reason);
        result
    }

    /// Read-decode-dispatch loop. Returns `Ok` only for an orderly close.
    async fn pump(&mut self) -> Result<(), SessionError> {
        let timed_out = Arc::new(AtomicBool::new(false));
        let mut sink = SessionSink {
            session: Arc::clone(&self.session),
            error: None,
        };

        loop {
            // Arm the idle deadline around each read. Expiry fails the
            // session and drops the transport, which unblocks the read.
            let deadline = self.session.stream_idle_timeout().map(|idle| {
                let session = Arc::clone(&self.session);
                let flag = Arc::clone(&timed_out);
                self.scheduler.schedule(
                    idle,
                    Box::new(move || {
                        flag.store(true, Ordering::SeqCst);
                        session.fail(&SessionError::Transport(TransportError::Timeout));
                    }),
                )
            });
            let read = self.endpoint.read().await;
            if let Some(deadline) = deadline {
                deadline.cancel();
            }

            match read {
                // Bytes that arrived at the deadline boundary are still
                // dispatched; an expiry that raced this read surfaces on
                // the next one.
                Ok(bytes) => {
                    self.decoder.feed(&bytes, &mut sink)?;
                    if let Some(e) = sink.error.take() {
                        return Err(e);
                    }
                }
                Err(_) if timed_out.load(Ordering::SeqCst) => {
                    return Err(SessionError::Transport(TransportError::Timeout));
                }
                Err(TransportError::Closed) => {
                    // Only a close that was already underway counts as
                    // orderly; a peer vanishing mid-session does not.
                    return match self.session.state() {
                        HandshakeState::Closing | HandshakeState::Closed => Ok(()),
                        _ => Err(SessionError::Transport(TransportError::Closed)),
                    };
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn notify_close(&self, code: ErrorCode, reason: &str) {
        let result = catch_unwind(AssertUnwindSafe(|| {
            self.listener.on_close(&self.session, code, reason);
        }));
        if result.is_err() {
            tracing::warn!(
                session_id = self.session.id(),
                "listener panicked in on_close"
            );
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("session", &self.session)
            .finish()
    }
}

/// Aborts a connection, winning or losing the race against establishment.
///
/// Cancellation discards the session entirely: even if the preface flush
/// later succeeds, the success transition finds the session failed and the
/// completion already resolved with [`HandshakeError::Cancelled`].
#[derive(Clone)]
pub struct CancelHandle {
    session: Arc<Session>,
    completer: Completer<Arc<Session>>,
}

impl CancelHandle {
    /// Returns true when this call resolved the handshake completion.
    pub fn cancel(&self) -> bool {
        let won = self.completer.fail(HandshakeError::Cancelled);
        self.session
            .fail(&SessionError::Handshake(HandshakeError::Cancelled));
        tracing::debug!(session_id = self.session.id(), won, "connection cancelled");
        won
    }
}

/// Decoder sink that feeds the session and latches the first fatal error.
///
/// The decoder port cannot carry a [`SessionError`] through its own result
/// type, so the pump inspects the latch after every feed.
struct SessionSink {
    session: Arc<Session>,
    error: Option<SessionError>,
}

impl FrameSink for SessionSink {
    fn on_frame(&mut self, frame: Frame) -> Result<(), SessionError> {
        match self.session.on_frame(frame) {
            Ok(()) => Ok(()),
            Err(e) => {
                if self.error.is_none() {
                    self.error = Some(e.clone());
                }
                Err(e)
            }
        }
    }
}
