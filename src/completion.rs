//! Write-once completion bridge between I/O events and a caller's future.
//!
//! Splits the two roles the handshake needs: a [`Completer`] that resolves
//! the outcome exactly once (later attempts are no-ops, never a panic or a
//! double resolution), and an awaitable [`Completion`]. The completer can be
//! cloned across the flows that might finish first (flush completion, idle
//! timeout, caller cancellation); whichever fires first wins.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::HandshakeError;

type Outcome<T> = Result<T, HandshakeError>;

/// Create a connected completer/completion pair.
pub fn completion<T>() -> (Completer<T>, Completion<T>) {
    let (tx, rx) = oneshot::channel();
    (
        Completer {
            tx: Arc::new(Mutex::new(Some(tx))),
        },
        Completion { rx },
    )
}

/// The producing half: resolves the outcome at most once.
pub struct Completer<T> {
    tx: Arc<Mutex<Option<oneshot::Sender<Outcome<T>>>>>,
}

impl<T> Clone for Completer<T> {
    fn clone(&self) -> Self {
        Self {
            tx: Arc::clone(&self.tx),
        }
    }
}

impl<T> Completer<T> {
    /// Resolve with success. Returns false if already resolved.
    pub fn succeed(&self, value: T) -> bool {
        self.resolve(Ok(value))
    }

    /// Resolve with failure. Returns false if already resolved.
    pub fn fail(&self, err: HandshakeError) -> bool {
        self.resolve(Err(err))
    }

    pub fn is_resolved(&self) -> bool {
        self.tx.lock().is_none()
    }

    fn resolve(&self, outcome: Outcome<T>) -> bool {
        let sender = self.tx.lock().take();
        match sender {
            // A dropped receiver still counts as resolved; the outcome had
            // exactly one chance to be delivered.
            Some(tx) => {
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }
}

/// The consuming half: a future for the resolved outcome.
///
/// If every completer is dropped unresolved, the future yields
/// [`HandshakeError::Abandoned`] rather than pending forever.
pub struct Completion<T> {
    rx: oneshot::Receiver<Outcome<T>>,
}

impl<T> Future for Completion<T> {
    type Output = Outcome<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(HandshakeError::Abandoned)),
            Poll::Pending => Poll::Pending,
        }
    }
}
