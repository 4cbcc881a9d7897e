//! Process-wide tracking of live sessions for coordinated shutdown.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::session::Session;
use crate::{ErrorCode, SessionError};

/// Tracks every session spawned by a connector.
///
/// Holds only weak references, so a session dropped by its owner vanishes
/// from the registry on its own; `unregister` merely makes that eager.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<u64, Weak<Session>>>,
}

/// Outcome of a [`SessionRegistry::shutdown`] sweep.
#[derive(Debug, Default)]
pub struct ShutdownReport {
    /// Sessions a close was issued to.
    pub attempted: usize,
    /// Entries whose session was already dropped.
    pub skipped: usize,
    /// Sessions whose close failed; the sweep continues past them.
    pub failures: Vec<(u64, SessionError)>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, session: &Arc<Session>) {
        self.sessions
            .lock()
            .insert(session.id(), Arc::downgrade(session));
        tracing::debug!(session_id = session.id(), "session registered");
    }

    pub(crate) fn unregister(&self, id: u64) -> bool {
        let removed = self.sessions.lock().remove(&id).is_some();
        if removed {
            tracing::debug!(session_id = id, "session unregistered");
        }
        removed
    }

    /// Number of tracked entries, including any whose session has already
    /// been dropped but not yet swept.
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// Snapshot of the currently live sessions.
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.sessions
            .lock()
            .values()
            .filter_map(Weak::upgrade)
            .collect()
    }

    /// Close every tracked session with the given code.
    ///
    /// Operates on a snapshot taken at sweep start: sessions registered
    /// concurrently are not chased, unregistered ones are tolerated. A
    /// failing close is recorded and the sweep moves on.
    pub fn shutdown(&self, code: ErrorCode, reason: &str) -> ShutdownReport {
        let snapshot: Vec<(u64, Weak<Session>)> = {
            let mut sessions = self.sessions.lock();
            sessions.drain().collect()
        };
        tracing::info!(count = snapshot.len(), %code, "shutting down sessions");

        let mut report = ShutdownReport::default();
        for (id, weak) in snapshot {
            let Some(session) = weak.upgrade() else {
                report.skipped += 1;
                continue;
            };
            report.attempted += 1;
            if let Err(e) = session.close(code, reason) {
                tracing::warn!(session_id = id, error = %e, "session close failed");
                report.failures.push((id, e));
            }
        }
        report
    }
}


impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("len", &self.len())
            .finish()
    }
}
