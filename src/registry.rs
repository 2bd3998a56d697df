//! Live session tracking scoped to transport connections
//!
//! Each connection owns a [`ConnectionScope`] holding the only strong
//! reference to its [`Session`]. The registry keeps weak references keyed by
//! a random identifier, so an entry stops resolving as soon as its connection
//! is gone, whether or not the scope's drop ran to completion.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::{debug, info};
use uuid::Uuid;

use crate::session::Session;

/// Opaque 128-bit connection identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Concurrent map from connection identifier to its session
///
/// Shared by every connection via `Arc`. Values are weak, so the registry
/// never extends a session's lifetime.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    entries: Mutex<HashMap<SessionId, Weak<Session>>>,
}

impl SessionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session under a fresh identifier
    ///
    /// The returned scope owns the session; dropping it ends the association.
    /// Dead entries left by other connections are swept here.
    pub fn open(self: &Arc<Self>, session: Session) -> ConnectionScope {
        let session = Arc::new(session);
        let id = SessionId::new();
        let live = {
            let mut entries = self.lock();
            entries.retain(|_, weak| weak.strong_count() > 0);
            entries.insert(id, Arc::downgrade(&session));
            entries.len()
        };
        info!(session_id = %id, live_sessions = live, "session opened");
        ConnectionScope {
            id,
            _session: session,
            registry: Arc::downgrade(self),
        }
    }

    /// Resolve a session by its connection identifier
    ///
    /// Returns `None` once the owning connection has ended.
    pub fn lookup(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.lock().get(id).and_then(Weak::upgrade)
    }

    /// Number of sessions whose connection is still alive
    pub fn live_count(&self) -> usize {
        self.lock()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    fn release(&self, id: &SessionId) {
        let live = {
            let mut entries = self.lock();
            entries.remove(id);
            entries.len()
        };
        debug!(session_id = %id, live_sessions = live, "session released");
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SessionId, Weak<Session>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One connection's ownership of its session
///
/// Lives exactly as long as the connection's handler. Tool code resolves the
/// session by this scope's identifier.
#[derive(Debug)]
pub struct ConnectionScope {
    id: SessionId,
    /// Strong owner; the registry only holds a weak reference
    _session: Arc<Session>,
    registry: Weak<SessionRegistry>,
}

impl ConnectionScope {
    /// This connection's identifier
    pub fn id(&self) -> SessionId {
        self.id
    }
}

impl Drop for ConnectionScope {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.release(&self.id);
        }
    }
}
