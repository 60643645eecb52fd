//! Session Registry - in-flight sessions shared across orchestrations
//!
//! Mutations take the write lock; readers get `Arc` snapshots that never
//! change under them. Retired sessions can be kept in a bounded ring so
//! status queries still answer after a transfer has finished.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;

use ferry_core::{FerryError, FerryResult, SessionId, TransferSession};

#[derive(Debug, Default)]
struct Sessions {
    active: HashMap<SessionId, Arc<TransferSession>>,
    finished: VecDeque<Arc<TransferSession>>,
    retain: usize,
}

/// Registry of active transfer sessions
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<Sessions>,
}

impl SessionRegistry {
    /// Registry that forgets sessions once they are deregistered
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry that keeps the last `retain` retired sessions
    pub fn with_retention(retain: usize) -> Self {
        SessionRegistry {
            sessions: RwLock::new(Sessions {
                retain,
                ..Sessions::default()
            }),
        }
    }

    /// Register a session. A second registration for the same id is a
    /// conflict and leaves the existing entry untouched.
    pub fn register(&self, session: &TransferSession) -> FerryResult<()> {
        let mut sessions = self.sessions.write();
        if sessions.active.contains_key(&session.id()) {
            warn!(session = %session.id(), "registry conflict");
            return Err(FerryError::RegistryConflict(session.id()));
        }
        sessions
            .active
            .insert(session.id(), Arc::new(session.clone()));
        Ok(())
    }

    /// Replace the snapshot of an already registered session.
    ///
    /// Returns false if the session is not registered.
    pub fn refresh(&self, session: &TransferSession) -> bool {
        let mut sessions = self.sessions.write();
        match sessions.active.get_mut(&session.id()) {
            Some(entry) => {
                *entry = Arc::new(session.clone());
                true
            }
            None => false,
        }
    }

    /// Remove a session; unknown ids are a no-op
    pub fn deregister(&self, id: SessionId) -> Option<Arc<TransferSession>> {
        self.sessions.write().active.remove(&id)
    }

    /// Deregister a finished session and keep its final snapshot in the
    /// retention ring, in one step.
    pub fn retire(&self, session: &TransferSession) -> Option<Arc<TransferSession>> {
        let mut sessions = self.sessions.write();
        let removed = sessions.active.remove(&session.id());
        if sessions.retain > 0 {
            sessions.finished.push_back(Arc::new(session.clone()));
            while sessions.finished.len() > sessions.retain {
                sessions.finished.pop_front();
            }
        }
        removed
    }

    /// Active session by id
    pub fn get(&self, id: SessionId) -> FerryResult<Arc<TransferSession>> {
        self.sessions
            .read()
            .active
            .get(&id)
            .cloned()
            .ok_or(FerryError::SessionNotFound(id))
    }

    /// Active or retained session by id
    pub fn lookup(&self, id: SessionId) -> Option<Arc<TransferSession>> {
        let sessions = self.sessions.read();
        if let Some(session) = sessions.active.get(&id) {
            return Some(Arc::clone(session));
        }
        sessions.finished.iter().rev().find(|s| s.id() == id).cloned()
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.read().active.contains_key(&id)
    }

    /// Point-in-time snapshot of every registered session, ordered by id
    pub fn list_active(&self) -> Vec<Arc<TransferSession>> {
        let mut active: Vec<_> = self.sessions.read().active.values().cloned().collect();
        active.sort_by_key(|s| s.id());
        active
    }

    /// Retained finished sessions, oldest first
    pub fn list_finished(&self) -> Vec<Arc<TransferSession>> {
        self.sessions.read().finished.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().active.is_empty()
    }
}
