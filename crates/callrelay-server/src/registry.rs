//! Process-wide map from call identifier to session.

use crate::session::CallSession;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("no session for call {0}")]
    NotFound(String),
}

/// Live sessions keyed by call identifier.
///
/// The lock is only held for map operations, never across an `.await`.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, Arc<CallSession>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the session for `id`, creating it on first contact.
    ///
    /// Concurrent first contacts for the same `id` all receive the same session.
    pub fn get_or_create(&self, id: &str) -> Arc<CallSession> {
        if let Some(session) = self.read().get(id) {
            return Arc::clone(session);
        }

        let mut sessions = self.write();
        let session = sessions.entry(id.to_string()).or_insert_with(|| {
            tracing::info!(call_id = %id, "session created");
            Arc::new(CallSession::new(id))
        });
        Arc::clone(session)
    }

    /// Returns the session for a call that must already exist.
    pub fn get(&self, id: &str) -> Result<Arc<CallSession>, RegistryError> {
        self.read()
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    /// Drops the mapping for `id` without touching the session itself.
    pub fn remove(&self, id: &str) -> Option<Arc<CallSession>> {
        self.write().remove(id)
    }

    /// Drops the mapping for `id` only if it still points at `session`.
    ///
    /// A newer session that has since taken over `id` is left in place.
    pub fn remove_if_same(&self, id: &str, session: &Arc<CallSession>) -> bool {
        let mut sessions = self.write();
        let same = sessions
            .get(id)
            .map_or(false, |current| Arc::ptr_eq(current, session));
        if same {
            sessions.remove(id);
        }
        same
    }

    /// Ends the call: closes its session and drops the mapping.
    pub fn close(&self, id: &str) -> Result<(), RegistryError> {
        let session = self
            .remove(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        session.close();
        tracing::info!(call_id = %id, "session closed");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<CallSession>>> {
        self.sessions.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<CallSession>>> {
        self.sessions.write().unwrap_or_else(|e| e.into_inner())
    }
}
