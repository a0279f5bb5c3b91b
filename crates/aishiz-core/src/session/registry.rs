use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use super::{SessionHandle, SessionId};

static GLOBAL: Lazy<Arc<SessionRegistry>> = Lazy::new(|| Arc::new(SessionRegistry::new()));

/// Map from session id to the live session's handle.
///
/// The lock is held for map access only, never across engine calls, so
/// registry traffic cannot stall token generation. An id is present from
/// `create` until its worker calls `remove` as its last act.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, Arc<SessionHandle>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry.
    pub fn global() -> Arc<SessionRegistry> {
        Arc::clone(&GLOBAL)
    }

    /// Allocate a fresh id and register an empty session under it.
    pub fn create(&self) -> Arc<SessionHandle> {
        let handle = Arc::new(SessionHandle::new(SessionId::next()));
        self.sessions.lock().insert(handle.id(), Arc::clone(&handle));
        handle
    }

    pub fn lookup(&self, id: SessionId) -> Option<Arc<SessionHandle>> {
        self.sessions.lock().get(&id).cloned()
    }

    /// Erase the entry. The owning worker must already have released the
    /// session's engine resources.
    pub fn remove(&self, id: SessionId) -> Option<Arc<SessionHandle>> {
        self.sessions.lock().remove(&id)
    }

    /// Set the cancellation flag if the session is live. Unknown ids are ignored.
    pub fn request_cancel(&self, id: SessionId) -> bool {
        match self.sessions.lock().get(&id) {
            Some(handle) => {
                handle.request_cancel();
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.lock().contains_key(&id)
    }

    /// Live ids, ascending.
    pub fn ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.sessions.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}
