//! Tracks in-flight generation sessions and routes stop requests.
//!
//! Every chat request registers a session with its own
//! [`CancellationSignal`]. A stop that names a session reaches only that
//! session. A stop without a name raises the shared broadcast signal, which
//! the first session to poll consumes; it is only raised while a session is
//! active and is cleared when the last one ends.

use chatrelay_core::cancel::CancellationSignal;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<CancellationSignal>>>,
    broadcast: Arc<CancellationSignal>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new session. It stays active until the guard is dropped.
    pub fn register(self: &Arc<Self>) -> SessionGuard {
        let id = uuid::Uuid::new_v4().to_string();
        let signal = Arc::new(CancellationSignal::new());
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.insert(id.clone(), signal.clone());
        debug!(session = %id, active = sessions.len(), "Session registered");
        SessionGuard {
            registry: self.clone(),
            id,
            signal,
        }
    }

    /// Stop one session. Returns whether it was active.
    pub fn stop(&self, id: &str) -> bool {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        match sessions.get(id) {
            Some(signal) => {
                signal.request_stop();
                info!(session = %id, "Stop requested");
                true
            }
            None => false,
        }
    }

    /// Raise the shared signal if any session is active. Returns whether it
    /// was raised.
    pub fn stop_any(&self) -> bool {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        if sessions.is_empty() {
            return false;
        }
        self.broadcast.request_stop();
        info!(active = sessions.len(), "Untargeted stop requested");
        true
    }

    pub fn broadcast(&self) -> Arc<CancellationSignal> {
        self.broadcast.clone()
    }

    pub fn active_count(&self) -> usize {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Ids of active sessions, sorted.
    pub fn active_ids(&self) -> Vec<String> {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<String> = sessions.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn deregister(&self, id: &str) {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.remove(id);
        if sessions.is_empty() {
            self.broadcast.reset();
        }
        debug!(session = %id, active = sessions.len(), "Session deregistered");
    }
}

/// Keeps a session registered for as long as it lives.
pub struct SessionGuard {
    registry: Arc<SessionRegistry>,
    id: String,
    signal: Arc<CancellationSignal>,
}

impl SessionGuard {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn signal(&self) -> Arc<CancellationSignal> {
        self.signal.clone()
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.deregister(&self.id);
    }
}
