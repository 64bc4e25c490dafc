//! Anonymous session identity
//!
//! The session id is a random UUID issued on first use and persisted, so it
//! stays stable across restarts for as long as local storage lives. It is
//! never derived from anything about the visitor.

use std::sync::{Arc, Mutex};

use crate::store::DurableStore;

/// Issues and remembers the anonymous session identifier
pub struct IdentityStore {
    store: Arc<dyn DurableStore>,
    cached: Mutex<Option<String>>,
}

impl IdentityStore {
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self {
            store,
            cached: Mutex::new(None),
        }
    }

    /// The current session id, issuing and persisting one if needed.
    ///
    /// Storage failures are logged; the id is then kept in memory so the
    /// rest of this process still sees a single stable value.
    pub fn session_id(&self) -> String {
        let mut cached = self.cached.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(id) = cached.as_ref() {
            return id.clone();
        }

        let id = match self.store.session_id() {
            Ok(Some(id)) => id,
            Ok(None) => self.issue(),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read session id, issuing a new one");
                self.issue()
            }
        };

        *cached = Some(id.clone());
        id
    }

    fn issue(&self) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        match self.store.set_session_id(&id) {
            Ok(()) => tracing::info!(session_id = %id, "Issued new session id"),
            Err(e) => tracing::warn!(error = %e, "Failed to persist session id"),
        }
        id
    }
}
