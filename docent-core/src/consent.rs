//! Consent gate
//!
//! Every telemetry operation asks the gate first. Anything other than
//! [`ConsentState::Granted`] blocks silently: no error, no local retention.

use std::sync::Arc;

use crate::error::Result;
use crate::store::DurableStore;
use crate::types::ConsentState;

/// Persisted tri-state telemetry permission
pub struct ConsentGate {
    store: Arc<dyn DurableStore>,
}

impl ConsentGate {
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self { store }
    }

    /// Current answer. An unreadable flag counts as `Unset`.
    pub fn get(&self) -> ConsentState {
        self.store.consent().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to read consent flag, treating as unset");
            ConsentState::Unset
        })
    }

    /// Record the visitor's answer. Idempotent.
    ///
    /// Returns the previous state so the caller can detect the first
    /// transition to granted (and record `page_open` right after it).
    pub fn set(&self, granted: bool) -> Result<ConsentState> {
        let previous = self.get();
        let next = if granted {
            ConsentState::Granted
        } else {
            ConsentState::Denied
        };
        if previous != next {
            self.store.set_consent(next)?;
            tracing::info!(from = previous.as_str(), to = next.as_str(), "Consent updated");
        }
        Ok(previous)
    }

    pub fn is_granted(&self) -> bool {
        self.get().is_granted()
    }
}
