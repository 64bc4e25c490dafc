//! In-memory [`DurableStore`] with fault injection

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::error::{Error, Result};
use crate::types::{ConsentState, Event, QueuedEvent};

use super::{keys, DurableStore};

#[derive(Debug, Default)]
struct MemoryState {
    values: HashMap<&'static str, String>,
    events: Vec<QueuedEvent>,
    last_seq: i64,
}

/// A store that lives only as long as the process.
///
/// `fail_writes` makes every mutating call fail with [`Error::Storage`],
/// mimicking an exhausted storage quota.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent writes fail (or succeed again)
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn read(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| Error::Storage("memory store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<MutexGuard<'_, MemoryState>> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Storage("quota exceeded".to_string()));
        }
        self.read()
    }

    fn set_value(&self, key: &'static str, value: Option<String>) -> Result<()> {
        let mut state = self.write()?;
        match value {
            Some(v) => state.values.insert(key, v),
            None => state.values.remove(key),
        };
        Ok(())
    }
}

impl DurableStore for MemoryStore {
    fn session_id(&self) -> Result<Option<String>> {
        Ok(self.read()?.values.get(keys::SESSION_ID).cloned())
    }

    fn set_session_id(&self, id: &str) -> Result<()> {
        self.set_value(keys::SESSION_ID, Some(id.to_string()))
    }

    fn consent(&self) -> Result<ConsentState> {
        match self.read()?.values.get(keys::CONSENT) {
            Some(raw) => raw.parse::<ConsentState>().map_err(Error::Storage),
            None => Ok(ConsentState::Unset),
        }
    }

    fn set_consent(&self, state: ConsentState) -> Result<()> {
        let value = match state {
            ConsentState::Unset => None,
            _ => Some(state.as_str().to_string()),
        };
        self.set_value(keys::CONSENT, value)
    }

    fn append_event(&self, event: &Event) -> Result<i64> {
        let mut state = self.write()?;
        state.last_seq += 1;
        let seq = state.last_seq;
        state.events.push(QueuedEvent {
            seq,
            event: event.clone(),
        });
        Ok(seq)
    }

    fn pending_events(&self) -> Result<Vec<QueuedEvent>> {
        Ok(self.read()?.events.clone())
    }

    fn clear_events(&self) -> Result<usize> {
        let mut state = self.write()?;
        let removed = state.events.len();
        state.events.clear();
        Ok(removed)
    }

    fn clear_events_through(&self, through: i64) -> Result<usize> {
        let mut state = self.write()?;
        let before = state.events.len();
        state.events.retain(|q| q.seq > through);
        Ok(before - state.events.len())
    }

    fn tour_ids(&self) -> Result<Vec<String>> {
        match self.read()?.values.get(keys::TOUR_IDS) {
            Some(raw) => Ok(serde_json::from_str(raw)?),
            None => Ok(Vec::new()),
        }
    }

    fn set_tour_ids(&self, ids: &[String]) -> Result<()> {
        self.set_value(keys::TOUR_IDS, Some(serde_json::to_string(ids)?))
    }

    fn last_viewed_artwork(&self) -> Result<Option<String>> {
        Ok(self.read()?.values.get(keys::LAST_VIEWED_ARTWORK).cloned())
    }

    fn set_last_viewed_artwork(&self, artwork_id: Option<&str>) -> Result<()> {
        self.set_value(keys::LAST_VIEWED_ARTWORK, artwork_id.map(str::to_string))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventDraft, EventType};
    use chrono::Utc;

    #[test]
    fn test_fail_writes_blocks_mutation_only() {
        let store = MemoryStore::new();
        let event = EventDraft::new(EventType::Scan, None).into_event("s".to_string(), Utc::now());
        store.append_event(&event).unwrap();

        store.set_fail_writes(true);
        assert!(matches!(store.append_event(&event), Err(Error::Storage(_))));
        assert!(store.clear_events().is_err());
        // Reads still work
        assert_eq!(store.pending_events().unwrap().len(), 1);

        store.set_fail_writes(false);
        assert_eq!(store.append_event(&event).unwrap(), 2);
    }

    #[test]
    fn test_seq_survives_clear() {
        let store = MemoryStore::new();
        let event = EventDraft::new(EventType::Scan, None).into_event("s".to_string(), Utc::now());
        store.append_event(&event).unwrap();
        store.clear_events().unwrap();
        assert_eq!(store.append_event(&event).unwrap(), 2);
    }
}
