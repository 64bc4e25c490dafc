//! Durable event queue
//!
//! The queue is the only appender and the sync engine is the only clearer.
//! An accepted append is written to the store before `append` returns, so an
//! event recorded just before the process dies is still delivered by the
//! next session's first flush.
//!
//! Clearing after a delivery goes through [`EventQueue::clear_through`],
//! which removes exactly the events the delivered snapshot covered. Events
//! appended while the request was in flight stay queued.

use std::sync::Arc;

use crate::clock::Clock;
use crate::consent::ConsentGate;
use crate::error::Result;
use crate::identity::IdentityStore;
use crate::store::DurableStore;
use crate::types::{Event, EventDraft, QueuedEvent};

/// Ordered view of the queue at one instant
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueSnapshot {
    entries: Vec<QueuedEvent>,
}

impl QueueSnapshot {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Events oldest first
    pub fn events(&self) -> impl Iterator<Item = &Event> {
        self.entries.iter().map(|q| &q.event)
    }

    pub fn entries(&self) -> &[QueuedEvent] {
        &self.entries
    }

    /// Highest sequence number covered by this snapshot
    pub fn through_seq(&self) -> Option<i64> {
        self.entries.last().map(|q| q.seq)
    }
}

/// Consent-gated, durable append-only queue of telemetry events
pub struct EventQueue {
    store: Arc<dyn DurableStore>,
    identity: Arc<IdentityStore>,
    consent: Arc<ConsentGate>,
    clock: Arc<dyn Clock>,
}

impl EventQueue {
    pub fn new(
        store: Arc<dyn DurableStore>,
        identity: Arc<IdentityStore>,
        consent: Arc<ConsentGate>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            identity,
            consent,
            clock,
        }
    }

    /// Stamp and persist an event.
    ///
    /// Returns `None` when consent is not granted or the store rejected the
    /// write. Neither case is an error for the caller: telemetry never
    /// breaks the action that produced it.
    pub fn append(&self, draft: EventDraft) -> Option<QueuedEvent> {
        if !self.consent.is_granted() {
            tracing::trace!(event_type = %draft.event_type(), "Consent not granted, dropping event");
            return None;
        }

        let event = draft.into_event(self.identity.session_id(), self.clock.now());
        match self.store.append_event(&event) {
            Ok(seq) => {
                tracing::debug!(
                    seq,
                    event_type = %event.event_type,
                    artwork_id = event.artwork_id.as_deref().unwrap_or("-"),
                    "Queued event"
                );
                Some(QueuedEvent { seq, event })
            }
            Err(e) => {
                tracing::warn!(
                    event_type = %event.event_type,
                    error = %e,
                    "Failed to persist event"
                );
                None
            }
        }
    }

    /// Current queue contents, oldest first, without mutating anything
    pub fn snapshot(&self) -> Result<QueueSnapshot> {
        Ok(QueueSnapshot {
            entries: self.store.pending_events()?,
        })
    }

    /// Empty the queue entirely
    pub fn clear(&self) -> Result<usize> {
        self.store.clear_events()
    }

    /// Remove exactly the events covered by `snapshot`
    pub fn clear_through(&self, snapshot: &QueueSnapshot) -> Result<usize> {
        match snapshot.through_seq() {
            Some(seq) => self.store.clear_events_through(seq),
            None => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;
    use crate::types::EventType;
    use chrono::{TimeZone, Utc};

    struct Fixture {
        store: Arc<MemoryStore>,
        consent: Arc<ConsentGate>,
        clock: Arc<ManualClock>,
        queue: EventQueue,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let consent = Arc::new(ConsentGate::new(store.clone()));
        let identity = Arc::new(IdentityStore::new(store.clone()));
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 6, 1, 14, 0, 0).unwrap(),
        ));
        let queue = EventQueue::new(store.clone(), identity, consent.clone(), clock.clone());
        Fixture {
            store,
            consent,
            clock,
            queue,
        }
    }

    fn scan() -> EventDraft {
        EventDraft::new(EventType::Scan, None)
    }

    #[test]
    fn test_append_blocked_while_unset_or_denied() {
        let f = fixture();
        for _ in 0..3 {
            assert!(f.queue.append(scan()).is_none());
        }
        assert!(f.queue.snapshot().unwrap().is_empty());

        f.consent.set(false).unwrap();
        for _ in 0..3 {
            assert!(f.queue.append(scan()).is_none());
        }
        assert!(f.queue.snapshot().unwrap().is_empty());
        // Nothing was retained "for later" either
        assert!(f.store.pending_events().unwrap().is_empty());
    }

    #[test]
    fn test_append_stamps_session_and_capture_time() {
        let f = fixture();
        f.consent.set(true).unwrap();

        let queued = f
            .queue
            .append(EventDraft::new(EventType::ViewResult, Some("A07".into())))
            .unwrap();
        let captured_at = f.clock.now();
        f.clock.advance(chrono::Duration::minutes(10));

        let snapshot = f.queue.snapshot().unwrap();
        let event = snapshot.events().next().unwrap();
        assert_eq!(event, &queued.event);
        assert_eq!(event.timestamp, captured_at);
        assert_eq!(Some(event.session_id.clone()), f.store.session_id().unwrap());
    }

    #[test]
    fn test_persistence_failure_is_swallowed() {
        let f = fixture();
        f.consent.set(true).unwrap();
        f.store.set_fail_writes(true);

        assert!(f.queue.append(scan()).is_none());
        f.store.set_fail_writes(false);
        assert!(f.queue.snapshot().unwrap().is_empty());
    }

    #[test]
    fn test_clear_through_spares_later_appends() {
        let f = fixture();
        f.consent.set(true).unwrap();
        f.queue.append(scan());
        f.queue.append(scan());
        let snapshot = f.queue.snapshot().unwrap();

        let late = f
            .queue
            .append(EventDraft::new(EventType::PlayAudio, Some("A02".into())))
            .unwrap();

        assert_eq!(f.queue.clear_through(&snapshot).unwrap(), 2);
        let remaining = f.queue.snapshot().unwrap();
        assert_eq!(remaining.entries(), &[late]);
    }

    #[test]
    fn test_snapshot_does_not_mutate() {
        let f = fixture();
        f.consent.set(true).unwrap();
        f.queue.append(scan());

        let a = f.queue.snapshot().unwrap();
        let b = f.queue.snapshot().unwrap();
        assert_eq!(a, b);
        assert_eq!(f.queue.clear().unwrap(), 1);
        assert_eq!(f.queue.clear_through(&QueueSnapshot::default()).unwrap(), 0);
    }
}
