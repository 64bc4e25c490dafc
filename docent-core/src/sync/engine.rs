//! Flush policy: deliver the queue and reconcile it with the outcome
//!
//! - Empty queue: no network call.
//! - One event: single endpoint; any acknowledgement clears it.
//! - Several: batch endpoint with the whole snapshot in order; cleared only
//!   on an explicit `ok`.
//! - Anything else (offline fallback, rejection, transport error) leaves the
//!   queue untouched for the next trigger.
//!
//! Clearing removes only what the snapshot covered, so events appended while
//! a request is in flight survive it. Flushes are serialized: a trigger that
//! arrives mid-flush waits, then delivers whatever is still pending.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::consent::ConsentGate;
use crate::queue::{EventQueue, QueueSnapshot};
use crate::types::Event;

use super::transport::{Delivery, Transport};

/// Which endpoint a flush used
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushMode {
    Single,
    Batch,
}

impl FlushMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushMode::Single => "single",
            FlushMode::Batch => "batch",
        }
    }
}

/// Why delivered-or-not events are still queued
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetainReason {
    /// Offline fallback answered in place of the backend
    Deferred,
    /// Backend answered without an explicit success
    Rejected(String),
    /// No answer at all
    Network(String),
    /// Backend acknowledged, but the local clear failed; events will be resent
    ClearFailed(String),
}

impl std::fmt::Display for RetainReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetainReason::Deferred => f.write_str("queued while offline"),
            RetainReason::Rejected(r) => write!(f, "rejected: {}", r),
            RetainReason::Network(r) => write!(f, "network: {}", r),
            RetainReason::ClearFailed(r) => write!(f, "delivered but not cleared: {}", r),
        }
    }
}

/// Result of one flush attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    ConsentNotGranted,
    Empty,
    /// The queue could not be read
    StorageUnavailable,
    Delivered {
        count: usize,
        mode: FlushMode,
    },
    Retained {
        count: usize,
        mode: FlushMode,
        reason: RetainReason,
    },
}

/// Flush statistics for reporting
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncStats {
    /// Flushes that found something to send
    pub attempts: usize,
    /// Events acknowledged and cleared
    pub events_delivered: usize,
    pub single_deliveries: usize,
    pub batch_deliveries: usize,
    /// Attempts that left the queue in place
    pub retained: usize,
}

/// The client's belief about network reachability
#[derive(Debug)]
pub struct Connectivity {
    online: AtomicBool,
}

impl Connectivity {
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Update the belief; returns true on an offline → online transition
    pub fn set_online(&self, online: bool) -> bool {
        let was_online = self.online.swap(online, Ordering::SeqCst);
        online && !was_online
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Delivers queued events and reconciles the queue with the result
pub struct SyncEngine {
    queue: Arc<EventQueue>,
    consent: Arc<ConsentGate>,
    transport: Arc<dyn Transport>,
    flush_lock: tokio::sync::Mutex<()>,
    stats: Mutex<SyncStats>,
}

impl SyncEngine {
    pub fn new(
        queue: Arc<EventQueue>,
        consent: Arc<ConsentGate>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            queue,
            consent,
            transport,
            flush_lock: tokio::sync::Mutex::new(()),
            stats: Mutex::new(SyncStats::default()),
        }
    }

    /// Attempt to deliver everything currently queued. Never fails.
    pub async fn flush(&self) -> FlushOutcome {
        if !self.consent.is_granted() {
            return FlushOutcome::ConsentNotGranted;
        }

        let _guard = self.flush_lock.lock().await;

        let snapshot = match self.queue.snapshot() {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read event queue");
                return FlushOutcome::StorageUnavailable;
            }
        };
        if snapshot.is_empty() {
            return FlushOutcome::Empty;
        }

        let events: Vec<Event> = snapshot.events().cloned().collect();
        let (mode, result) = if events.len() == 1 {
            (FlushMode::Single, self.transport.send_single(&events[0]).await)
        } else {
            (FlushMode::Batch, self.transport.send_batch(&events).await)
        };

        let outcome = self.reconcile(&snapshot, mode, result);
        self.record(&outcome);
        outcome
    }

    fn reconcile(
        &self,
        snapshot: &QueueSnapshot,
        mode: FlushMode,
        result: crate::error::Result<Delivery>,
    ) -> FlushOutcome {
        let count = snapshot.len();
        let reason = match result {
            Ok(Delivery::Acknowledged { received }) => {
                if let Some(received) = received.filter(|r| *r != count) {
                    tracing::warn!(sent = count, received, "Backend count mismatch");
                }
                match self.queue.clear_through(snapshot) {
                    Ok(_) => {
                        tracing::info!(count, mode = mode.as_str(), "Delivered queued events");
                        return FlushOutcome::Delivered { count, mode };
                    }
                    Err(e) => RetainReason::ClearFailed(e.to_string()),
                }
            }
            Ok(Delivery::Deferred) => RetainReason::Deferred,
            Ok(Delivery::Rejected { reason }) => RetainReason::Rejected(reason),
            Err(e) => RetainReason::Network(e.to_string()),
        };

        tracing::warn!(
            count,
            mode = mode.as_str(),
            reason = %reason,
            "Events kept for retry"
        );
        FlushOutcome::Retained {
            count,
            mode,
            reason,
        }
    }

    fn record(&self, outcome: &FlushOutcome) {
        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        match outcome {
            FlushOutcome::Delivered { count, mode } => {
                stats.attempts += 1;
                stats.events_delivered += count;
                match mode {
                    FlushMode::Single => stats.single_deliveries += 1,
                    FlushMode::Batch => stats.batch_deliveries += 1,
                }
            }
            FlushOutcome::Retained { .. } => {
                stats.attempts += 1;
                stats.retained += 1;
            }
            _ => {}
        }
    }

    /// Snapshot of flush statistics
    pub fn stats(&self) -> SyncStats {
        self.stats.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::error::{Error, Result};
    use crate::identity::IdentityStore;
    use crate::store::{DurableStore, MemoryStore};
    use crate::types::{EventDraft, EventType};
    use async_trait::async_trait;
    use std::collections::VecDeque;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Single(Event),
        Batch(Vec<Event>),
    }

    /// Scripted transport recording every call
    #[derive(Default)]
    struct ScriptedTransport {
        replies: Mutex<VecDeque<Result<Delivery>>>,
        calls: Mutex<Vec<Call>>,
        /// Appended to the queue while the request is "in flight"
        during_send: Mutex<Option<(Arc<EventQueue>, EventDraft)>>,
    }

    impl ScriptedTransport {
        fn reply(&self, r: Result<Delivery>) {
            self.replies.lock().unwrap().push_back(r);
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn next(&self, call: Call) -> Result<Delivery> {
            self.calls.lock().unwrap().push(call);
            if let Some((queue, draft)) = self.during_send.lock().unwrap().take() {
                queue.append(draft);
            }
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(Delivery::Acknowledged { received: None }))
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send_single(&self, event: &Event) -> Result<Delivery> {
            self.next(Call::Single(event.clone()))
        }

        async fn send_batch(&self, events: &[Event]) -> Result<Delivery> {
            self.next(Call::Batch(events.to_vec()))
        }
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        consent: Arc<ConsentGate>,
        queue: Arc<EventQueue>,
        transport: Arc<ScriptedTransport>,
        engine: SyncEngine,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let consent = Arc::new(ConsentGate::new(store.clone()));
        let identity = Arc::new(IdentityStore::new(store.clone()));
        let queue = Arc::new(EventQueue::new(
            store.clone(),
            identity,
            consent.clone(),
            Arc::new(SystemClock),
        ));
        let transport = Arc::new(ScriptedTransport::default());
        let engine = SyncEngine::new(queue.clone(), consent.clone(), transport.clone());
        Fixture {
            store,
            consent,
            queue,
            transport,
            engine,
        }
    }

    fn draft(t: EventType) -> EventDraft {
        EventDraft::new(t, Some("A07".to_string()))
    }

    #[tokio::test]
    async fn test_flush_blocked_without_consent() {
        let f = fixture();
        assert_eq!(f.engine.flush().await, FlushOutcome::ConsentNotGranted);
        f.consent.set(false).unwrap();
        assert_eq!(f.engine.flush().await, FlushOutcome::ConsentNotGranted);
        assert!(f.transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_empty_queue_makes_no_call() {
        let f = fixture();
        f.consent.set(true).unwrap();
        assert_eq!(f.engine.flush().await, FlushOutcome::Empty);
        assert!(f.transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_single_event_uses_single_endpoint() {
        let f = fixture();
        f.consent.set(true).unwrap();
        let queued = f.queue.append(draft(EventType::Scan)).unwrap();

        assert_eq!(
            f.engine.flush().await,
            FlushOutcome::Delivered {
                count: 1,
                mode: FlushMode::Single
            }
        );
        assert_eq!(f.transport.calls(), vec![Call::Single(queued.event)]);
        assert!(f.queue.snapshot().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_many_events_use_batch_in_order() {
        let f = fixture();
        f.consent.set(true).unwrap();
        let sent: Vec<Event> = [EventType::Scan, EventType::ViewResult, EventType::PlayAudio]
            .into_iter()
            .map(|t| f.queue.append(draft(t)).unwrap().event)
            .collect();
        f.transport.reply(Ok(Delivery::Acknowledged { received: Some(3) }));

        assert_eq!(
            f.engine.flush().await,
            FlushOutcome::Delivered {
                count: 3,
                mode: FlushMode::Batch
            }
        );
        assert_eq!(f.transport.calls(), vec![Call::Batch(sent)]);
        assert!(f.store.pending_events().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_batch_rejection_leaves_queue_identical() {
        let f = fixture();
        f.consent.set(true).unwrap();
        f.queue.append(draft(EventType::Scan));
        f.queue.append(draft(EventType::AddToTour));
        let before = f.queue.snapshot().unwrap();

        f.transport.reply(Ok(Delivery::Rejected {
            reason: "status \"error\"".into(),
        }));
        let outcome = f.engine.flush().await;
        assert!(matches!(
            outcome,
            FlushOutcome::Retained {
                count: 2,
                mode: FlushMode::Batch,
                reason: RetainReason::Rejected(_)
            }
        ));
        assert_eq!(f.queue.snapshot().unwrap(), before);
    }

    #[tokio::test]
    async fn test_deferred_and_network_errors_retain() {
        let f = fixture();
        f.consent.set(true).unwrap();
        f.queue.append(draft(EventType::Scan));
        let before = f.queue.snapshot().unwrap();

        f.transport.reply(Ok(Delivery::Deferred));
        f.transport
            .reply(Err(Error::Network("connection refused".into())));

        assert!(matches!(
            f.engine.flush().await,
            FlushOutcome::Retained {
                reason: RetainReason::Deferred,
                ..
            }
        ));
        assert!(matches!(
            f.engine.flush().await,
            FlushOutcome::Retained {
                reason: RetainReason::Network(_),
                ..
            }
        ));
        assert_eq!(f.queue.snapshot().unwrap(), before);

        // The next trigger retries the same event
        assert!(matches!(
            f.engine.flush().await,
            FlushOutcome::Delivered { count: 1, .. }
        ));
        let stats = f.engine.stats();
        assert_eq!(stats.attempts, 3);
        assert_eq!(stats.retained, 2);
        assert_eq!(stats.events_delivered, 1);
    }

    #[tokio::test]
    async fn test_append_during_single_flush_survives_clear() {
        let f = fixture();
        f.consent.set(true).unwrap();
        f.queue.append(draft(EventType::ViewResult));
        *f.transport.during_send.lock().unwrap() =
            Some((f.queue.clone(), draft(EventType::PlayAudio)));

        assert!(matches!(
            f.engine.flush().await,
            FlushOutcome::Delivered {
                count: 1,
                mode: FlushMode::Single
            }
        ));
        let remaining = f.queue.snapshot().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(
            remaining.events().next().unwrap().event_type,
            EventType::PlayAudio
        );
    }

    #[tokio::test]
    async fn test_clear_failure_is_reported_not_lost() {
        let f = fixture();
        f.consent.set(true).unwrap();
        f.queue.append(draft(EventType::Scan));
        f.store.set_fail_writes(true);

        assert!(matches!(
            f.engine.flush().await,
            FlushOutcome::Retained {
                reason: RetainReason::ClearFailed(_),
                ..
            }
        ));
        assert_eq!(f.store.pending_events().unwrap().len(), 1);
    }

    #[test]
    fn test_connectivity_transitions() {
        let c = Connectivity::new(false);
        assert!(!c.is_online());
        assert!(c.set_online(true));
        assert!(!c.set_online(true));
        assert!(!c.set_online(false));
        assert!(c.set_online(true));
    }
}
