//! Telemetry facade
//!
//! Wires the consent gate, queue, sync engine and view tracker together and
//! exposes the triggers the client reacts to:
//!
//! | Trigger | Effect |
//! |---------|--------|
//! | consent answered | persist answer; first grant records `page_open` |
//! | action recorded | append, then flush inline while online |
//! | result shown | end previous view (duration), start new view |
//! | page hidden | end current view |
//! | back online | flush |
//! | teardown | end view, record `page_close`, best-effort flush |
//!
//! None of these return telemetry errors to the caller.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::clock::Clock;
use crate::consent::ConsentGate;
use crate::error::Result;
use crate::identity::IdentityStore;
use crate::queue::{EventQueue, QueueSnapshot};
use crate::store::DurableStore;
use crate::sync::{Connectivity, FlushOutcome, SyncEngine, SyncStats, Transport};
use crate::tracker::ViewTracker;
use crate::types::{ConsentState, EventDraft, EventType, QueuedEvent};

/// What happened to a recorded action
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Recorded {
    /// The queued event, if consent allowed it and the store accepted it
    pub queued: Option<QueuedEvent>,
    /// The inline flush, if one ran
    pub flush: Option<FlushOutcome>,
}

/// The client's telemetry pipeline
pub struct Telemetry {
    store: Arc<dyn DurableStore>,
    consent: Arc<ConsentGate>,
    identity: Arc<IdentityStore>,
    queue: Arc<EventQueue>,
    engine: SyncEngine,
    connectivity: Connectivity,
    tracker: Mutex<ViewTracker>,
    flush_on_append: bool,
}

impl Telemetry {
    pub fn new(
        store: Arc<dyn DurableStore>,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
        flush_on_append: bool,
    ) -> Self {
        let consent = Arc::new(ConsentGate::new(store.clone()));
        let identity = Arc::new(IdentityStore::new(store.clone()));
        let queue = Arc::new(EventQueue::new(
            store.clone(),
            identity.clone(),
            consent.clone(),
            clock.clone(),
        ));
        let engine = SyncEngine::new(queue.clone(), consent.clone(), transport);

        Self {
            store,
            consent,
            identity,
            queue,
            engine,
            connectivity: Connectivity::default(),
            tracker: Mutex::new(ViewTracker::new(clock)),
            flush_on_append,
        }
    }

    fn tracker(&self) -> MutexGuard<'_, ViewTracker> {
        self.tracker.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ============================================
    // Consent and identity
    // ============================================

    pub fn consent(&self) -> ConsentState {
        self.consent.get()
    }

    /// Persist the visitor's answer to the consent prompt.
    ///
    /// The first grant (out of `Unset`) records `page_open` immediately
    /// after the flag is stored, so the open of the consenting visit is not
    /// lost. Re-granting after a denial records nothing.
    pub async fn answer_consent(&self, granted: bool) -> Result<Recorded> {
        let previous = self.consent.set(granted)?;
        if granted && previous == ConsentState::Unset {
            return Ok(self
                .record(EventDraft::new(EventType::PageOpen, None))
                .await);
        }
        Ok(Recorded::default())
    }

    pub fn session_id(&self) -> String {
        self.identity.session_id()
    }

    // ============================================
    // Recording
    // ============================================

    /// Append an event and, while online, flush right away
    pub async fn record(&self, draft: EventDraft) -> Recorded {
        let queued = self.queue.append(draft);
        let flush = if queued.is_some() && self.flush_on_append && self.connectivity.is_online() {
            Some(self.engine.flush().await)
        } else {
            None
        };
        Recorded { queued, flush }
    }

    /// Show a new match result, superseding any result still on screen
    pub async fn show_result(&self, artwork_id: &str) -> Vec<Recorded> {
        let (ended, started) = {
            let mut tracker = self.tracker();
            let ended = tracker.end();
            (ended, tracker.start(artwork_id))
        };

        if let Err(e) = self.store.set_last_viewed_artwork(Some(artwork_id)) {
            tracing::warn!(error = %e, "Failed to persist last viewed artwork");
        }

        let mut recorded = Vec::new();
        if let Some(duration) = ended {
            recorded.push(self.record(duration).await);
        }
        match started {
            Ok(view) => recorded.push(self.record(view).await),
            // Unreachable after end(), but never worth failing the UI for
            Err(e) => tracing::warn!(error = %e, "Failed to start view tracking"),
        }
        recorded
    }

    /// Close the current result view, recording its duration
    pub async fn end_view(&self) -> Option<Recorded> {
        let ended = self.tracker().end();
        match ended {
            Some(draft) => Some(self.record(draft).await),
            None => None,
        }
    }

    /// Time on the current result, for the 1 Hz display refresh
    pub fn view_elapsed(&self) -> Option<Duration> {
        self.tracker().elapsed()
    }

    pub async fn on_visibility_hidden(&self) -> Option<Recorded> {
        self.end_view().await
    }

    /// Add an artwork to the guided tour and record it
    pub async fn add_to_tour(&self, artwork_id: &str) -> Recorded {
        match self.store.tour_ids() {
            Ok(mut ids) if !ids.iter().any(|id| id == artwork_id) => {
                ids.push(artwork_id.to_string());
                if let Err(e) = self.store.set_tour_ids(&ids) {
                    tracing::warn!(error = %e, "Failed to persist tour list");
                }
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "Failed to read tour list"),
        }
        self.record(EventDraft::new(
            EventType::AddToTour,
            Some(artwork_id.to_string()),
        ))
        .await
    }

    pub fn tour_ids(&self) -> Vec<String> {
        self.store.tour_ids().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to read tour list");
            Vec::new()
        })
    }

    // ============================================
    // Delivery triggers
    // ============================================

    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    /// Update connectivity; coming back online flushes the queue
    pub async fn set_online(&self, online: bool) -> Option<FlushOutcome> {
        if self.connectivity.set_online(online) {
            tracing::info!("Back online, flushing queued events");
            return Some(self.engine.flush().await);
        }
        None
    }

    /// Explicit flush
    pub async fn flush(&self) -> FlushOutcome {
        self.engine.flush().await
    }

    /// Page/process teardown.
    ///
    /// Everything is appended before the network is touched, so if the
    /// process dies mid-flush the next session delivers it.
    pub async fn teardown(&self) -> FlushOutcome {
        let duration = self.tracker().end();
        if let Some(draft) = duration {
            self.queue.append(draft);
        }
        self.queue
            .append(EventDraft::new(EventType::PageClose, None));
        self.engine.flush().await
    }

    // ============================================
    // Inspection
    // ============================================

    pub fn pending(&self) -> Result<QueueSnapshot> {
        self.queue.snapshot()
    }

    pub fn stats(&self) -> SyncStats {
        self.engine.stats()
    }
}
