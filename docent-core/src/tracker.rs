//! View-duration tracking
//!
//! A pure state machine measuring how long a match result stays on screen:
//!
//! ```text
//! Inactive --start(artwork)--> Tracking{artwork, started_at}   emits view_result
//! Tracking --end()-----------> Inactive                        emits result_view_duration
//! Inactive --end()-----------> Inactive                        no-op
//! ```
//!
//! The tracker only returns event drafts; recording them is the caller's
//! job. The once-a-second display refresh reads [`ViewTracker::elapsed`] and
//! never changes state.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::types::{EventDraft, EventType};

/// In-memory tracking state; never persisted
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ViewState {
    #[default]
    Inactive,
    Tracking {
        artwork_id: String,
        started_at: DateTime<Utc>,
    },
}

/// Measures dwell time on the displayed result
pub struct ViewTracker {
    state: ViewState,
    clock: Arc<dyn Clock>,
}

impl ViewTracker {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: ViewState::Inactive,
            clock,
        }
    }

    pub fn state(&self) -> &ViewState {
        &self.state
    }

    pub fn is_tracking(&self) -> bool {
        matches!(self.state, ViewState::Tracking { .. })
    }

    /// Begin timing a result view, returning the `view_result` draft.
    ///
    /// Fails with [`Error::AlreadyTracking`] if a view is active: the
    /// previous one must be ended first so its duration is not lost.
    pub fn start(&mut self, artwork_id: impl Into<String>) -> Result<EventDraft> {
        if let ViewState::Tracking { artwork_id, .. } = &self.state {
            return Err(Error::AlreadyTracking(artwork_id.clone()));
        }
        let artwork_id = artwork_id.into();
        let draft = EventDraft::new(EventType::ViewResult, Some(artwork_id.clone()));
        self.state = ViewState::Tracking {
            artwork_id,
            started_at: self.clock.now(),
        };
        Ok(draft)
    }

    /// Stop timing. Returns a `result_view_duration` draft for the artwork
    /// captured at start, or `None` if inactive or under half a second.
    pub fn end(&mut self) -> Option<EventDraft> {
        let ViewState::Tracking {
            artwork_id,
            started_at,
        } = std::mem::take(&mut self.state)
        else {
            return None;
        };

        let elapsed = self.clock.now().signed_duration_since(started_at);
        let seconds = (elapsed.num_milliseconds().max(0) as f64 / 1000.0).round() as u64;
        if seconds == 0 {
            tracing::debug!(artwork_id = %artwork_id, "View ended without measurable duration");
            return None;
        }
        Some(EventDraft::view_duration(artwork_id, seconds))
    }

    /// Time on the current result, for display only
    pub fn elapsed(&self) -> Option<Duration> {
        match &self.state {
            ViewState::Tracking { started_at, .. } => self
                .clock
                .now()
                .signed_duration_since(*started_at)
                .to_std()
                .ok()
                .or(Some(Duration::ZERO)),
            ViewState::Inactive => None,
        }
    }
}
