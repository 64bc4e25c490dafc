//! Core domain types for docent telemetry
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Event** | One immutable telemetry record, timestamped when the action happened |
//! | **Session** | Anonymous identifier stable for the lifetime of local storage |
//! | **Consent** | Tri-state permission governing whether telemetry is retained at all |
//! | **Queue** | Durable, ordered list of events awaiting delivery |
//!
//! Events carry no personal data: the session id is a random UUID and the
//! artwork id is an opaque catalogue key.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================
// Event types
// ============================================

/// What the visitor did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// App opened (recorded right after consent is granted, then per launch)
    PageOpen,
    /// App closed or torn down
    PageClose,
    /// Camera capture submitted for matching
    Scan,
    /// A match result was displayed
    ViewResult,
    /// Dwell time on a displayed result
    ResultViewDuration,
    /// Audio guide started
    PlayAudio,
    /// Artwork added to the guided tour
    AddToTour,
}

impl EventType {
    pub const ALL: [EventType; 7] = [
        EventType::PageOpen,
        EventType::PageClose,
        EventType::Scan,
        EventType::ViewResult,
        EventType::ResultViewDuration,
        EventType::PlayAudio,
        EventType::AddToTour,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::PageOpen => "page_open",
            EventType::PageClose => "page_close",
            EventType::Scan => "scan",
            EventType::ViewResult => "view_result",
            EventType::ResultViewDuration => "result_view_duration",
            EventType::PlayAudio => "play_audio",
            EventType::AddToTour => "add_to_tour",
        }
    }

    /// Whether events of this type carry `duration_seconds`
    pub fn carries_duration(&self) -> bool {
        matches!(self, EventType::ResultViewDuration)
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown event type: {}", s))
    }
}

// ============================================
// Events
// ============================================

/// A telemetry record as stored in the queue and sent on the wire.
///
/// Immutable once appended. `timestamp` is the capture instant, never the
/// send instant: delivery may be delayed arbitrarily.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub event_type: EventType,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artwork_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<u64>,
}

/// What a caller asks to record. The queue stamps session and time.
///
/// Constructors keep `duration_seconds` tied to duration-bearing types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDraft {
    event_type: EventType,
    artwork_id: Option<String>,
    duration_seconds: Option<u64>,
}

impl EventDraft {
    /// A non-duration event. Passing [`EventType::ResultViewDuration`] yields
    /// a zero-second duration; use [`EventDraft::view_duration`] instead.
    pub fn new(event_type: EventType, artwork_id: Option<String>) -> Self {
        Self {
            event_type,
            artwork_id,
            duration_seconds: event_type.carries_duration().then_some(0),
        }
    }

    /// A `result_view_duration` event
    pub fn view_duration(artwork_id: impl Into<String>, seconds: u64) -> Self {
        Self {
            event_type: EventType::ResultViewDuration,
            artwork_id: Some(artwork_id.into()),
            duration_seconds: Some(seconds),
        }
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn artwork_id(&self) -> Option<&str> {
        self.artwork_id.as_deref()
    }

    pub fn duration_seconds(&self) -> Option<u64> {
        self.duration_seconds
    }

    /// Stamp the draft into an [`Event`]
    pub fn into_event(self, session_id: String, timestamp: DateTime<Utc>) -> Event {
        Event {
            event_type: self.event_type,
            session_id,
            artwork_id: self.artwork_id,
            timestamp,
            duration_seconds: self.duration_seconds,
        }
    }
}

/// An event together with its local queue position.
///
/// `seq` increases monotonically and is never reused, even after clears.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedEvent {
    pub seq: i64,
    pub event: Event,
}

// ============================================
// Consent
// ============================================

/// Telemetry consent as answered by the visitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentState {
    /// Prompt not answered yet; nothing is retained, not even locally
    #[default]
    Unset,
    Granted,
    Denied,
}

impl ConsentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsentState::Unset => "unset",
            ConsentState::Granted => "granted",
            ConsentState::Denied => "denied",
        }
    }

    pub fn is_granted(&self) -> bool {
        matches!(self, ConsentState::Granted)
    }
}

impl std::str::FromStr for ConsentState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unset" => Ok(ConsentState::Unset),
            "granted" => Ok(ConsentState::Granted),
            "denied" => Ok(ConsentState::Denied),
            _ => Err(format!("unknown consent state: {}", s)),
        }
    }
}
