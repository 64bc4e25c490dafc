//! Durable client state
//!
//! Everything that must survive a restart goes through [`DurableStore`]:
//! - anonymous session identifier
//! - consent flag
//! - pending event queue
//! - guided-tour id list and last-viewed-artwork marker
//!
//! [`Database`] is the SQLite-backed implementation used by the CLI;
//! [`MemoryStore`] is an in-memory fake with fault injection for tests.

pub mod memory;
pub mod repo;
pub mod schema;

pub use memory::MemoryStore;
pub use repo::Database;

use crate::error::Result;
use crate::types::{ConsentState, Event, QueuedEvent};

/// Typed accessors for every persisted key.
///
/// Writes must be durable before they return: there is no in-memory
/// buffering window between an accepted append and the backing medium.
pub trait DurableStore: Send + Sync {
    /// Stored anonymous session id, if one was ever issued
    fn session_id(&self) -> Result<Option<String>>;
    fn set_session_id(&self, id: &str) -> Result<()>;

    /// Stored consent answer (`Unset` when never answered)
    fn consent(&self) -> Result<ConsentState>;
    fn set_consent(&self, state: ConsentState) -> Result<()>;

    /// Append an event to the queue, returning its sequence number
    fn append_event(&self, event: &Event) -> Result<i64>;
    /// All pending events, oldest first. Rows that cannot be decoded are
    /// removed rather than returned.
    fn pending_events(&self) -> Result<Vec<QueuedEvent>>;
    /// Remove every pending event
    fn clear_events(&self) -> Result<usize>;
    /// Remove pending events with `seq <= through`
    fn clear_events_through(&self, through: i64) -> Result<usize>;

    fn tour_ids(&self) -> Result<Vec<String>>;
    fn set_tour_ids(&self, ids: &[String]) -> Result<()>;

    fn last_viewed_artwork(&self) -> Result<Option<String>>;
    fn set_last_viewed_artwork(&self, artwork_id: Option<&str>) -> Result<()>;
}

/// Persisted key names
pub(crate) mod keys {
    pub const SESSION_ID: &str = "session_id";
    pub const CONSENT: &str = "consent";
    pub const TOUR_IDS: &str = "tour_ids";
    pub const LAST_VIEWED_ARTWORK: &str = "last_viewed_artwork";
}
