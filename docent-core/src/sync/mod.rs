//! Telemetry delivery
//!
//! The engine follows a "local-first" principle:
//! - Events are always persisted in the local queue first
//! - Delivery happens afterwards, inline, on reconnect, or at teardown
//! - Network failures never block the action that recorded the event
//!
//! Delivery is at-least-once: an event stays queued until a flush that
//! covered it is explicitly acknowledged.

mod engine;
mod transport;

pub use engine::{Connectivity, FlushMode, FlushOutcome, RetainReason, SyncEngine, SyncStats};
pub use transport::{Delivery, RoutedTransport, Transport};
