//! # docent-core
//!
//! Core library for docent - an offline-resilient, anonymous telemetry
//! pipeline for a museum guide client.
//!
//! This library provides:
//! - Durable client state (session id, consent, event queue) in SQLite
//! - Consent gating and anonymous identity
//! - Queue delivery with single/batch modes and at-least-once semantics
//! - View-duration tracking for displayed results
//! - A cache router for assets and telemetry endpoints
//! - Configuration management and logging infrastructure
//!
//! ## Data flow
//!
//! ```text
//! action -> ConsentGate -> EventQueue (durable) -> SyncEngine -> CacheRouter -> backend
//!                                                      ^              |
//!                                                      +-- queued <---+ (offline)
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use docent_core::{Config, Database};
//!
//! // Load configuration
//! let config = Config::load().expect("failed to load config");
//!
//! // Open database
//! let db = Database::open(&Config::database_path()).expect("failed to open database");
//! db.migrate().expect("failed to run migrations");
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use error::{Error, Result};
pub use store::{Database, DurableStore, MemoryStore};
pub use telemetry::{Recorded, Telemetry};
pub use types::*;

// Public modules
pub mod cache;
pub mod clock;
pub mod config;
pub mod consent;
pub mod error;
pub mod format;
pub mod identity;
pub mod logging;
pub mod queue;
pub mod store;
pub mod sync;
pub mod telemetry;
pub mod tracker;
pub mod types;
