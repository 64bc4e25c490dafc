//! SQLite-backed store
//!
//! Provides the persisted client state, the durable event queue and the
//! response cache in a single database file.

use crate::cache::{Response, ResponseCache, ResponseSource};
use crate::error::{Error, Result};
use crate::types::{ConsentState, Event, QueuedEvent};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::{keys, DurableStore};

/// Database handle (single connection behind a mutex)
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // FULL sync: an accepted append must survive a crash, not just a clean exit
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = FULL;
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.connection()?;
        super::schema::run_migrations(&conn)
    }

    /// Get the underlying connection (for advanced use)
    pub fn connection(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Storage("database connection lock poisoned".to_string()))
    }

    // ============================================
    // Key/value operations
    // ============================================

    fn get_value(&self, key: &str) -> Result<Option<String>> {
        let conn = self.connection()?;
        conn.query_row("SELECT value FROM kv WHERE key = ?", [key], |row| row.get(0))
            .optional()
            .map_err(Error::from)
    }

    fn set_value(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            r#"
            INSERT INTO kv (key, value, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn delete_value(&self, key: &str) -> Result<()> {
        let conn = self.connection()?;
        conn.execute("DELETE FROM kv WHERE key = ?", [key])?;
        Ok(())
    }

    // ============================================
    // Queue statistics
    // ============================================

    /// Number of pending events
    pub fn count_pending(&self) -> Result<i64> {
        let conn = self.connection()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM pending_events", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Pending event counts by type, largest first
    pub fn count_pending_by_type(&self) -> Result<Vec<(String, i64)>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT event_type, COUNT(*) AS n
            FROM pending_events
            GROUP BY event_type
            ORDER BY n DESC, event_type ASC
            "#,
        )?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Number of cached responses in a generation
    pub fn count_cache_entries(&self, generation: &str) -> Result<i64> {
        let conn = self.connection()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM cache_entries WHERE generation = ?",
            [generation],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

impl DurableStore for Database {
    fn session_id(&self) -> Result<Option<String>> {
        self.get_value(keys::SESSION_ID)
    }

    fn set_session_id(&self, id: &str) -> Result<()> {
        self.set_value(keys::SESSION_ID, id)
    }

    fn consent(&self) -> Result<ConsentState> {
        match self.get_value(keys::CONSENT)? {
            Some(raw) => raw.parse::<ConsentState>().map_err(Error::Storage),
            None => Ok(ConsentState::Unset),
        }
    }

    fn set_consent(&self, state: ConsentState) -> Result<()> {
        match state {
            ConsentState::Unset => self.delete_value(keys::CONSENT),
            _ => self.set_value(keys::CONSENT, state.as_str()),
        }
    }

    fn append_event(&self, event: &Event) -> Result<i64> {
        let payload = serde_json::to_string(event)?;
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO pending_events (event_type, payload, queued_at) VALUES (?1, ?2, ?3)",
            params![
                event.event_type.as_str(),
                payload,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn pending_events(&self) -> Result<Vec<QueuedEvent>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare("SELECT seq, payload FROM pending_events ORDER BY seq ASC")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        drop(stmt);

        let mut events = Vec::with_capacity(rows.len());
        for (seq, payload) in rows {
            match serde_json::from_str::<Event>(&payload) {
                Ok(event) => events.push(QueuedEvent { seq, event }),
                Err(e) => {
                    // Never deliverable, so never covered by a clear; drop it now
                    tracing::warn!(seq, error = %e, "Dropping unreadable queued event");
                    conn.execute("DELETE FROM pending_events WHERE seq = ?", [seq])?;
                }
            }
        }
        Ok(events)
    }

    fn clear_events(&self) -> Result<usize> {
        let conn = self.connection()?;
        Ok(conn.execute("DELETE FROM pending_events", [])?)
    }

    fn clear_events_through(&self, through: i64) -> Result<usize> {
        let conn = self.connection()?;
        Ok(conn.execute("DELETE FROM pending_events WHERE seq <= ?", [through])?)
    }

    fn tour_ids(&self) -> Result<Vec<String>> {
        match self.get_value(keys::TOUR_IDS)? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    fn set_tour_ids(&self, ids: &[String]) -> Result<()> {
        self.set_value(keys::TOUR_IDS, &serde_json::to_string(ids)?)
    }

    fn last_viewed_artwork(&self) -> Result<Option<String>> {
        self.get_value(keys::LAST_VIEWED_ARTWORK)
    }

    fn set_last_viewed_artwork(&self, artwork_id: Option<&str>) -> Result<()> {
        match artwork_id {
            Some(id) => self.set_value(keys::LAST_VIEWED_ARTWORK, id),
            None => self.delete_value(keys::LAST_VIEWED_ARTWORK),
        }
    }
}

impl ResponseCache for Database {
    fn generations(&self) -> Result<Vec<String>> {
        let conn = self.connection()?;
        let mut stmt =
            conn.prepare("SELECT DISTINCT generation FROM cache_entries ORDER BY generation")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(names)
    }

    fn delete_generation(&self, generation: &str) -> Result<usize> {
        let conn = self.connection()?;
        Ok(conn.execute(
            "DELETE FROM cache_entries WHERE generation = ?",
            [generation],
        )?)
    }

    fn get(&self, generation: &str, path: &str) -> Result<Option<Response>> {
        let conn = self.connection()?;
        conn.query_row(
            "SELECT status, content_type, body FROM cache_entries WHERE generation = ?1 AND path = ?2",
            params![generation, path],
            |row| {
                Ok(Response {
                    status: row.get(0)?,
                    content_type: row.get(1)?,
                    body: row.get(2)?,
                    source: ResponseSource::Cache,
                })
            },
        )
        .optional()
        .map_err(Error::from)
    }

    fn put(&self, generation: &str, path: &str, response: &Response) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            r#"
            INSERT OR REPLACE INTO cache_entries (generation, path, status, content_type, body, stored_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                generation,
                path,
                response.status,
                response.content_type,
                response.body,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }
}
