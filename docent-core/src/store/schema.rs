//! Database schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: persisted client state and the durable event queue
    r#"
    -- Small typed values: session id, consent flag, tour list, last-viewed marker
    CREATE TABLE IF NOT EXISTS kv (
        key              TEXT PRIMARY KEY,
        value            TEXT NOT NULL,
        updated_at       DATETIME NOT NULL
    );

    -- Pending telemetry, oldest first. AUTOINCREMENT keeps seq monotonic
    -- across deletes so a snapshot boundary is never reused.
    CREATE TABLE IF NOT EXISTS pending_events (
        seq              INTEGER PRIMARY KEY AUTOINCREMENT,
        event_type       TEXT NOT NULL,
        payload          JSON NOT NULL,
        queued_at        DATETIME NOT NULL
    );
    "#,
    // Version 2: response cache generations
    r#"
    CREATE TABLE IF NOT EXISTS cache_entries (
        generation       TEXT NOT NULL,
        path             TEXT NOT NULL,
        status           INTEGER NOT NULL,
        content_type     TEXT,
        body             BLOB NOT NULL,
        stored_at        DATETIME NOT NULL,

        PRIMARY KEY (generation, path)
    );

    CREATE INDEX IF NOT EXISTS idx_cache_entries_generation ON cache_entries(generation);
    "#,
];

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .unwrap_or(0);

    tracing::info!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking database migrations"
    );

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running migration");
            conn.execute_batch(migration)?;
            conn.execute(&format!("PRAGMA user_version = {}", version), [])?;
        }
    }

    if current_version < SCHEMA_VERSION {
        tracing::info!(
            from = current_version,
            to = SCHEMA_VERSION,
            "Migrations complete"
        );
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_idempotent() {
        let conn = Connection::open_in_memory().unwrap();

        // Run migrations twice - should be idempotent
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let version = get_schema_version(&conn).unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_tables_created() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        for table in ["kv", "pending_events", "cache_entries"] {
            let exists: i32 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?",
                    [table],
                    |r| r.get(0),
                )
                .unwrap();
            assert_eq!(exists, 1, "Table {} should exist", table);
        }
    }

    #[test]
    fn test_seq_not_reused_after_delete() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let insert = "INSERT INTO pending_events (event_type, payload, queued_at) VALUES ('scan', '{}', '2026-01-01T00:00:00Z')";
        conn.execute(insert, []).unwrap();
        let first = conn.last_insert_rowid();
        conn.execute("DELETE FROM pending_events", []).unwrap();
        conn.execute(insert, []).unwrap();
        assert!(conn.last_insert_rowid() > first);
    }
}
