//! Database schema migrations for SQLite.
//!
//! We use a simple versioned migration system. Each migration is a SQL string
//! that transforms the schema from version N to N+1.

use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 1;

/// Initialize or migrate the database schema.
///
/// This function is idempotent - it can be called multiple times safely.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    if current > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "database schema version {} is newer than supported version {}",
            current, CURRENT_VERSION
        )));
    }

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, chrono::Utc::now().timestamp_millis()],
            )?;
            tracing::debug!(version, "applied schema migration");
        }

        tx.commit()?;
    }

    Ok(())
}

/// Apply a specific migration version.
fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: Initial schema.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Events table: append-only, one row per recorded event
        CREATE TABLE events (
            event_id TEXT PRIMARY KEY,          -- hyphenated UUID
            shipment_id TEXT NOT NULL,
            sequence INTEGER NOT NULL UNIQUE,   -- ledger-wide append counter
            event_type TEXT NOT NULL,
            timestamp INTEGER NOT NULL,         -- occurrence time (Unix ms)
            actor_id TEXT NOT NULL,
            actor_type TEXT NOT NULL,
            location_type TEXT NOT NULL,
            content TEXT NOT NULL,              -- JSON event content (source of truth)
            data_hash BLOB NOT NULL,            -- 32 bytes
            previous_hash BLOB NOT NULL,        -- 32 bytes, zero for the first event
            transaction_hash BLOB NOT NULL UNIQUE,  -- 32 bytes
            verified INTEGER NOT NULL DEFAULT 0,    -- 0=unverified, 1=verified
            recorded_at INTEGER NOT NULL        -- local append time (Unix ms)
        );

        -- Latest verification outcome per shipment
        CREATE TABLE verifications (
            shipment_id TEXT PRIMARY KEY,
            is_valid INTEGER NOT NULL,
            event_count INTEGER NOT NULL,
            verified_at INTEGER NOT NULL
        );

        -- Chain reads and head lookups
        CREATE INDEX idx_events_chain ON events(shipment_id, timestamp, sequence);
        -- Most-recent-first search
        CREATE INDEX idx_events_recent ON events(timestamp, sequence);
        CREATE INDEX idx_events_type ON events(event_type);
        CREATE INDEX idx_events_actor ON events(actor_id);
        "#,
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_creates_tables() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();

        assert!(tables.contains(&"events".to_string()));
        assert!(tables.contains(&"verifications".to_string()));
        assert!(tables.contains(&"schema_migrations".to_string()));
    }

    #[test]
    fn test_migration_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        migrate(&mut conn).unwrap();
        migrate(&mut conn).unwrap();

        let version: u32 = conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[test]
    fn test_newer_schema_rejected() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        conn.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (99, 0)",
            [],
        )
        .unwrap();

        assert!(matches!(migrate(&mut conn), Err(StoreError::Migration(_))));
    }
}
