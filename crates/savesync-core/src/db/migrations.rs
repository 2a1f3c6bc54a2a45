//! Database migrations

use crate::error::Result;
use rusqlite::Connection;

/// Current schema version
const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations
pub fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get::<_, i32>(0).map(|value| value != 0),
    )?;
    if !exists {
        return Ok(0);
    }

    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;
    Ok(version)
}

/// Migration to version 1: Initial schema
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "BEGIN;
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );
        CREATE TABLE IF NOT EXISTS save_records (
            id TEXT PRIMARY KEY,
            player_id TEXT NOT NULL,
            session_batch_id TEXT NOT NULL UNIQUE,
            sequence INTEGER NOT NULL,
            weight TEXT NOT NULL,
            payload_json TEXT NOT NULL,
            saved_locally INTEGER NOT NULL DEFAULT 0,
            local_saved_at INTEGER,
            last_attempted_server_save INTEGER,
            batch_populated_at INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_save_records_player
            ON save_records(player_id, sequence);
        INSERT INTO schema_version (version) VALUES (1);
        COMMIT;",
    )?;
    tracing::debug!("Applied migration v1");
    Ok(())
}

/// Migration to version 2: count conflict rewrites of the outbound payload
fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "BEGIN;
        ALTER TABLE save_records ADD COLUMN revision INTEGER NOT NULL DEFAULT 0;
        INSERT INTO schema_version (version) VALUES (2);
        COMMIT;",
    )?;
    tracing::debug!("Applied migration v2");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    #[test]
    fn test_migrations() {
        let conn = setup();
        run(&conn).unwrap();
        assert_eq!(get_version(&conn).unwrap(), CURRENT_VERSION);
    }

    #[test]
    fn test_migrations_idempotent() {
        let conn = setup();
        run(&conn).unwrap();
        run(&conn).unwrap();
        assert_eq!(get_version(&conn).unwrap(), CURRENT_VERSION);
    }

    #[test]
    fn test_migration_v2_adds_revision_column() {
        let conn = setup();
        run(&conn).unwrap();

        let has_revision: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM pragma_table_info('save_records') WHERE name = 'revision')",
                [],
                |row| row.get::<_, i32>(0).map(|value| value != 0),
            )
            .unwrap();
        assert!(has_revision);
    }
}
