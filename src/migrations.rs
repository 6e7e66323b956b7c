use log::info;
use rusqlite::Connection;
use rusqlite_migration::{Migrations, M};

use crate::error::Result;

/// Schema history for the point store. Append only; never edit a shipped step.
pub fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        // v1: date-indexed point table
        M::up(
            r#"
            CREATE TABLE location_points (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                latitude REAL NOT NULL,
                longitude REAL NOT NULL,
                accuracy REAL NOT NULL,
                captured_at INTEGER NOT NULL,
                synced_at INTEGER
            );
            CREATE INDEX idx_location_points_captured_at
                ON location_points(captured_at);
            "#,
        ),
        // v2: partial index for the sync driver's unsynced scan
        M::up(
            r#"
            CREATE INDEX idx_location_points_unsynced
                ON location_points(captured_at, id) WHERE synced_at IS NULL;
            "#,
        ),
        // v3: millisecond timestamps to nanoseconds
        M::up(
            r#"
            UPDATE location_points
               SET captured_at = captured_at * 1000000,
                   synced_at = synced_at * 1000000;
            "#,
        ),
    ])
}

/// Bring the database schema up to date.
pub fn migrate_to_latest(conn: &mut Connection) -> Result<()> {
    let before = schema_version(conn)?;
    migrations().to_latest(conn)?;
    let after = schema_version(conn)?;
    if after != before {
        info!("[LocalStore] Migrated schema from v{} to v{}", before, after);
    }
    Ok(())
}

/// Current schema version (SQLite `user_version`).
pub fn schema_version(conn: &Connection) -> Result<i64> {
    let version = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    Ok(version)
}
