//! Database schema migrations.
//!
//! Applies the locations schema and tracks applied versions in
//! `schema_migrations`.

use rusqlite::Connection;
use tracing::info;

use apteka_core::error::AptekaError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), AptekaError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| AptekaError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| AptekaError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: locations");
    }

    Ok(())
}

/// Version 1: ready-to-speak place lines with coordinates.
fn apply_v1(conn: &Connection) -> Result<(), AptekaError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS locations (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            text        TEXT NOT NULL,
            latitude    REAL NOT NULL CHECK (latitude BETWEEN -90 AND 90),
            longitude   REAL NOT NULL CHECK (longitude BETWEEN -180 AND 180),
            created_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );

        CREATE INDEX IF NOT EXISTS idx_locations_lat_lon
            ON locations (latitude, longitude);

        INSERT INTO schema_migrations (version, name) VALUES (1, 'locations');
        ",
    )
    .map_err(|e| AptekaError::Storage(format!("Migration v1 failed: {}", e)))?;
    Ok(())
}
