//! Database migration system.
//!
//! Schema version stored in `PRAGMA user_version`. Migrations are forward-only;
//! a fresh database gets the base schema and then every step after it.

use rusqlite::Connection;

use crate::{schema, DbError, Result, SCHEMA_VERSION};

/// Run all pending migrations.
pub fn run(conn: &Connection) -> Result<()> {
    let current_version: u32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .map_err(DbError::Sqlite)?;

    if current_version > SCHEMA_VERSION {
        return Err(DbError::Migration(format!(
            "Database version {current_version} is newer than supported {SCHEMA_VERSION}"
        )));
    }

    let mut version = current_version;
    if version == 0 {
        tracing::info!("Initializing database schema v1");
        conn.execute_batch(schema::SCHEMA_V1)
            .map_err(DbError::Sqlite)?;
        insert_default_state(conn)?;
        version = 1;
        conn.pragma_update(None, "user_version", version)
            .map_err(DbError::Sqlite)?;
    }

    while version < SCHEMA_VERSION {
        version += 1;
        tracing::info!("Running migration to v{version}");
        run_migration(conn, version)?;
        conn.pragma_update(None, "user_version", version)
            .map_err(DbError::Sqlite)?;
    }

    Ok(())
}

/// Seed the single wave-state row as idle.
fn insert_default_state(conn: &Connection) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO wave_state (id, status) VALUES (1, 'idle')",
        [],
    )
    .map_err(DbError::Sqlite)?;
    Ok(())
}

fn run_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        2 => conn.execute_batch(schema::SCHEMA_V2).map_err(DbError::Sqlite),
        _ => Err(DbError::Migration(format!(
            "Unknown migration version: {version}"
        ))),
    }
}
