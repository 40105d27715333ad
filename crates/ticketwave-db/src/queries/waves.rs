//! Wave history and current-wave state queries.

use rusqlite::{Connection, OptionalExtension, Row};
use ticketwave_types::{UserId, Wave, WaveId, WaveState, WaveStatus};

use crate::{DbError, Result};

/// Read the single current-wave state row.
pub fn get_state(conn: &Connection) -> Result<WaveState> {
    let (status, prepared_at, wave_start, wave_id): (String, Option<i64>, Option<i64>, Option<i64>) =
        conn.query_row(
            "SELECT status, prepared_at, wave_start, wave_id FROM wave_state WHERE id = 1",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => DbError::NotFound("wave state".to_string()),
            other => DbError::Sqlite(other),
        })?;

    let status = WaveStatus::parse(&status)
        .ok_or_else(|| DbError::Serialization(format!("unknown wave status '{status}'")))?;

    Ok(WaveState {
        status,
        prepared_at: prepared_at.map(|v| v as u64),
        wave_start: wave_start.map(|v| v as u64),
        wave_id: wave_id.map(WaveId),
    })
}

/// Overwrite the current-wave state row.
pub fn set_state(conn: &Connection, state: &WaveState) -> Result<()> {
    conn.execute(
        "INSERT INTO wave_state (id, status, prepared_at, wave_start, wave_id)
         VALUES (1, ?1, ?2, ?3, ?4)
         ON CONFLICT(id) DO UPDATE SET
            status = excluded.status,
            prepared_at = excluded.prepared_at,
            wave_start = excluded.wave_start,
            wave_id = excluded.wave_id",
        rusqlite::params![
            state.status.as_str(),
            state.prepared_at.map(|v| v as i64),
            state.wave_start.map(|v| v as i64),
            state.wave_id.map(|w| w.0),
        ],
    )?;
    Ok(())
}

/// Record a new wave and return its id.
pub fn insert(
    conn: &Connection,
    started_at: u64,
    created_by: UserId,
    confirmed_at: u64,
) -> Result<WaveId> {
    conn.execute(
        "INSERT INTO waves (started_at, created_by, confirmed_at) VALUES (?1, ?2, ?3)",
        rusqlite::params![started_at as i64, created_by.0, confirmed_at as i64],
    )?;
    Ok(WaveId(conn.last_insert_rowid()))
}

pub fn get(conn: &Connection, id: WaveId) -> Result<Wave> {
    conn.query_row(
        "SELECT id, started_at, created_by, confirmed_at FROM waves WHERE id = ?1",
        [id.0],
        map_row,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => DbError::NotFound(format!("wave {id}")),
        other => DbError::Sqlite(other),
    })
}

/// Most recently created wave.
pub fn latest(conn: &Connection) -> Result<Option<Wave>> {
    let wave = conn
        .query_row(
            "SELECT id, started_at, created_by, confirmed_at FROM waves ORDER BY id DESC LIMIT 1",
            [],
            map_row,
        )
        .optional()?;
    Ok(wave)
}

pub fn count(conn: &Connection) -> Result<u64> {
    let n: i64 = conn.query_row("SELECT COUNT(*) FROM waves", [], |row| row.get(0))?;
    Ok(n as u64)
}

/// All waves, newest first.
pub fn list(conn: &Connection) -> Result<Vec<Wave>> {
    let mut stmt = conn.prepare(
        "SELECT id, started_at, created_by, confirmed_at FROM waves ORDER BY id DESC",
    )?;
    let rows = stmt
        .query_map([], map_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn map_row(row: &Row<'_>) -> rusqlite::Result<Wave> {
    Ok(Wave {
        id: WaveId(row.get(0)?),
        started_at: row.get::<_, i64>(1)? as u64,
        created_by: UserId(row.get(2)?),
        confirmed_at: row.get::<_, i64>(3)? as u64,
    })
}
