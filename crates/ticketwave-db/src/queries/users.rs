//! Recipient query functions.

use rusqlite::{Connection, OptionalExtension, Row};
use ticketwave_types::{Recipient, UserId};

use crate::Result;

/// Register a recipient, or refresh the handle of an existing one.
pub fn register(
    conn: &Connection,
    user_id: UserId,
    username: Option<&str>,
    registered_at: u64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO users (user_id, username, registered_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(user_id) DO UPDATE SET username = COALESCE(excluded.username, users.username)",
        rusqlite::params![user_id.0, username, registered_at as i64],
    )?;
    Ok(())
}

pub fn get(conn: &Connection, user_id: UserId) -> Result<Option<Recipient>> {
    let row = conn
        .query_row(
            "SELECT user_id, username, last_ticket_at FROM users WHERE user_id = ?1",
            [user_id.0],
            map_row,
        )
        .optional()?;
    Ok(row)
}

/// Look up a recipient by handle (with or without a leading `@`).
pub fn find_by_username(conn: &Connection, username: &str) -> Result<Option<UserId>> {
    let handle = username.trim_start_matches('@');
    let id: Option<i64> = conn
        .query_row(
            "SELECT user_id FROM users WHERE username = ?1 COLLATE NOCASE",
            [handle],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id.map(UserId))
}

/// Every recipient in registration order.
pub fn list(conn: &Connection) -> Result<Vec<Recipient>> {
    let mut stmt = conn.prepare(
        "SELECT user_id, username, last_ticket_at FROM users ORDER BY registered_at, user_id",
    )?;
    let rows = stmt
        .query_map([], map_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn map_row(row: &Row<'_>) -> rusqlite::Result<Recipient> {
    Ok(Recipient {
        user_id: UserId(row.get(0)?),
        username: row.get(1)?,
        last_ticket_at: row.get::<_, Option<i64>>(2)?.map(|v| v as u64),
    })
}
