//! Operator (admin) query functions.

use rusqlite::{Connection, OptionalExtension};
use ticketwave_types::UserId;

use crate::Result;

pub fn grant(conn: &Connection, user_id: UserId, granted_at: u64) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO admins (user_id, granted_at) VALUES (?1, ?2)",
        rusqlite::params![user_id.0, granted_at as i64],
    )?;
    Ok(())
}

/// Returns false if the user was not an admin.
pub fn revoke(conn: &Connection, user_id: UserId) -> Result<bool> {
    let changed = conn.execute("DELETE FROM admins WHERE user_id = ?1", [user_id.0])?;
    Ok(changed == 1)
}

pub fn is_admin(conn: &Connection, user_id: UserId) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT user_id FROM admins WHERE user_id = ?1",
            [user_id.0],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

pub fn list(conn: &Connection) -> Result<Vec<UserId>> {
    let mut stmt = conn.prepare("SELECT user_id FROM admins ORDER BY granted_at, user_id")?;
    let rows = stmt
        .query_map([], |row| row.get::<_, i64>(0).map(UserId))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}
