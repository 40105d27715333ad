//! Invite code query functions.

use rusqlite::{Connection, OptionalExtension, Row};
use ticketwave_types::{InviteCode, UserId};

use crate::queries::users;
use crate::{constraint_or, DbError, Result};

/// Store a new unused code. Returns false if the code already exists.
pub fn insert(conn: &Connection, code: &str, created_at: u64) -> Result<bool> {
    match conn.execute(
        "INSERT INTO invite_codes (code, created_at) VALUES (?1, ?2)",
        rusqlite::params![code, created_at as i64],
    ) {
        Ok(_) => Ok(true),
        Err(e) => match constraint_or(e, "duplicate invite code") {
            DbError::Constraint(_) => Ok(false),
            other => Err(other),
        },
    }
}

pub fn get(conn: &Connection, code: &str) -> Result<Option<InviteCode>> {
    let row = conn
        .query_row(
            "SELECT code, created_at, used, used_at, redeemed_by, redeemed_username
             FROM invite_codes WHERE code = ?1",
            [code],
            map_row,
        )
        .optional()?;
    Ok(row)
}

/// Mark an unused code as redeemed by `user`. Returns false if it was already used.
pub fn redeem(
    conn: &Connection,
    code: &str,
    user: UserId,
    username: &str,
    at: u64,
) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE invite_codes
         SET used = 1, used_at = ?4, redeemed_by = ?2, redeemed_username = ?3
         WHERE code = ?1 AND used = 0",
        rusqlite::params![code, user.0, username, at as i64],
    )?;
    Ok(changed == 1)
}

/// Redeem `code` and register `user` under `username` in one commit.
/// Returns false, writing nothing, if the code is missing or already used.
pub fn redeem_and_register(
    conn: &Connection,
    code: &str,
    user: UserId,
    username: &str,
    at: u64,
) -> Result<bool> {
    let tx = conn.unchecked_transaction()?;
    if !redeem(&tx, code, user, username, at)? {
        return Ok(false);
    }
    users::register(&tx, user, Some(username), at)?;
    tx.commit()?;
    Ok(true)
}

/// Store a batch of fresh codes in one commit, skipping any that collide
/// with an existing code. Returns the codes actually stored.
pub fn insert_batch(conn: &Connection, codes: &[String], created_at: u64) -> Result<Vec<String>> {
    let tx = conn.unchecked_transaction()?;
    let mut stored = Vec::with_capacity(codes.len());
    for code in codes {
        if insert(&tx, code, created_at)? {
            stored.push(code.clone());
        }
    }
    tx.commit()?;
    Ok(stored)
}

/// Invalidate an unused code without attributing it to anyone.
pub fn burn(conn: &Connection, code: &str, at: u64) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE invite_codes SET used = 1, used_at = ?2 WHERE code = ?1 AND used = 0",
        rusqlite::params![code, at as i64],
    )?;
    Ok(changed == 1)
}

/// `(total, unused)` code counts.
pub fn counts(conn: &Connection) -> Result<(u64, u64)> {
    conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(CASE WHEN used = 0 THEN 1 ELSE 0 END), 0)
         FROM invite_codes",
        [],
        |row| Ok((row.get::<_, i64>(0)? as u64, row.get::<_, i64>(1)? as u64)),
    )
    .map_err(DbError::Sqlite)
}

fn map_row(row: &Row<'_>) -> rusqlite::Result<InviteCode> {
    Ok(InviteCode {
        code: row.get(0)?,
        created_at: row.get::<_, i64>(1)? as u64,
        used: row.get(2)?,
        used_at: row.get::<_, Option<i64>>(3)?.map(|v| v as u64),
        redeemed_by: row.get::<_, Option<i64>>(4)?.map(UserId),
        redeemed_username: row.get(5)?,
    })
}
