//! Pending-delivery ledger queries. One row per recipient.

use rusqlite::{Connection, OptionalExtension, Row};
use ticketwave_types::{PendingDelivery, PendingReason, TicketId, UserId};

use crate::queries::tickets;
use crate::{DbError, Result};

/// Record (or overwrite) the reservation outstanding for `user_id`.
///
/// The attempt counter survives an overwrite that keeps the same ticket.
pub fn upsert(
    conn: &Connection,
    user_id: UserId,
    ticket_id: TicketId,
    reason: PendingReason,
    updated_at: u64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO pending_deliveries (user_id, ticket_id, reason, attempts, updated_at)
         VALUES (?1, ?2, ?3, 0, ?4)
         ON CONFLICT(user_id) DO UPDATE SET
            attempts = CASE WHEN pending_deliveries.ticket_id = excluded.ticket_id
                            THEN pending_deliveries.attempts ELSE 0 END,
            ticket_id = excluded.ticket_id,
            reason = excluded.reason,
            updated_at = excluded.updated_at",
        rusqlite::params![user_id.0, ticket_id.0, reason.as_str(), updated_at as i64],
    )?;
    Ok(())
}

/// Reserve `ticket_id` for `user_id` and record the hold, as one commit.
///
/// Returns false, writing nothing, if the ticket cannot be claimed by this
/// user. A crash can therefore never leave a reservation without its
/// ledger entry.
pub fn reserve_and_hold(
    conn: &Connection,
    user_id: UserId,
    ticket_id: TicketId,
    updated_at: u64,
) -> Result<bool> {
    let tx = conn.unchecked_transaction()?;
    if !tickets::reserve(&tx, ticket_id, user_id)? {
        return Ok(false);
    }
    upsert(&tx, user_id, ticket_id, PendingReason::Reserved, updated_at)?;
    tx.commit()?;
    Ok(true)
}

pub fn get(conn: &Connection, user_id: UserId) -> Result<Option<PendingDelivery>> {
    let row = conn
        .query_row(
            "SELECT user_id, ticket_id, reason, attempts, updated_at
             FROM pending_deliveries WHERE user_id = ?1",
            [user_id.0],
            map_row,
        )
        .optional()?;
    Ok(row)
}

/// Update the reason and add `attempts` to the running counter.
pub fn record_outcome(
    conn: &Connection,
    user_id: UserId,
    reason: PendingReason,
    attempts: u32,
    updated_at: u64,
) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE pending_deliveries
         SET reason = ?2, attempts = attempts + ?3, updated_at = ?4
         WHERE user_id = ?1",
        rusqlite::params![user_id.0, reason.as_str(), attempts as i64, updated_at as i64],
    )?;
    Ok(changed == 1)
}

pub fn remove(conn: &Connection, user_id: UserId) -> Result<bool> {
    let changed = conn.execute(
        "DELETE FROM pending_deliveries WHERE user_id = ?1",
        [user_id.0],
    )?;
    Ok(changed == 1)
}

/// Drop every entry. Returns how many were removed.
pub fn clear(conn: &Connection) -> Result<usize> {
    let changed = conn.execute("DELETE FROM pending_deliveries", [])?;
    Ok(changed)
}

/// All outstanding entries, oldest first.
pub fn list(conn: &Connection) -> Result<Vec<PendingDelivery>> {
    let mut stmt = conn.prepare(
        "SELECT user_id, ticket_id, reason, attempts, updated_at
         FROM pending_deliveries ORDER BY updated_at, user_id",
    )?;
    let rows = stmt
        .query_map([], map_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn count(conn: &Connection) -> Result<u64> {
    let n: i64 = conn
        .query_row("SELECT COUNT(*) FROM pending_deliveries", [], |row| row.get(0))
        .map_err(DbError::Sqlite)?;
    Ok(n as u64)
}

fn map_row(row: &Row<'_>) -> rusqlite::Result<PendingDelivery> {
    let reason: String = row.get(2)?;
    let reason = PendingReason::parse(&reason).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown pending reason '{reason}'").into(),
        )
    })?;
    Ok(PendingDelivery {
        user_id: UserId(row.get(0)?),
        ticket_id: TicketId(row.get(1)?),
        reason,
        attempts: row.get::<_, i64>(3)? as u32,
        updated_at: row.get::<_, i64>(4)? as u64,
    })
}
