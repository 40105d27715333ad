//! Ticket query functions.
//!
//! A ticket is *free* when it is unassigned, not archived and not lost.

use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row};
use ticketwave_types::{Fingerprint, TicketId, TicketRecord, TicketStats, UserId, WaveId};

use crate::{constraint_or, DbError, Result};

const COLUMNS: &str = "id, storage_name, fingerprint, original_name, uploaded_by, uploaded_at,
     assigned_to, assigned_at, archived_unused, lost, wave_id";

const FREE: &str = "assigned_to IS NULL AND archived_unused = 0 AND lost = 0";

/// Insert a new unassigned ticket.
///
/// Returns [`DbError::Constraint`] when the fingerprint or storage name already exists.
pub fn insert(
    conn: &Connection,
    storage_name: &str,
    fingerprint: &Fingerprint,
    original_name: &str,
    uploaded_by: UserId,
    uploaded_at: u64,
    wave_id: Option<WaveId>,
) -> Result<TicketId> {
    conn.execute(
        "INSERT INTO tickets
         (storage_name, fingerprint, original_name, uploaded_by, uploaded_at, wave_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            storage_name,
            fingerprint.as_bytes().as_slice(),
            original_name,
            uploaded_by.0,
            uploaded_at as i64,
            wave_id.map(|w| w.0),
        ],
    )
    .map_err(|e| constraint_or(e, "duplicate ticket fingerprint or storage name"))?;
    Ok(TicketId(conn.last_insert_rowid()))
}

/// Whether a ticket with this content fingerprint is already stored.
pub fn fingerprint_exists(conn: &Connection, fingerprint: &Fingerprint) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT id FROM tickets WHERE fingerprint = ?1",
            [fingerprint.as_bytes().as_slice()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Fetch one ticket.
pub fn get(conn: &Connection, id: TicketId) -> Result<TicketRecord> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM tickets WHERE id = ?1"),
        [id.0],
        map_row,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => DbError::NotFound(format!("ticket {id}")),
        other => DbError::Sqlite(other),
    })
}

/// First free ticket bound to `wave_id` that is not held by a pending delivery.
pub fn first_available(conn: &Connection, wave_id: WaveId) -> Result<Option<TicketRecord>> {
    let row = conn
        .query_row(
            &format!(
                "SELECT {COLUMNS} FROM tickets
                 WHERE wave_id = ?1 AND {FREE}
                   AND id NOT IN (SELECT ticket_id FROM pending_deliveries)
                 ORDER BY id
                 LIMIT 1"
            ),
            [wave_id.0],
            map_row,
        )
        .optional()?;
    Ok(row)
}

/// Claim a ticket for `user` without a delivery timestamp.
///
/// Succeeds only if the ticket is unconfirmed, not archived, not lost, and
/// either unassigned or already claimed by the same user.
pub fn reserve(conn: &Connection, id: TicketId, user: UserId) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE tickets SET assigned_to = ?2, assigned_at = NULL
         WHERE id = ?1 AND archived_unused = 0 AND lost = 0 AND assigned_at IS NULL
           AND (assigned_to IS NULL OR assigned_to = ?2)",
        rusqlite::params![id.0, user.0],
    )?;
    Ok(changed == 1)
}

/// Stamp the delivery time and mirror it into the recipient's last-received marker.
pub fn confirm_delivered(conn: &Connection, id: TicketId, user: UserId, at: u64) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    let changed = tx.execute(
        "UPDATE tickets SET assigned_at = ?3
         WHERE id = ?1 AND assigned_to = ?2 AND lost = 0",
        rusqlite::params![id.0, user.0, at as i64],
    )?;
    if changed != 1 {
        return Err(DbError::Constraint(format!(
            "ticket {id} is not reserved for user {user}"
        )));
    }
    tx.execute(
        "INSERT INTO users (user_id, last_ticket_at, registered_at) VALUES (?1, ?2, ?2)
         ON CONFLICT(user_id) DO UPDATE SET last_ticket_at = excluded.last_ticket_at",
        rusqlite::params![user.0, at as i64],
    )?;
    tx.commit()?;
    Ok(())
}

/// Clear an unconfirmed assignment. Returns false if nothing was released.
pub fn release(conn: &Connection, id: TicketId) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE tickets SET assigned_to = NULL
         WHERE id = ?1 AND assigned_to IS NOT NULL AND assigned_at IS NULL",
        [id.0],
    )?;
    Ok(changed == 1)
}

/// The unconfirmed reservation `user` holds in `wave_id`, if any.
pub fn reserved_for(conn: &Connection, user: UserId, wave_id: WaveId) -> Result<Option<TicketRecord>> {
    let row = conn
        .query_row(
            &format!(
                "SELECT {COLUMNS} FROM tickets
                 WHERE wave_id = ?1 AND assigned_to = ?2 AND assigned_at IS NULL
                   AND lost = 0 AND archived_unused = 0
                 ORDER BY id
                 LIMIT 1"
            ),
            rusqlite::params![wave_id.0, user.0],
            map_row,
        )
        .optional()?;
    Ok(row)
}

/// Return every unconfirmed reservation to the pool. Returns how many were released.
pub fn release_unconfirmed(conn: &Connection) -> Result<usize> {
    let changed = conn.execute(
        "UPDATE tickets SET assigned_to = NULL
         WHERE assigned_to IS NOT NULL AND assigned_at IS NULL",
        [],
    )?;
    Ok(changed)
}

/// Flag a never-delivered ticket as lost, dropping any unconfirmed claim.
pub fn mark_lost(conn: &Connection, id: TicketId) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE tickets SET lost = 1, assigned_to = NULL
         WHERE id = ?1 AND lost = 0 AND assigned_at IS NULL",
        [id.0],
    )?;
    Ok(changed == 1)
}

/// Flag a free ticket as superseded.
pub fn mark_archived_unused(conn: &Connection, id: TicketId) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE tickets SET archived_unused = 1
         WHERE id = ?1 AND assigned_to IS NULL AND lost = 0 AND archived_unused = 0",
        [id.0],
    )?;
    Ok(changed == 1)
}

/// All free tickets regardless of wave binding.
pub fn list_free(conn: &Connection) -> Result<Vec<TicketRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM tickets WHERE {FREE} ORDER BY id"
    ))?;
    let rows = stmt
        .query_map([], map_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Free tickets not bound to any wave, optionally only those uploaded at or after `since`.
pub fn list_unbound(conn: &Connection, since: Option<u64>) -> Result<Vec<TicketRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM tickets
         WHERE wave_id IS NULL AND {FREE} AND (?1 IS NULL OR uploaded_at >= ?1)
         ORDER BY id"
    ))?;
    let rows = stmt
        .query_map([since.map(|s| s as i64)], map_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Count of [`list_unbound`].
pub fn count_unbound(conn: &Connection, since: Option<u64>) -> Result<u64> {
    let count: i64 = conn.query_row(
        &format!(
            "SELECT COUNT(*) FROM tickets
             WHERE wave_id IS NULL AND {FREE} AND (?1 IS NULL OR uploaded_at >= ?1)"
        ),
        [since.map(|s| s as i64)],
        |row| row.get(0),
    )?;
    Ok(count as u64)
}

/// Bind every free unbound ticket uploaded at or after `since` to `wave_id`.
///
/// Stale delivery timestamps are cleared on the way.
pub fn bind_unbound(conn: &Connection, wave_id: WaveId, since: u64) -> Result<usize> {
    let changed = conn.execute(
        &format!(
            "UPDATE tickets SET wave_id = ?1, assigned_at = NULL
             WHERE wave_id IS NULL AND {FREE} AND uploaded_at >= ?2"
        ),
        rusqlite::params![wave_id.0, since as i64],
    )?;
    Ok(changed)
}

/// Hard-delete a ticket row.
pub fn delete(conn: &Connection, id: TicketId) -> Result<()> {
    conn.execute("DELETE FROM tickets WHERE id = ?1", [id.0])?;
    Ok(())
}

/// Counters, optionally restricted to one wave.
pub fn stats(conn: &Connection, wave_id: Option<WaveId>) -> Result<TicketStats> {
    conn.query_row(
        &format!(
            "SELECT
                COALESCE(SUM(CASE WHEN {FREE} THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN lost = 0 AND assigned_to IS NOT NULL AND assigned_at IS NULL THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN lost = 0 AND assigned_to IS NOT NULL AND assigned_at IS NOT NULL THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN lost = 1 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN lost = 0 AND assigned_to IS NULL AND archived_unused = 1 THEN 1 ELSE 0 END), 0)
             FROM tickets
             WHERE (?1 IS NULL OR wave_id = ?1)"
        ),
        [wave_id.map(|w| w.0)],
        |row| {
            Ok(TicketStats {
                free: row.get::<_, i64>(0)? as u64,
                reserved: row.get::<_, i64>(1)? as u64,
                issued: row.get::<_, i64>(2)? as u64,
                lost: row.get::<_, i64>(3)? as u64,
                archived: row.get::<_, i64>(4)? as u64,
            })
        },
    )
    .map_err(DbError::Sqlite)
}

/// Every ticket row, oldest first.
pub fn list_all(conn: &Connection) -> Result<Vec<TicketRecord>> {
    let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM tickets ORDER BY id"))?;
    let rows = stmt
        .query_map([], map_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn map_row(row: &Row<'_>) -> rusqlite::Result<TicketRecord> {
    let fp_bytes: Vec<u8> = row.get(2)?;
    let fingerprint: [u8; 32] = fp_bytes.try_into().map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            Type::Blob,
            "fingerprint must be 32 bytes".into(),
        )
    })?;
    Ok(TicketRecord {
        id: TicketId(row.get(0)?),
        storage_name: row.get(1)?,
        fingerprint: Fingerprint(fingerprint),
        original_name: row.get(3)?,
        uploaded_by: UserId(row.get(4)?),
        uploaded_at: row.get::<_, i64>(5)? as u64,
        assigned_to: row.get::<_, Option<i64>>(6)?.map(UserId),
        assigned_at: row.get::<_, Option<i64>>(7)?.map(|v| v as u64),
        archived_unused: row.get(8)?,
        lost: row.get(9)?,
        wave_id: row.get::<_, Option<i64>>(10)?.map(WaveId),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::waves;

    fn test_db() -> Connection {
        crate::open_memory().expect("open test db")
    }

    fn add(conn: &Connection, n: u8, wave: Option<WaveId>) -> TicketId {
        insert(
            conn,
            &format!("{n}.pdf"),
            &Fingerprint([n; 32]),
            &format!("seat-{n}.pdf"),
            UserId(1),
            1_000 + n as u64,
            wave,
        )
        .expect("insert")
    }

    #[test]
    fn test_insert_and_get() {
        let conn = test_db();
        let id = add(&conn, 1, None);
        let t = get(&conn, id).expect("get");
        assert_eq!(t.original_name, "seat-1.pdf");
        assert_eq!(t.fingerprint, Fingerprint([1; 32]));
        assert!(t.assigned_to.is_none());
        assert!(fingerprint_exists(&conn, &Fingerprint([1; 32])).expect("exists"));
        assert!(!fingerprint_exists(&conn, &Fingerprint([2; 32])).expect("exists"));
    }

    #[test]
    fn test_duplicate_fingerprint_is_constraint() {
        let conn = test_db();
        add(&conn, 1, None);
        let err = insert(
            &conn,
            "other.pdf",
            &Fingerprint([1; 32]),
            "copy.pdf",
            UserId(1),
            5,
            None,
        )
        .expect_err("duplicate");
        assert!(matches!(err, DbError::Constraint(_)));
    }

    #[test]
    fn test_get_missing() {
        let conn = test_db();
        assert!(matches!(get(&conn, TicketId(99)), Err(DbError::NotFound(_))));
    }

    #[test]
    fn test_reserve_confirm_release_rules() {
        let conn = test_db();
        let wave = waves::insert(&conn, 10, UserId(1), 10).expect("wave");
        let id = add(&conn, 1, Some(wave));

        assert!(reserve(&conn, id, UserId(7)).expect("reserve"));
        // Same user may re-claim, another may not.
        assert!(reserve(&conn, id, UserId(7)).expect("re-reserve"));
        assert!(!reserve(&conn, id, UserId(8)).expect("steal"));

        assert!(release(&conn, id).expect("release"));
        assert!(!release(&conn, id).expect("second release is no-op"));

        assert!(reserve(&conn, id, UserId(8)).expect("reserve other"));
        confirm_delivered(&conn, id, UserId(8), 500).expect("confirm");
        let t = get(&conn, id).expect("get");
        assert_eq!(t.assigned_to, Some(UserId(8)));
        assert_eq!(t.assigned_at, Some(500));

        assert!(!release(&conn, id).expect("delivered cannot be released"));
        assert!(!mark_lost(&conn, id).expect("delivered cannot be lost"));

        let last: i64 = conn
            .query_row(
                "SELECT last_ticket_at FROM users WHERE user_id = 8",
                [],
                |row| row.get(0),
            )
            .expect("user row");
        assert_eq!(last, 500);
    }

    #[test]
    fn test_confirm_requires_reservation() {
        let conn = test_db();
        let id = add(&conn, 1, None);
        let err = confirm_delivered(&conn, id, UserId(3), 10).expect_err("not reserved");
        assert!(matches!(err, DbError::Constraint(_)));
    }

    #[test]
    fn test_mark_lost_clears_claim() {
        let conn = test_db();
        let id = add(&conn, 1, None);
        assert!(reserve(&conn, id, UserId(4)).expect("reserve"));
        assert!(mark_lost(&conn, id).expect("lost"));
        let t = get(&conn, id).expect("get");
        assert!(t.lost);
        assert!(t.assigned_to.is_none());
        assert!(!mark_lost(&conn, id).expect("idempotent"));
        assert!(!reserve(&conn, id, UserId(4)).expect("lost is never reserved"));
    }

    #[test]
    fn test_unconfirmed_reservations() {
        let conn = test_db();
        let wave = waves::insert(&conn, 10, UserId(1), 10).expect("wave");
        let a = add(&conn, 1, Some(wave));
        let b = add(&conn, 2, Some(wave));
        reserve(&conn, a, UserId(5)).expect("reserve a");
        reserve(&conn, b, UserId(6)).expect("reserve b");
        confirm_delivered(&conn, b, UserId(6), 50).expect("confirm b");

        assert_eq!(reserved_for(&conn, UserId(5), wave).expect("q").map(|t| t.id), Some(a));
        assert!(reserved_for(&conn, UserId(6), wave).expect("q").is_none());

        assert_eq!(release_unconfirmed(&conn).expect("release"), 1);
        assert!(get(&conn, a).expect("a").assigned_to.is_none());
        assert_eq!(get(&conn, b).expect("b").assigned_to, Some(UserId(6)));
    }

    #[test]
    fn test_first_available_skips_pending_and_flags() {
        let conn = test_db();
        let wave = waves::insert(&conn, 10, UserId(1), 10).expect("wave");
        let a = add(&conn, 1, Some(wave));
        let b = add(&conn, 2, Some(wave));
        let c = add(&conn, 3, Some(wave));
        add(&conn, 4, None);

        assert_eq!(first_available(&conn, wave).expect("q").map(|t| t.id), Some(a));

        mark_archived_unused(&conn, a).expect("archive");
        crate::queries::pending::upsert(
            &conn,
            UserId(9),
            b,
            ticketwave_types::PendingReason::RetryExhausted,
            20,
        )
        .expect("pending");

        assert_eq!(first_available(&conn, wave).expect("q").map(|t| t.id), Some(c));
        mark_lost(&conn, c).expect("lost");
        assert!(first_available(&conn, wave).expect("q").is_none());
    }

    #[test]
    fn test_unbound_listing_and_binding() {
        let conn = test_db();
        add(&conn, 1, None); // uploaded_at 1001
        add(&conn, 2, None); // 1002
        add(&conn, 3, None); // 1003

        assert_eq!(count_unbound(&conn, None).expect("count"), 3);
        assert_eq!(count_unbound(&conn, Some(1002)).expect("count"), 2);
        assert_eq!(list_unbound(&conn, Some(1003)).expect("list").len(), 1);

        let wave = waves::insert(&conn, 2_000, UserId(1), 2_000).expect("wave");
        assert_eq!(bind_unbound(&conn, wave, 1002).expect("bind"), 2);
        assert_eq!(count_unbound(&conn, None).expect("count"), 1);
    }

    #[test]
    fn test_stats() {
        let conn = test_db();
        let wave = waves::insert(&conn, 10, UserId(1), 10).expect("wave");
        let a = add(&conn, 1, Some(wave));
        let b = add(&conn, 2, Some(wave));
        let c = add(&conn, 3, Some(wave));
        let d = add(&conn, 4, None);
        add(&conn, 5, Some(wave));

        reserve(&conn, a, UserId(5)).expect("reserve");
        reserve(&conn, b, UserId(6)).expect("reserve");
        confirm_delivered(&conn, b, UserId(6), 50).expect("confirm");
        mark_lost(&conn, c).expect("lost");
        mark_archived_unused(&conn, d).expect("archive");

        let all = stats(&conn, None).expect("stats");
        assert_eq!(
            all,
            TicketStats {
                free: 1,
                reserved: 1,
                issued: 1,
                lost: 1,
                archived: 1
            }
        );

        let in_wave = stats(&conn, Some(wave)).expect("stats");
        assert_eq!(in_wave.archived, 0);
        assert_eq!(in_wave.free, 1);
    }

    #[test]
    fn test_lost_check_constraint() {
        let conn = test_db();
        let id = add(&conn, 1, None);
        reserve(&conn, id, UserId(2)).expect("reserve");
        let err = conn
            .execute("UPDATE tickets SET lost = 1 WHERE id = ?1", [id.0])
            .expect_err("check constraint");
        assert!(matches!(
            constraint_or(err, "lost with owner"),
            DbError::Constraint(_)
        ));
    }
}
