//! Ticket store: durable ticket records plus their backing files.
//!
//! Every method takes the shared connection lock for exactly one logical
//! operation, so the store never holds a transaction across a network call.

use std::path::PathBuf;

use ticketwave_db::queries::{pending, tickets, users, waves};
use ticketwave_db::{Connection, DbError, SharedConnection};
use ticketwave_storage::{fingerprint, TicketVault};
use ticketwave_types::{
    Fingerprint, TicketId, TicketRecord, TicketRef, TicketStats, UserId, WaveId, WaveState,
};

use crate::{PoolError, Result};

/// Outcome of moving free tickets into cold storage.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ArchiveSummary {
    /// Tickets flagged archived-unused.
    pub archived: u64,
    /// Free tickets whose files had already vanished, flagged lost instead.
    pub lost: u64,
    /// Batch directory the files were moved into.
    pub batch: Option<PathBuf>,
}

#[derive(Clone)]
pub struct TicketStore {
    db: SharedConnection,
    vault: TicketVault,
    extension: String,
}

impl TicketStore {
    pub fn new(db: SharedConnection, vault: TicketVault, extension: impl Into<String>) -> Self {
        Self {
            db,
            vault,
            extension: extension.into().trim_start_matches('.').to_ascii_lowercase(),
        }
    }

    pub fn db(&self) -> &SharedConnection {
        &self.db
    }

    pub fn vault(&self) -> &TicketVault {
        &self.vault
    }

    /// Accepted ticket file extension, lowercase, without the dot.
    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub async fn wave_state(&self) -> Result<WaveState> {
        let conn = self.db.lock().await;
        Ok(waves::get_state(&conn)?)
    }

    pub async fn contains(&self, fp: &Fingerprint) -> Result<bool> {
        let conn = self.db.lock().await;
        Ok(tickets::fingerprint_exists(&conn, fp)?)
    }

    /// Persist one ticket file and its record.
    ///
    /// While a wave is active the new ticket is bound to it immediately;
    /// otherwise it stays unbound until the next confirmation.
    pub async fn ingest(
        &self,
        content: &[u8],
        original_name: &str,
        uploaded_by: UserId,
        uploaded_at: u64,
    ) -> Result<TicketRef> {
        let fp = fingerprint(content);
        let conn = self.db.lock().await;
        if tickets::fingerprint_exists(&conn, &fp)? {
            return Err(PoolError::Duplicate(fp));
        }

        let binding = waves::get_state(&conn)?.active().map(|(id, _)| id);
        let storage_name = TicketVault::new_storage_name(&self.extension);
        self.vault.write(&storage_name, content)?;

        let id = match tickets::insert(
            &conn,
            &storage_name,
            &fp,
            original_name,
            uploaded_by,
            uploaded_at,
            binding,
        ) {
            Ok(id) => id,
            Err(e) => {
                if let Err(cleanup) = self.vault.remove(&storage_name) {
                    tracing::warn!(storage_name, error = %cleanup, "failed to remove file after rejected insert");
                }
                return Err(match e {
                    DbError::Constraint(_) => PoolError::Duplicate(fp),
                    other => PoolError::Db(other),
                });
            }
        };

        tracing::debug!(ticket = %id, storage_name, original_name, wave = ?binding, "ticket stored");
        Ok(TicketRef {
            id,
            storage_name,
            fingerprint: fp,
        })
    }

    /// Lowest-id free ticket of `wave_id` whose file is present.
    ///
    /// Candidates with a missing file are flagged lost and skipped.
    pub async fn next_available(&self, wave_id: WaveId) -> Result<Option<TicketRef>> {
        loop {
            let conn = self.db.lock().await;
            let Some(candidate) = tickets::first_available(&conn, wave_id)? else {
                return Ok(None);
            };
            if self.vault.exists(&candidate.storage_name) {
                return Ok(Some(candidate.to_ref()));
            }
            tickets::mark_lost(&conn, candidate.id)?;
            tracing::warn!(ticket = %candidate.id, storage_name = %candidate.storage_name, "ticket file missing, marked lost");
        }
    }

    pub async fn get(&self, id: TicketId) -> Result<TicketRecord> {
        let conn = self.db.lock().await;
        Ok(tickets::get(&conn, id)?)
    }

    /// Claim `id` for `user` without a delivery timestamp.
    ///
    /// Re-claiming a ticket already held by the same user is a no-op success.
    pub async fn reserve(&self, id: TicketId, user: UserId) -> Result<()> {
        let conn = self.db.lock().await;
        if tickets::reserve(&conn, id, user)? {
            return Ok(());
        }
        Err(reserve_conflict(&conn, id)?)
    }

    /// Claim `id` for `user` and write the pending-delivery entry in the
    /// same commit. This is the only claim the delivery path makes.
    pub async fn reserve_held(&self, id: TicketId, user: UserId, at: u64) -> Result<()> {
        let conn = self.db.lock().await;
        if pending::reserve_and_hold(&conn, user, id, at)? {
            return Ok(());
        }
        Err(reserve_conflict(&conn, id)?)
    }

    /// An unconfirmed reservation `user` already holds in `wave_id`.
    pub async fn reserved_for(&self, user: UserId, wave_id: WaveId) -> Result<Option<TicketRef>> {
        let conn = self.db.lock().await;
        Ok(tickets::reserved_for(&conn, user, wave_id)?.map(|t| t.to_ref()))
    }

    /// Return every claimed-but-unconfirmed ticket to the pool.
    pub async fn release_unconfirmed(&self) -> Result<u64> {
        let conn = self.db.lock().await;
        let released = tickets::release_unconfirmed(&conn)? as u64;
        if released > 0 {
            tracing::warn!(released, "unconfirmed reservations returned to the pool");
        }
        Ok(released)
    }

    /// Stamp the delivery time and advance the recipient's last-received marker.
    pub async fn confirm_delivered(&self, id: TicketId, user: UserId, at: u64) -> Result<()> {
        let conn = self.db.lock().await;
        tickets::confirm_delivered(&conn, id, user, at)?;
        Ok(())
    }

    /// Return an unconfirmed ticket to the pool.
    ///
    /// Releasing a free ticket is a no-op; releasing a delivered one is refused.
    pub async fn release(&self, id: TicketId) -> Result<bool> {
        let conn = self.db.lock().await;
        if tickets::release(&conn, id)? {
            return Ok(true);
        }
        let record = tickets::get(&conn, id)?;
        if record.assigned_at.is_some() && record.assigned_to.is_some() {
            return Err(PoolError::AlreadyDelivered(id));
        }
        Ok(false)
    }

    pub async fn mark_lost(&self, id: TicketId) -> Result<bool> {
        let conn = self.db.lock().await;
        let changed = tickets::mark_lost(&conn, id)?;
        if changed {
            tracing::warn!(ticket = %id, "ticket marked lost");
        }
        Ok(changed)
    }

    pub async fn mark_archived_unused(&self, id: TicketId) -> Result<bool> {
        let conn = self.db.lock().await;
        Ok(tickets::mark_archived_unused(&conn, id)?)
    }

    pub fn file_exists(&self, ticket: &TicketRef) -> bool {
        self.vault.exists(&ticket.storage_name)
    }

    pub fn path_of(&self, ticket: &TicketRef) -> Result<PathBuf> {
        Ok(self.vault.path_of(&ticket.storage_name)?)
    }

    /// Flag every free ticket whose file has vanished as lost.
    pub async fn archive_missing(&self) -> Result<u64> {
        let conn = self.db.lock().await;
        let mut lost = 0;
        for ticket in tickets::list_free(&conn)? {
            if !self.vault.exists(&ticket.storage_name) && tickets::mark_lost(&conn, ticket.id)? {
                lost += 1;
            }
        }
        if lost > 0 {
            tracing::warn!(lost, "free tickets with missing files marked lost");
        }
        Ok(lost)
    }

    /// Move every free ticket into a fresh archive batch and flag it archived-unused.
    pub async fn archive_free(&self, at: u64) -> Result<ArchiveSummary> {
        let conn = self.db.lock().await;
        let free = tickets::list_free(&conn)?;
        let mut summary = ArchiveSummary::default();
        if free.is_empty() {
            return Ok(summary);
        }

        let mut batch = self.vault.begin_archive(at);
        for ticket in free {
            if batch.relocate(&ticket.storage_name)? {
                if tickets::mark_archived_unused(&conn, ticket.id)? {
                    summary.archived += 1;
                }
            } else if tickets::mark_lost(&conn, ticket.id)? {
                summary.lost += 1;
            }
        }
        summary.batch = batch.finish()?;

        tracing::info!(
            archived = summary.archived,
            lost = summary.lost,
            batch = ?summary.batch,
            "free tickets archived"
        );
        Ok(summary)
    }

    /// Delete unbound free tickets uploaded at or after `since`, records and files.
    pub async fn discard_unbound(&self, since: Option<u64>) -> Result<u64> {
        let conn = self.db.lock().await;
        let mut removed = 0;
        for ticket in tickets::list_unbound(&conn, since)? {
            tickets::delete(&conn, ticket.id)?;
            self.vault.remove(&ticket.storage_name)?;
            removed += 1;
        }
        if removed > 0 {
            tracing::info!(removed, "unbound tickets discarded");
        }
        Ok(removed)
    }

    pub async fn count_unbound(&self, since: Option<u64>) -> Result<u64> {
        let conn = self.db.lock().await;
        Ok(tickets::count_unbound(&conn, since)?)
    }

    /// Counters for `wave`, or across every ticket when `None`.
    pub async fn stats(&self, wave: Option<WaveId>) -> Result<TicketStats> {
        let conn = self.db.lock().await;
        Ok(tickets::stats(&conn, wave)?)
    }

    pub async fn list_all(&self) -> Result<Vec<TicketRecord>> {
        let conn = self.db.lock().await;
        Ok(tickets::list_all(&conn)?)
    }

    /// Time `user` last received a ticket, if ever.
    pub async fn last_received(&self, user: UserId) -> Result<Option<u64>> {
        let conn = self.db.lock().await;
        Ok(users::get(&conn, user)?.and_then(|r| r.last_ticket_at))
    }
}

/// Why `id` could not be claimed.
fn reserve_conflict(conn: &Connection, id: TicketId) -> Result<PoolError> {
    let record = tickets::get(conn, id)?;
    Ok(if record.lost || record.archived_unused {
        PoolError::Unavailable(id)
    } else if record.assigned_at.is_some() {
        PoolError::AlreadyDelivered(id)
    } else {
        PoolError::AlreadyAssigned(id)
    })
}

#[cfg(test)]
mod tests {
    use ticketwave_types::{TicketStatus, WaveStatus};

    use super::*;
    use crate::testutil::{fixture, ADMIN};

    async fn activate(db: &SharedConnection, wave_start: u64) -> WaveId {
        let conn = db.lock().await;
        let id = waves::insert(&conn, wave_start, ADMIN, wave_start).expect("wave");
        waves::set_state(
            &conn,
            &WaveState {
                status: WaveStatus::Active,
                prepared_at: Some(0),
                wave_start: Some(wave_start),
                wave_id: Some(id),
            },
        )
        .expect("state");
        id
    }

    #[tokio::test]
    async fn test_ingest_writes_file_and_record() {
        let fx = fixture(0).await;
        let ticket = fx.store.ingest(b"seat-1", "seat-1.pdf", ADMIN, 10).await.expect("ingest");

        assert!(fx.store.file_exists(&ticket));
        assert!(ticket.storage_name.ends_with(".pdf"));
        assert_ne!(ticket.storage_name, "seat-1.pdf");

        let record = fx.store.get(ticket.id).await.expect("get");
        assert_eq!(record.original_name, "seat-1.pdf");
        assert_eq!(record.wave_id, None, "no active wave, stays unbound");
        assert_eq!(record.status(), TicketStatus::Available);
    }

    #[tokio::test]
    async fn test_ingest_duplicate_leaves_no_file() {
        let fx = fixture(0).await;
        fx.store.ingest(b"same", "a.pdf", ADMIN, 10).await.expect("first");
        let err = fx.store.ingest(b"same", "b.pdf", ADMIN, 11).await;
        assert!(matches!(err, Err(PoolError::Duplicate(_))));

        let files = std::fs::read_dir(fx.store.vault().live_dir()).expect("dir").count();
        assert_eq!(files, 1);
        assert_eq!(fx.store.list_all().await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn test_ingest_binds_to_active_wave() {
        let fx = fixture(0).await;
        let wave = activate(&fx.db, 100).await;
        let ticket = fx.store.ingest(b"late", "late.pdf", ADMIN, 200).await.expect("ingest");
        assert_eq!(fx.store.get(ticket.id).await.expect("get").wave_id, Some(wave));
    }

    #[tokio::test]
    async fn test_next_available_skips_missing_files() {
        let fx = fixture(0).await;
        let wave = activate(&fx.db, 100).await;
        let first = fx.store.ingest(b"one", "1.pdf", ADMIN, 200).await.expect("one");
        let second = fx.store.ingest(b"two", "2.pdf", ADMIN, 201).await.expect("two");

        std::fs::remove_file(fx.store.path_of(&first).expect("path")).expect("rm");

        let next = fx.store.next_available(wave).await.expect("next");
        assert_eq!(next.map(|t| t.id), Some(second.id));
        assert!(fx.store.get(first.id).await.expect("get").lost);
    }

    #[tokio::test]
    async fn test_next_available_empty_pool() {
        let fx = fixture(0).await;
        let wave = activate(&fx.db, 100).await;
        assert!(fx.store.next_available(wave).await.expect("next").is_none());
    }

    #[tokio::test]
    async fn test_reserve_conflicts() {
        let fx = fixture(0).await;
        let ticket = fx.store.ingest(b"t", "t.pdf", ADMIN, 1).await.expect("ingest");

        fx.store.reserve(ticket.id, UserId(100)).await.expect("reserve");
        fx.store.reserve(ticket.id, UserId(100)).await.expect("same user re-claims");
        assert!(matches!(
            fx.store.reserve(ticket.id, UserId(101)).await,
            Err(PoolError::AlreadyAssigned(_))
        ));

        fx.store.confirm_delivered(ticket.id, UserId(100), 50).await.expect("confirm");
        assert!(matches!(
            fx.store.reserve(ticket.id, UserId(100)).await,
            Err(PoolError::AlreadyDelivered(_))
        ));
        assert!(matches!(
            fx.store.release(ticket.id).await,
            Err(PoolError::AlreadyDelivered(_))
        ));
        assert_eq!(fx.store.last_received(UserId(100)).await.expect("last"), Some(50));
    }

    #[tokio::test]
    async fn test_reserve_held_records_ledger_entry() {
        let fx = fixture(0).await;
        let wave = activate(&fx.db, 100).await;
        let ticket = fx.store.ingest(b"t", "t.pdf", ADMIN, 200).await.expect("ingest");

        fx.store.reserve_held(ticket.id, UserId(100), 300).await.expect("reserve");
        let entry = fx.ledger.get(UserId(100)).await.expect("ledger").expect("entry");
        assert_eq!(entry.ticket_id, ticket.id);
        assert_eq!(
            fx.store.reserved_for(UserId(100), wave).await.expect("held").map(|t| t.id),
            Some(ticket.id)
        );

        assert!(matches!(
            fx.store.reserve_held(ticket.id, UserId(101), 301).await,
            Err(PoolError::AlreadyAssigned(_))
        ));
        assert!(fx.ledger.get(UserId(101)).await.expect("ledger").is_none());
    }

    #[tokio::test]
    async fn test_release_unconfirmed_keeps_deliveries() {
        let fx = fixture(0).await;
        let held = fx.store.ingest(b"held", "held.pdf", ADMIN, 1).await.expect("held");
        let sent = fx.store.ingest(b"sent", "sent.pdf", ADMIN, 2).await.expect("sent");
        fx.store.reserve(held.id, UserId(100)).await.expect("reserve");
        fx.store.reserve(sent.id, UserId(101)).await.expect("reserve");
        fx.store.confirm_delivered(sent.id, UserId(101), 10).await.expect("confirm");

        assert_eq!(fx.store.release_unconfirmed().await.expect("release"), 1);
        assert_eq!(
            fx.store.get(held.id).await.expect("get").status(),
            TicketStatus::Available
        );
        assert_eq!(fx.store.get(sent.id).await.expect("get").status(), TicketStatus::Sent);
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let fx = fixture(0).await;
        let ticket = fx.store.ingest(b"t", "t.pdf", ADMIN, 1).await.expect("ingest");
        fx.store.reserve(ticket.id, UserId(100)).await.expect("reserve");

        assert!(fx.store.release(ticket.id).await.expect("release"));
        assert!(!fx.store.release(ticket.id).await.expect("second release"));
        assert_eq!(
            fx.store.get(ticket.id).await.expect("get").status(),
            TicketStatus::Available
        );
    }

    #[tokio::test]
    async fn test_lost_ticket_cannot_be_reserved() {
        let fx = fixture(0).await;
        let ticket = fx.store.ingest(b"t", "t.pdf", ADMIN, 1).await.expect("ingest");
        assert!(fx.store.mark_lost(ticket.id).await.expect("lost"));
        assert!(matches!(
            fx.store.reserve(ticket.id, UserId(100)).await,
            Err(PoolError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_archived_ticket_leaves_the_pool() {
        let fx = fixture(0).await;
        let wave = activate(&fx.db, 100).await;
        let ticket = fx.store.ingest(b"old", "old.pdf", ADMIN, 200).await.expect("ingest");

        assert!(fx.store.mark_archived_unused(ticket.id).await.expect("archive"));
        assert_eq!(
            fx.store.get(ticket.id).await.expect("get").status(),
            TicketStatus::Archived
        );
        assert!(fx.store.next_available(wave).await.expect("next").is_none());
        assert!(matches!(
            fx.store.reserve(ticket.id, UserId(100)).await,
            Err(PoolError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_archive_free_moves_files_and_flags() {
        let fx = fixture(0).await;
        let kept = fx.store.ingest(b"held", "held.pdf", ADMIN, 1).await.expect("held");
        let spare = fx.store.ingest(b"spare", "spare.pdf", ADMIN, 2).await.expect("spare");
        let gone = fx.store.ingest(b"gone", "gone.pdf", ADMIN, 3).await.expect("gone");
        fx.store.reserve(kept.id, UserId(100)).await.expect("reserve");
        std::fs::remove_file(fx.store.path_of(&gone).expect("path")).expect("rm");

        let summary = fx.store.archive_free(1_000).await.expect("archive");
        assert_eq!(summary.archived, 1);
        assert_eq!(summary.lost, 1);
        let batch = summary.batch.expect("batch dir");
        assert!(batch.join(&spare.storage_name).exists());

        assert!(fx.store.file_exists(&kept), "reserved ticket stays live");
        assert_eq!(
            fx.store.get(spare.id).await.expect("get").status(),
            TicketStatus::Archived
        );
        assert_eq!(fx.store.get(gone.id).await.expect("get").status(), TicketStatus::Lost);
    }

    #[tokio::test]
    async fn test_archive_free_with_nothing_free() {
        let fx = fixture(0).await;
        let summary = fx.store.archive_free(1_000).await.expect("archive");
        assert_eq!(summary, ArchiveSummary::default());
        assert!(fx.store.vault().archive_batches().expect("batches").is_empty());
    }

    #[tokio::test]
    async fn test_archive_missing_only_counts_free() {
        let fx = fixture(0).await;
        let a = fx.store.ingest(b"a", "a.pdf", ADMIN, 1).await.expect("a");
        let b = fx.store.ingest(b"b", "b.pdf", ADMIN, 2).await.expect("b");
        fx.store.reserve(b.id, UserId(100)).await.expect("reserve");
        std::fs::remove_file(fx.store.path_of(&a).expect("path")).expect("rm");
        std::fs::remove_file(fx.store.path_of(&b).expect("path")).expect("rm");

        assert_eq!(fx.store.archive_missing().await.expect("scan"), 1);
        assert!(!fx.store.get(b.id).await.expect("get").lost);
    }

    #[tokio::test]
    async fn test_discard_unbound_since() {
        let fx = fixture(0).await;
        let old = fx.store.ingest(b"old", "old.pdf", ADMIN, 10).await.expect("old");
        let new = fx.store.ingest(b"new", "new.pdf", ADMIN, 20).await.expect("new");

        assert_eq!(fx.store.discard_unbound(Some(15)).await.expect("discard"), 1);
        assert!(fx.store.file_exists(&old));
        assert!(!fx.store.file_exists(&new));
        assert!(fx.store.get(new.id).await.is_err());
        assert_eq!(fx.store.count_unbound(None).await.expect("count"), 1);
    }
}
