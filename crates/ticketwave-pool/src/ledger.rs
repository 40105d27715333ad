//! Pending-delivery ledger.
//!
//! One entry per recipient for whom a ticket was reserved but delivery was
//! never confirmed. An entry exists for every recipient between reservation
//! and confirmation, so a crash in between leaves a trail the next run
//! resumes from instead of reserving a second ticket.

use ticketwave_db::queries::pending;
use ticketwave_db::SharedConnection;
use ticketwave_types::{PendingDelivery, PendingReason, TicketId, UserId};

use crate::Result;

#[derive(Clone)]
pub struct Ledger {
    db: SharedConnection,
}

impl Ledger {
    pub fn new(db: SharedConnection) -> Self {
        Self { db }
    }

    pub async fn get(&self, user: UserId) -> Result<Option<PendingDelivery>> {
        let conn = self.db.lock().await;
        Ok(pending::get(&conn, user)?)
    }

    /// Record that `ticket` is held for `user`. Overwrites any previous entry.
    pub async fn hold(&self, user: UserId, ticket: TicketId, at: u64) -> Result<()> {
        let conn = self.db.lock().await;
        pending::upsert(&conn, user, ticket, PendingReason::Reserved, at)?;
        Ok(())
    }

    /// Record a failed run against an existing entry.
    pub async fn record_failure(
        &self,
        user: UserId,
        reason: PendingReason,
        attempts: u32,
        at: u64,
    ) -> Result<bool> {
        let conn = self.db.lock().await;
        Ok(pending::record_outcome(&conn, user, reason, attempts, at)?)
    }

    pub async fn remove(&self, user: UserId) -> Result<bool> {
        let conn = self.db.lock().await;
        Ok(pending::remove(&conn, user)?)
    }

    /// Drop every entry. Used when a new wave begins.
    pub async fn clear(&self) -> Result<usize> {
        let conn = self.db.lock().await;
        let cleared = pending::clear(&conn)?;
        if cleared > 0 {
            tracing::info!(cleared, "pending deliveries cleared");
        }
        Ok(cleared)
    }

    /// All entries, oldest first.
    pub async fn entries(&self) -> Result<Vec<PendingDelivery>> {
        let conn = self.db.lock().await;
        Ok(pending::list(&conn)?)
    }

    pub async fn len(&self) -> Result<u64> {
        let conn = self.db.lock().await;
        Ok(pending::count(&conn)?)
    }
}
