//! Read-only listings for the reporting layer. Nothing here formats output.

use std::collections::HashMap;

use serde::Serialize;
use ticketwave_db::queries::{pending, tickets, users};
use ticketwave_db::SharedConnection;
use ticketwave_types::{PendingReason, TicketId, TicketRecord, TicketStatus, UserId};

use crate::Result;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TicketListing {
    #[serde(flatten)]
    pub ticket: TicketRecord,
    pub status: TicketStatus,
    /// Handle of the recipient holding the ticket, if any.
    pub assigned_username: Option<String>,
}

/// A ledger entry joined with the recipient handle and the ticket's state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FailedDelivery {
    pub user_id: UserId,
    pub username: Option<String>,
    pub ticket_id: TicketId,
    pub original_name: String,
    pub ticket_status: TicketStatus,
    pub reason: PendingReason,
    pub attempts: u32,
    pub updated_at: u64,
}

/// Every ticket with its derived status, oldest first.
pub async fn list_tickets_with_status(db: &SharedConnection) -> Result<Vec<TicketListing>> {
    let conn = db.lock().await;
    let handles: HashMap<UserId, Option<String>> = users::list(&conn)?
        .into_iter()
        .map(|r| (r.user_id, r.username))
        .collect();
    Ok(tickets::list_all(&conn)?
        .into_iter()
        .map(|ticket| TicketListing {
            status: ticket.status(),
            assigned_username: ticket
                .assigned_to
                .and_then(|id| handles.get(&id).cloned().flatten()),
            ticket,
        })
        .collect())
}

/// Outstanding deliveries, oldest first.
pub async fn list_failed_deliveries(db: &SharedConnection) -> Result<Vec<FailedDelivery>> {
    let conn = db.lock().await;
    let mut out = Vec::new();
    for entry in pending::list(&conn)? {
        let ticket = tickets::get(&conn, entry.ticket_id)?;
        let username = users::get(&conn, entry.user_id)?.and_then(|r| r.username);
        out.push(FailedDelivery {
            user_id: entry.user_id,
            username,
            ticket_id: entry.ticket_id,
            original_name: ticket.original_name.clone(),
            ticket_status: ticket.status(),
            reason: entry.reason,
            attempts: entry.attempts,
            updated_at: entry.updated_at,
        });
    }
    Ok(out)
}
