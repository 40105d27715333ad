//! Ticket records and lifecycle status.

use serde::{Deserialize, Serialize};

use crate::{Fingerprint, TicketId, UserId, WaveId};

/// Handle to a stored ticket, as returned by the ticket store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketRef {
    pub id: TicketId,
    /// Opaque file name inside the live tickets directory.
    pub storage_name: String,
    pub fingerprint: Fingerprint,
}

/// A full ticket row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketRecord {
    pub id: TicketId,
    pub storage_name: String,
    pub fingerprint: Fingerprint,
    /// File name as it appeared in the uploaded bundle.
    pub original_name: String,
    pub uploaded_by: UserId,
    pub uploaded_at: u64,
    /// Recipient holding this ticket. Set on reservation.
    pub assigned_to: Option<UserId>,
    /// Set only once delivery is confirmed.
    pub assigned_at: Option<u64>,
    pub archived_unused: bool,
    pub lost: bool,
    pub wave_id: Option<WaveId>,
}

impl TicketRecord {
    pub fn to_ref(&self) -> TicketRef {
        TicketRef {
            id: self.id,
            storage_name: self.storage_name.clone(),
            fingerprint: self.fingerprint,
        }
    }

    /// Derived status. Lost wins over everything, then assignment, then archival.
    pub fn status(&self) -> TicketStatus {
        if self.lost {
            TicketStatus::Lost
        } else if self.assigned_to.is_some() {
            if self.assigned_at.is_some() {
                TicketStatus::Sent
            } else {
                TicketStatus::Reserved
            }
        } else if self.archived_unused {
            TicketStatus::Archived
        } else {
            TicketStatus::Available
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Available,
    Reserved,
    Sent,
    Archived,
    Lost,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Available => "available",
            TicketStatus::Reserved => "reserved",
            TicketStatus::Sent => "sent",
            TicketStatus::Archived => "archived",
            TicketStatus::Lost => "lost",
        }
    }
}

/// Ticket counters for display.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketStats {
    /// Unassigned, not archived, not lost.
    pub free: u64,
    /// Claimed by a recipient but not yet confirmed.
    pub reserved: u64,
    /// Confirmed delivered.
    pub issued: u64,
    pub lost: u64,
    pub archived: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> TicketRecord {
        TicketRecord {
            id: TicketId(1),
            storage_name: "a.pdf".to_string(),
            fingerprint: Fingerprint([1u8; 32]),
            original_name: "seat-1.pdf".to_string(),
            uploaded_by: UserId(10),
            uploaded_at: 1_000,
            assigned_to: None,
            assigned_at: None,
            archived_unused: false,
            lost: false,
            wave_id: None,
        }
    }

    #[test]
    fn test_status_precedence() {
        let mut t = record();
        assert_eq!(t.status(), TicketStatus::Available);

        t.archived_unused = true;
        assert_eq!(t.status(), TicketStatus::Archived);

        t.archived_unused = false;
        t.assigned_to = Some(UserId(5));
        assert_eq!(t.status(), TicketStatus::Reserved);

        t.assigned_at = Some(2_000);
        assert_eq!(t.status(), TicketStatus::Sent);

        t.lost = true;
        assert_eq!(t.status(), TicketStatus::Lost);
    }
}
