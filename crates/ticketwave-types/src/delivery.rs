//! Pending-delivery ledger entries.

use serde::{Deserialize, Serialize};

use crate::{TicketId, UserId};

/// Why a ledger entry is still outstanding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingReason {
    /// Reserved; a delivery attempt is in flight or was interrupted.
    Reserved,
    /// All attempts failed on recoverable errors; retry later.
    RetryExhausted,
    /// The backing file vanished; needs operator follow-up.
    FileMissing,
}

impl PendingReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            PendingReason::Reserved => "reserved",
            PendingReason::RetryExhausted => "retry_exhausted",
            PendingReason::FileMissing => "file_missing",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "reserved" => Some(PendingReason::Reserved),
            "retry_exhausted" => Some(PendingReason::RetryExhausted),
            "file_missing" => Some(PendingReason::FileMissing),
            _ => None,
        }
    }
}

/// One outstanding reservation keyed by recipient.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingDelivery {
    pub user_id: UserId,
    pub ticket_id: TicketId,
    pub reason: PendingReason,
    /// Transmission attempts made across runs.
    pub attempts: u32,
    pub updated_at: u64,
}
