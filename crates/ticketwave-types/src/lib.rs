//! # ticketwave-types
//!
//! Shared domain types used across the ticketwave workspace: ticket records
//! and their lifecycle flags, the wave state machine's persisted state,
//! recipients, invite codes, and pending-delivery ledger entries.
//!
//! All timestamps are Unix epoch milliseconds (`u64`).

pub mod delivery;
pub mod ids;
pub mod invite;
pub mod recipient;
pub mod ticket;
pub mod wave;

pub use delivery::{PendingDelivery, PendingReason};
pub use ids::{Fingerprint, ParseIdError, TicketId, UserId, WaveId};
pub use invite::{looks_like_invite, InviteCode, INVITE_PREFIX};
pub use recipient::Recipient;
pub use ticket::{TicketRecord, TicketRef, TicketStats, TicketStatus};
pub use wave::{Wave, WaveState, WaveStatus};

/// File extension accepted for tickets unless configured otherwise.
pub const DEFAULT_TICKET_EXTENSION: &str = "pdf";

/// Current wall-clock time as Unix epoch milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
