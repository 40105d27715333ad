//! # ticketwave-pool
//!
//! The ticket pool and its lifecycle.
//!
//! A ticket moves uploaded → pooled → reserved → sent, or sideways into
//! lost / archived. A wave moves idle → preparing → active → idle. This
//! crate owns both state machines and every durable record they touch.
//!
//! ## Modules
//!
//! - [`store`]: ticket records plus their backing files.
//! - [`wave`]: the idle / preparing / active wave state machine.
//! - [`ingest`]: bundle ingestion with content de-duplication.
//! - [`ledger`]: outstanding (reserved, unconfirmed) deliveries.
//! - [`directory`]: read-only view of recipients and operators.
//! - [`invites`]: one-time invite codes that gate registration.
//! - [`report`]: read-only listings for the reporting layer.

pub mod directory;
pub mod ingest;
pub mod invites;
pub mod ledger;
pub mod report;
pub mod store;
pub mod wave;

pub use directory::{Directory, SqliteDirectory};
pub use ingest::{
    AddedTicket, Bundle, BundleEntry, IngestMode, IngestOutcome, IngestReport, Ingestor,
};
pub use invites::{InviteStats, Invites, Redemption};
pub use ledger::Ledger;
pub use report::{FailedDelivery, TicketListing};
pub use store::{ArchiveSummary, TicketStore};
pub use wave::{Confirmation, Preparation, StatusReport, WaveEnd, WaveMachine};

use ticketwave_db::DbError;
use ticketwave_storage::StorageError;
use ticketwave_types::{Fingerprint, TicketId, WaveStatus};

/// Error types for pool operations.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// Bad operator input. No state was changed.
    #[error("invalid input: {0}")]
    Validation(String),

    /// The same content is already stored.
    #[error("duplicate ticket content {0}")]
    Duplicate(Fingerprint),

    #[error("wave is {0}; a new wave can only start from idle")]
    WaveNotIdle(WaveStatus),

    #[error("wave is {0}; expected a wave in preparation")]
    WaveNotPreparing(WaveStatus),

    #[error("wave is {0}; no active wave")]
    WaveNotActive(WaveStatus),

    #[error("wave is idle; nothing to end")]
    WaveNotRunning,

    /// Unbound free tickets left behind by an abandoned preparation.
    #[error("{0} unbound tickets from an abandoned preparation must be resolved first")]
    OrphanedTickets(u64),

    #[error("not enough tickets: {available} available for {recipients} recipients")]
    InsufficientTickets { available: u64, recipients: u64 },

    #[error("{0} tickets were already uploaded in this preparation; use add mode")]
    ReplaceAfterUpload(u64),

    #[error("{mode} upload is not allowed while the wave is {status}")]
    UploadNotAllowed {
        mode: &'static str,
        status: WaveStatus,
    },

    #[error("ticket {0} is held by another recipient")]
    AlreadyAssigned(TicketId),

    #[error("ticket {0} was already delivered")]
    AlreadyDelivered(TicketId),

    #[error("ticket {0} is lost or archived")]
    Unavailable(TicketId),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl PoolError {
    /// Conflicts are reported to the operator and leave state untouched.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            PoolError::Duplicate(_)
                | PoolError::WaveNotIdle(_)
                | PoolError::WaveNotPreparing(_)
                | PoolError::WaveNotActive(_)
                | PoolError::WaveNotRunning
                | PoolError::OrphanedTickets(_)
                | PoolError::InsufficientTickets { .. }
                | PoolError::ReplaceAfterUpload(_)
                | PoolError::UploadNotAllowed { .. }
                | PoolError::AlreadyAssigned(_)
                | PoolError::AlreadyDelivered(_)
                | PoolError::Unavailable(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, PoolError::Db(DbError::NotFound(_)))
    }
}

/// Convenience result type for pool operations.
pub type Result<T> = std::result::Result<T, PoolError>;
