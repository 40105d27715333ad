//! # ticketwave-storage
//!
//! Local file storage for ticket documents.
//!
//! Each accepted ticket is written once into the live tickets directory
//! under a freshly generated opaque name. Files are never rewritten. A
//! ticket superseded by a new wave is relocated into a timestamped batch
//! directory under the archive root; only the newest batches are retained.
//!
//! ## Modules
//!
//! - [`vault`]: live directory, existence checks, cold-storage batches.
//! - [`fingerprint`]: content fingerprinting of ticket bytes.

pub mod fingerprint;
pub mod vault;

pub use fingerprint::fingerprint;
pub use vault::{ArchiveBatch, TicketVault};

/// Error types for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// I/O error during storage operations.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Storage name would escape the vault directory.
    #[error("invalid storage name: {0}")]
    InvalidName(String),

    /// File is not present in the live directory.
    #[error("ticket file not found: {0}")]
    NotFound(String),
}

impl StorageError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Convenience result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
