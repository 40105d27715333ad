//! Messaging channel interface.

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use ticketwave_types::UserId;

/// Failure reported by the channel, classified for the retry policy.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The channel asked us to slow down for `retry_after`.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// The recipient blocked us or cannot be reached. Not retried.
    #[error("recipient rejected delivery: {0}")]
    Rejected(String),

    /// Timeouts, network errors and anything else worth another try.
    #[error("transient transport error: {0}")]
    Transient(String),
}

impl TransportError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, TransportError::Rejected(_))
    }
}

/// Outbound messaging channel.
///
/// Implementations perform one transmission per call; retrying and pacing
/// are the caller's concern.
pub trait Transport: Send + Sync {
    /// Send a document file to `recipient` with a caption.
    fn send_document(
        &self,
        recipient: UserId,
        document: &Path,
        caption: &str,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Send a plain text message, used for operator notifications.
    fn send_message(
        &self,
        recipient: UserId,
        text: &str,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}
