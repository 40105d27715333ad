//! # ticketwave-delivery
//!
//! Bulk ticket delivery over an external messaging channel.
//!
//! ## Modules
//!
//! - [`transport`]: the channel interface and its error classification.
//! - [`retry`]: bounded retry with exponential backoff and rate-limit waits.
//! - [`engine`]: the bulk pass, the automatic retry pass, `force_give` and
//!   operator broadcasts.
//! - [`notice`]: operator notifications raised during delivery and registration.

pub mod engine;
pub mod notice;
pub mod retry;
#[cfg(any(test, feature = "test-support"))]
pub mod scripted;
pub mod transport;

pub use engine::{BroadcastReport, DeliveryEngine, DeliveryReport, DeliverySettings, RecipientOutcome};
pub use notice::Notice;
pub use retry::{attempt_with_policy, AttemptOutcome, RetryPolicy};
pub use transport::{Transport, TransportError};

use ticketwave_pool::PoolError;
use ticketwave_types::{UserId, WaveStatus};

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("no active wave (status {0})")]
    NotActive(WaveStatus),

    #[error("user {0} already received a ticket in this wave")]
    AlreadyReceived(UserId),

    #[error("user {0} is not registered")]
    NotRegistered(UserId),

    #[error("no tickets left in the pool")]
    PoolExhausted,

    #[error(transparent)]
    Pool(#[from] PoolError),
}

pub type Result<T> = std::result::Result<T, DeliveryError>;
