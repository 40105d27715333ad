//! Operator notifications raised while delivering.

use std::fmt;

use serde::Serialize;
use ticketwave_types::{TicketId, UserId};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notice {
    /// The channel refused delivery to this recipient; the ticket was released.
    RecipientBlocked {
        user_id: UserId,
        ticket_id: TicketId,
        error: String,
    },
    /// The ticket file vanished under a reservation and was marked lost.
    FileMissing { user_id: UserId, ticket_id: TicketId },
    /// The pool ran dry with recipients still waiting.
    PoolExhausted { remaining: u64 },
    /// An operator handed out a ticket by hand.
    ManualIssue {
        operator: UserId,
        user_id: UserId,
        ticket_id: TicketId,
    },
    /// Someone without a public handle tried an invite; the code is still valid.
    InviteWithoutHandle { user_id: UserId, code: String },
    /// A registered user presented another invite; the code was burned.
    SecondInvite { user_id: UserId, code: String },
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::RecipientBlocked {
                user_id,
                ticket_id,
                error,
            } => write!(
                f,
                "Could not deliver ticket {ticket_id} to user {user_id}: {error}. The ticket was returned to the pool."
            ),
            Notice::FileMissing { user_id, ticket_id } => write!(
                f,
                "Ticket {ticket_id} reserved for user {user_id} has no file on disk and was marked lost."
            ),
            Notice::PoolExhausted { remaining } => write!(
                f,
                "Ticket pool exhausted; {remaining} recipients are still waiting. Upload more tickets and send again."
            ),
            Notice::ManualIssue {
                operator,
                user_id,
                ticket_id,
            } => write!(
                f,
                "Operator {operator} manually issued ticket {ticket_id} to user {user_id}."
            ),
            Notice::InviteWithoutHandle { user_id, code } => write!(
                f,
                "User {user_id} tried invite {code} without a username. The code was not used."
            ),
            Notice::SecondInvite { user_id, code } => write!(
                f,
                "Already registered user {user_id} presented invite {code}. The code was invalidated."
            ),
        }
    }
}
