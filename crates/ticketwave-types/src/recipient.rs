//! Recipients (registered users).

use serde::{Deserialize, Serialize};

use crate::UserId;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub user_id: UserId,
    /// Display handle without the leading `@`.
    pub username: Option<String>,
    pub last_ticket_at: Option<u64>,
}

impl Recipient {
    /// Whether this recipient already received a ticket in a wave started at `wave_start`.
    pub fn received_since(&self, wave_start: u64) -> bool {
        self.last_ticket_at.is_some_and(|at| at >= wave_start)
    }
}
