//! Invite codes gating recipient registration.

use serde::{Deserialize, Serialize};

use crate::UserId;

/// Every code starts with this prefix; anything else is not an invite.
pub const INVITE_PREFIX: &str = "inv_";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InviteCode {
    pub code: String,
    pub created_at: u64,
    /// Set once the code is redeemed or burned.
    pub used: bool,
    pub used_at: Option<u64>,
    /// The user who redeemed it. `None` for a burned code.
    pub redeemed_by: Option<UserId>,
    pub redeemed_username: Option<String>,
}

/// Whether `code` has the shape of an invite code.
pub fn looks_like_invite(code: &str) -> bool {
    code.strip_prefix(INVITE_PREFIX)
        .is_some_and(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_alphanumeric()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invite_shape() {
        assert!(looks_like_invite("inv_0a1b2c3d"));
        assert!(!looks_like_invite("inv_"));
        assert!(!looks_like_invite("0a1b2c3d"));
        assert!(!looks_like_invite("inv_ab cd"));
    }
}
