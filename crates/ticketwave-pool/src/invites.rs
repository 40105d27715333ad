//! Invite-gated registration.
//!
//! A user joins by presenting a one-time `inv_` code. The checks run in a
//! fixed order and the first failing one decides the outcome; only a clean
//! redemption registers the user, and it does so in the same commit that
//! marks the code used.

use rand::Rng;
use serde::Serialize;
use ticketwave_db::queries::{invites, users};
use ticketwave_db::SharedConnection;
use ticketwave_types::{looks_like_invite, UserId, INVITE_PREFIX};

use crate::{PoolError, Result};

/// Largest batch a single `generate` call may create.
pub const MAX_BATCH: u32 = 5000;

/// Outcome of presenting an invite code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Redemption {
    Registered,
    /// No public handle; the code is left untouched.
    MissingHandle,
    NotAnInvite,
    /// The user was already registered. `burned` is true if the code was
    /// valid and has now been invalidated.
    AlreadyRegistered { burned: bool },
    UnknownCode,
    AlreadyUsed,
}

impl Redemption {
    pub fn is_registered(&self) -> bool {
        matches!(self, Redemption::Registered)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InviteStats {
    pub total: u64,
    pub unused: u64,
}

#[derive(Clone)]
pub struct Invites {
    db: SharedConnection,
}

impl Invites {
    pub fn new(db: SharedConnection) -> Self {
        Self { db }
    }

    /// Create `count` fresh codes, `inv_` followed by eight hex digits.
    pub async fn generate(&self, count: u32, at: u64) -> Result<Vec<String>> {
        if !(1..=MAX_BATCH).contains(&count) {
            return Err(PoolError::Validation(format!(
                "invite count must be between 1 and {MAX_BATCH}, got {count}"
            )));
        }

        let mut created = Vec::with_capacity(count as usize);
        let conn = self.db.lock().await;
        while created.len() < count as usize {
            let batch: Vec<String> = (created.len()..count as usize).map(|_| fresh_code()).collect();
            created.extend(invites::insert_batch(&conn, &batch, at)?);
        }
        tracing::info!(count, "invite codes generated");
        Ok(created)
    }

    /// Register `user` with `code`, or say why not.
    pub async fn redeem(
        &self,
        user: UserId,
        username: Option<&str>,
        code: &str,
        at: u64,
    ) -> Result<Redemption> {
        let code = code.trim();
        let username = username
            .map(|u| u.trim().trim_start_matches('@'))
            .filter(|u| !u.is_empty());
        let Some(username) = username else {
            tracing::warn!(user = %user, "invite presented without a username");
            return Ok(Redemption::MissingHandle);
        };
        if !looks_like_invite(code) {
            return Ok(Redemption::NotAnInvite);
        }

        let conn = self.db.lock().await;
        if users::get(&conn, user)?.is_some() {
            let burned = invites::burn(&conn, code, at)?;
            tracing::warn!(user = %user, code, burned, "registered user presented an invite");
            return Ok(Redemption::AlreadyRegistered { burned });
        }
        let Some(invite) = invites::get(&conn, code)? else {
            return Ok(Redemption::UnknownCode);
        };
        if invite.used || !invites::redeem_and_register(&conn, code, user, username, at)? {
            return Ok(Redemption::AlreadyUsed);
        }
        tracing::info!(user = %user, username, code, "invite redeemed");
        Ok(Redemption::Registered)
    }

    pub async fn stats(&self) -> Result<InviteStats> {
        let conn = self.db.lock().await;
        let (total, unused) = invites::counts(&conn)?;
        Ok(InviteStats { total, unused })
    }
}

fn fresh_code() -> String {
    let mut bytes = [0u8; 4];
    rand::thread_rng().fill(&mut bytes);
    format!("{INVITE_PREFIX}{}", hex::encode(bytes))
}
