//! Recipient and operator directory.
//!
//! Wave confirmation and bulk delivery only need a read-only view of who
//! the recipients and operators are; [`Directory`] is that seam. The
//! SQLite-backed implementation also carries the registration writes the
//! operator surface uses.

use std::collections::HashSet;
use std::future::Future;

use ticketwave_db::queries::{admins, users};
use ticketwave_db::SharedConnection;
use ticketwave_types::{Recipient, UserId};

use crate::{PoolError, Result};

/// Read-only view of recipients and operators.
pub trait Directory: Send + Sync {
    fn is_admin(&self, user: UserId) -> impl Future<Output = Result<bool>> + Send;

    fn admin_ids(&self) -> impl Future<Output = Result<Vec<UserId>>> + Send;

    /// Every known user id, in registration order. Includes operators.
    fn all_recipient_ids(&self) -> impl Future<Output = Result<Vec<UserId>>> + Send;

    fn recipient(&self, user: UserId) -> impl Future<Output = Result<Option<Recipient>>> + Send;

    /// Recipients minus operators, in registration order.
    fn eligible_recipients(&self) -> impl Future<Output = Result<Vec<UserId>>> + Send {
        async move {
            let admins: HashSet<UserId> = self.admin_ids().await?.into_iter().collect();
            Ok(self
                .all_recipient_ids()
                .await?
                .into_iter()
                .filter(|id| !admins.contains(id))
                .collect())
        }
    }
}

#[derive(Clone)]
pub struct SqliteDirectory {
    db: SharedConnection,
}

impl SqliteDirectory {
    pub fn new(db: SharedConnection) -> Self {
        Self { db }
    }

    /// Register a recipient or refresh their handle.
    pub async fn register_user(&self, user: UserId, username: Option<&str>, at: u64) -> Result<()> {
        let username = username.map(|u| u.trim().trim_start_matches('@')).filter(|u| !u.is_empty());
        let conn = self.db.lock().await;
        users::register(&conn, user, username, at)?;
        tracing::debug!(user = %user, ?username, "user registered");
        Ok(())
    }

    /// Resolve a numeric id or an `@handle` to a registered user.
    pub async fn resolve_user(&self, reference: &str) -> Result<Option<UserId>> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(PoolError::Validation("empty user reference".to_string()));
        }
        let conn = self.db.lock().await;
        if let Ok(id) = reference.parse::<UserId>() {
            return Ok(users::get(&conn, id)?.map(|r| r.user_id));
        }
        Ok(users::find_by_username(&conn, reference)?)
    }

    pub async fn grant_admin(&self, user: UserId, at: u64) -> Result<()> {
        let conn = self.db.lock().await;
        admins::grant(&conn, user, at)?;
        tracing::info!(user = %user, "operator granted");
        Ok(())
    }

    pub async fn revoke_admin(&self, user: UserId) -> Result<bool> {
        let conn = self.db.lock().await;
        let revoked = admins::revoke(&conn, user)?;
        if revoked {
            tracing::info!(user = %user, "operator revoked");
        }
        Ok(revoked)
    }

    pub async fn list_recipients(&self) -> Result<Vec<Recipient>> {
        let conn = self.db.lock().await;
        Ok(users::list(&conn)?)
    }
}

impl Directory for SqliteDirectory {
    async fn is_admin(&self, user: UserId) -> Result<bool> {
        let conn = self.db.lock().await;
        Ok(admins::is_admin(&conn, user)?)
    }

    async fn admin_ids(&self) -> Result<Vec<UserId>> {
        let conn = self.db.lock().await;
        Ok(admins::list(&conn)?)
    }

    async fn all_recipient_ids(&self) -> Result<Vec<UserId>> {
        let conn = self.db.lock().await;
        Ok(users::list(&conn)?.into_iter().map(|r| r.user_id).collect())
    }

    async fn recipient(&self, user: UserId) -> Result<Option<Recipient>> {
        let conn = self.db.lock().await;
        Ok(users::get(&conn, user)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{fixture, ADMIN};

    #[tokio::test]
    async fn test_eligible_excludes_admins() {
        let fx = fixture(3).await;
        let eligible = fx.directory.eligible_recipients().await.expect("eligible");
        assert_eq!(eligible, vec![UserId(100), UserId(101), UserId(102)]);

        fx.directory.grant_admin(UserId(101), 50).await.expect("grant");
        let eligible = fx.directory.eligible_recipients().await.expect("eligible");
        assert_eq!(eligible, vec![UserId(100), UserId(102)]);
        assert!(fx.directory.is_admin(UserId(101)).await.expect("is_admin"));

        assert!(fx.directory.revoke_admin(UserId(101)).await.expect("revoke"));
        assert!(!fx.directory.revoke_admin(UserId(101)).await.expect("revoke again"));
    }

    #[tokio::test]
    async fn test_resolve_by_id_and_handle() {
        let fx = fixture(1).await;
        assert_eq!(fx.directory.resolve_user("100").await.expect("id"), Some(UserId(100)));
        assert_eq!(fx.directory.resolve_user("@USER0").await.expect("handle"), Some(UserId(100)));
        assert_eq!(fx.directory.resolve_user("999").await.expect("unknown"), None);
        assert_eq!(fx.directory.resolve_user("@nobody").await.expect("unknown"), None);
        assert!(matches!(
            fx.directory.resolve_user("  ").await,
            Err(PoolError::Validation(_))
        ));
        assert_eq!(fx.directory.resolve_user("@boss").await.expect("admin"), Some(ADMIN));
    }

    #[tokio::test]
    async fn test_register_strips_at_sign() {
        let fx = fixture(0).await;
        fx.directory
            .register_user(UserId(7), Some("@alice"), 10)
            .await
            .expect("register");
        let recipient = fx.directory.recipient(UserId(7)).await.expect("get").expect("present");
        assert_eq!(recipient.username.as_deref(), Some("alice"));
        assert_eq!(recipient.last_ticket_at, None);
    }
}
