//! Pending upload sessions.
//!
//! An operator announces an upload (and its mode) before sending the bundle.
//! The session is consumed by the next bundle from the same operator.

use std::collections::HashMap;

use serde::Serialize;
use ticketwave_pool::IngestMode;
use ticketwave_types::UserId;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UploadSession {
    pub mode: IngestMode,
    pub started_at: u64,
}

#[derive(Default)]
pub struct UploadSessions {
    inner: Mutex<HashMap<UserId, UploadSession>>,
}

impl UploadSessions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open (or reopen) a session; returns the one it replaced.
    pub async fn begin(&self, operator: UserId, mode: IngestMode, at: u64) -> Option<UploadSession> {
        self.inner.lock().await.insert(
            operator,
            UploadSession {
                mode,
                started_at: at,
            },
        )
    }

    /// Consume the operator's session.
    pub async fn take(&self, operator: UserId) -> Option<UploadSession> {
        self.inner.lock().await.remove(&operator)
    }

    /// Drop every session, e.g. when the wave they were opened for ends.
    pub async fn cancel_all(&self) -> usize {
        let mut inner = self.inner.lock().await;
        let n = inner.len();
        inner.clear();
        n
    }
}
