//! File-system outbox transport.
//!
//! Each recipient gets a directory under the outbox root. Documents are
//! copied there and text messages are appended to `messages.log`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use ticketwave_delivery::{Transport, TransportError};
use ticketwave_types::{now_millis, UserId};

const MESSAGE_LOG: &str = "messages.log";

pub struct OutboxTransport {
    root: PathBuf,
    blocked: HashSet<UserId>,
}

impl OutboxTransport {
    pub fn new(root: impl Into<PathBuf>, blocked: impl IntoIterator<Item = UserId>) -> Self {
        Self {
            root: root.into(),
            blocked: blocked.into_iter().collect(),
        }
    }

    fn mailbox(&self, recipient: UserId) -> Result<PathBuf, TransportError> {
        if self.blocked.contains(&recipient) {
            return Err(TransportError::Rejected(format!(
                "user {recipient} has blocked the channel"
            )));
        }
        Ok(self.root.join(recipient.to_string()))
    }
}

fn transient(context: &str, path: &Path, e: std::io::Error) -> TransportError {
    TransportError::Transient(format!("{context} {}: {e}", path.display()))
}

impl Transport for OutboxTransport {
    async fn send_document(
        &self,
        recipient: UserId,
        document: &Path,
        caption: &str,
    ) -> Result<(), TransportError> {
        let mailbox = self.mailbox(recipient)?;
        tokio::fs::create_dir_all(&mailbox)
            .await
            .map_err(|e| transient("create", &mailbox, e))?;

        let file_name = document
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "ticket".to_string());
        let target = mailbox.join(format!("{}-{file_name}", now_millis()));
        tokio::fs::copy(document, &target)
            .await
            .map_err(|e| transient("copy", document, e))?;

        tracing::debug!(recipient = %recipient, target = %target.display(), caption, "document placed in outbox");
        Ok(())
    }

    async fn send_message(&self, recipient: UserId, text: &str) -> Result<(), TransportError> {
        let mailbox = self.mailbox(recipient)?;
        tokio::fs::create_dir_all(&mailbox)
            .await
            .map_err(|e| transient("create", &mailbox, e))?;

        let log = mailbox.join(MESSAGE_LOG);
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log)
            .await
            .map_err(|e| transient("open", &log, e))?;
        file.write_all(format!("{} {text}\n", now_millis()).as_bytes())
            .await
            .map_err(|e| transient("write", &log, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_document_is_copied_into_mailbox() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = dir.path().join("t.pdf");
        std::fs::write(&source, b"ticket").expect("write");
        let outbox = OutboxTransport::new(dir.path().join("outbox"), []);

        outbox
            .send_document(UserId(7), &source, "Your ticket")
            .await
            .expect("send");

        let mailbox = dir.path().join("outbox").join("7");
        let files: Vec<_> = std::fs::read_dir(&mailbox)
            .expect("read mailbox")
            .filter_map(|e| e.ok())
            .collect();
        assert_eq!(files.len(), 1);
        assert_eq!(std::fs::read(files[0].path()).expect("read"), b"ticket");
    }

    #[tokio::test]
    async fn test_missing_document_is_transient() {
        let dir = tempfile::tempdir().expect("tempdir");
        let outbox = OutboxTransport::new(dir.path(), []);
        let err = outbox
            .send_document(UserId(7), &dir.path().join("gone.pdf"), "")
            .await
            .expect_err("missing source");
        assert!(matches!(err, TransportError::Transient(_)));
    }

    #[tokio::test]
    async fn test_blocked_recipient_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let outbox = OutboxTransport::new(dir.path(), [UserId(9)]);
        let err = outbox
            .send_message(UserId(9), "hello")
            .await
            .expect_err("blocked");
        assert!(err.is_permanent());
        assert!(!dir.path().join("9").exists());
    }

    #[tokio::test]
    async fn test_messages_are_appended() {
        let dir = tempfile::tempdir().expect("tempdir");
        let outbox = OutboxTransport::new(dir.path(), []);
        outbox.send_message(UserId(1), "first").await.expect("send");
        outbox.send_message(UserId(1), "second").await.expect("send");

        let log = std::fs::read_to_string(dir.path().join("1").join(MESSAGE_LOG)).expect("read log");
        let lines: Vec<_> = log.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].ends_with("second"));
    }
}
