//! Bulk delivery engine.
//!
//! One run walks every eligible recipient in registration order, pairs each
//! with a ticket and transmits it, then makes one more pass over whatever is
//! left in the pending-delivery ledger. Sends are sequential and paced.
//!
//! A ticket is claimed and its ledger entry written in one commit before
//! any transmission, so a run that dies between reserving and confirming
//! resumes with the same ticket for the same recipient. Operator notices go
//! out as soon as they are raised.

use std::collections::HashSet;
use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use ticketwave_pool::{Directory, Ledger, TicketStore};
use ticketwave_types::{now_millis, PendingReason, TicketId, TicketRef, UserId, WaveId};

use crate::notice::Notice;
use crate::retry::{attempt_with_policy, AttemptOutcome, RetryPolicy};
use crate::transport::Transport;
use crate::{DeliveryError, Result};

pub const DEFAULT_CAPTION: &str = "Your ticket";

#[derive(Debug, Clone)]
pub struct DeliverySettings {
    pub policy: RetryPolicy,
    /// Fixed wait between recipients.
    pub pacing: Duration,
    /// Random extra wait in `[0, pacing_jitter]`.
    pub pacing_jitter: Duration,
    pub caption: String,
    /// Wait between messages of an operator broadcast.
    pub broadcast_pacing: Duration,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            policy: RetryPolicy::DEFAULT,
            pacing: Duration::from_millis(5_000),
            pacing_jitter: Duration::from_millis(500),
            caption: DEFAULT_CAPTION.to_string(),
            broadcast_pacing: Duration::from_millis(40),
        }
    }
}

/// What happened to one recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RecipientOutcome {
    Sent { ticket_id: TicketId, attempts: u32 },
    /// Permanent rejection; the ticket went back to the pool.
    Rejected { ticket_id: TicketId, error: String },
    /// Retries ran out; the ticket is kept aside for a later pass.
    Deferred { ticket_id: TicketId, attempts: u32, error: String },
    /// The ticket file was gone; the ticket is lost.
    FileMissing { ticket_id: TicketId },
    PoolExhausted,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub wave_id: Option<WaveId>,
    /// Eligible recipients considered (operators excluded).
    pub recipients: u64,
    pub sent: u64,
    pub failed: u64,
    pub already_received: u64,
    pub retry_sent: u64,
    pub retry_failed: u64,
    /// Ledger entries left after both passes.
    pub still_pending: u64,
    pub pool_exhausted: bool,
    pub notices: Vec<Notice>,
}

/// Result of sending one text to every registered user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    pub recipients: u64,
    pub sent: u64,
    pub failed: u64,
}

pub struct DeliveryEngine<T, D> {
    store: TicketStore,
    ledger: Ledger,
    directory: D,
    transport: T,
    settings: DeliverySettings,
}

impl<T: Transport, D: Directory> DeliveryEngine<T, D> {
    pub fn new(
        store: TicketStore,
        ledger: Ledger,
        directory: D,
        transport: T,
        settings: DeliverySettings,
    ) -> Self {
        Self {
            store,
            ledger,
            directory,
            transport,
            settings,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Deliver one ticket to every eligible recipient of the active wave.
    pub async fn run(&self) -> Result<DeliveryReport> {
        let (wave_id, wave_start) = self.active_wave().await?;
        let admins: HashSet<UserId> = self.directory.admin_ids().await?.into_iter().collect();
        let recipients: Vec<UserId> = self
            .directory
            .all_recipient_ids()
            .await?
            .into_iter()
            .filter(|id| !admins.contains(id))
            .collect();

        let mut report = DeliveryReport {
            wave_id: Some(wave_id),
            recipients: recipients.len() as u64,
            ..DeliveryReport::default()
        };
        tracing::info!(wave = %wave_id, recipients = report.recipients, "bulk delivery started");

        let mut paced = false;
        for (index, &user) in recipients.iter().enumerate() {
            if self.received_since(user, wave_start).await? {
                report.already_received += 1;
                self.ledger.remove(user).await?;
                continue;
            }
            if paced {
                self.pace().await;
            }
            paced = true;

            match self.deliver_one(wave_id, user).await? {
                RecipientOutcome::Sent { .. } => report.sent += 1,
                RecipientOutcome::PoolExhausted => {
                    let remaining = (recipients.len() - index) as u64;
                    tracing::warn!(wave = %wave_id, remaining, "ticket pool exhausted");
                    report.pool_exhausted = true;
                    self.raise(&mut report, Notice::PoolExhausted { remaining }).await;
                    break;
                }
                other => {
                    report.failed += 1;
                    if let Some(notice) = notice_for(user, &other) {
                        self.raise(&mut report, notice).await;
                    }
                }
            }
        }

        self.retry_pass(wave_id, wave_start, &admins, &mut report, paced).await?;
        report.still_pending = self.ledger.len().await?;

        tracing::info!(
            wave = %wave_id,
            sent = report.sent,
            failed = report.failed,
            already_received = report.already_received,
            retry_sent = report.retry_sent,
            retry_failed = report.retry_failed,
            still_pending = report.still_pending,
            pool_exhausted = report.pool_exhausted,
            "bulk delivery finished"
        );
        Ok(report)
    }

    /// Give one ticket to one recipient outside the bulk loop.
    pub async fn force_give(&self, operator: UserId, user: UserId) -> Result<RecipientOutcome> {
        let (wave_id, wave_start) = self.active_wave().await?;
        let recipient = self
            .directory
            .recipient(user)
            .await?
            .ok_or(DeliveryError::NotRegistered(user))?;
        if recipient.received_since(wave_start) {
            return Err(DeliveryError::AlreadyReceived(user));
        }

        let outcome = self.deliver_one(wave_id, user).await?;
        tracing::info!(operator = %operator, user = %user, ?outcome, "manual issue");
        match &outcome {
            RecipientOutcome::PoolExhausted => return Err(DeliveryError::PoolExhausted),
            RecipientOutcome::Sent { ticket_id, .. } => {
                let notice = Notice::ManualIssue {
                    operator,
                    user_id: user,
                    ticket_id: *ticket_id,
                };
                self.notify_operators(&notice, Some(operator)).await;
            }
            other => {
                if let Some(notice) = notice_for(user, other) {
                    self.notify_operators(&notice, None).await;
                }
            }
        }
        Ok(outcome)
    }

    /// Send `text` to every registered user, operators included.
    ///
    /// One attempt per user; failures are counted and logged, never retried.
    pub async fn broadcast(&self, text: &str) -> Result<BroadcastReport> {
        let users = self.directory.all_recipient_ids().await?;
        let mut report = BroadcastReport {
            recipients: users.len() as u64,
            ..BroadcastReport::default()
        };
        tracing::info!(recipients = report.recipients, "broadcast started");

        for (index, user) in users.into_iter().enumerate() {
            if index > 0 && !self.settings.broadcast_pacing.is_zero() {
                tokio::time::sleep(self.settings.broadcast_pacing).await;
            }
            match self.transport.send_message(user, text).await {
                Ok(()) => report.sent += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(user = %user, error = %e, "broadcast message failed");
                }
            }
        }

        tracing::info!(sent = report.sent, failed = report.failed, "broadcast finished");
        Ok(report)
    }

    /// Tell every operator except `except` about `notice`.
    ///
    /// Best effort: a failed lookup or send is logged and skipped.
    pub async fn notify_operators(&self, notice: &Notice, except: Option<UserId>) {
        let admins = match self.directory.admin_ids().await {
            Ok(admins) => admins,
            Err(e) => {
                tracing::warn!(error = %e, "could not load operators for notification");
                return;
            }
        };
        let text = notice.to_string();
        for admin in admins.into_iter().filter(|a| Some(*a) != except) {
            if let Err(e) = self.transport.send_message(admin, &text).await {
                tracing::warn!(admin = %admin, error = %e, "operator notification failed");
            }
        }
    }

    async fn raise(&self, report: &mut DeliveryReport, notice: Notice) {
        self.notify_operators(&notice, None).await;
        report.notices.push(notice);
    }

    async fn active_wave(&self) -> Result<(WaveId, u64)> {
        let state = self.store.wave_state().await?;
        state.active().ok_or(DeliveryError::NotActive(state.status))
    }

    async fn received_since(&self, user: UserId, wave_start: u64) -> Result<bool> {
        Ok(self
            .store
            .last_received(user)
            .await?
            .is_some_and(|at| at >= wave_start))
    }

    /// Second chance for recipients left in the ledger by the main pass.
    async fn retry_pass(
        &self,
        wave_id: WaveId,
        wave_start: u64,
        admins: &HashSet<UserId>,
        report: &mut DeliveryReport,
        mut paced: bool,
    ) -> Result<()> {
        for entry in self.ledger.entries().await? {
            if entry.reason == PendingReason::FileMissing || admins.contains(&entry.user_id) {
                continue;
            }
            if self.received_since(entry.user_id, wave_start).await? {
                self.ledger.remove(entry.user_id).await?;
                continue;
            }
            if paced {
                self.pace().await;
            }
            paced = true;

            match self.deliver_one(wave_id, entry.user_id).await? {
                RecipientOutcome::Sent { .. } => report.retry_sent += 1,
                RecipientOutcome::PoolExhausted => {
                    report.pool_exhausted = true;
                    break;
                }
                other => {
                    report.retry_failed += 1;
                    if let Some(notice) = notice_for(entry.user_id, &other) {
                        self.raise(report, notice).await;
                    }
                }
            }
        }
        Ok(())
    }

    /// Pair `user` with a ticket and transmit it.
    async fn deliver_one(&self, wave_id: WaveId, user: UserId) -> Result<RecipientOutcome> {
        let ticket = match self.held_ticket(wave_id, user).await? {
            Some(ticket) => ticket,
            None => match self.store.next_available(wave_id).await? {
                Some(ticket) => ticket,
                None => return Ok(RecipientOutcome::PoolExhausted),
            },
        };

        self.store.reserve_held(ticket.id, user, now_millis()).await?;

        if !self.store.file_exists(&ticket) {
            return self.file_missing(user, &ticket, 0).await;
        }
        let path = self.store.path_of(&ticket)?;

        let transport = &self.transport;
        let caption = self.settings.caption.as_str();
        let document = path.as_path();
        let outcome = attempt_with_policy(self.settings.policy, move |_| {
            transport.send_document(user, document, caption)
        })
        .await;

        match outcome {
            AttemptOutcome::Delivered { attempts } => {
                self.store.confirm_delivered(ticket.id, user, now_millis()).await?;
                self.ledger.remove(user).await?;
                tracing::info!(user = %user, ticket = %ticket.id, attempts, "ticket delivered");
                Ok(RecipientOutcome::Sent {
                    ticket_id: ticket.id,
                    attempts,
                })
            }
            AttemptOutcome::Rejected { error, .. } => {
                self.store.release(ticket.id).await?;
                self.ledger.remove(user).await?;
                tracing::warn!(user = %user, ticket = %ticket.id, error = %error, "recipient rejected delivery, ticket released");
                Ok(RecipientOutcome::Rejected {
                    ticket_id: ticket.id,
                    error: error.to_string(),
                })
            }
            AttemptOutcome::Exhausted {
                last_error,
                attempts,
            } => {
                if !self.store.file_exists(&ticket) {
                    return self.file_missing(user, &ticket, attempts).await;
                }
                self.store.release(ticket.id).await?;
                self.ledger
                    .record_failure(user, PendingReason::RetryExhausted, attempts, now_millis())
                    .await?;
                tracing::warn!(user = %user, ticket = %ticket.id, attempts, error = %last_error, "retries exhausted, ticket held for retry");
                Ok(RecipientOutcome::Deferred {
                    ticket_id: ticket.id,
                    attempts,
                    error: last_error.to_string(),
                })
            }
        }
    }

    /// The ticket already claimed for `user`, if it is still usable.
    ///
    /// The ledger entry wins; otherwise an unconfirmed reservation in this
    /// wave with no ledger entry is picked up so it is not stranded.
    async fn held_ticket(&self, wave_id: WaveId, user: UserId) -> Result<Option<TicketRef>> {
        let Some(entry) = self.ledger.get(user).await? else {
            let orphan = self.store.reserved_for(user, wave_id).await?;
            if let Some(ticket) = &orphan {
                tracing::warn!(user = %user, ticket = %ticket.id, "reservation without ledger entry, reusing it");
            }
            return Ok(orphan);
        };
        let record = match self.store.get(entry.ticket_id).await {
            Ok(record) => record,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let foreign = record.assigned_to.is_some_and(|holder| holder != user);
        if record.lost || record.archived_unused || record.assigned_at.is_some() || foreign {
            tracing::debug!(user = %user, ticket = %record.id, "ledger ticket no longer usable, drawing a new one");
            return Ok(None);
        }
        tracing::debug!(user = %user, ticket = %record.id, "reusing ledger reservation");
        Ok(Some(record.to_ref()))
    }

    async fn file_missing(
        &self,
        user: UserId,
        ticket: &TicketRef,
        attempts: u32,
    ) -> Result<RecipientOutcome> {
        self.store.mark_lost(ticket.id).await?;
        self.ledger
            .record_failure(user, PendingReason::FileMissing, attempts, now_millis())
            .await?;
        tracing::error!(user = %user, ticket = %ticket.id, storage_name = %ticket.storage_name, "ticket file missing under reservation");
        Ok(RecipientOutcome::FileMissing {
            ticket_id: ticket.id,
        })
    }

    async fn pace(&self) {
        let delay = self.settings.pacing + jitter(self.settings.pacing_jitter);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

}

fn notice_for(user: UserId, outcome: &RecipientOutcome) -> Option<Notice> {
    match outcome {
        RecipientOutcome::Rejected { ticket_id, error } => Some(Notice::RecipientBlocked {
            user_id: user,
            ticket_id: *ticket_id,
            error: error.clone(),
        }),
        RecipientOutcome::FileMissing { ticket_id } => Some(Notice::FileMissing {
            user_id: user,
            ticket_id: *ticket_id,
        }),
        _ => None,
    }
}

fn jitter(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}
