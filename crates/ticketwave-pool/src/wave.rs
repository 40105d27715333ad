//! Wave state machine.
//!
//! ```text
//! idle ──new_wave──▶ preparing ──confirm──▶ active
//!  ▲                    │                     │
//!  └──────end (abort)───┘                     │
//!  └──────────────────end (finish)────────────┘
//! ```
//!
//! The current state is a single durable row. Confirmation creates the wave
//! record, binds the uploaded tickets and activates the wave in one
//! transaction.

use std::path::PathBuf;

use serde::Serialize;
use ticketwave_db::queries::{tickets, waves};
use ticketwave_types::{TicketStats, UserId, Wave, WaveId, WaveState, WaveStatus};

use crate::directory::Directory;
use crate::{Ledger, PoolError, Result, TicketStore};

/// What `new_wave` cleaned up on the way into preparation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Preparation {
    pub prepared_at: u64,
    /// Free tickets whose files were missing.
    pub lost: u64,
    /// Free tickets moved into cold storage.
    pub archived: u64,
    pub archive_batch: Option<PathBuf>,
    /// Ledger entries dropped from the previous wave.
    pub pending_cleared: u64,
    /// Unconfirmed reservations returned to the pool before archiving.
    pub released: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Confirmation {
    pub wave: Wave,
    pub tickets_bound: u64,
    pub recipients: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "ended", rename_all = "snake_case")]
pub enum WaveEnd {
    /// A preparation was abandoned; its uploads were discarded.
    Aborted { discarded: u64, lost: u64 },
    /// An active wave was closed. `released` counts reservations that were
    /// never confirmed and went back to the pool.
    Finished {
        wave_id: WaveId,
        lost: u64,
        released: u64,
    },
}

/// Everything the status view needs in one read.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub state: WaveState,
    /// Counters for the active wave, or across all tickets otherwise.
    pub tickets: TicketStats,
    /// Tickets uploaded in the current preparation, not yet bound.
    pub staged: u64,
    pub pending_deliveries: u64,
    pub total_waves: u64,
    pub latest_wave: Option<Wave>,
}

pub struct WaveMachine<D> {
    store: TicketStore,
    ledger: Ledger,
    directory: D,
}

impl<D: Directory> WaveMachine<D> {
    pub fn new(store: TicketStore, ledger: Ledger, directory: D) -> Self {
        Self {
            store,
            ledger,
            directory,
        }
    }

    pub async fn state(&self) -> Result<WaveState> {
        self.store.wave_state().await
    }

    /// Enter preparation.
    ///
    /// Only valid from idle, and only when no unbound tickets linger from an
    /// abandoned preparation. Sweeps the previous wave's leftovers: stray
    /// unconfirmed reservations are released, missing files are flagged
    /// lost, free tickets go to cold storage, and the pending-delivery
    /// ledger is emptied.
    pub async fn new_wave(&self, operator: UserId, now: u64) -> Result<Preparation> {
        let state = self.store.wave_state().await?;
        if state.status != WaveStatus::Idle {
            return Err(PoolError::WaveNotIdle(state.status));
        }
        let orphans = self.store.count_unbound(None).await?;
        if orphans > 0 {
            return Err(PoolError::OrphanedTickets(orphans));
        }

        let released = self.store.release_unconfirmed().await?;
        let lost = self.store.archive_missing().await?;
        let archive = self.store.archive_free(now).await?;
        let pending_cleared = self.ledger.clear().await? as u64;

        {
            let conn = self.store.db().lock().await;
            waves::set_state(
                &conn,
                &WaveState {
                    status: WaveStatus::Preparing,
                    prepared_at: Some(now),
                    wave_start: None,
                    wave_id: None,
                },
            )?;
        }

        tracing::info!(
            operator = %operator,
            lost = lost + archive.lost,
            archived = archive.archived,
            pending_cleared,
            released,
            "wave preparation started"
        );
        Ok(Preparation {
            prepared_at: now,
            lost: lost + archive.lost,
            archived: archive.archived,
            archive_batch: archive.batch,
            pending_cleared,
            released,
        })
    }

    /// Activate the prepared wave.
    ///
    /// Refused unless at least one ticket was uploaded during preparation
    /// and there are at least as many tickets as eligible recipients.
    pub async fn confirm(&self, operator: UserId, now: u64) -> Result<Confirmation> {
        let state = self.store.wave_state().await?;
        if state.status != WaveStatus::Preparing {
            return Err(PoolError::WaveNotPreparing(state.status));
        }
        let prepared_at = state.prepared_at.unwrap_or(0);

        self.store.archive_missing().await?;
        let recipients = self.directory.eligible_recipients().await?.len() as u64;

        let conn = self.store.db().lock().await;
        let available = tickets::count_unbound(&conn, Some(prepared_at))?;
        if available == 0 || available < recipients {
            return Err(PoolError::InsufficientTickets {
                available,
                recipients,
            });
        }

        let tx = conn.unchecked_transaction().map_err(ticketwave_db::DbError::from)?;
        let wave_id = waves::insert(&tx, now, operator, now)?;
        let bound = tickets::bind_unbound(&tx, wave_id, prepared_at)? as u64;
        waves::set_state(
            &tx,
            &WaveState {
                status: WaveStatus::Active,
                prepared_at: Some(prepared_at),
                wave_start: Some(now),
                wave_id: Some(wave_id),
            },
        )?;
        tx.commit().map_err(ticketwave_db::DbError::from)?;

        tracing::info!(wave = %wave_id, operator = %operator, tickets = bound, recipients, "wave activated");
        Ok(Confirmation {
            wave: Wave {
                id: wave_id,
                started_at: now,
                created_by: operator,
                confirmed_at: now,
            },
            tickets_bound: bound,
            recipients,
        })
    }

    /// Abandon a preparation, discarding the tickets uploaded during it.
    pub async fn abort(&self) -> Result<WaveEnd> {
        let state = self.store.wave_state().await?;
        if state.status != WaveStatus::Preparing {
            return Err(PoolError::WaveNotPreparing(state.status));
        }
        let discarded = self.store.discard_unbound(state.prepared_at).await?;
        let lost = self.store.archive_missing().await?;
        self.set_idle().await?;

        tracing::info!(discarded, lost, "wave preparation aborted");
        Ok(WaveEnd::Aborted { discarded, lost })
    }

    /// Close the active wave. Its history record stays.
    ///
    /// Reservations that were never confirmed go back to the pool so the
    /// next preparation archives them with the other leftovers.
    pub async fn finish(&self) -> Result<WaveEnd> {
        let state = self.store.wave_state().await?;
        let Some((wave_id, _)) = state.active() else {
            return Err(PoolError::WaveNotActive(state.status));
        };
        let released = self.store.release_unconfirmed().await?;
        let lost = self.store.archive_missing().await?;
        self.set_idle().await?;

        tracing::info!(wave = %wave_id, lost, released, "wave finished");
        Ok(WaveEnd::Finished {
            wave_id,
            lost,
            released,
        })
    }

    /// Abort a preparation or finish an active wave.
    pub async fn end(&self) -> Result<WaveEnd> {
        match self.store.wave_state().await?.status {
            WaveStatus::Idle => Err(PoolError::WaveNotRunning),
            WaveStatus::Preparing => self.abort().await,
            WaveStatus::Active => self.finish().await,
        }
    }

    pub async fn status_report(&self) -> Result<StatusReport> {
        let conn = self.store.db().lock().await;
        let state = waves::get_state(&conn)?;
        let wave_id = state.active().map(|(id, _)| id);
        let staged = match state.status {
            WaveStatus::Preparing => tickets::count_unbound(&conn, state.prepared_at)?,
            _ => 0,
        };
        Ok(StatusReport {
            tickets: tickets::stats(&conn, wave_id)?,
            staged,
            pending_deliveries: ticketwave_db::queries::pending::count(&conn)?,
            total_waves: waves::count(&conn)?,
            latest_wave: waves::latest(&conn)?,
            state,
        })
    }

    /// One wave from the history.
    pub async fn wave(&self, id: WaveId) -> Result<Wave> {
        let conn = self.store.db().lock().await;
        Ok(waves::get(&conn, id)?)
    }

    /// Wave history, newest first.
    pub async fn list_waves(&self) -> Result<Vec<Wave>> {
        let conn = self.store.db().lock().await;
        Ok(waves::list(&conn)?)
    }

    async fn set_idle(&self) -> Result<()> {
        let conn = self.store.db().lock().await;
        waves::set_state(&conn, &WaveState::idle())?;
        Ok(())
    }
}
