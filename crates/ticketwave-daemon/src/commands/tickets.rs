//! Ticket upload and inventory command handlers.

use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use ticketwave_pool::{report, Bundle, IngestMode, IngestOutcome, PoolError};
use ticketwave_types::{now_millis, UserId, WaveId, WaveStatus};

use super::{str_param, to_value, Result};
use crate::rpc::RpcError;
use crate::DaemonState;

/// Announce the next bundle from this operator and its mode.
pub async fn begin_upload(state: &Arc<DaemonState>, operator: UserId, params: &Value) -> Result {
    let mode = str_param(params, "mode")?;
    let mode = IngestMode::parse(mode)
        .ok_or_else(|| RpcError::invalid_params("mode must be replace or add"))?;

    let status = state.waves.state().await?.status;
    let allowed = match mode {
        IngestMode::Replace => status == WaveStatus::Preparing,
        IngestMode::Add => matches!(status, WaveStatus::Preparing | WaveStatus::Active),
    };
    if !allowed {
        return Err(PoolError::UploadNotAllowed {
            mode: mode.as_str(),
            status,
        }
        .into());
    }

    let started_at = now_millis();
    let replaced = state.sessions.begin(operator, mode, started_at).await;
    Ok(serde_json::json!({
        "mode": mode,
        "replaced": replaced.map(|s| s.mode),
        "started_at": started_at,
        "wave_status": status,
    }))
}

/// Ingest every file in `dir` using the operator's announced mode.
pub async fn upload_tickets(state: &Arc<DaemonState>, operator: UserId, params: &Value) -> Result {
    let dir = Path::new(str_param(params, "dir")?);
    if !dir.is_dir() {
        return Err(RpcError::invalid_params("dir must be an existing directory"));
    }
    let session = state
        .sessions
        .take(operator)
        .await
        .ok_or_else(|| RpcError::invalid_params("no upload in progress; call begin_upload first"))?;

    let bundle = Bundle::from_dir(dir)?;
    tracing::info!(
        operator = %operator,
        mode = %session.mode,
        announced_at = session.started_at,
        files = bundle.len(),
        "bundle received"
    );
    let report = state
        .ingestor
        .ingest(session.mode, bundle, operator, now_millis())
        .await?;

    if report.outcome == IngestOutcome::Ingested {
        state.event_bus.emit(
            "TicketsUploaded",
            serde_json::json!({
                "operator": operator,
                "mode": report.mode,
                "added": report.added.len(),
                "duplicates": report.duplicates.len(),
                "archived": report.archived,
            }),
        );
    }
    to_value(&report)
}

pub async fn list_tickets(state: &Arc<DaemonState>) -> Result {
    to_value(&report::list_tickets_with_status(&state.db).await?)
}

/// Counters for `wave_id`, or for the current wave when omitted.
/// Pool counts for `wave_id`, or for the current wave when none is given.
/// An unknown wave id is reported as not found.
pub async fn ticket_stats(state: &Arc<DaemonState>, params: &Value) -> Result {
    let wave_id = match params.get("wave_id").and_then(|v| v.as_i64()) {
        Some(id) => Some(WaveId(id)),
        None => state.waves.state().await?.wave_id,
    };
    let wave = match wave_id {
        Some(id) => Some(state.waves.wave(id).await?),
        None => None,
    };
    let stats = state.store.stats(wave_id).await?;
    Ok(serde_json::json!({
        "wave_id": wave_id,
        "wave": to_value(&wave)?,
        "stats": to_value(&stats)?,
    }))
}

/// Flag free tickets whose files vanished.
pub async fn archive_missing(state: &Arc<DaemonState>) -> Result {
    let archived = state.store.archive_missing().await?;
    if archived > 0 {
        state
            .event_bus
            .emit("ArchiveSwept", serde_json::json!({"archived": archived}));
    }
    Ok(serde_json::json!({"archived": archived}))
}
