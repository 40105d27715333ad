//! Wave lifecycle command handlers.

use std::sync::Arc;

use ticketwave_types::{now_millis, UserId};

use super::{to_value, Result};
use crate::rpc::RpcError;
use crate::DaemonState;

/// Start preparing a new wave.
pub async fn new_wave(state: &Arc<DaemonState>, operator: UserId) -> Result {
    let prep = state.waves.new_wave(operator, now_millis()).await?;
    state.sessions.cancel_all().await;
    state.event_bus.emit(
        "WavePreparing",
        serde_json::json!({
            "operator": operator,
            "prepared_at": prep.prepared_at,
            "archived": prep.archived,
            "lost": prep.lost,
        }),
    );
    to_value(&prep)
}

/// Bind the staged tickets and make the wave active.
pub async fn confirm_wave(state: &Arc<DaemonState>, operator: UserId) -> Result {
    let confirmation = state.waves.confirm(operator, now_millis()).await?;
    state.event_bus.emit(
        "WaveActivated",
        serde_json::json!({
            "operator": operator,
            "wave_id": confirmation.wave.id,
            "tickets": confirmation.tickets_bound,
            "recipients": confirmation.recipients,
        }),
    );
    to_value(&confirmation)
}

/// Abort a preparation or finish the active wave.
pub async fn end_wave(state: &Arc<DaemonState>, operator: UserId) -> Result {
    let _guard = state
        .delivery_lock
        .try_lock()
        .map_err(|_| RpcError::delivery_busy())?;
    let ended = state.waves.end().await?;
    state.sessions.cancel_all().await;
    let value = to_value(&ended)?;
    state.event_bus.emit(
        "WaveEnded",
        serde_json::json!({"operator": operator, "result": value.clone()}),
    );
    Ok(value)
}

pub async fn wave_status(state: &Arc<DaemonState>) -> Result {
    to_value(&state.waves.status_report().await?)
}

pub async fn list_waves(state: &Arc<DaemonState>) -> Result {
    to_value(&state.waves.list_waves().await?)
}
