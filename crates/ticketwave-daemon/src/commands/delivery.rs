//! Delivery command handlers.

use std::sync::Arc;

use serde_json::Value;
use ticketwave_delivery::{Notice, RecipientOutcome};
use ticketwave_pool::report;
use ticketwave_types::UserId;

use super::{str_param, to_value, user_param, Result};
use crate::rpc::RpcError;
use crate::DaemonState;

pub(crate) fn publish_notice(state: &DaemonState, notice: &Notice) {
    let payload = match serde_json::to_value(notice) {
        Ok(mut payload) => {
            payload["text"] = Value::String(notice.to_string());
            payload
        }
        Err(_) => serde_json::json!({"text": notice.to_string()}),
    };
    state.event_bus.emit("DeliveryNotice", payload);
}

/// Run a bulk delivery pass for the active wave.
pub async fn send_tickets(state: &Arc<DaemonState>, operator: UserId) -> Result {
    let _guard = state
        .delivery_lock
        .try_lock()
        .map_err(|_| RpcError::delivery_busy())?;

    tracing::info!(operator = %operator, "bulk delivery requested");
    let report = state.engine.run().await?;

    for notice in &report.notices {
        publish_notice(state, notice);
    }
    let value = to_value(&report)?;
    state.event_bus.emit(
        "DeliveryFinished",
        serde_json::json!({
            "operator": operator,
            "wave_id": report.wave_id,
            "sent": report.sent,
            "failed": report.failed,
            "still_pending": report.still_pending,
            "pool_exhausted": report.pool_exhausted,
        }),
    );
    Ok(value)
}

/// Send an operator's text to every registered user.
pub async fn broadcast(state: &Arc<DaemonState>, operator: UserId, params: &Value) -> Result {
    let text = str_param(params, "text")?.trim();
    if text.is_empty() {
        return Err(RpcError::invalid_params("text must not be empty"));
    }
    // Shares the channel's rate budget with bulk delivery.
    let _guard = state
        .delivery_lock
        .try_lock()
        .map_err(|_| RpcError::delivery_busy())?;

    tracing::info!(operator = %operator, "broadcast requested");
    let report = state.engine.broadcast(text).await?;
    state.event_bus.emit(
        "BroadcastSent",
        serde_json::json!({
            "operator": operator,
            "sent": report.sent,
            "failed": report.failed,
        }),
    );
    to_value(&report)
}

/// Hand one ticket to one recipient, bypassing the bulk loop.
pub async fn force_give(state: &Arc<DaemonState>, operator: UserId, params: &Value) -> Result {
    let user = user_param(state, params, "user").await?;
    let _guard = state
        .delivery_lock
        .try_lock()
        .map_err(|_| RpcError::delivery_busy())?;

    let outcome = state.engine.force_give(operator, user).await?;
    match &outcome {
        RecipientOutcome::Sent { ticket_id, .. } => {
            state.event_bus.emit(
                "TicketIssued",
                serde_json::json!({
                    "operator": operator,
                    "user_id": user,
                    "ticket_id": ticket_id,
                }),
            );
        }
        RecipientOutcome::Rejected { ticket_id, error } => publish_notice(
            state,
            &Notice::RecipientBlocked {
                user_id: user,
                ticket_id: *ticket_id,
                error: error.clone(),
            },
        ),
        RecipientOutcome::FileMissing { ticket_id } => publish_notice(
            state,
            &Notice::FileMissing {
                user_id: user,
                ticket_id: *ticket_id,
            },
        ),
        RecipientOutcome::Deferred { .. } | RecipientOutcome::PoolExhausted => {}
    }
    to_value(&outcome)
}

/// Recipients with an outstanding delivery, with handle and ticket status.
pub async fn list_failed(state: &Arc<DaemonState>) -> Result {
    to_value(&report::list_failed_deliveries(&state.db).await?)
}
