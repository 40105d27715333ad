//! Invite command handlers.

use std::sync::Arc;

use serde_json::Value;
use ticketwave_delivery::Notice;
use ticketwave_pool::Redemption;
use ticketwave_types::{now_millis, UserId};

use super::delivery::publish_notice;
use super::{str_param, to_value, Result};
use crate::rpc::RpcError;
use crate::DaemonState;

/// Register the caller with a one-time invite code. Public: this is how a
/// new recipient first reaches the daemon.
pub async fn redeem_invite(state: &Arc<DaemonState>, params: &Value) -> Result {
    let user = params
        .get("user_id")
        .and_then(|v| v.as_i64())
        .map(UserId)
        .ok_or_else(|| RpcError::invalid_params("user_id required"))?;
    let code = str_param(params, "code")?;
    let username = params.get("username").and_then(|v| v.as_str());

    let outcome = state
        .invites
        .redeem(user, username, code, now_millis())
        .await?;

    let notice = match outcome {
        Redemption::Registered => {
            state.event_bus.emit(
                "InviteRedeemed",
                serde_json::json!({"user_id": user, "username": username}),
            );
            return Ok(serde_json::json!({"user_id": user, "registered": true}));
        }
        Redemption::MissingHandle => Some(Notice::InviteWithoutHandle {
            user_id: user,
            code: code.trim().to_string(),
        }),
        Redemption::AlreadyRegistered { .. } => Some(Notice::SecondInvite {
            user_id: user,
            code: code.trim().to_string(),
        }),
        _ => None,
    };
    if let Some(notice) = notice {
        state.engine.notify_operators(&notice, None).await;
        publish_notice(state, &notice);
    }
    Err(RpcError::invite_refused(&outcome))
}

pub async fn generate_invites(state: &Arc<DaemonState>, operator: UserId, params: &Value) -> Result {
    let count = params
        .get("count")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| RpcError::invalid_params("count required"))?;
    let count = u32::try_from(count)
        .map_err(|_| RpcError::invalid_params(&format!("count {count} is too large")))?;

    let codes = state.invites.generate(count, now_millis()).await?;
    state.event_bus.emit(
        "InvitesGenerated",
        serde_json::json!({"operator": operator, "count": codes.len()}),
    );
    Ok(serde_json::json!({"count": codes.len(), "codes": codes}))
}

pub async fn invite_stats(state: &Arc<DaemonState>) -> Result {
    to_value(&state.invites.stats().await?)
}
