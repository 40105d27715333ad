//! Recipient and operator command handlers.

use std::sync::Arc;

use serde_json::Value;
use ticketwave_pool::Directory;
use ticketwave_types::{now_millis, UserId};

use super::{to_value, user_param, Result};
use crate::rpc::RpcError;
use crate::DaemonState;

/// Register a recipient directly, without an invite code.
pub async fn register_user(state: &Arc<DaemonState>, params: &Value) -> Result {
    let user = params
        .get("user_id")
        .and_then(|v| v.as_i64())
        .map(UserId)
        .ok_or_else(|| RpcError::invalid_params("user_id required"))?;
    let username = params.get("username").and_then(|v| v.as_str());
    state
        .directory
        .register_user(user, username, now_millis())
        .await?;
    Ok(serde_json::json!({"user_id": user, "registered": true}))
}

pub async fn list_users(state: &Arc<DaemonState>) -> Result {
    to_value(&state.directory.list_recipients().await?)
}

pub async fn grant_admin(state: &Arc<DaemonState>, operator: UserId, params: &Value) -> Result {
    let user = user_param(state, params, "user").await?;
    state.directory.grant_admin(user, now_millis()).await?;
    tracing::info!(operator = %operator, user = %user, "operator added");
    Ok(serde_json::json!({"user_id": user, "admin": true}))
}

/// Revoke operator rights. The last operator cannot be removed.
pub async fn revoke_admin(state: &Arc<DaemonState>, operator: UserId, params: &Value) -> Result {
    let user = user_param(state, params, "user").await?;
    let admins = state.directory.admin_ids().await?;
    if admins == [user] {
        return Err(RpcError::conflict("cannot revoke the last operator"));
    }
    let revoked = state.directory.revoke_admin(user).await?;
    if revoked {
        tracing::info!(operator = %operator, user = %user, "operator removed");
    }
    Ok(serde_json::json!({"user_id": user, "revoked": revoked}))
}
