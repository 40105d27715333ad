//! IPC command handlers.
//!
//! Each submodule implements the commands for one area. Handlers return the
//! JSON result or an [`RpcError`]; pool and delivery errors convert with `?`.

pub mod delivery;
pub mod events;
pub mod invites;
pub mod tickets;
pub mod users;
pub mod wave;

use serde::Serialize;
use serde_json::Value;

use ticketwave_types::UserId;

use crate::rpc::RpcError;
use crate::DaemonState;

pub(crate) type Result = std::result::Result<Value, RpcError>;

pub(crate) fn to_value<T: Serialize>(value: &T) -> Result {
    serde_json::to_value(value).map_err(|e| RpcError::internal_error(&format!("serialize: {e}")))
}

pub(crate) fn str_param<'a>(params: &'a Value, key: &str) -> std::result::Result<&'a str, RpcError> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| RpcError::invalid_params(&format!("{key} required")))
}

/// A user given as a numeric id, a numeric string or an `@handle`.
///
/// Numeric ids are taken as-is; handles must belong to a registered user.
pub(crate) async fn user_param(
    state: &DaemonState,
    params: &Value,
    key: &str,
) -> std::result::Result<UserId, RpcError> {
    let value = params
        .get(key)
        .ok_or_else(|| RpcError::invalid_params(&format!("{key} required")))?;
    if let Some(id) = value.as_i64() {
        return Ok(UserId(id));
    }
    let reference = value
        .as_str()
        .ok_or_else(|| RpcError::invalid_params(&format!("{key} must be an id or @handle")))?;
    if let Ok(id) = reference.parse::<UserId>() {
        return Ok(id);
    }
    state
        .directory
        .resolve_user(reference)
        .await?
        .ok_or_else(|| RpcError::not_found(&format!("no user {reference}")))
}
