//! Event feed command handlers.

use std::sync::Arc;

use serde_json::Value;

use super::{to_value, Result};
use crate::rpc::RpcError;
use crate::DaemonState;

/// Retained events after sequence `after` (default 0), optionally filtered
/// by `category`.
pub async fn recent_events(state: &Arc<DaemonState>, params: &Value) -> Result {
    let after = params.get("after").and_then(|v| v.as_u64()).unwrap_or(0);
    let category = params.get("category").and_then(|v| v.as_str());
    if let Some(c) = category {
        if !["wave", "tickets", "delivery", "users", "system"].contains(&c) {
            return Err(RpcError::invalid_params(
                "category must be wave/tickets/delivery/users/system",
            ));
        }
    }
    Ok(serde_json::json!({
        "sequence": state.event_bus.sequence(),
        "events": to_value(&state.event_bus.since(after, category))?,
    }))
}
