//! JSON-RPC server over Unix socket.
//!
//! Listens on a Unix domain socket, accepts connections, and dispatches
//! line-delimited JSON-RPC method calls to the command handlers.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tracing::{debug, error, info, warn};

use ticketwave_delivery::DeliveryError;
use ticketwave_pool::{Directory, PoolError, Redemption};
use ticketwave_types::UserId;

use crate::commands;
use crate::DaemonState;

/// JSON-RPC request.
#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    /// JSON-RPC version (must be "2.0").
    pub jsonrpc: String,
    /// Request ID.
    pub id: serde_json::Value,
    /// Method name.
    pub method: String,
    /// Parameters.
    #[serde(default)]
    pub params: serde_json::Value,
}

/// JSON-RPC response.
#[derive(Debug, Serialize)]
pub struct RpcResponse {
    /// JSON-RPC version.
    pub jsonrpc: String,
    /// Request ID.
    pub id: serde_json::Value,
    /// Result or error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

/// JSON-RPC error object.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RpcError {
    pub code: i32,
    /// Error name.
    pub message: String,
    /// Optional structured data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl RpcResponse {
    /// Create a success response.
    pub fn success(id: serde_json::Value, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response.
    pub fn error(id: serde_json::Value, error: RpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

impl RpcError {
    fn with_detail(code: i32, message: &str, detail: &str) -> Self {
        Self {
            code,
            message: message.to_string(),
            data: Some(serde_json::json!({"detail": detail})),
        }
    }

    // Standard JSON-RPC errors

    /// Parse error (-32700).
    pub fn parse_error() -> Self {
        Self {
            code: -32700,
            message: "PARSE_ERROR".to_string(),
            data: None,
        }
    }

    /// Invalid request (-32600).
    pub fn invalid_request() -> Self {
        Self {
            code: -32600,
            message: "INVALID_REQUEST".to_string(),
            data: None,
        }
    }

    /// Method not found (-32601).
    pub fn method_not_found(method: &str) -> Self {
        Self {
            code: -32601,
            message: "METHOD_NOT_FOUND".to_string(),
            data: Some(serde_json::json!({"method": method})),
        }
    }

    /// Invalid params (-32602).
    pub fn invalid_params(detail: &str) -> Self {
        Self::with_detail(-32602, "INVALID_PARAMS", detail)
    }

    /// Internal error (-32603).
    pub fn internal_error(detail: &str) -> Self {
        Self::with_detail(-32603, "INTERNAL_ERROR", detail)
    }

    // Application errors

    /// Caller is not an operator (-32010).
    pub fn not_operator(user: UserId) -> Self {
        Self {
            code: -32010,
            message: "NOT_OPERATOR".to_string(),
            data: Some(serde_json::json!({"user_id": user})),
        }
    }

    /// Unknown user or record (-32011).
    pub fn not_found(detail: &str) -> Self {
        Self::with_detail(-32011, "NOT_FOUND", detail)
    }

    /// Request conflicts with the current wave or ticket state (-32020).
    pub fn conflict(detail: &str) -> Self {
        Self::with_detail(-32020, "CONFLICT", detail)
    }

    /// Not enough tickets to confirm a wave (-32021).
    pub fn insufficient_tickets(available: u64, recipients: u64) -> Self {
        Self {
            code: -32021,
            message: "INSUFFICIENT_TICKETS".to_string(),
            data: Some(serde_json::json!({"available": available, "recipients": recipients})),
        }
    }

    /// Recipient already has a ticket for this wave (-32022).
    pub fn already_received(user: UserId) -> Self {
        Self {
            code: -32022,
            message: "ALREADY_RECEIVED".to_string(),
            data: Some(serde_json::json!({"user_id": user})),
        }
    }

    /// Another delivery is running (-32023).
    pub fn delivery_busy() -> Self {
        Self {
            code: -32023,
            message: "DELIVERY_IN_PROGRESS".to_string(),
            data: None,
        }
    }

    /// Invite code refused (-32040). `data` carries the reason.
    pub fn invite_refused(outcome: &Redemption) -> Self {
        Self {
            code: -32040,
            message: "INVITE_REFUSED".to_string(),
            data: serde_json::to_value(outcome).ok(),
        }
    }

    /// Pool has no deliverable ticket (-32030).
    pub fn pool_exhausted() -> Self {
        Self {
            code: -32030,
            message: "POOL_EXHAUSTED".to_string(),
            data: None,
        }
    }
}

impl From<PoolError> for RpcError {
    fn from(e: PoolError) -> Self {
        match e {
            PoolError::Validation(detail) => RpcError::invalid_params(&detail),
            PoolError::InsufficientTickets {
                available,
                recipients,
            } => RpcError::insufficient_tickets(available, recipients),
            e if e.is_not_found() => RpcError::not_found(&e.to_string()),
            e if e.is_conflict() => RpcError::conflict(&e.to_string()),
            e => {
                error!(error = %e, "pool operation failed");
                RpcError::internal_error(&e.to_string())
            }
        }
    }
}

impl From<DeliveryError> for RpcError {
    fn from(e: DeliveryError) -> Self {
        match e {
            DeliveryError::NotActive(_) => RpcError::conflict(&e.to_string()),
            DeliveryError::AlreadyReceived(user) => RpcError::already_received(user),
            DeliveryError::NotRegistered(_) => RpcError::not_found(&e.to_string()),
            DeliveryError::PoolExhausted => RpcError::pool_exhausted(),
            DeliveryError::Pool(e) => e.into(),
        }
    }
}

/// The RPC server.
pub struct RpcServer {
    state: Arc<DaemonState>,
    socket_path: PathBuf,
}

impl RpcServer {
    /// Create a new RPC server.
    pub fn new(state: Arc<DaemonState>, socket_path: PathBuf) -> Self {
        Self { state, socket_path }
    }

    /// Run the server, accepting connections.
    pub async fn run(&self) -> anyhow::Result<()> {
        // Remove stale socket file
        let _ = std::fs::remove_file(&self.socket_path);

        let listener = UnixListener::bind(&self.socket_path)?;
        info!("IPC server listening on {:?}", self.socket_path);

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    let state = self.state.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(state, stream).await {
                            warn!("Connection error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                }
            }
        }
    }
}

/// Handle a single client connection.
async fn handle_connection(
    state: Arc<DaemonState>,
    stream: tokio::net::UnixStream,
) -> anyhow::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            break; // EOF
        }
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<RpcRequest>(&line) {
            Ok(request) => dispatch_request(state.clone(), request).await,
            Err(_) => RpcResponse::error(serde_json::Value::Null, RpcError::parse_error()),
        };

        let mut response_json = serde_json::to_string(&response)?;
        response_json.push('\n');
        writer.write_all(response_json.as_bytes()).await?;
        writer.flush().await?;
    }

    Ok(())
}

/// Methods anyone may call; everything else needs an operator.
fn is_public(method: &str) -> bool {
    matches!(method, "redeem_invite")
}

async fn authorize(state: &DaemonState, params: &serde_json::Value) -> Result<UserId, RpcError> {
    let operator = params
        .get("operator")
        .and_then(|v| v.as_i64())
        .map(UserId)
        .ok_or_else(|| RpcError::invalid_params("operator required"))?;
    if !state.directory.is_admin(operator).await? {
        warn!(user = %operator, "operator command refused");
        return Err(RpcError::not_operator(operator));
    }
    Ok(operator)
}

/// Dispatch a JSON-RPC request to the appropriate command handler.
pub(crate) async fn dispatch_request(state: Arc<DaemonState>, request: RpcRequest) -> RpcResponse {
    let id = request.id.clone();
    if request.jsonrpc != "2.0" {
        return RpcResponse::error(id, RpcError::invalid_request());
    }
    let method = request.method.as_str();
    let params = &request.params;

    debug!("Dispatching RPC method: {}", method);

    if is_public(method) {
        let result = match method {
            "redeem_invite" => commands::invites::redeem_invite(&state, params).await,
            _ => Err(RpcError::method_not_found(method)),
        };
        return respond(id, result);
    }

    let operator = match authorize(&state, params).await {
        Ok(operator) => operator,
        Err(e) => return RpcResponse::error(id, e),
    };

    let result = match method {
        // Wave lifecycle
        "new_wave" => commands::wave::new_wave(&state, operator).await,
        "confirm_wave" => commands::wave::confirm_wave(&state, operator).await,
        "end_wave" => commands::wave::end_wave(&state, operator).await,
        "wave_status" => commands::wave::wave_status(&state).await,
        "list_waves" => commands::wave::list_waves(&state).await,

        // Tickets
        "begin_upload" => commands::tickets::begin_upload(&state, operator, params).await,
        "upload_tickets" => commands::tickets::upload_tickets(&state, operator, params).await,
        "list_tickets" => commands::tickets::list_tickets(&state).await,
        "ticket_stats" => commands::tickets::ticket_stats(&state, params).await,
        "archive_missing" => commands::tickets::archive_missing(&state).await,

        // Delivery
        "send_tickets" => commands::delivery::send_tickets(&state, operator).await,
        "force_give" => commands::delivery::force_give(&state, operator, params).await,
        "list_failed" => commands::delivery::list_failed(&state).await,
        "broadcast" => commands::delivery::broadcast(&state, operator, params).await,

        // Users, invites & operators
        "register_user" => commands::users::register_user(&state, params).await,
        "generate_invites" => commands::invites::generate_invites(&state, operator, params).await,
        "invite_stats" => commands::invites::invite_stats(&state).await,
        "list_users" => commands::users::list_users(&state).await,
        "grant_admin" => commands::users::grant_admin(&state, operator, params).await,
        "revoke_admin" => commands::users::revoke_admin(&state, operator, params).await,

        // Events
        "recent_events" => commands::events::recent_events(&state, params).await,

        _ => Err(RpcError::method_not_found(method)),
    };

    respond(id, result)
}

fn respond(id: serde_json::Value, result: Result<serde_json::Value, RpcError>) -> RpcResponse {
    match result {
        Ok(value) => RpcResponse::success(id, value),
        Err(err) => RpcResponse::error(id, err),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;
    use crate::testutil::{daemon, OPERATOR};

    async fn call(state: &Arc<DaemonState>, method: &str, params: Value) -> RpcResponse {
        let request = RpcRequest {
            jsonrpc: "2.0".to_string(),
            id: json!(1),
            method: method.to_string(),
            params,
        };
        dispatch_request(state.clone(), request).await
    }

    async fn ok(state: &Arc<DaemonState>, method: &str, mut params: Value) -> Value {
        params["operator"] = json!(OPERATOR);
        let resp = call(state, method, params).await;
        assert!(resp.error.is_none(), "{method} failed: {:?}", resp.error);
        resp.result.expect("result")
    }

    async fn err(state: &Arc<DaemonState>, method: &str, mut params: Value) -> RpcError {
        params["operator"] = json!(OPERATOR);
        call(state, method, params).await.error.expect("error")
    }

    fn write_bundle(dir: &std::path::Path, files: &[(&str, &[u8])]) {
        std::fs::create_dir_all(dir).expect("mkdir");
        for (name, data) in files {
            std::fs::write(dir.join(name), data).expect("write");
        }
    }

    #[test]
    fn test_rpc_error_codes() {
        let err = RpcError::not_operator(UserId(5));
        assert_eq!(err.code, -32010);
        assert_eq!(err.message, "NOT_OPERATOR");

        let err = RpcError::insufficient_tickets(1, 2);
        assert_eq!(err.code, -32021);

        let err = RpcError::method_not_found("unknown");
        assert_eq!(err.code, -32601);
    }

    #[test]
    fn test_pool_error_mapping() {
        let err: RpcError = PoolError::Validation("bad".to_string()).into();
        assert_eq!(err.code, -32602);

        let err: RpcError = PoolError::WaveNotRunning.into();
        assert_eq!(err.code, -32020);

        let err: RpcError = DeliveryError::PoolExhausted.into();
        assert_eq!(err.code, -32030);
    }

    #[test]
    fn test_rpc_response_success() {
        let resp = RpcResponse::success(json!(1), json!({"sent": 2}));
        assert!(resp.result.is_some());
        assert!(resp.error.is_none());
    }

    #[tokio::test]
    async fn test_operator_commands_require_admin() {
        let d = daemon().await;
        let resp = call(&d.state, "wave_status", json!({})).await;
        assert_eq!(resp.error.map(|e| e.code), Some(-32602));

        let resp = call(&d.state, "wave_status", json!({"operator": 77})).await;
        assert_eq!(resp.error.map(|e| e.code), Some(-32010));

        let resp = call(&d.state, "register_user", json!({"user_id": 77, "username": "@eve"})).await;
        assert_eq!(resp.error.map(|e| e.code), Some(-32602));

        // Redeeming an invite needs no operator; a bad code is refused, not unauthorized.
        let resp = call(&d.state, "redeem_invite", json!({"user_id": 77, "username": "eve", "code": "inv_zz"})).await;
        assert_eq!(resp.error.map(|e| e.code), Some(-32040));
    }

    #[tokio::test]
    async fn test_unknown_method_and_bad_version() {
        let d = daemon().await;
        let e = err(&d.state, "frobnicate", json!({})).await;
        assert_eq!(e.code, -32601);

        let request = RpcRequest {
            jsonrpc: "1.0".to_string(),
            id: json!(9),
            method: "wave_status".to_string(),
            params: json!({"operator": OPERATOR}),
        };
        let resp = dispatch_request(d.state.clone(), request).await;
        assert_eq!(resp.error.map(|e| e.code), Some(-32600));
    }

    #[tokio::test]
    async fn test_full_wave_over_rpc() {
        let d = daemon().await;
        let state = &d.state;
        let invites = ok(state, "generate_invites", json!({"count": 2})).await;
        for (i, (id, name)) in [(100, "alice"), (101, "bob")].into_iter().enumerate() {
            let code = invites["codes"][i].clone();
            let resp = call(state, "redeem_invite", json!({"user_id": id, "username": name, "code": code})).await;
            assert!(resp.error.is_none(), "{:?}", resp.error);
        }
        let stats = ok(state, "invite_stats", json!({})).await;
        assert_eq!(stats, json!({"total": 2, "unused": 0}));

        let prep = ok(state, "new_wave", json!({})).await;
        assert!(prep.get("prepared_at").is_some());

        // Upload without announcing it first.
        let bundle = d._dir.path().join("bundle");
        write_bundle(&bundle, &[("a.pdf", b"one"), ("b.pdf", b"two"), ("c.pdf", b"three"), ("x.txt", b"no")]);
        let e = err(state, "upload_tickets", json!({"dir": bundle})).await;
        assert_eq!(e.code, -32602);

        ok(state, "begin_upload", json!({"mode": "replace"})).await;
        let report = ok(state, "upload_tickets", json!({"dir": bundle})).await;
        assert_eq!(report["added"].as_array().map(Vec::len), Some(3));
        assert_eq!(report["rejected_format"].as_array().map(Vec::len), Some(1));

        let confirmed = ok(state, "confirm_wave", json!({})).await;
        assert_eq!(confirmed["tickets_bound"], json!(3));
        assert_eq!(confirmed["recipients"], json!(2));

        let sent = ok(state, "send_tickets", json!({})).await;
        assert_eq!(sent["sent"], json!(2));
        assert_eq!(sent["still_pending"], json!(0));

        let outbox = state.config.outbox_dir();
        assert!(outbox.join("100").is_dir());
        assert!(outbox.join("101").is_dir());

        let e = err(state, "force_give", json!({"user": "@alice"})).await;
        assert_eq!(e.code, -32022);

        let stats = ok(state, "ticket_stats", json!({})).await;
        assert_eq!(stats["stats"]["issued"], json!(2));
        assert_eq!(stats["stats"]["free"], json!(1));
        assert_eq!(stats["wave"]["id"], stats["wave_id"]);
        assert_eq!(stats["wave"]["created_by"], json!(OPERATOR));

        let e = err(state, "ticket_stats", json!({"wave_id": 999})).await;
        assert_eq!(e.code, -32011);

        let ended = ok(state, "end_wave", json!({})).await;
        assert_eq!(ended["ended"], json!("finished"));

        let waves = ok(state, "list_waves", json!({})).await;
        assert_eq!(waves.as_array().map(Vec::len), Some(1));

        let events = ok(state, "recent_events", json!({"category": "wave"})).await;
        let types: Vec<_> = events["events"]
            .as_array()
            .expect("events")
            .iter()
            .filter_map(|e| e["event_type"].as_str())
            .collect();
        assert_eq!(types, vec!["WavePreparing", "WaveActivated", "WaveEnded"]);
    }

    #[tokio::test]
    async fn test_confirm_without_enough_tickets() {
        let d = daemon().await;
        let state = &d.state;
        ok(state, "register_user", json!({"user_id": 100})).await;
        ok(state, "register_user", json!({"user_id": 101})).await;
        ok(state, "new_wave", json!({})).await;

        let bundle = d._dir.path().join("one");
        write_bundle(&bundle, &[("a.pdf", b"only")]);
        ok(state, "begin_upload", json!({"mode": "add"})).await;
        ok(state, "upload_tickets", json!({"dir": bundle})).await;

        let e = err(state, "confirm_wave", json!({})).await;
        assert_eq!(e.code, -32021);
        assert_eq!(e.data, Some(json!({"available": 1, "recipients": 2})));

        let status = ok(state, "wave_status", json!({})).await;
        assert_eq!(status["state"]["status"], json!("preparing"));
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_user() {
        let d = daemon().await;
        let state = &d.state;
        ok(state, "register_user", json!({"user_id": 100, "username": "alice"})).await;
        ok(state, "register_user", json!({"user_id": 101, "username": "bob"})).await;

        let e = err(state, "broadcast", json!({"text": "   "})).await;
        assert_eq!(e.code, -32602);

        let report = ok(state, "broadcast", json!({"text": "Doors open at 7"})).await;
        assert_eq!(report, json!({"recipients": 2, "sent": 2, "failed": 0}));

        let log = std::fs::read_to_string(state.config.outbox_dir().join("101").join("messages.log"))
            .expect("message log");
        assert!(log.ends_with("Doors open at 7\n"));

        let events = ok(state, "recent_events", json!({"category": "delivery"})).await;
        assert_eq!(events["events"][0]["event_type"], json!("BroadcastSent"));
    }

    #[tokio::test]
    async fn test_send_requires_active_wave() {
        let d = daemon().await;
        let e = err(&d.state, "send_tickets", json!({})).await;
        assert_eq!(e.code, -32020);

        let e = err(&d.state, "begin_upload", json!({"mode": "add"})).await;
        assert_eq!(e.code, -32020);

        let e = err(&d.state, "begin_upload", json!({"mode": "merge"})).await;
        assert_eq!(e.code, -32602);
    }
}
