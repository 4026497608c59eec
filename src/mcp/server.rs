//! MCP bridge server.
//!
//! Owns the duplex WebSocket transport and the HTTP surface beside it. Each
//! accepted socket gets a connection record, a sender task, and a receive
//! loop that classifies inbound frames and drives the dispatch table.
//! Notifications never produce a response frame; responses addressed to no
//! pending request are dropped on the floor.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::{HeaderMap, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::auth::{AuthService, ConnectionUpdate};
use crate::campaign::CampaignDataProvider;
use crate::config::{McpConfig, PROTOCOL_VERSION, SERVER_NAME};
use crate::mcp::protocol::{
    classify_frame, error_codes, extract_auth_token, recover_id, Frame, InitializeParams,
    InitializeResult, JsonRpcRequest, JsonRpcResponse, ServerInfo, ToolCallParams,
};
use crate::mcp::tools::ToolRegistry;

/// Interval between subject/connection sweeps
const SWEEP_INTERVAL_SECS: u64 = 60 * 60;

/// Shared server state
#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<AuthService>,
    pub tools: Arc<ToolRegistry>,
    pub config: Arc<McpConfig>,
}

/// MCP bridge server instance
pub struct McpServer {
    state: AppState,
}

/// Uniform REST envelope used by the HTTP surface
#[derive(Debug, Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            message: None,
        }
    }

    fn fail(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenRequestBody {
    client_id: Option<String>,
    scope: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct ValidateRequestBody {
    token: Option<String>,
}

impl McpServer {
    pub fn new(config: McpConfig, provider: Arc<dyn CampaignDataProvider>) -> Self {
        let state = AppState {
            auth: Arc::new(AuthService::new(config.clone())),
            tools: Arc::new(ToolRegistry::new(provider)),
            config: Arc::new(config),
        };
        Self { state }
    }

    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Build the router: WebSocket upgrade at the configured path plus the
    /// REST surface for token issuance and introspection.
    pub fn router(&self) -> Router {
        let api_routes = Router::new()
            .route("/auth/token", post(issue_token_handler))
            .route("/auth/validate", post(validate_token_handler))
            .route("/info", get(info_handler))
            .route("/health", get(health_handler));

        Router::new()
            .route(&self.state.config.path, get(ws_upgrade_handler))
            .nest("/api/v1/mcp", api_routes)
            .with_state(self.state.clone())
            .layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods([Method::GET, Method::POST])
                    .allow_headers(Any),
            )
            .layer(TraceLayer::new_for_http())
    }

    /// Serve on an already-bound listener. Spawns the background sweep task
    /// before accepting traffic.
    pub async fn serve(self, listener: tokio::net::TcpListener) -> anyhow::Result<()> {
        let auth = self.state.auth.clone();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(SWEEP_INTERVAL_SECS));
            interval.tick().await; // first tick fires immediately, skip it
            loop {
                interval.tick().await;
                auth.sweep().await;
            }
        });

        let addr = listener.local_addr()?;
        tracing::info!(
            "MCP bridge listening on {} (ws path {})",
            addr,
            self.state.config.path
        );

        axum::serve(listener, self.router()).await?;
        Ok(())
    }

    /// Bind to the configured host/port and serve
    pub async fn run(self) -> anyhow::Result<()> {
        let addr = format!("{}:{}", self.state.config.host, self.state.config.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        self.serve(listener).await
    }
}

async fn ws_upgrade_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let connection = state.auth.create_connection().await;
    let connection_id = connection.id.clone();
    tracing::info!("New MCP connection: {}", connection_id);

    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Message>();

    // Forward outbound frames from the channel to the socket
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    let recv_state = state.clone();
    let recv_connection_id = connection_id.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    if let Some(response) =
                        process_message(&recv_state, &recv_connection_id, &text).await
                    {
                        match serde_json::to_string(&response) {
                            Ok(frame) => {
                                if tx.send(Message::Text(frame)).is_err() {
                                    break;
                                }
                            },
                            Err(e) => {
                                tracing::error!(
                                    "[{}] Failed to serialize response: {}",
                                    recv_connection_id,
                                    e
                                );
                            },
                        }
                    }
                },
                Message::Close(_) => {
                    break;
                },
                _ => {},
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => {
            recv_task.abort();
        }
        _ = (&mut recv_task) => {
            send_task.abort();
        }
    }

    state.auth.remove_connection(&connection_id).await;
    tracing::info!("MCP connection closed: {}", connection_id);
}

/// Classify one raw inbound message and produce at most one response frame.
/// Parse failures are answered only when an id is recoverable from the raw
/// text; otherwise the garbage is dropped without a reply.
pub(crate) async fn process_message(
    state: &AppState,
    connection_id: &str,
    raw: &str,
) -> Option<JsonRpcResponse> {
    match classify_frame(raw) {
        Ok(Frame::Request(request)) => {
            Some(handle_request(state, connection_id, request).await)
        },
        Ok(Frame::Notification(notification)) => {
            handle_notification(connection_id, &notification).await;
            None
        },
        Ok(Frame::Response(_)) => {
            // The server issues no requests, so any response frame from the
            // peer has nothing pending to match
            tracing::debug!("[{}] Dropping unsolicited response frame", connection_id);
            None
        },
        Err(e) => {
            tracing::warn!("[{}] Failed to parse message: {}", connection_id, e);
            let id = recover_id(raw)?;
            Some(JsonRpcResponse::error(
                Some(id),
                error_codes::PARSE_ERROR,
                "Failed to parse message",
            ))
        },
    }
}

async fn handle_request(
    state: &AppState,
    connection_id: &str,
    request: JsonRpcRequest,
) -> JsonRpcResponse {
    let id = request.id.clone();
    let outcome = match request.method.as_str() {
        "initialize" => handle_initialize(state, connection_id, &request).await,
        "tools/list" => handle_tools_list(state),
        "tools/call" => handle_tools_call(state, connection_id, &request).await,
        "resources/list" => Ok(json!({ "resources": [] })),
        "prompts/list" => Ok(json!({ "prompts": [] })),
        _ => Err((
            error_codes::METHOD_NOT_FOUND,
            format!("Unknown method: {}", request.method),
        )),
    };

    match outcome {
        Ok(result) => JsonRpcResponse::success(id, result),
        Err((code, message)) => JsonRpcResponse::error(id, code, message),
    }
}

async fn handle_notification(connection_id: &str, notification: &JsonRpcRequest) {
    match notification.method.as_str() {
        "notifications/initialized" => {
            tracing::info!("[{}] Client initialized", connection_id);
        },
        other => {
            tracing::debug!("[{}] Notification: {}", connection_id, other);
        },
    }
}

/// Handshake. When auth is enabled the token may ride along in the params;
/// a failed validation logs and admits the connection unauthenticated rather
/// than dropping it, so clients that only send tokens with later requests
/// still get through.
async fn handle_initialize(
    state: &AppState,
    connection_id: &str,
    request: &JsonRpcRequest,
) -> Result<Value, (i32, String)> {
    if state.config.auth.enabled {
        match extract_auth_token(&request.params) {
            Some(token) => match state.auth.validate(&token).await {
                Some(subject) => {
                    state
                        .auth
                        .update_connection(
                            connection_id,
                            ConnectionUpdate {
                                authenticated: Some(true),
                                subject_id: Some(subject.id.clone()),
                                permissions: Some(subject.permissions.clone()),
                                ..Default::default()
                            },
                        )
                        .await;
                    tracing::info!(
                        "[{}] Subject {} authenticated during handshake",
                        connection_id,
                        subject.id
                    );
                },
                None => {
                    tracing::warn!(
                        "[{}] Handshake token invalid, admitting unauthenticated",
                        connection_id
                    );
                },
            },
            None => {
                tracing::warn!(
                    "[{}] No handshake token, admitting unauthenticated",
                    connection_id
                );
            },
        }
    }

    let params: InitializeParams = match &request.params {
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|e| (error_codes::INVALID_PARAMS, format!("Invalid parameters: {}", e)))?,
        None => InitializeParams {
            protocol_version: None,
            capabilities: None,
            client_info: None,
        },
    };

    // Repeat handshakes overwrite the recorded peer info; auth state carries
    // over. Version mismatches are not rejected.
    state
        .auth
        .update_connection(
            connection_id,
            ConnectionUpdate {
                client_info: params
                    .client_info
                    .as_ref()
                    .map(|c| serde_json::to_value(c).unwrap_or(Value::Null)),
                capabilities: params.capabilities.clone(),
                ..Default::default()
            },
        )
        .await;

    let result = InitializeResult {
        protocol_version: PROTOCOL_VERSION.to_string(),
        capabilities: json!({
            "tools": { "listChanged": false },
            "logging": {}
        }),
        server_info: ServerInfo {
            name: SERVER_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
    };

    serde_json::to_value(result)
        .map_err(|e| (error_codes::INTERNAL_ERROR, e.to_string()))
}

fn handle_tools_list(state: &AppState) -> Result<Value, (i32, String)> {
    Ok(json!({ "tools": state.tools.list() }))
}

async fn handle_tools_call(
    state: &AppState,
    connection_id: &str,
    request: &JsonRpcRequest,
) -> Result<Value, (i32, String)> {
    let params: ToolCallParams = match &request.params {
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|e| (error_codes::INVALID_PARAMS, format!("Invalid parameters: {}", e)))?,
        None => {
            return Err((
                error_codes::INVALID_PARAMS,
                "Missing parameters".to_string(),
            ))
        },
    };

    // Permission checks apply only to connections that actually
    // authenticated; unauthenticated ones pass through under the lenient
    // admission posture.
    if state.config.auth.enabled {
        if let Some(connection) = state.auth.get_connection(connection_id).await {
            if connection.authenticated {
                if let Some(required) = ToolRegistry::required_permission(&params.name) {
                    let granted = connection
                        .permissions
                        .iter()
                        .any(|p| p == required || p == "*");
                    if !granted {
                        return Err((
                            error_codes::FORBIDDEN,
                            format!("Permission '{}' required", required),
                        ));
                    }
                }
            }
        }
    }

    let result = state.tools.execute(&params.name, params.arguments.clone()).await;
    serde_json::to_value(result).map_err(|e| (error_codes::INTERNAL_ERROR, e.to_string()))
}

// HTTP surface

async fn issue_token_handler(
    State(state): State<AppState>,
    Json(body): Json<TokenRequestBody>,
) -> impl IntoResponse {
    let Some(client_id) = body.client_id else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::<Value>::fail(
                "Bad Request",
                "client_id is required",
            )),
        );
    };

    match state.auth.issue(&client_id, body.scope.as_deref()).await {
        Ok(token) => (
            StatusCode::OK,
            Json(ApiResponse::ok(
                serde_json::to_value(token).unwrap_or(Value::Null),
            )),
        ),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::fail(e.to_error_code(), e.to_string())),
        ),
    }
}

async fn validate_token_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ValidateRequestBody>,
) -> impl IntoResponse {
    let token = body.token.or_else(|| {
        headers
            .get("authorization")
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer "))
            .map(|s| s.to_string())
    });

    let Some(token) = token else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::<Value>::fail("Bad Request", "Token is required")),
        );
    };

    match state.auth.validate(&token).await {
        Some(subject) => (
            StatusCode::OK,
            Json(ApiResponse::ok(json!({
                "valid": true,
                "user": {
                    "id": subject.id,
                    "client_id": subject.client_id,
                    "permissions": subject.permissions,
                }
            }))),
        ),
        None => (
            StatusCode::UNAUTHORIZED,
            Json(ApiResponse::fail("Unauthorized", "Invalid or expired token")),
        ),
    }
}

async fn info_handler(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.auth.stats().await;
    Json(ApiResponse::ok(json!({
        "serverInfo": {
            "name": SERVER_NAME,
            "version": env!("CARGO_PKG_VERSION"),
            "protocolVersion": PROTOCOL_VERSION,
        },
        "config": state.config.summary(),
        "validation": state.config.validate(),
        "stats": stats,
    })))
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.auth.stats().await;
    Json(ApiResponse::ok(json!({
        "status": "healthy",
        "stats": stats,
    })))
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
