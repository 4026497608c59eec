//! Outbound MCP client.
//!
//! Acquires a bearer token over HTTP, opens the duplex WebSocket, and
//! multiplexes concurrent requests over it. Correlation is purely
//! identifier-based: every outbound request gets the next id in a
//! per-session counter, and the read loop resolves whichever pending call
//! the response's id names, regardless of arrival order.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex};
use tokio_tungstenite::{
    connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};

use crate::auth::TokenResponse;
use crate::config::PROTOCOL_VERSION;
use crate::error::{BridgeError, Result};
use crate::mcp::protocol::{JsonRpcRequest, JsonRpcResponse, JSONRPC_VERSION};

/// Default window before an in-flight request is abandoned
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Final outcome delivered to a pending call, already reduced to a
/// resolution value or a rejection message
type PendingResult = std::result::Result<Value, String>;

struct ClientShared {
    pending: Mutex<HashMap<u64, oneshot::Sender<PendingResult>>>,
}

/// Envelope the token endpoint wraps its payload in
#[derive(Debug, Deserialize)]
struct TokenEnvelope {
    success: bool,
    data: Option<TokenResponse>,
    message: Option<String>,
}

pub struct McpClient {
    base_url: String,
    ws_url: String,
    client_id: String,
    scope: Vec<String>,
    request_timeout: Duration,
    next_id: AtomicU64,
    access_token: Option<String>,
    writer: Option<Mutex<WsSink>>,
    shared: Arc<ClientShared>,
}

impl McpClient {
    /// Create a client for a bridge at `base_url` (http/https); the
    /// WebSocket URL is derived from it plus the given path.
    pub fn new(base_url: impl Into<String>, ws_path: &str, client_id: impl Into<String>) -> Self {
        let base_url = base_url.into();
        let ws_url = format!(
            "{}{}",
            base_url
                .replacen("https://", "wss://", 1)
                .replacen("http://", "ws://", 1),
            ws_path
        );

        Self {
            base_url,
            ws_url,
            client_id: client_id.into(),
            scope: Vec::new(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            next_id: AtomicU64::new(0),
            access_token: None,
            writer: None,
            shared: Arc::new(ClientShared {
                pending: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Restrict the requested token scope (default: the client's full ceiling)
    pub fn with_scope(mut self, scope: Vec<String>) -> Self {
        self.scope = scope;
        self
    }

    /// Override the per-request timeout (tests use short windows)
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Authenticate out of band, open the WebSocket, and complete the
    /// `initialize` handshake. The acquired token rides along in the
    /// handshake params so the server authenticates the connection up
    /// front. Returns the handshake result.
    pub async fn connect(&mut self) -> Result<Value> {
        self.authenticate().await?;
        self.open_transport().await?;

        let mut params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": "campaign-mcp client",
                "version": env!("CARGO_PKG_VERSION"),
            }
        });
        if let Some(token) = &self.access_token {
            params["auth"] = json!({ "token": token });
        }

        self.send_request("initialize", params).await
    }

    /// Open the WebSocket without acquiring a token first. Useful against
    /// bridges running with auth disabled.
    pub async fn connect_unauthenticated(&mut self) -> Result<Value> {
        self.open_transport().await?;
        self.send_request(
            "initialize",
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {
                    "name": "campaign-mcp client",
                    "version": env!("CARGO_PKG_VERSION"),
                }
            }),
        )
        .await
    }

    async fn authenticate(&mut self) -> Result<()> {
        let url = format!("{}/api/v1/mcp/auth/token", self.base_url);
        tracing::debug!("Requesting token from {}", url);

        let mut body = json!({ "client_id": self.client_id });
        if !self.scope.is_empty() {
            body["scope"] = json!(self.scope);
        }

        let envelope: TokenEnvelope = reqwest::Client::new()
            .post(&url)
            .json(&body)
            .send()
            .await?
            .json()
            .await?;

        if !envelope.success {
            return Err(BridgeError::AuthFailed(
                envelope
                    .message
                    .unwrap_or_else(|| "token issuance rejected".to_string()),
            ));
        }

        let token = envelope
            .data
            .ok_or_else(|| BridgeError::AuthFailed("empty token response".to_string()))?;
        tracing::debug!("Authenticated, scope: {:?}", token.scope);
        self.access_token = Some(token.access_token);
        Ok(())
    }

    async fn open_transport(&mut self) -> Result<()> {
        let (ws_stream, _) = connect_async(&self.ws_url).await?;
        tracing::debug!("Connected to {}", self.ws_url);

        let (sink, source) = ws_stream.split();
        self.writer = Some(Mutex::new(sink));

        let shared = self.shared.clone();
        tokio::spawn(read_loop(source, shared));
        Ok(())
    }

    /// Send a request and await its correlated response. The session token
    /// rides along in `params.auth` for every method except `initialize`,
    /// where `connect()` embeds it in the handshake params itself.
    /// Times out after the configured window; a response arriving after the
    /// timeout is dropped.
    pub async fn send_request(&self, method: &str, params: Value) -> Result<Value> {
        let writer = self
            .writer
            .as_ref()
            .ok_or_else(|| BridgeError::TransportError("not connected".to_string()))?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;

        let mut params = params;
        if method != "initialize" {
            if let Some(token) = &self.access_token {
                params = attach_auth(method, params, token);
            }
        }

        let frame = JsonRpcRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(json!(id)),
            method: method.to_string(),
            params: Some(params),
        };

        let (done_tx, done_rx) = oneshot::channel();
        self.shared.pending.lock().await.insert(id, done_tx);

        let text = serde_json::to_string(&frame)?;
        {
            let mut sink = writer.lock().await;
            if let Err(e) = sink.send(Message::Text(text)).await {
                self.shared.pending.lock().await.remove(&id);
                return Err(e.into());
            }
        }

        match tokio::time::timeout(self.request_timeout, done_rx).await {
            Ok(Ok(Ok(result))) => Ok(result),
            Ok(Ok(Err(message))) => Err(BridgeError::RpcError(message)),
            Ok(Err(_)) => Err(BridgeError::TransportError(
                "connection closed".to_string(),
            )),
            Err(_) => {
                // Abandon the call; the read loop will drop any late arrival
                self.shared.pending.lock().await.remove(&id);
                Err(BridgeError::RequestTimeout(method.to_string()))
            },
        }
    }

    /// `tools/list` convenience wrapper
    pub async fn list_tools(&self) -> Result<Value> {
        self.send_request("tools/list", json!({})).await
    }

    /// `tools/call` convenience wrapper
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value> {
        self.send_request("tools/call", json!({ "name": name, "arguments": arguments }))
            .await
    }

    /// Close the transport. In-flight requests are rejected by the read
    /// loop when the peer acknowledges the close.
    pub async fn close(&self) -> Result<()> {
        if let Some(writer) = &self.writer {
            writer.lock().await.send(Message::Close(None)).await?;
        }
        Ok(())
    }
}

async fn read_loop(mut source: WsSource, shared: Arc<ClientShared>) {
    while let Some(message) = source.next().await {
        match message {
            Ok(Message::Text(text)) => {
                let response: JsonRpcResponse = match serde_json::from_str(&text) {
                    Ok(response) => response,
                    Err(e) => {
                        tracing::warn!("Failed to parse frame from server: {}", e);
                        continue;
                    },
                };

                let Some(id) = response.id.as_ref().and_then(|v| v.as_u64()) else {
                    tracing::debug!("Dropping frame without a numeric id");
                    continue;
                };

                // Removing the entry is what guarantees at-most-once
                // resolution; a timed-out call is already gone
                let Some(sender) = shared.pending.lock().await.remove(&id) else {
                    tracing::debug!("Dropping response for unknown id {}", id);
                    continue;
                };

                let outcome = match response.error {
                    Some(error) => Err(format!("{} ({})", error.message, error.code)),
                    None => Ok(response.result.unwrap_or(Value::Null)),
                };
                let _ = sender.send(outcome);
            },
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {},
        }
    }

    // Transport gone: reject everything still in flight
    let mut pending = shared.pending.lock().await;
    for (_, sender) in pending.drain() {
        let _ = sender.send(Err("connection closed".to_string()));
    }
    tracing::debug!("Client read loop ended");
}

/// Insert the session token into a request's params. Null params are
/// promoted to an object so the token is never dropped; other non-object
/// shapes cannot carry it and are logged.
fn attach_auth(method: &str, params: Value, token: &str) -> Value {
    match params {
        Value::Object(mut map) => {
            map.insert("auth".to_string(), json!({ "token": token }));
            Value::Object(map)
        },
        Value::Null => json!({ "auth": { "token": token } }),
        other => {
            tracing::warn!(
                "Params for {} are not a JSON object; session token not attached",
                method
            );
            other
        },
    }
}
