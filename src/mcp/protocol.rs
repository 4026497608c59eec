//! JSON-RPC 2.0 wire frames for the MCP bridge.
//!
//! One JSON object per WebSocket text message. A frame with a `method` is a
//! request when it carries an `id` and a notification when it does not; a
//! frame with `result` or `error` is a response to a prior request.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC error codes, extended with the bridge's auth/timeout namespace
pub mod error_codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
    pub const UNAUTHORIZED: i32 = -32001;
    pub const FORBIDDEN: i32 = -32002;
    pub const NOT_FOUND: i32 = -32003;
    pub const TIMEOUT: i32 = -32004;
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    /// Absent for notifications
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

/// Classified inbound frame
#[derive(Debug)]
pub enum Frame {
    Request(JsonRpcRequest),
    Notification(JsonRpcRequest),
    Response(JsonRpcResponse),
}

/// Classify a raw text message into a frame kind. A frame with a method is a
/// request or notification depending on its id; anything carrying result or
/// error is a response.
pub fn classify_frame(raw: &str) -> Result<Frame, serde_json::Error> {
    let value: Value = serde_json::from_str(raw)?;

    if value.get("method").is_some() {
        let request: JsonRpcRequest = serde_json::from_value(value)?;
        if request.is_notification() {
            Ok(Frame::Notification(request))
        } else {
            Ok(Frame::Request(request))
        }
    } else {
        let response: JsonRpcResponse = serde_json::from_value(value)?;
        Ok(Frame::Response(response))
    }
}

/// Best-effort id recovery from a frame that failed to parse, so a ParseError
/// response can still be addressed. Returns None when no id is recoverable,
/// in which case the garbage is dropped without a reply.
pub fn recover_id(raw: &str) -> Option<Value> {
    let value: Value = serde_json::from_str(raw).ok()?;
    let id = value.get("id")?;
    match id {
        Value::String(_) | Value::Number(_) => Some(id.clone()),
        _ => None,
    }
}

// Handshake types

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    #[serde(default)]
    pub protocol_version: Option<String>,
    #[serde(default)]
    pub capabilities: Option<Value>,
    #[serde(default)]
    pub client_info: Option<ClientInfo>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    pub capabilities: Value,
    pub server_info: ServerInfo,
}

// Tool invocation types

#[derive(Debug, Clone, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

#[derive(Debug, Deserialize)]
pub struct ToolCallParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

/// Outcome of a tool execution. Application-level failures set `is_error`;
/// they are never surfaced as protocol faults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub content: Vec<ContentBlock>,
    #[serde(rename = "isError", skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl ToolResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock {
                kind: "text".to_string(),
                text: text.into(),
            }],
            is_error: None,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock {
                kind: "text".to_string(),
                text: text.into(),
            }],
            is_error: Some(true),
        }
    }
}

/// Pull the bearer token out of a request's `params.auth.token`, where
/// clients embed it for every method except `initialize`.
pub fn extract_auth_token(params: &Option<Value>) -> Option<String> {
    params
        .as_ref()?
        .get("auth")?
        .get("token")?
        .as_str()
        .map(|s| s.to_string())
}
