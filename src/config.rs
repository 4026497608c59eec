//! Bridge configuration loaded from environment variables with defaults
//! suitable for local development.

use serde::Serialize;
use std::collections::HashMap;
use std::env;

/// Fixed protocol version negotiated during the MCP handshake
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Server identity reported in the initialize result
pub const SERVER_NAME: &str = "Campaign Performance MCP Server";

/// Default permission ceiling granted to known clients
pub const DEFAULT_PERMISSIONS: &[&str] = &[
    "campaigns:read",
    "metrics:read",
    "exports:create",
    "health:read",
];

/// Authentication settings
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Whether token validation is enforced during the handshake
    pub enabled: bool,
    /// HS256 signing secret
    pub jwt_secret: String,
    /// Token lifetime in seconds
    pub token_expiry_secs: u64,
    /// Client ids allowed to request tokens ("*" allows any)
    pub allowed_clients: Vec<String>,
}

/// Top-level bridge configuration
#[derive(Debug, Clone)]
pub struct McpConfig {
    pub host: String,
    pub port: u16,
    /// WebSocket upgrade path
    pub path: String,
    pub auth: AuthConfig,
    /// Known client ids and their permission ceilings
    pub clients: HashMap<String, Vec<String>>,
}

/// Summary of the non-secret parts of the config, for the info endpoint
#[derive(Debug, Serialize)]
pub struct ConfigSummary {
    pub path: String,
    pub auth_enabled: bool,
    pub allowed_clients: Vec<String>,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl McpConfig {
    /// Load configuration from `MCP_*` environment variables
    pub fn from_env() -> Self {
        let host = env::var("MCP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("MCP_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);
        let path = env::var("MCP_PATH").unwrap_or_else(|_| "/mcp".to_string());

        let auth = AuthConfig {
            enabled: env::var("MCP_AUTH_ENABLED").as_deref() != Ok("false"),
            jwt_secret: env::var("MCP_JWT_SECRET")
                .unwrap_or_else(|_| "default-secret-change-in-production".to_string()),
            token_expiry_secs: env::var("MCP_TOKEN_EXPIRY_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(24 * 60 * 60),
            allowed_clients: env::var("MCP_ALLOWED_CLIENTS")
                .map(|v| v.split(',').map(|c| c.trim().to_string()).collect())
                .unwrap_or_else(|_| {
                    ["claude", "chatgpt", "cursor", "vscode", "continue"]
                        .iter()
                        .map(|s| s.to_string())
                        .collect()
                }),
        };

        let default_permissions: Vec<String> =
            DEFAULT_PERMISSIONS.iter().map(|s| s.to_string()).collect();
        let clients = auth
            .allowed_clients
            .iter()
            .map(|c| (c.clone(), default_permissions.clone()))
            .collect();

        Self {
            host,
            port,
            path,
            auth,
            clients,
        }
    }

    /// Permission ceiling for a client id, falling back to the defaults
    pub fn client_permissions(&self, client_id: &str) -> Vec<String> {
        self.clients
            .get(client_id)
            .cloned()
            .unwrap_or_else(|| DEFAULT_PERMISSIONS.iter().map(|s| s.to_string()).collect())
    }

    pub fn summary(&self) -> ConfigSummary {
        ConfigSummary {
            path: self.path.clone(),
            auth_enabled: self.auth.enabled,
            allowed_clients: self.auth.allowed_clients.clone(),
        }
    }

    /// Validate the configuration, returning human-readable problems
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.port == 0 {
            errors.push("MCP_PORT must be between 1 and 65535".to_string());
        }
        if self.auth.enabled && self.auth.jwt_secret == "default-secret-change-in-production" {
            errors.push(
                "Default JWT secret in use with auth enabled - set MCP_JWT_SECRET".to_string(),
            );
        }
        if self.auth.token_expiry_secs == 0 {
            errors.push("MCP_TOKEN_EXPIRY_SECS must be at least 1".to_string());
        }

        errors
    }
}
