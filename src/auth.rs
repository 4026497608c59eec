//! Token issuance, validation, and connection tracking.
//!
//! Every issuance creates a fresh subject record; tokens are HS256 JWTs that
//! embed the subject id, the owning client id, and the granted permission set.
//! A structurally valid token whose subject is gone (process restart) is
//! treated as invalid, which doubles as revocation.

use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::McpConfig;
use crate::error::{BridgeError, Result};

/// Subjects idle longer than this are purged by the sweep
const MAX_INACTIVE_SECS: i64 = 24 * 60 * 60;

/// Authenticated identity created per token issuance
#[derive(Debug, Clone)]
pub struct Subject {
    pub id: String,
    pub client_id: String,
    pub permissions: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub last_access_at: DateTime<Utc>,
}

/// JWT claims embedded in issued tokens
#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    client_id: String,
    permissions: Vec<String>,
    iat: usize,
    exp: usize,
}

/// Response body for the token issuance endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
    pub scope: Vec<String>,
}

/// One live duplex connection
#[derive(Debug, Clone, Serialize)]
pub struct Connection {
    pub id: String,
    pub authenticated: bool,
    pub subject_id: Option<String>,
    pub permissions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_info: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<serde_json::Value>,
}

/// Partial update merged into a connection record
#[derive(Debug, Default)]
pub struct ConnectionUpdate {
    pub authenticated: Option<bool>,
    pub subject_id: Option<String>,
    pub permissions: Option<Vec<String>>,
    pub client_info: Option<serde_json::Value>,
    pub capabilities: Option<serde_json::Value>,
}

/// Connection statistics for the health/info endpoints
#[derive(Debug, Serialize)]
pub struct AuthStats {
    pub active_connections: usize,
    pub authenticated_connections: usize,
    pub active_subjects: usize,
}

/// Token service and connection registry
pub struct AuthService {
    config: McpConfig,
    subjects: RwLock<HashMap<String, Subject>>,
    connections: RwLock<HashMap<String, Connection>>,
}

impl AuthService {
    pub fn new(config: McpConfig) -> Self {
        Self {
            config,
            subjects: RwLock::new(HashMap::new()),
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Issue a bearer token for a client, intersecting the requested scope
    /// with the client's configured ceiling. Unknown scope entries are
    /// silently dropped rather than rejected.
    pub async fn issue(&self, client_id: &str, scope: Option<&[String]>) -> Result<TokenResponse> {
        if !self.is_allowed_client(client_id) {
            return Err(BridgeError::ClientNotAllowed(client_id.to_string()));
        }

        let ceiling = self.config.client_permissions(client_id);
        let permissions = match scope {
            Some(requested) if !requested.is_empty() => requested
                .iter()
                .filter(|p| ceiling.contains(p) || ceiling.iter().any(|c| c == "*"))
                .cloned()
                .collect(),
            _ => ceiling,
        };

        let now = Utc::now();
        let expires_in = self.config.auth.token_expiry_secs;
        let subject = Subject {
            id: Uuid::new_v4().to_string(),
            client_id: client_id.to_string(),
            permissions,
            created_at: now,
            last_access_at: now,
        };

        let claims = Claims {
            sub: subject.id.clone(),
            client_id: subject.client_id.clone(),
            permissions: subject.permissions.clone(),
            iat: now.timestamp() as usize,
            exp: (now.timestamp() + expires_in as i64) as usize,
        };

        let access_token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.config.auth.jwt_secret.as_bytes()),
        )?;

        let scope = subject.permissions.clone();
        self.subjects
            .write()
            .await
            .insert(subject.id.clone(), subject);

        Ok(TokenResponse {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in,
            scope,
        })
    }

    /// Validate a token string. Any verification failure yields `None`, as
    /// does a token whose subject no longer exists. Successful validation
    /// refreshes the subject's last-access timestamp.
    pub async fn validate(&self, token: &str) -> Option<Subject> {
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.config.auth.jwt_secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|e| {
            tracing::debug!("Token validation failed: {}", e);
            e
        })
        .ok()?;

        let mut subjects = self.subjects.write().await;
        let subject = subjects.get_mut(&data.claims.sub)?;
        subject.last_access_at = Utc::now();
        Some(subject.clone())
    }

    /// True if the permission is granted or the subject holds a wildcard
    pub fn has_permission(subject: &Subject, permission: &str) -> bool {
        subject.permissions.iter().any(|p| p == permission || p == "*")
    }

    fn is_allowed_client(&self, client_id: &str) -> bool {
        self.config
            .auth
            .allowed_clients
            .iter()
            .any(|c| c == client_id || c == "*")
    }

    /// Register a new connection in the unauthenticated state
    pub async fn create_connection(&self) -> Connection {
        let connection = Connection {
            id: Uuid::new_v4().to_string(),
            authenticated: false,
            subject_id: None,
            permissions: Vec::new(),
            client_info: None,
            capabilities: None,
        };

        self.connections
            .write()
            .await
            .insert(connection.id.clone(), connection.clone());
        connection
    }

    pub async fn get_connection(&self, id: &str) -> Option<Connection> {
        self.connections.read().await.get(id).cloned()
    }

    /// Merge a partial update into the connection record. Unknown ids are a
    /// no-op (the connection may have raced its own removal).
    pub async fn update_connection(&self, id: &str, update: ConnectionUpdate) {
        let mut connections = self.connections.write().await;
        if let Some(connection) = connections.get_mut(id) {
            if let Some(authenticated) = update.authenticated {
                connection.authenticated = authenticated;
            }
            if let Some(subject_id) = update.subject_id {
                connection.subject_id = Some(subject_id);
            }
            if let Some(permissions) = update.permissions {
                connection.permissions = permissions;
            }
            if let Some(client_info) = update.client_info {
                connection.client_info = Some(client_info);
            }
            if let Some(capabilities) = update.capabilities {
                connection.capabilities = Some(capabilities);
            }
        }
    }

    /// Remove a connection. Removing an already-removed id is a no-op.
    pub async fn remove_connection(&self, id: &str) {
        self.connections.write().await.remove(id);
    }

    pub async fn active_connections(&self) -> Vec<Connection> {
        self.connections.read().await.values().cloned().collect()
    }

    pub async fn stats(&self) -> AuthStats {
        let connections = self.connections.read().await;
        let authenticated = connections.values().filter(|c| c.authenticated).count();
        AuthStats {
            active_connections: connections.len(),
            authenticated_connections: authenticated,
            active_subjects: self.subjects.read().await.len(),
        }
    }

    /// Purge subjects idle beyond the inactivity window, cascading to any
    /// connections bound to them.
    pub async fn sweep(&self) {
        self.sweep_at(Utc::now()).await;
    }

    async fn sweep_at(&self, now: DateTime<Utc>) {
        let removed: Vec<String> = {
            let mut subjects = self.subjects.write().await;
            let stale: Vec<String> = subjects
                .iter()
                .filter(|(_, s)| (now - s.last_access_at).num_seconds() > MAX_INACTIVE_SECS)
                .map(|(id, _)| id.clone())
                .collect();
            for id in &stale {
                subjects.remove(id);
            }
            stale
        };

        if removed.is_empty() {
            return;
        }

        let mut connections = self.connections.write().await;
        connections.retain(|_, c| {
            c.subject_id
                .as_ref()
                .map(|s| !removed.contains(s))
                .unwrap_or(true)
        });
        tracing::info!("Swept {} inactive subjects", removed.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthConfig;
    use chrono::Duration;

    fn test_config() -> McpConfig {
        let mut config = McpConfig::from_env();
        config.auth = AuthConfig {
            enabled: true,
            jwt_secret: "test-secret".to_string(),
            token_expiry_secs: 3600,
            allowed_clients: vec!["claude".to_string(), "cursor".to_string()],
        };
        config.clients = [(
            "claude".to_string(),
            vec![
                "campaigns:read".to_string(),
                "campaigns:export".to_string(),
                "tools:call".to_string(),
            ],
        )]
        .into_iter()
        .collect();
        config
    }

    #[tokio::test]
    async fn issue_then_validate_round_trips() {
        let auth = AuthService::new(test_config());
        let token = auth.issue("claude", None).await.unwrap();

        assert_eq!(token.token_type, "Bearer");
        assert_eq!(token.expires_in, 3600);

        let subject = auth.validate(&token.access_token).await.unwrap();
        assert_eq!(subject.client_id, "claude");
        assert_eq!(subject.permissions, token.scope);
    }

    #[tokio::test]
    async fn scope_is_intersected_with_ceiling() {
        let auth = AuthService::new(test_config());
        let scope = vec!["campaigns:read".to_string()];
        let token = auth.issue("claude", Some(&scope)).await.unwrap();

        assert_eq!(token.scope, vec!["campaigns:read".to_string()]);

        let subject = auth.validate(&token.access_token).await.unwrap();
        assert!(AuthService::has_permission(&subject, "campaigns:read"));
        assert!(!AuthService::has_permission(&subject, "campaigns:export"));
    }

    #[tokio::test]
    async fn unknown_scope_entries_are_dropped() {
        let auth = AuthService::new(test_config());
        let scope = vec![
            "campaigns:read".to_string(),
            "admin:everything".to_string(),
        ];
        let token = auth.issue("claude", Some(&scope)).await.unwrap();
        assert_eq!(token.scope, vec!["campaigns:read".to_string()]);
    }

    #[tokio::test]
    async fn disallowed_client_is_rejected() {
        let auth = AuthService::new(test_config());
        let err = auth.issue("mallory", None).await.unwrap_err();
        assert!(matches!(err, BridgeError::ClientNotAllowed(_)));
    }

    #[tokio::test]
    async fn wildcard_allow_list_admits_any_client() {
        let mut config = test_config();
        config.auth.allowed_clients = vec!["*".to_string()];
        let auth = AuthService::new(config);
        assert!(auth.issue("anyone", None).await.is_ok());
    }

    #[tokio::test]
    async fn token_signed_with_other_key_is_invalid() {
        let auth = AuthService::new(test_config());

        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: "some-subject".to_string(),
            client_id: "claude".to_string(),
            permissions: vec!["campaigns:read".to_string()],
            iat: now as usize,
            exp: (now + 3600) as usize,
        };
        let forged = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"wrong-secret"),
        )
        .unwrap();

        assert!(auth.validate(&forged).await.is_none());
    }

    #[tokio::test]
    async fn expired_token_is_invalid() {
        let auth = AuthService::new(test_config());

        // Well past the default validation leeway
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: "some-subject".to_string(),
            client_id: "claude".to_string(),
            permissions: vec![],
            iat: (now - 7200) as usize,
            exp: (now - 3600) as usize,
        };
        let expired = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"test-secret"),
        )
        .unwrap();

        assert!(auth.validate(&expired).await.is_none());
    }

    #[tokio::test]
    async fn valid_token_with_unknown_subject_is_invalid() {
        let auth = AuthService::new(test_config());

        // Structurally valid, signed with the right key, but never issued
        // by this process instance
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: Uuid::new_v4().to_string(),
            client_id: "claude".to_string(),
            permissions: vec!["campaigns:read".to_string()],
            iat: now as usize,
            exp: (now + 3600) as usize,
        };
        let orphaned = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"test-secret"),
        )
        .unwrap();

        assert!(auth.validate(&orphaned).await.is_none());
    }

    #[tokio::test]
    async fn each_issuance_creates_a_fresh_subject() {
        let auth = AuthService::new(test_config());
        let first = auth.issue("claude", None).await.unwrap();
        let second = auth.issue("claude", None).await.unwrap();

        let s1 = auth.validate(&first.access_token).await.unwrap();
        let s2 = auth.validate(&second.access_token).await.unwrap();
        assert_ne!(s1.id, s2.id);
    }

    #[tokio::test]
    async fn connection_removal_is_idempotent() {
        let auth = AuthService::new(test_config());
        let connection = auth.create_connection().await;

        auth.remove_connection(&connection.id).await;
        auth.remove_connection(&connection.id).await;
        assert!(auth.get_connection(&connection.id).await.is_none());
    }

    #[tokio::test]
    async fn update_merges_partial_fields() {
        let auth = AuthService::new(test_config());
        let connection = auth.create_connection().await;

        auth.update_connection(
            &connection.id,
            ConnectionUpdate {
                authenticated: Some(true),
                permissions: Some(vec!["campaigns:read".to_string()]),
                ..Default::default()
            },
        )
        .await;

        let updated = auth.get_connection(&connection.id).await.unwrap();
        assert!(updated.authenticated);
        assert_eq!(updated.permissions, vec!["campaigns:read".to_string()]);
        assert!(updated.client_info.is_none());
    }

    #[tokio::test]
    async fn sweep_purges_idle_subjects_and_their_connections() {
        let auth = AuthService::new(test_config());
        let token = auth.issue("claude", None).await.unwrap();
        let subject = auth.validate(&token.access_token).await.unwrap();

        let connection = auth.create_connection().await;
        auth.update_connection(
            &connection.id,
            ConnectionUpdate {
                authenticated: Some(true),
                subject_id: Some(subject.id.clone()),
                ..Default::default()
            },
        )
        .await;
        let unrelated = auth.create_connection().await;

        auth.sweep_at(Utc::now() + Duration::hours(25)).await;

        assert!(auth.validate(&token.access_token).await.is_none());
        assert!(auth.get_connection(&connection.id).await.is_none());
        // Connections without a subject survive the cascade
        assert!(auth.get_connection(&unrelated.id).await.is_some());
    }

    #[tokio::test]
    async fn sweep_keeps_recently_active_subjects() {
        let auth = AuthService::new(test_config());
        let token = auth.issue("claude", None).await.unwrap();

        auth.sweep().await;
        assert!(auth.validate(&token.access_token).await.is_some());
    }
}
