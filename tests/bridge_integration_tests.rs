//! End-to-end tests against an in-process bridge
//!
//! Each test binds an ephemeral port, serves a real `McpServer` on it, and
//! drives it through `McpClient` or plain HTTP. No external services needed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use serial_test::serial;

use campaign_mcp::campaign::InMemoryCampaignProvider;
use campaign_mcp::config::{AuthConfig, McpConfig};
use campaign_mcp::mcp::client::McpClient;
use campaign_mcp::mcp::server::McpServer;

fn bridge_config(auth_enabled: bool) -> McpConfig {
    McpConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        path: "/mcp".to_string(),
        auth: AuthConfig {
            enabled: auth_enabled,
            jwt_secret: "integration-test-secret".to_string(),
            token_expiry_secs: 3600,
            allowed_clients: vec!["claude".to_string(), "cursor".to_string()],
        },
        clients: HashMap::from([
            (
                "claude".to_string(),
                vec![
                    "campaigns:read".to_string(),
                    "metrics:read".to_string(),
                    "exports:create".to_string(),
                    "health:read".to_string(),
                ],
            ),
            ("cursor".to_string(), vec!["campaigns:read".to_string()]),
        ]),
    }
}

/// Start a bridge on an ephemeral port, returning its base URL.
async fn start_bridge(auth_enabled: bool) -> String {
    let config = bridge_config(auth_enabled);
    let server = McpServer::new(
        config,
        Arc::new(InMemoryCampaignProvider::with_sample_data()),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");

    tokio::spawn(async move {
        let _ = server.serve(listener).await;
    });

    format!("http://{}", addr)
}

#[tokio::test]
#[serial]
async fn full_authenticated_session() {
    let base_url = start_bridge(true).await;

    let mut client = McpClient::new(&base_url, "/mcp", "claude");
    let handshake = client.connect().await.expect("connect");
    assert_eq!(handshake["protocolVersion"], json!("2024-11-05"));
    assert!(handshake["serverInfo"]["name"].is_string());

    let tools = client.list_tools().await.expect("tools/list");
    let names: Vec<&str> = tools["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"list_campaigns"));
    assert!(names.contains(&"health_check"));

    let result = client
        .call_tool("health_check", json!({}))
        .await
        .expect("tools/call");
    assert_ne!(result["isError"], json!(true));
    let payload: Value =
        serde_json::from_str(result["content"][0]["text"].as_str().unwrap()).unwrap();
    assert_eq!(payload["success"], json!(true));

    // The handshake carried the token, so the bridge sees the connection
    // as authenticated, not merely admitted
    let info: Value = reqwest::Client::new()
        .get(format!("{}/api/v1/mcp/info", base_url))
        .send()
        .await
        .expect("info")
        .json()
        .await
        .expect("body");
    assert_eq!(info["data"]["stats"]["authenticated_connections"], json!(1));

    client.close().await.expect("close");
}

#[tokio::test]
#[serial]
async fn scoped_client_is_refused_out_of_scope_tools() {
    let base_url = start_bridge(true).await;

    // cursor's ceiling only grants campaigns:read
    let mut client = McpClient::new(&base_url, "/mcp", "cursor");
    client.connect().await.expect("connect");

    let page = client
        .call_tool("list_campaigns", json!({"page_size": 2}))
        .await
        .expect("in-scope call");
    assert_ne!(page["isError"], json!(true));

    let err = client
        .call_tool(
            "aggregate_metrics",
            json!({"group_by": "network", "metric": "cpi", "aggregation": "avg"}),
        )
        .await
        .expect_err("out-of-scope call");
    let rendered = err.to_string();
    assert!(rendered.contains("metrics:read"), "got: {rendered}");
    assert!(rendered.contains("-32002"), "got: {rendered}");
}

#[tokio::test]
#[serial]
async fn unauthenticated_session_works_when_auth_disabled() {
    let base_url = start_bridge(false).await;

    let mut client = McpClient::new(&base_url, "/mcp", "anyone");
    client.connect_unauthenticated().await.expect("connect");

    let result = client
        .call_tool("get_campaign", json!({"id": "cmp-001"}))
        .await
        .expect("tools/call");
    assert_ne!(result["isError"], json!(true));

    let campaign: Value =
        serde_json::from_str(result["content"][0]["text"].as_str().unwrap()).unwrap();
    assert_eq!(campaign["id"], json!("cmp-001"));
}

#[tokio::test]
#[serial]
async fn campaign_tools_round_trip_over_the_wire() {
    let base_url = start_bridge(false).await;

    let mut client = McpClient::new(&base_url, "/mcp", "claude");
    client.connect_unauthenticated().await.expect("connect");

    let result = client
        .call_tool(
            "list_campaigns",
            json!({"network": "unityads", "page": 1, "page_size": 10}),
        )
        .await
        .expect("filtered list");
    let page: Value =
        serde_json::from_str(result["content"][0]["text"].as_str().unwrap()).unwrap();
    for campaign in page["data"].as_array().unwrap() {
        assert_eq!(campaign["network"], json!("unityads"));
    }

    let result = client
        .call_tool(
            "export_campaigns",
            json!({"format": "csv", "network": "unityads"}),
        )
        .await
        .expect("export");
    let export: Value =
        serde_json::from_str(result["content"][0]["text"].as_str().unwrap()).unwrap();
    assert!(export["url"].as_str().unwrap().contains(".csv"));
}

#[tokio::test]
#[serial]
async fn token_endpoint_requires_client_id() {
    let base_url = start_bridge(true).await;
    let http = reqwest::Client::new();

    let response = http
        .post(format!("{}/api/v1/mcp/auth/token", base_url))
        .json(&json!({}))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), 400);

    let body: Value = response.json().await.expect("body");
    assert_eq!(body["success"], json!(false));
    assert_eq!(body["message"], json!("client_id is required"));
}

#[tokio::test]
#[serial]
async fn token_endpoint_rejects_unknown_clients() {
    let base_url = start_bridge(true).await;
    let http = reqwest::Client::new();

    let response = http
        .post(format!("{}/api/v1/mcp/auth/token", base_url))
        .json(&json!({"client_id": "mallory"}))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), 400);

    let body: Value = response.json().await.expect("body");
    assert_eq!(body["success"], json!(false));
    assert_eq!(body["error"], json!("CLIENT_NOT_ALLOWED"));
    assert_eq!(body["message"], json!("Client 'mallory' is not allowed"));
}

#[tokio::test]
#[serial]
async fn validate_endpoint_round_trips_issued_tokens() {
    let base_url = start_bridge(true).await;
    let http = reqwest::Client::new();

    let issued: Value = http
        .post(format!("{}/api/v1/mcp/auth/token", base_url))
        .json(&json!({"client_id": "claude", "scope": ["campaigns:read"]}))
        .send()
        .await
        .expect("issue")
        .json()
        .await
        .expect("body");
    assert_eq!(issued["success"], json!(true));
    let access_token = issued["data"]["access_token"].as_str().unwrap().to_string();
    assert_eq!(issued["data"]["scope"], json!(["campaigns:read"]));

    // Token in the body
    let validated: Value = http
        .post(format!("{}/api/v1/mcp/auth/validate", base_url))
        .json(&json!({"token": access_token}))
        .send()
        .await
        .expect("validate")
        .json()
        .await
        .expect("body");
    assert_eq!(validated["success"], json!(true));
    assert_eq!(validated["data"]["valid"], json!(true));
    assert_eq!(validated["data"]["user"]["client_id"], json!("claude"));

    // Token as a bearer header
    let validated: Value = http
        .post(format!("{}/api/v1/mcp/auth/validate", base_url))
        .bearer_auth(&access_token)
        .json(&json!({}))
        .send()
        .await
        .expect("validate")
        .json()
        .await
        .expect("body");
    assert_eq!(validated["success"], json!(true));

    // Garbage is a 401
    let response = http
        .post(format!("{}/api/v1/mcp/auth/validate", base_url))
        .json(&json!({"token": "not.a.token"}))
        .send()
        .await
        .expect("validate");
    assert_eq!(response.status(), 401);
}

#[tokio::test]
#[serial]
async fn info_and_health_endpoints_respond() {
    let base_url = start_bridge(true).await;
    let http = reqwest::Client::new();

    let info: Value = http
        .get(format!("{}/api/v1/mcp/info", base_url))
        .send()
        .await
        .expect("info")
        .json()
        .await
        .expect("body");
    assert_eq!(info["success"], json!(true));
    assert_eq!(
        info["data"]["serverInfo"]["protocolVersion"],
        json!("2024-11-05")
    );
    assert_eq!(info["data"]["config"]["auth_enabled"], json!(true));

    let health: Value = http
        .get(format!("{}/api/v1/mcp/health", base_url))
        .send()
        .await
        .expect("health")
        .json()
        .await
        .expect("body");
    assert_eq!(health["success"], json!(true));
    assert_eq!(health["data"]["status"], json!("healthy"));
}

#[tokio::test]
#[serial]
async fn client_with_narrowed_scope_gets_the_intersection() {
    let base_url = start_bridge(true).await;

    let mut client = McpClient::new(&base_url, "/mcp", "claude")
        .with_scope(vec!["campaigns:read".to_string(), "made:up".to_string()])
        .with_request_timeout(Duration::from_secs(5));
    client.connect().await.expect("connect");

    // campaigns:read survives the intersection, made:up is dropped silently
    let result = client
        .call_tool("get_campaign", json!({"id": "cmp-002"}))
        .await
        .expect("in-scope call");
    assert_ne!(result["isError"], json!(true));

    let err = client
        .call_tool("health_check", json!({}))
        .await
        .expect_err("health:read was not requested");
    assert!(err.to_string().contains("health:read"));
}
