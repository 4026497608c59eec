use campaign_mcp::campaign::InMemoryCampaignProvider;
use campaign_mcp::cli::{Cli, Commands};
use campaign_mcp::config::McpConfig;
use campaign_mcp::logging::LoggingConfig;
use campaign_mcp::mcp::server::McpServer;
use clap::Parser;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_config = LoggingConfig::from_args(cli.quiet, cli.verbose > 0, cli.json);
    if let Err(e) = campaign_mcp::logging::init_logging(log_config) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    let result = match cli.command {
        Commands::Serve { host, port } => {
            let mut config = McpConfig::from_env();
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }

            for problem in config.validate() {
                tracing::warn!("Config: {}", problem);
            }

            let provider = Arc::new(InMemoryCampaignProvider::with_sample_data());
            McpServer::new(config, provider).run().await
        },
        Commands::Token {
            client_id,
            url,
            scope,
        } => request_token(&url, &client_id, &scope).await,
        Commands::Info => {
            let config = McpConfig::from_env();
            let summary = serde_json::json!({
                "host": config.host,
                "port": config.port,
                "config": config.summary(),
                "validation": config.validate(),
            });
            println!("{}", serde_json::to_string_pretty(&summary).unwrap_or_default());
            Ok(())
        },
    };

    if let Err(e) = result {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

async fn request_token(url: &str, client_id: &str, scope: &[String]) -> anyhow::Result<()> {
    let mut body = serde_json::json!({ "client_id": client_id });
    if !scope.is_empty() {
        body["scope"] = serde_json::json!(scope);
    }

    let response: serde_json::Value = reqwest::Client::new()
        .post(format!("{}/api/v1/mcp/auth/token", url))
        .json(&body)
        .send()
        .await?
        .json()
        .await?;

    if response["success"] != serde_json::json!(true) {
        anyhow::bail!(
            "Token request failed: {}",
            response["message"].as_str().unwrap_or("unknown error")
        );
    }

    println!(
        "{}",
        serde_json::to_string_pretty(&response["data"]).unwrap_or_default()
    );
    Ok(())
}
