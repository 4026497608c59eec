//! Fixed catalog of MCP tools over the campaign data provider.
//!
//! Tool failures are data, not protocol faults: every execution returns a
//! [`ToolResult`], and anything that goes wrong inside a tool body comes back
//! with `is_error` set and a human-readable message.

use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::campaign::{AggregateQuery, CampaignDataProvider, CampaignFilters, ExportFormat};
use crate::mcp::protocol::{ToolDescriptor, ToolResult};

pub struct ToolRegistry {
    provider: Arc<dyn CampaignDataProvider>,
    catalog: Vec<ToolDescriptor>,
}

#[derive(Debug, Deserialize)]
struct ExportArgs {
    format: ExportFormat,
    #[serde(flatten)]
    filters: CampaignFilters,
}

impl ToolRegistry {
    pub fn new(provider: Arc<dyn CampaignDataProvider>) -> Self {
        Self {
            provider,
            catalog: build_catalog(),
        }
    }

    /// The fixed tool catalog, insertion order preserved
    pub fn list(&self) -> &[ToolDescriptor] {
        &self.catalog
    }

    /// Permission required to call a tool, if any
    pub fn required_permission(name: &str) -> Option<&'static str> {
        match name {
            "list_campaigns" | "get_campaign" => Some("campaigns:read"),
            "aggregate_metrics" => Some("metrics:read"),
            "export_campaigns" => Some("exports:create"),
            "health_check" => Some("health:read"),
            _ => None,
        }
    }

    /// Execute a tool by name. Unknown names and argument coercion failures
    /// come back as error results, never as Err.
    pub async fn execute(&self, name: &str, arguments: Value) -> ToolResult {
        let outcome = match name {
            "list_campaigns" => self.list_campaigns(arguments).await,
            "get_campaign" => self.get_campaign(arguments).await,
            "aggregate_metrics" => self.aggregate_metrics(arguments).await,
            "export_campaigns" => self.export_campaigns(arguments).await,
            "health_check" => self.health_check().await,
            _ => Err(format!("Unknown tool: {}", name)),
        };

        match outcome {
            Ok(result) => result,
            Err(message) => ToolResult::error(format!("Error executing tool '{}': {}", name, message)),
        }
    }

    async fn list_campaigns(&self, arguments: Value) -> Result<ToolResult, String> {
        let filters: CampaignFilters = serde_json::from_value(arguments)
            .map_err(|e| format!("Invalid arguments: {}", e))?;

        let page = self
            .provider
            .list_filtered(&filters)
            .await
            .map_err(|e| e.to_string())?;

        to_text_result(&page)
    }

    async fn get_campaign(&self, arguments: Value) -> Result<ToolResult, String> {
        let id = arguments
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or("Missing required parameter: id")?;

        let campaign = self
            .provider
            .get_by_id(id)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("Campaign not found: {}", id))?;

        to_text_result(&campaign)
    }

    async fn aggregate_metrics(&self, arguments: Value) -> Result<ToolResult, String> {
        let query: AggregateQuery = serde_json::from_value(arguments)
            .map_err(|e| format!("Invalid arguments: {}", e))?;

        let buckets = self
            .provider
            .aggregate(&query)
            .await
            .map_err(|e| e.to_string())?;

        to_text_result(&buckets)
    }

    async fn export_campaigns(&self, arguments: Value) -> Result<ToolResult, String> {
        let args: ExportArgs = serde_json::from_value(arguments)
            .map_err(|e| format!("Invalid arguments: {}", e))?;

        let export = self
            .provider
            .export(args.format, &args.filters)
            .await
            .map_err(|e| e.to_string())?;

        to_text_result(&export)
    }

    async fn health_check(&self) -> Result<ToolResult, String> {
        let health = json!({
            "success": true,
            "message": "Campaign Performance API is running",
            "timestamp": Utc::now().to_rfc3339(),
            "version": env!("CARGO_PKG_VERSION"),
        });

        to_text_result(&health)
    }
}

fn to_text_result<T: serde::Serialize>(payload: &T) -> Result<ToolResult, String> {
    let text = serde_json::to_string_pretty(payload).map_err(|e| e.to_string())?;
    Ok(ToolResult::text(text))
}

fn build_catalog() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor {
            name: "list_campaigns".to_string(),
            description:
                "Retrieve a paginated list of campaign performance records with optional filters"
                    .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "game": {"type": "string", "description": "Filter by game name"},
                    "network": {"type": "string", "description": "Filter by advertising network"},
                    "store": {"type": "string", "enum": ["ios", "android"], "description": "Filter by app store"},
                    "campaign_name": {"type": "string", "description": "Filter by campaign name"},
                    "month_from": {"type": "string", "format": "date", "description": "Start date filter (YYYY-MM format)"},
                    "month_to": {"type": "string", "format": "date", "description": "End date filter (YYYY-MM format)"},
                    "min_cpi": {"type": "number", "description": "Minimum cost per install"},
                    "max_cpi": {"type": "number", "description": "Maximum cost per install"},
                    "roas_day": {"type": "integer", "enum": [0, 7, 30, 365], "description": "ROAS day for filtering"},
                    "min_roas": {"type": "number", "description": "Minimum ROAS value"},
                    "max_roas": {"type": "number", "description": "Maximum ROAS value"},
                    "page": {"type": "integer", "default": 1, "description": "Page number for pagination"},
                    "page_size": {"type": "integer", "default": 50, "description": "Number of records per page"}
                }
            }),
        },
        ToolDescriptor {
            name: "get_campaign".to_string(),
            description: "Get detailed information about a specific campaign by ID".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "id": {"type": "string", "description": "Campaign ID"}
                },
                "required": ["id"]
            }),
        },
        ToolDescriptor {
            name: "aggregate_metrics".to_string(),
            description: "Get aggregated campaign metrics grouped by dimensions".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "group_by": {
                        "type": "string",
                        "enum": ["month", "network", "store", "campaign_name"],
                        "description": "Dimension to group by"
                    },
                    "metric": {
                        "type": "string",
                        "enum": ["cpi", "acquired_users", "roas_d0", "roas_d7", "roas_d30", "roas_d365", "retention_d0", "retention_d7", "retention_d30", "retention_d365"],
                        "description": "Metric to aggregate"
                    },
                    "aggregation": {
                        "type": "string",
                        "enum": ["sum", "avg", "min", "max"],
                        "description": "Aggregation function"
                    }
                },
                "required": ["group_by", "metric", "aggregation"]
            }),
        },
        ToolDescriptor {
            name: "export_campaigns".to_string(),
            description: "Export filtered campaign data as CSV or JSON".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "format": {"type": "string", "enum": ["csv", "json"], "description": "Export format"},
                    "network": {"type": "string", "description": "Filter by advertising network"},
                    "store": {"type": "string", "enum": ["ios", "android"], "description": "Filter by app store"}
                },
                "required": ["format"]
            }),
        },
        ToolDescriptor {
            name: "health_check".to_string(),
            description: "Check the health status of the Campaign Performance API".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {}
            }),
        },
    ]
}
