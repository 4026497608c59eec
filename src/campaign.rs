//! Campaign data access layer.
//!
//! The tool registry consumes campaign data through the [`CampaignDataProvider`]
//! trait; the REST/file-backed implementation lives outside this crate. The
//! [`InMemoryCampaignProvider`] here backs the shipped binary and the tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};

/// One campaign performance record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Campaign {
    pub id: String,
    pub game: String,
    pub campaign_name: String,
    pub network: String,
    pub store: String,
    /// Reporting month in YYYY-MM format
    pub month: String,
    pub acquired_users: u64,
    pub cpi: f64,
    pub roas_d0: f64,
    pub roas_d7: f64,
    pub roas_d30: f64,
    pub roas_d365: f64,
    pub retention_d0: f64,
    pub retention_d7: f64,
    pub retention_d30: f64,
    pub retention_d365: f64,
}

/// Filter and pagination options for campaign queries
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CampaignFilters {
    pub game: Option<String>,
    pub network: Option<String>,
    pub store: Option<String>,
    pub campaign_name: Option<String>,
    pub month_from: Option<String>,
    pub month_to: Option<String>,
    pub min_cpi: Option<f64>,
    pub max_cpi: Option<f64>,
    pub roas_day: Option<u32>,
    pub min_roas: Option<f64>,
    pub max_roas: Option<f64>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Pagination {
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u32,
    pub total_records: u32,
}

#[derive(Debug, Serialize)]
pub struct CampaignPage {
    pub data: Vec<Campaign>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupBy {
    Month,
    Network,
    Store,
    CampaignName,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Cpi,
    AcquiredUsers,
    RoasD0,
    RoasD7,
    RoasD30,
    RoasD365,
    RetentionD0,
    RetentionD7,
    RetentionD30,
    RetentionD365,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    Sum,
    Avg,
    Min,
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    Csv,
    Json,
}

/// Aggregation request over the campaign set
#[derive(Debug, Clone, Deserialize)]
pub struct AggregateQuery {
    pub group_by: GroupBy,
    pub metric: Metric,
    pub aggregation: Aggregation,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct AggregateBucket {
    pub group: String,
    pub value: f64,
}

#[derive(Debug, Serialize)]
pub struct ExportResult {
    pub url: String,
}

/// Data boundary the tool registry calls into
#[async_trait]
pub trait CampaignDataProvider: Send + Sync {
    async fn list_filtered(&self, filters: &CampaignFilters) -> Result<CampaignPage>;

    async fn get_by_id(&self, id: &str) -> Result<Option<Campaign>>;

    async fn aggregate(&self, query: &AggregateQuery) -> Result<Vec<AggregateBucket>>;

    async fn export(&self, format: ExportFormat, filters: &CampaignFilters) -> Result<ExportResult>;
}

/// Provider backed by a fixed in-memory record set
pub struct InMemoryCampaignProvider {
    campaigns: Vec<Campaign>,
}

impl InMemoryCampaignProvider {
    pub fn new(campaigns: Vec<Campaign>) -> Self {
        Self { campaigns }
    }

    /// Small demo dataset used by the shipped binary
    pub fn with_sample_data() -> Self {
        let mut campaigns = Vec::new();
        let networks = ["unityads", "applovin", "ironsource"];
        let stores = ["ios", "android"];
        let months = ["2024-01", "2024-02", "2024-03"];

        let mut n = 0u64;
        for month in months {
            for network in networks {
                for store in stores {
                    n += 1;
                    campaigns.push(Campaign {
                        id: format!("cmp-{:03}", n),
                        game: "Puzzle Quest".to_string(),
                        campaign_name: format!("{}_{}_launch", network, store),
                        network: network.to_string(),
                        store: store.to_string(),
                        month: month.to_string(),
                        acquired_users: 1000 + n * 137,
                        cpi: 0.8 + (n as f64) * 0.05,
                        roas_d0: 0.05 + (n as f64) * 0.002,
                        roas_d7: 0.20 + (n as f64) * 0.004,
                        roas_d30: 0.45 + (n as f64) * 0.006,
                        roas_d365: 1.10 + (n as f64) * 0.010,
                        retention_d0: 0.95,
                        retention_d7: 0.30 + (n as f64) * 0.001,
                        retention_d30: 0.12,
                        retention_d365: 0.03,
                    });
                }
            }
        }

        Self::new(campaigns)
    }

    fn matches(campaign: &Campaign, filters: &CampaignFilters) -> bool {
        if let Some(game) = &filters.game {
            if !campaign.game.eq_ignore_ascii_case(game) {
                return false;
            }
        }
        if let Some(network) = &filters.network {
            if !campaign.network.eq_ignore_ascii_case(network) {
                return false;
            }
        }
        if let Some(store) = &filters.store {
            if !campaign.store.eq_ignore_ascii_case(store) {
                return false;
            }
        }
        if let Some(name) = &filters.campaign_name {
            if !campaign
                .campaign_name
                .to_lowercase()
                .contains(&name.to_lowercase())
            {
                return false;
            }
        }
        if let Some(from) = &filters.month_from {
            if campaign.month.as_str() < from.as_str() {
                return false;
            }
        }
        if let Some(to) = &filters.month_to {
            if campaign.month.as_str() > to.as_str() {
                return false;
            }
        }
        if let Some(min) = filters.min_cpi {
            if campaign.cpi < min {
                return false;
            }
        }
        if let Some(max) = filters.max_cpi {
            if campaign.cpi > max {
                return false;
            }
        }

        // ROAS range filters apply to the selected day, defaulting to d7
        if filters.min_roas.is_some() || filters.max_roas.is_some() {
            let roas = match filters.roas_day.unwrap_or(7) {
                0 => campaign.roas_d0,
                7 => campaign.roas_d7,
                30 => campaign.roas_d30,
                365 => campaign.roas_d365,
                _ => return false,
            };
            if let Some(min) = filters.min_roas {
                if roas < min {
                    return false;
                }
            }
            if let Some(max) = filters.max_roas {
                if roas > max {
                    return false;
                }
            }
        }

        true
    }

    fn metric_value(campaign: &Campaign, metric: Metric) -> f64 {
        match metric {
            Metric::Cpi => campaign.cpi,
            Metric::AcquiredUsers => campaign.acquired_users as f64,
            Metric::RoasD0 => campaign.roas_d0,
            Metric::RoasD7 => campaign.roas_d7,
            Metric::RoasD30 => campaign.roas_d30,
            Metric::RoasD365 => campaign.roas_d365,
            Metric::RetentionD0 => campaign.retention_d0,
            Metric::RetentionD7 => campaign.retention_d7,
            Metric::RetentionD30 => campaign.retention_d30,
            Metric::RetentionD365 => campaign.retention_d365,
        }
    }

    fn group_key(campaign: &Campaign, group_by: GroupBy) -> String {
        match group_by {
            GroupBy::Month => campaign.month.clone(),
            GroupBy::Network => campaign.network.clone(),
            GroupBy::Store => campaign.store.clone(),
            GroupBy::CampaignName => campaign.campaign_name.clone(),
        }
    }
}

#[async_trait]
impl CampaignDataProvider for InMemoryCampaignProvider {
    async fn list_filtered(&self, filters: &CampaignFilters) -> Result<CampaignPage> {
        let filtered: Vec<Campaign> = self
            .campaigns
            .iter()
            .filter(|c| Self::matches(c, filters))
            .cloned()
            .collect();

        let page = filters.page.unwrap_or(1).max(1);
        let page_size = filters.page_size.unwrap_or(50).max(1);
        let total_records = filtered.len() as u32;
        let total_pages = total_records.div_ceil(page_size);

        let start = ((page - 1) * page_size) as usize;
        let data = filtered
            .into_iter()
            .skip(start)
            .take(page_size as usize)
            .collect();

        Ok(CampaignPage {
            data,
            pagination: Pagination {
                page,
                page_size,
                total_pages,
                total_records,
            },
        })
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Campaign>> {
        Ok(self.campaigns.iter().find(|c| c.id == id).cloned())
    }

    async fn aggregate(&self, query: &AggregateQuery) -> Result<Vec<AggregateBucket>> {
        // Preserve first-seen group order so repeated queries are stable
        let mut order: Vec<String> = Vec::new();
        let mut values: std::collections::HashMap<String, Vec<f64>> =
            std::collections::HashMap::new();

        for campaign in &self.campaigns {
            let key = Self::group_key(campaign, query.group_by);
            if !values.contains_key(&key) {
                order.push(key.clone());
            }
            values
                .entry(key)
                .or_default()
                .push(Self::metric_value(campaign, query.metric));
        }

        let buckets = order
            .into_iter()
            .map(|group| {
                let samples = &values[&group];
                let value = match query.aggregation {
                    Aggregation::Sum => samples.iter().sum(),
                    Aggregation::Avg => samples.iter().sum::<f64>() / samples.len() as f64,
                    Aggregation::Min => samples.iter().cloned().fold(f64::INFINITY, f64::min),
                    Aggregation::Max => samples.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
                };
                AggregateBucket { group, value }
            })
            .collect();

        Ok(buckets)
    }

    async fn export(&self, format: ExportFormat, filters: &CampaignFilters) -> Result<ExportResult> {
        let page = self.list_filtered(filters).await?;
        if page.pagination.total_records == 0 {
            return Err(BridgeError::InvalidInput(
                "No campaigns match the export filters".to_string(),
            ));
        }

        let extension = match format {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
        };
        Ok(ExportResult {
            url: format!(
                "/api/v1/exports/campaigns-{}.{}",
                uuid::Uuid::new_v4(),
                extension
            ),
        })
    }
}
