//! Pulse HTTP surface DTOs (spec.md §6.2, read-only).
//!
//! Query structs deserialize directly from axum's `Query<T>` extractor;
//! response structs are the JSON bodies the handlers in tf-gateway return
//! over the in-memory run/event/provider-call/DLQ stores.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tf_domain::entities::{DeadLetterQueue, DlqStatus, PipelineEvent, PipelineRun, ProviderCall};
use uuid::Uuid;

fn default_hours() -> u32 {
    24
}

fn default_limit() -> u32 {
    50
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatsQuery {
    #[serde(default = "default_hours")]
    pub hours: u32,
    #[serde(default)]
    pub org_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub success_rate: f64,
    pub p50_latency_ms: u64,
    pub p95_latency_ms: u64,
    pub total_tokens: u64,
    pub total_cost_cents: f64,
    pub dlq_count: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineRunsQuery {
    #[serde(default = "default_hours")]
    pub hours: u32,
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub org_id: Option<Uuid>,
    #[serde(default)]
    pub session_id: Option<Uuid>,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineRunsResponse {
    pub runs: Vec<PipelineRun>,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineRunDetailResponse {
    pub run: PipelineRun,
    pub events: Vec<PipelineEvent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderCallsQuery {
    #[serde(default = "default_hours")]
    pub hours: u32,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub session_id: Option<Uuid>,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderCallsResponse {
    pub calls: Vec<ProviderCall>,
    pub total: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DlqQuery {
    #[serde(default)]
    pub status: Option<DlqStatus>,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct DlqResponse {
    pub items: Vec<DeadLetterQueue>,
    pub total: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LatencySeriesQuery {
    #[serde(default = "default_hours")]
    pub hours: u32,
    #[serde(default)]
    pub service: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LatencySeriesBucket {
    pub hour: DateTime<Utc>,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LatencySeriesResponse {
    pub buckets: Vec<LatencySeriesBucket>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_runs_query_defaults_hours_and_limit() {
        let query: PipelineRunsQuery = serde_json::from_str("{}").unwrap();
        assert_eq!(query.hours, 24);
        assert_eq!(query.limit, 50);
        assert_eq!(query.offset, 0);
    }

    #[test]
    fn dlq_query_status_filter_is_optional() {
        let query: DlqQuery = serde_json::from_str(r#"{"status":"pending"}"#).unwrap();
        assert_eq!(query.status, Some(DlqStatus::Pending));
    }
}
