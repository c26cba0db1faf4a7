use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::record::ResultRecord;
use super::store::{StoreKind, StoreSummary};

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub prompt: String,
}

/// Everything one successful Ask produced
#[derive(Debug, Clone)]
pub struct AskOutcome {
    pub store: String,
    pub kind: StoreKind,
    /// Cleaned query text that was executed
    pub query: String,
    pub rows: Vec<ResultRecord>,
}

#[derive(Debug, Serialize)]
pub struct AskResponse {
    pub store: String,
    pub kind: StoreKind,
    pub query: String,
    pub rows: Vec<ResultRecord>,
    pub row_count: usize,
    pub execution_time_ms: u64,
    pub executed_at: DateTime<Utc>,
}

impl AskResponse {
    pub fn new(outcome: AskOutcome, execution_time_ms: u64) -> Self {
        Self {
            row_count: outcome.rows.len(),
            store: outcome.store,
            kind: outcome.kind,
            query: outcome.query,
            rows: outcome.rows,
            execution_time_ms,
            executed_at: Utc::now(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RouteRequest {
    pub prompt: String,
}

#[derive(Debug, Serialize)]
pub struct RouteResponse {
    pub store: String,
    pub kind: StoreKind,
    pub keywords: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct StoreListResponse {
    pub stores: Vec<StoreSummary>,
}

#[derive(Debug, Serialize)]
pub struct SchemaRefreshResponse {
    pub refreshed: Vec<String>,
    pub failed: Vec<SchemaRefreshFailure>,
    pub refreshed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchemaRefreshFailure {
    pub store: String,
    pub error: String,
}
