//! Wire-level data model shared by every pipeline component (spec.md §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Inbound request to the gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    pub query: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub bypass_cache: bool,
}

/// Where a `Plan` came from. Drives cache/history write eligibility and
/// whether token/cost figures are populated on the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanSource {
    Llm,
    History,
    ShortCache,
    Raw,
}

/// A candidate SQL statement plus the planner's confidence in it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub sql: String,
    pub confidence: f64,
    pub explanation: String,
    pub source: PlanSource,
}

/// Materialized result of executing a validated `Plan`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
    pub row_count: usize,
}

/// Token and cost accounting for an LLM call, present only when `Plan::source == Llm`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub tokens_in: u32,
    pub tokens_out: u32,
    pub cost_usd: f64,
}

/// Outbound response on the success path (spec.md §6).
#[derive(Debug, Clone, Serialize)]
pub struct SqlResponse {
    pub tool_used: &'static str,
    pub confidence: f64,
    pub result: ExecutionResult,
    pub trace_id: String,
    pub cost_usd: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<&'static str>,
}

/// A clarification response: confidence gate failed, nothing was executed.
#[derive(Debug, Clone, Serialize)]
pub struct ClarificationResponse {
    pub tool_used: &'static str,
    pub confidence: f64,
    pub candidate_sql: String,
    pub explanation: String,
    pub trace_id: String,
    pub notes: &'static str,
}

/// Outbound error envelope: the 7-key error taxonomy record (spec.md §4.12/§6).
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error_type: String,
    pub category: String,
    pub severity: String,
    pub retryable: bool,
    pub details: String,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u64>,
    pub correlation_id: String,
}

/// One append-only audit row (spec.md §3/§4.10).
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AuditRecord {
    pub id: i64,
    pub ts: DateTime<Utc>,
    pub correlation_id: String,
    pub user_id: Option<String>,
    pub tool: String,
    pub action: String,
    pub input_hash: String,
    pub output_hash: String,
    pub success: bool,
    pub duration_ms: i64,
}

/// A persisted NL-query -> SQL memoization entry (spec.md §3/§4.8).
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct HistoryEntry {
    pub query_hash: String,
    pub natural_language_query: String,
    pub generated_sql: String,
    pub confidence: f64,
    pub row_count: i64,
    pub execution_time_ms: i64,
    pub tokens_in: i32,
    pub tokens_out: i32,
    pub cost_usd: f64,
    pub user_id: Option<String>,
    pub correlation_id: String,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub use_count: i64,
    pub expires_at: DateTime<Utc>,
}

/// Short-term cache payload (spec.md §3/§4.7). Serialized as the cache value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub plan: Plan,
}
