//! Core Orchestrator / SqlTool (C11, spec.md §4.11).
//!
//! The single entry point an inbound adapter calls: rate-limits, classifies
//! raw-SQL vs natural-language, invokes the planner or validator directly,
//! executes, audits, and returns the typed response. `AppState` wires every
//! component behind `Arc`, concrete types all the way down — no
//! service-locator indirection, the same "Rust's type system IS our DI
//! container" posture this codebase's own `AppState` already takes.

use crate::config::Config;
use crate::core::audit::AuditSink;
use crate::core::errors::{ErrorCategory, PipelineError, SafetyError};
use crate::core::executor::QueryExecutor;
use crate::core::planner::SqlPlanner;
use crate::core::rate_limiter::RateLimiter;
use crate::core::validator;
use crate::models::{
    ClarificationResponse, ErrorResponse, Plan, PlanSource, Request, SqlResponse,
};
use std::time::Instant;
use uuid::Uuid;

/// Reserved verbs that make a query look like raw SQL rather than a
/// natural-language question (spec.md §4.11 step 3).
const RESERVED_SQL_VERBS: &[&str] = &[
    "SELECT", "INSERT", "UPDATE", "DELETE", "CREATE", "DROP", "ALTER", "TRUNCATE", "GRANT",
    "REVOKE", "COPY", "WITH",
];

pub enum ToolResponse {
    Success(SqlResponse),
    Clarification(ClarificationResponse),
    Error(ErrorResponse),
}

pub struct SqlTool {
    config: Config,
    rate_limiter: RateLimiter,
    planner: SqlPlanner,
    executor: QueryExecutor,
    audit: AuditSink,
}

impl SqlTool {
    pub fn new(
        config: Config,
        rate_limiter: RateLimiter,
        planner: SqlPlanner,
        executor: QueryExecutor,
        audit: AuditSink,
    ) -> Self {
        Self { config, rate_limiter, planner, executor, audit }
    }

    /// `fallback_key` is the caller's peer address, used for rate limiting
    /// when `request.user_id` is absent (spec.md §4.6). Supplied by the
    /// inbound adapter, which owns transport-level connection info.
    pub async fn handle(&self, mut request: Request, fallback_key: &str) -> ToolResponse {
        let start = Instant::now();

        // Step 1: correlation.
        let correlation_id = request.correlation_id.take().unwrap_or_else(|| Uuid::new_v4().to_string());
        let user_id = request.user_id.clone();
        let rate_limit_key = user_id.as_deref().unwrap_or(fallback_key);

        // Step 2: admission.
        if let Err(retry_after_seconds) = self.rate_limiter.check(rate_limit_key) {
            let err = PipelineError::RateLimit { retry_after_seconds };
            self.audit_failure(&correlation_id, user_id.as_deref(), &request.query, &err, start)
                .await;
            return ToolResponse::Error(err.to_response(&correlation_id));
        }

        // Step 3-4: classify and branch.
        let is_raw = is_raw_sql(&request.query);
        let (mut plan, usage) = if is_raw {
            match validator::validate(&request.query, &self.config.validator) {
                Ok(sanitized) => (
                    Plan {
                        sql: sanitized,
                        confidence: 1.0,
                        explanation: "raw SQL passed through the validator".to_string(),
                        source: PlanSource::Raw,
                    },
                    crate::models::Usage::default(),
                ),
                Err(e) => {
                    let err = PipelineError::Safety(e);
                    self.audit_failure(&correlation_id, user_id.as_deref(), &request.query, &err, start)
                        .await;
                    return ToolResponse::Error(err.to_response(&correlation_id));
                },
            }
        } else {
            match self.planner.plan(&request.query, request.bypass_cache).await {
                Ok(outcome) => (outcome.plan, outcome.usage),
                Err(e) => {
                    let err = PipelineError::Planner(e);
                    self.audit_failure(&correlation_id, user_id.as_deref(), &request.query, &err, start)
                        .await;
                    return ToolResponse::Error(err.to_response(&correlation_id));
                },
            }
        };

        // Step 6: confidence gate (raw plans always carry confidence 1.0).
        if plan.confidence < self.config.llm.confidence_threshold {
            let response = ClarificationResponse {
                tool_used: "sql",
                confidence: plan.confidence,
                candidate_sql: plan.sql.clone(),
                explanation: plan.explanation.clone(),
                trace_id: correlation_id.clone(),
                notes: "low_confidence",
            };
            let output = serde_json::json!({
                "candidate_sql": plan.sql, "confidence": plan.confidence,
            });
            self.audit
                .record(
                    "clarification",
                    &correlation_id,
                    user_id.as_deref(),
                    &serde_json::json!({"query": request.query}),
                    &output,
                    true,
                    start.elapsed().as_millis() as i64,
                )
                .await;
            return ToolResponse::Clarification(response);
        }

        // Step 7: re-validate unconditionally, even cache/history plans.
        let sanitized = match validator::validate(&plan.sql, &self.config.validator) {
            Ok(sanitized) => sanitized,
            Err(e) => {
                let err = PipelineError::Safety(e);
                self.audit_failure(&correlation_id, user_id.as_deref(), &request.query, &err, start)
                    .await;
                return ToolResponse::Error(err.to_response(&correlation_id));
            },
        };
        plan.sql = sanitized;

        // Step 8: execute.
        let exec_start = Instant::now();
        let result = match self.executor.execute(&plan.sql).await {
            Ok(result) => result,
            Err(e) => {
                let err = PipelineError::Execution(e);
                self.audit_failure(&correlation_id, user_id.as_deref(), &request.query, &err, start)
                    .await;
                return ToolResponse::Error(err.to_response(&correlation_id));
            },
        };
        let execution_time_ms = exec_start.elapsed().as_millis() as i64;

        // Step 9: persist (only for llm/history-sourced plans).
        let mut notes: Option<&'static str> = match plan.source {
            PlanSource::ShortCache => Some("cache_hit"),
            PlanSource::History => Some("history_reuse"),
            _ => None,
        };
        if matches!(plan.source, PlanSource::Llm | PlanSource::History) {
            let history_write_ok = self
                .planner
                .persist_success(
                    &request.query,
                    &plan,
                    result.row_count as i64,
                    execution_time_ms,
                    usage,
                    user_id.as_deref(),
                    &correlation_id,
                    request.bypass_cache,
                )
                .await;
            if !history_write_ok {
                notes = Some("history_write_failed");
            }
        }

        // Step 10: audit.
        let output = serde_json::json!({ "row_count": result.row_count });
        self.audit
            .record(
                "query",
                &correlation_id,
                user_id.as_deref(),
                &serde_json::json!({"query": request.query}),
                &output,
                true,
                start.elapsed().as_millis() as i64,
            )
            .await;

        // Step 11: respond.
        ToolResponse::Success(SqlResponse {
            tool_used: "sql",
            confidence: plan.confidence,
            result,
            trace_id: correlation_id,
            cost_usd: usage.cost_usd,
            notes,
        })
    }

    async fn audit_failure(
        &self,
        correlation_id: &str,
        user_id: Option<&str>,
        query: &str,
        err: &PipelineError,
        start: Instant,
    ) {
        let output = serde_json::json!({ "category": err.category().as_str(), "message": err.to_string() });
        self.audit
            .record(
                "query",
                correlation_id,
                user_id,
                &serde_json::json!({"query": query}),
                &output,
                false,
                start.elapsed().as_millis() as i64,
            )
            .await;
        if matches!(err.category(), ErrorCategory::Configuration) {
            tracing::error!(correlation_id, "sql tool: configuration error: {err}");
        }
    }
}

/// True iff the trimmed, upper-cased query starts with a reserved SQL verb
/// (spec.md §4.11 step 3).
fn is_raw_sql(query_text: &str) -> bool {
    let upper = query_text.trim().to_uppercase();
    RESERVED_SQL_VERBS.iter().any(|verb| upper.starts_with(verb))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheConfig, HistoryConfig};
    use crate::core::breaker::CircuitBreaker;
    use crate::core::cache::ShortTermCache;
    use crate::core::history::QueryHistoryStore;
    use crate::core::llm::{LlmError, MockProvider};
    use sqlx::SqlitePool;
    use std::sync::Arc;

    async fn sql_tool(llm: Arc<dyn crate::core::llm::LlmProvider>, config: Config) -> (SqlTool, SqlitePool) {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();

        let short_cache = Arc::new(ShortTermCache::new(CacheConfig::default()));
        let history = Arc::new(QueryHistoryStore::new(pool.clone(), HistoryConfig::default()));
        let breaker = Arc::new(CircuitBreaker::new(config.breaker.clone()));
        let planner = SqlPlanner::new(
            short_cache,
            history,
            llm,
            breaker,
            &config.llm,
            &config.validator,
        );
        let rate_limiter = RateLimiter::new(config.rate_limit.clone());
        let executor = QueryExecutor::new(mysql_async::Pool::new("mysql://127.0.0.1:1/none"));
        let audit = AuditSink::new(pool.clone());
        (SqlTool::new(config, rate_limiter, planner, executor, audit), pool)
    }

    #[test]
    fn classifies_raw_sql_and_natural_language() {
        assert!(is_raw_sql("SELECT * FROM sales_fact"));
        assert!(is_raw_sql("  drop table audit_log"));
        assert!(!is_raw_sql("show me revenue by region"));
    }

    #[tokio::test]
    async fn raw_sql_with_blocked_keyword_is_rejected_before_execution() {
        let config = Config::default();
        let (tool, pool) = sql_tool(Arc::new(MockProvider::canned_plan("unused", 0.9)), config).await;

        let request = Request {
            query: "DROP TABLE audit_log".to_string(),
            user_id: Some("user-1".to_string()),
            correlation_id: None,
            bypass_cache: false,
        };
        match tool.handle(request, "127.0.0.1").await {
            ToolResponse::Error(err) => {
                assert_eq!(err.category, "validation");
                assert!(!err.retryable);
            },
            _ => panic!("expected a validation error"),
        }

        let audits: Vec<(bool,)> = sqlx::query_as("SELECT success FROM audit_log")
            .fetch_all(&pool)
            .await
            .unwrap();
        assert_eq!(audits.len(), 1);
        assert!(!audits[0].0);
    }

    #[tokio::test]
    async fn low_confidence_plan_is_a_clarification_not_an_error() {
        let config = Config::default();
        let mock = Arc::new(MockProvider::canned_plan("SELECT 1 FROM sales_fact LIMIT 200", 0.45));
        let (tool, _pool) = sql_tool(mock, config).await;

        let request = Request {
            query: "how are we doing".to_string(),
            user_id: Some("user-1".to_string()),
            correlation_id: None,
            bypass_cache: false,
        };
        match tool.handle(request, "127.0.0.1").await {
            ToolResponse::Clarification(c) => assert_eq!(c.notes, "low_confidence"),
            _ => panic!("expected a clarification response"),
        }
    }

    #[tokio::test]
    async fn confidence_exactly_at_threshold_passes() {
        // Can't execute without a real data store, but we can assert it does
        // NOT take the clarification branch by observing the planner/executor
        // failure category is execution, not a clarification.
        let mut config = Config::default();
        config.llm.confidence_threshold = 0.7;
        let mock = Arc::new(MockProvider::canned_plan("SELECT 1 FROM sales_fact LIMIT 200", 0.7));
        let (tool, _pool) = sql_tool(mock, config).await;

        let request = Request {
            query: "exact threshold question".to_string(),
            user_id: Some("user-1".to_string()),
            correlation_id: None,
            bypass_cache: false,
        };
        match tool.handle(request, "127.0.0.1").await {
            ToolResponse::Clarification(_) => panic!("0.7 should pass the >= threshold gate"),
            ToolResponse::Error(err) => assert_eq!(err.category, "execution"),
            ToolResponse::Success(_) => {},
        }
    }

    #[tokio::test]
    async fn rate_limit_rejects_before_any_downstream_call() {
        let mut config = Config::default();
        config.rate_limit.max_requests = 1;
        let mock = Arc::new(MockProvider::canned_plan("SELECT 1 FROM sales_fact LIMIT 200", 0.9));
        let (tool, _pool) = sql_tool(mock.clone(), config).await;

        let make_request = || Request {
            query: "show revenue".to_string(),
            user_id: Some("user-1".to_string()),
            correlation_id: None,
            bypass_cache: true,
        };

        let _ = tool.handle(make_request(), "127.0.0.1").await;
        match tool.handle(make_request(), "127.0.0.1").await {
            ToolResponse::Error(err) => {
                assert_eq!(err.category, "rate_limit");
                assert!(err.retry_after_seconds.unwrap() > 0);
            },
            _ => panic!("expected a rate_limit error"),
        }
    }

    #[tokio::test]
    async fn schema_violation_from_llm_surfaces_as_planning_error() {
        let config = Config::default();
        let mock: Arc<dyn crate::core::llm::LlmProvider> = Arc::new(MockProvider::new(vec![Err(
            LlmError::StructuredOutputError("no sql field".to_string()),
        )]));
        let (tool, _pool) = sql_tool(mock, config).await;

        let request = Request {
            query: "a confusing question".to_string(),
            user_id: Some("user-1".to_string()),
            correlation_id: None,
            bypass_cache: false,
        };
        match tool.handle(request, "127.0.0.1").await {
            ToolResponse::Error(err) => {
                assert_eq!(err.category, "planning");
                assert!(!err.retryable);
            },
            _ => panic!("expected a planning error"),
        }
    }
}
