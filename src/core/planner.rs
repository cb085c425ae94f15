//! SQL Planner (C10, spec.md §4.9).
//!
//! Orchestrates C4-C9: consults the short-term cache, then query history,
//! and only then calls the LLM through the timeout wrapper and circuit
//! breaker. Does not validate SQL and does not gate confidence — both stay
//! the Orchestrator's job so this component stays reusable on its own
//! (spec.md §4.9), the same separation this codebase draws between
//! `LLMService` and the handlers that call it.

use crate::config::{LlmConfig, ValidatorConfig};
use crate::core::cache::ShortTermCache;
use crate::core::errors::PlannerError;
use crate::core::hashing::query_hash;
use crate::core::history::{plan_from_history, NewHistoryEntry, QueryHistoryStore};
use crate::core::llm::{LlmError, LlmProvider};
use crate::core::timeout::with_timeout;
use crate::models::{Plan, PlanSource, Usage};
use std::sync::Arc;
use std::time::Duration;

pub struct PlannedOutcome {
    pub plan: Plan,
    pub usage: Usage,
}

pub struct SqlPlanner {
    short_cache: Arc<ShortTermCache>,
    history: Arc<QueryHistoryStore>,
    llm: Arc<dyn LlmProvider>,
    breaker: Arc<crate::core::breaker::CircuitBreaker>,
    llm_timeout: Duration,
    allowlisted_tables: Vec<String>,
}

impl SqlPlanner {
    pub fn new(
        short_cache: Arc<ShortTermCache>,
        history: Arc<QueryHistoryStore>,
        llm: Arc<dyn LlmProvider>,
        breaker: Arc<crate::core::breaker::CircuitBreaker>,
        llm_config: &LlmConfig,
        validator_config: &ValidatorConfig,
    ) -> Self {
        Self {
            short_cache,
            history,
            llm,
            breaker,
            llm_timeout: Duration::from_secs(llm_config.timeout_seconds),
            allowlisted_tables: validator_config.allowlisted_tables.clone(),
        }
    }

    /// spec.md §4.9's five-step algorithm.
    pub async fn plan(&self, nl_query: &str, bypass_cache: bool) -> Result<PlannedOutcome, PlannerError> {
        let key = query_hash(nl_query);

        if !bypass_cache {
            if let Some(plan) = self.short_cache.get(&key).await {
                return Ok(PlannedOutcome { plan, usage: Usage::default() });
            }

            if let Some(entry) = self.history.lookup(nl_query).await {
                let plan = plan_from_history(&entry);
                self.short_cache.set(&key, &plan).await;
                return Ok(PlannedOutcome { plan, usage: Usage::default() });
            }
        }

        let prompt = self.build_prompt(nl_query);
        let llm = Arc::clone(&self.llm);
        let timeout = self.llm_timeout;

        let raw = self
            .breaker
            .call(move || async move {
                with_timeout(timeout, llm.generate_structured(&prompt))
                    .await
                    .map_err(|_| PlannerError::Timeout)?
                    .map_err(classify_llm_error)
            })
            .await?;

        let plan = Plan {
            sql: raw.schema.sql,
            confidence: raw.schema.confidence,
            explanation: raw.schema.explanation,
            source: PlanSource::Llm,
        };

        Ok(PlannedOutcome { plan, usage: raw.usage })
    }

    /// Persists the first-time LLM/history-warmed result into history, and,
    /// unless the request opted out with `bypass_cache`, warms the
    /// short-term cache too. Called by the orchestrator after re-validation
    /// and execution succeed (spec.md §4.11 step 9). `bypass_cache=true`
    /// still writes history — only the short-term cache write is skipped
    /// (spec.md §9 Open Question 2). Returns whether the history write
    /// succeeded, so the orchestrator can surface
    /// `notes="history_write_failed"` on partial failure (spec.md §7).
    pub async fn persist_success(
        &self,
        nl_query: &str,
        plan: &Plan,
        row_count: i64,
        execution_time_ms: i64,
        usage: Usage,
        user_id: Option<&str>,
        correlation_id: &str,
        bypass_cache: bool,
    ) -> bool {
        let key = query_hash(nl_query);
        if !bypass_cache {
            self.short_cache.set(&key, plan).await;
        }
        self.history
            .store(NewHistoryEntry {
                natural_language_query: nl_query,
                generated_sql: &plan.sql,
                confidence: plan.confidence,
                row_count,
                execution_time_ms,
                tokens_in: usage.tokens_in as i32,
                tokens_out: usage.tokens_out as i32,
                cost_usd: usage.cost_usd,
                user_id,
                correlation_id,
            })
            .await
    }

    fn build_prompt(&self, nl_query: &str) -> String {
        format!(
            "Tables available (read-only): {}.\n\
             Answer the following analytics question with a single SQL SELECT \
             statement that includes a LIMIT clause. Question: {}",
            self.allowlisted_tables.join(", "),
            nl_query
        )
    }
}

fn classify_llm_error(err: LlmError) -> PlannerError {
    match err {
        LlmError::StructuredOutputError(msg) => PlannerError::SchemaViolation(msg),
        LlmError::ApiError(msg) => PlannerError::ProviderFailure(msg),
        LlmError::RateLimited(secs) => {
            PlannerError::ProviderFailure(format!("rate limited by provider, retry after {secs}s"))
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::core::breaker::CircuitBreaker;
    use crate::core::llm::MockProvider;
    use sqlx::SqlitePool;

    async fn planner_with(llm: Arc<dyn LlmProvider>) -> (SqlPlanner, Arc<crate::core::breaker::CircuitBreaker>) {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();

        let short_cache = Arc::new(ShortTermCache::new(CacheConfig::default()));
        let history = Arc::new(QueryHistoryStore::new(pool, crate::config::HistoryConfig::default()));
        let breaker = Arc::new(CircuitBreaker::new(crate::config::BreakerConfig::default()));

        let planner = SqlPlanner::new(
            short_cache,
            history,
            llm,
            Arc::clone(&breaker),
            &LlmConfig::default(),
            &ValidatorConfig::default(),
        );
        (planner, breaker)
    }

    #[tokio::test]
    async fn first_call_goes_to_llm_second_call_is_cached() {
        let mock = Arc::new(MockProvider::canned_plan("SELECT 1 FROM sales_fact LIMIT 200", 0.9));
        let (planner, _) = planner_with(mock.clone()).await;

        let first = planner.plan("show revenue", false).await.unwrap();
        assert_eq!(first.plan.source, PlanSource::Llm);

        let stored = planner
            .persist_success("show revenue", &first.plan, 3, 5, first.usage, None, "corr-1", false)
            .await;
        assert!(stored);

        let second = planner.plan("show  REVENUE", false).await.unwrap();
        assert_eq!(second.plan.source, PlanSource::ShortCache);
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn bypass_cache_always_calls_the_llm() {
        let mock = Arc::new(MockProvider::canned_plan("SELECT 1 FROM sales_fact LIMIT 200", 0.9));
        let (planner, _) = planner_with(mock.clone()).await;

        let first = planner.plan("show revenue", false).await.unwrap();
        planner
            .persist_success("show revenue", &first.plan, 1, 1, first.usage, None, "c1", false)
            .await;

        planner.plan("show revenue", true).await.unwrap();
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn bypass_cache_on_persist_still_writes_history_but_skips_short_cache() {
        let mock = Arc::new(MockProvider::canned_plan("SELECT 1 FROM sales_fact LIMIT 200", 0.9));
        let (planner, _) = planner_with(mock).await;

        let first = planner.plan("a bypassed question", true).await.unwrap();
        let stored = planner
            .persist_success("a bypassed question", &first.plan, 1, 1, first.usage, None, "c1", true)
            .await;
        assert!(stored);

        // History was written even though the request bypassed the cache...
        let history_hit = planner.history.lookup("a bypassed question").await;
        assert!(history_hit.is_some());
        // ...but the short-term cache was not warmed.
        let cache_hit = planner.short_cache.get(&query_hash("a bypassed question")).await;
        assert!(cache_hit.is_none());
    }

    #[tokio::test]
    async fn schema_violation_is_not_retried_by_the_breaker() {
        let mock = Arc::new(MockProvider::new(vec![Err(LlmError::StructuredOutputError(
            "missing sql field".to_string(),
        ))]));
        let (planner, breaker) = planner_with(mock).await;

        let result = planner.plan("broken question", false).await;
        assert!(matches!(result, Err(PlannerError::SchemaViolation(_))));
        // A single schema violation does not open the breaker by itself.
        assert_eq!(breaker.state(), crate::core::breaker::State::Closed);
    }

    #[tokio::test]
    async fn timeout_propagates_as_planner_timeout() {
        struct SlowProvider;
        #[async_trait::async_trait]
        impl LlmProvider for SlowProvider {
            async fn generate_structured(
                &self,
                _prompt: &str,
            ) -> Result<crate::core::llm::RawPlan, LlmError> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                unreachable!()
            }
        }

        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        let short_cache = Arc::new(ShortTermCache::new(CacheConfig::default()));
        let history = Arc::new(QueryHistoryStore::new(pool, crate::config::HistoryConfig::default()));
        let breaker = Arc::new(CircuitBreaker::new(crate::config::BreakerConfig::default()));
        let mut llm_config = LlmConfig::default();
        llm_config.timeout_seconds = 0;

        let planner = SqlPlanner::new(
            short_cache,
            history,
            Arc::new(SlowProvider),
            breaker,
            &llm_config,
            &ValidatorConfig::default(),
        );

        let result = planner.plan("anything", false).await;
        assert!(matches!(result, Err(PlannerError::Timeout)));
    }
}
