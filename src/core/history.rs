//! Query History Store (C9, spec.md §4.8).
//!
//! Long-retention companion to the short-term cache, `sqlx::SqlitePool`
//! backed. Upserts are idempotent by `query_hash`: the first validated SQL
//! for a given normalized NL query wins, and a conflicting `store()` only
//! bumps `use_count`/`last_used_at` — directly modeled on this codebase's
//! `llm_cache` / `llm_usage_stats` `INSERT ... ON CONFLICT DO UPDATE`
//! patterns (`services/llm/repository.rs`).

use crate::config::HistoryConfig;
use crate::core::hashing::query_hash;
use crate::models::{HistoryEntry, Plan, PlanSource};
use chrono::{Duration, Utc};
use sqlx::SqlitePool;

pub struct QueryHistoryStore {
    pool: SqlitePool,
    retention_days: i64,
}

/// Everything the planner needs to persist a successful LLM-derived plan.
pub struct NewHistoryEntry<'a> {
    pub natural_language_query: &'a str,
    pub generated_sql: &'a str,
    pub confidence: f64,
    pub row_count: i64,
    pub execution_time_ms: i64,
    pub tokens_in: i32,
    pub tokens_out: i32,
    pub cost_usd: f64,
    pub user_id: Option<&'a str>,
    pub correlation_id: &'a str,
}

impl QueryHistoryStore {
    pub fn new(pool: SqlitePool, config: HistoryConfig) -> Self {
        Self { pool, retention_days: config.retention_days }
    }

    /// Returns the non-expired entry for `nl_query`, if any, atomically
    /// bumping `use_count`/`last_used_at` on hit (spec.md §3, §4.8).
    pub async fn lookup(&self, nl_query: &str) -> Option<HistoryEntry> {
        let hash = query_hash(nl_query);
        let now = Utc::now();

        let updated = sqlx::query(
            r#"UPDATE query_history
               SET use_count = use_count + 1, last_used_at = ?
               WHERE query_hash = ? AND expires_at > ?"#,
        )
        .bind(now)
        .bind(&hash)
        .bind(now)
        .execute(&self.pool)
        .await
        .ok()?;

        if updated.rows_affected() == 0 {
            return None;
        }

        sqlx::query_as::<_, HistoryEntry>("SELECT * FROM query_history WHERE query_hash = ?")
            .bind(&hash)
            .fetch_optional(&self.pool)
            .await
            .ok()
            .flatten()
    }

    /// Upserts by `query_hash`. On first insert, `expires_at = created_at +
    /// retention_days`. On conflict, the stored SQL/confidence are left
    /// untouched and only `use_count`/`last_used_at` advance — the first
    /// validated SQL wins (spec.md §4.8). Returns whether the write
    /// succeeded so the caller can surface `notes="history_write_failed"`
    /// (spec.md §7) without failing the request.
    pub async fn store(&self, entry: NewHistoryEntry<'_>) -> bool {
        let hash = query_hash(entry.natural_language_query);
        let now = Utc::now();
        let expires_at = now + Duration::days(self.retention_days);

        let result = sqlx::query(
            r#"INSERT INTO query_history
               (query_hash, natural_language_query, generated_sql, confidence, row_count,
                execution_time_ms, tokens_in, tokens_out, cost_usd, user_id, correlation_id,
                created_at, last_used_at, use_count, expires_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?)
               ON CONFLICT(query_hash) DO UPDATE SET
                 use_count = use_count + 1,
                 last_used_at = excluded.last_used_at"#,
        )
        .bind(&hash)
        .bind(entry.natural_language_query)
        .bind(entry.generated_sql)
        .bind(entry.confidence)
        .bind(entry.row_count)
        .bind(entry.execution_time_ms)
        .bind(entry.tokens_in)
        .bind(entry.tokens_out)
        .bind(entry.cost_usd)
        .bind(entry.user_id)
        .bind(entry.correlation_id)
        .bind(now)
        .bind(now)
        .bind(expires_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => true,
            Err(e) => {
                tracing::error!("query history: failed to store entry: {e}");
                false
            },
        }
    }

    /// Deletes every entry whose retention window has elapsed. Invoked by
    /// the external `ScheduledExecutor` loop, not from the request path.
    pub async fn cleanup(&self) -> anyhow::Result<u64> {
        let result = sqlx::query("DELETE FROM query_history WHERE expires_at < ?")
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

/// Builds a `Plan` from a history hit, with `source=history` per spec.md §4.9 step 3.
pub fn plan_from_history(entry: &HistoryEntry) -> Plan {
    Plan {
        sql: entry.generated_sql.clone(),
        confidence: entry.confidence,
        explanation: "reused from query history".to_string(),
        source: PlanSource::History,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> QueryHistoryStore {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        QueryHistoryStore::new(pool, HistoryConfig { retention_days: 30 })
    }

    fn entry<'a>(nl: &'a str, sql: &'a str, corr: &'a str) -> NewHistoryEntry<'a> {
        NewHistoryEntry {
            natural_language_query: nl,
            generated_sql: sql,
            confidence: 0.9,
            row_count: 3,
            execution_time_ms: 10,
            tokens_in: 50,
            tokens_out: 20,
            cost_usd: 0.001,
            user_id: Some("user-1"),
            correlation_id: corr,
        }
    }

    #[tokio::test]
    async fn miss_on_empty_store() {
        let store = store().await;
        assert!(store.lookup("show revenue").await.is_none());
    }

    #[tokio::test]
    async fn store_then_lookup_round_trips_and_bumps_use_count() {
        let store = store().await;
        store
            .store(entry("Show revenue by region", "SELECT 1 FROM sales_fact LIMIT 200", "c1"))
            .await;

        let hit = store.lookup("show  REVENUE  by region").await.unwrap();
        assert_eq!(hit.generated_sql, "SELECT 1 FROM sales_fact LIMIT 200");
        assert_eq!(hit.use_count, 2);

        let hit2 = store.lookup("show revenue by region").await.unwrap();
        assert_eq!(hit2.use_count, 3);
    }

    #[tokio::test]
    async fn conflicting_store_keeps_first_sql_but_bumps_use_count() {
        let store = store().await;
        store.store(entry("q", "SELECT a FROM sales_fact LIMIT 200", "c1")).await;
        store.store(entry("q", "SELECT b FROM sales_fact LIMIT 200", "c2")).await;

        let hit = store.lookup("q").await.unwrap();
        assert_eq!(hit.generated_sql, "SELECT a FROM sales_fact LIMIT 200");
        // Two `store()` upserts bump use_count 1 -> 2, then this `lookup()`
        // itself bumps it again before reading the row.
        assert_eq!(hit.use_count, 3);
    }

    #[tokio::test]
    async fn expires_at_is_created_at_plus_retention_days() {
        let store = store().await;
        store.store(entry("q", "SELECT 1 FROM sales_fact LIMIT 200", "c1")).await;

        let row: (chrono::DateTime<Utc>, chrono::DateTime<Utc>) = sqlx::query_as(
            "SELECT created_at, expires_at FROM query_history WHERE query_hash = ?",
        )
        .bind(query_hash("q"))
        .fetch_one(&store.pool)
        .await
        .unwrap();

        let delta = (row.1 - row.0).num_days();
        assert_eq!(delta, 30);
    }

    #[tokio::test]
    async fn cleanup_deletes_only_expired_entries() {
        let store = store().await;
        store.store(entry("q", "SELECT 1 FROM sales_fact LIMIT 200", "c1")).await;

        sqlx::query("UPDATE query_history SET expires_at = ? WHERE query_hash = ?")
            .bind(Utc::now() - Duration::days(1))
            .bind(query_hash("q"))
            .execute(&store.pool)
            .await
            .unwrap();

        let deleted = store.cleanup().await.unwrap();
        assert_eq!(deleted, 1);
        assert!(store.lookup("q").await.is_none());
    }
}
