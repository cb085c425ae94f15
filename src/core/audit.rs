//! Audit Sink (C2, spec.md §4.10).
//!
//! Append-only record of every core operation. `input`/`output` are
//! canonicalized (stable key ordering) and hashed before storage — no
//! plaintext query or result ever reaches the audit table (spec.md §3
//! invariant). Failure to audit is logged and swallowed: availability over
//! observability, the same posture this codebase's `llm_cache` write path
//! already takes toward its own backing store.

use crate::core::hashing::canonicalize_and_hash;
use crate::models::AuditRecord;
use chrono::Utc;
use sqlx::SqlitePool;
use std::time::Instant;

pub struct AuditSink {
    pool: SqlitePool,
}

impl AuditSink {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Inserts one append-only row. Never returns an error to the caller —
    /// a failed audit write is logged via `tracing::error!` and otherwise
    /// invisible, per spec.md §4.10/§7.
    pub async fn record(
        &self,
        action: &str,
        correlation_id: &str,
        user_id: Option<&str>,
        input: &serde_json::Value,
        output: &serde_json::Value,
        success: bool,
        duration_ms: i64,
    ) {
        let input_hash = canonicalize_and_hash(input);
        let output_hash = canonicalize_and_hash(output);
        let ts = Utc::now();

        let result = sqlx::query(
            r#"INSERT INTO audit_log
               (ts, correlation_id, user_id, tool, action, input_hash, output_hash, success, duration_ms)
               VALUES (?, ?, ?, 'sql', ?, ?, ?, ?, ?)"#,
        )
        .bind(ts)
        .bind(correlation_id)
        .bind(user_id)
        .bind(action)
        .bind(&input_hash)
        .bind(&output_hash)
        .bind(success)
        .bind(duration_ms)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            tracing::error!(
                correlation_id,
                action,
                "audit sink: failed to write audit record: {e}"
            );
        }
    }

    /// Scoped-block helper: times `f`, runs it, and guarantees exactly one
    /// audit record on every exit path (success or error) — spec.md §4.10
    /// "may be used as a scoped block".
    pub async fn scoped<F, Fut, T, E>(
        &self,
        action: &str,
        correlation_id: &str,
        user_id: Option<&str>,
        input: &serde_json::Value,
        f: F,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<(T, serde_json::Value), E>>,
        E: std::fmt::Display,
    {
        let start = Instant::now();
        let outcome = f().await;
        let duration_ms = start.elapsed().as_millis() as i64;

        match &outcome {
            Ok((_, output)) => {
                self.record(action, correlation_id, user_id, input, output, true, duration_ms)
                    .await;
            },
            Err(e) => {
                let output = serde_json::json!({ "error": e.to_string() });
                self.record(action, correlation_id, user_id, input, &output, false, duration_ms)
                    .await;
            },
        }

        outcome.map(|(value, _)| value)
    }

    /// Returns the most recent records for a correlation id, newest first.
    /// Used by tests and operational debugging; never by the request path.
    #[cfg(test)]
    pub async fn find_by_correlation_id(&self, correlation_id: &str) -> Vec<AuditRecord> {
        sqlx::query_as::<_, AuditRecord>(
            "SELECT * FROM audit_log WHERE correlation_id = ? ORDER BY ts DESC",
        )
        .bind(correlation_id)
        .fetch_all(&self.pool)
        .await
        .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn pool() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn record_writes_hashes_not_plaintext() {
        let sink = AuditSink::new(pool().await);
        let input = serde_json::json!({"query": "show me revenue"});
        let output = serde_json::json!({"rows": [[1, 2]]});
        sink.record("query", "corr-1", Some("user-1"), &input, &output, true, 12).await;

        let records = sink.find_by_correlation_id("corr-1").await;
        assert_eq!(records.len(), 1);
        assert!(!records[0].input_hash.contains("revenue"));
        assert_eq!(records[0].input_hash.len(), 64);
        assert!(records[0].success);
    }

    #[tokio::test]
    async fn hash_depends_only_on_canonicalized_content() {
        let sink = AuditSink::new(pool().await);
        let a = serde_json::json!({"b": 1, "a": 2});
        let b = serde_json::json!({"a": 2, "b": 1});
        sink.record("query", "corr-a", None, &a, &serde_json::json!({}), true, 1).await;
        sink.record("query", "corr-b", None, &b, &serde_json::json!({}), true, 1).await;

        let ra = sink.find_by_correlation_id("corr-a").await;
        let rb = sink.find_by_correlation_id("corr-b").await;
        assert_eq!(ra[0].input_hash, rb[0].input_hash);
    }

    #[tokio::test]
    async fn scoped_records_on_success_and_failure() {
        let sink = AuditSink::new(pool().await);

        let ok: Result<u32, String> = sink
            .scoped("query", "corr-ok", None, &serde_json::json!({}), || async {
                Ok::<_, String>((42u32, serde_json::json!({"rows": 1})))
            })
            .await;
        assert_eq!(ok.unwrap(), 42);
        assert!(sink.find_by_correlation_id("corr-ok").await[0].success);

        let err: Result<u32, String> = sink
            .scoped("query", "corr-err", None, &serde_json::json!({}), || async {
                Err::<(u32, serde_json::Value), String>("boom".to_string())
            })
            .await;
        assert!(err.is_err());
        assert!(!sink.find_by_correlation_id("corr-err").await[0].success);
    }
}
