//! Query Executor (C3, spec.md §4.2).
//!
//! Executes already-validated, read-only SQL against the external analytic
//! store. Row materialization is eager and bounded only by the `LIMIT` the
//! validator guarantees is present. Adapted from this codebase's
//! `mysql_client.rs` value-conversion logic: arbitrary-precision numerics are
//! narrowed to `f64` and temporal values are rendered as ISO-8601 strings at
//! this boundary, since the wire contract mandates floats (spec.md §9).

use crate::core::errors::ExecutionError;
use crate::models::ExecutionResult;
use mysql_async::prelude::Queryable;
use mysql_async::{Pool, Row, Value};

#[derive(Clone)]
pub struct QueryExecutor {
    pool: Pool,
}

impl QueryExecutor {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Runs `sanitized_sql` (already passed through the validator) and
    /// materializes every row. Connections are acquired per call and
    /// released back to the pool when the guard drops.
    pub async fn execute(&self, sanitized_sql: &str) -> Result<ExecutionResult, ExecutionError> {
        let mut conn = self
            .pool
            .get_conn()
            .await
            .map_err(|e| ExecutionError::Transport(e.to_string()))?;

        let rows: Vec<Row> =
            conn.query(sanitized_sql).await.map_err(classify_mysql_error)?;

        let columns: Vec<String> = rows
            .first()
            .map(|r| r.columns_ref().iter().map(|c| c.name_str().to_string()).collect())
            .unwrap_or_default();

        let mut out_rows = Vec::with_capacity(rows.len());
        for row in rows {
            let values = row.unwrap();
            out_rows.push(values.iter().map(value_to_json).collect());
        }

        let row_count = out_rows.len();
        Ok(ExecutionResult { columns, rows: out_rows, row_count })
    }
}

fn classify_mysql_error(err: mysql_async::Error) -> ExecutionError {
    match &err {
        mysql_async::Error::Server(server_err) => {
            // 1044/1045/1142/1143: access/command denied — not retryable.
            if matches!(server_err.code, 1044 | 1045 | 1142 | 1143) {
                ExecutionError::Permission(server_err.message.clone())
            } else {
                ExecutionError::Transport(server_err.message.clone())
            }
        },
        _ => ExecutionError::Transport(err.to_string()),
    }
}

fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::NULL => serde_json::Value::Null,
        // DECIMAL/NUMERIC columns have no dedicated `Value` variant and arrive
        // here as `Bytes`, same as VARCHAR/TEXT. Narrow to f64 per the wire
        // contract's float-only mandate (spec.md §9) whenever the bytes parse
        // as a number; genuine text columns fall back to a JSON string.
        Value::Bytes(bytes) => bytes_to_json(bytes),
        Value::Int(i) => serde_json::json!(i),
        Value::UInt(u) => serde_json::json!(u),
        Value::Float(f) => serde_json::json!(*f as f64),
        Value::Double(d) => serde_json::json!(d),
        Value::Date(year, month, day, hour, minute, second, micros) => {
            let base = format!(
                "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}",
                year, month, day, hour, minute, second
            );
            let iso = if *micros > 0 { format!("{}.{:06}", base, micros) } else { base };
            serde_json::Value::String(iso)
        },
        Value::Time(negative, days, hours, minutes, seconds, micros) => {
            let sign = if *negative { "-" } else { "" };
            let total_hours = u32::from(*days) * 24 + u32::from(*hours);
            let rendered = if *micros > 0 {
                format!("{}{:02}:{:02}:{:02}.{:06}", sign, total_hours, minutes, seconds, micros)
            } else {
                format!("{}{:02}:{:02}:{:02}", sign, total_hours, minutes, seconds)
            };
            serde_json::Value::String(rendered)
        },
    }
}

fn bytes_to_json(bytes: &[u8]) -> serde_json::Value {
    let text = String::from_utf8_lossy(bytes);
    match text.parse::<f64>() {
        Ok(n) => serde_json::json!(n),
        Err(_) => serde_json::Value::String(text.into_owned()),
    }
}
