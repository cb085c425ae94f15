//! SQL Safety Validator (C1, spec.md §4.1).
//!
//! Deterministic, stateless, final authority over what may be executed.
//! Layers run in order and short-circuit on the first failure. The limit
//! enforcement layer is the sole rewrite this validator performs; everything
//! else either passes the SQL through unchanged or rejects it outright.

use crate::config::ValidatorConfig;
use crate::core::errors::SafetyError;
use once_cell::sync::Lazy;
use regex::Regex;

static FROM_TABLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bFROM\s+([A-Za-z_][A-Za-z0-9_]*)").expect("static regex is valid")
});

static LIMIT_CLAUSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bLIMIT\s+\d+\b").expect("static regex is valid"));

/// Validates `sql` against every layer, returning the (possibly
/// limit-appended) sanitized statement or the first `SafetyError` hit.
///
/// Idempotent once it succeeds: `validate(validate(s)?)? == validate(s)?`,
/// since the only rewrite it performs (limit enforcement) is a no-op on SQL
/// that already carries a `LIMIT` clause.
pub fn validate(sql: &str, config: &ValidatorConfig) -> Result<String, SafetyError> {
    shape_gate(sql)?;
    statement_boundary_gate(sql)?;
    keyword_blocklist(sql, config)?;
    let limited = enforce_limit(sql, config.default_limit);
    table_allowlist(&limited, config)?;
    Ok(limited)
}

fn shape_gate(sql: &str) -> Result<(), SafetyError> {
    let trimmed = sql.trim();
    if trimmed.to_uppercase().starts_with("SELECT") {
        Ok(())
    } else {
        Err(SafetyError::NotAShape)
    }
}

fn statement_boundary_gate(sql: &str) -> Result<(), SafetyError> {
    if sql.contains(';') {
        Err(SafetyError::MultipleStatements)
    } else {
        Ok(())
    }
}

fn keyword_blocklist(sql: &str, config: &ValidatorConfig) -> Result<(), SafetyError> {
    for keyword in &config.blocked_keywords {
        let pattern = format!(r"(?i)\b{}\b", regex::escape(keyword));
        let re = Regex::new(&pattern).expect("blocked keyword pattern is valid");
        if re.is_match(sql) {
            return Err(SafetyError::BlockedKeyword(keyword.clone()));
        }
    }
    Ok(())
}

/// Appends `LIMIT <default>` when the statement doesn't already carry one.
/// The only mutation the validator performs; `LIMIT 0` counts as present.
fn enforce_limit(sql: &str, default_limit: u32) -> String {
    if LIMIT_CLAUSE.is_match(sql) {
        sql.to_string()
    } else {
        let trimmed = sql.trim_end().trim_end_matches(';');
        format!("{} LIMIT {}", trimmed, default_limit)
    }
}

fn table_allowlist(sql: &str, config: &ValidatorConfig) -> Result<(), SafetyError> {
    for capture in FROM_TABLE.captures_iter(sql) {
        let table = &capture[1];
        let allowed = config
            .allowlisted_tables
            .iter()
            .any(|t| t.eq_ignore_ascii_case(table));
        if !allowed {
            return Err(SafetyError::TableNotAllowed(table.to_string()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> ValidatorConfig {
        ValidatorConfig::default()
    }

    #[test]
    fn rejects_non_select_shape() {
        assert!(matches!(validate("S", &cfg()), Err(SafetyError::NotAShape)));
        assert!(matches!(validate("DROP TABLE audit_log", &cfg()), Err(SafetyError::NotAShape)));
    }

    #[test]
    fn rejects_semicolons() {
        let sql = "SELECT 1 FROM sales_fact; DROP TABLE sales_fact";
        assert!(matches!(validate(sql, &cfg()), Err(SafetyError::MultipleStatements)));
    }

    #[test]
    fn rejects_blocked_keywords() {
        let sql = "SELECT * FROM sales_fact WHERE 1=1 OR DELETE FROM sales_fact";
        assert!(matches!(validate(sql, &cfg()), Err(SafetyError::BlockedKeyword(_))));
    }

    #[test]
    fn appends_default_limit_when_absent() {
        let sanitized = validate("SELECT * FROM sales_fact", &cfg()).unwrap();
        assert!(sanitized.ends_with("LIMIT 200"));
    }

    #[test]
    fn limit_zero_counts_as_present() {
        let sanitized = validate("SELECT * FROM sales_fact LIMIT 0", &cfg()).unwrap();
        assert_eq!(sanitized, "SELECT * FROM sales_fact LIMIT 0");
    }

    #[test]
    fn validate_is_idempotent_once_it_succeeds() {
        let once = validate("SELECT * FROM sales_fact", &cfg()).unwrap();
        let twice = validate(&once, &cfg()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn rejects_table_not_on_allowlist() {
        let sql = "SELECT a.x FROM sales_fact a JOIN users u ON a.id = u.id";
        assert!(matches!(validate(sql, &cfg()), Err(SafetyError::TableNotAllowed(t)) if t == "users"));
    }

    #[test]
    fn accepts_multiple_allowlisted_tables() {
        let sql = "SELECT a.x FROM sales_fact a JOIN job_runs j ON a.id = j.id";
        assert!(validate(sql, &cfg()).is_ok());
    }
}
