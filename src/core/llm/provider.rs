//! The flat capability-set trait every LLM provider implements. Kept to a
//! single method so new vendors are a struct away, never an inheritance tree
//! (spec.md §9).

use crate::models::Usage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Wire contract the LLM is instructed to produce (spec.md §6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanSchema {
    pub sql: String,
    pub confidence: f64,
    pub explanation: String,
}

impl PlanSchema {
    /// Enforces the bounds spec.md §3 promises beyond mere JSON shape:
    /// `confidence` "real in [0,1]", `sql`/`explanation` non-empty. A
    /// response that parses but violates these is still a
    /// `StructuredOutputError` — the confidence gate must only ever see
    /// values that are trustworthy as a gate.
    pub fn validate(&self) -> Result<(), LlmError> {
        if self.sql.trim().is_empty() {
            return Err(LlmError::StructuredOutputError("sql must not be empty".to_string()));
        }
        if self.explanation.trim().is_empty() {
            return Err(LlmError::StructuredOutputError("explanation must not be empty".to_string()));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(LlmError::StructuredOutputError(format!(
                "confidence {} is outside [0,1]",
                self.confidence
            )));
        }
        Ok(())
    }
}

/// A `PlanSchema` plus the usage accounting for the call that produced it.
#[derive(Debug, Clone)]
pub struct RawPlan {
    pub schema: PlanSchema,
    pub usage: Usage,
}

#[derive(Debug, Error, Clone)]
pub enum LlmError {
    #[error("LLM returned a response that did not match the expected schema: {0}")]
    StructuredOutputError(String),
    #[error("LLM provider returned an error: {0}")]
    ApiError(String),
    #[error("LLM provider rate-limited the request, retry after {0}s")]
    RateLimited(u64),
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Asks the provider for a structured plan matching `PlanSchema`, given a
    /// natural-language `prompt` that already embeds the fixed table schema
    /// and allowlist. Malformed or non-conforming JSON is a
    /// `StructuredOutputError`, not a parse retry.
    async fn generate_structured(&self, prompt: &str) -> Result<RawPlan, LlmError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema(sql: &str, confidence: f64, explanation: &str) -> PlanSchema {
        PlanSchema { sql: sql.to_string(), confidence, explanation: explanation.to_string() }
    }

    #[test]
    fn accepts_a_well_formed_schema() {
        assert!(schema("SELECT 1 FROM sales_fact LIMIT 1", 0.9, "ok").validate().is_ok());
    }

    #[test]
    fn rejects_confidence_above_one() {
        assert!(schema("SELECT 1 FROM sales_fact LIMIT 1", 1.7, "ok").validate().is_err());
    }

    #[test]
    fn rejects_negative_confidence() {
        assert!(schema("SELECT 1 FROM sales_fact LIMIT 1", -0.1, "ok").validate().is_err());
    }

    #[test]
    fn confidence_exactly_at_the_bounds_is_accepted() {
        assert!(schema("SELECT 1 FROM sales_fact LIMIT 1", 0.0, "ok").validate().is_ok());
        assert!(schema("SELECT 1 FROM sales_fact LIMIT 1", 1.0, "ok").validate().is_ok());
    }

    #[test]
    fn rejects_empty_sql() {
        assert!(schema("", 0.9, "ok").validate().is_err());
    }

    #[test]
    fn rejects_empty_explanation() {
        assert!(schema("SELECT 1 FROM sales_fact LIMIT 1", 0.9, "").validate().is_err());
    }
}
