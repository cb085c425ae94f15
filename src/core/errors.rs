//! Error taxonomy (C12): category, severity, retryability, 7-key serialization.
//!
//! Modeled on this codebase's `ApiError` (thiserror enum + helper
//! constructors + `IntoResponse`), restructured around category/severity/
//! retryable instead of numbered error codes.

use crate::models::ErrorResponse;
use chrono::Utc;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Planning,
    Validation,
    Execution,
    Timeout,
    RateLimit,
    CircuitBreaker,
    Cache,
    Configuration,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::Validation => "validation",
            Self::Execution => "execution",
            Self::Timeout => "timeout",
            Self::RateLimit => "rate_limit",
            Self::CircuitBreaker => "circuit_breaker",
            Self::Cache => "cache",
            Self::Configuration => "configuration",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

/// A SQL statement failed the safety validator. Never retried: retrying would
/// only gamble on a different unsafe LLM output for the same query.
#[derive(Debug, Error, Clone)]
pub enum SafetyError {
    #[error("statement must start with SELECT")]
    NotAShape,
    #[error("statement contains a semicolon or multiple statements")]
    MultipleStatements,
    #[error("statement contains a blocked keyword: {0}")]
    BlockedKeyword(String),
    #[error("statement references a table not on the allowlist: {0}")]
    TableNotAllowed(String),
}

/// Planner-level failure (spec.md §4.9).
#[derive(Debug, Error, Clone)]
pub enum PlannerError {
    #[error("LLM call timed out")]
    Timeout,
    #[error("circuit breaker is open")]
    CircuitOpen,
    #[error("LLM response did not match the expected schema: {0}")]
    SchemaViolation(String),
    #[error("LLM provider failure: {0}")]
    ProviderFailure(String),
}

/// Query-executor failure (spec.md §4.2).
#[derive(Debug, Error, Clone)]
pub enum ExecutionError {
    #[error("permission denied executing statement: {0}")]
    Permission(String),
    #[error("transport error talking to the data store: {0}")]
    Transport(String),
}

/// Top-level error returned by the orchestrator, carrying everything needed
/// to render the 7-key error taxonomy record.
#[derive(Debug, Error, Clone)]
pub enum PipelineError {
    #[error(transparent)]
    Safety(#[from] SafetyError),
    #[error(transparent)]
    Planner(#[from] PlannerError),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error("rate limit exceeded, retry after {retry_after_seconds}s")]
    RateLimit { retry_after_seconds: u64 },
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl PipelineError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Safety(_) => ErrorCategory::Validation,
            Self::Planner(PlannerError::Timeout) => ErrorCategory::Timeout,
            Self::Planner(PlannerError::CircuitOpen) => ErrorCategory::CircuitBreaker,
            Self::Planner(_) => ErrorCategory::Planning,
            Self::Execution(_) => ErrorCategory::Execution,
            Self::RateLimit { .. } => ErrorCategory::RateLimit,
            Self::Configuration(_) => ErrorCategory::Configuration,
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Self::Safety(_) => Severity::Warning,
            Self::Planner(PlannerError::Timeout) => Severity::Warning,
            Self::Planner(PlannerError::CircuitOpen) => Severity::Warning,
            Self::Planner(PlannerError::SchemaViolation(_)) => Severity::Warning,
            Self::Planner(PlannerError::ProviderFailure(_)) => Severity::Error,
            Self::Execution(ExecutionError::Permission(_)) => Severity::Error,
            Self::Execution(ExecutionError::Transport(_)) => Severity::Error,
            Self::RateLimit { .. } => Severity::Info,
            Self::Configuration(_) => Severity::Critical,
        }
    }

    /// Retryability matrix (spec.md §4.12).
    pub fn retryable(&self) -> bool {
        match self {
            Self::Safety(_) => false,
            Self::Planner(PlannerError::SchemaViolation(_)) => false,
            Self::Planner(PlannerError::Timeout) => true,
            Self::Planner(PlannerError::CircuitOpen) => true,
            Self::Planner(PlannerError::ProviderFailure(_)) => true,
            Self::Execution(ExecutionError::Permission(_)) => false,
            Self::Execution(ExecutionError::Transport(_)) => true,
            Self::RateLimit { .. } => true,
            Self::Configuration(_) => false,
        }
    }

    pub fn retry_after_seconds(&self) -> Option<u64> {
        match self {
            Self::RateLimit { retry_after_seconds } => Some(*retry_after_seconds),
            _ => None,
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Safety(SafetyError::NotAShape) => "not_a_select",
            Self::Safety(SafetyError::MultipleStatements) => "multiple_statements",
            Self::Safety(SafetyError::BlockedKeyword(_)) => "blocked_keyword",
            Self::Safety(SafetyError::TableNotAllowed(_)) => "table_not_allowed",
            Self::Planner(PlannerError::Timeout) => "llm_timeout",
            Self::Planner(PlannerError::CircuitOpen) => "circuit_open",
            Self::Planner(PlannerError::SchemaViolation(_)) => "schema_violation",
            Self::Planner(PlannerError::ProviderFailure(_)) => "provider_failure",
            Self::Execution(ExecutionError::Permission(_)) => "execution_permission",
            Self::Execution(ExecutionError::Transport(_)) => "execution_transport",
            Self::RateLimit { .. } => "rate_limited",
            Self::Configuration(_) => "configuration_error",
        }
    }

    pub fn to_response(&self, correlation_id: &str) -> ErrorResponse {
        ErrorResponse {
            error_type: self.error_type().to_string(),
            category: self.category().as_str().to_string(),
            severity: self.severity().as_str().to_string(),
            retryable: self.retryable(),
            details: self.to_string(),
            timestamp: Utc::now(),
            message: self.to_string(),
            retry_after_seconds: self.retry_after_seconds(),
            correlation_id: correlation_id.to_string(),
        }
    }
}
