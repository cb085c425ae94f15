//! Deterministic mock provider for tests (spec.md §4.3: "a mock
//! implementation is required for deterministic testing").

use super::provider::{LlmError, LlmProvider, PlanSchema, RawPlan};
use crate::models::Usage;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub struct MockProvider {
    responses: Mutex<Vec<Result<PlanSchema, LlmError>>>,
    call_count: AtomicUsize,
}

impl MockProvider {
    /// Responses are returned in order, one per call; the last one repeats
    /// once exhausted.
    pub fn new(responses: Vec<Result<PlanSchema, LlmError>>) -> Self {
        Self { responses: Mutex::new(responses), call_count: AtomicUsize::new(0) }
    }

    pub fn canned_plan(sql: impl Into<String>, confidence: f64) -> Self {
        Self::new(vec![Ok(PlanSchema {
            sql: sql.into(),
            confidence,
            explanation: "mock plan".to_string(),
        })])
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    async fn generate_structured(&self, _prompt: &str) -> Result<RawPlan, LlmError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        let idx = self.call_count.load(Ordering::SeqCst) - 1;
        let responses = self.responses.lock().expect("mock provider mutex poisoned");
        let chosen = responses
            .get(idx)
            .or_else(|| responses.last())
            .cloned()
            .expect("MockProvider requires at least one canned response");
        chosen.map(|schema| RawPlan { schema, usage: Usage { tokens_in: 10, tokens_out: 10, cost_usd: 0.0 } })
    }
}
