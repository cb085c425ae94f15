//! LLM Provider Abstraction (C4, spec.md §4.3).

mod client;
mod mock;
mod provider;

pub use client::OpenAiCompatibleProvider;
pub use mock::MockProvider;
pub use provider::{LlmError, LlmProvider, PlanSchema, RawPlan};
