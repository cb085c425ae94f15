//! OpenAI-compatible chat-completions client. OpenRouter, OpenAI and
//! Anthropic's OpenAI-compatibility endpoints all speak this wire format, so
//! one client serves every real provider variant; only `api_base`/`model`
//! differ. Adapted from this codebase's `services/llm/client.rs`, generalized
//! away from any single analysis scenario to the generic `{sql, confidence,
//! explanation}` schema.

use super::provider::{LlmError, LlmProvider, PlanSchema, RawPlan};
use crate::models::Usage;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub struct OpenAiCompatibleProvider {
    http_client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
}

impl OpenAiCompatibleProvider {
    pub fn new(api_base: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .expect("reqwest client builds with static configuration");
        Self { http_client, api_base: api_base.into(), api_key: api_key.into(), model: model.into() }
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    r#type: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize, Default)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

const SYSTEM_INSTRUCTION: &str = "You translate natural-language analytics questions into a single \
read-only SQL SELECT statement. Respond with a single JSON object matching exactly this shape: \
{\"sql\": string, \"confidence\": number between 0 and 1, \"explanation\": string}. The sql field \
must be a single SELECT statement containing a LIMIT clause. Do not include any text outside the \
JSON object.";

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    async fn generate_structured(&self, prompt: &str) -> Result<RawPlan, LlmError> {
        let request = ChatCompletionRequest {
            model: &self.model,
            messages: vec![
                ChatMessage { role: "system", content: SYSTEM_INSTRUCTION.to_string() },
                ChatMessage { role: "user", content: prompt.to_string() },
            ],
            max_tokens: 1024,
            temperature: 0.1,
            response_format: ResponseFormat { r#type: "json_object" },
        };

        let url = format!("{}/chat/completions", self.api_base.trim_end_matches('/'));
        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::ApiError(e.to_string()))?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(LlmError::RateLimited(retry_after));
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::ApiError(format!("HTTP {}: {}", status, body)));
        }

        let parsed: ChatCompletionResponse =
            response.json().await.map_err(|e| LlmError::ApiError(e.to_string()))?;

        let content = parsed
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .ok_or_else(|| LlmError::StructuredOutputError("empty choices array".to_string()))?;

        let schema: PlanSchema = serde_json::from_str(&content)
            .map_err(|e| LlmError::StructuredOutputError(format!("{e}: {content}")))?;
        schema.validate()?;

        let usage = parsed.usage.unwrap_or_default();
        let cost_usd = estimate_cost_usd(&self.model, usage.prompt_tokens, usage.completion_tokens);

        Ok(RawPlan {
            schema,
            usage: Usage {
                tokens_in: usage.prompt_tokens,
                tokens_out: usage.completion_tokens,
                cost_usd,
            },
        })
    }
}

/// Per-model USD-per-token rate table. Unknown models fall back to a
/// conservative default rate rather than reporting zero cost.
fn estimate_cost_usd(model: &str, tokens_in: u32, tokens_out: u32) -> f64 {
    let (rate_in, rate_out) = match model {
        "gpt-4o-mini" => (0.15 / 1_000_000.0, 0.60 / 1_000_000.0),
        "gpt-4o" => (2.50 / 1_000_000.0, 10.00 / 1_000_000.0),
        "claude-3-5-sonnet" => (3.00 / 1_000_000.0, 15.00 / 1_000_000.0),
        _ => (1.00 / 1_000_000.0, 3.00 / 1_000_000.0),
    };
    f64::from(tokens_in) * rate_in + f64::from(tokens_out) * rate_out
}
