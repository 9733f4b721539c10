//! LLM HTTP client for OpenAI-compatible chat-completions APIs
//!
//! Works against DeepSeek, OpenAI, and Gemini's OpenAI-compatibility
//! endpoint. Responses are requested as JSON objects; markdown code fences
//! are stripped before parsing because several providers wrap JSON in them
//! despite the response_format hint.

use super::provider::Provider;
use dashmap::DashMap;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

/// Outcome of one chat call. `Unavailable` is the sentinel callers fall back
/// on; it is never an error for the pipeline.
#[derive(Debug, Clone)]
pub enum ChatOutcome {
    Json(serde_json::Value),
    Unavailable(String),
}

pub struct LlmClient {
    http_client: Client,
    provider: Provider,
    temperature: f64,
    max_tokens: u32,
    timeout: Duration,
    /// Response cache keyed by prompt hash, for the process lifetime.
    cache: DashMap<u64, serde_json::Value>,
}

impl LlmClient {
    pub fn new(provider: Provider, temperature: f64, max_tokens: u32, timeout: Duration) -> Self {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        Self {
            http_client,
            provider,
            // The classifier contract caps temperature at 0.3.
            temperature: temperature.min(0.3),
            max_tokens,
            timeout,
            cache: DashMap::new(),
        }
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.kind.as_str()
    }

    /// Send one prompt, expecting a JSON object back.
    pub async fn complete_json(&self, system_prompt: &str, user_prompt: &str) -> ChatOutcome {
        let cache_key = Self::prompt_hash(system_prompt, user_prompt);
        if let Some(cached) = self.cache.get(&cache_key) {
            tracing::debug!("LLM cache hit");
            return ChatOutcome::Json(cached.clone());
        }

        let request = ChatCompletionRequest {
            model: self.provider.model.clone(),
            messages: vec![
                ChatMessage { role: "system".to_string(), content: system_prompt.to_string() },
                ChatMessage { role: "user".to_string(), content: user_prompt.to_string() },
            ],
            max_tokens: Some(self.max_tokens),
            temperature: Some(self.temperature),
            response_format: Some(ResponseFormat { r#type: "json_object".to_string() }),
        };

        let url = format!("{}/chat/completions", self.provider.api_base.trim_end_matches('/'));
        tracing::debug!("Calling LLM API: {} with model {}", url, self.provider.model);

        let response = match self
            .http_client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.provider.api_key))
            .header("Content-Type", "application/json")
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                let reason = if e.is_timeout() {
                    format!("timeout after {}s", self.timeout.as_secs())
                } else {
                    e.to_string()
                };
                tracing::warn!("LLM request failed: {}", reason);
                return ChatOutcome::Unavailable(reason);
            },
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!("LLM API error {}: {}", status, body);
            return ChatOutcome::Unavailable(format!("API error {}", status));
        }

        let chat_response: ChatCompletionResponse = match response.json().await {
            Ok(parsed) => parsed,
            Err(e) => return ChatOutcome::Unavailable(format!("response parse error: {}", e)),
        };

        let Some(content) = chat_response
            .choices
            .first()
            .and_then(|c| c.message.content.as_deref())
        else {
            return ChatOutcome::Unavailable("empty response".to_string());
        };

        match parse_json_content(content) {
            Some(value) => {
                self.cache.insert(cache_key, value.clone());
                ChatOutcome::Json(value)
            },
            None => ChatOutcome::Unavailable("response is not a JSON object".to_string()),
        }
    }

    fn prompt_hash(system_prompt: &str, user_prompt: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        system_prompt.hash(&mut hasher);
        user_prompt.hash(&mut hasher);
        hasher.finish()
    }
}

/// Strip markdown code fences and parse the remainder as a JSON object.
pub fn parse_json_content(content: &str) -> Option<serde_json::Value> {
    let stripped = strip_code_fences(content);
    let value: serde_json::Value = serde_json::from_str(stripped.trim()).ok()?;
    value.is_object().then_some(value)
}

/// Remove a surrounding ``` / ```json fence if present.
fn strip_code_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // drop the info string (e.g. "json") up to the first newline
    let rest = match rest.find('\n') {
        Some(pos) => &rest[pos + 1..],
        None => rest,
    };
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

// ============================================================================
// OpenAI API Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    r#type: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}
