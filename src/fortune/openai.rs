//! OpenAI-compatible fortune provider.
//!
//! Targets the Chat Completions API. Pointing `base_url` at OpenRouter or
//! any compatible gateway works unchanged.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

use super::{build_prompt, parse_fortune, FortuneProvider};
use crate::types::Fortune;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const OPENAI_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_MAX_TOKENS: u32 = 120;

const MAX_RETRIES: u32 = 2;
const BASE_BACKOFF_MS: u64 = 500;

const SYSTEM_PROMPT: &str = "You are a playful oracle watching a coin-flip game. \
     Answer only with a JSON object containing \"message\" and \"advice\".";

// ---------------------------------------------------------------------------
// API types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<ChatMessage>,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<ChatMessage>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct OpenAiCompatClient {
    http: Client,
    api_key: SecretString,
    model: String,
    base_url: String,
    max_tokens: u32,
    total_calls: AtomicU64,
}

impl OpenAiCompatClient {
    pub fn new(api_key: SecretString, model: Option<String>, base_url: Option<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to build OpenAI HTTP client")?;

        Ok(Self {
            http,
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: base_url.unwrap_or_else(|| OPENAI_API_BASE.to_string()),
            max_tokens: DEFAULT_MAX_TOKENS,
            total_calls: AtomicU64::new(0),
        })
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }

    pub fn total_calls(&self) -> u64 {
        self.total_calls.load(Ordering::Relaxed)
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn build_request(&self, prompt: String) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: prompt,
                },
            ],
            response_format: ResponseFormat {
                format_type: "json_object",
            },
        }
    }

    async fn call_api(&self, prompt: String) -> Result<String> {
        let request = self.build_request(prompt);
        let url = self.endpoint();
        let mut last_error = None;

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let delay = BASE_BACKOFF_MS * 2u64.pow(attempt - 1);
                tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
            }

            let resp = self.http
                .post(&url)
                .header("Authorization", format!("Bearer {}", self.api_key.expose_secret()))
                .header("Content-Type", "application/json")
                .json(&request)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let body: ChatResponse = response.json().await
                            .context("Failed to parse chat completion response")?;
                        self.total_calls.fetch_add(1, Ordering::Relaxed);
                        debug!(calls = self.total_calls(), "Chat completion received");

                        return body.choices.first()
                            .and_then(|c| c.message.as_ref())
                            .map(|m| m.content.clone())
                            .filter(|text| !text.trim().is_empty())
                            .context("Chat completion contained no text");
                    }

                    if status.as_u16() == 429 || status.as_u16() >= 500 {
                        let error_text = response.text().await.unwrap_or_default();
                        warn!(status = %status, attempt, "Retryable chat completion error");
                        last_error = Some(format!("HTTP {status}: {error_text}"));
                        continue;
                    }

                    let error_text = response.text().await.unwrap_or_default();
                    anyhow::bail!("Chat completion error {status}: {error_text}");
                }
                Err(e) => {
                    last_error = Some(format!("Request error: {e}"));
                    continue;
                }
            }
        }

        anyhow::bail!(
            "Chat completion failed after {MAX_RETRIES} retries: {}",
            last_error.unwrap_or_default()
        )
    }
}

#[async_trait]
impl FortuneProvider for OpenAiCompatClient {
    async fn fetch_fortune(&self, wins: u64, losses: u64, streak: u64) -> Result<Fortune> {
        debug!(wins, losses, streak, model = %self.model, "Chat fortune request");
        let text = self.call_api(build_prompt(wins, losses, streak)).await?;
        parse_fortune(&text)
    }

    fn label(&self) -> &'static str {
        "openai"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_construction() {
        let client = OpenAiCompatClient::new(SecretString::new("key".into()), None, None).unwrap();
        assert_eq!(client.model_name(), DEFAULT_MODEL);
        assert_eq!(client.endpoint(), "https://api.openai.com/v1/chat/completions");
        assert_eq!(client.total_calls(), 0);
    }

    #[test]
    fn test_client_custom_gateway() {
        let client = OpenAiCompatClient::new(
            SecretString::new("key".into()),
            Some("anthropic/claude-3.5-haiku".into()),
            Some("https://openrouter.ai/api/v1/".into()),
        )
        .unwrap();
        assert_eq!(client.model_name(), "anthropic/claude-3.5-haiku");
        assert_eq!(client.endpoint(), "https://openrouter.ai/api/v1/chat/completions");
    }

    #[test]
    fn test_request_shape() {
        let client = OpenAiCompatClient::new(SecretString::new("key".into()), None, None).unwrap();
        let json = serde_json::to_value(client.build_request("prompt".into())).unwrap();
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "prompt");
        assert_eq!(json["response_format"]["type"], "json_object");
    }
}
