//! Anthropic Messages API invoker
//!
//! Reference implementation of [`LlmInvoker`]. The crate's message and
//! tool-definition types were shaped to serialize straight into the
//! Messages API wire format, so the request payload borrows them directly
//! with no conversion layer. Retryable failures (rate limits, 5xx,
//! network) are retried in here with exponential backoff, honoring
//! `retry-after` when the server provides one; what escapes this client is
//! a genuine `llm_failure`.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use super::{
    CompletionRequest, CompletionResponse, LlmError, LlmInvoker, Message, StopReason, TokenUsage, ToolCall,
    ToolDefinition,
};
use crate::config::LlmConfig;

const API_VERSION: &str = "2023-06-01";

/// First backoff step; each retry doubles it
const BACKOFF_BASE: Duration = Duration::from_millis(500);

/// Longest single pause between attempts, server hints included
const BACKOFF_CEILING: Duration = Duration::from_secs(60);

/// Anthropic Messages API client with bounded in-client retries
pub struct AnthropicInvoker {
    model: String,
    api_key: String,
    base_url: String,
    http: Client,
    max_tokens: u32,
    max_attempts: u32,
}

/// Request body; everything borrows from the caller's request
#[derive(Serialize)]
struct MessagesPayload<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    tools: &'a [ToolDefinition],
}

/// Response body, deserialized then folded into a CompletionResponse
#[derive(Deserialize)]
struct ApiReply {
    content: Vec<ReplyBlock>,
    stop_reason: String,
    usage: ApiUsage,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ReplyBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct ApiUsage {
    input_tokens: u64,
    output_tokens: u64,
    cache_read_input_tokens: u64,
    cache_creation_input_tokens: u64,
}

impl ApiReply {
    fn into_completion(self) -> CompletionResponse {
        let mut content: Option<String> = None;
        let mut tool_calls = Vec::new();

        for block in self.content {
            match block {
                ReplyBlock::Text { text } => match &mut content {
                    // Multiple text blocks concatenate rather than clobber
                    Some(existing) => {
                        existing.push('\n');
                        existing.push_str(&text);
                    }
                    None => content = Some(text),
                },
                ReplyBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall { id, name, input }),
            }
        }

        CompletionResponse {
            content,
            tool_calls,
            stop_reason: StopReason::from_wire(&self.stop_reason),
            usage: TokenUsage {
                input_tokens: self.usage.input_tokens,
                output_tokens: self.usage.output_tokens,
                cache_read_tokens: self.usage.cache_read_input_tokens,
                cache_creation_tokens: self.usage.cache_creation_input_tokens,
            },
        }
    }
}

/// Exponential backoff step for the nth attempt (1-based)
fn backoff_delay(attempt: u32) -> Duration {
    let factor = 1u32 << attempt.saturating_sub(1).min(8);
    (BACKOFF_BASE * factor).min(BACKOFF_CEILING)
}

impl AnthropicInvoker {
    /// Create a client from configuration; the key comes from the
    /// environment variable the config names, never the config itself
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| LlmError::InvalidResponse(format!("Environment variable {} not set", config.api_key_env)))?;

        let http = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(LlmError::Network)?;

        Ok(Self {
            model: config.model.clone(),
            api_key,
            base_url: config.base_url.clone(),
            http,
            max_tokens: config.max_tokens,
            max_attempts: config.retry_attempts.max(1),
        })
    }

    /// One HTTP round trip, classified into the crate's error kinds
    async fn send_once(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let payload = MessagesPayload {
            model: &self.model,
            max_tokens: request.max_tokens.min(self.max_tokens),
            system: &request.system_prompt,
            messages: &request.messages,
            tools: &request.tools,
        };

        let response = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            let hinted = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(Duration::from_secs(30));
            return Err(LlmError::RateLimited {
                retry_after: hinted.min(BACKOFF_CEILING),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::ApiError {
                status: status.as_u16(),
                message: body.chars().take(2000).collect(),
            });
        }

        let reply: ApiReply = response.json().await?;
        Ok(reply.into_completion())
    }
}

#[async_trait]
impl LlmInvoker for AnthropicInvoker {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.send_once(&request).await {
                Ok(response) => {
                    debug!(attempt, "AnthropicInvoker::complete: succeeded");
                    return Ok(response);
                }
                Err(e) if attempt >= self.max_attempts || !e.is_retryable() => return Err(e),
                Err(e) => {
                    let pause = e.retry_after().unwrap_or_else(|| backoff_delay(attempt));
                    warn!(attempt, error = %e, ?pause, "LLM call failed, retrying");
                    tokio::time::sleep(pause).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ContentBlock;

    #[test]
    fn test_payload_serializes_messages_directly() {
        let messages = vec![
            Message::user("do the thing"),
            Message::assistant_blocks(vec![ContentBlock::ToolUse {
                id: "call_1".to_string(),
                name: "read".to_string(),
                input: serde_json::json!({"path": "a.txt"}),
            }]),
        ];
        let tools = vec![ToolDefinition::new(
            "read",
            "Read a file",
            serde_json::json!({"type": "object"}),
        )];
        let payload = MessagesPayload {
            model: "some-model",
            max_tokens: 1024,
            system: "be helpful",
            messages: &messages,
            tools: &tools,
        };

        let wire = serde_json::to_value(&payload).unwrap();
        assert_eq!(wire["model"], "some-model");
        assert_eq!(wire["messages"][0]["role"], "user");
        assert_eq!(wire["messages"][0]["content"], "do the thing");
        assert_eq!(wire["messages"][1]["content"][0]["type"], "tool_use");
        assert_eq!(wire["tools"][0]["name"], "read");
        assert_eq!(wire["tools"][0]["input_schema"]["type"], "object");
    }

    #[test]
    fn test_payload_omits_empty_tools() {
        let payload = MessagesPayload {
            model: "m",
            max_tokens: 10,
            system: "",
            messages: &[],
            tools: &[],
        };
        let wire = serde_json::to_value(&payload).unwrap();
        assert!(wire.get("tools").is_none());
    }

    #[test]
    fn test_reply_folds_into_completion() {
        let reply: ApiReply = serde_json::from_value(serde_json::json!({
            "content": [
                {"type": "text", "text": "first"},
                {"type": "text", "text": "second"},
                {"type": "tool_use", "id": "c1", "name": "write", "input": {"path": "f"}}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 7, "output_tokens": 11}
        }))
        .unwrap();

        let completion = reply.into_completion();
        assert_eq!(completion.content.as_deref(), Some("first\nsecond"));
        assert_eq!(completion.tool_calls.len(), 1);
        assert_eq!(completion.tool_calls[0].name, "write");
        assert_eq!(completion.stop_reason, StopReason::ToolUse);
        assert_eq!(completion.usage.input_tokens, 7);
        assert_eq!(completion.usage.cache_read_tokens, 0);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        assert_eq!(backoff_delay(1), Duration::from_millis(500));
        assert_eq!(backoff_delay(2), Duration::from_secs(1));
        assert_eq!(backoff_delay(3), Duration::from_secs(2));
        // Far-out attempts saturate at the ceiling
        assert_eq!(backoff_delay(30), BACKOFF_CEILING);
    }
}
