//! Anthropic-family chat client.
//!
//! The Messages API takes the system prompt as a top-level field rather
//! than a message, so system messages are peeled off the front of the
//! conversation before conversion.

use crate::agentflow::http_pool::shared_client;
use crate::agentflow::llm::{
    parse_tool_plan, ChatMessage, ChatResponse, ChatRole, LLMClient, TokenUsage,
};
use async_trait::async_trait;
use std::error::Error;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

pub struct AnthropicClient {
    api_key: String,
    pub model: String,
    base_url: String,
    max_tokens: u32,
}

impl AnthropicClient {
    pub fn new(api_key: &str, model: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

#[async_trait]
impl LLMClient for AnthropicClient {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
    ) -> Result<ChatResponse, Box<dyn Error + Send + Sync>> {
        let mut system_parts: Vec<&str> = Vec::new();
        let mut wire_messages: Vec<serde_json::Value> = Vec::new();
        for message in messages {
            match message.role {
                ChatRole::System => system_parts.push(&message.content),
                ChatRole::Assistant => wire_messages.push(serde_json::json!({
                    "role": "assistant",
                    "content": message.content,
                })),
                ChatRole::User | ChatRole::Tool => wire_messages.push(serde_json::json!({
                    "role": "user",
                    "content": message.content,
                })),
            }
        }

        let mut body = serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "messages": wire_messages,
            "temperature": temperature,
        });
        if !system_parts.is_empty() {
            body["system"] = serde_json::Value::String(system_parts.join("\n"));
        }

        let response = shared_client()
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let payload: serde_json::Value = response.json().await?;
        if !status.is_success() {
            let message = payload["error"]["message"]
                .as_str()
                .unwrap_or("unknown error")
                .to_string();
            if log::log_enabled!(log::Level::Error) {
                log::error!("Anthropic API error ({}): {}", status, message);
            }
            return Err(format!("Anthropic API error ({}): {}", status, message).into());
        }

        let content = payload["content"][0]["text"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        let usage = TokenUsage::new(
            payload["usage"]["input_tokens"].as_u64().unwrap_or(0) as usize,
            payload["usage"]["output_tokens"].as_u64().unwrap_or(0) as usize,
        );
        let (tool_steps, final_output) = parse_tool_plan(&content);

        Ok(ChatResponse {
            content,
            tool_steps,
            final_output,
            usage,
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
