//! OpenAI-family chat client.
//!
//! Speaks the Chat Completions wire format directly over the shared
//! [`reqwest`] client. The response content is run through
//! [`parse_tool_plan`](crate::llm::parse_tool_plan) so tool steps surface
//! uniformly regardless of provider.

use crate::agentflow::http_pool::shared_client;
use crate::agentflow::llm::{
    parse_tool_plan, ChatMessage, ChatResponse, ChatRole, LLMClient, TokenUsage,
};
use async_trait::async_trait;
use std::error::Error;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiClient {
    api_key: String,
    pub model: String,
    base_url: String,
}

impl OpenAiClient {
    pub fn new(api_key: &str, model: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Point the client at a compatible endpoint (proxies, test fixtures).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn wire_role(role: ChatRole) -> &'static str {
        match role {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
            // Tool results are re-injected as user turns; the engine does
            // not use the provider's native tool-call correlation ids.
            ChatRole::Tool => "user",
        }
    }
}

#[async_trait]
impl LLMClient for OpenAiClient {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
    ) -> Result<ChatResponse, Box<dyn Error + Send + Sync>> {
        let wire_messages: Vec<serde_json::Value> = messages
            .iter()
            .map(|m| {
                serde_json::json!({
                    "role": Self::wire_role(m.role),
                    "content": m.content,
                })
            })
            .collect();

        let body = serde_json::json!({
            "model": self.model,
            "messages": wire_messages,
            "temperature": temperature,
        });

        let response = shared_client()
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
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
                log::error!("OpenAI API error ({}): {}", status, message);
            }
            return Err(format!("OpenAI API error ({}): {}", status, message).into());
        }

        let content = payload["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        let usage = TokenUsage::new(
            payload["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as usize,
            payload["usage"]["completion_tokens"].as_u64().unwrap_or(0) as usize,
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
