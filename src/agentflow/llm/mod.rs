//! Provider-neutral LLM client abstraction.
//!
//! The engine consumes a single capability: [`LLMClient::chat`], which
//! takes a message list and returns the assistant content, any planned
//! tool steps, and token usage. Concrete providers are selected by
//! model-name prefix via [`create_client`]; an optional [`CachingClient`]
//! layer short-circuits identical calls.
//!
//! # Tool plans
//!
//! Agents instruct the model to answer either with plain text (a final
//! answer) or with a JSON object of the form
//! `{"steps": [{"tool": "...", "params": {...}}], "final_output": "..."}`.
//! [`parse_tool_plan`] extracts that shape from the raw content; provider
//! clients call it so every implementation reports tool steps uniformly.

pub mod anthropic;
pub mod catalog;
pub mod openai;

use crate::agentflow::error::EngineError;
use crate::agentflow::handler::{HandlerResult, ParamMap};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Role of a chat message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

/// A single provider-neutral chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Prompt vs. completion token accounting for one call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub total_tokens: usize,
}

impl TokenUsage {
    pub fn new(input_tokens: usize, output_tokens: usize) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }
}

/// One tool step planned by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolStep {
    pub tool: String,
    #[serde(default)]
    pub params: ParamMap,
}

/// Uniform chat-completion response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Raw assistant content.
    pub content: String,
    /// Tool steps extracted from the content; empty means the content is
    /// the final answer.
    pub tool_steps: Vec<ToolStep>,
    /// Final answer carried alongside a tool plan, when the model
    /// provided one.
    pub final_output: Option<String>,
    pub usage: TokenUsage,
}

/// The single capability the engine core consumes.
#[async_trait]
pub trait LLMClient: Send + Sync {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
    ) -> Result<ChatResponse, Box<dyn Error + Send + Sync>>;

    /// Identifier used to select the upstream model (e.g. `"gpt-4.1"`).
    fn model_name(&self) -> &str;
}

/// Selects a concrete client implementation for a model key.
pub trait ClientFactory: Send + Sync {
    fn create(&self, api_key: &str, model: &str) -> Result<Arc<dyn LLMClient>, EngineError>;
}

/// Prefix-based provider resolution: `gpt-*`/`o*` → OpenAI family,
/// `claude-*` → Anthropic family.
pub struct ProviderClientFactory;

impl ClientFactory for ProviderClientFactory {
    fn create(&self, api_key: &str, model: &str) -> Result<Arc<dyn LLMClient>, EngineError> {
        if model.starts_with("gpt-")
            || model.starts_with("o1")
            || model.starts_with("o3")
            || model.starts_with("o4")
        {
            return Ok(Arc::new(openai::OpenAiClient::new(api_key, model)));
        }
        if model.starts_with("claude-") {
            return Ok(Arc::new(anthropic::AnthropicClient::new(api_key, model)));
        }
        Err(EngineError::NotFound {
            kind: "model",
            name: model.to_string(),
            attempted: vec![model.to_string()],
            available: vec!["gpt-*".into(), "o*".into(), "claude-*".into()],
        })
    }
}

/// Append a serialized tool result to the conversation so the model can
/// react to it on the next turn.
pub fn inject_tool_result(messages: &mut Vec<ChatMessage>, tool: &str, result: &HandlerResult) {
    let body = serde_json::to_string(result)
        .unwrap_or_else(|_| format!("{{\"tool\":\"{}\",\"status\":\"error\"}}", tool));
    messages.push(ChatMessage {
        role: ChatRole::Tool,
        content: format!("tool `{}` returned: {}", tool, body),
    });
}

/// Extract a `{"steps": [...], "final_output": ...}` plan from raw model
/// content. Content that is not a JSON object, or has no `steps` array,
/// yields no steps; the content is then the final answer.
pub fn parse_tool_plan(content: &str) -> (Vec<ToolStep>, Option<String>) {
    let trimmed = content.trim();
    let candidate = if trimmed.starts_with('{') {
        trimmed.to_string()
    } else if let Some(start) = trimmed.find("```json") {
        // Models love fencing their JSON.
        let rest = &trimmed[start + 7..];
        match rest.find("```") {
            Some(end) => rest[..end].trim().to_string(),
            None => return (Vec::new(), None),
        }
    } else {
        return (Vec::new(), None);
    };

    let value: serde_json::Value = match serde_json::from_str(&candidate) {
        Ok(value) => value,
        Err(_) => return (Vec::new(), None),
    };
    let steps = value
        .get("steps")
        .and_then(|s| s.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|step| serde_json::from_value::<ToolStep>(step.clone()).ok())
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    let final_output = value
        .get("final_output")
        .and_then(|f| f.as_str())
        .map(|s| s.to_string());
    (steps, final_output)
}

/// Caching layer keyed by `(model, messages-hash, temperature)`.
///
/// Identical calls short-circuit to the cached response with zeroed usage,
/// since no tokens were spent upstream.
pub struct CachingClient {
    inner: Arc<dyn LLMClient>,
    cache: Mutex<HashMap<String, ChatResponse>>,
}

impl CachingClient {
    pub fn new(inner: Arc<dyn LLMClient>) -> Self {
        Self {
            inner,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn cache_key(&self, messages: &[ChatMessage], temperature: f32) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.inner.model_name().as_bytes());
        hasher.update(serde_json::to_vec(messages).unwrap_or_default());
        hasher.update(temperature.to_bits().to_be_bytes());
        hex::encode(hasher.finalize())
    }
}

#[async_trait]
impl LLMClient for CachingClient {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
    ) -> Result<ChatResponse, Box<dyn Error + Send + Sync>> {
        let key = self.cache_key(messages, temperature);
        {
            let cache = self.cache.lock().await;
            if let Some(hit) = cache.get(&key) {
                let mut response = hit.clone();
                response.usage = TokenUsage::default();
                return Ok(response);
            }
        }
        let response = self.inner.chat(messages, temperature).await?;
        let mut cache = self.cache.lock().await;
        cache.insert(key, response.clone());
        Ok(response)
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}
