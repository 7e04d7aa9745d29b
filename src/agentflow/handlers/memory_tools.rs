//! Memory backends exposed as tool handlers.
//!
//! Agents operate their own memory through the dispatcher like any other
//! tool: an `action` parameter selects the operation, `agent_id` scopes
//! it. Each handler wraps the shared [`MemoryManager`], so the stores the
//! executor writes to are the same ones the tools read.

use crate::agentflow::handler::{
    Handler, HandlerResult, ParamMap, ParameterSpec, ParameterType,
};
use crate::agentflow::memory::episodic::{
    EpisodeInput, DEFAULT_IMPORTANCE_THRESHOLD, DEFAULT_TIME_WINDOW_HOURS, DEFAULT_TOP_K,
};
use crate::agentflow::memory::{MemoryItem, MemoryManager};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

fn require_agent_id(params: &ParamMap) -> Result<Uuid, HandlerResult> {
    params
        .get("agent_id")
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or_else(|| HandlerResult::failure("'agent_id' is required"))
}

/// Short-term buffer operations: load, append, clear.
pub struct BufferMemoryHandler {
    memory: Arc<MemoryManager>,
}

impl BufferMemoryHandler {
    pub fn new(memory: Arc<MemoryManager>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl Handler for BufferMemoryHandler {
    async fn execute(&self, params: &ParamMap, _creds: &ParamMap) -> HandlerResult {
        let agent_id = match require_agent_id(params) {
            Ok(id) => id,
            Err(failure) => return failure,
        };
        match params.get("action").and_then(|v| v.as_str()) {
            Some("load") => match self.memory.load_short_term(agent_id).await {
                Ok(items) => {
                    let count = items.len();
                    HandlerResult::success(json!({ "items": items, "count": count }))
                }
                Err(e) => HandlerResult::failure(e.to_string()),
            },
            Some("append") => {
                let item = match params.get("item") {
                    Some(item) => item.clone(),
                    None => return HandlerResult::failure("'item' is required for append"),
                };
                let memory_item = MemoryItem::new(
                    item["tool"].as_str().unwrap_or("unknown"),
                    item["params"].clone(),
                    item["result"].clone(),
                );
                match self.memory.append_short_term(agent_id, memory_item).await {
                    Ok(()) => HandlerResult::success(json!({ "appended": true })),
                    Err(e) => HandlerResult::failure(e.to_string()),
                }
            }
            Some("clear") => match self.memory.clear_short_term(agent_id).await {
                Ok(()) => HandlerResult::success(json!({ "cleared": true })),
                Err(e) => HandlerResult::failure(e.to_string()),
            },
            _ => HandlerResult::failure("action must be load, append, or clear"),
        }
    }

    fn parameter_specs(&self) -> Vec<ParameterSpec> {
        vec![
            ParameterSpec::new("agent_id", ParameterType::String).required(),
            ParameterSpec::new("action", ParameterType::String)
                .required()
                .with_description("load, append, or clear"),
            ParameterSpec::new("item", ParameterType::Object),
        ]
    }

    fn capabilities(&self) -> &'static [&'static str] {
        &["memory"]
    }
}

/// Core section operations: read, update, append, clear.
pub struct CoreMemoryHandler {
    memory: Arc<MemoryManager>,
}

impl CoreMemoryHandler {
    pub fn new(memory: Arc<MemoryManager>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl Handler for CoreMemoryHandler {
    async fn execute(&self, params: &ParamMap, _creds: &ParamMap) -> HandlerResult {
        let agent_id = match require_agent_id(params) {
            Ok(id) => id,
            Err(failure) => return failure,
        };
        let core = self.memory.core();
        let section = params.get("section").and_then(|v| v.as_str());
        let content = params.get("content").and_then(|v| v.as_str());

        match params.get("action").and_then(|v| v.as_str()) {
            Some("read") => match section {
                Some(section) => HandlerResult::success(json!({
                    "section": section,
                    "content": core.read(agent_id, section),
                })),
                None => HandlerResult::failure("'section' is required for read"),
            },
            Some("update") => match (section, content) {
                (Some(section), Some(content)) => match core.update(agent_id, section, content) {
                    Ok(()) => HandlerResult::success(json!({ "section": section, "updated": true })),
                    Err(e) => HandlerResult::failure(e),
                },
                _ => HandlerResult::failure("'section' and 'content' are required for update"),
            },
            Some("append") => match (section, content) {
                (Some(section), Some(content)) => match core.append(agent_id, section, content) {
                    Ok(()) => HandlerResult::success(json!({ "section": section, "appended": true })),
                    Err(e) => HandlerResult::failure(e),
                },
                _ => HandlerResult::failure("'section' and 'content' are required for append"),
            },
            Some("clear") => {
                match section {
                    Some(section) => core.clear_section(agent_id, section),
                    None => core.clear(agent_id),
                }
                HandlerResult::success(json!({ "cleared": true }))
            }
            _ => HandlerResult::failure("action must be read, update, append, or clear"),
        }
    }

    fn parameter_specs(&self) -> Vec<ParameterSpec> {
        vec![
            ParameterSpec::new("agent_id", ParameterType::String).required(),
            ParameterSpec::new("action", ParameterType::String)
                .required()
                .with_description("read, update, append, or clear"),
            ParameterSpec::new("section", ParameterType::String)
                .with_description("user_profile, agent_persona, context, ..."),
            ParameterSpec::new("content", ParameterType::String),
        ]
    }

    fn capabilities(&self) -> &'static [&'static str] {
        &["memory"]
    }
}

/// Episodic operations: store, retrieve, search, consolidate.
pub struct EpisodicMemoryHandler {
    memory: Arc<MemoryManager>,
}

impl EpisodicMemoryHandler {
    pub fn new(memory: Arc<MemoryManager>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl Handler for EpisodicMemoryHandler {
    async fn execute(&self, params: &ParamMap, _creds: &ParamMap) -> HandlerResult {
        let agent_id = match require_agent_id(params) {
            Ok(id) => id,
            Err(failure) => return failure,
        };
        let store = self.memory.episodic();

        match params.get("action").and_then(|v| v.as_str()) {
            Some("store") => {
                let content = match params.get("content").and_then(|v| v.as_str()) {
                    Some(content) => content.to_string(),
                    None => return HandlerResult::failure("'content' is required for store"),
                };
                let mut input = EpisodeInput::new(content);
                if let Some(importance) = params.get("importance").and_then(|v| v.as_f64()) {
                    input = input.with_importance(importance);
                }
                if let Some(emotion) = params.get("emotion").and_then(|v| v.as_str()) {
                    input = input.with_emotion(emotion);
                }
                let id = store.store(agent_id, input);
                HandlerResult::success(json!({ "id": id, "stored": true }))
            }
            Some("retrieve") => {
                let query = params.get("query").and_then(|v| v.as_str());
                let window = params
                    .get("time_window")
                    .and_then(|v| v.as_i64())
                    .unwrap_or(DEFAULT_TIME_WINDOW_HOURS);
                let top_k = params
                    .get("top_k")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(DEFAULT_TOP_K as u64) as usize;
                let episodes = store.retrieve(agent_id, query, window, top_k);
                let count = episodes.len();
                HandlerResult::success(json!({
                    "episodes": episodes,
                    "count": count,
                    "time_window_hours": window,
                }))
            }
            Some("search") => {
                let query = match params.get("query").and_then(|v| v.as_str()) {
                    Some(query) => query,
                    None => return HandlerResult::failure("'query' is required for search"),
                };
                let threshold = params
                    .get("importance_threshold")
                    .and_then(|v| v.as_f64())
                    .unwrap_or(DEFAULT_IMPORTANCE_THRESHOLD);
                let episodes = store.search(agent_id, query, threshold);
                let count = episodes.len();
                HandlerResult::success(json!({
                    "episodes": episodes,
                    "count": count,
                    "importance_threshold": threshold,
                }))
            }
            Some("consolidate") => {
                let (removed, remaining) = store.consolidate(agent_id);
                HandlerResult::success(json!({
                    "consolidated": removed,
                    "remaining": remaining,
                }))
            }
            _ => HandlerResult::failure("action must be store, retrieve, search, or consolidate"),
        }
    }

    fn parameter_specs(&self) -> Vec<ParameterSpec> {
        vec![
            ParameterSpec::new("agent_id", ParameterType::String).required(),
            ParameterSpec::new("action", ParameterType::String)
                .required()
                .with_description("store, retrieve, search, or consolidate"),
            ParameterSpec::new("content", ParameterType::String),
            ParameterSpec::new("query", ParameterType::String),
            ParameterSpec::new("importance", ParameterType::Number),
            ParameterSpec::new("emotion", ParameterType::String),
            ParameterSpec::new("time_window", ParameterType::Integer),
            ParameterSpec::new("top_k", ParameterType::Integer),
            ParameterSpec::new("importance_threshold", ParameterType::Number),
        ]
    }

    fn capabilities(&self) -> &'static [&'static str] {
        &["memory"]
    }
}
