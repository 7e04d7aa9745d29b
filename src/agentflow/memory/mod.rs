//! Agent memory substrate.
//!
//! Three tiers with one operation contract:
//!
//! - **short-term**: a bounded window of recent tool interactions, held by
//!   the in-process [`BufferStore`](buffer::BufferStore) or the durable
//!   [`RedisBufferStore`](redis_buffer::RedisBufferStore);
//! - **core**: small always-in-context sections per agent
//!   ([`CoreStore`](core_store::CoreStore));
//! - **episodic**: retrieved-on-demand events with temporal decay and
//!   importance scoring ([`EpisodicStore`](episodic::EpisodicStore)).
//!
//! The [`MemoryManager`] facade wires a short-term backend and the episodic
//! long-term store together for the agent executor.

pub mod buffer;
pub mod core_store;
pub mod episodic;
pub mod redis_buffer;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::sync::Arc;
use uuid::Uuid;

/// Default short-term window size (number of retained items).
pub const DEFAULT_WINDOW: usize = 6;

/// One short-term memory item: a tool interaction record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryItem {
    pub tool: String,
    pub params: serde_json::Value,
    pub result: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl MemoryItem {
    pub fn new(tool: impl Into<String>, params: serde_json::Value, result: serde_json::Value) -> Self {
        Self {
            tool: tool.into(),
            params,
            result,
            timestamp: Utc::now(),
        }
    }
}

/// Uniform contract over short-term memory backends.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Load the buffered items for an agent, oldest first.
    async fn load(&self, agent_id: Uuid) -> Result<Vec<MemoryItem>, Box<dyn Error + Send + Sync>>;

    /// Append an item, evicting the oldest entries beyond `window`.
    async fn append(
        &self,
        agent_id: Uuid,
        item: MemoryItem,
        window: usize,
    ) -> Result<(), Box<dyn Error + Send + Sync>>;

    /// Drop all buffered items for an agent.
    async fn clear(&self, agent_id: Uuid) -> Result<(), Box<dyn Error + Send + Sync>>;
}

/// Facade the agent executor talks to.
///
/// Short-term appends go to the configured [`MemoryStore`]; long-term
/// interactions are persisted as episodic events.
pub struct MemoryManager {
    short_term: Arc<dyn MemoryStore>,
    episodic: Arc<episodic::EpisodicStore>,
    core: Arc<core_store::CoreStore>,
    window: usize,
}

impl MemoryManager {
    /// Build a manager over an in-process buffer. The default for tests
    /// and single-process deployments.
    pub fn in_process() -> Self {
        Self {
            short_term: Arc::new(buffer::BufferStore::new()),
            episodic: Arc::new(episodic::EpisodicStore::new()),
            core: Arc::new(core_store::CoreStore::new()),
            window: DEFAULT_WINDOW,
        }
    }

    /// Build a manager with an explicit short-term backend (e.g. Redis).
    pub fn with_short_term(short_term: Arc<dyn MemoryStore>) -> Self {
        Self {
            short_term,
            episodic: Arc::new(episodic::EpisodicStore::new()),
            core: Arc::new(core_store::CoreStore::new()),
            window: DEFAULT_WINDOW,
        }
    }

    /// Override the short-term window size.
    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window;
        self
    }

    pub fn short_term(&self) -> &Arc<dyn MemoryStore> {
        &self.short_term
    }

    pub fn episodic(&self) -> &Arc<episodic::EpisodicStore> {
        &self.episodic
    }

    pub fn core(&self) -> &Arc<core_store::CoreStore> {
        &self.core
    }

    pub async fn clear_short_term(
        &self,
        agent_id: Uuid,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.short_term.clear(agent_id).await
    }

    pub async fn append_short_term(
        &self,
        agent_id: Uuid,
        item: MemoryItem,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.short_term.append(agent_id, item, self.window).await
    }

    pub async fn load_short_term(
        &self,
        agent_id: Uuid,
    ) -> Result<Vec<MemoryItem>, Box<dyn Error + Send + Sync>> {
        self.short_term.load(agent_id).await
    }

    /// Persist a completed interaction as an episodic event.
    pub fn store_long_term(&self, agent_id: Uuid, prompt: &str, response: &str) {
        let content = format!("prompt: {}\nresponse: {}", prompt, response);
        self.episodic
            .store(agent_id, episodic::EpisodeInput::new(content));
    }
}
