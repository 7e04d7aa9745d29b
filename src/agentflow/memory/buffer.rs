//! In-process short-term buffer.
//!
//! A circular window per agent: appends beyond the window evict the oldest
//! item first. Fast and not durable; use the Redis backend when history
//! must survive restarts.

use crate::agentflow::memory::{MemoryItem, MemoryStore};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::error::Error;
use std::sync::Mutex;
use uuid::Uuid;

/// `agent_id → deque` of recent items, newest at the back.
pub struct BufferStore {
    buffers: Mutex<HashMap<Uuid, VecDeque<MemoryItem>>>,
}

impl BufferStore {
    pub fn new() -> Self {
        Self {
            buffers: Mutex::new(HashMap::new()),
        }
    }

    /// Number of buffered items for an agent.
    pub fn len(&self, agent_id: Uuid) -> usize {
        let buffers = self.buffers.lock().unwrap();
        buffers.get(&agent_id).map(|b| b.len()).unwrap_or(0)
    }
}

impl Default for BufferStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MemoryStore for BufferStore {
    async fn load(&self, agent_id: Uuid) -> Result<Vec<MemoryItem>, Box<dyn Error + Send + Sync>> {
        let buffers = self.buffers.lock().unwrap();
        Ok(buffers
            .get(&agent_id)
            .map(|b| b.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn append(
        &self,
        agent_id: Uuid,
        item: MemoryItem,
        window: usize,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        if window == 0 {
            return Err("window must be a positive integer".into());
        }
        let mut buffers = self.buffers.lock().unwrap();
        let buf = buffers.entry(agent_id).or_insert_with(VecDeque::new);
        buf.push_back(item);
        while buf.len() > window {
            buf.pop_front();
        }
        Ok(())
    }

    async fn clear(&self, agent_id: Uuid) -> Result<(), Box<dyn Error + Send + Sync>> {
        let mut buffers = self.buffers.lock().unwrap();
        buffers.remove(&agent_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(n: u32) -> MemoryItem {
        MemoryItem::new("tool", json!({ "n": n }), json!("ok"))
    }

    #[tokio::test]
    async fn test_window_evicts_oldest_first() {
        let store = BufferStore::new();
        let agent = Uuid::new_v4();

        for n in 0..5 {
            store.append(agent, item(n), 3).await.unwrap();
        }

        let items = store.load(agent).await.unwrap();
        assert_eq!(items.len(), 3);
        let ns: Vec<u64> = items.iter().map(|i| i.params["n"].as_u64().unwrap()).collect();
        assert_eq!(ns, vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn test_clear_then_append_then_load_ordering() {
        let store = BufferStore::new();
        let agent = Uuid::new_v4();

        store.append(agent, item(99), 6).await.unwrap();
        store.clear(agent).await.unwrap();
        for n in 0..4 {
            store.append(agent, item(n), 6).await.unwrap();
        }

        let items = store.load(agent).await.unwrap();
        let ns: Vec<u64> = items.iter().map(|i| i.params["n"].as_u64().unwrap()).collect();
        assert_eq!(ns, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_zero_window_rejected() {
        let store = BufferStore::new();
        let agent = Uuid::new_v4();
        assert!(store.append(agent, item(0), 0).await.is_err());
    }
}
