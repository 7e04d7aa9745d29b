//! Redis-backed short-term buffer.
//!
//! Identical window semantics to the in-process buffer, but backed by a
//! Redis list so the buffer survives restarts. Each append pipelines
//! `RPUSH` + `LTRIM -window..-1` + `EXPIRE ttl`; the trim keeps the list
//! inside the window and the TTL bounds storage for idle agents.
//!
//! Keys follow `agent_memory:short_term:{agent_id}`.

use crate::agentflow::memory::{MemoryItem, MemoryStore};
use async_trait::async_trait;
use redis::AsyncCommands;
use std::error::Error;
use uuid::Uuid;

/// Default TTL for an agent's short-term list.
pub const DEFAULT_TTL_SECS: i64 = 3600;

pub struct RedisBufferStore {
    conn: redis::aio::ConnectionManager,
    ttl_secs: i64,
}

impl RedisBufferStore {
    /// Connect to Redis at `url`. The connection manager reconnects
    /// transparently, so one instance can be shared for the process
    /// lifetime.
    pub async fn connect(url: &str) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let client = redis::Client::open(url)?;
        let conn = client.get_tokio_connection_manager().await?;
        Ok(Self {
            conn,
            ttl_secs: DEFAULT_TTL_SECS,
        })
    }

    /// Override the list TTL.
    pub fn with_ttl(mut self, ttl_secs: i64) -> Self {
        self.ttl_secs = ttl_secs;
        self
    }

    fn key(agent_id: Uuid) -> String {
        format!("agent_memory:short_term:{}", agent_id)
    }
}

#[async_trait]
impl MemoryStore for RedisBufferStore {
    async fn load(&self, agent_id: Uuid) -> Result<Vec<MemoryItem>, Box<dyn Error + Send + Sync>> {
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn.lrange(Self::key(agent_id), 0, -1).await?;
        let mut items = Vec::with_capacity(raw.len());
        for entry in raw {
            match serde_json::from_str::<MemoryItem>(&entry) {
                Ok(item) => items.push(item),
                // A malformed entry is dropped rather than poisoning the load.
                Err(e) => log::warn!("skipping undecodable memory entry: {}", e),
            }
        }
        Ok(items)
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
        let key = Self::key(agent_id);
        let encoded = serde_json::to_string(&item)?;
        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .rpush(&key, encoded)
            .ltrim(&key, -(window as isize), -1)
            .expire(&key, self.ttl_secs as i64)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn clear(&self, agent_id: Uuid) -> Result<(), Box<dyn Error + Send + Sync>> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(Self::key(agent_id)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_layout() {
        let agent = Uuid::nil();
        assert_eq!(
            RedisBufferStore::key(agent),
            "agent_memory:short_term:00000000-0000-0000-0000-000000000000"
        );
    }

    // Round-trips against a live server are covered by the ignored test
    // below; run with a local Redis and `cargo test -- --ignored`.
    #[tokio::test]
    #[ignore]
    async fn test_append_load_clear_against_live_redis() {
        let store = RedisBufferStore::connect("redis://127.0.0.1:6379/0")
            .await
            .unwrap();
        let agent = Uuid::new_v4();

        store.clear(agent).await.unwrap();
        for n in 0..8 {
            let item = MemoryItem::new("tool", json!({ "n": n }), json!("ok"));
            store.append(agent, item, 6).await.unwrap();
        }

        let items = store.load(agent).await.unwrap();
        assert_eq!(items.len(), 6);
        assert_eq!(items[0].params["n"], 2);
        store.clear(agent).await.unwrap();
        assert!(store.load(agent).await.unwrap().is_empty());
    }
}
