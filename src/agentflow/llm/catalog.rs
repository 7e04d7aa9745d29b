//! Model catalog and cost accounting.
//!
//! The catalog maps model keys to providers and per-1k token rates. Cost of
//! a call is `(input·rate_in + output·rate_out) / 1000`. Per-agent
//! cumulative usage is tracked monotonically by [`UsageTracker`].

use crate::agentflow::llm::TokenUsage;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

/// Catalog entry for one model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub model_key: String,
    pub provider_key: String,
    pub display_name: String,
    pub context_length: usize,
    pub input_cost_per_1k: f64,
    pub output_cost_per_1k: f64,
    pub is_active: bool,
}

impl ModelInfo {
    /// Dollar cost of one call at this model's rates.
    pub fn cost_of(&self, usage: &TokenUsage) -> f64 {
        (usage.input_tokens as f64 * self.input_cost_per_1k
            + usage.output_tokens as f64 * self.output_cost_per_1k)
            / 1000.0
    }
}

/// Static model catalog resolved at startup.
pub struct ModelCatalog {
    models: HashMap<String, ModelInfo>,
}

impl ModelCatalog {
    pub fn new(models: Vec<ModelInfo>) -> Self {
        Self {
            models: models
                .into_iter()
                .map(|m| (m.model_key.clone(), m))
                .collect(),
        }
    }

    /// Built-in catalog with the models the default factory can serve.
    pub fn builtin() -> Self {
        fn entry(
            key: &str,
            provider: &str,
            display: &str,
            ctx: usize,
            input: f64,
            output: f64,
        ) -> ModelInfo {
            ModelInfo {
                model_key: key.to_string(),
                provider_key: provider.to_string(),
                display_name: display.to_string(),
                context_length: ctx,
                input_cost_per_1k: input,
                output_cost_per_1k: output,
                is_active: true,
            }
        }
        Self::new(vec![
            entry("gpt-4.1", "openai", "GPT-4.1", 1_000_000, 0.002, 0.008),
            entry("gpt-4.1-mini", "openai", "GPT-4.1 mini", 1_000_000, 0.0004, 0.0016),
            entry("gpt-4o", "openai", "GPT-4o", 128_000, 0.0025, 0.01),
            entry("o3-mini", "openai", "o3-mini", 200_000, 0.0011, 0.0044),
            entry(
                "claude-sonnet-4-5",
                "anthropic",
                "Claude Sonnet 4.5",
                200_000,
                0.003,
                0.015,
            ),
            entry(
                "claude-haiku-4-5",
                "anthropic",
                "Claude Haiku 4.5",
                200_000,
                0.001,
                0.005,
            ),
        ])
    }

    /// Look up an active model by key.
    pub fn get(&self, model_key: &str) -> Option<&ModelInfo> {
        self.models.get(model_key).filter(|m| m.is_active)
    }

    pub fn model_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.models.keys().cloned().collect();
        keys.sort();
        keys
    }
}

/// Cumulative per-agent usage. All counters only ever grow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentUsage {
    pub total_input_tokens: usize,
    pub total_output_tokens: usize,
    pub total_cost: f64,
}

/// Monotonic per-agent usage accumulator.
pub struct UsageTracker {
    usage: Mutex<HashMap<Uuid, AgentUsage>>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self {
            usage: Mutex::new(HashMap::new()),
        }
    }

    /// Record one call's usage and cost against an agent.
    pub fn record(&self, agent_id: Uuid, usage: &TokenUsage, cost: f64) {
        let mut table = self.usage.lock().unwrap();
        let entry = table.entry(agent_id).or_default();
        entry.total_input_tokens += usage.input_tokens;
        entry.total_output_tokens += usage.output_tokens;
        entry.total_cost += cost;
        if log::log_enabled!(log::Level::Debug) {
            log::debug!(
                "usage for agent {}: +{}in +{}out (+${:.6})",
                agent_id,
                usage.input_tokens,
                usage.output_tokens,
                cost
            );
        }
    }

    /// Snapshot of the cumulative usage for an agent.
    pub fn summary(&self, agent_id: Uuid) -> AgentUsage {
        let table = self.usage.lock().unwrap();
        table.get(&agent_id).cloned().unwrap_or_default()
    }
}

impl Default for UsageTracker {
    fn default() -> Self {
        Self::new()
    }
}
