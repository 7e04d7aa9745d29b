//! Agent executor: the bounded reason-act loop.
//!
//! One iteration = one LLM call. If the model answers with a tool plan,
//! each planned step is routed through the dispatcher, its result is
//! appended to short-term memory and re-injected into the conversation,
//! and the loop goes around again. A response with no tool steps is the
//! final answer. The loop is bounded three ways: `max_iterations`, a
//! loop-level deadline, and a cancellation token checked every iteration.
//!
//! Tool failures do not abort the loop; they are surfaced to the model
//! via injection so it can plan around them. Only an LLM-level error
//! aborts with `status: error`.

use crate::agentflow::dispatcher::{DispatchOptions, DispatchOutcome, Dispatcher};
use crate::agentflow::error::EngineError;
use crate::agentflow::handler::{HandlerResult, ParamMap};
use crate::agentflow::llm::catalog::{AgentUsage, ModelCatalog, ModelInfo, UsageTracker};
use crate::agentflow::llm::{inject_tool_result, ChatMessage, ClientFactory};
use crate::agentflow::memory::{MemoryItem, MemoryManager};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

/// Default cap on reason-act iterations.
pub const DEFAULT_MAX_ITERATIONS: u32 = 5;
/// Default loop-level deadline.
pub const DEFAULT_LOOP_DEADLINE: Duration = Duration::from_secs(300);

/// Fixed configuration for one agent. Mutations create a new version
/// rather than modifying the live object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub agent_id: Uuid,
    pub name: String,
    pub default_prompt: String,
    /// Handler names this agent may call as tools.
    pub tools: Vec<String>,
    pub memory_schema: serde_json::Value,
    pub model: Option<String>,
    pub temperature: f32,
    pub max_iterations: u32,
}

impl AgentConfig {
    pub fn new(name: impl Into<String>, default_prompt: impl Into<String>) -> Self {
        Self {
            agent_id: Uuid::new_v4(),
            name: name.into(),
            default_prompt: default_prompt.into(),
            tools: Vec::new(),
            memory_schema: serde_json::Value::Null,
            model: None,
            temperature: 0.7,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_tools(mut self, tools: Vec<String>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }
}

/// Versioned agent store: `put` appends a new version, `get` returns the
/// latest.
pub struct AgentStore {
    versions: RwLock<HashMap<Uuid, Vec<AgentConfig>>>,
}

impl AgentStore {
    pub fn new() -> Self {
        Self {
            versions: RwLock::new(HashMap::new()),
        }
    }

    pub fn put(&self, config: AgentConfig) {
        let mut versions = self.versions.write().unwrap();
        versions
            .entry(config.agent_id)
            .or_insert_with(Vec::new)
            .push(config);
    }

    pub fn get(&self, agent_id: Uuid) -> Option<AgentConfig> {
        let versions = self.versions.read().unwrap();
        versions.get(&agent_id).and_then(|v| v.last()).cloned()
    }

    pub fn version_count(&self, agent_id: Uuid) -> usize {
        let versions = self.versions.read().unwrap();
        versions.get(&agent_id).map(|v| v.len()).unwrap_or(0)
    }
}

impl Default for AgentStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Cooperative cancellation shared between the caller and the loop.
#[derive(Clone)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Resolves when `cancel` is called (or immediately if it already was).
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.notify.notified().await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-run options layered over the agent's stored configuration.
#[derive(Clone, Default)]
pub struct AgentRunOptions {
    pub temperature: Option<f32>,
    pub max_iterations: Option<u32>,
    pub session_id: Option<String>,
    pub cancel: Option<CancelToken>,
    pub deadline: Option<Duration>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AgentRunStatus {
    Success,
    Error,
    Cancelled,
}

/// What one agent run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRunResult {
    pub status: AgentRunStatus,
    pub agent_id: Uuid,
    pub session_id: String,
    pub final_output: String,
    pub iterations: u32,
    pub usage_summary: AgentUsage,
    pub model: Option<ModelInfo>,
    pub error: Option<String>,
}

/// Drives the reason-act loop. Owns no persistent state beyond what it
/// writes into the memory stores.
pub struct AgentExecutor {
    agents: Arc<AgentStore>,
    dispatcher: Arc<Dispatcher>,
    memory: Arc<MemoryManager>,
    catalog: Arc<ModelCatalog>,
    usage: Arc<UsageTracker>,
    clients: Arc<dyn ClientFactory>,
    default_model: String,
}

impl AgentExecutor {
    pub fn new(
        agents: Arc<AgentStore>,
        dispatcher: Arc<Dispatcher>,
        memory: Arc<MemoryManager>,
        catalog: Arc<ModelCatalog>,
        usage: Arc<UsageTracker>,
        clients: Arc<dyn ClientFactory>,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            agents,
            dispatcher,
            memory,
            catalog,
            usage,
            clients,
            default_model: default_model.into(),
        }
    }

    pub async fn execute_agent(
        &self,
        agent_id: Uuid,
        user_prompt: &str,
        api_key: &str,
        opts: AgentRunOptions,
    ) -> Result<AgentRunResult, EngineError> {
        let agent = self.agents.get(agent_id).ok_or_else(|| EngineError::NotFound {
            kind: "agent",
            name: agent_id.to_string(),
            attempted: vec![agent_id.to_string()],
            available: Vec::new(),
        })?;

        let model_key = agent
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone());
        let model_info = self
            .catalog
            .get(&model_key)
            .cloned()
            .ok_or_else(|| EngineError::NotFound {
                kind: "model",
                name: model_key.clone(),
                attempted: vec![model_key.clone()],
                available: self.catalog.model_keys(),
            })?;
        let client = self.clients.create(api_key, &model_key)?;

        let effective_temperature = opts.temperature.unwrap_or(agent.temperature);
        let effective_max_iterations = opts.max_iterations.unwrap_or(agent.max_iterations).max(1);
        let deadline = opts.deadline.unwrap_or(DEFAULT_LOOP_DEADLINE);
        let cancel = opts.cancel.unwrap_or_default();
        let session_id = opts
            .session_id
            .unwrap_or_else(|| format!("agent_{}_{}", agent_id.simple(), Uuid::new_v4().simple()));

        // Each run starts from a clean short-term window.
        if let Err(e) = self.memory.clear_short_term(agent_id).await {
            log::warn!("failed to clear short-term memory: {}", e);
        }

        let mut messages = vec![
            ChatMessage::system(&agent.default_prompt),
            ChatMessage::user(user_prompt),
        ];

        let run = self.run_loop(
            &agent,
            &client,
            &mut messages,
            effective_temperature,
            effective_max_iterations,
            &cancel,
            model_info.clone(),
        );
        let (status, final_output, iterations, error) =
            match tokio::time::timeout(deadline, run).await {
                Ok(done) => done,
                Err(_) => (
                    AgentRunStatus::Error,
                    String::new(),
                    effective_max_iterations,
                    Some(format!(
                        "agent loop exceeded its {}s deadline",
                        deadline.as_secs()
                    )),
                ),
            };

        if status == AgentRunStatus::Success {
            self.memory
                .store_long_term(agent_id, user_prompt, &final_output);
        }

        Ok(AgentRunResult {
            status,
            agent_id,
            session_id,
            final_output,
            iterations,
            usage_summary: self.usage.summary(agent_id),
            model: Some(model_info),
            error,
        })
    }

    async fn run_loop(
        &self,
        agent: &AgentConfig,
        client: &Arc<dyn crate::agentflow::llm::LLMClient>,
        messages: &mut Vec<ChatMessage>,
        temperature: f32,
        max_iterations: u32,
        cancel: &CancelToken,
        model_info: ModelInfo,
    ) -> (AgentRunStatus, String, u32, Option<String>) {
        for iteration in 1..=max_iterations {
            if cancel.is_cancelled() {
                log::info!("agent {} cancelled at iteration {}", agent.agent_id, iteration);
                return (AgentRunStatus::Cancelled, String::new(), iteration, None);
            }
            log::info!(
                "agent {} iteration {}/{}",
                agent.agent_id,
                iteration,
                max_iterations
            );

            // Abandon the in-flight request on cancellation; its result is
            // discarded, partial tool results already appended remain.
            let response = tokio::select! {
                response = client.chat(messages, temperature) => response,
                _ = cancel.cancelled() => {
                    return (AgentRunStatus::Cancelled, String::new(), iteration, None);
                }
            };
            let response = match response {
                Ok(response) => response,
                Err(e) => {
                    log::error!("LLM error for agent {}: {}", agent.agent_id, e);
                    return (
                        AgentRunStatus::Error,
                        String::new(),
                        iteration,
                        Some(e.to_string()),
                    );
                }
            };

            let cost = model_info.cost_of(&response.usage);
            self.usage.record(agent.agent_id, &response.usage, cost);

            if response.tool_steps.is_empty() {
                let final_output = response
                    .final_output
                    .clone()
                    .unwrap_or_else(|| response.content.clone());
                return (AgentRunStatus::Success, final_output, iteration, None);
            }

            messages.push(ChatMessage::assistant(&response.content));
            for step in &response.tool_steps {
                let result = self.dispatch_tool_step(agent, step).await;
                let item = MemoryItem::new(
                    &step.tool,
                    serde_json::to_value(&step.params).unwrap_or_default(),
                    serde_json::to_value(&result).unwrap_or_default(),
                );
                if let Err(e) = self.memory.append_short_term(agent.agent_id, item).await {
                    log::warn!("failed to append short-term memory: {}", e);
                }
                inject_tool_result(messages, &step.tool, &result);
            }
        }

        (
            AgentRunStatus::Success,
            "max_iterations_exceeded".to_string(),
            max_iterations,
            None,
        )
    }

    /// Dispatch one planned tool step. Failures of every kind come back as
    /// an error result, which the caller injects for next-turn planning.
    async fn dispatch_tool_step(
        &self,
        agent: &AgentConfig,
        step: &crate::agentflow::llm::ToolStep,
    ) -> HandlerResult {
        if !agent.tools.is_empty() && !agent.tools.iter().any(|t| t == &step.tool) {
            return HandlerResult::failure(format!(
                "tool '{}' is not in this agent's tool list",
                step.tool
            ));
        }
        let opts = DispatchOptions {
            smart_input: true,
            ..Default::default()
        };
        match self
            .dispatcher
            .dispatch(&step.tool, &step.params, &ParamMap::new(), &opts)
            .await
        {
            Ok(DispatchOutcome::Completed(result)) => result,
            Ok(DispatchOutcome::NeedsInput { handler, analysis }) => {
                HandlerResult::failure(format!(
                    "handler '{}' requires user input for: {:?}",
                    handler, analysis.missing
                ))
                .with_metadata(
                    "form_schema",
                    analysis.form_schema.unwrap_or(serde_json::Value::Null),
                )
            }
            Err(e) => HandlerResult::failure(e.to_string()),
        }
    }
}
