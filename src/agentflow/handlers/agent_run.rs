//! Agent execution as a workflow node.
//!
//! Flows can embed a reasoning step by pointing a node at an agent. This
//! handler is a thin shim: all execution goes through the
//! [`AgentExecutor`] service path, so there is exactly one agent loop in
//! the system.

use crate::agentflow::agent::{AgentExecutor, AgentRunOptions, AgentRunStatus};
use crate::agentflow::handler::{
    Handler, HandlerResult, ParamMap, ParameterSpec, ParameterType,
};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

pub struct AgentRunHandler {
    executor: Arc<AgentExecutor>,
}

impl AgentRunHandler {
    pub fn new(executor: Arc<AgentExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl Handler for AgentRunHandler {
    async fn execute(&self, params: &ParamMap, creds: &ParamMap) -> HandlerResult {
        let agent_id = match params
            .get("agent_id")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
        {
            Some(id) => id,
            None => return HandlerResult::failure("'agent_id' is required"),
        };
        let prompt = match params.get("prompt").and_then(|v| v.as_str()) {
            Some(prompt) => prompt,
            None => return HandlerResult::failure("'prompt' is required"),
        };
        let api_key = creds
            .get("api_key")
            .and_then(|v| v.as_str())
            .unwrap_or_default();

        let opts = AgentRunOptions {
            temperature: params
                .get("temperature")
                .and_then(|v| v.as_f64())
                .map(|t| t as f32),
            max_iterations: params
                .get("max_iterations")
                .and_then(|v| v.as_u64())
                .map(|m| m as u32),
            session_id: params
                .get("session_id")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            ..Default::default()
        };

        match self.executor.execute_agent(agent_id, prompt, api_key, opts).await {
            Ok(run) => {
                let output = json!({
                    "final_output": run.final_output,
                    "iterations": run.iterations,
                    "session_id": run.session_id,
                    "usage_summary": run.usage_summary,
                });
                match run.status {
                    AgentRunStatus::Success => HandlerResult::success(output),
                    AgentRunStatus::Cancelled => {
                        HandlerResult::failure("agent run was cancelled")
                    }
                    AgentRunStatus::Error => HandlerResult::failure(
                        run.error.unwrap_or_else(|| "agent run failed".to_string()),
                    ),
                }
            }
            Err(e) => HandlerResult::failure(e.to_string()),
        }
    }

    fn parameter_specs(&self) -> Vec<ParameterSpec> {
        vec![
            ParameterSpec::new("agent_id", ParameterType::String).required(),
            ParameterSpec::new("prompt", ParameterType::String).required(),
            ParameterSpec::new("temperature", ParameterType::Number),
            ParameterSpec::new("max_iterations", ParameterType::Integer),
            ParameterSpec::new("session_id", ParameterType::String),
        ]
    }
}
