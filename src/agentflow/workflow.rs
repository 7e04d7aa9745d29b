//! Workflow execution helper.
//!
//! The one path every trigger funnels into: resolve the flow, authorize,
//! step through its nodes in order, and thread each step's output into the
//! next. Used by cron jobs, webhooks, push notifications, and polling
//! ticks alike so they all execute flows identically.

use crate::agentflow::dispatcher::{DispatchOptions, Dispatcher};
use crate::agentflow::flow::{FlowStore, OnError, TriggerEvent};
use crate::agentflow::handler::{HandlerResult, ParamMap};
use crate::agentflow::triggers::TriggerSink;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;

/// Overall outcome of one flow execution.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Error,
    Skipped,
}

/// Outcome of a single step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutcome {
    pub node: String,
    pub action: String,
    pub result: HandlerResult,
}

/// Result of `execute_complete_workflow`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub execution_id: String,
    pub status: ExecutionStatus,
    /// `flow_not_found` | `inactive` | `forbidden` | `no_steps` |
    /// `step_failed`, when status is not success.
    pub reason: Option<String>,
    pub steps: Vec<StepOutcome>,
}

impl ExecutionResult {
    fn terminal(execution_id: String, status: ExecutionStatus, reason: &str) -> Self {
        Self {
            execution_id,
            status,
            reason: Some(reason.to_string()),
            steps: Vec::new(),
        }
    }
}

/// Key under which the previous step's output lands when a step declares
/// an `input_key`... unless the step names its own.
pub const PREV_OUTPUT_KEY: &str = "previous_output";
/// Key carrying trigger data in the initial step environment.
pub const TRIGGER_DATA_KEY: &str = "trigger_data";
/// Key exposing the trigger source tag to downstream steps.
pub const TRIGGER_SOURCE_KEY: &str = "trigger_source";

/// Steps through flows; also the [`TriggerSink`] the trigger runtime
/// delivers into.
pub struct WorkflowRunner {
    flows: Arc<dyn FlowStore>,
    dispatcher: Arc<Dispatcher>,
}

impl WorkflowRunner {
    pub fn new(flows: Arc<dyn FlowStore>, dispatcher: Arc<Dispatcher>) -> Self {
        Self { flows, dispatcher }
    }

    /// Execute a flow end to end.
    ///
    /// The outcome ladder, in order: missing flow → error
    /// (`flow_not_found`); inactive flow → skipped (`inactive`); owner
    /// mismatch → error (`forbidden`); empty spec → error (`no_steps`).
    /// Otherwise steps run sequentially, short-circuiting on the first
    /// failure unless that step declared `on_error: continue`.
    pub async fn execute_complete_workflow(
        &self,
        flow_id: Uuid,
        user_id: i64,
        trigger_data: serde_json::Value,
        inputs: ParamMap,
        trigger_source: Option<&str>,
        upstream_event_id: Option<&str>,
    ) -> ExecutionResult {
        let execution_id = derive_execution_id(flow_id, trigger_source, upstream_event_id);

        let flow = match self.flows.get(flow_id) {
            Some(flow) => flow,
            None => {
                log::error!("flow {} not found", flow_id);
                return ExecutionResult::terminal(
                    execution_id,
                    ExecutionStatus::Error,
                    "flow_not_found",
                );
            }
        };
        if !flow.is_active {
            log::info!("flow {} is not active, skipping execution", flow_id);
            return ExecutionResult::terminal(execution_id, ExecutionStatus::Skipped, "inactive");
        }
        if flow.owner_id != user_id {
            log::error!("flow {} does not belong to user {}", flow_id, user_id);
            return ExecutionResult::terminal(execution_id, ExecutionStatus::Error, "forbidden");
        }
        if flow.spec.steps.is_empty() {
            return ExecutionResult::terminal(execution_id, ExecutionStatus::Error, "no_steps");
        }

        // Initial environment: caller inputs plus the trigger context.
        let mut environment = inputs;
        environment.insert(TRIGGER_DATA_KEY.to_string(), trigger_data);
        if let Some(source) = trigger_source {
            environment.insert(
                TRIGGER_SOURCE_KEY.to_string(),
                serde_json::Value::String(source.to_string()),
            );
        }
        environment.insert(
            "execution_id".to_string(),
            serde_json::Value::String(execution_id.clone()),
        );

        log::info!(
            "executing workflow {} with {} steps (execution {})",
            flow_id,
            flow.spec.steps.len(),
            execution_id
        );

        let mut outcomes: Vec<StepOutcome> = Vec::with_capacity(flow.spec.steps.len());
        let mut previous_output: Option<serde_json::Value> = None;
        let mut failed = false;

        for step in &flow.spec.steps {
            // Step params win over the shared environment.
            let mut params = environment.clone();
            for (k, v) in &step.params {
                params.insert(k.clone(), v.clone());
            }
            if let Some(input_key) = &step.input_key {
                let key = if input_key.is_empty() {
                    PREV_OUTPUT_KEY
                } else {
                    input_key.as_str()
                };
                params.insert(
                    key.to_string(),
                    previous_output.clone().unwrap_or(serde_json::Value::Null),
                );
            }

            let name = format!("{}.{}", step.node, step.action);
            let result = match self
                .dispatcher
                .dispatch(&name, &params, &ParamMap::new(), &DispatchOptions::default())
                .await
            {
                Ok(outcome) => outcome.into_result(),
                Err(e) => HandlerResult::failure(e.to_string()),
            };

            let step_failed = !result.is_success();
            previous_output = result.output.clone();
            outcomes.push(StepOutcome {
                node: step.node.clone(),
                action: step.action.clone(),
                result,
            });

            if step_failed {
                if step.on_error == OnError::Continue {
                    log::warn!(
                        "step {}.{} failed; continuing per step policy",
                        step.node,
                        step.action
                    );
                    continue;
                }
                failed = true;
                break;
            }
        }

        ExecutionResult {
            execution_id,
            status: if failed {
                ExecutionStatus::Error
            } else {
                ExecutionStatus::Success
            },
            reason: if failed {
                Some("step_failed".to_string())
            } else {
                None
            },
            steps: outcomes,
        }
    }
}

#[async_trait]
impl TriggerSink for WorkflowRunner {
    async fn deliver(&self, event: TriggerEvent) {
        let result = self
            .execute_complete_workflow(
                event.flow_id,
                event.user_id,
                event.payload,
                ParamMap::new(),
                Some(&event.trigger_type),
                event.upstream_event_id.as_deref(),
            )
            .await;
        match result.status {
            ExecutionStatus::Success => log::info!(
                "workflow {} completed (execution {}, {} steps)",
                event.flow_id,
                result.execution_id,
                result.steps.len()
            ),
            ExecutionStatus::Skipped => {}
            ExecutionStatus::Error => log::error!(
                "workflow {} failed: {} (execution {})",
                event.flow_id,
                result.reason.as_deref().unwrap_or("unknown"),
                result.execution_id
            ),
        }
    }
}

/// Stable when the upstream supplies an event id, random otherwise.
///
/// Downstream steps may consult this id to skip repeat work when a source
/// redelivers (at-least-once delivery).
pub fn derive_execution_id(
    flow_id: Uuid,
    trigger_source: Option<&str>,
    upstream_event_id: Option<&str>,
) -> String {
    match (trigger_source, upstream_event_id) {
        (Some(source), Some(event_id)) => {
            let mut hasher = Sha256::new();
            hasher.update(flow_id.as_bytes());
            hasher.update(source.as_bytes());
            hasher.update(event_id.as_bytes());
            hex::encode(&hasher.finalize()[..16])
        }
        _ => Uuid::new_v4().simple().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_id_stable_for_same_upstream_event() {
        let flow = Uuid::new_v4();
        let a = derive_execution_id(flow, Some("github"), Some("delivery-1"));
        let b = derive_execution_id(flow, Some("github"), Some("delivery-1"));
        let c = derive_execution_id(flow, Some("github"), Some("delivery-2"));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_execution_id_random_without_upstream_event() {
        let flow = Uuid::new_v4();
        let a = derive_execution_id(flow, Some("cron"), None);
        let b = derive_execution_id(flow, Some("cron"), None);
        assert_ne!(a, b);
    }
}
