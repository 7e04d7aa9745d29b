//! Workflow runner: authorization ladder, step threading, error policy.

use agentflow::dispatcher::Dispatcher;
use agentflow::flow::{Flow, FlowSpec, FlowStore, InMemoryFlowStore, OnError, Step};
use agentflow::handler::{FnHandler, Handler, HandlerCtor, HandlerResult, ParamMap};
use agentflow::registry::Registry;
use agentflow::workflow::{ExecutionStatus, WorkflowRunner};
use serde_json::json;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

fn runner_with(
    registry: Arc<Registry>,
    flows: Arc<InMemoryFlowStore>,
) -> WorkflowRunner {
    let dispatcher = Arc::new(Dispatcher::new(registry));
    WorkflowRunner::new(flows, dispatcher)
}

fn step(node: &str, action: &str) -> Step {
    Step {
        node: node.to_string(),
        action: action.to_string(),
        params: ParamMap::new(),
        creds_ref: None,
        input_key: None,
        on_error: OnError::Abort,
    }
}

fn register_fn<F>(registry: &Registry, name: &str, f: F)
where
    F: Fn(ParamMap) -> HandlerResult + Send + Sync + Clone + 'static,
{
    let handler = FnHandler::new(Vec::new(), move |params, _creds| {
        let f = f.clone();
        Box::pin(async move { f(params) })
    });
    let ctor: HandlerCtor = Arc::new(move || Arc::new(handler.clone()) as Arc<dyn Handler>);
    registry.register_node(name, ctor);
}

#[tokio::test]
async fn test_missing_flow_is_error() {
    let registry = Arc::new(Registry::new());
    let flows = Arc::new(InMemoryFlowStore::new());
    let runner = runner_with(registry, flows);

    let result = runner
        .execute_complete_workflow(Uuid::new_v4(), 1, json!({}), ParamMap::new(), None, None)
        .await;
    assert_eq!(result.status, ExecutionStatus::Error);
    assert_eq!(result.reason.as_deref(), Some("flow_not_found"));
}

#[tokio::test]
async fn test_inactive_flow_is_skipped() {
    let registry = Arc::new(Registry::new());
    let flows = Arc::new(InMemoryFlowStore::new());
    let flow_id = Uuid::new_v4();
    flows.put(Flow {
        flow_id,
        owner_id: 1,
        is_active: false,
        spec: FlowSpec {
            steps: vec![step("Logger", "log")],
        },
    });
    let runner = runner_with(registry, flows);

    let result = runner
        .execute_complete_workflow(flow_id, 1, json!({}), ParamMap::new(), None, None)
        .await;
    assert_eq!(result.status, ExecutionStatus::Skipped);
    assert_eq!(result.reason.as_deref(), Some("inactive"));
}

#[tokio::test]
async fn test_foreign_owner_is_forbidden() {
    let registry = Arc::new(Registry::new());
    let flows = Arc::new(InMemoryFlowStore::new());
    let flow_id = Uuid::new_v4();
    flows.put(Flow {
        flow_id,
        owner_id: 1,
        is_active: true,
        spec: FlowSpec {
            steps: vec![step("Logger", "log")],
        },
    });
    let runner = runner_with(registry, flows);

    let result = runner
        .execute_complete_workflow(flow_id, 2, json!({}), ParamMap::new(), None, None)
        .await;
    assert_eq!(result.status, ExecutionStatus::Error);
    assert_eq!(result.reason.as_deref(), Some("forbidden"));
}

#[tokio::test]
async fn test_empty_spec_is_error() {
    let registry = Arc::new(Registry::new());
    let flows = Arc::new(InMemoryFlowStore::new());
    let flow_id = Uuid::new_v4();
    flows.put(Flow {
        flow_id,
        owner_id: 1,
        is_active: true,
        spec: FlowSpec { steps: Vec::new() },
    });
    let runner = runner_with(registry, flows);

    let result = runner
        .execute_complete_workflow(flow_id, 1, json!({}), ParamMap::new(), None, None)
        .await;
    assert_eq!(result.status, ExecutionStatus::Error);
    assert_eq!(result.reason.as_deref(), Some("no_steps"));
}

#[tokio::test]
async fn test_output_threads_into_next_step() {
    let registry = Arc::new(Registry::new());
    // Step 1 doubles the triggered value; step 2 records what it was fed.
    register_fn(&registry, "Double.value", |params| {
        let value = params["trigger_data"]["value"].as_i64().unwrap_or(0);
        HandlerResult::success(json!(value * 2))
    });
    let seen = Arc::new(Mutex::new(json!(null)));
    let seen_clone = seen.clone();
    register_fn(&registry, "Record.input", move |params| {
        *seen_clone.lock().unwrap() = params.get("doubled").cloned().unwrap_or_default();
        HandlerResult::success(json!("recorded"))
    });

    let flows = Arc::new(InMemoryFlowStore::new());
    let flow_id = Uuid::new_v4();
    let mut second = step("Record", "input");
    second.input_key = Some("doubled".to_string());
    flows.put(Flow {
        flow_id,
        owner_id: 1,
        is_active: true,
        spec: FlowSpec {
            steps: vec![step("Double", "value"), second],
        },
    });
    let runner = runner_with(registry, flows);

    let result = runner
        .execute_complete_workflow(
            flow_id,
            1,
            json!({ "value": 7 }),
            ParamMap::new(),
            Some("webhook"),
            None,
        )
        .await;

    assert_eq!(result.status, ExecutionStatus::Success);
    assert_eq!(result.steps.len(), 2);
    assert_eq!(*seen.lock().unwrap(), json!(14));
}

#[tokio::test]
async fn test_short_circuit_on_error_unless_continue() {
    let registry = Arc::new(Registry::new());
    register_fn(&registry, "Boom.now", |_params| {
        HandlerResult::failure("boom")
    });
    let ran = Arc::new(Mutex::new(false));
    let ran_clone = ran.clone();
    register_fn(&registry, "After.boom", move |_params| {
        *ran_clone.lock().unwrap() = true;
        HandlerResult::success(json!("ok"))
    });

    let flows = Arc::new(InMemoryFlowStore::new());

    // Default policy: the second step never runs.
    let abort_flow = Uuid::new_v4();
    flows.put(Flow {
        flow_id: abort_flow,
        owner_id: 1,
        is_active: true,
        spec: FlowSpec {
            steps: vec![step("Boom", "now"), step("After", "boom")],
        },
    });
    let runner = runner_with(registry.clone(), flows.clone());
    let result = runner
        .execute_complete_workflow(abort_flow, 1, json!({}), ParamMap::new(), None, None)
        .await;
    assert_eq!(result.status, ExecutionStatus::Error);
    assert_eq!(result.reason.as_deref(), Some("step_failed"));
    assert_eq!(result.steps.len(), 1);
    assert!(!*ran.lock().unwrap());

    // on_error: continue lets the flow finish.
    let continue_flow = Uuid::new_v4();
    let mut failing = step("Boom", "now");
    failing.on_error = OnError::Continue;
    flows.put(Flow {
        flow_id: continue_flow,
        owner_id: 1,
        is_active: true,
        spec: FlowSpec {
            steps: vec![failing, step("After", "boom")],
        },
    });
    let result = runner
        .execute_complete_workflow(continue_flow, 1, json!({}), ParamMap::new(), None, None)
        .await;
    assert_eq!(result.status, ExecutionStatus::Success);
    assert_eq!(result.steps.len(), 2);
    assert!(*ran.lock().unwrap());
}
