//! Cron trigger arming: validation and the schedule/unschedule round trip.

use agentflow::flow::TriggerEvent;
use agentflow::handler::ParamMap;
use agentflow::scheduler::Scheduler;
use agentflow::triggers::cron_trigger::CronTriggerHandler;
use agentflow::triggers::{TriggerHandler, TriggerSink};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

struct NullSink;

#[async_trait]
impl TriggerSink for NullSink {
    async fn deliver(&self, _event: TriggerEvent) {}
}

fn cron_params(expr: &str, flow_id: Uuid) -> ParamMap {
    let mut params = ParamMap::new();
    params.insert("cron_expression".into(), json!(expr));
    params.insert("flow_id".into(), json!(flow_id.to_string()));
    params.insert("user_id".into(), json!(1));
    params.insert(
        "first_step".into(),
        json!({
            "node_name": "HTTP_Request",
            "action_name": "request",
            "params": { "method": "GET", "url": "https://example.test/ping" }
        }),
    );
    params
}

#[tokio::test]
async fn test_schedule_then_unschedule_leaves_no_job() {
    let scheduler = Arc::new(Scheduler::new());
    let handler = CronTriggerHandler::new(scheduler.clone(), Arc::new(NullSink));
    let flow_id = Uuid::new_v4();

    let result = handler.schedule(&cron_params("*/5 * * * *", flow_id)).await;
    assert!(result.is_success());
    let output = result.output.unwrap();
    assert_eq!(output["scheduled"], true);
    assert_eq!(output["job_id"], flow_id.to_string());
    assert_eq!(output["trigger_args"]["minute"], "*/5");
    assert!(scheduler.has_job(&flow_id.to_string()));

    let cancelled = handler.unschedule(&flow_id.to_string()).await;
    assert!(cancelled.is_success());
    assert!(!scheduler.has_job(&flow_id.to_string()));
    assert!(scheduler.job_ids().is_empty());
}

#[tokio::test]
async fn test_duplicate_schedule_replaces() {
    let scheduler = Arc::new(Scheduler::new());
    let handler = CronTriggerHandler::new(scheduler.clone(), Arc::new(NullSink));
    let flow_id = Uuid::new_v4();

    handler.schedule(&cron_params("*/5 * * * *", flow_id)).await;
    handler.schedule(&cron_params("0 * * * *", flow_id)).await;

    // Still exactly one job for this flow.
    assert_eq!(scheduler.job_ids(), vec![flow_id.to_string()]);
}

#[tokio::test]
async fn test_bad_expressions_rejected() {
    let scheduler = Arc::new(Scheduler::new());
    let handler = CronTriggerHandler::new(scheduler.clone(), Arc::new(NullSink));
    let flow_id = Uuid::new_v4();

    for expr in ["* * * *", "61a * * * *", "", "* * * * * *"] {
        let result = handler.schedule(&cron_params(expr, flow_id)).await;
        assert!(!result.is_success(), "expected '{}' to be rejected", expr);
    }
    assert!(scheduler.job_ids().is_empty());
}

#[tokio::test]
async fn test_validation_only_call_returns_trigger_args() {
    let handler = CronTriggerHandler::new(Arc::new(Scheduler::new()), Arc::new(NullSink));
    let mut params = ParamMap::new();
    params.insert("cron_expression".into(), json!("0 9 * * 1-5"));

    let result = handler.schedule(&params).await;
    assert!(result.is_success());
    let output = result.output.unwrap();
    assert_eq!(output["trigger_args"]["day_of_week"], "1-5");
    assert!(output.get("scheduled").is_none());
}
