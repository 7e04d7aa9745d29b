//! Time triggers (cron).
//!
//! The cron expression must be five standard fields; both the field count
//! and each field's grammar (`*`, integer, `a-b` range, `*/n` step,
//! comma-separated lists) are validated here before the expression reaches
//! the schedule parser. One cron job exists per flow: the job id is the
//! flow id, and re-scheduling replaces the prior entry.
//!
//! At each scheduled instant a [`TriggerEvent`] with payload
//! `{ scheduled_at, first_step }` is delivered to the sink. Missed firings
//! are not replayed; catch-up is intentionally "none" to avoid stampedes
//! after downtime.

use crate::agentflow::flow::TriggerEvent;
use crate::agentflow::handler::{HandlerResult, ParamMap};
use crate::agentflow::scheduler::{JobFn, JobSchedule, Scheduler, TickOutcome};
use crate::agentflow::triggers::{TriggerHandler, TriggerSink};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

/// Validate a 5-field cron expression.
///
/// Each field may be `*`, an integer, a range `a-b`, a step `*/n` (or
/// `a-b/n`), or a comma-separated list of those.
pub fn validate_cron_expression(expr: &str) -> bool {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() != 5 {
        return false;
    }
    fields.iter().all(|field| valid_cron_field(field))
}

fn valid_cron_field(field: &str) -> bool {
    !field.is_empty() && field.split(',').all(valid_cron_part)
}

// One list element: (* | digits)(-digits)?(/digits)?
fn valid_cron_part(part: &str) -> bool {
    let (base, step) = match part.split_once('/') {
        Some((base, step)) => (base, Some(step)),
        None => (part, None),
    };
    if let Some(step) = step {
        if step.is_empty() || !step.chars().all(|c| c.is_ascii_digit()) {
            return false;
        }
    }
    let (start, end) = match base.split_once('-') {
        Some((start, end)) => (start, Some(end)),
        None => (base, None),
    };
    let start_ok = start == "*" || (!start.is_empty() && start.chars().all(|c| c.is_ascii_digit()));
    let end_ok = match end {
        // Ranges must be numeric on both sides.
        Some(end) => {
            start != "*" && !end.is_empty() && end.chars().all(|c| c.is_ascii_digit())
        }
        None => true,
    };
    start_ok && end_ok
}

/// Trigger handler arming cron schedules for flows.
pub struct CronTriggerHandler {
    scheduler: Arc<Scheduler>,
    sink: Arc<dyn TriggerSink>,
}

impl CronTriggerHandler {
    pub fn new(scheduler: Arc<Scheduler>, sink: Arc<dyn TriggerSink>) -> Self {
        Self { scheduler, sink }
    }

    fn trigger_args(fields: &[&str]) -> serde_json::Value {
        json!({
            "minute": fields[0],
            "hour": fields[1],
            "day": fields[2],
            "month": fields[3],
            "day_of_week": fields[4],
        })
    }
}

#[async_trait]
impl TriggerHandler for CronTriggerHandler {
    async fn schedule(&self, params: &ParamMap) -> HandlerResult {
        let expression = match params.get("cron_expression").and_then(|v| v.as_str()) {
            Some(expr) => expr.to_string(),
            None => return HandlerResult::failure("'cron_expression' is required"),
        };

        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return HandlerResult::failure(format!(
                "invalid cron '{}': expected 5 fields, got {}",
                expression,
                fields.len()
            ));
        }
        if !validate_cron_expression(&expression) {
            return HandlerResult::failure(format!("invalid cron expression: '{}'", expression));
        }

        let flow_id = params
            .get("flow_id")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok());
        let user_id = params.get("user_id").and_then(|v| v.as_i64());
        let first_step = params.get("first_step").cloned();

        // Validation/preparation call: no flow to arm yet, just echo the
        // parsed trigger args so the caller can persist them.
        let (flow_id, user_id, first_step) = match (flow_id, user_id, first_step) {
            (Some(f), Some(u), Some(s)) => (f, u, s),
            _ => {
                return HandlerResult::success(json!({
                    "trigger_type": "cron",
                    "trigger_args": Self::trigger_args(&fields),
                    "cron_expression": expression,
                }))
            }
        };

        let schedule = match JobSchedule::from_cron_fields(&expression) {
            Ok(schedule) => schedule,
            Err(e) => return HandlerResult::failure(e),
        };

        // One cron per flow; duplicate scheduling replaces the prior job.
        let job_id = flow_id.to_string();
        let sink = self.sink.clone();
        let job: JobFn = Arc::new(move || {
            let sink = sink.clone();
            let first_step = first_step.clone();
            Box::pin(async move {
                let event = TriggerEvent {
                    trigger_type: "cron".to_string(),
                    flow_id,
                    user_id,
                    payload: json!({
                        "scheduled_at": chrono::Utc::now().to_rfc3339(),
                        "first_step": first_step,
                    }),
                    source_headers: Default::default(),
                    upstream_event_id: None,
                };
                log::info!("cron fired for flow {}", flow_id);
                sink.deliver(event).await;
                TickOutcome::Normal
            })
        });
        self.scheduler.schedule_job(&job_id, schedule, job);

        HandlerResult::success(json!({
            "trigger_type": "cron",
            "job_id": job_id,
            "scheduled": true,
            "cron_expression": expression,
            "trigger_args": Self::trigger_args(&fields),
        }))
    }

    async fn unschedule(&self, registration_id: &str) -> HandlerResult {
        self.scheduler.unschedule_job(registration_id);
        HandlerResult::success(json!({
            "job_id": registration_id,
            "cancelled": true,
        }))
    }
}
