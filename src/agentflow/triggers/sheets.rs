//! Google Sheets polling trigger.
//!
//! Sheets has no push channel for cell data, so changes are detected by
//! polling: each tick fetches the watched range, hashes the values, and
//! fires when the hash differs from the stored one. The content hash is
//! the resume token; it advances only after the change event is delivered.

use crate::agentflow::flow::TriggerEvent;
use crate::agentflow::handler::{HandlerResult, ParamMap};
use crate::agentflow::http_pool::shared_client;
use crate::agentflow::scheduler::{JobFn, JobSchedule, Scheduler, TickOutcome};
use crate::agentflow::triggers::push::{require_flow_id, require_str, require_user_id};
use crate::agentflow::triggers::{
    new_registration, ResumeToken, TriggerHandler, TriggerSink, TriggerStateStore,
};
use async_trait::async_trait;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

/// Google caps Sheets reads around 100 requests per 100 seconds.
pub const MIN_POLL_INTERVAL_SECS: u64 = 60;

/// Hash of a values payload, used as the change token.
pub fn values_hash(values: &serde_json::Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(values.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

pub struct SheetsPollHandler {
    state: Arc<TriggerStateStore>,
    sink: Arc<dyn TriggerSink>,
    scheduler: Arc<Scheduler>,
    api_base: String,
}

impl SheetsPollHandler {
    pub fn new(
        state: Arc<TriggerStateStore>,
        sink: Arc<dyn TriggerSink>,
        scheduler: Arc<Scheduler>,
    ) -> Self {
        Self {
            state,
            sink,
            scheduler,
            api_base: "https://sheets.googleapis.com/v4".to_string(),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    /// One polling tick: fetch, hash, compare, maybe fire.
    pub async fn poll_once(&self, trigger_id: &str) -> TickOutcome {
        if !self.state.accepts_events(trigger_id) {
            return TickOutcome::Normal;
        }
        let registration = match self.state.get(trigger_id) {
            Some(reg) => reg,
            None => return TickOutcome::Normal,
        };
        let spreadsheet_id = registration.args["spreadsheet_id"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        let range = registration.args["range"].as_str().unwrap_or("A1:Z100");
        let url = format!(
            "{}/spreadsheets/{}/values/{}",
            self.api_base, spreadsheet_id, range
        );

        let response = match shared_client().get(&url).send().await {
            Ok(response) => response,
            Err(e) => {
                log::warn!("sheets poll failed for {}: {}", trigger_id, e);
                return TickOutcome::Normal;
            }
        };
        if response.status().as_u16() == 429 {
            return TickOutcome::Backoff;
        }
        let payload: serde_json::Value = match response.json().await {
            Ok(payload) => payload,
            Err(_) => return TickOutcome::Normal,
        };
        let values = payload
            .get("values")
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        let new_hash = values_hash(&values);

        let previous = match self.state.resume_token(trigger_id) {
            Some(ResumeToken::ContentHash(hash)) => hash,
            _ => String::new(),
        };
        if new_hash == previous {
            return TickOutcome::Normal;
        }
        // First observation just primes the token; nothing "changed" yet.
        if !previous.is_empty() {
            self.sink
                .deliver(TriggerEvent {
                    trigger_type: "sheets_poll".to_string(),
                    flow_id: registration.flow_id,
                    user_id: registration.user_id,
                    payload: json!({
                        "spreadsheet_id": spreadsheet_id,
                        "values": values,
                    }),
                    source_headers: Default::default(),
                    upstream_event_id: Some(new_hash.clone()),
                })
                .await;
        }
        let _ = self
            .state
            .advance_token(trigger_id, ResumeToken::ContentHash(new_hash));
        TickOutcome::Normal
    }
}

#[async_trait]
impl TriggerHandler for SheetsPollHandler {
    async fn schedule(&self, params: &ParamMap) -> HandlerResult {
        let flow_id = match require_flow_id(params) {
            Ok(id) => id,
            Err(e) => return HandlerResult::failure(e),
        };
        let user_id = match require_user_id(params) {
            Ok(id) => id,
            Err(e) => return HandlerResult::failure(e),
        };
        let spreadsheet_id = match require_str(params, "spreadsheet_id") {
            Ok(id) => id.to_string(),
            Err(e) => return HandlerResult::failure(e),
        };
        let range = params
            .get("range")
            .and_then(|v| v.as_str())
            .unwrap_or("A1:Z100")
            .to_string();
        let interval_secs = params
            .get("polling_interval")
            .and_then(|v| v.as_u64())
            .unwrap_or(300);
        if interval_secs < MIN_POLL_INTERVAL_SECS {
            return HandlerResult::failure(format!(
                "minimum polling interval is {} seconds",
                MIN_POLL_INTERVAL_SECS
            ));
        }

        let mut registration = new_registration(
            "sheets_poll",
            flow_id,
            user_id,
            json!({ "spreadsheet_id": spreadsheet_id, "range": range }),
        );
        registration.resume_token = Some(ResumeToken::ContentHash(String::new()));
        let trigger_id = self.state.arm(registration);

        let state = self.state.clone();
        let sink = self.sink.clone();
        let scheduler = self.scheduler.clone();
        let api_base = self.api_base.clone();
        let tick_id = trigger_id.clone();
        let job: JobFn = Arc::new(move || {
            let poller = SheetsPollHandler {
                state: state.clone(),
                sink: sink.clone(),
                scheduler: scheduler.clone(),
                api_base: api_base.clone(),
            };
            let tick_id = tick_id.clone();
            Box::pin(async move { poller.poll_once(&tick_id).await })
        });
        self.scheduler.schedule_job(
            &trigger_id,
            JobSchedule::Interval(Duration::from_secs(interval_secs)),
            job,
        );

        HandlerResult::success(json!({
            "trigger_type": "sheets_poll",
            "trigger_id": trigger_id,
            "spreadsheet_id": spreadsheet_id,
            "range": range,
            "polling_interval": interval_secs,
        }))
    }

    async fn unschedule(&self, registration_id: &str) -> HandlerResult {
        self.scheduler.unschedule_job(registration_id);
        if self.state.disarm(registration_id) {
            HandlerResult::success(json!({ "trigger_id": registration_id, "disarmed": true }))
        } else {
            HandlerResult::failure(format!("unknown registration '{}'", registration_id))
        }
    }
}
