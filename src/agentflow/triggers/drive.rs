//! Google Drive triggers: watch channels and a polling fallback.
//!
//! Drive notifies through watch channels. A notification carries no
//! payload of its own; the headers identify the channel
//! (`X-Goog-Channel-ID`), the watched resource (`X-Goog-Resource-ID`), and
//! the state transition (`X-Goog-Resource-State`). `sync` states are the
//! initial handshake and are ignored; `update` states mean "something
//! changed since your page token" and trigger a change fetch downstream.
//! The stored `startPageToken` is the resume token.

use crate::agentflow::flow::TriggerEvent;
use crate::agentflow::handler::{HandlerResult, ParamMap};
use crate::agentflow::http_pool::shared_client;
use crate::agentflow::scheduler::{JobFn, JobSchedule, Scheduler, TickOutcome};
use crate::agentflow::triggers::push::{require_flow_id, require_user_id};
use crate::agentflow::triggers::{
    new_registration, PushChannelInfo, ResumeToken, TriggerHandler, TriggerSink, TriggerStateStore,
};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Hard cap on changes processed per polling tick.
pub const MAX_CHANGES_PER_TICK: usize = 10;
/// Minimum polling interval for the fallback.
pub const MIN_POLL_INTERVAL_SECS: u64 = 60;

pub struct DriveTriggerHandler {
    state: Arc<TriggerStateStore>,
    sink: Arc<dyn TriggerSink>,
}

impl DriveTriggerHandler {
    pub fn new(state: Arc<TriggerStateStore>, sink: Arc<dyn TriggerSink>) -> Self {
        Self { state, sink }
    }

    /// Handle a channel notification on `/push/drive/{trigger_id}`.
    pub async fn receive(
        &self,
        trigger_id: &str,
        headers: &HashMap<String, String>,
    ) -> HandlerResult {
        if !self.state.accepts_events(trigger_id) {
            return HandlerResult::failure("registration is not armed");
        }
        let registration = match self.state.get(trigger_id) {
            Some(reg) => reg,
            None => return HandlerResult::failure("unknown registration"),
        };

        let channel_id = header(headers, "x-goog-channel-id").unwrap_or_default();
        let expected = registration
            .channel
            .as_ref()
            .map(|c| c.channel_id.clone())
            .unwrap_or_default();
        if channel_id != expected {
            log::warn!(
                "drive notification channel mismatch for {}: got '{}'",
                trigger_id,
                channel_id
            );
            return HandlerResult::failure("channel id mismatch");
        }

        let resource_state = header(headers, "x-goog-resource-state").unwrap_or_default();
        if resource_state == "sync" {
            // Initial handshake; nothing changed.
            return HandlerResult::success(json!({ "delivered": false, "state": "sync" }));
        }
        if resource_state != "update" {
            return HandlerResult::success(json!({
                "delivered": false,
                "state": resource_state,
            }));
        }

        let resource_id = header(headers, "x-goog-resource-id");
        let page_token = match self.state.resume_token(trigger_id) {
            Some(ResumeToken::PageToken(token)) => token,
            _ => String::new(),
        };

        self.sink
            .deliver(TriggerEvent {
                trigger_type: "drive".to_string(),
                flow_id: registration.flow_id,
                user_id: registration.user_id,
                payload: json!({
                    "channel_id": channel_id,
                    "resource_id": resource_id,
                    "page_token": page_token,
                }),
                source_headers: headers.clone(),
                upstream_event_id: resource_id,
            })
            .await;
        HandlerResult::success(json!({ "delivered": true, "state": "update" }))
    }

    /// Advance the page token after downstream processing succeeded.
    pub fn advance_page_token(&self, trigger_id: &str, new_token: &str) -> Result<(), String> {
        self.state
            .advance_token(trigger_id, ResumeToken::PageToken(new_token.to_string()))
    }
}

#[async_trait]
impl TriggerHandler for DriveTriggerHandler {
    async fn schedule(&self, params: &ParamMap) -> HandlerResult {
        let flow_id = match require_flow_id(params) {
            Ok(id) => id,
            Err(e) => return HandlerResult::failure(e),
        };
        let user_id = match require_user_id(params) {
            Ok(id) => id,
            Err(e) => return HandlerResult::failure(e),
        };
        let channel_id = params
            .get("channel_id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("drive_channel_{}", Uuid::new_v4().simple()));
        let page_token = params
            .get("page_token")
            .and_then(|v| v.as_str())
            .unwrap_or("1")
            .to_string();

        let mut registration = new_registration(
            "drive",
            flow_id,
            user_id,
            json!({ "folder_id": params.get("folder_id").cloned() }),
        );
        registration.resume_token = Some(ResumeToken::PageToken(page_token.clone()));
        registration.channel = Some(PushChannelInfo {
            channel_id: channel_id.clone(),
            expires_at: Some(Utc::now() + ChronoDuration::days(7)),
            renewal_job_id: None,
        });
        let trigger_id = self.state.arm(registration);

        HandlerResult::success(json!({
            "trigger_type": "drive",
            "trigger_id": trigger_id,
            "channel_id": channel_id,
            "page_token": page_token,
        }))
    }

    async fn unschedule(&self, registration_id: &str) -> HandlerResult {
        if self.state.disarm(registration_id) {
            HandlerResult::success(json!({ "trigger_id": registration_id, "disarmed": true }))
        } else {
            HandlerResult::failure(format!("unknown registration '{}'", registration_id))
        }
    }
}

/// Polling fallback walking the changes feed with the stored page token.
pub struct DrivePollHandler {
    state: Arc<TriggerStateStore>,
    sink: Arc<dyn TriggerSink>,
    scheduler: Arc<Scheduler>,
    api_base: String,
}

impl DrivePollHandler {
    pub fn new(
        state: Arc<TriggerStateStore>,
        sink: Arc<dyn TriggerSink>,
        scheduler: Arc<Scheduler>,
    ) -> Self {
        Self {
            state,
            sink,
            scheduler,
            api_base: "https://www.googleapis.com/drive/v3".to_string(),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    /// One polling tick against the changes feed.
    pub async fn poll_once(&self, trigger_id: &str) -> TickOutcome {
        if !self.state.accepts_events(trigger_id) {
            return TickOutcome::Normal;
        }
        let registration = match self.state.get(trigger_id) {
            Some(reg) => reg,
            None => return TickOutcome::Normal,
        };
        let page_token = match self.state.resume_token(trigger_id) {
            Some(ResumeToken::PageToken(token)) => token,
            _ => "1".to_string(),
        };
        let url = format!("{}/changes?pageToken={}", self.api_base, page_token);

        let response = match shared_client().get(&url).send().await {
            Ok(response) => response,
            Err(e) => {
                log::warn!("drive poll failed for {}: {}", trigger_id, e);
                return TickOutcome::Normal;
            }
        };
        match response.status().as_u16() {
            429 => TickOutcome::Backoff,
            200 => {
                let payload: serde_json::Value = response.json().await.unwrap_or(json!({}));
                let changes = payload["changes"].as_array().cloned().unwrap_or_default();
                for change in changes.iter().take(MAX_CHANGES_PER_TICK) {
                    let change_id = change["fileId"].as_str().map(|s| s.to_string());
                    self.sink
                        .deliver(TriggerEvent {
                            trigger_type: "drive_poll".to_string(),
                            flow_id: registration.flow_id,
                            user_id: registration.user_id,
                            payload: change.clone(),
                            source_headers: Default::default(),
                            upstream_event_id: change_id,
                        })
                        .await;
                }
                let next = payload["newStartPageToken"]
                    .as_str()
                    .or_else(|| payload["nextPageToken"].as_str());
                if let Some(next) = next {
                    let _ = self
                        .state
                        .advance_token(trigger_id, ResumeToken::PageToken(next.to_string()));
                }
                TickOutcome::Normal
            }
            status => {
                log::warn!("drive poll got unexpected status {}", status);
                TickOutcome::Normal
            }
        }
    }
}

#[async_trait]
impl TriggerHandler for DrivePollHandler {
    async fn schedule(&self, params: &ParamMap) -> HandlerResult {
        let flow_id = match require_flow_id(params) {
            Ok(id) => id,
            Err(e) => return HandlerResult::failure(e),
        };
        let user_id = match require_user_id(params) {
            Ok(id) => id,
            Err(e) => return HandlerResult::failure(e),
        };
        let interval_secs = params
            .get("polling_interval")
            .and_then(|v| v.as_u64())
            .unwrap_or(300)
            .max(MIN_POLL_INTERVAL_SECS);

        let mut registration = new_registration("drive_poll", flow_id, user_id, json!({}));
        registration.resume_token = Some(ResumeToken::PageToken("1".to_string()));
        let trigger_id = self.state.arm(registration);

        let state = self.state.clone();
        let sink = self.sink.clone();
        let scheduler = self.scheduler.clone();
        let api_base = self.api_base.clone();
        let tick_id = trigger_id.clone();
        let job: JobFn = Arc::new(move || {
            let poller = DrivePollHandler {
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
            "trigger_type": "drive_poll",
            "trigger_id": trigger_id,
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

fn header(headers: &HashMap<String, String>, name: &str) -> Option<String> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.clone())
}
