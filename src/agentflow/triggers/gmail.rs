//! Gmail triggers: Pub/Sub push notifications and a polling fallback.
//!
//! Arming configures a Gmail watch on a Cloud Pub/Sub topic. Watches
//! expire after seven days, so a renewal job is scheduled at 6/7 of the
//! interval (day six); renewal reuses the same channel id so the endpoint
//! binding stays stable.
//!
//! A push delivery's body is a Pub/Sub envelope whose `message.data` is
//! base64-encoded JSON `{ emailAddress, historyId }`. The stored history
//! id is the resume token: notifications at or below it are duplicates of
//! an already-processed window and are ignored; the token only advances
//! after the event is delivered downstream.

use crate::agentflow::flow::TriggerEvent;
use crate::agentflow::handler::{HandlerResult, ParamMap};
use crate::agentflow::scheduler::{JobFn, JobSchedule, Scheduler, TickOutcome};
use crate::agentflow::triggers::push::{
    base64_decode, renewal_delay, renewal_job_id, require_flow_id, require_str, require_user_id,
};
use crate::agentflow::triggers::{
    new_registration, PushChannelInfo, ResumeToken, TriggerHandler, TriggerSink, TriggerStateStore,
};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Gmail watches live for seven days.
pub const WATCH_EXPIRY: Duration = Duration::from_secs(7 * 24 * 3600);
/// Hard cap on messages processed per polling tick.
pub const MAX_MESSAGES_PER_TICK: usize = 10;
/// Minimum polling interval for the fallback.
pub const MIN_POLL_INTERVAL_SECS: u64 = 60;

/// Decoded Pub/Sub notification content.
#[derive(Debug, Clone, PartialEq)]
pub struct GmailNotification {
    pub email_address: String,
    pub history_id: u64,
}

/// Decode a Pub/Sub envelope into the Gmail notification it carries.
pub fn decode_pubsub_envelope(body: &[u8]) -> Result<GmailNotification, String> {
    let envelope: serde_json::Value =
        serde_json::from_slice(body).map_err(|e| format!("invalid envelope JSON: {}", e))?;
    let data = envelope["message"]["data"]
        .as_str()
        .ok_or_else(|| "envelope has no message.data".to_string())?;
    let decoded = base64_decode(data)?;
    let inner: serde_json::Value =
        serde_json::from_slice(&decoded).map_err(|e| format!("invalid notification JSON: {}", e))?;
    let email_address = inner["emailAddress"]
        .as_str()
        .ok_or_else(|| "notification has no emailAddress".to_string())?
        .to_string();
    // historyId arrives as either a JSON number or a decimal string.
    let history_id = match &inner["historyId"] {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => s.parse::<u64>().ok(),
        _ => None,
    }
    .ok_or_else(|| "notification has no historyId".to_string())?;
    Ok(GmailNotification {
        email_address,
        history_id,
    })
}

pub struct GmailTriggerHandler {
    state: Arc<TriggerStateStore>,
    sink: Arc<dyn TriggerSink>,
    scheduler: Arc<Scheduler>,
}

impl GmailTriggerHandler {
    pub fn new(
        state: Arc<TriggerStateStore>,
        sink: Arc<dyn TriggerSink>,
        scheduler: Arc<Scheduler>,
    ) -> Self {
        Self {
            state,
            sink,
            scheduler,
        }
    }

    /// Handle a Pub/Sub delivery on `/push/gmail/{trigger_id}`.
    pub async fn receive(
        &self,
        trigger_id: &str,
        headers: &HashMap<String, String>,
        body: &[u8],
    ) -> HandlerResult {
        if !self.state.accepts_events(trigger_id) {
            return HandlerResult::failure("registration is not armed");
        }
        let registration = match self.state.get(trigger_id) {
            Some(reg) => reg,
            None => return HandlerResult::failure("unknown registration"),
        };

        let notification = match decode_pubsub_envelope(body) {
            Ok(notification) => notification,
            Err(e) => {
                log::warn!("undecodable gmail notification for {}: {}", trigger_id, e);
                return HandlerResult::failure(e);
            }
        };

        let previous = match self.state.resume_token(trigger_id) {
            Some(ResumeToken::HistoryId(id)) => id,
            _ => 0,
        };
        if notification.history_id <= previous {
            // Already inside a processed window; at-least-once delivery
            // makes these harmless.
            return HandlerResult::success(json!({ "delivered": false, "duplicate": true }));
        }

        let envelope: serde_json::Value = serde_json::from_slice(body).unwrap_or(json!({}));
        let message_id = envelope["message"]["messageId"]
            .as_str()
            .map(|s| s.to_string());

        self.sink
            .deliver(TriggerEvent {
                trigger_type: "gmail".to_string(),
                flow_id: registration.flow_id,
                user_id: registration.user_id,
                payload: json!({
                    "email_address": notification.email_address,
                    "history_id": notification.history_id,
                    "previous_history_id": previous,
                }),
                source_headers: headers.clone(),
                upstream_event_id: message_id,
            })
            .await;

        // Advance only after successful delivery; a failure above leaves
        // the token untouched so the next notification re-fetches the
        // same window.
        if let Err(e) = self
            .state
            .advance_token(trigger_id, ResumeToken::HistoryId(notification.history_id))
        {
            log::warn!("gmail token advance refused: {}", e);
        }
        HandlerResult::success(json!({
            "delivered": true,
            "history_id": notification.history_id,
        }))
    }

    /// Re-arm the watch before it expires. Keeps the same channel id.
    pub fn renew(&self, trigger_id: &str) {
        let mut registrations_updated = false;
        if let Some(mut registration) = self.state.get(trigger_id) {
            if let Some(channel) = registration.channel.as_mut() {
                channel.expires_at = Some(Utc::now() + ChronoDuration::days(7));
                registrations_updated = true;
            }
            if registrations_updated {
                // Re-arm with the refreshed expiry; lifecycle stays armed.
                self.state.arm(registration);
                log::info!("renewed gmail watch for {}", trigger_id);
            }
        }
    }
}

#[async_trait]
impl TriggerHandler for GmailTriggerHandler {
    async fn schedule(&self, params: &ParamMap) -> HandlerResult {
        let flow_id = match require_flow_id(params) {
            Ok(id) => id,
            Err(e) => return HandlerResult::failure(e),
        };
        let user_id = match require_user_id(params) {
            Ok(id) => id,
            Err(e) => return HandlerResult::failure(e),
        };
        let topic_name = match require_str(params, "topic_name") {
            Ok(topic) => topic.to_string(),
            Err(_) => {
                return HandlerResult::failure(
                    "'topic_name' is required for Gmail push notifications",
                )
            }
        };
        let start_history_id = params
            .get("history_id")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);

        let channel_id = format!("gmail_channel_{}", flow_id.simple());
        let mut registration = new_registration(
            "gmail",
            flow_id,
            user_id,
            json!({ "topic_name": topic_name }),
        );
        registration.resume_token = Some(ResumeToken::HistoryId(start_history_id));
        registration.channel = Some(PushChannelInfo {
            channel_id: channel_id.clone(),
            expires_at: Some(Utc::now() + ChronoDuration::days(7)),
            renewal_job_id: Some(renewal_job_id("gmail", flow_id)),
        });
        let trigger_id = self.state.arm(registration);

        // Renewal fires on day six of the seven-day watch and keeps
        // firing every six days for as long as the registration lives.
        let renewal_id = renewal_job_id("gmail", flow_id);
        let renew_state = self.state.clone();
        let renew_sink = self.sink.clone();
        let renew_scheduler = self.scheduler.clone();
        let renew_trigger_id = trigger_id.clone();
        let job: JobFn = Arc::new(move || {
            let handler = GmailTriggerHandler {
                state: renew_state.clone(),
                sink: renew_sink.clone(),
                scheduler: renew_scheduler.clone(),
            };
            let trigger_id = renew_trigger_id.clone();
            Box::pin(async move {
                handler.renew(&trigger_id);
                TickOutcome::Normal
            })
        });
        self.scheduler.schedule_job(
            &renewal_id,
            JobSchedule::Interval(renewal_delay(WATCH_EXPIRY)),
            job,
        );

        HandlerResult::success(json!({
            "trigger_type": "gmail",
            "trigger_id": trigger_id,
            "channel_id": channel_id,
            "topic_name": topic_name,
            "history_id": start_history_id,
            "renewal_job_id": renewal_id,
            "expires_in_days": 7,
        }))
    }

    async fn unschedule(&self, registration_id: &str) -> HandlerResult {
        if let Some(registration) = self.state.get(registration_id) {
            if let Some(channel) = &registration.channel {
                if let Some(job_id) = &channel.renewal_job_id {
                    self.scheduler.unschedule_job(job_id);
                }
            }
        }
        if self.state.disarm(registration_id) {
            HandlerResult::success(json!({ "trigger_id": registration_id, "disarmed": true }))
        } else {
            HandlerResult::failure(format!("unknown registration '{}'", registration_id))
        }
    }
}

/// Polling fallback walking the history feed from the stored history id.
pub struct GmailPollHandler {
    state: Arc<TriggerStateStore>,
    sink: Arc<dyn TriggerSink>,
    scheduler: Arc<Scheduler>,
    api_base: String,
}

impl GmailPollHandler {
    pub fn new(
        state: Arc<TriggerStateStore>,
        sink: Arc<dyn TriggerSink>,
        scheduler: Arc<Scheduler>,
    ) -> Self {
        Self {
            state,
            sink,
            scheduler,
            api_base: "https://gmail.googleapis.com/gmail/v1/users/me".to_string(),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    /// One polling tick against the history feed.
    pub async fn poll_once(&self, trigger_id: &str) -> TickOutcome {
        if !self.state.accepts_events(trigger_id) {
            return TickOutcome::Normal;
        }
        let registration = match self.state.get(trigger_id) {
            Some(reg) => reg,
            None => return TickOutcome::Normal,
        };
        let start = match self.state.resume_token(trigger_id) {
            Some(ResumeToken::HistoryId(id)) => id,
            _ => 0,
        };
        let url = format!("{}/history?startHistoryId={}", self.api_base, start);

        let response = match crate::agentflow::http_pool::shared_client().get(&url).send().await {
            Ok(response) => response,
            Err(e) => {
                log::warn!("gmail poll failed for {}: {}", trigger_id, e);
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
        let records = payload["history"].as_array().cloned().unwrap_or_default();
        for record in records.iter().take(MAX_MESSAGES_PER_TICK) {
            let message_id = record["messages"][0]["id"].as_str().map(|s| s.to_string());
            self.sink
                .deliver(TriggerEvent {
                    trigger_type: "gmail_poll".to_string(),
                    flow_id: registration.flow_id,
                    user_id: registration.user_id,
                    payload: record.clone(),
                    source_headers: Default::default(),
                    upstream_event_id: message_id,
                })
                .await;
        }
        let latest = match &payload["historyId"] {
            serde_json::Value::Number(n) => n.as_u64(),
            serde_json::Value::String(s) => s.parse::<u64>().ok(),
            _ => None,
        };
        if let Some(latest) = latest {
            if latest > start {
                let _ = self
                    .state
                    .advance_token(trigger_id, ResumeToken::HistoryId(latest));
            }
        }
        TickOutcome::Normal
    }
}

#[async_trait]
impl TriggerHandler for GmailPollHandler {
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

        let mut registration = new_registration("gmail_poll", flow_id, user_id, json!({}));
        registration.resume_token = Some(ResumeToken::HistoryId(
            params.get("history_id").and_then(|v| v.as_u64()).unwrap_or(0),
        ));
        let trigger_id = self.state.arm(registration);

        let state = self.state.clone();
        let sink = self.sink.clone();
        let scheduler = self.scheduler.clone();
        let api_base = self.api_base.clone();
        let tick_id = trigger_id.clone();
        let job: JobFn = Arc::new(move || {
            let poller = GmailPollHandler {
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
            "trigger_type": "gmail_poll",
            "trigger_id": trigger_id,
            "polling_interval": interval_secs,
            "max_messages_per_tick": MAX_MESSAGES_PER_TICK,
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
