//! Slack triggers: Events API push and a rate-limit-respecting poll.
//!
//! Event deliveries are authenticated with Slack's v0 signing scheme:
//! `v0=hex(hmac(secret, "v0:{timestamp}:{body}"))`, with the timestamp
//! required to be within five minutes of wall clock. URL-verification
//! challenges are answered without touching the flow.
//!
//! The resume token is the timestamp of the newest processed message; it
//! only moves forward, so replayed or out-of-order deliveries inside an
//! already-processed window are dropped.

use crate::agentflow::flow::TriggerEvent;
use crate::agentflow::handler::{HandlerResult, ParamMap};
use crate::agentflow::http_pool::shared_client;
use crate::agentflow::scheduler::{JobFn, JobSchedule, Scheduler, TickOutcome};
use crate::agentflow::triggers::push::{require_flow_id, require_str, require_user_id};
use crate::agentflow::triggers::webhook::constant_time_str_eq;
use crate::agentflow::triggers::{
    new_registration, ResumeToken, TriggerHandler, TriggerSink, TriggerStateStore,
};
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of the request timestamp, in seconds.
const TIMESTAMP_WINDOW_SECS: i64 = 300;
/// Minimum polling interval; Slack's 2025 rate limits are unforgiving.
pub const MIN_POLL_INTERVAL_SECS: u64 = 120;
/// Hard cap on messages processed per polling tick.
pub const MAX_MESSAGES_PER_TICK: usize = 5;

/// Verify Slack's v0 request signature.
pub fn verify_slack_signature(
    signing_secret: &str,
    timestamp_header: &str,
    signature_header: &str,
    body: &[u8],
    now_epoch: i64,
) -> bool {
    let timestamp: i64 = match timestamp_header.parse() {
        Ok(ts) => ts,
        Err(_) => return false,
    };
    if (now_epoch - timestamp).abs() > TIMESTAMP_WINDOW_SECS {
        return false;
    }
    let mut mac = match HmacSha256::new_from_slice(signing_secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(format!("v0:{}:", timestamp).as_bytes());
    mac.update(body);
    let expected = format!("v0={}", hex::encode(mac.finalize().into_bytes()));
    constant_time_str_eq(&expected, signature_header)
}

pub struct SlackTriggerHandler {
    state: Arc<TriggerStateStore>,
    sink: Arc<dyn TriggerSink>,
}

impl SlackTriggerHandler {
    pub fn new(state: Arc<TriggerStateStore>, sink: Arc<dyn TriggerSink>) -> Self {
        Self { state, sink }
    }

    /// Handle an Events API delivery on `/push/slack/{trigger_id}`.
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

        let signing_secret = registration.args["signing_secret"]
            .as_str()
            .unwrap_or_default();
        let timestamp = header(headers, "x-slack-request-timestamp").unwrap_or_default();
        let signature = header(headers, "x-slack-signature").unwrap_or_default();
        if !verify_slack_signature(
            signing_secret,
            &timestamp,
            &signature,
            body,
            Utc::now().timestamp(),
        ) {
            log::warn!("slack signature verification failed for {}", trigger_id);
            return HandlerResult::failure("invalid signature");
        }

        let payload: serde_json::Value = serde_json::from_slice(body).unwrap_or(json!({}));

        // URL verification handshake: echo the challenge, no flow run.
        if payload["type"] == "url_verification" {
            return HandlerResult::success(json!({
                "challenge": payload["challenge"],
                "delivered": false,
            }));
        }

        let event_ts: f64 = payload["event"]["ts"]
            .as_str()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0.0);
        let last_ts = match self.state.resume_token(trigger_id) {
            Some(ResumeToken::LastTs(ts)) => ts,
            _ => 0.0,
        };
        if event_ts > 0.0 && event_ts <= last_ts {
            return HandlerResult::success(json!({ "delivered": false, "duplicate": true }));
        }

        let event_id = payload["event_id"].as_str().map(|s| s.to_string());
        self.sink
            .deliver(TriggerEvent {
                trigger_type: "slack".to_string(),
                flow_id: registration.flow_id,
                user_id: registration.user_id,
                payload: payload["event"].clone(),
                source_headers: headers.clone(),
                upstream_event_id: event_id,
            })
            .await;

        if event_ts > 0.0 {
            let _ = self
                .state
                .advance_token(trigger_id, ResumeToken::LastTs(event_ts));
        }
        HandlerResult::success(json!({ "delivered": true, "event_ts": event_ts }))
    }
}

#[async_trait]
impl TriggerHandler for SlackTriggerHandler {
    async fn schedule(&self, params: &ParamMap) -> HandlerResult {
        let flow_id = match require_flow_id(params) {
            Ok(id) => id,
            Err(e) => return HandlerResult::failure(e),
        };
        let user_id = match require_user_id(params) {
            Ok(id) => id,
            Err(e) => return HandlerResult::failure(e),
        };
        let signing_secret = match require_str(params, "signing_secret") {
            Ok(secret) => secret.to_string(),
            Err(_) => {
                return HandlerResult::failure(
                    "'signing_secret' is required to validate Slack requests",
                )
            }
        };
        let channel = params
            .get("channel_id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        let mut registration = new_registration(
            "slack",
            flow_id,
            user_id,
            json!({ "signing_secret": signing_secret, "channel_id": channel }),
        );
        registration.resume_token = Some(ResumeToken::LastTs(0.0));
        let trigger_id = self.state.arm(registration);

        HandlerResult::success(json!({
            "trigger_type": "slack",
            "trigger_id": trigger_id,
            "events_endpoint": format!("/push/slack/{}", trigger_id),
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

/// Polling fallback over `conversations.history`.
pub struct SlackPollHandler {
    state: Arc<TriggerStateStore>,
    sink: Arc<dyn TriggerSink>,
    scheduler: Arc<Scheduler>,
    api_base: String,
}

impl SlackPollHandler {
    pub fn new(
        state: Arc<TriggerStateStore>,
        sink: Arc<dyn TriggerSink>,
        scheduler: Arc<Scheduler>,
    ) -> Self {
        Self {
            state,
            sink,
            scheduler,
            api_base: "https://slack.com/api".to_string(),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    /// One polling tick: fetch messages newer than the stored ts.
    pub async fn poll_once(&self, trigger_id: &str) -> TickOutcome {
        if !self.state.accepts_events(trigger_id) {
            return TickOutcome::Normal;
        }
        let registration = match self.state.get(trigger_id) {
            Some(reg) => reg,
            None => return TickOutcome::Normal,
        };
        let channel = registration.args["channel_id"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        let last_ts = match self.state.resume_token(trigger_id) {
            Some(ResumeToken::LastTs(ts)) => ts,
            _ => 0.0,
        };
        let url = format!(
            "{}/conversations.history?channel={}&oldest={}",
            self.api_base, channel, last_ts
        );

        let response = match shared_client().get(&url).send().await {
            Ok(response) => response,
            Err(e) => {
                log::warn!("slack poll failed for {}: {}", trigger_id, e);
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
        let messages = payload["messages"].as_array().cloned().unwrap_or_default();
        let mut newest = last_ts;
        for message in messages.iter().take(MAX_MESSAGES_PER_TICK) {
            let ts: f64 = message["ts"]
                .as_str()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0.0);
            if ts <= last_ts {
                continue;
            }
            self.sink
                .deliver(TriggerEvent {
                    trigger_type: "slack_poll".to_string(),
                    flow_id: registration.flow_id,
                    user_id: registration.user_id,
                    payload: message.clone(),
                    source_headers: Default::default(),
                    upstream_event_id: message["ts"].as_str().map(|s| s.to_string()),
                })
                .await;
            if ts > newest {
                newest = ts;
            }
        }
        if newest > last_ts {
            let _ = self
                .state
                .advance_token(trigger_id, ResumeToken::LastTs(newest));
        }
        TickOutcome::Normal
    }
}

#[async_trait]
impl TriggerHandler for SlackPollHandler {
    async fn schedule(&self, params: &ParamMap) -> HandlerResult {
        let flow_id = match require_flow_id(params) {
            Ok(id) => id,
            Err(e) => return HandlerResult::failure(e),
        };
        let user_id = match require_user_id(params) {
            Ok(id) => id,
            Err(e) => return HandlerResult::failure(e),
        };
        let channel = match require_str(params, "channel_id") {
            Ok(channel) => channel.to_string(),
            Err(e) => return HandlerResult::failure(e),
        };
        let interval_secs = params
            .get("polling_interval")
            .and_then(|v| v.as_u64())
            .unwrap_or(MIN_POLL_INTERVAL_SECS);
        if interval_secs < MIN_POLL_INTERVAL_SECS {
            return HandlerResult::failure(format!(
                "minimum polling interval is {} seconds",
                MIN_POLL_INTERVAL_SECS
            ));
        }

        let mut registration = new_registration(
            "slack_poll",
            flow_id,
            user_id,
            json!({ "channel_id": channel }),
        );
        registration.resume_token = Some(ResumeToken::LastTs(0.0));
        let trigger_id = self.state.arm(registration);

        let state = self.state.clone();
        let sink = self.sink.clone();
        let scheduler = self.scheduler.clone();
        let api_base = self.api_base.clone();
        let tick_id = trigger_id.clone();
        let job: JobFn = Arc::new(move || {
            let poller = SlackPollHandler {
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
            "trigger_type": "slack_poll",
            "trigger_id": trigger_id,
            "channel_id": channel,
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

fn header(headers: &HashMap<String, String>, name: &str) -> Option<String> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, timestamp: i64, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("v0:{}:", timestamp).as_bytes());
        mac.update(body);
        format!("v0={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn test_signature_round_trip() {
        let body = br#"{"type":"event_callback"}"#;
        let now = 1_750_000_000i64;
        let signature = sign("slack-secret", now, body);

        assert!(verify_slack_signature(
            "slack-secret",
            &now.to_string(),
            &signature,
            body,
            now
        ));
        assert!(!verify_slack_signature(
            "other-secret",
            &now.to_string(),
            &signature,
            body,
            now
        ));
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let body = b"{}";
        let then = 1_750_000_000i64;
        let signature = sign("slack-secret", then, body);
        // Five minutes and change later.
        assert!(!verify_slack_signature(
            "slack-secret",
            &then.to_string(),
            &signature,
            body,
            then + TIMESTAMP_WINDOW_SECS + 1
        ));
    }
}
