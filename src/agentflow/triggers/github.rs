//! GitHub triggers: webhook push (preferred) and a polling fallback.
//!
//! Push deliveries are verified against `X-Hub-Signature-256`
//! (`sha256=<hex(hmac(secret, body))>`) before anything else happens; the
//! delivery id (`X-GitHub-Delivery`) rides along as the upstream event id
//! so downstream steps can deduplicate redeliveries.
//!
//! The polling fallback respects GitHub's conditional-request protocol:
//! ticks send `If-None-Match` with the stored ETag, treat 304 as "no
//! changes", cap processing at five events per tick, and back off for one
//! cycle when throttled.

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
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

/// Minimum polling interval, per GitHub's API guidance.
pub const MIN_POLL_INTERVAL_SECS: u64 = 300;
/// Hard cap on events processed per polling tick.
pub const MAX_EVENTS_PER_TICK: usize = 5;

/// Verify a GitHub webhook signature header against the raw body.
pub fn verify_github_signature(secret: &str, body: &[u8], signature_header: &str) -> bool {
    let provided = match signature_header.strip_prefix("sha256=") {
        Some(hex_part) => hex_part,
        None => return false,
    };
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(body);
    let expected = hex::encode(mac.finalize().into_bytes());
    constant_time_str_eq(&expected, provided)
}

/// Push-notification trigger: GitHub webhooks aimed at our endpoint.
pub struct GithubTriggerHandler {
    state: Arc<TriggerStateStore>,
    sink: Arc<dyn TriggerSink>,
    public_base_url: String,
}

impl GithubTriggerHandler {
    pub fn new(
        state: Arc<TriggerStateStore>,
        sink: Arc<dyn TriggerSink>,
        public_base_url: impl Into<String>,
    ) -> Self {
        Self {
            state,
            sink,
            public_base_url: public_base_url.into(),
        }
    }

    /// Handle an incoming delivery on `/push/github/{trigger_id}`.
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

        let secret = registration.args["secret"].as_str().unwrap_or_default();
        let signature = header(headers, "x-hub-signature-256").unwrap_or_default();
        if !verify_github_signature(secret, body, &signature) {
            log::warn!("github signature verification failed for {}", trigger_id);
            return HandlerResult::failure("invalid signature");
        }

        let event_kind = header(headers, "x-github-event").unwrap_or_else(|| "push".to_string());
        let delivery_id = header(headers, "x-github-delivery");
        let payload: serde_json::Value = serde_json::from_slice(body).unwrap_or(json!({}));

        self.sink
            .deliver(TriggerEvent {
                trigger_type: "github".to_string(),
                flow_id: registration.flow_id,
                user_id: registration.user_id,
                payload: json!({ "event": event_kind, "payload": payload }),
                source_headers: headers.clone(),
                upstream_event_id: delivery_id,
            })
            .await;
        HandlerResult::success(json!({ "delivered": true, "event": event_kind }))
    }
}

#[async_trait]
impl TriggerHandler for GithubTriggerHandler {
    async fn schedule(&self, params: &ParamMap) -> HandlerResult {
        let flow_id = match require_flow_id(params) {
            Ok(id) => id,
            Err(e) => return HandlerResult::failure(e),
        };
        let user_id = match require_user_id(params) {
            Ok(id) => id,
            Err(e) => return HandlerResult::failure(e),
        };
        let repo = match require_str(params, "repo") {
            Ok(repo) => repo.to_string(),
            Err(e) => return HandlerResult::failure(e),
        };
        let secret = match require_str(params, "secret") {
            Ok(secret) => secret.to_string(),
            Err(e) => return HandlerResult::failure(e),
        };

        let registration = new_registration(
            "github",
            flow_id,
            user_id,
            json!({ "repo": repo, "secret": secret }),
        );
        let trigger_id = self.state.arm(registration);
        let callback_url = format!(
            "{}/push/github/{}",
            self.public_base_url.trim_end_matches('/'),
            trigger_id
        );

        HandlerResult::success(json!({
            "trigger_type": "github",
            "trigger_id": trigger_id,
            "repo": repo,
            "callback_url": callback_url,
            "content_type": "json",
            "events": params.get("events").cloned().unwrap_or(json!(["push"])),
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

/// Polling fallback for environments where webhooks are not possible.
pub struct GithubPollHandler {
    state: Arc<TriggerStateStore>,
    sink: Arc<dyn TriggerSink>,
    scheduler: Arc<Scheduler>,
    api_base: String,
}

impl GithubPollHandler {
    pub fn new(
        state: Arc<TriggerStateStore>,
        sink: Arc<dyn TriggerSink>,
        scheduler: Arc<Scheduler>,
    ) -> Self {
        Self {
            state,
            sink,
            scheduler,
            api_base: "https://api.github.com".to_string(),
        }
    }

    /// Point the poller at a different API base (proxies, test fixtures).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    /// One polling tick: conditional fetch, bounded fan-out, ETag advance.
    pub async fn poll_once(&self, trigger_id: &str) -> TickOutcome {
        if !self.state.accepts_events(trigger_id) {
            return TickOutcome::Normal;
        }
        let registration = match self.state.get(trigger_id) {
            Some(reg) => reg,
            None => return TickOutcome::Normal,
        };
        let repo = registration.args["repo"].as_str().unwrap_or_default().to_string();
        let url = format!("{}/repos/{}/events", self.api_base, repo);

        let mut request = shared_client()
            .get(&url)
            .header("User-Agent", "agentflow");
        if let Some(ResumeToken::Etag(etag)) = self.state.resume_token(trigger_id) {
            if !etag.is_empty() {
                request = request.header("If-None-Match", etag);
            }
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                // Leave the token untouched; the next tick retries the
                // same window.
                log::warn!("github poll failed for {}: {}", trigger_id, e);
                return TickOutcome::Normal;
            }
        };

        match response.status().as_u16() {
            304 => TickOutcome::Normal,
            429 => {
                log::warn!("github rate limited; backing off one cycle");
                TickOutcome::Backoff
            }
            200 => {
                let new_etag = response
                    .headers()
                    .get("etag")
                    .and_then(|v| v.to_str().ok())
                    .map(|s| s.to_string());
                let events: Vec<serde_json::Value> = response.json().await.unwrap_or_default();
                for event in events.iter().take(MAX_EVENTS_PER_TICK) {
                    let event_id = event["id"].as_str().map(|s| s.to_string());
                    self.sink
                        .deliver(TriggerEvent {
                            trigger_type: "github_poll".to_string(),
                            flow_id: registration.flow_id,
                            user_id: registration.user_id,
                            payload: event.clone(),
                            source_headers: Default::default(),
                            upstream_event_id: event_id,
                        })
                        .await;
                }
                if let Some(etag) = new_etag {
                    let _ = self.state.advance_token(trigger_id, ResumeToken::Etag(etag));
                }
                TickOutcome::Normal
            }
            status => {
                log::warn!("github poll got unexpected status {}", status);
                TickOutcome::Normal
            }
        }
    }
}

#[async_trait]
impl TriggerHandler for GithubPollHandler {
    async fn schedule(&self, params: &ParamMap) -> HandlerResult {
        let flow_id = match require_flow_id(params) {
            Ok(id) => id,
            Err(e) => return HandlerResult::failure(e),
        };
        let user_id = match require_user_id(params) {
            Ok(id) => id,
            Err(e) => return HandlerResult::failure(e),
        };
        let repo = match require_str(params, "repo") {
            Ok(repo) => repo.to_string(),
            Err(e) => return HandlerResult::failure(e),
        };
        let interval_secs = params
            .get("polling_interval")
            .and_then(|v| v.as_u64())
            .unwrap_or(MIN_POLL_INTERVAL_SECS)
            .max(MIN_POLL_INTERVAL_SECS);

        let mut registration =
            new_registration("github_poll", flow_id, user_id, json!({ "repo": repo }));
        registration.resume_token = Some(ResumeToken::Etag(String::new()));
        let trigger_id = self.state.arm(registration);

        let poller = GithubPollHandler {
            state: self.state.clone(),
            sink: self.sink.clone(),
            scheduler: self.scheduler.clone(),
            api_base: self.api_base.clone(),
        };
        let tick_id = trigger_id.clone();
        let job: JobFn = Arc::new(move || {
            let poller = GithubPollHandler {
                state: poller.state.clone(),
                sink: poller.sink.clone(),
                scheduler: poller.scheduler.clone(),
                api_base: poller.api_base.clone(),
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
            "trigger_type": "github_poll",
            "trigger_id": trigger_id,
            "repo": repo,
            "polling_interval": interval_secs,
            "max_events_per_tick": MAX_EVENTS_PER_TICK,
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
