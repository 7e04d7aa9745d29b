//! Trigger runtime.
//!
//! A uniform abstraction over heterogeneous event sources. Every trigger
//! type is a handler that additionally implements the capability pair
//! `{ schedule, unschedule }`; a central [`TriggerRegistry`] maps the
//! trigger type tag to that handler.
//!
//! Registrations move through a small state machine:
//!
//! ```text
//! [new] --arm--> [armed] --fire--> [armed]       (push/poll loop)
//!       |             \--renew--> [armed]        (scheduled, push only)
//!       |             \--disarm--> [disarmed]
//!       \--arm-fail--> [failed]
//! ```
//!
//! `armed` is the only state that accepts events; `disarmed` and `failed`
//! discard and log, and a `failed` registration requires an explicit
//! re-arm. Each registration's continuation state (its *resume token*) is
//! owned exclusively by the trigger handler that created it and only ever
//! advances; on a processing failure the token is left untouched so the
//! next notification or tick re-fetches the same window.

pub mod cron_trigger;
pub mod drive;
pub mod form;
pub mod github;
pub mod gmail;
pub mod push;
pub mod sheets;
pub mod slack;
pub mod webhook;

use crate::agentflow::flow::TriggerEvent;
use crate::agentflow::handler::{HandlerResult, ParamMap};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Where fired trigger events go. The workflow runner implements this in
/// production; tests plug in a channel.
#[async_trait]
pub trait TriggerSink: Send + Sync {
    async fn deliver(&self, event: TriggerEvent);
}

/// The capability pair every trigger type implements on top of being an
/// ordinary handler.
#[async_trait]
pub trait TriggerHandler: Send + Sync {
    /// Arm the source for a flow. On success the output carries the
    /// registration id and type-specific arming details.
    async fn schedule(&self, params: &ParamMap) -> HandlerResult;

    /// Disarm a registration.
    async fn unschedule(&self, registration_id: &str) -> HandlerResult;
}

/// Central mapping of `trigger_type_tag → handler`.
pub struct TriggerRegistry {
    handlers: Mutex<HashMap<String, Arc<dyn TriggerHandler>>>,
}

impl TriggerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(&self, trigger_type: &str, handler: Arc<dyn TriggerHandler>) {
        log::info!("registered trigger handler: {}", trigger_type);
        self.handlers
            .lock()
            .unwrap()
            .insert(trigger_type.to_string(), handler);
    }

    pub fn get(&self, trigger_type: &str) -> Option<Arc<dyn TriggerHandler>> {
        self.handlers.lock().unwrap().get(trigger_type).cloned()
    }

    pub fn trigger_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.lock().unwrap().keys().cloned().collect();
        types.sort();
        types
    }

    /// Arm via the registered handler; unknown types produce an error
    /// result rather than a panic.
    pub async fn schedule_trigger(&self, trigger_type: &str, params: &ParamMap) -> HandlerResult {
        match self.get(trigger_type) {
            Some(handler) => handler.schedule(params).await,
            None => HandlerResult::failure(format!(
                "no handler registered for trigger type: {}",
                trigger_type
            )),
        }
    }

    pub async fn unschedule_trigger(
        &self,
        trigger_type: &str,
        registration_id: &str,
    ) -> HandlerResult {
        match self.get(trigger_type) {
            Some(handler) => handler.unschedule(registration_id).await,
            None => HandlerResult::failure(format!(
                "no handler registered for trigger type: {}",
                trigger_type
            )),
        }
    }
}

impl Default for TriggerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Lifecycle of a trigger registration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TriggerLifecycle {
    New,
    Armed,
    Disarmed,
    Failed,
}

/// Per-registration continuation token. Numeric shapes are compared on
/// advance; opaque shapes (page tokens, ETags, content hashes) replace,
/// with "monotonic" meaning advanced-only-after-success.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ResumeToken {
    PageToken(String),
    HistoryId(u64),
    Etag(String),
    LastTs(f64),
    ContentHash(String),
}

/// Push-channel bookkeeping shared by all push integrations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushChannelInfo {
    pub channel_id: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub renewal_job_id: Option<String>,
}

/// A trigger registration record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerRegistration {
    pub trigger_id: String,
    pub flow_id: Uuid,
    pub user_id: i64,
    pub trigger_type: String,
    pub args: serde_json::Value,
    pub lifecycle: TriggerLifecycle,
    pub resume_token: Option<ResumeToken>,
    pub channel: Option<PushChannelInfo>,
}

/// Authoritative registration table. All mutation goes through this store
/// under its lock, which serializes concurrent firings for the same
/// registration on the token update.
pub struct TriggerStateStore {
    registrations: Mutex<HashMap<String, TriggerRegistration>>,
}

impl TriggerStateStore {
    pub fn new() -> Self {
        Self {
            registrations: Mutex::new(HashMap::new()),
        }
    }

    /// Insert a new registration in the `armed` state and return its id.
    pub fn arm(&self, mut registration: TriggerRegistration) -> String {
        registration.lifecycle = TriggerLifecycle::Armed;
        let id = registration.trigger_id.clone();
        self.registrations
            .lock()
            .unwrap()
            .insert(id.clone(), registration);
        id
    }

    /// Record a failed arming attempt.
    pub fn mark_failed(&self, trigger_id: &str) {
        if let Some(reg) = self.registrations.lock().unwrap().get_mut(trigger_id) {
            reg.lifecycle = TriggerLifecycle::Failed;
        }
    }

    /// Move a registration to `disarmed`; it stays queryable but stops
    /// accepting events.
    pub fn disarm(&self, trigger_id: &str) -> bool {
        match self.registrations.lock().unwrap().get_mut(trigger_id) {
            Some(reg) => {
                reg.lifecycle = TriggerLifecycle::Disarmed;
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, trigger_id: &str) -> Option<TriggerRegistration> {
        self.registrations.lock().unwrap().remove(trigger_id)
    }

    pub fn get(&self, trigger_id: &str) -> Option<TriggerRegistration> {
        self.registrations.lock().unwrap().get(trigger_id).cloned()
    }

    /// True when the registration exists and is armed. Events for
    /// anything else are discarded (and the discard is logged).
    pub fn accepts_events(&self, trigger_id: &str) -> bool {
        match self.get(trigger_id) {
            Some(reg) if reg.lifecycle == TriggerLifecycle::Armed => true,
            Some(reg) => {
                log::info!(
                    "discarding event for {} registration {}",
                    match reg.lifecycle {
                        TriggerLifecycle::Disarmed => "disarmed",
                        TriggerLifecycle::Failed => "failed",
                        _ => "unarmed",
                    },
                    trigger_id
                );
                false
            }
            None => {
                log::info!("discarding event for unknown registration {}", trigger_id);
                false
            }
        }
    }

    /// Advance the resume token after successful processing. Numeric
    /// tokens must not move backwards; a stale advance is rejected so the
    /// caller's retry re-processes the same window.
    pub fn advance_token(&self, trigger_id: &str, token: ResumeToken) -> Result<(), String> {
        let mut registrations = self.registrations.lock().unwrap();
        let reg = registrations
            .get_mut(trigger_id)
            .ok_or_else(|| format!("unknown registration: {}", trigger_id))?;
        if let Some(existing) = &reg.resume_token {
            let regressed = match (existing, &token) {
                (ResumeToken::HistoryId(old), ResumeToken::HistoryId(new)) => new < old,
                (ResumeToken::LastTs(old), ResumeToken::LastTs(new)) => new < old,
                _ => false,
            };
            if regressed {
                return Err(format!(
                    "refusing to move resume token backwards for {}",
                    trigger_id
                ));
            }
        }
        reg.resume_token = Some(token);
        Ok(())
    }

    pub fn resume_token(&self, trigger_id: &str) -> Option<ResumeToken> {
        self.get(trigger_id).and_then(|r| r.resume_token)
    }

    /// Registrations of one type, for polling/renewal loops.
    pub fn by_type(&self, trigger_type: &str) -> Vec<TriggerRegistration> {
        self.registrations
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.trigger_type == trigger_type)
            .cloned()
            .collect()
    }
}

impl Default for TriggerStateStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Helper building a blank registration for a flow.
pub fn new_registration(
    trigger_type: &str,
    flow_id: Uuid,
    user_id: i64,
    args: serde_json::Value,
) -> TriggerRegistration {
    TriggerRegistration {
        trigger_id: Uuid::new_v4().to_string(),
        flow_id,
        user_id,
        trigger_type: trigger_type.to_string(),
        args,
        lifecycle: TriggerLifecycle::New,
        resume_token: None,
        channel: None,
    }
}
