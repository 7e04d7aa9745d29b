//! Generic webhook triggers.
//!
//! Arming a webhook allocates a 128-bit URL-safe token which becomes the
//! sole routing key: `{base}/webhooks/{token}` for production and
//! `{base}/webhooks-test/{token}` for test deliveries. The token→route
//! table is updated atomically under one lock.
//!
//! Request handling order matters: the optional auth check runs first,
//! the raw event is persisted to the append-only event log *before* any
//! user code runs, and only then is the flow scheduled. In `immediate`
//! mode the caller gets `{"status":"received"}` right away and the flow
//! runs in the background; in `delayed` mode the flow runs synchronously
//! with a 30-second cap, and an overrun converts the response back to
//! immediate semantics.
//!
//! Signature comparisons go through SHA-256 digests compared with
//! `subtle::ConstantTimeEq`, so the optimizer cannot short-circuit the
//! comparison the way it can with `==`.

use crate::agentflow::flow::TriggerEvent;
use crate::agentflow::handler::{HandlerResult, ParamMap};
use crate::agentflow::triggers::form::FormProvider;
use crate::agentflow::triggers::{TriggerHandler, TriggerSink};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use subtle::ConstantTimeEq;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of an HMAC timestamp, in seconds.
const HMAC_TIMESTAMP_WINDOW_SECS: i64 = 300;
/// Synchronous (`delayed`) responses are capped at this long.
pub const DELAYED_RESPONSE_CAP: Duration = Duration::from_secs(30);

/// How the webhook endpoint answers the caller.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RespondMode {
    Immediate,
    Delayed,
}

impl Default for RespondMode {
    fn default() -> Self {
        RespondMode::Immediate
    }
}

/// Authentication applied to incoming webhook requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WebhookAuth {
    None,
    Bearer { token: String },
    Hmac { secret: String },
}

impl WebhookAuth {
    /// Check a request against this auth policy.
    ///
    /// Bearer compares `Authorization: Bearer <token>`; HMAC expects
    /// `X-Webhook-Signature` over `timestamp + body` with the timestamp in
    /// `X-Webhook-Timestamp`, at most five minutes old.
    pub fn verify(&self, headers: &HashMap<String, String>, body: &[u8], now: DateTime<Utc>) -> bool {
        match self {
            WebhookAuth::None => true,
            WebhookAuth::Bearer { token } => {
                let header = match header_value(headers, "authorization") {
                    Some(h) => h,
                    None => return false,
                };
                match header.strip_prefix("Bearer ") {
                    Some(provided) => constant_time_str_eq(token, provided),
                    None => false,
                }
            }
            WebhookAuth::Hmac { secret } => {
                let signature = match header_value(headers, "x-webhook-signature") {
                    Some(s) => s,
                    None => return false,
                };
                let timestamp = match header_value(headers, "x-webhook-timestamp")
                    .and_then(|t| t.parse::<i64>().ok())
                {
                    Some(t) => t,
                    None => return false,
                };
                if (now.timestamp() - timestamp).abs() > HMAC_TIMESTAMP_WINDOW_SECS {
                    return false;
                }
                let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
                    Ok(mac) => mac,
                    Err(_) => return false,
                };
                mac.update(timestamp.to_string().as_bytes());
                mac.update(body);
                let expected = hex::encode(mac.finalize().into_bytes());
                constant_time_str_eq(&expected, signature)
            }
        }
    }
}

/// Compare via SHA-256 digests in constant time.
pub fn constant_time_str_eq(expected: &str, provided: &str) -> bool {
    let expected_hash = Sha256::digest(expected.as_bytes());
    let provided_hash = Sha256::digest(provided.as_bytes());
    expected_hash.ct_eq(&provided_hash).into()
}

/// Route table entry for one armed webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookRoute {
    pub flow_id: Uuid,
    pub user_id: i64,
    pub methods: Vec<String>,
    pub respond: RespondMode,
    pub auth: WebhookAuth,
    pub allowed_origins: Vec<String>,
    /// Set for form webhooks; payloads are canonicalized before delivery.
    pub form_provider: Option<FormProvider>,
}

/// One persisted delivery, written before user code runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEventRecord {
    pub flow_id: Uuid,
    pub path: String,
    pub method: String,
    pub body: serde_json::Value,
    pub headers: HashMap<String, String>,
    pub received_at: DateTime<Utc>,
}

/// What the HTTP layer should answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookResponse {
    pub status_code: u16,
    pub body: serde_json::Value,
}

/// Webhook routing table, event log, and request handling.
pub struct WebhookService {
    routes: RwLock<HashMap<String, WebhookRoute>>,
    events: Mutex<Vec<WebhookEventRecord>>,
    sink: Arc<dyn TriggerSink>,
}

impl WebhookService {
    pub fn new(sink: Arc<dyn TriggerSink>) -> Self {
        Self {
            routes: RwLock::new(HashMap::new()),
            events: Mutex::new(Vec::new()),
            sink,
        }
    }

    /// Register a route under a fresh 128-bit token. Returns
    /// `(token, production_path, test_path)`.
    pub fn register(&self, route: WebhookRoute) -> (String, String, String) {
        let token = Uuid::new_v4().simple().to_string();
        let production_path = format!("/webhooks/{}", token);
        let test_path = format!("/webhooks-test/{}", token);
        self.routes.write().unwrap().insert(token.clone(), route);
        (token, production_path, test_path)
    }

    pub fn unregister(&self, token: &str) -> bool {
        self.routes.write().unwrap().remove(token).is_some()
    }

    pub fn route(&self, token: &str) -> Option<WebhookRoute> {
        self.routes.read().unwrap().get(token).cloned()
    }

    /// Active route count, for observability.
    pub fn active_count(&self) -> usize {
        self.routes.read().unwrap().len()
    }

    /// Snapshot of the persisted event log.
    pub fn events(&self) -> Vec<WebhookEventRecord> {
        self.events.lock().unwrap().clone()
    }

    /// Handle an incoming request on a webhook path.
    ///
    /// `test_delivery` marks requests on the `/webhooks-test/` path; they
    /// run the same pipeline but are tagged in the event payload.
    pub async fn handle_request(
        &self,
        token: &str,
        method: &str,
        headers: &HashMap<String, String>,
        body: &[u8],
        test_delivery: bool,
    ) -> WebhookResponse {
        let route = match self.route(token) {
            Some(route) => route,
            None => {
                return WebhookResponse {
                    status_code: 404,
                    body: json!({ "error": "unknown webhook" }),
                }
            }
        };

        if !route.methods.iter().any(|m| m.eq_ignore_ascii_case(method)) {
            return WebhookResponse {
                status_code: 405,
                body: json!({ "error": "method not allowed" }),
            };
        }

        if !route.auth.verify(headers, body, Utc::now()) {
            log::warn!("webhook auth failed for token {}", token);
            return WebhookResponse {
                status_code: 401,
                body: json!({ "error": "unauthorized" }),
            };
        }

        let parsed_body: serde_json::Value = serde_json::from_slice(body)
            .unwrap_or_else(|_| json!(String::from_utf8_lossy(body).to_string()));
        let path = if test_delivery {
            format!("/webhooks-test/{}", token)
        } else {
            format!("/webhooks/{}", token)
        };

        let received_at = Utc::now();
        // Persist before any user code runs.
        self.events.lock().unwrap().push(WebhookEventRecord {
            flow_id: route.flow_id,
            path: path.clone(),
            method: method.to_string(),
            body: parsed_body.clone(),
            headers: headers.clone(),
            received_at,
        });

        let payload = match &route.form_provider {
            Some(provider) => provider.canonicalize(&parsed_body),
            None => json!({
                "body": parsed_body,
                "method": method,
                "path": path,
                "test": test_delivery,
            }),
        };

        let request_id = Uuid::new_v4().to_string();
        let event = TriggerEvent {
            trigger_type: route
                .form_provider
                .as_ref()
                .map(|_| "form_webhook".to_string())
                .unwrap_or_else(|| "webhook".to_string()),
            flow_id: route.flow_id,
            user_id: route.user_id,
            payload,
            source_headers: headers.clone(),
            upstream_event_id: Some(format!("{}:{}", token, received_at.timestamp())),
        };

        match route.respond {
            RespondMode::Immediate => {
                let sink = self.sink.clone();
                tokio::spawn(async move {
                    sink.deliver(event).await;
                });
                WebhookResponse {
                    status_code: 200,
                    body: json!({ "status": "received", "request_id": request_id }),
                }
            }
            RespondMode::Delayed => {
                let sink = self.sink.clone();
                let delivery = sink.deliver(event);
                match tokio::time::timeout(DELAYED_RESPONSE_CAP, delivery).await {
                    Ok(()) => WebhookResponse {
                        status_code: 200,
                        body: json!({ "status": "completed", "request_id": request_id }),
                    },
                    // Overrun: fall back to immediate semantics. The flow
                    // keeps running; the audit log records the outcome.
                    Err(_) => WebhookResponse {
                        status_code: 200,
                        body: json!({ "status": "received", "request_id": request_id }),
                    },
                }
            }
        }
    }
}

/// Trigger handler arming generic webhooks.
pub struct WebhookTriggerHandler {
    service: Arc<WebhookService>,
    signing_secret: String,
}

impl WebhookTriggerHandler {
    pub fn new(service: Arc<WebhookService>, signing_secret: impl Into<String>) -> Self {
        Self {
            service,
            signing_secret: signing_secret.into(),
        }
    }
}

#[async_trait]
impl TriggerHandler for WebhookTriggerHandler {
    async fn schedule(&self, params: &ParamMap) -> HandlerResult {
        let flow_id = match params
            .get("flow_id")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
        {
            Some(id) => id,
            None => return HandlerResult::failure("'flow_id' is required"),
        };
        let user_id = match params.get("user_id").and_then(|v| v.as_i64()) {
            Some(id) => id,
            None => return HandlerResult::failure("'user_id' is required"),
        };

        let methods = params
            .get("methods")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|m| m.as_str().map(|s| s.to_uppercase()))
                    .collect::<Vec<_>>()
            })
            .unwrap_or_else(|| vec!["POST".to_string()]);
        let respond = match params.get("respond").and_then(|v| v.as_str()) {
            Some("delayed") => RespondMode::Delayed,
            _ => RespondMode::Immediate,
        };
        let auth = match params.get("auth_type").and_then(|v| v.as_str()) {
            Some("bearer") => match params.get("auth_token").and_then(|v| v.as_str()) {
                Some(token) => WebhookAuth::Bearer {
                    token: token.to_string(),
                },
                None => return HandlerResult::failure("'auth_token' required for bearer auth"),
            },
            Some("hmac") => WebhookAuth::Hmac {
                secret: params
                    .get("signing_secret")
                    .and_then(|v| v.as_str())
                    .unwrap_or(&self.signing_secret)
                    .to_string(),
            },
            _ => WebhookAuth::None,
        };
        let allowed_origins = params
            .get("allowed_origins")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|o| o.as_str().map(|s| s.to_string()))
                    .collect()
            })
            .unwrap_or_default();

        let (token, production_path, test_path) = self.service.register(WebhookRoute {
            flow_id,
            user_id,
            methods: methods.clone(),
            respond,
            auth,
            allowed_origins,
            form_provider: None,
        });

        HandlerResult::success(json!({
            "trigger_type": "webhook",
            "token": token,
            "production_path": production_path,
            "test_path": test_path,
            "methods": methods,
        }))
    }

    async fn unschedule(&self, registration_id: &str) -> HandlerResult {
        if self.service.unregister(registration_id) {
            HandlerResult::success(json!({ "token": registration_id, "unregistered": true }))
        } else {
            HandlerResult::failure(format!("no webhook registered for '{}'", registration_id))
        }
    }
}

fn header_value<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Sign `timestamp + body` the way [`WebhookAuth::Hmac`] expects. Exposed
/// for callers and tests producing deliveries.
pub fn sign_webhook(secret: &str, timestamp: i64, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key size");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}
