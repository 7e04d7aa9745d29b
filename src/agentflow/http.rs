//! HTTP surface for webhook and push-notification endpoints.
//!
//! The router exposes:
//!
//! - `ANY /webhooks/{token}` and `ANY /webhooks-test/{token}`: generic
//!   and form webhooks (method filtering happens in the webhook service);
//! - `POST /push/github/{id}`, `/push/gmail/{id}`, `/push/drive/{id}`,
//!   `/push/slack/{id}`: per-integration push endpoints;
//! - `GET /triggers`: observability listing of the armed surface.
//!
//! Handlers stay thin: headers are flattened to a plain map and handed to
//! the owning service, which does verification and delivery.

use crate::agentflow::registry::Registry;
use crate::agentflow::triggers::drive::DriveTriggerHandler;
use crate::agentflow::triggers::github::GithubTriggerHandler;
use crate::agentflow::triggers::gmail::GmailTriggerHandler;
use crate::agentflow::triggers::slack::SlackTriggerHandler;
use crate::agentflow::triggers::webhook::WebhookService;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{any, get, post};
use axum::{Json, Router};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

/// Shared state for the HTTP layer.
#[derive(Clone)]
pub struct HttpState {
    pub webhooks: Arc<WebhookService>,
    pub github: Arc<GithubTriggerHandler>,
    pub gmail: Arc<GmailTriggerHandler>,
    pub drive: Arc<DriveTriggerHandler>,
    pub slack: Arc<SlackTriggerHandler>,
    pub registry: Arc<Registry>,
}

/// Build the engine's router.
pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/webhooks/{token}", any(production_webhook))
        .route("/webhooks-test/{token}", any(test_webhook))
        .route("/push/github/{trigger_id}", post(github_push))
        .route("/push/gmail/{trigger_id}", post(gmail_push))
        .route("/push/drive/{trigger_id}", post(drive_push))
        .route("/push/slack/{trigger_id}", post(slack_push))
        .route("/triggers", get(list_triggers))
        .with_state(state)
}

fn flatten_headers(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.to_string(), v.to_string()))
        })
        .collect()
}

async fn production_webhook(
    State(state): State<HttpState>,
    Path(token): Path<String>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let response = state
        .webhooks
        .handle_request(&token, method.as_str(), &flatten_headers(&headers), &body, false)
        .await;
    (
        StatusCode::from_u16(response.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        Json(response.body),
    )
}

async fn test_webhook(
    State(state): State<HttpState>,
    Path(token): Path<String>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let response = state
        .webhooks
        .handle_request(&token, method.as_str(), &flatten_headers(&headers), &body, true)
        .await;
    (
        StatusCode::from_u16(response.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        Json(response.body),
    )
}

async fn github_push(
    State(state): State<HttpState>,
    Path(trigger_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let result = state
        .github
        .receive(&trigger_id, &flatten_headers(&headers), &body)
        .await;
    if result.is_success() {
        (StatusCode::OK, Json(json!({ "status": "received" })))
    } else {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": result.error })),
        )
    }
}

async fn gmail_push(
    State(state): State<HttpState>,
    Path(trigger_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let result = state
        .gmail
        .receive(&trigger_id, &flatten_headers(&headers), &body)
        .await;
    if result.is_success() {
        (StatusCode::OK, Json(json!({ "status": "received" })))
    } else {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": result.error })),
        )
    }
}

async fn drive_push(
    State(state): State<HttpState>,
    Path(trigger_id): Path<String>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let result = state
        .drive
        .receive(&trigger_id, &flatten_headers(&headers))
        .await;
    if result.is_success() {
        (StatusCode::OK, Json(json!({ "status": "received" })))
    } else {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": result.error })),
        )
    }
}

async fn slack_push(
    State(state): State<HttpState>,
    Path(trigger_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let result = state
        .slack
        .receive(&trigger_id, &flatten_headers(&headers), &body)
        .await;
    if result.is_success() {
        // URL-verification handshakes must echo the challenge back.
        let challenge = result
            .output
            .as_ref()
            .and_then(|o| o.get("challenge"))
            .cloned();
        match challenge {
            Some(challenge) if !challenge.is_null() => {
                (StatusCode::OK, Json(json!({ "challenge": challenge })))
            }
            _ => (StatusCode::OK, Json(json!({ "status": "received" }))),
        }
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": result.error })),
        )
    }
}

async fn list_triggers(State(state): State<HttpState>) -> impl IntoResponse {
    let registry_status = state.registry.status();
    Json(json!({
        "active_webhooks": state.webhooks.active_count(),
        "tools_registered": registry_status.tools_registered,
        "nodes_registered": registry_status.nodes_registered,
    }))
}
