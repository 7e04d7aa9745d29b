//! Webhook round trips through the axum router.

use agentflow::flow::TriggerEvent;
use agentflow::handler::ParamMap;
use agentflow::http::{build_router, HttpState};
use agentflow::registry::Registry;
use agentflow::scheduler::Scheduler;
use agentflow::triggers::drive::DriveTriggerHandler;
use agentflow::triggers::github::GithubTriggerHandler;
use agentflow::triggers::gmail::GmailTriggerHandler;
use agentflow::triggers::slack::SlackTriggerHandler;
use agentflow::triggers::webhook::{
    sign_webhook, RespondMode, WebhookAuth, WebhookRoute, WebhookService, WebhookTriggerHandler,
};
use agentflow::triggers::{TriggerHandler, TriggerSink, TriggerStateStore};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::Request;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

/// Sink that forwards every delivered event into a channel.
struct ChannelSink {
    tx: mpsc::UnboundedSender<TriggerEvent>,
}

#[async_trait]
impl TriggerSink for ChannelSink {
    async fn deliver(&self, event: TriggerEvent) {
        let _ = self.tx.send(event);
    }
}

fn test_state(sink: Arc<dyn TriggerSink>) -> (HttpState, Arc<WebhookService>) {
    let trigger_state = Arc::new(TriggerStateStore::new());
    let scheduler = Arc::new(Scheduler::new());
    let webhooks = Arc::new(WebhookService::new(sink.clone()));
    let state = HttpState {
        webhooks: webhooks.clone(),
        github: Arc::new(GithubTriggerHandler::new(
            trigger_state.clone(),
            sink.clone(),
            "http://127.0.0.1:8080",
        )),
        gmail: Arc::new(GmailTriggerHandler::new(
            trigger_state.clone(),
            sink.clone(),
            scheduler,
        )),
        drive: Arc::new(DriveTriggerHandler::new(trigger_state.clone(), sink.clone())),
        slack: Arc::new(SlackTriggerHandler::new(trigger_state, sink)),
        registry: Arc::new(Registry::new()),
    };
    (state, webhooks)
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_register_then_post_delivers_exactly_one_event() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let (state, webhooks) = test_state(Arc::new(ChannelSink { tx }));
    let flow_id = Uuid::new_v4();

    let handler = WebhookTriggerHandler::new(webhooks, "signing-secret");
    let mut params = ParamMap::new();
    params.insert("flow_id".into(), json!(flow_id.to_string()));
    params.insert("user_id".into(), json!(7));
    let armed = handler.schedule(&params).await;
    assert!(armed.is_success());
    let output = armed.output.unwrap();
    let token = output["token"].as_str().unwrap().to_string();
    assert_eq!(output["production_path"], format!("/webhooks/{}", token));

    let router = build_router(state);
    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/webhooks/{}", token))
                .header("content-type", "application/json")
                .body(Body::from(r#"{"value": 7}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body = body_json(response).await;
    assert_eq!(body["status"], "received");

    let event = rx.recv().await.unwrap();
    assert_eq!(event.flow_id, flow_id);
    assert_eq!(event.user_id, 7);
    assert_eq!(event.payload["body"]["value"], 7);
    // Exactly one delivery for one request.
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_unknown_token_is_404_and_delivers_nothing() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let (state, _webhooks) = test_state(Arc::new(ChannelSink { tx }));

    let router = build_router(state);
    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhooks/deadbeefdeadbeefdeadbeefdeadbeef")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), 404);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_method_filtering() {
    let (tx, _rx) = mpsc::unbounded_channel();
    let (state, webhooks) = test_state(Arc::new(ChannelSink { tx }));
    let (token, _, _) = webhooks.register(WebhookRoute {
        flow_id: Uuid::new_v4(),
        user_id: 1,
        methods: vec!["POST".into()],
        respond: RespondMode::Immediate,
        auth: WebhookAuth::None,
        allowed_origins: Vec::new(),
        form_provider: None,
    });

    let router = build_router(state);
    let response = router
        .oneshot(
            Request::builder()
                .method("GET")
                .uri(format!("/webhooks/{}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), 405);
}

#[tokio::test]
async fn test_hmac_protected_webhook() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let (state, webhooks) = test_state(Arc::new(ChannelSink { tx }));
    let (token, _, _) = webhooks.register(WebhookRoute {
        flow_id: Uuid::new_v4(),
        user_id: 1,
        methods: vec!["POST".into()],
        respond: RespondMode::Immediate,
        auth: WebhookAuth::Hmac {
            secret: "s3cret".into(),
        },
        allowed_origins: Vec::new(),
        form_provider: None,
    });

    let body = br#"{"ping": true}"#;
    let timestamp = chrono::Utc::now().timestamp();
    let signature = sign_webhook("s3cret", timestamp, body);

    let router = build_router(state.clone());
    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/webhooks/{}", token))
                .header("X-Webhook-Timestamp", timestamp.to_string())
                .header("X-Webhook-Signature", signature)
                .body(Body::from(&body[..]))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert!(rx.recv().await.is_some());

    // Tampered body is rejected.
    let bad = build_router(state)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/webhooks/{}", token))
                .header("X-Webhook-Timestamp", timestamp.to_string())
                .header("X-Webhook-Signature", "0000")
                .body(Body::from(&body[..]))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(bad.status(), 401);
}

#[tokio::test]
async fn test_event_persisted_before_flow_runs() {
    let (tx, _rx) = mpsc::unbounded_channel();
    let (_state, webhooks) = test_state(Arc::new(ChannelSink { tx }));
    let flow_id = Uuid::new_v4();
    let (token, _, _) = webhooks.register(WebhookRoute {
        flow_id,
        user_id: 1,
        methods: vec!["POST".into()],
        respond: RespondMode::Immediate,
        auth: WebhookAuth::None,
        allowed_origins: Vec::new(),
        form_provider: None,
    });

    webhooks
        .handle_request(
            &token,
            "POST",
            &Default::default(),
            br#"{"audit": "me"}"#,
            false,
        )
        .await;

    let events = webhooks.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].flow_id, flow_id);
    assert_eq!(events[0].method, "POST");
    assert_eq!(events[0].body["audit"], "me");
}
