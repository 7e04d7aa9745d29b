//! Polling fallback behavior against a local fixture server.

use agentflow::flow::TriggerEvent;
use agentflow::handler::ParamMap;
use agentflow::scheduler::{Scheduler, TickOutcome};
use agentflow::triggers::github::GithubPollHandler;
use agentflow::triggers::sheets::SheetsPollHandler;
use agentflow::triggers::{ResumeToken, TriggerHandler, TriggerSink, TriggerStateStore};
use async_trait::async_trait;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

struct ChannelSink {
    tx: mpsc::UnboundedSender<TriggerEvent>,
}

#[async_trait]
impl TriggerSink for ChannelSink {
    async fn deliver(&self, event: TriggerEvent) {
        let _ = self.tx.send(event);
    }
}

/// Fixture: first request is rate limited, later ones return events.
async fn github_events(State(calls): State<Arc<AtomicUsize>>) -> impl IntoResponse {
    let call = calls.fetch_add(1, Ordering::SeqCst);
    if call == 0 {
        return (StatusCode::TOO_MANY_REQUESTS, HeaderMap::new(), "".to_string());
    }
    let events: Vec<serde_json::Value> = (0..8)
        .map(|i| json!({ "id": format!("ev-{}", i), "type": "PushEvent" }))
        .collect();
    let mut headers = HeaderMap::new();
    headers.insert("etag", format!("\"etag-{}\"", call).parse().unwrap());
    (
        StatusCode::OK,
        headers,
        serde_json::to_string(&events).unwrap(),
    )
}

async fn spawn_fixture(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn test_github_poll_backs_off_then_recovers() {
    let calls = Arc::new(AtomicUsize::new(0));
    let fixture = Router::new()
        .route("/repos/{owner}/{repo}/events", get(github_events))
        .with_state(calls.clone());
    let base = spawn_fixture(fixture).await;

    let state = Arc::new(TriggerStateStore::new());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handler = GithubPollHandler::new(
        state.clone(),
        Arc::new(ChannelSink { tx }),
        Arc::new(Scheduler::new()),
    )
    .with_api_base(base);

    let mut params = ParamMap::new();
    params.insert("flow_id".into(), json!(Uuid::new_v4().to_string()));
    params.insert("user_id".into(), json!(1));
    params.insert("repo".into(), json!("kyra/engine"));
    params.insert("polling_interval".into(), json!(300));
    let armed = handler.schedule(&params).await;
    assert!(armed.is_success());
    let output = armed.output.unwrap();
    let trigger_id = output["trigger_id"].as_str().unwrap().to_string();
    // The interval guard holds even for smaller requested values.
    assert_eq!(output["polling_interval"], 300);

    // Tick 1: 429 → backoff requested, nothing delivered, token untouched.
    assert_eq!(handler.poll_once(&trigger_id).await, TickOutcome::Backoff);
    assert!(rx.try_recv().is_err());
    assert_eq!(
        state.resume_token(&trigger_id),
        Some(ResumeToken::Etag(String::new()))
    );

    // Tick 2: events flow, capped at five per tick, ETag advances.
    assert_eq!(handler.poll_once(&trigger_id).await, TickOutcome::Normal);
    let mut delivered = 0;
    while rx.try_recv().is_ok() {
        delivered += 1;
    }
    assert_eq!(delivered, 5);
    match state.resume_token(&trigger_id) {
        Some(ResumeToken::Etag(etag)) => assert!(etag.contains("etag-")),
        other => panic!("unexpected token: {:?}", other),
    }
}

#[tokio::test]
async fn test_github_poll_interval_floor() {
    let state = Arc::new(TriggerStateStore::new());
    let (tx, _rx) = mpsc::unbounded_channel();
    let handler = GithubPollHandler::new(
        state,
        Arc::new(ChannelSink { tx }),
        Arc::new(Scheduler::new()),
    );

    let mut params = ParamMap::new();
    params.insert("flow_id".into(), json!(Uuid::new_v4().to_string()));
    params.insert("user_id".into(), json!(1));
    params.insert("repo".into(), json!("kyra/engine"));
    params.insert("polling_interval".into(), json!(30));
    let armed = handler.schedule(&params).await;
    assert_eq!(armed.output.unwrap()["polling_interval"], 300);
}

/// Fixture returning a fixed sheet, switched by call count.
async fn sheet_values(State(calls): State<Arc<AtomicUsize>>) -> impl IntoResponse {
    let call = calls.fetch_add(1, Ordering::SeqCst);
    let values = if call < 2 {
        json!([["name", "count"], ["widgets", 7]])
    } else {
        json!([["name", "count"], ["widgets", 8]])
    };
    axum::Json(json!({ "values": values }))
}

#[tokio::test]
async fn test_sheets_poll_fires_only_on_hash_change() {
    let calls = Arc::new(AtomicUsize::new(0));
    let fixture = Router::new()
        .route(
            "/spreadsheets/{sheet}/values/{range}",
            get(sheet_values),
        )
        .with_state(calls);
    let base = spawn_fixture(fixture).await;

    let state = Arc::new(TriggerStateStore::new());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handler = SheetsPollHandler::new(
        state,
        Arc::new(ChannelSink { tx }),
        Arc::new(Scheduler::new()),
    )
    .with_api_base(base);

    let mut params = ParamMap::new();
    params.insert("flow_id".into(), json!(Uuid::new_v4().to_string()));
    params.insert("user_id".into(), json!(1));
    params.insert("spreadsheet_id".into(), json!("sheet-1"));
    params.insert("range".into(), json!("A1:B2"));
    params.insert("polling_interval".into(), json!(60));
    let armed = handler.schedule(&params).await;
    let trigger_id = armed.output.unwrap()["trigger_id"]
        .as_str()
        .unwrap()
        .to_string();

    // First tick primes the hash without firing.
    handler.poll_once(&trigger_id).await;
    assert!(rx.try_recv().is_err());

    // Same content: still quiet.
    handler.poll_once(&trigger_id).await;
    assert!(rx.try_recv().is_err());

    // Changed cell: exactly one event.
    handler.poll_once(&trigger_id).await;
    let event = rx.recv().await.unwrap();
    assert_eq!(event.payload["values"][1][1], 8);
    assert!(rx.try_recv().is_err());
}
