//! Push-notification triggers: signatures, envelopes, token advancement.

use agentflow::flow::TriggerEvent;
use agentflow::handler::ParamMap;
use agentflow::scheduler::Scheduler;
use agentflow::triggers::drive::DriveTriggerHandler;
use agentflow::triggers::github::GithubTriggerHandler;
use agentflow::triggers::gmail::GmailTriggerHandler;
use agentflow::triggers::slack::SlackTriggerHandler;
use agentflow::triggers::{ResumeToken, TriggerHandler, TriggerSink, TriggerStateStore};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

struct ChannelSink {
    tx: mpsc::UnboundedSender<TriggerEvent>,
}

#[async_trait]
impl TriggerSink for ChannelSink {
    async fn deliver(&self, event: TriggerEvent) {
        let _ = self.tx.send(event);
    }
}

fn channel_sink() -> (Arc<ChannelSink>, mpsc::UnboundedReceiver<TriggerEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(ChannelSink { tx }), rx)
}

fn base_params(flow_id: Uuid) -> ParamMap {
    let mut params = ParamMap::new();
    params.insert("flow_id".into(), json!(flow_id.to_string()));
    params.insert("user_id".into(), json!(1));
    params
}

fn encode_base64(input: &[u8]) -> String {
    const TABLE: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut out = String::new();
    for chunk in input.chunks(3) {
        let b = [
            chunk[0],
            chunk.get(1).copied().unwrap_or(0),
            chunk.get(2).copied().unwrap_or(0),
        ];
        out.push(TABLE[(b[0] >> 2) as usize] as char);
        out.push(TABLE[(((b[0] & 0x03) << 4) | (b[1] >> 4)) as usize] as char);
        out.push(if chunk.len() > 1 {
            TABLE[(((b[1] & 0x0F) << 2) | (b[2] >> 6)) as usize] as char
        } else {
            '='
        });
        out.push(if chunk.len() > 2 {
            TABLE[(b[2] & 0x3F) as usize] as char
        } else {
            '='
        });
    }
    out
}

// --- GitHub -------------------------------------------------------------

#[tokio::test]
async fn test_github_receive_verifies_signature() {
    let state = Arc::new(TriggerStateStore::new());
    let (sink, mut rx) = channel_sink();
    let handler = GithubTriggerHandler::new(state, sink, "http://localhost");

    let flow_id = Uuid::new_v4();
    let mut params = base_params(flow_id);
    params.insert("repo".into(), json!("kyra/engine"));
    params.insert("secret".into(), json!("hook-secret"));
    let armed = handler.schedule(&params).await;
    let trigger_id = armed.output.unwrap()["trigger_id"]
        .as_str()
        .unwrap()
        .to_string();

    let body = br#"{"ref":"refs/heads/main"}"#;
    let mut mac = HmacSha256::new_from_slice(b"hook-secret").unwrap();
    mac.update(body);
    let signature = format!("sha256={}", hex::encode(mac.finalize().into_bytes()));

    let mut headers = HashMap::new();
    headers.insert("X-Hub-Signature-256".to_string(), signature);
    headers.insert("X-GitHub-Event".to_string(), "push".to_string());
    headers.insert("X-GitHub-Delivery".to_string(), "d-123".to_string());

    let result = handler.receive(&trigger_id, &headers, body).await;
    assert!(result.is_success());
    let event = rx.recv().await.unwrap();
    assert_eq!(event.flow_id, flow_id);
    assert_eq!(event.upstream_event_id.as_deref(), Some("d-123"));

    // A bad signature delivers nothing.
    headers.insert("X-Hub-Signature-256".to_string(), "sha256=00".to_string());
    let rejected = handler.receive(&trigger_id, &headers, body).await;
    assert!(!rejected.is_success());
    assert!(rx.try_recv().is_err());
}

// --- Gmail --------------------------------------------------------------

fn pubsub_body(history_id: u64) -> Vec<u8> {
    let inner = json!({ "emailAddress": "k@example.test", "historyId": history_id });
    json!({ "message": { "data": encode_base64(inner.to_string().as_bytes()), "messageId": "m1" } })
        .to_string()
        .into_bytes()
}

#[tokio::test]
async fn test_gmail_history_advances_monotonically() {
    let state = Arc::new(TriggerStateStore::new());
    let (sink, mut rx) = channel_sink();
    let handler = GmailTriggerHandler::new(state.clone(), sink, Arc::new(Scheduler::new()));

    let flow_id = Uuid::new_v4();
    let mut params = base_params(flow_id);
    params.insert("topic_name".into(), json!("projects/p/topics/mail"));
    params.insert("history_id".into(), json!(100));
    let armed = handler.schedule(&params).await;
    let output = armed.output.unwrap();
    let trigger_id = output["trigger_id"].as_str().unwrap().to_string();
    assert_eq!(output["renewal_job_id"], format!("gmail_renewal_{}", flow_id));

    // Newer history id: delivered, token advances.
    let result = handler
        .receive(&trigger_id, &HashMap::new(), &pubsub_body(150))
        .await;
    assert!(result.is_success());
    assert!(rx.recv().await.is_some());
    assert_eq!(
        state.resume_token(&trigger_id),
        Some(ResumeToken::HistoryId(150))
    );

    // Stale notification: ignored, token untouched.
    let duplicate = handler
        .receive(&trigger_id, &HashMap::new(), &pubsub_body(120))
        .await;
    assert!(duplicate.is_success());
    assert!(rx.try_recv().is_err());
    assert_eq!(
        state.resume_token(&trigger_id),
        Some(ResumeToken::HistoryId(150))
    );
}

#[tokio::test]
async fn test_gmail_requires_topic() {
    let handler = GmailTriggerHandler::new(
        Arc::new(TriggerStateStore::new()),
        channel_sink().0,
        Arc::new(Scheduler::new()),
    );
    let result = handler.schedule(&base_params(Uuid::new_v4())).await;
    assert!(!result.is_success());
    assert!(result.error.unwrap().contains("topic_name"));
}

// --- Drive --------------------------------------------------------------

#[tokio::test]
async fn test_drive_sync_ignored_update_processed() {
    let state = Arc::new(TriggerStateStore::new());
    let (sink, mut rx) = channel_sink();
    let handler = DriveTriggerHandler::new(state.clone(), sink);

    let flow_id = Uuid::new_v4();
    let mut params = base_params(flow_id);
    params.insert("page_token".into(), json!("41"));
    let armed = handler.schedule(&params).await;
    let output = armed.output.unwrap();
    let trigger_id = output["trigger_id"].as_str().unwrap().to_string();
    let channel_id = output["channel_id"].as_str().unwrap().to_string();

    let mut headers = HashMap::new();
    headers.insert("X-Goog-Channel-ID".to_string(), channel_id.clone());
    headers.insert("X-Goog-Resource-ID".to_string(), "res-1".to_string());
    headers.insert("X-Goog-Resource-State".to_string(), "sync".to_string());

    // Handshake: nothing delivered.
    let sync = handler.receive(&trigger_id, &headers).await;
    assert!(sync.is_success());
    assert!(rx.try_recv().is_err());

    headers.insert("X-Goog-Resource-State".to_string(), "update".to_string());
    let update = handler.receive(&trigger_id, &headers).await;
    assert!(update.is_success());
    let event = rx.recv().await.unwrap();
    assert_eq!(event.payload["page_token"], "41");

    // Wrong channel id is rejected outright.
    headers.insert("X-Goog-Channel-ID".to_string(), "someone-else".to_string());
    let rejected = handler.receive(&trigger_id, &headers).await;
    assert!(!rejected.is_success());

    // Downstream advances the page token after processing.
    handler.advance_page_token(&trigger_id, "42").unwrap();
    assert_eq!(
        state.resume_token(&trigger_id),
        Some(ResumeToken::PageToken("42".to_string()))
    );
}

// --- Slack --------------------------------------------------------------

fn slack_signature(secret: &str, timestamp: i64, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(format!("v0:{}:", timestamp).as_bytes());
    mac.update(body);
    format!("v0={}", hex::encode(mac.finalize().into_bytes()))
}

#[tokio::test]
async fn test_slack_event_delivery_and_ts_advance() {
    let state = Arc::new(TriggerStateStore::new());
    let (sink, mut rx) = channel_sink();
    let handler = SlackTriggerHandler::new(state.clone(), sink);

    let flow_id = Uuid::new_v4();
    let mut params = base_params(flow_id);
    params.insert("signing_secret".into(), json!("slack-secret"));
    let armed = handler.schedule(&params).await;
    let trigger_id = armed.output.unwrap()["trigger_id"]
        .as_str()
        .unwrap()
        .to_string();

    let body = json!({
        "type": "event_callback",
        "event_id": "Ev123",
        "event": { "type": "message", "text": "hola", "ts": "1750000000.000100" }
    })
    .to_string()
    .into_bytes();
    let now = chrono::Utc::now().timestamp();
    let mut headers = HashMap::new();
    headers.insert("X-Slack-Request-Timestamp".to_string(), now.to_string());
    headers.insert(
        "X-Slack-Signature".to_string(),
        slack_signature("slack-secret", now, &body),
    );

    let result = handler.receive(&trigger_id, &headers, &body).await;
    assert!(result.is_success());
    let event = rx.recv().await.unwrap();
    assert_eq!(event.payload["text"], "hola");
    match state.resume_token(&trigger_id) {
        Some(ResumeToken::LastTs(ts)) => assert!((ts - 1_750_000_000.0001).abs() < 1e-3),
        other => panic!("unexpected token: {:?}", other),
    }

    // Replay of the same event is a duplicate.
    let replay = handler.receive(&trigger_id, &headers, &body).await;
    assert!(replay.is_success());
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_slack_url_verification_challenge() {
    let state = Arc::new(TriggerStateStore::new());
    let (sink, _rx) = channel_sink();
    let handler = SlackTriggerHandler::new(state, sink);

    let mut params = base_params(Uuid::new_v4());
    params.insert("signing_secret".into(), json!("slack-secret"));
    let armed = handler.schedule(&params).await;
    let trigger_id = armed.output.unwrap()["trigger_id"]
        .as_str()
        .unwrap()
        .to_string();

    let body = json!({ "type": "url_verification", "challenge": "c0ffee" })
        .to_string()
        .into_bytes();
    let now = chrono::Utc::now().timestamp();
    let mut headers = HashMap::new();
    headers.insert("X-Slack-Request-Timestamp".to_string(), now.to_string());
    headers.insert(
        "X-Slack-Signature".to_string(),
        slack_signature("slack-secret", now, &body),
    );

    let result = handler.receive(&trigger_id, &headers, &body).await;
    assert!(result.is_success());
    assert_eq!(result.output.unwrap()["challenge"], "c0ffee");
}

// --- Lifecycle ----------------------------------------------------------

#[tokio::test]
async fn test_disarmed_registration_discards_events() {
    let state = Arc::new(TriggerStateStore::new());
    let (sink, mut rx) = channel_sink();
    let handler = GithubTriggerHandler::new(state.clone(), sink, "http://localhost");

    let mut params = base_params(Uuid::new_v4());
    params.insert("repo".into(), json!("kyra/engine"));
    params.insert("secret".into(), json!("s"));
    let armed = handler.schedule(&params).await;
    let trigger_id = armed.output.unwrap()["trigger_id"]
        .as_str()
        .unwrap()
        .to_string();

    handler.unschedule(&trigger_id).await;

    let result = handler.receive(&trigger_id, &HashMap::new(), b"{}").await;
    assert!(!result.is_success());
    assert!(rx.try_recv().is_err());
}
