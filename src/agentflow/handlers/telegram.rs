//! Telegram message connector.

use crate::agentflow::handler::{
    Handler, HandlerResult, ParamMap, ParameterSpec, ParameterType,
};
use crate::agentflow::http_pool::shared_client;
use async_trait::async_trait;
use serde_json::json;

pub struct TelegramSendMessageHandler;

impl TelegramSendMessageHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TelegramSendMessageHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Handler for TelegramSendMessageHandler {
    async fn execute(&self, params: &ParamMap, creds: &ParamMap) -> HandlerResult {
        let chat_id = match params.get("chat_id").and_then(|v| v.as_str()) {
            Some(chat_id) => chat_id,
            None => return HandlerResult::failure("'chat_id' is required"),
        };
        let message = match params.get("message").and_then(|v| v.as_str()) {
            Some(message) => message,
            None => return HandlerResult::failure("'message' is required"),
        };
        let bot_token = match creds.get("bot_token").and_then(|v| v.as_str()) {
            Some(token) => token,
            None => return HandlerResult::failure("missing 'bot_token' credential"),
        };

        let mut url = format!(
            "https://api.telegram.org/bot{}/sendMessage?chat_id={}&text={}",
            bot_token,
            urlencoding::encode(chat_id),
            urlencoding::encode(message)
        );
        if let Some(parse_mode) = params.get("parse_mode").and_then(|v| v.as_str()) {
            url.push_str(&format!("&parse_mode={}", urlencoding::encode(parse_mode)));
        }

        let response = match shared_client().get(&url).send().await {
            Ok(response) => response,
            Err(e) => return HandlerResult::failure(format!("telegram request failed: {}", e)),
        };
        let status = response.status();
        let body: serde_json::Value = response.json().await.unwrap_or(json!({}));
        if !status.is_success() || body["ok"] != json!(true) {
            let description = body["description"].as_str().unwrap_or("unknown error");
            return HandlerResult::failure(format!("telegram API error: {}", description));
        }

        HandlerResult::success(json!({
            "message_id": body["result"]["message_id"],
            "chat_id": chat_id,
        }))
    }

    fn parameter_specs(&self) -> Vec<ParameterSpec> {
        vec![
            ParameterSpec::new("chat_id", ParameterType::String)
                .required()
                .with_description("Target chat id or @channel name"),
            ParameterSpec::new("message", ParameterType::String)
                .required()
                .with_description("Message text"),
            ParameterSpec::new("parse_mode", ParameterType::String)
                .with_description("Markdown or HTML"),
        ]
    }
}
