//! Logging step for flows.
//!
//! Writes the supplied message through the process logger and echoes it
//! back, which makes it handy as the observable tail of a test flow.

use crate::agentflow::handler::{
    Handler, HandlerResult, ParamMap, ParameterSpec, ParameterType,
};
use async_trait::async_trait;
use serde_json::json;

pub struct LoggerHandler;

impl LoggerHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LoggerHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Handler for LoggerHandler {
    async fn execute(&self, params: &ParamMap, _creds: &ParamMap) -> HandlerResult {
        let message = params
            .get("message")
            .map(|v| match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .unwrap_or_default();
        match params.get("level").and_then(|v| v.as_str()) {
            Some("error") => log::error!("{}", message),
            Some("warn") => log::warn!("{}", message),
            Some("debug") => log::debug!("{}", message),
            _ => log::info!("{}", message),
        }
        HandlerResult::success(json!({ "logged": message }))
    }

    fn parameter_specs(&self) -> Vec<ParameterSpec> {
        vec![
            ParameterSpec::new("message", ParameterType::Any)
                .required()
                .with_description("Value to log"),
            ParameterSpec::new("level", ParameterType::String).with_default(json!("info")),
        ]
    }
}
