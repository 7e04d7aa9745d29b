//! Dispatcher: the single entry point for executing a named handler.
//!
//! `dispatch(name, params, creds, opts)` resolves the name across the tool
//! and node namespaces, validates parameters, optionally runs smart-input
//! reconciliation, and invokes the handler under a deadline. Handlers never
//! raise raw errors across this boundary; anything the handler itself does
//! not classify is wrapped into `HandlerResult { status: error }`.
//!
//! "Needs user input" is a *signal*, not a fault: it comes back as
//! [`DispatchOutcome::NeedsInput`] carrying the minimal form schema, and the
//! caller decides whether to surface a form or plan around it. The
//! dispatcher itself never collects input.

use crate::agentflow::error::{redact_secrets, EngineError};
use crate::agentflow::handler::{
    Handler, HandlerResult, ParamMap, MAX_HANDLER_DEADLINE,
};
use crate::agentflow::registry::Registry;
use crate::agentflow::validation::ParameterAnalysis;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Per-dispatch options.
#[derive(Debug, Clone, Default)]
pub struct DispatchOptions {
    /// When set, the reconciler may turn missing/invalid required
    /// parameters into a [`DispatchOutcome::NeedsInput`] signal instead of
    /// a validation error.
    pub smart_input: bool,
    /// Strict-mode validation: reject provided keys with no matching spec.
    pub strict: bool,
    /// Caller-imposed deadline override; clamped to the system cap.
    pub deadline: Option<Duration>,
}

/// What a dispatch produced.
#[derive(Debug, Clone)]
pub enum DispatchOutcome {
    /// The handler ran to completion (successfully or not).
    Completed(HandlerResult),
    /// Input is required before the handler can run. Carries the handler
    /// name and the reconciliation analysis with its minimal form schema.
    NeedsInput {
        handler: String,
        analysis: ParameterAnalysis,
    },
}

impl DispatchOutcome {
    /// Unwrap the completed result, mapping `NeedsInput` to an error
    /// result. Convenient for call sites that never enable smart input.
    pub fn into_result(self) -> HandlerResult {
        match self {
            DispatchOutcome::Completed(result) => result,
            DispatchOutcome::NeedsInput { handler, .. } => {
                HandlerResult::failure(format!("handler '{}' requires user input", handler))
            }
        }
    }
}

/// Resolves names, validates, and invokes handlers.
pub struct Dispatcher {
    registry: Arc<Registry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Dispatch `name` with the given parameters and credentials.
    ///
    /// Resolution: the tool namespace is tried first with the full name;
    /// on a miss, `Domain.action` names fall back to the node namespace
    /// with its triple-key strategy.
    pub async fn dispatch(
        &self,
        name: &str,
        params: &ParamMap,
        creds: &ParamMap,
        opts: &DispatchOptions,
    ) -> Result<DispatchOutcome, EngineError> {
        let (resolved_key, handler) = self.resolve(name)?;

        let validator = self.registry.validator();
        let validation = validator.validate(&resolved_key, params, opts.strict);

        if opts.smart_input {
            let analysis = validator.analyze(&resolved_key, params);
            if analysis.needs_user_input {
                log::info!(
                    "handler '{}' requires user input: missing={:?} invalid={:?}",
                    resolved_key,
                    analysis.missing,
                    analysis.invalid
                );
                return Ok(DispatchOutcome::NeedsInput {
                    handler: resolved_key,
                    analysis,
                });
            }
        }

        if !validation.valid {
            return Err(EngineError::Validation {
                handler: resolved_key,
                result: validation,
            });
        }

        let deadline = effective_deadline(handler.as_ref(), opts.deadline);
        let start = Instant::now();
        let executed = tokio::time::timeout(deadline, handler.execute(params, creds)).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let mut result = match executed {
            Ok(result) => result,
            Err(_) => {
                log::error!(
                    "handler '{}' exceeded its {}s deadline; params={}",
                    resolved_key,
                    deadline.as_secs(),
                    redact_secrets(&serde_json::to_value(params).unwrap_or_default())
                );
                HandlerResult::failure(format!(
                    "handler '{}' timed out after {}s",
                    resolved_key,
                    deadline.as_secs()
                ))
            }
        };
        // Backfill timing; everything else passes through unchanged.
        result.duration_ms = duration_ms;

        if log::log_enabled!(log::Level::Debug) {
            log::debug!(
                "dispatched '{}' status={:?} duration_ms={}",
                resolved_key,
                result.status,
                result.duration_ms
            );
        }
        Ok(DispatchOutcome::Completed(result))
    }

    /// Resolve a name across both namespaces.
    fn resolve(&self, name: &str) -> Result<(String, Arc<dyn Handler>), EngineError> {
        if self.registry.has_tool(name) {
            return self.registry.get_tool(name).map(|h| (name.to_string(), h));
        }
        let (node, action) = match name.split_once('.') {
            Some((node, action)) => (node, action),
            None => (name, name),
        };
        self.registry.get_node(node, action)
    }
}

fn effective_deadline(handler: &dyn Handler, caller_override: Option<Duration>) -> Duration {
    let requested = caller_override.unwrap_or_else(|| handler.deadline());
    requested.min(MAX_HANDLER_DEADLINE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agentflow::handler::{FnHandler, HandlerCtor, ParameterSpec, ParameterType};
    use serde_json::json;

    fn registry_with_telegram() -> Arc<Registry> {
        let registry = Arc::new(Registry::new());
        let handler = FnHandler::new(
            vec![
                ParameterSpec::new("chat_id", ParameterType::String).required(),
                ParameterSpec::new("message", ParameterType::String).required(),
            ],
            |params, _creds| {
                Box::pin(async move {
                    HandlerResult::success(json!({
                        "sent": params.get("message").cloned().unwrap_or_default()
                    }))
                })
            },
        );
        let ctor: HandlerCtor = Arc::new(move || Arc::new(handler.clone()) as Arc<dyn Handler>);
        registry.register_tool("Telegram.send_message", ctor);
        registry
    }

    #[tokio::test]
    async fn test_smart_input_emits_needs_input_signal() {
        let dispatcher = Dispatcher::new(registry_with_telegram());
        let mut params = ParamMap::new();
        params.insert("chat_id".into(), json!("@kyra"));

        let opts = DispatchOptions {
            smart_input: true,
            ..Default::default()
        };
        let outcome = dispatcher
            .dispatch("Telegram.send_message", &params, &ParamMap::new(), &opts)
            .await
            .unwrap();

        match outcome {
            DispatchOutcome::NeedsInput { handler, analysis } => {
                assert_eq!(handler, "Telegram.send_message");
                assert_eq!(analysis.missing, vec!["message".to_string()]);
                let schema = analysis.form_schema.unwrap();
                assert_eq!(schema["required"], json!(["message"]));
                assert_eq!(schema["properties"]["message"]["type"], "string");
            }
            other => panic!("expected NeedsInput, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_required_without_smart_input_is_validation_error() {
        let dispatcher = Dispatcher::new(registry_with_telegram());
        let mut params = ParamMap::new();
        params.insert("chat_id".into(), json!("@kyra"));

        let err = dispatcher
            .dispatch(
                "Telegram.send_message",
                &params,
                &ParamMap::new(),
                &DispatchOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_unknown_name_is_not_found() {
        let dispatcher = Dispatcher::new(registry_with_telegram());
        let err = dispatcher
            .dispatch(
                "Nowhere.nothing",
                &ParamMap::new(),
                &ParamMap::new(),
                &DispatchOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_deadline_converts_to_error_result() {
        let registry = Arc::new(Registry::new());
        let slow = FnHandler::new(Vec::new(), |_params, _creds| {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                HandlerResult::success(json!("done"))
            })
        });
        let ctor: HandlerCtor = Arc::new(move || Arc::new(slow.clone()) as Arc<dyn Handler>);
        registry.register_tool("Slow.op", ctor);

        let dispatcher = Dispatcher::new(registry);
        let opts = DispatchOptions {
            deadline: Some(Duration::from_millis(50)),
            ..Default::default()
        };
        let outcome = dispatcher
            .dispatch("Slow.op", &ParamMap::new(), &ParamMap::new(), &opts)
            .await
            .unwrap();
        let result = outcome.into_result();
        assert!(!result.is_success());
        assert!(result.error.unwrap().contains("timed out"));
    }
}
