//! Handler contract.
//!
//! A [`Handler`] is the atomic executable unit of the engine: a named
//! operation invoked by workflow steps, agent tool calls, and trigger
//! arming. Handlers are stateless across invocations; any state they need
//! (buffers, channels, tables) is held by an injected store captured in the
//! handler's constructor closure.
//!
//! # Contract
//!
//! - `execute(params, creds)` must return a [`HandlerResult`] and never
//!   panic; failures are reported through `HandlerResult::failure`.
//! - The declared [`ParameterSpec`] list is the handler's public contract
//!   and is cached by the validator at registration time.
//! - Credentials flow through the `execute` call, never the constructor.
//!
//! # Example
//!
//! ```rust
//! use agentflow::handler::{FnHandler, HandlerResult, ParameterSpec, ParameterType};
//! use std::sync::Arc;
//!
//! let echo = FnHandler::new(
//!     vec![ParameterSpec::new("text", ParameterType::String).required()],
//!     |params, _creds| {
//!         let text = params.get("text").cloned().unwrap_or_default();
//!         Box::pin(async move { HandlerResult::success(text) })
//!     },
//! );
//! let _handler: Arc<dyn agentflow::handler::Handler> = Arc::new(echo);
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// Parameter and credential maps are plain JSON objects.
pub type ParamMap = HashMap<String, serde_json::Value>;

/// Default per-dispatch deadline.
pub const DEFAULT_HANDLER_DEADLINE: Duration = Duration::from_secs(60);
/// System-wide cap a handler override can never exceed.
pub const MAX_HANDLER_DEADLINE: Duration = Duration::from_secs(300);

/// Declared semantic type of a handler parameter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
    Any,
}

impl ParameterType {
    /// JSON-schema type name for form generation.
    pub fn json_schema_name(&self) -> &'static str {
        match self {
            ParameterType::String => "string",
            ParameterType::Integer => "integer",
            ParameterType::Number => "number",
            ParameterType::Boolean => "boolean",
            ParameterType::Array => "array",
            ParameterType::Object => "object",
            ParameterType::Any => "string",
        }
    }
}

/// Specification of a single expected parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParameterType,
    pub required: bool,
    pub default: Option<serde_json::Value>,
    pub description: Option<String>,
}

impl ParameterSpec {
    /// Define a new parameter with the provided name and type.
    pub fn new(name: impl Into<String>, param_type: ParameterType) -> Self {
        Self {
            name: name.into(),
            param_type,
            required: false,
            default: None,
            description: None,
        }
    }

    /// Mark the parameter as required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Provide a default used when the caller omits the parameter.
    pub fn with_default(mut self, default: serde_json::Value) -> Self {
        self.default = Some(default);
        self
    }

    /// Add a human readable description that surfaces in generated forms.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Whether a handler is registered for agent tool use, workflow nodes,
/// or both namespaces.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UsageMode {
    Tool,
    Node,
    Both,
}

/// Outcome status of a handler invocation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HandlerStatus {
    Success,
    Error,
}

/// The contract all handlers must obey when returning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerResult {
    pub status: HandlerStatus,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
    pub duration_ms: u64,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl HandlerResult {
    /// Convenience constructor for a successful invocation.
    pub fn success(output: serde_json::Value) -> Self {
        Self {
            status: HandlerStatus::Success,
            output: Some(output),
            error: None,
            duration_ms: 0,
            metadata: HashMap::new(),
        }
    }

    /// Convenience constructor for a failed invocation.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            status: HandlerStatus::Error,
            output: None,
            error: Some(error.into()),
            duration_ms: 0,
            metadata: HashMap::new(),
        }
    }

    /// Attach handler specific metadata to the result.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// True when the handler reported success.
    pub fn is_success(&self) -> bool {
        self.status == HandlerStatus::Success
    }
}

/// The atomic executable unit.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Execute the operation. Must not panic; report failures through
    /// [`HandlerResult::failure`].
    async fn execute(&self, params: &ParamMap, creds: &ParamMap) -> HandlerResult;

    /// Declared parameter contract. Cached by the validator at
    /// registration; an empty list means "accept anything".
    fn parameter_specs(&self) -> Vec<ParameterSpec> {
        Vec::new()
    }

    /// Optional usage-mode tag read by planning services.
    fn usage_mode(&self) -> Option<UsageMode> {
        None
    }

    /// Capability flags, e.g. `"memory"` or `"trigger-schedulable"`.
    fn capabilities(&self) -> &'static [&'static str] {
        &[]
    }

    /// Per-handler execution deadline override. Clamped to
    /// [`MAX_HANDLER_DEADLINE`] by the dispatcher.
    fn deadline(&self) -> Duration {
        DEFAULT_HANDLER_DEADLINE
    }
}

impl std::fmt::Debug for dyn Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "dyn Handler")
    }
}

/// Constructor stored in the registry; invoked per dispatch so handlers
/// stay stateless across invocations.
pub type HandlerCtor = Arc<dyn Fn() -> Arc<dyn Handler> + Send + Sync>;

type FnHandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;
type FnHandlerBody = dyn Fn(ParamMap, ParamMap) -> FnHandlerFuture + Send + Sync;

/// Adapter turning a closure into a [`Handler`].
///
/// Used by embedders and tests to register operations without a dedicated
/// type. The closure receives owned copies of the parameter and credential
/// maps.
pub struct FnHandler {
    specs: Vec<ParameterSpec>,
    body: Arc<FnHandlerBody>,
    deadline: Duration,
}

impl FnHandler {
    pub fn new<F>(specs: Vec<ParameterSpec>, body: F) -> Self
    where
        F: Fn(ParamMap, ParamMap) -> FnHandlerFuture + Send + Sync + 'static,
    {
        Self {
            specs,
            body: Arc::new(body),
            deadline: DEFAULT_HANDLER_DEADLINE,
        }
    }

    /// Override the per-dispatch deadline for this handler.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }
}

impl Clone for FnHandler {
    fn clone(&self) -> Self {
        Self {
            specs: self.specs.clone(),
            body: self.body.clone(),
            deadline: self.deadline,
        }
    }
}

#[async_trait]
impl Handler for FnHandler {
    async fn execute(&self, params: &ParamMap, creds: &ParamMap) -> HandlerResult {
        (self.body)(params.clone(), creds.clone()).await
    }

    fn parameter_specs(&self) -> Vec<ParameterSpec> {
        self.specs.clone()
    }

    fn deadline(&self) -> Duration {
        self.deadline
    }
}
