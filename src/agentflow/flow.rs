//! Flow data model and storage.
//!
//! Pure data leaves: flows, steps, and trigger events. The engine treats a
//! flow's spec as opaque JSON-shaped data; only the workflow runner
//! interprets it. These types depend on nothing but other leaves, which
//! keeps the crate's layering acyclic: data here, handlers above it, the
//! runtime on top.

use crate::agentflow::handler::ParamMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

/// Error-handling mode for a single step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OnError {
    /// Abort the flow on this step's failure (the default).
    Abort,
    /// Record the failure and keep going.
    Continue,
}

impl Default for OnError {
    fn default() -> Self {
        OnError::Abort
    }
}

/// One `(node, action, params)` record inside a flow spec.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub node: String,
    pub action: String,
    #[serde(default)]
    pub params: ParamMap,
    /// Reference into the owner's credential vault; resolution is outside
    /// the core.
    #[serde(default)]
    pub creds_ref: Option<String>,
    /// When set, the previous step's output is threaded into this step's
    /// params under this key.
    #[serde(default)]
    pub input_key: Option<String>,
    #[serde(default)]
    pub on_error: OnError,
}

/// Ordered step list; stored as a JSON blob outside the core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowSpec {
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// An owned, user-authored flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    pub flow_id: Uuid,
    pub owner_id: i64,
    pub is_active: bool,
    pub spec: FlowSpec,
}

/// An event produced by an armed trigger, consumed exactly once by the
/// workflow runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub trigger_type: String,
    pub flow_id: Uuid,
    pub user_id: i64,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub source_headers: HashMap<String, String>,
    /// Upstream event id when the source provides one (GitHub delivery
    /// id, Drive change id, webhook token+timestamp); used to derive a
    /// stable execution id for caller-side deduplication.
    #[serde(default)]
    pub upstream_event_id: Option<String>,
}

/// Flow persistence seam. The core only needs lookups; authoring CRUD
/// lives outside.
pub trait FlowStore: Send + Sync {
    fn get(&self, flow_id: Uuid) -> Option<Flow>;
    fn put(&self, flow: Flow);
}

/// In-memory flow table for tests and single-process deployments.
pub struct InMemoryFlowStore {
    flows: RwLock<HashMap<Uuid, Flow>>,
}

impl InMemoryFlowStore {
    pub fn new() -> Self {
        Self {
            flows: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryFlowStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FlowStore for InMemoryFlowStore {
    fn get(&self, flow_id: Uuid) -> Option<Flow> {
        self.flows.read().unwrap().get(&flow_id).cloned()
    }

    fn put(&self, flow: Flow) {
        self.flows.write().unwrap().insert(flow.flow_id, flow);
    }
}
