//! Handler registry.
//!
//! Two namespaces, `tools` and `nodes`, each mapping a unique name to a
//! handler constructor. Tools are resolved by agent tool calls; nodes are
//! resolved by workflow steps, with a triple key fallback
//! (`node.action`, then `node`, then `action`) preserving compatibility
//! with repositories that persist either long or short names.
//!
//! The registry is an explicit value built at startup by
//! `init_handlers()`; there is no import-time mutable global. Registration
//! also performs Phase I validation: the handler's declared parameter
//! specs are cached in the shared [`ParameterValidator`].

use crate::agentflow::error::EngineError;
use crate::agentflow::handler::{Handler, HandlerCtor};
use crate::agentflow::validation::ParameterValidator;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Observability snapshot of the registry state.
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStatus {
    pub tools_registered: usize,
    pub nodes_registered: usize,
    pub tool_keys: Vec<String>,
    pub node_keys: Vec<String>,
    pub scanned: bool,
}

/// Process-wide handler tables.
///
/// Read-mostly: registration happens during startup, dispatches read
/// afterwards. A write lock protects dynamic re-registration.
pub struct Registry {
    tools: RwLock<HashMap<String, HandlerCtor>>,
    nodes: RwLock<HashMap<String, HandlerCtor>>,
    validator: Arc<ParameterValidator>,
    scanned: RwLock<bool>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            nodes: RwLock::new(HashMap::new()),
            validator: Arc::new(ParameterValidator::new()),
            scanned: RwLock::new(false),
        }
    }

    /// Shared spec cache used by the dispatcher for Phase II validation.
    pub fn validator(&self) -> Arc<ParameterValidator> {
        self.validator.clone()
    }

    /// Register a handler in the tool namespace. A same-named entry is
    /// replaced; the newest registration wins.
    pub fn register_tool(&self, name: &str, ctor: HandlerCtor) {
        self.cache_specs(name, &ctor);
        let mut tools = self.tools.write().unwrap();
        if tools.insert(name.to_string(), ctor).is_some() {
            log::warn!("tool handler '{}' re-registered", name);
        } else {
            log::debug!("registered tool handler: {}", name);
        }
    }

    /// Register a handler in the node namespace.
    pub fn register_node(&self, name: &str, ctor: HandlerCtor) {
        self.cache_specs(name, &ctor);
        let mut nodes = self.nodes.write().unwrap();
        if nodes.insert(name.to_string(), ctor).is_some() {
            log::warn!("node handler '{}' re-registered", name);
        } else {
            log::debug!("registered node handler: {}", name);
        }
    }

    /// Register the same constructor under both namespaces.
    pub fn register_both(&self, name: &str, ctor: HandlerCtor) {
        self.register_tool(name, ctor.clone());
        self.register_node(name, ctor);
    }

    /// Phase I: instantiate once to introspect the declared specs.
    fn cache_specs(&self, name: &str, ctor: &HandlerCtor) {
        let handler = ctor();
        let specs = handler.parameter_specs();
        if !specs.is_empty() {
            self.validator.register_specs(name, specs);
        }
    }

    /// Resolve a tool handler by exact name.
    pub fn get_tool(&self, name: &str) -> Result<Arc<dyn Handler>, EngineError> {
        let tools = self.tools.read().unwrap();
        match tools.get(name) {
            Some(ctor) => Ok(ctor()),
            None => Err(EngineError::NotFound {
                kind: "tool handler",
                name: name.to_string(),
                attempted: vec![name.to_string()],
                available: tools.keys().cloned().collect(),
            }),
        }
    }

    /// Resolve a node handler, trying `node.action`, `node`, and `action`
    /// in order. Returns the handler together with the key that resolved,
    /// so callers can validate against the right cached specs.
    pub fn get_node(
        &self,
        node: &str,
        action: &str,
    ) -> Result<(String, Arc<dyn Handler>), EngineError> {
        let constructed = format!("{}.{}", node, action);
        let nodes = self.nodes.read().unwrap();
        for key in [constructed.as_str(), node, action].iter() {
            if let Some(ctor) = nodes.get(*key) {
                return Ok((key.to_string(), ctor()));
            }
        }
        Err(EngineError::NotFound {
            kind: "node handler",
            name: constructed.clone(),
            attempted: vec![constructed, node.to_string(), action.to_string()],
            available: nodes.keys().cloned().collect(),
        })
    }

    /// True when the tool namespace contains `name`.
    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.read().unwrap().contains_key(name)
    }

    /// Mark that the startup registration pass completed.
    pub fn mark_scanned(&self) {
        *self.scanned.write().unwrap() = true;
    }

    /// Enumerate registry state for observability.
    pub fn status(&self) -> RegistryStatus {
        let tools = self.tools.read().unwrap();
        let nodes = self.nodes.read().unwrap();
        let mut tool_keys: Vec<String> = tools.keys().cloned().collect();
        let mut node_keys: Vec<String> = nodes.keys().cloned().collect();
        tool_keys.sort();
        node_keys.sort();
        RegistryStatus {
            tools_registered: tool_keys.len(),
            nodes_registered: node_keys.len(),
            tool_keys,
            node_keys,
            scanned: *self.scanned.read().unwrap(),
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
