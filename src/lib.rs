// src/lib.rs

// Import the top-level `agentflow` module.
pub mod agentflow;

// Re-exporting key items for easier external access.
pub use agentflow::config;
pub use agentflow::dispatcher::{DispatchOptions, DispatchOutcome, Dispatcher};
pub use agentflow::error::EngineError;
pub use agentflow::handler::{self, Handler, HandlerResult, ParamMap, ParameterSpec};
pub use agentflow::registry::Registry;
pub use agentflow::validation;
pub use agentflow::Engine;
pub use agentflow::{
    agent, dispatcher, error, flow, handlers, http, http_pool, llm, memory, registry, scheduler,
    triggers, workflow,
};
