//! Built-in connector handlers.
//!
//! Each connector is an opaque `execute(params, creds) → HandlerResult`
//! leaf; the engine core neither knows nor cares what the handler talks
//! to. The set here is deliberately small: an HTTP client, two chat
//! connectors, a logger, the memory tools, and the agent-run node are
//! enough to exercise every core path.
//!
//! `init_handlers` is the single place handlers enter the registry,
//! replacing import-time registration side effects with an explicit
//! startup pass.

pub mod agent_run;
pub mod http_request;
pub mod logger;
pub mod memory_tools;
pub mod slack_post;
pub mod telegram;

use crate::agentflow::agent::AgentExecutor;
use crate::agentflow::handler::{Handler, HandlerCtor};
use crate::agentflow::memory::MemoryManager;
use crate::agentflow::registry::Registry;
use std::sync::Arc;

/// Register every built-in handler into a fresh registry.
///
/// Connector leaves land in both namespaces (agents call them as tools,
/// flows as nodes); memory tools are tool-only; the agent-run node is
/// node-only.
pub fn init_handlers(memory: Arc<MemoryManager>) -> Registry {
    let registry = Registry::new();

    register_both(&registry, "HTTP_Request.request", || {
        Arc::new(http_request::HttpRequestHandler::new()) as Arc<dyn Handler>
    });
    register_both(&registry, "Telegram.send_message", || {
        Arc::new(telegram::TelegramSendMessageHandler::new()) as Arc<dyn Handler>
    });
    register_both(&registry, "Slack.post_message", || {
        Arc::new(slack_post::SlackPostMessageHandler::new()) as Arc<dyn Handler>
    });
    register_both(&registry, "Logger.log", || {
        Arc::new(logger::LoggerHandler::new()) as Arc<dyn Handler>
    });

    let buffer_memory = memory.clone();
    registry.register_tool(
        "Memory.buffer",
        Arc::new(move || {
            Arc::new(memory_tools::BufferMemoryHandler::new(buffer_memory.clone()))
                as Arc<dyn Handler>
        }),
    );
    let core_memory = memory.clone();
    registry.register_tool(
        "Memory.core",
        Arc::new(move || {
            Arc::new(memory_tools::CoreMemoryHandler::new(core_memory.clone())) as Arc<dyn Handler>
        }),
    );
    let episodic_memory = memory;
    registry.register_tool(
        "Memory.episodic",
        Arc::new(move || {
            Arc::new(memory_tools::EpisodicMemoryHandler::new(
                episodic_memory.clone(),
            )) as Arc<dyn Handler>
        }),
    );

    registry.mark_scanned();
    registry
}

/// Wire the agent-run node once the executor exists (it needs the
/// dispatcher, which needs the registry, so this runs second).
pub fn register_agent_node(registry: &Registry, executor: Arc<AgentExecutor>) {
    registry.register_node(
        "Agent.run",
        Arc::new(move || {
            Arc::new(agent_run::AgentRunHandler::new(executor.clone())) as Arc<dyn Handler>
        }),
    );
}

fn register_both<F>(registry: &Registry, name: &str, ctor: F)
where
    F: Fn() -> Arc<dyn Handler> + Send + Sync + 'static,
{
    let ctor: HandlerCtor = Arc::new(ctor);
    registry.register_both(name, ctor);
}
