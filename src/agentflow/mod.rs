// src/agentflow/mod.rs

pub mod agent;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod flow;
pub mod handler;
pub mod handlers;
pub mod http;
pub mod http_pool;
pub mod llm;
pub mod memory;
pub mod registry;
pub mod scheduler;
pub mod triggers;
pub mod validation;
pub mod workflow;

use crate::agentflow::agent::{AgentExecutor, AgentStore};
use crate::agentflow::config::EngineConfig;
use crate::agentflow::dispatcher::Dispatcher;
use crate::agentflow::flow::{FlowStore, InMemoryFlowStore};
use crate::agentflow::llm::catalog::{ModelCatalog, UsageTracker};
use crate::agentflow::llm::ProviderClientFactory;
use crate::agentflow::memory::MemoryManager;
use crate::agentflow::registry::Registry;
use crate::agentflow::scheduler::Scheduler;
use crate::agentflow::triggers::cron_trigger::CronTriggerHandler;
use crate::agentflow::triggers::drive::{DrivePollHandler, DriveTriggerHandler};
use crate::agentflow::triggers::form::FormWebhookTriggerHandler;
use crate::agentflow::triggers::github::{GithubPollHandler, GithubTriggerHandler};
use crate::agentflow::triggers::gmail::{GmailPollHandler, GmailTriggerHandler};
use crate::agentflow::triggers::sheets::SheetsPollHandler;
use crate::agentflow::triggers::slack::{SlackPollHandler, SlackTriggerHandler};
use crate::agentflow::triggers::webhook::{WebhookService, WebhookTriggerHandler};
use crate::agentflow::triggers::{TriggerRegistry, TriggerStateStore};
use crate::agentflow::workflow::WorkflowRunner;
use std::sync::Arc;

/// Fully wired engine: registries, dispatcher, trigger runtime, agent
/// executor, and the HTTP state. Construction order matters: the
/// workflow runner is the sink every trigger delivers into, so it is
/// built right after the dispatcher and before any trigger handler.
pub struct Engine {
    pub config: EngineConfig,
    pub registry: Arc<Registry>,
    pub dispatcher: Arc<Dispatcher>,
    pub flows: Arc<dyn FlowStore>,
    pub runner: Arc<WorkflowRunner>,
    pub scheduler: Arc<Scheduler>,
    pub trigger_state: Arc<TriggerStateStore>,
    pub trigger_registry: Arc<TriggerRegistry>,
    pub memory: Arc<MemoryManager>,
    pub agents: Arc<AgentStore>,
    pub agent_executor: Arc<AgentExecutor>,
    pub http_state: http::HttpState,
}

impl Engine {
    /// Assemble an engine with in-process stores. Durable backends (the
    /// Redis buffer, a persistent flow store) slot in through the same
    /// seams.
    pub fn new(config: EngineConfig) -> Self {
        let memory = Arc::new(MemoryManager::in_process());
        let registry = Arc::new(handlers::init_handlers(memory.clone()));
        let dispatcher = Arc::new(Dispatcher::new(registry.clone()));
        let flows: Arc<dyn FlowStore> = Arc::new(InMemoryFlowStore::new());
        let runner = Arc::new(WorkflowRunner::new(flows.clone(), dispatcher.clone()));
        let scheduler = Arc::new(Scheduler::new());
        let trigger_state = Arc::new(TriggerStateStore::new());

        let webhooks = Arc::new(WebhookService::new(runner.clone()));
        let github = Arc::new(GithubTriggerHandler::new(
            trigger_state.clone(),
            runner.clone(),
            config.public_base_url.clone(),
        ));
        let gmail = Arc::new(GmailTriggerHandler::new(
            trigger_state.clone(),
            runner.clone(),
            scheduler.clone(),
        ));
        let drive = Arc::new(DriveTriggerHandler::new(
            trigger_state.clone(),
            runner.clone(),
        ));
        let slack = Arc::new(SlackTriggerHandler::new(
            trigger_state.clone(),
            runner.clone(),
        ));

        let trigger_registry = Arc::new(TriggerRegistry::new());
        trigger_registry.register(
            "cron",
            Arc::new(CronTriggerHandler::new(scheduler.clone(), runner.clone())),
        );
        trigger_registry.register(
            "webhook",
            Arc::new(WebhookTriggerHandler::new(
                webhooks.clone(),
                config.webhook_signing_secret.clone(),
            )),
        );
        trigger_registry.register(
            "form_webhook",
            Arc::new(FormWebhookTriggerHandler::new(
                webhooks.clone(),
                config.webhook_signing_secret.clone(),
            )),
        );
        trigger_registry.register("github", github.clone());
        trigger_registry.register(
            "github_poll",
            Arc::new(GithubPollHandler::new(
                trigger_state.clone(),
                runner.clone(),
                scheduler.clone(),
            )),
        );
        trigger_registry.register("gmail", gmail.clone());
        trigger_registry.register(
            "gmail_poll",
            Arc::new(GmailPollHandler::new(
                trigger_state.clone(),
                runner.clone(),
                scheduler.clone(),
            )),
        );
        trigger_registry.register("drive", drive.clone());
        trigger_registry.register(
            "drive_poll",
            Arc::new(DrivePollHandler::new(
                trigger_state.clone(),
                runner.clone(),
                scheduler.clone(),
            )),
        );
        trigger_registry.register("slack", slack.clone());
        trigger_registry.register(
            "slack_poll",
            Arc::new(SlackPollHandler::new(
                trigger_state.clone(),
                runner.clone(),
                scheduler.clone(),
            )),
        );
        trigger_registry.register(
            "sheets_poll",
            Arc::new(SheetsPollHandler::new(
                trigger_state.clone(),
                runner.clone(),
                scheduler.clone(),
            )),
        );

        let agents = Arc::new(AgentStore::new());
        let agent_executor = Arc::new(AgentExecutor::new(
            agents.clone(),
            dispatcher.clone(),
            memory.clone(),
            Arc::new(ModelCatalog::builtin()),
            Arc::new(UsageTracker::new()),
            Arc::new(ProviderClientFactory),
            config.default_model.clone(),
        ));
        handlers::register_agent_node(&registry, agent_executor.clone());

        let http_state = http::HttpState {
            webhooks,
            github,
            gmail,
            drive,
            slack,
            registry: registry.clone(),
        };

        Self {
            config,
            registry,
            dispatcher,
            flows,
            runner,
            scheduler,
            trigger_state,
            trigger_registry,
            memory,
            agents,
            agent_executor,
            http_state,
        }
    }

    /// Router serving the webhook and push endpoints.
    pub fn router(&self) -> axum::Router {
        http::build_router(self.http_state.clone())
    }
}
