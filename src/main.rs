//! agentflow-server: hosts the scheduler and the webhook/push endpoints.
//!
//! Exit codes: 0 on clean shutdown, 1 when configuration loading fails,
//! 2 when the scheduler/HTTP listener fails to come up.

use agentflow::config::{EngineConfig, EXIT_CONFIG_FAILURE, EXIT_SCHEDULER_FAILURE};
use agentflow::Engine;

#[tokio::main]
async fn main() {
    env_logger::init();

    let config = match EngineConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            log::error!("{}", e);
            std::process::exit(EXIT_CONFIG_FAILURE);
        }
    };

    let listen_addr = config.listen_addr.clone();
    let engine = Engine::new(config);
    let status = engine.registry.status();
    log::info!(
        "agentflow up: {} tools, {} nodes, {} trigger types",
        status.tools_registered,
        status.nodes_registered,
        engine.trigger_registry.trigger_types().len()
    );

    let listener = match tokio::net::TcpListener::bind(&listen_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            log::error!("failed to bind {}: {}", listen_addr, e);
            std::process::exit(EXIT_SCHEDULER_FAILURE);
        }
    };
    log::info!("listening on {}", listen_addr);

    if let Err(e) = axum::serve(listener, engine.router()).await {
        log::error!("server error: {}", e);
        std::process::exit(EXIT_SCHEDULER_FAILURE);
    }
}
