use anyhow::Context;
use dotenvy::dotenv;
use log::{info, warn};
use std::sync::Arc;

use supportdesk::core::config::AppConfig;
use supportdesk::core::shared::state::AppState;
use supportdesk::core::shared::utils::{create_conn, run_migrations};
use supportdesk::llm::observability::Tracer;
use supportdesk::llm::{LLMProvider, OpenAIClient};
use supportdesk::main_module::run_server;
use supportdesk::testdata::spawn_cleanup_scheduler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .write_style(env_logger::WriteStyle::Always)
        .init();

    let config = AppConfig::load().context("Failed to load configuration")?;
    info!(
        "Starting supportdesk {} on {}:{}",
        env!("CARGO_PKG_VERSION"),
        config.server.host,
        config.server.port
    );

    let pool = create_conn(&config.database.url, config.database.max_connections)
        .context("Failed to create database pool")?;
    {
        let pool = pool.clone();
        tokio::task::spawn_blocking(move || run_migrations(&pool))
            .await
            .context("Migration task panicked")?
            .map_err(|e| anyhow::anyhow!("Failed to run migrations: {e}"))?;
    }
    info!("Database migrations applied");

    if config.llm.api_key.is_empty() {
        warn!("LLM api key is not set, marketplace processing will fail");
    }
    let llm: Arc<dyn LLMProvider> =
        Arc::new(OpenAIClient::from_config(&config.llm).context("Failed to build LLM client")?);

    let tracer = Tracer::from_config(&config.observability).context("Failed to build trace sink")?;

    let state = Arc::new(AppState::new(config, pool, llm, Arc::new(tracer)));

    let cleanup = spawn_cleanup_scheduler(state.clone());

    run_server(state).await.context("HTTP server failed")?;

    if let Some(handle) = cleanup {
        handle.abort();
    }
    info!("Server stopped");
    Ok(())
}
