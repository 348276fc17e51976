use anyhow::{Context, Result};
use post_translator::{api, config::Config, context::AppContext, scheduler};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (ignored in production)
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("post_translator=info".parse()?),
        )
        .init();

    info!("Starting post translator");

    let config = Config::from_env()?;
    let ctx = Arc::new(AppContext::connect(&config).await?);

    // Queue worker: turns scheduled runs into batches
    let _worker = scheduler::spawn_queue_worker(
        Arc::clone(&ctx.queue),
        Duration::from_secs(config.queue_reschedule_delay_secs),
        config.queue_batch_size,
    );

    // Maintenance also picks up items left pending by a previous run
    let _scheduler = scheduler::start_maintenance(Arc::clone(&ctx.queue), config.maintenance_settings())
        .await
        .context("Failed to start maintenance scheduler")?;

    if ctx.api_key.is_none() {
        warn!("API_KEY not set, admin API is unauthenticated");
    }

    let app = api::router(Arc::clone(&ctx));
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("🚀 Admin API listening on {}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
