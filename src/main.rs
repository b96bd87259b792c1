use dotenvy::dotenv;
use ecopoints_core::{
    config::{database, settings},
    errors::Result,
    scheduler,
};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize tracing (as early as possible)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // 2. Load .env file; env vars can be set externally
    dotenv().ok();
    info!("Attempted to load .env file.");

    // 3. Load settings
    let settings = settings::load_default_settings()
        .inspect_err(|e| error!("Failed to load settings: {}", e))?;
    if settings.transport_modes.is_empty() {
        warn!("No transport modes configured; every trip completion will be rejected");
    }
    info!(
        "Loaded settings: {} transport modes, {} badges, top {} rewarded",
        settings.transport_modes.len(),
        settings.badges.len(),
        settings.rewards.top_n
    );

    // 4. Initialize database
    let db = database::create_connection()
        .await
        .inspect_err(|e| error!("Failed to connect to database: {}", e))?;
    database::create_tables(&db)
        .await
        .inspect(|_| info!("Database initialized successfully."))
        .inspect_err(|e| error!("Failed to initialize database: {}", e))?;

    // 5. Run the reward jobs until Ctrl-C
    let jobs = scheduler::spawn_reward_jobs(
        Arc::new(db),
        settings.rewards.clone(),
        settings.ledger.max_conflict_retries,
        true,
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested, waiting for reward jobs to finish");
    jobs.shutdown().await;
    info!("Stopped.");

    Ok(())
}
