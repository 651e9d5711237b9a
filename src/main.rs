use anonchat_store::{AppState, Settings};
use dotenv::dotenv;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv().ok();

    // Load configuration
    let config = Settings::new()?;

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    info!(environment = %config.environment, "Configuration loaded successfully");

    if let Err(e) = tokio::fs::create_dir_all(&config.media.cache_dir).await {
        warn!(dir = %config.media.cache_dir.display(), error = %e, "Cannot create media cache directory");
    }

    let (state, report) = AppState::new(config).await?;
    match serde_json::to_string(&report) {
        Ok(json) => info!(report = %json, "Startup migrations finished"),
        Err(e) => error!("Failed to serialize migration report: {}", e),
    }
    if !report.is_clean() {
        warn!(failed = ?report.failed(), "Some migrations failed; they will be retried on next start");
    }

    // State the bot restores into memory on start
    let searching = state.db.get_searching_users().await?;
    info!("Found {} users searching for chat in database", searching.len());
    let active = state.db.get_all_active_chats().await?;
    info!("Found {} active chats in database", active.len());
    let pool = state.db.get_pool_status().await?;
    info!(
        total = pool.total_connections,
        idle = pool.idle_connections,
        "Database ready"
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    state.shutdown().await?;

    Ok(())
}
