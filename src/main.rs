// EcoClub Backend Server
// HTTP API over the engagement store + background badge worker

use anyhow::Result;
use ecoclub_backend::{api, badges, config::Config, database::Database, AppState};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize logging
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("ecoclub_backend=info".parse()?)
        .add_directive("sqlx=warn".parse()?)
        .add_directive("tower_http=info".parse()?);
    let subscriber = tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_env_filter(filter);
    if std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!("Starting EcoClub Backend Server");

    let config = Config::from_env()?;

    info!("Configuration:");
    info!("  Database: {}", config.database_url);
    info!("  Server Port: {}", config.server_port);
    info!(
        "  Pages: default={}, max={}",
        config.pages.default_page_size, config.pages.max_page_size
    );
    info!(
        "  Badge worker: queue={}, workers={}, attempts={}",
        config.badges.queue_capacity, config.badges.workers, config.badges.max_attempts
    );

    // Initialize database
    let db = Database::init(&config.database_url, config.db_max_connections).await?;

    // Start badge worker in background
    let badge_queue = badges::spawn_worker(db.clone(), &config.badges);

    // Create app state
    let state = Arc::new(AppState {
        db,
        badges: badge_queue,
        pages: config.pages,
    });

    let app = api::router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("EcoClub Backend listening on {}", listener.local_addr()?);

    axum::serve(listener, app.into_make_service())
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))
}
