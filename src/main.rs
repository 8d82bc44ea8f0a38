use std::sync::Arc;

mod app;
mod attachments;
mod auth;
mod config;
mod error;
mod extractors;
mod mailer;
mod state;
mod storage;
mod store;

use crate::{config::AppConfig, state::AppState, store::PgStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "gatekeeper=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let config = Arc::new(AppConfig::from_env()?);
    if config.debug_errors {
        tracing::warn!("DEBUG_ERRORS is on; internal error text will reach clients");
    }

    let store = PgStore::connect(&config).await?;

    // Run migrations if present
    if let Err(e) = sqlx::migrate!("./migrations").run(store.pool()).await {
        tracing::warn!(error = %e, "migrations folder not found or migration failed; continuing");
    }

    let state = AppState::init(config, store).await?;
    app::serve(app::build_app(state)).await
}
