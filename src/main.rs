use axum::routing::{get, post};
use axum::Router;
use tracing_subscriber::EnvFilter;

use doc_qa::api;
use doc_qa::config::Config;
use doc_qa::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();
    tracing::info!("Data directory: {}", config.data_dir.display());
    tracing::info!(
        "LLM provider: {} ({})",
        config.llm.provider,
        config.llm.base_url
    );
    if config.web.enabled {
        tracing::info!("Web fallback enabled (daily quota {})", config.web.daily_quota);
    }

    let state = AppState::new(config.clone())?;

    let app = Router::new()
        .route("/api/ask", post(api::ask::ask))
        .route("/api/ask/stream", post(api::ask::ask_stream))
        .route("/api/metadata", get(api::ask::metadata))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}
