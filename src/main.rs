use axum::routing::{get, post};
use axum::Router;
use tracing_subscriber::EnvFilter;

use repo_mentor::api;
use repo_mentor::config::Config;
use repo_mentor::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
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

    let state = AppState::new(config.clone())?;

    let app = Router::new()
        .route("/repository", post(api::repos::create_repo))
        .route("/repository", get(api::repos::list_repos))
        .route("/repository/{job_id}", get(api::repos::get_repo))
        .route("/chat", post(api::chat::chat))
        .route("/chat/stream", post(api::chat::chat_stream))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}
