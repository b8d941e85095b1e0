use std::time::Duration;

use tracing::{info, warn};

use response_resolver::agent::build_backend_chain;
use response_resolver::agent::local::ModelCache;
use response_resolver::config::AppConfig;
use response_resolver::routes::router;
use response_resolver::service::chat_service::{ChatService, GenerationDefaults};
use response_resolver::store::session_store::SessionStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present (development convenience)
    dotenvy::dotenv().ok();

    // Initialise tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "response_resolver=debug,tower_http=debug".into()),
        )
        .init();

    let config = AppConfig::from_env()?;

    // ── Backend chain ─────────────────────────────────────────────────────────
    let chain = build_backend_chain(&config, ModelCache::global());
    if chain.is_empty() {
        warn!("No generation backend configured; chat requests will be rejected until one is");
    }

    // ── Sessions ──────────────────────────────────────────────────────────────
    let sessions = SessionStore::new();
    let idle = config.session_idle_timeout;
    sessions.spawn_idle_sweeper(idle, (idle / 4).max(Duration::from_secs(1)));

    let chat_service = ChatService::new(
        sessions,
        chain,
        GenerationDefaults {
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            max_message_length: config.max_message_length,
        },
    );

    // ── Listen ────────────────────────────────────────────────────────────────
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on http://{addr}/");

    axum::serve(listener, router(chat_service)).await?;
    Ok(())
}
