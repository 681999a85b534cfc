mod cache;
mod config;
mod errors;
mod knowledge;
mod llm_client;
mod models;
mod pipeline;
mod routes;
mod state;

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::cache::{MemoryCache, PipelineCache, RedisCache, DEFAULT_TTL_SECS};
use crate::config::Config;
use crate::knowledge::{InMemoryKnowledgeBase, KnowledgeBase};
use crate::llm_client::AnthropicModel;
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Placement API v{}", env!("CARGO_PKG_VERSION"));

    // Load the profile knowledge base (read-only for the life of the process)
    let kb = InMemoryKnowledgeBase::load(&config.pkb_path)?;
    info!(
        "Knowledge base {} loaded from {} ({} roles, {} facts)",
        kb.version(),
        config.pkb_path.display(),
        kb.roles().len(),
        kb.facts().len()
    );

    // Initialize cache: Redis when configured, in-process otherwise
    let cache: Arc<dyn PipelineCache> = match &config.redis_url {
        Some(url) => match RedisCache::connect(url, DEFAULT_TTL_SECS).await {
            Ok(redis) => {
                info!("Redis cache connected");
                Arc::new(redis)
            }
            Err(e) => {
                warn!("Redis unavailable ({e}); falling back to in-process cache");
                Arc::new(MemoryCache::new())
            }
        },
        None => Arc::new(MemoryCache::new()),
    };

    // Initialize LLM client
    let llm = AnthropicModel::new(config.anthropic_api_key.clone())?;
    info!("LLM client initialized (model: {})", llm_client::MODEL);

    let state = AppState {
        model: Arc::new(llm),
        kb: Arc::new(kb),
        cache,
        config: config.clone(),
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
