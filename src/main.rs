use clap::Parser;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use portal_guard::{
    Config,
    auth::build_security_chain,
    config::SecuritySettings,
    handlers::{AppState, create_router},
    store::{InMemoryStudyStore, StudyStore},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Security configuration errors are fatal; nothing is served until the chain is bound.
    let settings = SecuritySettings::from_config(&config)?;
    let security = Arc::new(build_security_chain(&settings).await?);
    tracing::info!("Authentication mode: {}", security.mode());

    let store: Arc<dyn StudyStore> = match &config.studies_file {
        Some(path) => Arc::new(InMemoryStudyStore::from_json_file(path).await?),
        None => {
            tracing::warn!("No studies file configured; serving an empty catalog");
            Arc::new(InMemoryStudyStore::empty())
        }
    };

    let secure_cookies = config.effective_base_url().starts_with("https://");
    let state = AppState::new(store, security, &settings, secure_cookies);

    let app = create_router(state);
    let app = if config.cors {
        app.layer(CorsLayer::permissive())
    } else {
        app
    };

    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!("Starting portal-guard on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
