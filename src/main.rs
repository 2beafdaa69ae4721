use anyhow::{Context, Result};
use rusty_dialogue_api::{ApiConfig, ApiServer, WebSocketManager};
use rusty_dialogue_core::{load_settings, AssistantCore};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "rusty_dialogue=debug,tower_http=debug".into());
    let registry = tracing_subscriber::registry().with(filter);

    if std::env::var("LOG_FORMAT").is_ok_and(|format| format == "json") {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    info!("Starting dialogue runtime v{}", rusty_dialogue_core::VERSION);

    let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string());
    let settings = load_settings(&config_dir).context("failed to load settings")?;
    let api_config = ApiConfig::from(&settings.server);

    // Every output event of the core goes out through the websocket clients.
    let websocket = Arc::new(WebSocketManager::new());
    let core = Arc::new(
        AssistantCore::new(settings, websocket.clone())
            .await
            .context("failed to build the assistant core")?,
    );
    core.initialize().await.context("failed to initialize the assistant core")?;

    let server = ApiServer::new(api_config, core.clone(), websocket);
    if let Err(e) = server.start().await {
        error!("API server error: {}", e);
    }

    core.shutdown().await.context("failed to shut down cleanly")?;
    info!("Dialogue runtime stopped");
    Ok(())
}
