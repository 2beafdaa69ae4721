use crate::{
    middleware::{
        cors_layer, request_id_middleware, request_logging_middleware, security_headers_middleware,
    },
    routes::{create_routes, not_found_handler},
    websocket::{websocket_handler, WebSocketManager},
    ApiConfig, AppState,
};
use axum::{routing::get, Router};
use rusty_dialogue_core::AssistantCore;
use std::{net::SocketAddr, sync::Arc};
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

pub struct ApiServer {
    config: ApiConfig,
    state: AppState,
}

impl ApiServer {
    /// `websocket` must be the output channel `core` was built with.
    pub fn new(config: ApiConfig, core: Arc<AssistantCore>, websocket: Arc<WebSocketManager>) -> Self {
        Self {
            config,
            state: AppState::new(core, websocket),
        }
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let app = self.router();
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port).parse()?;

        info!("Starting API server on {}", addr);
        info!("CORS origins: {:?}", self.config.cors_origins);
        info!("WebSocket support: {}", self.config.enable_websockets);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("API server listening on {}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("API server stopped");
        Ok(())
    }

    pub fn router(&self) -> Router {
        let mut app = create_routes(&self.config);
        if self.config.enable_websockets {
            app = app.route("/ws", get(websocket_handler));
        }

        app.fallback(not_found_handler)
            .with_state(self.state.clone())
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(cors_layer(&self.config))
                    .layer(axum::middleware::from_fn(security_headers_middleware))
                    .layer(axum::middleware::from_fn(request_id_middleware))
                    .layer(axum::middleware::from_fn(request_logging_middleware)),
            )
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::app_state;
    use axum::{body::Body, http::Request, http::StatusCode};
    use tower::ServiceExt;

    async fn create_test_server(dir: &tempfile::TempDir) -> ApiServer {
        let state = app_state(dir).await;
        ApiServer::new(ApiConfig::default(), state.core, state.websocket)
    }

    #[tokio::test]
    async fn test_server_creation() {
        let dir = tempfile::tempdir().unwrap();
        let server = create_test_server(&dir).await;
        assert_eq!(server.config().port, 1337);
        assert!(server.config().enable_websockets);
    }

    #[tokio::test]
    async fn test_routes_are_prefixed_and_layered() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_test_server(&dir).await.router();

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/api/v1/info").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
        assert_eq!(response.headers().get("x-content-type-options").unwrap(), "nosniff");

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/health/live").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(Request::builder().uri("/info").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
