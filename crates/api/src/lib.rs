pub mod error;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod websocket;

#[cfg(test)]
pub(crate) mod testing;

use axum::{http::StatusCode, response::IntoResponse, response::Response, Json};
use rusty_dialogue_common::ApiResponse;
use rusty_dialogue_core::{config::ServerSettings, AssistantCore};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

pub use server::ApiServer;
pub use websocket::WebSocketManager;

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub enable_websockets: bool,
    pub api_prefix: String,
    pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        ApiConfig::from(&ServerSettings::default())
    }
}

impl From<&ServerSettings> for ApiConfig {
    fn from(settings: &ServerSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            cors_origins: settings.cors_origins.clone(),
            enable_websockets: settings.enable_websocket,
            api_prefix: settings.api_prefix.clone(),
            request_timeout_secs: settings.request_timeout_secs,
        }
    }
}

/// Shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub core: Arc<AssistantCore>,
    pub websocket: Arc<WebSocketManager>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(core: Arc<AssistantCore>, websocket: Arc<WebSocketManager>) -> Self {
        Self {
            core,
            websocket,
            started_at: Instant::now(),
        }
    }
}

pub fn create_success_response<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse::success(data))
}

/// `{success, status, code, message, ...}` reply used by the action and
/// inference endpoints.
#[derive(Debug, Serialize)]
pub struct CodedReply<T: Serialize> {
    pub success: bool,
    pub status: u16,
    pub code: &'static str,
    pub message: String,
    #[serde(flatten)]
    pub payload: T,
}

pub fn coded_reply<T: Serialize>(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
    payload: T,
) -> Response {
    let reply = CodedReply {
        success: status.is_success(),
        status: status.as_u16(),
        code,
        message: message.into(),
        payload,
    };
    (status, Json(reply)).into_response()
}
