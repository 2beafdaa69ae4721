use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rusty_dialogue_common::AssistantError;
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Core service error: {0}")]
    CoreService(#[from] AssistantError),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ApiError {
    fn parts(&self) -> (StatusCode, String, &'static str) {
        match self {
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone(), "VALIDATION_ERROR"),
            ApiError::WebSocket(msg) => (StatusCode::BAD_REQUEST, msg.clone(), "WEBSOCKET_ERROR"),
            ApiError::CoreService(err) => match err {
                AssistantError::TurnInProgress => (StatusCode::CONFLICT, err.to_string(), "TURN_IN_PROGRESS"),
                AssistantError::SkillBusy => (StatusCode::CONFLICT, err.to_string(), "SKILL_BUSY"),
                AssistantError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone(), "NOT_FOUND"),
                AssistantError::LanguageUnsupported(lang) => (
                    StatusCode::BAD_REQUEST,
                    format!("Language {} is not supported", lang),
                    "LANGUAGE_NOT_SUPPORTED",
                ),
                AssistantError::CompletionTimeout { .. } => {
                    (StatusCode::GATEWAY_TIMEOUT, err.to_string(), "COMPLETION_TIMEOUT")
                }
                AssistantError::Transport(_) => (StatusCode::BAD_GATEWAY, err.to_string(), "TRANSPORT_ERROR"),
                AssistantError::Configuration(_) => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Service not configured".to_string(),
                    "CONFIGURATION_ERROR",
                ),
                _ => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    "INTERNAL_ERROR",
                ),
            },
            ApiError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
                "INTERNAL_ERROR",
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message, error_code) = self.parts();
        if status.is_server_error() {
            error!("{}", self);
        } else {
            warn!("{}", self);
        }

        let response_body = json!({
            "success": false,
            "error": error_message,
            "error_code": error_code,
            "timestamp": chrono::Utc::now()
        });

        (status, Json(response_body)).into_response()
    }
}

pub fn validation_error(message: &str) -> ApiError {
    ApiError::Validation(message.to_string())
}

pub type ApiResult<T> = Result<T, ApiError>;
