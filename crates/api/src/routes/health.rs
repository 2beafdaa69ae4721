use crate::{create_success_response, AppState};
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use rusty_dialogue_common::ApiResponse;
use serde::Serialize;
use serde_json::json;
use tracing::debug;

#[derive(Debug, Serialize)]
pub struct HealthCheck {
    pub status: String,
    pub version: String,
    pub uptime: u64,
    pub services: ServiceHealth,
}

#[derive(Debug, Serialize)]
pub struct ServiceHealth {
    pub skills: String,
    pub llm: String,
    pub websocket_connections: usize,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/live", get(liveness_check))
}

async fn health_check(State(state): State<AppState>) -> Json<ApiResponse<HealthCheck>> {
    debug!("Health check requested");

    let health = HealthCheck {
        status: "healthy".to_string(),
        version: rusty_dialogue_core::VERSION.to_string(),
        uptime: state.started_at.elapsed().as_secs(),
        services: ServiceHealth {
            skills: skills_health(&state).to_string(),
            llm: llm_health(&state).to_string(),
            websocket_connections: state.websocket.active_connections(),
        },
    };

    create_success_response(health)
}

/// Not ready until at least one skill is registered.
async fn readiness_check(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    debug!("Readiness check requested");

    let skills = skills_health(&state);
    let status = if skills == "ready" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if status.is_success() { "ready" } else { "not_ready" },
            "timestamp": chrono::Utc::now(),
            "checks": {
                "skills": skills,
                "llm": llm_health(&state)
            }
        })),
    )
}

async fn liveness_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    debug!("Liveness check requested");

    Json(json!({
        "status": "alive",
        "timestamp": chrono::Utc::now(),
        "uptime_seconds": state.started_at.elapsed().as_secs()
    }))
}

fn skills_health(state: &AppState) -> &'static str {
    if state.core.skill_count() > 0 {
        "ready"
    } else {
        "not_ready"
    }
}

fn llm_health(state: &AppState) -> &'static str {
    if state.core.llm().is_enabled() {
        "ready"
    } else {
        "disabled"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::app_state;
    use axum::{body::Body, http::Request};
    use tower::ServiceExt;

    async fn request(uri: &str) -> axum::response::Response {
        let dir = tempfile::tempdir().unwrap();
        let app = routes().with_state(app_state(&dir).await);
        app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_check() {
        let response = request("/").await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["data"]["services"]["skills"], "ready");
        assert_eq!(value["data"]["services"]["llm"], "disabled");
    }

    #[tokio::test]
    async fn test_readiness_check() {
        assert_eq!(request("/ready").await.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_liveness_check() {
        assert_eq!(request("/live").await.status(), StatusCode::OK);
    }
}
