pub mod actions;
pub mod health;
pub mod info;
pub mod llm;
pub mod utterance;

use crate::{middleware::timeout_layer, ApiConfig, AppState};
use axum::Router;

/// Health checks at the root, everything else under the API prefix.
///
/// Only the status routes carry the request timeout. Turns, actions and LLM
/// inference are bounded by their own LLM and skill budgets; cutting them
/// short would drop a turn halfway through its context updates.
pub fn create_routes(config: &ApiConfig) -> Router<AppState> {
    Router::new()
        .nest("/health", bounded(health::routes(), config))
        .nest(&config.api_prefix, api_routes(config))
}

fn api_routes(config: &ApiConfig) -> Router<AppState> {
    bounded(Router::new().nest("/info", info::routes()), config)
        .merge(utterance::routes())
        .merge(actions::routes())
        .merge(llm::routes())
}

fn bounded(routes: Router<AppState>, config: &ApiConfig) -> Router<AppState> {
    routes.layer(timeout_layer(config))
}

pub async fn not_found_handler() -> axum::http::StatusCode {
    axum::http::StatusCode::NOT_FOUND
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::app_state;
    use axum::{body::Body, http, http::StatusCode, routing::get};
    use std::time::Duration;
    use tower::ServiceExt;

    fn config(request_timeout_secs: u64) -> ApiConfig {
        ApiConfig {
            request_timeout_secs,
            ..ApiConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_routes_time_out() {
        let dir = tempfile::tempdir().unwrap();
        let slow = Router::new().route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "done"
            }),
        );
        let app = bounded(slow, &config(1)).with_state(app_state(&dir).await);

        let response = app
            .oneshot(http::Request::builder().uri("/slow").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
    }

    #[tokio::test]
    async fn test_turns_are_not_cut_by_the_request_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_routes(&config(0)).with_state(app_state(&dir).await);

        let response = app
            .oneshot(
                http::Request::builder()
                    .method("POST")
                    .uri("/api/v1/utterance")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"utterance":"hello"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["data"]["outcome"]["type"], "executed");
    }
}
