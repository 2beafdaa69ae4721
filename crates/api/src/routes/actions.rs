//! Direct action execution, bypassing classification.

use crate::{coded_reply, AppState};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use rusty_dialogue_common::{AssistantError, Classification};
use rusty_dialogue_core::ActionParams;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, warn};

#[derive(Debug, Deserialize)]
pub struct RunActionRequest {
    pub skill_action: Option<String>,
    #[serde(default)]
    pub action_params: ActionParams,
}

#[derive(Debug, Deserialize)]
pub struct FetchWidgetQuery {
    pub skill_action: Option<String>,
    pub widget_id: Option<String>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/run-action", post(run_action))
        .route("/fetch-widget", get(fetch_widget))
}

/// `domain:skill:action`
pub fn parse_skill_action(value: &str) -> Option<Classification> {
    if value.contains('.') {
        return None;
    }
    Classification::from_label(&value.replace(':', "."), 1.0)
}

fn resolve_action(state: &AppState, skill_action: &str) -> Option<Classification> {
    parse_skill_action(skill_action).filter(|classification| state.core.action_exists(classification))
}

async fn run_action(State(state): State<AppState>, Json(request): Json<RunActionRequest>) -> Response {
    let Some(skill_action) = request.skill_action.filter(|value| !value.is_empty()) else {
        return coded_reply(
            StatusCode::BAD_REQUEST,
            "missing_params",
            "Missing skill_action parameter.",
            json!({}),
        );
    };
    let Some(classification) = resolve_action(&state, &skill_action) else {
        warn!("Rejected skill action {}", skill_action);
        return coded_reply(
            StatusCode::BAD_REQUEST,
            "skill_action_not_valid",
            format!("The skill action \"{}\" is not valid.", skill_action),
            json!({}),
        );
    };

    info!("Running {} on request", classification.label());
    match state.core.run_action(classification, request.action_params).await {
        Ok(result) => coded_reply(
            StatusCode::OK,
            "action_executed",
            "Action executed successfully.",
            json!({ "result": result }),
        ),
        Err(e @ (AssistantError::SkillBusy | AssistantError::SkillProcess(_) | AssistantError::MalformedOutput(_))) => {
            warn!("Action {} not executed: {}", skill_action, e);
            let status = if matches!(e, AssistantError::SkillBusy) {
                StatusCode::CONFLICT
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            coded_reply(status, "action_not_executed", e.to_string(), json!({}))
        }
        Err(e) => {
            error!("Failed to run action {}: {}", skill_action, e);
            coded_reply(
                StatusCode::INTERNAL_SERVER_ERROR,
                "run_action_error",
                format!("Failed to run the action: {}", e),
                json!({}),
            )
        }
    }
}

async fn fetch_widget(State(state): State<AppState>, Query(query): Query<FetchWidgetQuery>) -> Response {
    let (Some(skill_action), Some(widget_id)) = (
        query.skill_action.filter(|value| !value.is_empty()),
        query.widget_id.filter(|value| !value.is_empty()),
    ) else {
        return coded_reply(
            StatusCode::BAD_REQUEST,
            "missing_params",
            "Missing skill_action or widget_id parameter.",
            json!({}),
        );
    };
    let Some(classification) = resolve_action(&state, &skill_action) else {
        warn!("Rejected skill action {}", skill_action);
        return coded_reply(
            StatusCode::BAD_REQUEST,
            "skill_action_not_valid",
            format!("The skill action \"{}\" is not valid.", skill_action),
            json!({}),
        );
    };

    match state.core.fetch_widget(classification, &widget_id).await {
        Ok(Some(widget)) => coded_reply(
            StatusCode::OK,
            "widget_fetched",
            "Widget fetched successfully.",
            json!({ "widget": widget }),
        ),
        Ok(None) => coded_reply(
            StatusCode::NOT_FOUND,
            "widget_not_fetched",
            format!("No widget {} returned by {}.", widget_id, skill_action),
            json!({ "widget": null }),
        ),
        Err(e) => {
            error!("Failed to fetch widget {}: {}", widget_id, e);
            coded_reply(
                StatusCode::INTERNAL_SERVER_ERROR,
                "fetch_widget_error",
                format!("Failed to fetch the widget: {}", e),
                json!({}),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::app_state;
    use axum::{body::Body, http::Request};
    use tower::ServiceExt;

    async fn send(request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let dir = tempfile::tempdir().unwrap();
        let app = routes().with_state(app_state(&dir).await);
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    fn run_action_request(body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/run-action")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[test]
    fn test_parse_skill_action() {
        assert_eq!(
            parse_skill_action("social:greeting:hello"),
            Some(Classification::new("social", "greeting", "hello", 1.0))
        );
        assert_eq!(parse_skill_action("social:greeting"), None);
        assert_eq!(parse_skill_action("social.greeting.hello"), None);
        assert_eq!(parse_skill_action("social::hello"), None);
    }

    #[tokio::test]
    async fn test_run_action_executes_dialog() {
        let (status, body) = send(run_action_request(json!({
            "skill_action": "social:greeting:hello",
            "action_params": { "utterance": "hello" }
        })))
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["code"], "action_executed");
        assert_eq!(body["result"]["answers"], json!(["Hello from the greeting skill."]));
    }

    #[tokio::test]
    async fn test_run_action_validates_params() {
        let (status, body) = send(run_action_request(json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "missing_params");

        let (status, body) = send(run_action_request(json!({ "skill_action": "social:greeting:wave" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "skill_action_not_valid");
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_fetch_widget() {
        let (status, body) = send(
            Request::builder()
                .uri("/fetch-widget?skill_action=social:greeting:hello")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "missing_params");

        // Dialog actions never return widgets.
        let (status, body) = send(
            Request::builder()
                .uri("/fetch-widget?skill_action=social:greeting:hello&widget_id=timer-1")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "widget_not_fetched");
    }
}
