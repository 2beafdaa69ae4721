use crate::{coded_reply, AppState};
use axum::{extract::State, http::StatusCode, response::Response, routing::post, Json, Router};
use rusty_dialogue_core::LlmInferenceRequest;
use serde_json::json;
use tracing::{error, info};

pub fn routes() -> Router<AppState> {
    Router::new().route("/llm-inference", post(llm_inference))
}

async fn llm_inference(State(state): State<AppState>, Json(request): Json<LlmInferenceRequest>) -> Response {
    if !state.core.llm().is_enabled() {
        return coded_reply(
            StatusCode::BAD_REQUEST,
            "llm_not_enabled",
            "LLM is not enabled.",
            json!({}),
        );
    }
    let Some(duty) = request.duty() else {
        return coded_reply(
            StatusCode::BAD_REQUEST,
            "llm_duty_not_supported",
            format!("LLM duty {} is not supported.", request.duty_type),
            json!({}),
        );
    };

    info!("Executing {} duty on request", request.duty_type);
    match state.core.llm_inference(duty).await {
        Ok(result) => coded_reply(
            StatusCode::OK,
            "llm_duty_executed",
            format!("LLM duty {} executed.", request.duty_type),
            json!({ "output": result }),
        ),
        Err(e) => {
            error!("LLM duty {} failed: {}", request.duty_type, e);
            coded_reply(
                StatusCode::INTERNAL_SERVER_ERROR,
                "llm_duty_execution_error",
                format!("Failed to execute the LLM duty: {}", e),
                json!({}),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{app_state, app_state_with};
    use axum::{body::Body, http::Request};
    use rusty_dialogue_core::LlmProviderKind;
    use tower::ServiceExt;

    fn inference_request(body: &'static str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/llm-inference")
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_inference_requires_enabled_llm() {
        let dir = tempfile::tempdir().unwrap();
        let app = routes().with_state(app_state(&dir).await);

        let response = app
            .oneshot(inference_request(r#"{"dutyType":"paraphrase","input":"hello"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let value = body_json(response).await;
        assert_eq!(value["code"], "llm_not_enabled");
        assert_eq!(value["success"], false);
        assert_eq!(value["status"], 400);
    }

    #[tokio::test]
    async fn test_failed_duty_reports_execution_error() {
        let dir = tempfile::tempdir().unwrap();
        let state = app_state_with(&dir, |settings| {
            settings.llm.enabled = true;
            settings.llm.provider = LlmProviderKind::Remote;
            settings.llm.base_url = "http://127.0.0.1:9/v1".to_string();
            settings.llm.nlg_enabled = false;
            settings.llm.action_recognition_enabled = false;
            settings.llm.warm_up = false;
            settings.llm.timeout_ms = 2_000;
            settings.llm.max_retries = 0;
        })
        .await;
        let app = routes().with_state(state);

        let unsupported = app
            .clone()
            .oneshot(inference_request(r#"{"dutyType":"translation","input":"hello"}"#))
            .await
            .unwrap();
        assert_eq!(unsupported.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(unsupported).await["code"], "llm_duty_not_supported");

        let response = app
            .oneshot(inference_request(r#"{"dutyType":"paraphrase","input":"hello"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let value = body_json(response).await;
        assert_eq!(value["code"], "llm_duty_execution_error");
        assert_eq!(value["success"], false);
    }
}
