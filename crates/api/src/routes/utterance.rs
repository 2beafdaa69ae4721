use crate::{
    create_success_response,
    error::{validation_error, ApiResult},
    AppState,
};
use axum::{extract::State, routing::post, Json, Router};
use rusty_dialogue_common::ApiResponse;
use rusty_dialogue_core::TurnResult;
use serde::Deserialize;
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
pub struct UtteranceRequest {
    pub utterance: String,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/utterance", post(process_utterance))
}

/// One text turn; answers are also pushed to websocket clients.
async fn process_utterance(
    State(state): State<AppState>,
    Json(request): Json<UtteranceRequest>,
) -> ApiResult<Json<ApiResponse<TurnResult>>> {
    let utterance = request.utterance.trim();
    if utterance.is_empty() {
        return Err(validation_error("Utterance cannot be empty"));
    }
    debug!("Text turn: {}", utterance);

    let result = state.core.process_utterance(utterance).await?;
    info!(
        "Turn \"{}\" finished as {:?} in {} ms",
        utterance, result.outcome, result.processing_time_ms
    );

    Ok(create_success_response(result))
}
