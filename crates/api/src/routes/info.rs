use crate::{create_success_response, AppState};
use axum::{extract::State, routing::get, Json, Router};
use rusty_dialogue_common::ApiResponse;
use rusty_dialogue_core::CoreInfo;
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InfoResponse {
    #[serde(flatten)]
    pub core: CoreInfo,
    pub uptime_seconds: u64,
    pub websocket_connections: usize,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/", get(info))
}

async fn info(State(state): State<AppState>) -> Json<ApiResponse<InfoResponse>> {
    debug!("Info requested");

    create_success_response(InfoResponse {
        core: state.core.info().await,
        uptime_seconds: state.started_at.elapsed().as_secs(),
        websocket_connections: state.websocket.active_connections(),
    })
}
