use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use super::app_state::AppState;
use crate::engine::snapshot::Snapshot;

pub const LIVENESS_TEXT: &str = "guildstat is running";
pub const NOT_READY_MESSAGE: &str = "Data is not ready yet";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse<'a> {
    pub ok: bool,
    /// Milliseconds since the Unix epoch.
    pub updated_at: i64,
    #[serde(flatten)]
    pub snapshot: &'a Snapshot,
}

#[derive(Serialize)]
pub struct NotReadyResponse {
    pub ok: bool,
    pub message: &'static str,
}

/// `GET /`: always answers, whatever the cache holds.
pub async fn liveness() -> &'static str {
    LIVENESS_TEXT
}

/// `GET /status`: the latest snapshot, or 503 before the first refresh lands.
pub async fn get_status(State(state): State<Arc<AppState>>) -> Response {
    let Some(cached) = state.cache.current() else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(NotReadyResponse {
                ok: false,
                message: NOT_READY_MESSAGE,
            }),
        )
            .into_response();
    };

    Json(StatusResponse {
        ok: true,
        updated_at: cached.updated_at.timestamp_millis(),
        snapshot: &cached.snapshot,
    })
    .into_response()
}
