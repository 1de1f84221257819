//! Latest result and log routes

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

#[derive(Debug, Serialize)]
pub struct LogResponse {
    /// Oldest first
    pub lines: Vec<String>,
    pub count: usize,
}

/// Most recent result record; 204 before the first cycle completes
pub async fn latest(State(state): State<Arc<AppState>>) -> Response {
    match &state.display.read().await.latest {
        Some(record) => Json(record).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

pub async fn log(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LogQuery>,
) -> Json<LogResponse> {
    let display = state.display.read().await;
    let skip = display.log.len().saturating_sub(params.limit);
    let lines: Vec<String> = display.log.iter().skip(skip).cloned().collect();

    Json(LogResponse {
        count: lines.len(),
        lines,
    })
}
