//! Operator controls: detection start/stop, indicator and alert arming

use alerting::AlertLatchState;
use axum::extract::State;
use axum::Json;
use indicator::IndicatorStatus;
use orchestrator::OrchestratorState;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use super::ApiError;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct DetectionStateResponse {
    pub state: OrchestratorState,
    pub worker_generation: u64,
}

#[derive(Debug, Deserialize)]
pub struct IndicatorRequest {
    pub enabled: bool,
}

#[derive(Debug, Deserialize)]
pub struct AlertRequest {
    pub armed: bool,
}

fn detection_state(state: &AppState) -> DetectionStateResponse {
    DetectionStateResponse {
        state: state.orchestrator.state(),
        worker_generation: state.orchestrator.worker_generation(),
    }
}

pub async fn start_detection(
    State(state): State<Arc<AppState>>,
) -> Result<Json<DetectionStateResponse>, ApiError> {
    info!("Start requested via API");
    state.orchestrator.start()?;
    Ok(Json(detection_state(&state)))
}

pub async fn stop_detection(State(state): State<Arc<AppState>>) -> Json<DetectionStateResponse> {
    info!("Stop requested via API");
    state.orchestrator.stop();
    Json(detection_state(&state))
}

pub async fn set_indicator(
    State(state): State<Arc<AppState>>,
    Json(request): Json<IndicatorRequest>,
) -> Json<IndicatorStatus> {
    let indicator = &state.orchestrator.pipeline().indicator;
    indicator.set_enabled(request.enabled);
    Json(indicator.status())
}

pub async fn set_alert(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AlertRequest>,
) -> Json<AlertLatchState> {
    let latch = &state.orchestrator.pipeline().alert_latch;
    latch.set_armed(request.armed);
    Json(latch.state())
}
