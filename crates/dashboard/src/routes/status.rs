//! Health, status and metrics routes

use alerting::AlertLatchState;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use indicator::IndicatorStatus;
use orchestrator::OrchestratorState;
use serde::Serialize;
use std::sync::Arc;

use crate::AppState;

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub version: String,
    pub uptime_seconds: u64,
    pub components: ComponentStatus,
}

#[derive(Debug, Serialize)]
pub struct ComponentStatus {
    pub detection: ComponentHealth,
    pub display: ComponentHealth,
}

/// Individual component health
#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    pub status: String,
    pub last_activity_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub state: OrchestratorState,
    pub running: bool,
    pub worker_generation: u64,
    pub last_success: Option<DateTime<Utc>>,
    pub indicator: IndicatorStatus,
    pub alert: AlertLatchState,
    pub results_received: u64,
    pub pipeline: String,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let now = Utc::now();
    let orchestrator = &state.orchestrator;

    let detection_status = match orchestrator.state() {
        OrchestratorState::Running => "ok",
        OrchestratorState::Paused => "paused",
        OrchestratorState::Stopping => "stopping",
        OrchestratorState::Stopped => "stopped",
    };
    let last_activity_ms = orchestrator
        .last_success()
        .map(|t| (now - t).num_milliseconds().max(0) as u64);
    let received = state.display.read().await.received;

    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: now,
        version: state.version.clone(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        components: ComponentStatus {
            detection: ComponentHealth {
                status: detection_status.to_string(),
                last_activity_ms,
            },
            display: ComponentHealth {
                status: if received > 0 { "ok" } else { "waiting" }.to_string(),
                last_activity_ms: None,
            },
        },
    })
}

pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let orchestrator = &state.orchestrator;
    let pipeline = orchestrator.pipeline();

    Json(StatusResponse {
        state: orchestrator.state(),
        running: orchestrator.is_running(),
        worker_generation: orchestrator.worker_generation(),
        last_success: orchestrator.last_success(),
        indicator: pipeline.indicator.status(),
        alert: pipeline.alert_latch.state(),
        results_received: state.display.read().await.received,
        pipeline: pipeline.describe(),
    })
}

/// Prometheus text exposition
pub async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics recorder not installed").into_response(),
    }
}
