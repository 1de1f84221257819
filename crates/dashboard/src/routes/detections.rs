//! Detection timeline, per-class counts and archived detections

use axum::extract::{Query, State};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use storage::{ArchivedDetection, TimelineBucket};

use super::ApiError;
use crate::AppState;

const MAX_BUCKETS: usize = 288;
const MAX_BUCKET_MINUTES: u32 = 1440;

/// Query parameters for the timeline endpoint
#[derive(Debug, Deserialize)]
pub struct TimelineQuery {
    #[serde(default = "default_bucket_minutes")]
    pub bucket_minutes: u32,
    #[serde(default = "default_buckets")]
    pub buckets: usize,
}

fn default_bucket_minutes() -> u32 {
    1
}

fn default_buckets() -> usize {
    10
}

#[derive(Debug, Serialize)]
pub struct TimelineResponse {
    pub bucket_minutes: u32,
    pub priority_class: String,
    pub data: Vec<TimelineBucket>,
}

/// Query parameters for the saved detections endpoint
#[derive(Debug, Deserialize)]
pub struct SavedQuery {
    #[serde(default = "default_saved_limit")]
    pub limit: usize,
    /// Class label; defaults to the priority class, `*` lists every class
    pub class: Option<String>,
}

fn default_saved_limit() -> usize {
    4
}

#[derive(Debug, Serialize)]
pub struct SavedResponse {
    pub class: Option<String>,
    pub data: Vec<ArchivedDetection>,
    pub count: usize,
}

pub async fn timeline(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TimelineQuery>,
) -> Result<Json<TimelineResponse>, ApiError> {
    let bucket_minutes = params.bucket_minutes.clamp(1, MAX_BUCKET_MINUTES);
    let buckets = params.buckets.clamp(1, MAX_BUCKETS);
    let data = state.history.timeline(Utc::now(), bucket_minutes, buckets)?;

    Ok(Json(TimelineResponse {
        bucket_minutes,
        priority_class: state.priority_label.clone(),
        data,
    }))
}

pub async fn saved(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SavedQuery>,
) -> Result<Json<SavedResponse>, ApiError> {
    let class = match params.class.as_deref() {
        Some("*") => None,
        Some(label) => Some(label.to_string()),
        None => Some(state.priority_label.clone()),
    };

    let store = state.artifacts.clone();
    let filter = class.clone();
    let data =
        tokio::task::spawn_blocking(move || store.list_archived(filter.as_deref(), params.limit))
            .await??;

    Ok(Json(SavedResponse {
        class,
        count: data.len(),
        data,
    }))
}

/// Detections per class since startup
pub async fn counts(State(state): State<Arc<AppState>>) -> Json<BTreeMap<String, u64>> {
    Json(state.display.read().await.class_counts.clone())
}
