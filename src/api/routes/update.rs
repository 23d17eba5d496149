//! Metric update endpoints

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
};
use tracing::debug;

use crate::{
    Metric,
    api::{error::ApiResult, state::ApiState},
};

/// POST /update/:type/:name/:value
pub async fn update_plain(
    State(state): State<ApiState>,
    Path((kind, name, value)): Path<(String, String, String)>,
) -> ApiResult<StatusCode> {
    state.metrics.update_metric(&kind, &name, &value).await?;
    Ok(StatusCode::OK)
}

/// POST /update/
///
/// Applies one JSON metric and echoes it back with the stored value
pub async fn update_json(
    State(state): State<ApiState>,
    payload: Result<Json<Metric>, JsonRejection>,
) -> ApiResult<Json<Metric>> {
    let Json(metric) = payload?;
    let stored = state.metrics.update_metric_json(metric).await?;
    Ok(Json(stored))
}

/// POST /updates/
///
/// Applies the well-formed items of a JSON array in one atomic batch
pub async fn update_batch(
    State(state): State<ApiState>,
    payload: Result<Json<Vec<Metric>>, JsonRejection>,
) -> ApiResult<StatusCode> {
    let Json(metrics) = payload?;
    let received = metrics.len();
    let applied = state.metrics.update_metrics_batch(metrics).await?;

    debug!("batch update applied {applied} of {received} metrics");
    Ok(StatusCode::OK)
}
