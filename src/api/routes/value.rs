//! Metric lookup endpoints

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
};

use crate::{
    Metric,
    api::{error::ApiResult, state::ApiState},
};

/// GET /value/:type/:name
///
/// Plain-text value, 404 if the metric does not exist
pub async fn value_plain(
    State(state): State<ApiState>,
    Path((kind, name)): Path<(String, String)>,
) -> ApiResult<String> {
    Ok(state.metrics.get_metric(&kind, &name).await?)
}

/// POST /value/
pub async fn value_json(
    State(state): State<ApiState>,
    payload: Result<Json<Metric>, JsonRejection>,
) -> ApiResult<Json<Metric>> {
    let Json(query) = payload?;
    Ok(Json(state.metrics.get_metric_json(query).await?))
}
