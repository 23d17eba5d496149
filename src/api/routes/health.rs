//! Storage liveness endpoint

use std::time::Duration;

use axum::{extract::State, http::StatusCode};

use crate::api::{
    error::{ApiError, ApiResult},
    state::ApiState,
};

/// Upper bound for a single liveness check
const PING_TIMEOUT: Duration = Duration::from_secs(5);

/// GET /ping
///
/// 200 when the storage backend answers, 503 when it is not connected
pub async fn ping(State(state): State<ApiState>) -> ApiResult<StatusCode> {
    match tokio::time::timeout(PING_TIMEOUT, state.metrics.ping()).await {
        Ok(result) => result.map(|_| StatusCode::OK).map_err(ApiError::from),
        Err(_) => Err(ApiError::Unavailable(format!(
            "storage did not answer within {:?}",
            PING_TIMEOUT
        ))),
    }
}
