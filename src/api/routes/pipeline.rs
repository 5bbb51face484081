//! Pipeline status and control endpoints

use axum::{Json, extract::State};

use crate::actors::messages::TickReport;
use crate::api::{
    error::{ApiError, ApiResult},
    state::ApiState,
    types::{ScaleRequest, ScaleResponse, WindowsResponse},
};
use crate::manager::CollectorStatus;

/// GET /api/v1/status
pub async fn get_status(State(state): State<ApiState>) -> ApiResult<Json<CollectorStatus>> {
    Ok(Json(state.control.status().await?))
}

/// GET /api/v1/windows
///
/// Windows the aggregation scheduler currently holds open
pub async fn list_windows(State(state): State<ApiState>) -> ApiResult<Json<WindowsResponse>> {
    let windows = state
        .control
        .open_windows()
        .await
        .map_err(|e| ApiError::Unavailable(format!("{e:#}")))?;
    let total = windows.len();

    Ok(Json(WindowsResponse { windows, total }))
}

/// POST /api/v1/scale
///
/// Resize the worker pool by `delta`, clamped to the scale policy
pub async fn scale(
    State(state): State<ApiState>,
    Json(request): Json<ScaleRequest>,
) -> ApiResult<Json<ScaleResponse>> {
    if request.delta == 0 {
        return Err(ApiError::BadRequest("delta must not be zero".to_string()));
    }

    let pool_size = state
        .control
        .scale_by(request.delta)
        .await
        .map_err(|e| ApiError::Unavailable(format!("{e:#}")))?;

    Ok(Json(ScaleResponse { pool_size }))
}

/// POST /api/v1/flush
///
/// Run an aggregation tick right away
pub async fn flush(State(state): State<ApiState>) -> ApiResult<Json<TickReport>> {
    let report = state
        .control
        .flush_now()
        .await
        .map_err(|e| ApiError::Unavailable(format!("{e:#}")))?;

    Ok(Json(report))
}
