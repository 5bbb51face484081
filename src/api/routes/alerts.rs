//! Alert mute endpoints

use axum::{Json, extract::State, http::StatusCode};

use crate::api::{
    error::{ApiError, ApiResult},
    state::ApiState,
    types::{MuteRequest, MuteResponse},
};

/// POST /api/v1/alerts/mute
pub async fn mute_alerts(
    State(state): State<ApiState>,
    Json(request): Json<MuteRequest>,
) -> ApiResult<Json<MuteResponse>> {
    if request.duration_secs == 0 {
        return Err(ApiError::BadRequest("duration_secs must not be zero".to_string()));
    }

    let muted_until = state
        .control
        .mute_alerts(request.duration_secs)
        .await
        .map_err(|e| ApiError::Unavailable(format!("{e:#}")))?;

    Ok(Json(MuteResponse { muted_until }))
}

/// DELETE /api/v1/alerts/mute
pub async fn unmute_alerts(State(state): State<ApiState>) -> ApiResult<StatusCode> {
    state
        .control
        .unmute_alerts()
        .await
        .map_err(|e| ApiError::Unavailable(format!("{e:#}")))?;

    Ok(StatusCode::NO_CONTENT)
}
