//! Health check endpoint

use axum::{Json, extract::State};

use crate::api::{state::ApiState, types::HealthResponse};

/// GET /api/v1/health
///
/// Always answers 200; a store that cannot be reached reports "degraded".
pub async fn health_check(State(state): State<ApiState>) -> Json<HealthResponse> {
    let (status, store) = match state.control.store().health_check().await {
        Ok(health) if health.healthy => ("ok", health.message),
        Ok(health) => ("degraded", health.message),
        Err(e) => ("degraded", e.to_string()),
    };

    Json(HealthResponse {
        status: status.to_string(),
        store,
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}
