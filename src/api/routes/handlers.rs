//! Notification handler endpoints

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;

use crate::api::{
    error::{ApiError, ApiResult},
    state::ApiState,
    types::HandlersResponse,
};
use crate::notify::{HandlerInfo, HandlerKind, HandlerRequest};

#[derive(Debug, Deserialize)]
pub struct HandlerQuery {
    kind: Option<String>,
}

/// GET /api/v1/handlers
pub async fn list_handlers(
    State(state): State<ApiState>,
    Query(query): Query<HandlerQuery>,
) -> ApiResult<Json<HandlersResponse>> {
    let kind = query
        .kind
        .as_deref()
        .map(str::parse::<HandlerKind>)
        .transpose()?;

    let handlers = state.control.registry().list(kind).await;
    let total = handlers.len();

    Ok(Json(HandlersResponse { handlers, total }))
}

/// POST /api/v1/handlers/:kind
pub async fn create_handler(
    State(state): State<ApiState>,
    Path(kind): Path<String>,
    Json(request): Json<HandlerRequest>,
) -> ApiResult<(StatusCode, Json<HandlerInfo>)> {
    let kind: HandlerKind = kind.parse()?;
    let info = state.control.registry().create(kind, request).await?;
    Ok((StatusCode::CREATED, Json(info)))
}

/// GET /api/v1/handlers/:kind/:name
pub async fn get_handler(
    State(state): State<ApiState>,
    Path((kind, name)): Path<(String, String)>,
) -> ApiResult<Json<HandlerInfo>> {
    let kind: HandlerKind = kind.parse()?;
    Ok(Json(state.control.registry().get(kind, &name).await?))
}

/// PUT /api/v1/handlers/:kind/:name
///
/// The handler is addressed by the path; a body naming another handler is rejected.
pub async fn update_handler(
    State(state): State<ApiState>,
    Path((kind, name)): Path<(String, String)>,
    Json(request): Json<HandlerRequest>,
) -> ApiResult<Json<HandlerInfo>> {
    let kind: HandlerKind = kind.parse()?;
    if request.name != name {
        return Err(ApiError::BadRequest(format!(
            "body names handler '{}' but path names '{name}'",
            request.name
        )));
    }

    Ok(Json(state.control.registry().update(kind, request).await?))
}

/// DELETE /api/v1/handlers/:kind/:name
pub async fn delete_handler(
    State(state): State<ApiState>,
    Path((kind, name)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let kind: HandlerKind = kind.parse()?;
    state.control.registry().delete(kind, &name).await?;
    Ok(StatusCode::NO_CONTENT)
}
