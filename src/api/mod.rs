//! Management API for a running collector
//!
//! ## Endpoints
//!
//! - `GET /api/v1/health` - Health check (includes the store)
//! - `GET /api/v1/status` - Pool size, queue fill, counters and actor stats
//! - `GET /api/v1/windows` - Aggregation windows currently open
//! - `POST /api/v1/scale` - Resize the worker pool by `{"delta": n}`
//! - `POST /api/v1/flush` - Run an aggregation tick immediately
//! - `POST /api/v1/alerts/mute` - Mute alert dispatch for `{"duration_secs": n}`
//! - `DELETE /api/v1/alerts/mute` - Resume alert dispatch
//! - `GET /api/v1/handlers[?kind=]` - List notification handlers
//! - `POST /api/v1/handlers/{kind}` - Register a handler
//! - `GET|PUT|DELETE /api/v1/handlers/{kind}/{name}` - Manage one handler
//!
//! When a secret is configured every request must carry it in the
//! `X-COLLECTOR-SECRET` header.

#[cfg(feature = "api")]
pub mod error;
#[cfg(feature = "api")]
pub mod middleware;
#[cfg(feature = "api")]
pub mod routes;
#[cfg(feature = "api")]
pub mod state;
#[cfg(feature = "api")]
pub mod types;

#[cfg(feature = "api")]
pub use error::{ApiError, ApiResult};
#[cfg(feature = "api")]
pub use state::ApiState;

#[cfg(feature = "api")]
use axum::{
    Router,
    routing::{get, post},
};
#[cfg(feature = "api")]
use std::net::SocketAddr;
#[cfg(feature = "api")]
use tracing::info;

#[cfg(feature = "api")]
use crate::config::ApiSettings;

/// Build the API router with every route and layer
#[cfg(feature = "api")]
pub fn router(settings: &ApiSettings, state: ApiState) -> Router {
    use tower_http::cors::{Any, CorsLayer};
    use tower_http::trace::TraceLayer;

    let mut app = Router::new()
        .route("/api/v1/health", get(routes::health::health_check))
        .route("/api/v1/status", get(routes::pipeline::get_status))
        .route("/api/v1/windows", get(routes::pipeline::list_windows))
        .route("/api/v1/scale", post(routes::pipeline::scale))
        .route("/api/v1/flush", post(routes::pipeline::flush))
        .route(
            "/api/v1/alerts/mute",
            post(routes::alerts::mute_alerts).delete(routes::alerts::unmute_alerts),
        )
        .route("/api/v1/handlers", get(routes::handlers::list_handlers))
        .route(
            "/api/v1/handlers/:kind",
            post(routes::handlers::create_handler),
        )
        .route(
            "/api/v1/handlers/:kind/:name",
            get(routes::handlers::get_handler)
                .put(routes::handlers::update_handler)
                .delete(routes::handlers::delete_handler),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if settings.enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        app = app.layer(cors);
    }

    if let Some(secret) = settings.auth_token.clone() {
        app = app.layer(axum::middleware::from_fn_with_state(
            secret,
            middleware::auth::auth_middleware,
        ));
    }

    app
}

/// Spawn the API server
///
/// Binds `settings.bind` and serves in a background task. Returns the bound
/// address together with the server task.
#[cfg(feature = "api")]
pub async fn spawn_api_server(
    settings: &ApiSettings,
    state: ApiState,
) -> anyhow::Result<(SocketAddr, tokio::task::JoinHandle<()>)> {
    use anyhow::Context;

    info!("starting API server on {}", settings.bind);

    let app = router(settings, state);

    let listener = tokio::net::TcpListener::bind(settings.bind)
        .await
        .with_context(|| format!("failed to bind API server to {}", settings.bind))?;
    let addr = listener.local_addr()?;

    info!("API server listening on {addr}");

    let task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("API server error: {e}");
        }
    });

    Ok((addr, task))
}
