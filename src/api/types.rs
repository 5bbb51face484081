//! Request and response bodies of the management API

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::notify::HandlerInfo;
use crate::window::AggregationWindow;

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// "ok" when the store is reachable, "degraded" otherwise
    pub status: String,
    pub store: String,
    pub timestamp: String,
}

/// Body of `POST /api/v1/scale`
#[derive(Debug, Serialize, Deserialize)]
pub struct ScaleRequest {
    /// Workers to add (positive) or remove (negative)
    pub delta: isize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ScaleResponse {
    pub pool_size: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WindowsResponse {
    pub windows: Vec<AggregationWindow>,
    pub total: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HandlersResponse {
    pub handlers: Vec<HandlerInfo>,
    pub total: usize,
}

/// Body of `POST /api/v1/alerts/mute`
#[derive(Debug, Serialize, Deserialize)]
pub struct MuteRequest {
    pub duration_secs: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MuteResponse {
    pub muted_until: Option<DateTime<Utc>>,
}
