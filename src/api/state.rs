//! API shared state

use crate::manager::CollectorControl;

/// Shared state passed to all API handlers
#[derive(Clone)]
pub struct ApiState {
    /// Handles onto the running collector
    pub control: CollectorControl,
}

impl ApiState {
    pub fn new(control: CollectorControl) -> Self {
        Self { control }
    }
}
