//! Integration tests for the collector data plane

#[path = "helpers/mod.rs"]
mod helpers;

#[path = "integration/pipeline.rs"]
mod pipeline;

#[path = "integration/scaling.rs"]
mod scaling;

#[path = "integration/failure_scenarios.rs"]
mod failure_scenarios;

#[cfg(feature = "storage-sqlite")]
#[path = "integration/storage_persistence.rs"]
mod storage_persistence;

#[cfg(feature = "api")]
#[path = "integration/api_endpoints.rs"]
mod api_endpoints;
