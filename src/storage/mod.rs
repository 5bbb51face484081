//! Monitoring stores for flushed aggregates
//!
//! This module provides a trait-based abstraction over the external
//! time-series store the collector writes into.
//!
//! ## Design
//!
//! - **Trait-based**: `MonitoringStore` allows swapping implementations
//! - **Async**: All operations are async for compatibility with Tokio actors
//! - **Idempotent writes**: windows are upserted by key so flush retries are safe
//!
//! ## Backends
//!
//! - **SQLite** (default feature): Embedded database
//! - **In-Memory**: No persistence, for tests or API-only deployments
//!
//! ## Usage
//!
//! ```no_run
//! use guardia_collector::storage::{MonitoringStore, sqlite::SqliteStore};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = SqliteStore::new("./collector.db").await?;
//!     store.reset().await?;
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod error;
pub mod memory;
pub mod schema;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

use std::sync::Arc;

pub use backend::{HealthStatus, MonitoringStore, WindowQuery};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryStore;

use crate::config::StorageConfig;

/// Build the store described by the configuration
pub async fn open_store(config: &StorageConfig) -> StorageResult<Arc<dyn MonitoringStore>> {
    match config {
        StorageConfig::None => Ok(Arc::new(MemoryStore::new())),
        #[cfg(feature = "storage-sqlite")]
        StorageConfig::Sqlite { path } => Ok(Arc::new(sqlite::SqliteStore::new(path).await?)),
        #[cfg(not(feature = "storage-sqlite"))]
        StorageConfig::Sqlite { .. } => Err(StorageError::ConnectionFailed(
            "built without the storage-sqlite feature".to_string(),
        )),
    }
}
