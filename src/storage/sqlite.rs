//! SQLite monitoring store
//!
//! ## Features
//!
//! - **Embedded**: No separate database server required
//! - **WAL mode**: Readers (management API) do not block the flushing scheduler
//! - **Upserts**: Windows are keyed by `(metric, tags, window_start)` so retried
//!   flushes overwrite instead of duplicating
//! - **Migrations**: Schema versioning with sqlx

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument, warn};

use super::backend::{HealthStatus, MonitoringStore, WindowQuery};
use super::error::{StorageError, StorageResult};
use super::schema::{SampleRow, WindowRow};
use crate::MetricSample;
use crate::window::AggregationWindow;

/// SQLite-backed monitoring store
pub struct SqliteStore {
    pool: Pool<Sqlite>,
    db_path: String,
}

impl SqliteStore {
    /// Open (or create) the database at `db_path` and run migrations
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite store at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;

        info!("SQLite store ready");

        Ok(Self {
            pool,
            db_path: db_path_str,
        })
    }
}

#[async_trait]
impl MonitoringStore for SqliteStore {
    #[instrument(skip_all, fields(metric = %window.metric))]
    async fn write_window(&self, window: &AggregationWindow) -> StorageResult<()> {
        let row = WindowRow::from_window(window)?;

        sqlx::query(
            r#"
            INSERT INTO aggregation_windows (
                metric, tags, window_start, window_end, count, sum, min, max, partial
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (metric, tags, window_start) DO UPDATE SET
                window_end = excluded.window_end,
                count = excluded.count,
                sum = excluded.sum,
                min = excluded.min,
                max = excluded.max,
                partial = excluded.partial
            "#,
        )
        .bind(&row.metric)
        .bind(&row.tags)
        .bind(row.window_start)
        .bind(row.window_end)
        .bind(row.count)
        .bind(row.sum)
        .bind(row.min)
        .bind(row.max)
        .bind(row.partial)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip_all, fields(count = samples.len()))]
    async fn write_samples(&self, samples: &[MetricSample]) -> StorageResult<()> {
        if samples.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        for sample in samples {
            let row = SampleRow::from_sample(sample)?;
            sqlx::query(
                "INSERT INTO raw_samples (source, metric, value, timestamp, tags) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&row.source)
            .bind(&row.metric)
            .bind(row.value)
            .bind(row.timestamp)
            .bind(&row.tags)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn reset(&self) -> StorageResult<()> {
        info!("resetting SQLite monitoring data");

        let mut tx = self.pool.begin().await?;
        let windows = sqlx::query("DELETE FROM aggregation_windows")
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let samples = sqlx::query("DELETE FROM raw_samples")
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;

        debug!("removed {windows} windows and {samples} raw samples");
        Ok(())
    }

    #[instrument(skip(self), fields(metric = %query.metric))]
    async fn query_windows(&self, query: WindowQuery) -> StorageResult<Vec<AggregationWindow>> {
        let rows = sqlx::query(
            r#"
            SELECT metric, tags, window_start, window_end, count, sum, min, max, partial
            FROM aggregation_windows
            WHERE metric = ? AND window_start >= ? AND window_start <= ?
            ORDER BY window_start ASC
            "#,
        )
        .bind(&query.metric)
        .bind(query.start.timestamp_millis())
        .bind(query.end.timestamp_millis())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                WindowRow {
                    metric: row.get("metric"),
                    tags: row.get("tags"),
                    window_start: row.get("window_start"),
                    window_end: row.get("window_end"),
                    count: row.get("count"),
                    sum: row.get("sum"),
                    min: row.get("min"),
                    max: row.get("max"),
                    partial: row.get("partial"),
                }
                .into_window()
            })
            .collect()
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> StorageResult<HealthStatus> {
        match sqlx::query("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => {
                let mut metadata = HashMap::new();
                metadata.insert("backend".to_string(), "sqlite".to_string());
                metadata.insert("db_path".to_string(), self.db_path.clone());

                Ok(HealthStatus {
                    healthy: true,
                    message: "SQLite store operational".to_string(),
                    metadata,
                })
            }
            Err(e) => {
                warn!("health check failed: {}", e);
                Ok(HealthStatus {
                    healthy: false,
                    message: format!("health check failed: {}", e),
                    metadata: HashMap::new(),
                })
            }
        }
    }

    async fn close(&self) -> StorageResult<()> {
        info!("closing SQLite store");
        self.pool.close().await;
        Ok(())
    }
}
