//! Store A: the collector's SQLite database

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument};

use super::backend::{CollectorStore, HealthStatus, QueryRange};
use super::error::StorageResult;
use super::schema::{PerformanceRecord, ServerRecord, UpsertOutcome};
use super::sqlite;
use crate::Sample;
use crate::config::DatabaseConfig;
use crate::util::format_timestamp;

pub struct SqliteCollectorStore {
    pool: Pool<Sqlite>,
}

impl SqliteCollectorStore {
    pub async fn open(config: &DatabaseConfig) -> StorageResult<Self> {
        let pool = sqlite::connect(config, &sqlite::COLLECTOR_MIGRATOR).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl CollectorStore for SqliteCollectorStore {
    #[instrument(skip(self, sample))]
    async fn upsert_server(
        &self,
        ip_address: &str,
        sample: &Sample,
        seen_at: DateTime<Utc>,
    ) -> StorageResult<UpsertOutcome> {
        let last_seen = format_timestamp(&seen_at);

        let existing = sqlx::query(
            "UPDATE servers SET status = 'online', last_seen = ? WHERE ip_address = ? RETURNING id",
        )
        .bind(&last_seen)
        .bind(ip_address)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = existing {
            return Ok(UpsertOutcome {
                server_id: row.try_get("id")?,
                created: false,
            });
        }

        // a concurrent insert for the same address turns into an update
        let row = sqlx::query(
            r#"
            INSERT INTO servers (name, platform, os_version, ip_address, status, last_seen)
            VALUES (?, ?, ?, ?, 'online', ?)
            ON CONFLICT (ip_address) DO UPDATE SET
                status = 'online',
                last_seen = excluded.last_seen
            RETURNING id
            "#,
        )
        .bind(ServerRecord::display_name(ip_address))
        .bind(&sample.platform)
        .bind(&sample.os_version)
        .bind(ip_address)
        .bind(&last_seen)
        .fetch_one(&self.pool)
        .await?;

        let server_id = row.try_get("id")?;
        info!("registered new server {server_id} at {ip_address}");

        Ok(UpsertOutcome {
            server_id,
            created: true,
        })
    }

    #[instrument(skip(self, sample))]
    async fn append_performance(
        &self,
        server_id: i64,
        timestamp: DateTime<Utc>,
        sample: &Sample,
    ) -> StorageResult<i64> {
        let record = PerformanceRecord::from_sample(server_id, timestamp, sample);
        let result = sqlite::insert_performance(&self.pool, &record, "").await?;

        debug!("stored performance record {}", result.last_insert_rowid());
        Ok(result.last_insert_rowid())
    }

    async fn list_servers(&self) -> StorageResult<Vec<ServerRecord>> {
        sqlite::list_servers(&self.pool).await
    }

    #[instrument(skip(self), fields(server_id = query.server_id))]
    async fn performance_range(&self, query: QueryRange) -> StorageResult<Vec<PerformanceRecord>> {
        sqlite::performance_range(&self.pool, &query).await
    }

    #[instrument(skip(self), fields(cutoff = %cutoff))]
    async fn mark_offline(&self, cutoff: DateTime<Utc>) -> StorageResult<usize> {
        let result = sqlx::query(
            "UPDATE servers SET status = 'offline' WHERE status = 'online' AND last_seen < ?",
        )
        .bind(format_timestamp(&cutoff))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() as usize)
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        Ok(sqlite::health_check(&self.pool, "collector").await)
    }

    async fn close(&self) -> StorageResult<()> {
        info!("closing collector store");
        self.pool.close().await;
        Ok(())
    }
}
