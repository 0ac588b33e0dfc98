//! Store B: the portal's SQLite database

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Pool, Row, Sqlite};
use tracing::{debug, info, instrument};

use super::backend::{HealthStatus, PortalStore, QueryRange};
use super::error::{StorageError, StorageResult};
use super::schema::{
    AlertRecord, PerformanceRecord, ServerRecord, ServerStatus, StoreStats, Subscription,
    join_tags, split_tags,
};
use super::sqlite::{self, PERFORMANCE_COLUMNS, SERVER_COLUMNS, timestamp_column};
use crate::config::DatabaseConfig;
use crate::util::{self, format_timestamp};

const SUBSCRIPTION_COLUMNS: &str = "id, user_id, server_id, tags, notes, created_at";

const ALERT_COLUMNS: &str =
    "id, server_id, timestamp, cpu_alert, memory_alert, disk_alert, network_alert, is_valid_alert";

pub struct SqlitePortalStore {
    pool: Pool<Sqlite>,
}

impl SqlitePortalStore {
    pub async fn open(config: &DatabaseConfig) -> StorageResult<Self> {
        let pool = sqlite::connect(config, &sqlite::PORTAL_MIGRATOR).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

fn decode_subscription(row: &SqliteRow) -> StorageResult<Subscription> {
    let tags: String = row.try_get("tags")?;

    Ok(Subscription {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        server_id: row.try_get("server_id")?,
        tags: split_tags(&tags),
        notes: row.try_get("notes")?,
        created_at: timestamp_column(row, "created_at")?,
    })
}

fn decode_alert(row: &SqliteRow) -> StorageResult<AlertRecord> {
    fn verdict<T: serde::de::DeserializeOwned>(row: &SqliteRow, column: &str) -> StorageResult<T> {
        let raw: String = row.try_get(column)?;
        Ok(serde_json::from_str(&raw)?)
    }

    Ok(AlertRecord {
        id: row.try_get("id")?,
        server_id: row.try_get("server_id")?,
        timestamp: timestamp_column(row, "timestamp")?,
        cpu_alert: verdict(row, "cpu_alert")?,
        memory_alert: verdict(row, "memory_alert")?,
        disk_alert: verdict(row, "disk_alert")?,
        network_alert: verdict(row, "network_alert")?,
        is_valid_alert: row.try_get("is_valid_alert")?,
    })
}

async fn insert_alert_row<'e, E>(executor: E, alert: &AlertRecord) -> StorageResult<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        INSERT INTO alerts (
            server_id, timestamp, cpu_alert, memory_alert,
            disk_alert, network_alert, is_valid_alert
        )
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(alert.server_id)
    .bind(format_timestamp(&alert.timestamp))
    .bind(serde_json::to_string(&alert.cpu_alert)?)
    .bind(serde_json::to_string(&alert.memory_alert)?)
    .bind(serde_json::to_string(&alert.disk_alert)?)
    .bind(serde_json::to_string(&alert.network_alert)?)
    .bind(alert.is_valid_alert)
    .execute(executor)
    .await?;

    Ok(result.last_insert_rowid())
}

#[async_trait]
impl PortalStore for SqlitePortalStore {
    #[instrument(skip(self))]
    async fn touch_server(
        &self,
        ip_address: &str,
        status: ServerStatus,
        last_seen: DateTime<Utc>,
    ) -> StorageResult<bool> {
        let result =
            sqlx::query("UPDATE servers SET status = ?, last_seen = ? WHERE ip_address = ?")
                .bind(status.as_str())
                .bind(format_timestamp(&last_seen))
                .bind(ip_address)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, server), fields(ip = %server.ip_address))]
    async fn insert_server(&self, server: &ServerRecord) -> StorageResult<Option<i64>> {
        let result = sqlx::query(
            r#"
            INSERT INTO servers (name, platform, os_version, ip_address, status, last_seen, notes)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (ip_address) DO NOTHING
            "#,
        )
        .bind(&server.name)
        .bind(&server.platform)
        .bind(&server.os_version)
        .bind(&server.ip_address)
        .bind(server.status.as_str())
        .bind(format_timestamp(&server.last_seen))
        .bind(&server.notes)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        info!("imported server {}", server.ip_address);
        Ok(Some(result.last_insert_rowid()))
    }

    async fn find_server_by_ip(&self, ip_address: &str) -> StorageResult<Option<ServerRecord>> {
        let sql = format!("SELECT {SERVER_COLUMNS} FROM servers WHERE ip_address = ?");
        let row = sqlx::query(&sql)
            .bind(ip_address)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(sqlite::decode_server).transpose()
    }

    async fn server_exists(&self, server_id: i64) -> StorageResult<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM servers WHERE id = ?")
            .bind(server_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(count > 0)
    }

    async fn list_servers(&self) -> StorageResult<Vec<ServerRecord>> {
        sqlite::list_servers(&self.pool).await
    }

    async fn latest_timestamp(&self, server_id: i64) -> StorageResult<Option<DateTime<Utc>>> {
        let raw: Option<String> =
            sqlx::query_scalar("SELECT MAX(timestamp) FROM performance_data WHERE server_id = ?")
                .bind(server_id)
                .fetch_one(&self.pool)
                .await?;

        raw.map(|raw| {
            util::parse_timestamp(&raw).ok_or_else(|| {
                StorageError::SerializationError(format!("invalid timestamp '{raw}'"))
            })
        })
        .transpose()
    }

    #[instrument(skip(self, record), fields(timestamp = %record.timestamp))]
    async fn import_performance(
        &self,
        server_id: i64,
        record: &PerformanceRecord,
    ) -> StorageResult<Option<PerformanceRecord>> {
        let mut imported = PerformanceRecord {
            server_id,
            ..record.clone()
        };

        let result = sqlite::insert_performance(
            &self.pool,
            &imported,
            "ON CONFLICT (server_id, timestamp) DO NOTHING",
        )
        .await?;

        if result.rows_affected() == 0 {
            debug!("record already present");
            return Ok(None);
        }

        imported.id = result.last_insert_rowid();
        Ok(Some(imported))
    }

    #[instrument(skip(self, record, alert), fields(server_id = record.server_id, timestamp = %record.timestamp))]
    async fn import_with_alert(
        &self,
        record: &PerformanceRecord,
        alert: &AlertRecord,
    ) -> StorageResult<Option<PerformanceRecord>> {
        let mut tx = self.pool.begin().await?;

        let result = sqlite::insert_performance(
            &mut *tx,
            record,
            "ON CONFLICT (server_id, timestamp) DO NOTHING",
        )
        .await?;

        if result.rows_affected() == 0 {
            debug!("record already present");
            return Ok(None);
        }

        let mut imported = record.clone();
        imported.id = result.last_insert_rowid();
        insert_alert_row(&mut *tx, alert).await?;

        tx.commit().await?;
        Ok(Some(imported))
    }

    #[instrument(skip(self), fields(server_id = query.server_id))]
    async fn performance_range(&self, query: QueryRange) -> StorageResult<Vec<PerformanceRecord>> {
        sqlite::performance_range(&self.pool, &query).await
    }

    async fn latest_performance(&self, server_id: i64) -> StorageResult<Option<PerformanceRecord>> {
        let sql = format!(
            "SELECT id, {PERFORMANCE_COLUMNS} FROM performance_data \
             WHERE server_id = ? ORDER BY timestamp DESC, id DESC LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(server_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(sqlite::decode_performance).transpose()
    }

    #[instrument(skip(self, alert), fields(server_id = alert.server_id))]
    async fn insert_alert(&self, alert: &AlertRecord) -> StorageResult<i64> {
        insert_alert_row(&self.pool, alert).await
    }

    async fn alerts_range(&self, query: QueryRange) -> StorageResult<Vec<AlertRecord>> {
        let limit_clause = query
            .limit
            .map(|l| format!("LIMIT {}", l))
            .unwrap_or_default();
        let sql = format!(
            "SELECT {ALERT_COLUMNS} FROM alerts \
             WHERE server_id = ? AND timestamp >= ? AND timestamp <= ? \
             ORDER BY timestamp ASC, id ASC {limit_clause}"
        );

        let rows = sqlx::query(&sql)
            .bind(query.server_id)
            .bind(format_timestamp(&query.start))
            .bind(format_timestamp(&query.end))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(decode_alert).collect()
    }

    async fn watched_servers(&self, user_id: i64) -> StorageResult<Vec<i64>> {
        let ids = sqlx::query_scalar(
            "SELECT server_id FROM subscriptions WHERE user_id = ? ORDER BY server_id ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    async fn list_subscriptions(&self, user_id: i64) -> StorageResult<Vec<Subscription>> {
        let sql = format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE user_id = ? ORDER BY id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(decode_subscription).collect()
    }

    #[instrument(skip(self, tags, notes))]
    async fn add_subscription(
        &self,
        user_id: i64,
        server_id: i64,
        tags: &[String],
        notes: &str,
    ) -> StorageResult<Subscription> {
        if !self.server_exists(server_id).await? {
            return Err(StorageError::NotFound(format!("server {server_id}")));
        }

        let sql = format!(
            "INSERT INTO subscriptions (user_id, server_id, tags, notes, created_at) \
             VALUES (?, ?, ?, ?, ?) RETURNING {SUBSCRIPTION_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(user_id)
            .bind(server_id)
            .bind(join_tags(tags))
            .bind(notes)
            .bind(format_timestamp(&util::now()))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match StorageError::from(e) {
                StorageError::Conflict(_) => StorageError::Conflict(format!(
                    "user {user_id} already subscribed to server {server_id}"
                )),
                other => other,
            })?;

        decode_subscription(&row)
    }

    #[instrument(skip(self, tags, notes))]
    async fn update_subscription(
        &self,
        subscription_id: i64,
        tags: &[String],
        notes: &str,
    ) -> StorageResult<Subscription> {
        let sql = format!(
            "UPDATE subscriptions SET tags = ?, notes = ? WHERE id = ? \
             RETURNING {SUBSCRIPTION_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(join_tags(tags))
            .bind(notes)
            .bind(subscription_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("subscription {subscription_id}")))?;

        decode_subscription(&row)
    }

    #[instrument(skip(self))]
    async fn delete_subscription(&self, subscription_id: i64) -> StorageResult<()> {
        let result = sqlx::query("DELETE FROM subscriptions WHERE id = ?")
            .bind(subscription_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!(
                "subscription {subscription_id}"
            )));
        }
        Ok(())
    }

    async fn stats(&self) -> StorageResult<StoreStats> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM servers)          AS servers,
                (SELECT COUNT(*) FROM performance_data) AS performance_records,
                (SELECT COUNT(*) FROM alerts)           AS alerts,
                (SELECT COUNT(*) FROM subscriptions)    AS subscriptions
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let count = |column: &str| -> StorageResult<u64> {
            Ok(row.try_get::<i64, _>(column)?.max(0) as u64)
        };

        Ok(StoreStats {
            servers: count("servers")?,
            performance_records: count("performance_records")?,
            alerts: count("alerts")?,
            subscriptions: count("subscriptions")?,
        })
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        Ok(sqlite::health_check(&self.pool, "portal").await)
    }

    async fn close(&self) -> StorageResult<()> {
        info!("closing portal store");
        self.pool.close().await;
        Ok(())
    }
}
