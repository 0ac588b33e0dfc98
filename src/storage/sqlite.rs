//! SQLite plumbing shared by both stores
//!
//! Pools run in WAL mode with a busy timeout so the single writer and the
//! API readers do not block each other. Every operation is one statement,
//! except the portal import which writes a record and its alert together.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::migrate::Migrator;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteQueryResult, SqliteRow,
    SqliteSynchronous,
};
use sqlx::{Executor, Pool, Row, Sqlite};
use tracing::{debug, info, instrument, warn};

use super::backend::{HealthStatus, QueryRange};
use super::error::{StorageError, StorageResult};
use super::schema::{PerformanceRecord, ServerRecord, ServerStatus};
use crate::config::DatabaseConfig;
use crate::util::{format_timestamp, parse_timestamp};

pub static COLLECTOR_MIGRATOR: Migrator = sqlx::migrate!("./migrations/collector");

pub static PORTAL_MIGRATOR: Migrator = sqlx::migrate!("./migrations/portal");

pub(crate) const SERVER_COLUMNS: &str =
    "id, name, platform, os_version, ip_address, status, last_seen, notes";

pub(crate) const PERFORMANCE_COLUMNS: &str = "server_id, timestamp, cpu_percent, memory_percent, \
     disk_max_percent, total_upload, total_download, cpu_info, memory_info, disk_info, \
     network_info, boot_time, process_count";

/// Opens (creating if needed) the database and applies `migrator`
#[instrument(skip_all, fields(path = %config.path.display()))]
pub async fn connect(config: &DatabaseConfig, migrator: &Migrator) -> StorageResult<Pool<Sqlite>> {
    info!("opening SQLite database");

    let options = SqliteConnectOptions::new()
        .filename(&config.path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(30));

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections.max(1))
        .connect_with(options)
        .await
        .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

    debug!("running database migrations");
    migrator.run(&pool).await?;
    info!("database ready");

    Ok(pool)
}

pub(crate) fn timestamp_column(row: &SqliteRow, column: &str) -> StorageResult<DateTime<Utc>> {
    let raw: String = row.try_get(column)?;
    parse_timestamp(&raw).ok_or_else(|| {
        StorageError::SerializationError(format!("invalid timestamp '{raw}' in column {column}"))
    })
}

fn json_column<T: serde::de::DeserializeOwned>(row: &SqliteRow, column: &str) -> StorageResult<T> {
    let raw: String = row.try_get(column)?;
    serde_json::from_str(&raw).map_err(|e| {
        StorageError::SerializationError(format!("failed to decode {column}: {e}"))
    })
}

pub(crate) fn decode_server(row: &SqliteRow) -> StorageResult<ServerRecord> {
    let status: String = row.try_get("status")?;

    Ok(ServerRecord {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        platform: row.try_get("platform")?,
        os_version: row.try_get("os_version")?,
        ip_address: row.try_get("ip_address")?,
        status: ServerStatus::parse(&status),
        last_seen: timestamp_column(row, "last_seen")?,
        notes: row.try_get("notes")?,
    })
}

pub(crate) fn decode_performance(row: &SqliteRow) -> StorageResult<PerformanceRecord> {
    Ok(PerformanceRecord {
        id: row.try_get("id")?,
        server_id: row.try_get("server_id")?,
        timestamp: timestamp_column(row, "timestamp")?,
        cpu: json_column(row, "cpu_info")?,
        memory: json_column(row, "memory_info")?,
        disks: json_column(row, "disk_info")?,
        interfaces: json_column(row, "network_info")?,
        boot_time: row.try_get("boot_time")?,
        process_count: row.try_get::<i64, _>("process_count")?.max(0) as u64,
    })
}

/// Inserts `record` (its `id` is ignored). `on_conflict` is appended to the
/// statement verbatim.
pub(crate) async fn insert_performance<'e, E>(
    executor: E,
    record: &PerformanceRecord,
    on_conflict: &str,
) -> StorageResult<SqliteQueryResult>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!(
        "INSERT INTO performance_data ({PERFORMANCE_COLUMNS}) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) {on_conflict}"
    );

    let result = sqlx::query(&sql)
        .bind(record.server_id)
        .bind(format_timestamp(&record.timestamp))
        .bind(record.cpu.percent_usage)
        .bind(record.memory.percent)
        .bind(crate::max_disk_percent(&record.disks))
        .bind(clamp_i64(crate::total_upload(&record.interfaces)))
        .bind(clamp_i64(crate::total_download(&record.interfaces)))
        .bind(serde_json::to_string(&record.cpu)?)
        .bind(serde_json::to_string(&record.memory)?)
        .bind(serde_json::to_string(&record.disks)?)
        .bind(serde_json::to_string(&record.interfaces)?)
        .bind(&record.boot_time)
        .bind(clamp_i64(record.process_count))
        .execute(executor)
        .await?;

    Ok(result)
}

pub(crate) async fn list_servers(pool: &Pool<Sqlite>) -> StorageResult<Vec<ServerRecord>> {
    let sql = format!("SELECT {SERVER_COLUMNS} FROM servers ORDER BY id ASC");
    let rows = sqlx::query(&sql).fetch_all(pool).await?;

    rows.iter().map(decode_server).collect()
}

pub(crate) async fn performance_range(
    pool: &Pool<Sqlite>,
    query: &QueryRange,
) -> StorageResult<Vec<PerformanceRecord>> {
    debug!(
        "querying performance of server {} from {} to {}",
        query.server_id, query.start, query.end
    );

    let limit_clause = query
        .limit
        .map(|l| format!("LIMIT {}", l))
        .unwrap_or_default();

    let sql = format!(
        "SELECT id, {PERFORMANCE_COLUMNS} FROM performance_data \
         WHERE server_id = ? AND timestamp >= ? AND timestamp <= ? \
         ORDER BY timestamp ASC, id ASC {limit_clause}"
    );

    let rows = sqlx::query(&sql)
        .bind(query.server_id)
        .bind(format_timestamp(&query.start))
        .bind(format_timestamp(&query.end))
        .fetch_all(pool)
        .await?;

    let records = rows
        .iter()
        .map(decode_performance)
        .collect::<StorageResult<Vec<_>>>()?;
    debug!("query returned {} records", records.len());
    Ok(records)
}

pub(crate) async fn health_check(pool: &Pool<Sqlite>, label: &str) -> HealthStatus {
    match sqlx::query("SELECT 1").fetch_one(pool).await {
        Ok(_) => {
            let mut metadata = HashMap::new();
            metadata.insert("backend".to_string(), "sqlite".to_string());
            metadata.insert("store".to_string(), label.to_string());

            HealthStatus {
                healthy: true,
                message: format!("{label} store operational"),
                metadata,
            }
        }
        Err(e) => {
            warn!("health check failed: {}", e);
            HealthStatus {
                healthy: false,
                message: format!("health check failed: {}", e),
                metadata: HashMap::new(),
            }
        }
    }
}

pub(crate) fn clamp_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
