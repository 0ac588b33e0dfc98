//! Store traits
//!
//! `CollectorStore` is Store A, written by the ingestion pipeline and read
//! by the collector read API. `PortalStore` is Store B, written by the sync
//! bridge and read by the portal API and the fan-out service. Both are used
//! as `Arc<dyn ...>` across tasks, so implementations must be `Send + Sync`.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::StorageResult;
use super::schema::{
    AlertRecord, PerformanceRecord, ServerRecord, ServerStatus, StoreStats, Subscription,
    UpsertOutcome,
};
use crate::Sample;

/// Query parameters for fetching rows of one server within a time range
#[derive(Debug, Clone)]
pub struct QueryRange {
    pub server_id: i64,

    /// Start of time range (inclusive)
    pub start: DateTime<Utc>,

    /// End of time range (inclusive)
    pub end: DateTime<Utc>,

    /// Maximum number of results to return
    pub limit: Option<usize>,
}

impl QueryRange {
    pub fn new(server_id: i64, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            server_id,
            start,
            end,
            limit: None,
        }
    }
}

/// Health status of a store
#[derive(Debug, Clone)]
pub struct HealthStatus {
    pub healthy: bool,
    pub message: String,
    pub metadata: HashMap<String, String>,
}

#[async_trait]
pub trait CollectorStore: Send + Sync {
    /// Marks the server with `ip_address` online, or creates it from
    /// `sample` if the address is new. Name, platform and OS version of an
    /// existing server are left untouched.
    async fn upsert_server(
        &self,
        ip_address: &str,
        sample: &Sample,
        seen_at: DateTime<Utc>,
    ) -> StorageResult<UpsertOutcome>;

    /// Appends a performance record and returns its id
    async fn append_performance(
        &self,
        server_id: i64,
        timestamp: DateTime<Utc>,
        sample: &Sample,
    ) -> StorageResult<i64>;

    async fn list_servers(&self) -> StorageResult<Vec<ServerRecord>>;

    /// Records of one server within the range, oldest first
    async fn performance_range(&self, query: QueryRange) -> StorageResult<Vec<PerformanceRecord>>;

    /// Marks online servers last seen before `cutoff` as offline and
    /// returns how many changed
    async fn mark_offline(&self, cutoff: DateTime<Utc>) -> StorageResult<usize>;

    async fn health_check(&self) -> StorageResult<HealthStatus>;

    async fn close(&self) -> StorageResult<()>;
}

#[async_trait]
pub trait PortalStore: Send + Sync {
    // ---- servers ----

    /// Refreshes status and `last_seen` of the server with `ip_address`.
    /// Returns `false` if no such server exists.
    async fn touch_server(
        &self,
        ip_address: &str,
        status: ServerStatus,
        last_seen: DateTime<Utc>,
    ) -> StorageResult<bool>;

    /// Inserts a copy of `server` under a fresh id. Returns `None` if a
    /// server with the same address already exists.
    async fn insert_server(&self, server: &ServerRecord) -> StorageResult<Option<i64>>;

    async fn find_server_by_ip(&self, ip_address: &str) -> StorageResult<Option<ServerRecord>>;

    async fn server_exists(&self, server_id: i64) -> StorageResult<bool>;

    async fn list_servers(&self) -> StorageResult<Vec<ServerRecord>>;

    // ---- performance ----

    /// Newest imported timestamp of a server
    async fn latest_timestamp(&self, server_id: i64) -> StorageResult<Option<DateTime<Utc>>>;

    /// Imports `record` for `server_id` unless `(server_id, timestamp)` is
    /// already present. Returns the stored record when it was new.
    async fn import_performance(
        &self,
        server_id: i64,
        record: &PerformanceRecord,
    ) -> StorageResult<Option<PerformanceRecord>>;

    /// Imports `record` (under its own `server_id`) together with `alert` in
    /// one transaction. Returns `None` and writes nothing when
    /// `(server_id, timestamp)` is already present; on error neither row is
    /// kept.
    async fn import_with_alert(
        &self,
        record: &PerformanceRecord,
        alert: &AlertRecord,
    ) -> StorageResult<Option<PerformanceRecord>>;

    async fn performance_range(&self, query: QueryRange) -> StorageResult<Vec<PerformanceRecord>>;

    async fn latest_performance(&self, server_id: i64) -> StorageResult<Option<PerformanceRecord>>;

    // ---- alerts ----

    async fn insert_alert(&self, alert: &AlertRecord) -> StorageResult<i64>;

    async fn alerts_range(&self, query: QueryRange) -> StorageResult<Vec<AlertRecord>>;

    // ---- subscriptions ----

    /// Server ids watched by `user_id`
    async fn watched_servers(&self, user_id: i64) -> StorageResult<Vec<i64>>;

    async fn list_subscriptions(&self, user_id: i64) -> StorageResult<Vec<Subscription>>;

    /// Fails with `NotFound` for an unknown server and `Conflict` if the
    /// user already watches it
    async fn add_subscription(
        &self,
        user_id: i64,
        server_id: i64,
        tags: &[String],
        notes: &str,
    ) -> StorageResult<Subscription>;

    async fn update_subscription(
        &self,
        subscription_id: i64,
        tags: &[String],
        notes: &str,
    ) -> StorageResult<Subscription>;

    async fn delete_subscription(&self, subscription_id: i64) -> StorageResult<()>;

    // ---- maintenance ----

    async fn stats(&self) -> StorageResult<StoreStats>;

    async fn health_check(&self) -> StorageResult<HealthStatus>;

    async fn close(&self) -> StorageResult<()>;
}
