//! Row types shared by both stores
//!
//! Performance rows follow a hybrid layout: frequently queried aggregates
//! (CPU %, memory %, fullest disk %, upload/download totals) are typed
//! columns, while the nested cpu/memory/disk/interface details are stored
//! as JSON and decoded back into typed structs at the storage boundary.
//! Timestamps are `TEXT` in `YYYY-MM-DD HH:MM:SS` (UTC).

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::monitors::thresholds::{Evaluation, NetworkVerdict, Verdict};
use crate::{CpuInformation, DiskInformation, InterfaceInformation, MemoryInformation, Sample};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Online,
    Offline,
}

impl ServerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerStatus::Online => "online",
            ServerStatus::Offline => "offline",
        }
    }

    /// Unknown values are treated as offline
    pub fn parse(raw: &str) -> Self {
        match raw {
            "online" => ServerStatus::Online,
            _ => ServerStatus::Offline,
        }
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A monitored host, identified by its unique `ip_address`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerRecord {
    pub id: i64,
    pub name: String,
    pub platform: String,
    pub os_version: String,
    pub ip_address: String,
    pub status: ServerStatus,
    #[serde(with = "crate::util::timestamp_format")]
    pub last_seen: DateTime<Utc>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl ServerRecord {
    pub fn display_name(ip_address: &str) -> String {
        format!("Server-{ip_address}")
    }
}

/// One persisted sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRecord {
    pub id: i64,
    pub server_id: i64,
    #[serde(with = "crate::util::timestamp_format")]
    pub timestamp: DateTime<Utc>,
    pub cpu: CpuInformation,
    pub memory: MemoryInformation,
    pub disks: Vec<DiskInformation>,
    pub interfaces: BTreeMap<String, InterfaceInformation>,
    pub boot_time: String,
    pub process_count: u64,
}

impl PerformanceRecord {
    /// Builds an unsaved record (`id` 0) for `sample`
    pub fn from_sample(server_id: i64, timestamp: DateTime<Utc>, sample: &Sample) -> Self {
        Self {
            id: 0,
            server_id,
            timestamp,
            cpu: sample.cpu.clone(),
            memory: sample.memory.clone(),
            disks: sample.disks.clone(),
            interfaces: sample.interfaces.clone(),
            boot_time: sample.boot_time.clone(),
            process_count: sample.process_count,
        }
    }
}

/// Threshold verdicts derived from exactly one performance record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub id: i64,
    pub server_id: i64,
    #[serde(with = "crate::util::timestamp_format")]
    pub timestamp: DateTime<Utc>,
    pub cpu_alert: Verdict,
    pub memory_alert: Verdict,
    pub disk_alert: Verdict,
    pub network_alert: NetworkVerdict,
    pub is_valid_alert: bool,
}

impl AlertRecord {
    pub fn from_evaluation(server_id: i64, timestamp: DateTime<Utc>, evaluation: &Evaluation) -> Self {
        Self {
            id: 0,
            server_id,
            timestamp,
            cpu_alert: evaluation.cpu,
            memory_alert: evaluation.memory,
            disk_alert: evaluation.disk,
            network_alert: evaluation.network,
            is_valid_alert: evaluation.is_valid_alert(),
        }
    }
}

/// "user watches server"
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: i64,
    pub user_id: i64,
    pub server_id: i64,
    pub tags: Vec<String>,
    pub notes: String,
    #[serde(with = "crate::util::timestamp_format")]
    pub created_at: DateTime<Utc>,
}

/// Result of resolving a sample to a server row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub server_id: i64,
    pub created: bool,
}

/// Row counts of the portal store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub servers: u64,
    pub performance_records: u64,
    pub alerts: u64,
    pub subscriptions: u64,
}

/// Tags are stored comma-joined; blanks are dropped
pub fn join_tags(tags: &[String]) -> String {
    tags.iter()
        .map(|tag| tag.trim())
        .filter(|tag| !tag.is_empty())
        .collect::<Vec<_>>()
        .join(",")
}

pub fn split_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}
