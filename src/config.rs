use std::fmt::Debug;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use serde::de::DeserializeOwned;
use tracing::trace;

use crate::monitors::thresholds::Thresholds;
use crate::util;

/// SQLite database settings shared by the collector and the portal
#[derive(Debug, Clone, serde::Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file (created if missing)
    pub path: PathBuf,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl DatabaseConfig {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_connections: default_max_connections(),
        }
    }
}

fn default_max_connections() -> u32 {
    5
}

/// Edge agent: producer + uploader
#[derive(Debug, Clone, serde::Deserialize)]
pub struct AgentConfig {
    /// WebSocket URL of the collector ingestion endpoint, e.g. `ws://10.0.0.1:9000/ingest`
    pub server_url: String,

    #[serde(default)]
    pub secret: String,

    #[serde(default = "default_collect_interval")]
    pub collect_interval: u64,

    #[serde(default = "default_upload_interval")]
    pub upload_interval: u64,

    /// Timeout for every connect, send and reply wait
    #[serde(default = "default_io_timeout")]
    pub io_timeout: u64,

    pub log_level: Option<String>,
}

impl AgentConfig {
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(secret) = util::get_secret() {
            self.secret = secret;
        }
        if let Some(level) = util::get_log_level() {
            self.log_level = Some(level);
        }
        self
    }

    pub fn validate(self) -> anyhow::Result<Self> {
        ensure_period("collect_interval", self.collect_interval)?;
        ensure_period("upload_interval", self.upload_interval)?;
        ensure_period("io_timeout", self.io_timeout)?;
        Ok(self)
    }

    pub fn collect_period(&self) -> Duration {
        Duration::from_secs(self.collect_interval)
    }

    pub fn upload_period(&self) -> Duration {
        Duration::from_secs(self.upload_interval)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout)
    }
}

/// Collection tier: ingestion endpoint, upsert worker, read API, Store A
#[derive(Debug, Clone, serde::Deserialize)]
pub struct CollectorConfig {
    #[serde(default = "default_collector_addr")]
    pub bind_addr: SocketAddr,

    #[serde(default)]
    pub secret: String,

    #[serde(default = "default_collector_database")]
    pub database: DatabaseConfig,

    /// Seconds without a sample before a server is marked offline
    #[serde(default = "default_offline_after")]
    pub offline_after: u64,

    #[serde(default = "default_sweep_interval")]
    pub sweep_interval: u64,

    pub log_level: Option<String>,
}

impl CollectorConfig {
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(secret) = util::get_secret() {
            self.secret = secret;
        }
        if let Some(level) = util::get_log_level() {
            self.log_level = Some(level);
        }
        self
    }

    pub fn validate(self) -> anyhow::Result<Self> {
        ensure_period("offline_after", self.offline_after)?;
        ensure_period("sweep_interval", self.sweep_interval)?;
        Ok(self)
    }
}

/// Portal tier: sync bridge, evaluator, fan-out, REST API, Store B
#[derive(Debug, Clone, serde::Deserialize)]
pub struct PortalConfig {
    #[serde(default = "default_portal_addr")]
    pub bind_addr: SocketAddr,

    /// Base URL of the collector read API, e.g. `http://10.0.0.1:9000`
    pub collector_url: String,

    #[serde(default = "default_portal_database")]
    pub database: DatabaseConfig,

    #[serde(default = "default_sync_interval")]
    pub sync_interval: u64,

    #[serde(default = "default_fanout_interval")]
    pub fanout_interval: u64,

    /// How far back the first sync of a server reaches, in seconds
    #[serde(default = "default_backfill")]
    pub backfill: u64,

    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,

    /// Inline thresholds; takes precedence over `thresholds_file`
    pub thresholds: Option<Thresholds>,

    pub thresholds_file: Option<PathBuf>,

    /// Static bearer token guarding the REST API
    pub api_token: Option<String>,

    pub log_level: Option<String>,
}

impl PortalConfig {
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(level) = util::get_log_level() {
            self.log_level = Some(level);
        }
        self
    }

    pub fn validate(self) -> anyhow::Result<Self> {
        ensure_period("sync_interval", self.sync_interval)?;
        ensure_period("fanout_interval", self.fanout_interval)?;
        ensure_period("request_timeout", self.request_timeout)?;
        Ok(self)
    }

    /// Inline thresholds, else the thresholds file, else the defaults
    pub fn resolve_thresholds(&self) -> anyhow::Result<Thresholds> {
        if let Some(thresholds) = self.thresholds {
            return Ok(thresholds);
        }

        match &self.thresholds_file {
            Some(path) => {
                let path = path.to_string_lossy();
                read_config_file(&path).with_context(|| format!("reading thresholds from {path}"))
            }
            None => Ok(Thresholds::default()),
        }
    }
}

/// Periods feed `tokio::time::interval` and timeouts, which need a non-zero value
fn ensure_period(name: &str, seconds: u64) -> anyhow::Result<()> {
    if seconds == 0 {
        anyhow::bail!("{name} must be at least one second");
    }
    Ok(())
}

fn default_collect_interval() -> u64 {
    5
}

fn default_upload_interval() -> u64 {
    5
}

fn default_io_timeout() -> u64 {
    10
}

fn default_collector_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9000))
}

fn default_collector_database() -> DatabaseConfig {
    DatabaseConfig::at("./collector.db")
}

fn default_offline_after() -> u64 {
    60
}

fn default_sweep_interval() -> u64 {
    30
}

fn default_portal_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 7777))
}

fn default_portal_database() -> DatabaseConfig {
    DatabaseConfig::at("./portal.db")
}

fn default_sync_interval() -> u64 {
    3
}

fn default_fanout_interval() -> u64 {
    1
}

fn default_backfill() -> u64 {
    24 * 60 * 60
}

fn default_request_timeout() -> u64 {
    10
}

pub fn read_config_file<T>(path: &str) -> anyhow::Result<T>
where
    T: DeserializeOwned + Debug,
{
    let file_content =
        std::fs::read_to_string(path).with_context(|| format!("cannot read {path}"))?;
    serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}
