//! SyncBridgeActor - polls the collector read API into Store B
//!
//! ## Cycle
//!
//! ```text
//! GET /servers ──▶ touch known IPs / insert new ones
//!      │
//!      └─▶ per server: GET /performance?[watermark, now] ──▶ import if (server, timestamp) is new
//!                                                              └─▶ evaluate ──▶ alert row
//! ```
//!
//! The window of each server starts at its watermark, the newest timestamp
//! already imported for it (inclusive, so records sharing that second are
//! not missed; the dedup key absorbs the overlap). A server without any
//! imported record starts `backfill` before now.
//!
//! A failed fetch aborts the cycle. A storage failure skips only the server
//! or record it belongs to; the rest of the cycle continues and the next
//! tick retries what was skipped. A record and its alert are committed
//! together, so a record is never stored without its alert.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, instrument, trace, warn};

use super::messages::{SyncCommand, SyncReport};
use crate::monitors::thresholds::{ThresholdEvaluator, Thresholds};
use crate::storage::PortalStore;
use crate::storage::schema::{PerformanceRecord, ServerRecord};
use crate::util;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base URL of the collector read API
    pub collector_url: String,
    pub interval: Duration,
    pub backfill: Duration,
    pub request_timeout: Duration,
}

pub struct SyncBridgeActor {
    config: SyncConfig,
    client: reqwest::Client,
    store: Arc<dyn PortalStore>,
    evaluator: ThresholdEvaluator,
    command_rx: mpsc::Receiver<SyncCommand>,
}

impl SyncBridgeActor {
    pub fn new(
        config: SyncConfig,
        store: Arc<dyn PortalStore>,
        thresholds: Thresholds,
        command_rx: mpsc::Receiver<SyncCommand>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            config,
            client,
            store,
            evaluator: ThresholdEvaluator::new(thresholds),
            command_rx,
        })
    }

    #[instrument(skip(self), fields(collector = %self.config.collector_url))]
    pub async fn run(mut self) {
        debug!("starting sync bridge");

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.run_cycle().await {
                        Ok(report) => trace!("sync cycle finished: {report:?}"),
                        Err(e) => error!("sync cycle aborted: {:#}", e),
                    }
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        SyncCommand::SyncNow { respond_to } => {
                            debug!("received SyncNow command");
                            let result = self.run_cycle().await;
                            let _ = respond_to.send(result);
                        }

                        SyncCommand::Shutdown => {
                            debug!("received shutdown command");
                            break;
                        }
                    }
                }

                else => {
                    warn!("command channel closed, shutting down");
                    break;
                }
            }
        }

        debug!("sync bridge stopped");
    }

    /// One full pass: servers, then performance records and alerts
    pub async fn run_cycle(&self) -> Result<SyncReport> {
        let mut report = SyncReport::default();

        let servers = self.fetch_servers().await?;
        report.servers_seen = servers.len();
        self.sync_servers(&servers, &mut report).await;

        for server in &servers {
            self.sync_performance(server, &mut report).await?;
        }

        if report.records_imported > 0 || report.servers_inserted > 0 {
            info!(
                "synced {} new servers, {} new records, {} alerts",
                report.servers_inserted, report.records_imported, report.alerts_written
            );
        }
        Ok(report)
    }

    async fn sync_servers(&self, servers: &[ServerRecord], report: &mut SyncReport) {
        let mut unknown = Vec::new();

        for server in servers {
            match self
                .store
                .touch_server(&server.ip_address, server.status, server.last_seen)
                .await
            {
                Ok(true) => report.servers_updated += 1,
                Ok(false) => unknown.push(server),
                Err(e) => {
                    warn!("failed to update server {}: {}", server.ip_address, e);
                    report.failures += 1;
                }
            }
        }

        for server in unknown {
            match self.store.insert_server(server).await {
                Ok(Some(_)) => report.servers_inserted += 1,
                Ok(None) => {}
                Err(e) => {
                    warn!("failed to import server {}: {}", server.ip_address, e);
                    report.failures += 1;
                }
            }
        }
    }

    #[instrument(skip(self, source, report), fields(ip = %source.ip_address))]
    async fn sync_performance(&self, source: &ServerRecord, report: &mut SyncReport) -> Result<()> {
        let target = match self.store.find_server_by_ip(&source.ip_address).await {
            Ok(Some(target)) => target,
            Ok(None) => {
                warn!("server {} missing from portal store, skipping", source.ip_address);
                return Ok(());
            }
            Err(e) => {
                warn!("failed to look up server {}: {}", source.ip_address, e);
                report.failures += 1;
                return Ok(());
            }
        };

        let end = util::now();
        let start = match self.store.latest_timestamp(target.id).await {
            Ok(Some(watermark)) => watermark,
            Ok(None) => end - chrono::Duration::from_std(self.config.backfill)?,
            Err(e) => {
                warn!("failed to read watermark of {}: {}", source.ip_address, e);
                report.failures += 1;
                return Ok(());
            }
        };

        let records = self.fetch_performance(source.id, start, end).await?;
        report.records_fetched += records.len();

        for record in &records {
            let candidate = PerformanceRecord {
                server_id: target.id,
                ..record.clone()
            };
            let alert = self.evaluator.alert_for(&candidate);

            match self.store.import_with_alert(&candidate, &alert).await {
                Ok(Some(imported)) => {
                    report.records_imported += 1;
                    report.alerts_written += 1;
                    if alert.is_valid_alert {
                        debug!("threshold exceeded on {} at {}", source.ip_address, imported.timestamp);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("failed to import record at {}: {}", candidate.timestamp, e);
                    report.failures += 1;
                }
            }
        }

        Ok(())
    }

    async fn fetch_servers(&self) -> Result<Vec<ServerRecord>> {
        let url = format!("{}/servers", self.base_url());
        trace!("requesting servers from {url}");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("failed to send HTTP request")?;

        if !response.status().is_success() {
            anyhow::bail!("HTTP error: {}", response.status());
        }

        response
            .json()
            .await
            .context("failed to parse server list")
    }

    async fn fetch_performance(
        &self,
        server_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<PerformanceRecord>> {
        let url = format!("{}/performance", self.base_url());
        let start_time = util::format_timestamp(&start);
        let end_time = util::format_timestamp(&end);
        trace!("requesting performance of {server_id} in [{start_time}, {end_time}]");

        let response = self
            .client
            .get(&url)
            .query(&[
                ("server_id", server_id.to_string()),
                ("start_time", start_time),
                ("end_time", end_time),
            ])
            .send()
            .await
            .context("failed to send HTTP request")?;

        if !response.status().is_success() {
            anyhow::bail!("HTTP error: {}", response.status());
        }

        response
            .json()
            .await
            .context("failed to parse performance records")
    }

    fn base_url(&self) -> &str {
        self.config.collector_url.trim_end_matches('/')
    }
}

/// Handle for controlling a SyncBridgeActor
#[derive(Clone)]
pub struct SyncHandle {
    sender: mpsc::Sender<SyncCommand>,
}

impl SyncHandle {
    pub fn spawn(config: SyncConfig, store: Arc<dyn PortalStore>, thresholds: Thresholds) -> Result<Self> {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let actor = SyncBridgeActor::new(config, store, thresholds, cmd_rx)?;

        tokio::spawn(actor.run());

        Ok(Self { sender: cmd_tx })
    }

    /// Runs a cycle immediately and returns what it did
    pub async fn sync_now(&self) -> Result<SyncReport> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SyncCommand::SyncNow { respond_to: tx })
            .await
            .context("failed to send SyncNow command")?;

        rx.await.context("failed to receive response")?
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(SyncCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }
}
