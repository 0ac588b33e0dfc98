//! UpsertWorker - the single consumer of the ingestion queue
//!
//! Every connection handler pushes validated samples into one unbounded
//! queue; this worker resolves each to a server row in Store A and appends
//! a performance record, strictly in arrival order.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument};

use super::messages::IngestItem;
use crate::storage::{CollectorStore, StorageResult};
use crate::util;

pub struct UpsertWorker {
    store: Arc<dyn CollectorStore>,
    queue: UnboundedReceiver<IngestItem>,
}

/// Spawns the worker and returns the producer side of its queue. The
/// worker exits once every sender is dropped and the queue is drained.
pub fn spawn_upsert_worker(store: Arc<dyn CollectorStore>) -> (UnboundedSender<IngestItem>, JoinHandle<()>) {
    let (sender, receiver) = unbounded_channel::<IngestItem>();
    let worker = UpsertWorker::new(store, receiver);

    (sender, tokio::spawn(worker.run()))
}

impl UpsertWorker {
    pub fn new(store: Arc<dyn CollectorStore>, queue: UnboundedReceiver<IngestItem>) -> Self {
        Self { store, queue }
    }

    pub async fn run(mut self) {
        debug!("starting upsert worker");

        while let Some(item) = self.queue.recv().await {
            if let Err(e) = self.process(&item).await {
                error!("dropping sample from {:?}: {e}", item.peer);
            }
        }

        info!("ingestion queue closed, upsert worker stopped");
    }

    /// Upserts the sample's server and appends its performance record.
    /// Returns the new record id.
    #[instrument(skip_all, fields(peer = ?item.peer))]
    pub async fn process(&self, item: &IngestItem) -> StorageResult<i64> {
        let ip_address = item.sample.primary_ipv4().to_string();
        let now = util::now();

        let outcome = self.store.upsert_server(&ip_address, &item.sample, now).await?;
        if !outcome.created {
            debug!("server {} ({ip_address}) is online", outcome.server_id);
        }

        let record_id = self
            .store
            .append_performance(outcome.server_id, now, &item.sample)
            .await?;

        debug!("appended record {record_id} for server {}", outcome.server_id);
        Ok(record_id)
    }
}

/// Periodically marks servers silent for longer than `offline_after` as
/// offline
pub fn spawn_offline_sweeper(
    store: Arc<dyn CollectorStore>,
    offline_after: Duration,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        let grace = chrono::Duration::from_std(offline_after).unwrap_or(chrono::Duration::MAX);

        loop {
            ticker.tick().await;

            let cutoff = Utc::now()
                .checked_sub_signed(grace)
                .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);

            match store.mark_offline(cutoff).await {
                Ok(0) => {}
                Ok(count) => info!("marked {count} servers offline"),
                Err(e) => error!("offline sweep failed: {e}"),
            }
        }
    })
}
