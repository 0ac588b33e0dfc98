//! SnapshotProducer - samples the local host into the handoff slot
//!
//! The handoff is an mpsc channel of capacity 1: while the uploader has
//! not taken the previous sample, `send` waits, so the producer never
//! builds up a backlog of stale samples.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument};

use crate::Sample;
use crate::monitors::host::MetricsSource;

/// Creates the single-slot handoff between producer and uploader
pub fn handoff() -> (mpsc::Sender<Sample>, mpsc::Receiver<Sample>) {
    mpsc::channel(1)
}

pub struct SnapshotProducer<S> {
    source: S,
    slot: mpsc::Sender<Sample>,
    period: Duration,
}

impl<S: MetricsSource> SnapshotProducer<S> {
    pub fn new(source: S, slot: mpsc::Sender<Sample>, period: Duration) -> Self {
        Self {
            source,
            slot,
            period,
        }
    }

    pub async fn produce(&mut self) -> anyhow::Result<Sample> {
        self.source.snapshot().await
    }

    /// Produces, hands off and sleeps for one period, until the uploader
    /// side of the handoff is dropped
    #[instrument(skip(self), fields(period = ?self.period))]
    pub async fn run(mut self) {
        info!("starting snapshot producer");

        loop {
            match self.produce().await {
                Ok(sample) => {
                    if self.slot.send(sample).await.is_err() {
                        debug!("handoff closed");
                        break;
                    }
                    debug!("sample handed off");
                }
                Err(e) => error!("failed to sample host: {e:#}"),
            }

            tokio::time::sleep(self.period).await;
        }

        info!("snapshot producer stopped");
    }
}
