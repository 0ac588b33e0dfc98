//! Message types for actor communication
//!
//! Commands travel over mpsc channels to a specific actor and carry a
//! oneshot sender when the caller expects an answer.

use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::Sample;
use crate::storage::schema::PerformanceRecord;

/// A validated sample waiting for the upsert worker
#[derive(Debug, Clone)]
pub struct IngestItem {
    pub sample: Sample,

    /// Remote address of the agent connection, for logging
    pub peer: Option<SocketAddr>,
}

/// Commands that can be sent to the SyncBridgeActor
#[derive(Debug)]
pub enum SyncCommand {
    /// Run one sync cycle now, bypassing the interval timer
    SyncNow {
        respond_to: oneshot::Sender<anyhow::Result<SyncReport>>,
    },

    /// Finish the in-flight cycle and exit
    Shutdown,
}

/// What one sync cycle did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub servers_seen: usize,
    pub servers_inserted: usize,
    pub servers_updated: usize,
    pub records_fetched: usize,
    pub records_imported: usize,
    pub alerts_written: usize,
    /// Servers or records skipped after a storage error
    pub failures: usize,
}

/// Latest record per watched server, pushed to one subscriber
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FanoutFrame {
    #[serde(rename = "type")]
    pub kind: String,
    pub user_id: i64,
    pub data: Vec<PerformanceRecord>,
    #[serde(with = "crate::util::timestamp_format")]
    pub sent_at: DateTime<Utc>,
}

impl FanoutFrame {
    pub const KIND: &'static str = "server_data";

    pub fn new(user_id: i64, data: Vec<PerformanceRecord>, sent_at: DateTime<Utc>) -> Self {
        Self {
            kind: Self::KIND.to_string(),
            user_id,
            data,
            sent_at,
        }
    }
}

/// Connection state of the stream uploader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploaderState {
    Disconnected,
    Connecting,
    Authenticated,
}
