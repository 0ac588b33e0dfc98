//! Shared state handed to the axum handlers

use std::sync::Arc;

use crate::actors::fanout::FanoutRegistry;
use crate::actors::sync::SyncHandle;
use crate::api::ingest::Gatekeeper;
use crate::storage::{CollectorStore, PortalStore};

/// State of the collector API: ingestion endpoint and read API
#[derive(Clone)]
pub struct CollectorState {
    pub store: Arc<dyn CollectorStore>,
    pub gatekeeper: Gatekeeper,
}

impl CollectorState {
    pub fn new(store: Arc<dyn CollectorStore>, gatekeeper: Gatekeeper) -> Self {
        Self { store, gatekeeper }
    }
}

/// State of the portal API
#[derive(Clone)]
pub struct PortalState {
    pub store: Arc<dyn PortalStore>,
    pub fanout: FanoutRegistry,

    /// Absent when the sync bridge is not running (e.g. in tests)
    pub sync: Option<SyncHandle>,
}

impl PortalState {
    pub fn new(store: Arc<dyn PortalStore>, fanout: FanoutRegistry, sync: Option<SyncHandle>) -> Self {
        Self { store, fanout, sync }
    }
}
