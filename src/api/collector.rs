//! Router of the collector: agent ingestion socket plus the read API

use axum::{Router, routing::get};

use super::{ingest, routes, state::CollectorState};

/// - `WS  /ingest` - agent stream (handshake, then one ack per sample)
/// - `GET /servers` - every known server
/// - `GET /performance` - records of one server in a time range
/// - `GET /health`
pub fn router(state: CollectorState) -> Router {
    Router::new()
        .route("/ingest", get(ingest::ingest_handler))
        .route("/servers", get(routes::servers::list_servers))
        .route("/performance", get(routes::servers::performance_range))
        .route("/health", get(routes::health::collector_health))
        .with_state(state)
}
