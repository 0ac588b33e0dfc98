//! HTTP and WebSocket servers
//!
//! Two routers share the same building blocks:
//!
//! - [`collector::router`] - agent ingestion socket and the read API polled by
//!   the sync bridge
//! - [`portal::router`] - history/alert REST API, subscriptions, health and
//!   the per-user fan-out socket
//!
//! Both are served by [`serve`], which adds tracing and CORS layers and
//! exposes the peer address to handlers.

pub mod collector;
pub mod error;
pub mod ingest;
pub mod middleware;
pub mod portal;
pub mod routes;
pub mod state;
pub mod websocket;

pub use error::{ApiError, ApiResult};
pub use state::{CollectorState, PortalState};

use std::net::{Ipv4Addr, SocketAddr};

use axum::Router;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_addr: SocketAddr,

    /// Enable permissive CORS for browser frontends
    pub enable_cors: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 8080)),
            enable_cors: true,
        }
    }
}

impl ApiConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Self::default()
        }
    }
}

/// Binds `config.bind_addr` and serves `app` in a background task.
///
/// Returns the bound address (useful with port 0) and the server task.
pub async fn serve(config: ApiConfig, app: Router) -> anyhow::Result<(SocketAddr, JoinHandle<()>)> {
    let mut app = app.layer(TraceLayer::new_for_http());

    if config.enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        app = app.layer(cors);
    }

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    let addr = listener.local_addr()?;

    info!("API server listening on {}", addr);

    let task = tokio::spawn(async move {
        let service = app.into_make_service_with_connect_info::<SocketAddr>();
        if let Err(e) = axum::serve(listener, service).await {
            error!("API server error: {}", e);
        }
    });

    Ok((addr, task))
}

/// Serves the collector router
pub async fn spawn_collector_api(
    config: ApiConfig,
    state: CollectorState,
) -> anyhow::Result<(SocketAddr, JoinHandle<()>)> {
    serve(config, collector::router(state)).await
}

/// Serves the portal router
pub async fn spawn_portal_api(
    config: ApiConfig,
    state: PortalState,
    api_token: Option<String>,
) -> anyhow::Result<(SocketAddr, JoinHandle<()>)> {
    serve(config, portal::router(state, api_token)).await
}
