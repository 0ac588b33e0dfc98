//! Router of the portal: REST history API, subscriptions and the fan-out socket

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post, put},
};

use super::{middleware::auth::auth_middleware, routes, state::PortalState, websocket};

/// Builds the portal router.
///
/// When `api_token` is set every REST route requires a bearer token;
/// `/api/stream` and `/api/health` stay open.
pub fn router(state: PortalState, api_token: Option<String>) -> Router {
    let mut protected = Router::new()
        .route("/api/servers", get(routes::history::list_servers))
        .route("/api/performance-data", get(routes::history::performance_data))
        .route("/api/alerts", get(routes::history::alerts))
        .route(
            "/api/subscriptions",
            get(routes::subscriptions::list_subscriptions)
                .post(routes::subscriptions::add_subscription),
        )
        .route(
            "/api/subscriptions/:id",
            put(routes::subscriptions::update_subscription)
                .delete(routes::subscriptions::delete_subscription),
        )
        .route("/api/stats", get(routes::stats::get_stats))
        .route("/api/sync", post(routes::stats::trigger_sync));

    if let Some(token) = api_token.filter(|t| !t.is_empty()) {
        let token: Arc<str> = token.into();
        protected = protected.route_layer(axum::middleware::from_fn_with_state(token, auth_middleware));
    }

    Router::new()
        .route("/api/health", get(routes::health::portal_health))
        .route("/api/stream", get(websocket::stream_handler))
        .merge(protected)
        .with_state(state)
}
