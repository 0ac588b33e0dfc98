//! Health check endpoints

use axum::{Json, extract::State};
use serde_json::{Value, json};

use crate::api::error::ApiResult;
use crate::api::state::{CollectorState, PortalState};
use crate::util;

/// GET /health
pub async fn collector_health(State(state): State<CollectorState>) -> ApiResult<Json<Value>> {
    let database = state.store.health_check().await?;

    Ok(Json(json!({
        "status": if database.healthy { "ok" } else { "degraded" },
        "timestamp": util::format_timestamp(&util::now()),
        "database": database.message,
    })))
}

/// GET /api/health
pub async fn portal_health(State(state): State<PortalState>) -> ApiResult<Json<Value>> {
    let database = state.store.health_check().await?;

    Ok(Json(json!({
        "status": if database.healthy { "ok" } else { "degraded" },
        "timestamp": util::format_timestamp(&util::now()),
        "database": database.message,
        "sync_running": state.sync.is_some(),
        "active_subscribers": state.fanout.active_subscribers(),
    })))
}
