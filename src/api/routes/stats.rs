//! Portal statistics and manual sync trigger

use axum::{Json, extract::State};
use serde_json::{Value, json};

use crate::actors::messages::SyncReport;
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::PortalState;
use crate::util;

/// GET /api/stats
///
/// Row counts of Store B plus the number of live fan-out tasks
pub async fn get_stats(State(state): State<PortalState>) -> ApiResult<Json<Value>> {
    let stats = state.store.stats().await?;

    Ok(Json(json!({
        "timestamp": util::format_timestamp(&util::now()),
        "storage": stats,
        "active_subscribers": state.fanout.active_subscribers(),
    })))
}

/// POST /api/sync
///
/// Runs one sync cycle right away and reports what it imported
pub async fn trigger_sync(State(state): State<PortalState>) -> ApiResult<Json<SyncReport>> {
    let sync = state
        .sync
        .as_ref()
        .ok_or_else(|| ApiError::Unavailable("sync bridge is not running".to_string()))?;

    Ok(Json(sync.sync_now().await?))
}
