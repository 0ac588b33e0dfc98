//! Collector read API, polled by the sync bridge

use axum::{
    Json,
    extract::{Query, State},
};

use super::RangeParams;
use crate::api::{error::ApiResult, state::CollectorState};
use crate::storage::schema::{PerformanceRecord, ServerRecord};

/// GET /servers
pub async fn list_servers(State(state): State<CollectorState>) -> ApiResult<Json<Vec<ServerRecord>>> {
    Ok(Json(state.store.list_servers().await?))
}

/// GET /performance?server_id=&start_time=&end_time=
///
/// Both bounds are inclusive.
pub async fn performance_range(
    State(state): State<CollectorState>,
    Query(params): Query<RangeParams>,
) -> ApiResult<Json<Vec<PerformanceRecord>>> {
    let range = params.into_range()?;
    Ok(Json(state.store.performance_range(range).await?))
}
