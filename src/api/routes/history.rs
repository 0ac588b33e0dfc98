//! Portal read endpoints over Store B

use axum::{
    Json,
    extract::{Query, State},
};

use super::RangeParams;
use crate::api::{error::ApiResult, state::PortalState};
use crate::storage::schema::{AlertRecord, PerformanceRecord, ServerRecord};

/// GET /api/servers
pub async fn list_servers(State(state): State<PortalState>) -> ApiResult<Json<Vec<ServerRecord>>> {
    Ok(Json(state.store.list_servers().await?))
}

/// GET /api/performance-data?server_id=&start_time=&end_time=
pub async fn performance_data(
    State(state): State<PortalState>,
    Query(params): Query<RangeParams>,
) -> ApiResult<Json<Vec<PerformanceRecord>>> {
    let range = params.into_range()?;
    Ok(Json(state.store.performance_range(range).await?))
}

/// GET /api/alerts?server_id=&start_time=&end_time=
pub async fn alerts(
    State(state): State<PortalState>,
    Query(params): Query<RangeParams>,
) -> ApiResult<Json<Vec<AlertRecord>>> {
    let range = params.into_range()?;
    Ok(Json(state.store.alerts_range(range).await?))
}
