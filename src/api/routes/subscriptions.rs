//! Subscription endpoints ("user watches server")
//!
//! `user_id` is an opaque id owned by the external account system.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::api::error::{ApiError, ApiResult};
use crate::api::state::PortalState;
use crate::storage::schema::Subscription;

#[derive(Debug, Deserialize)]
pub struct UserQuery {
    pub user_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct NewSubscription {
    pub user_id: i64,
    pub server_id: i64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Deserialize)]
pub struct SubscriptionUpdate {
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub notes: String,
}

/// GET /api/subscriptions?user_id=
pub async fn list_subscriptions(
    State(state): State<PortalState>,
    Query(query): Query<UserQuery>,
) -> ApiResult<Json<Vec<Subscription>>> {
    let user_id = query
        .user_id
        .ok_or_else(|| ApiError::InvalidRequest("user_id is required".to_string()))?;

    Ok(Json(state.store.list_subscriptions(user_id).await?))
}

/// POST /api/subscriptions
pub async fn add_subscription(
    State(state): State<PortalState>,
    Json(body): Json<NewSubscription>,
) -> ApiResult<(StatusCode, Json<Subscription>)> {
    let subscription = state
        .store
        .add_subscription(body.user_id, body.server_id, &body.tags, &body.notes)
        .await?;

    Ok((StatusCode::CREATED, Json(subscription)))
}

/// PUT /api/subscriptions/:id
pub async fn update_subscription(
    State(state): State<PortalState>,
    Path(id): Path<i64>,
    Json(body): Json<SubscriptionUpdate>,
) -> ApiResult<Json<Subscription>> {
    let subscription = state
        .store
        .update_subscription(id, &body.tags, &body.notes)
        .await?;

    Ok(Json(subscription))
}

/// DELETE /api/subscriptions/:id
pub async fn delete_subscription(
    State(state): State<PortalState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    state.store.delete_subscription(id).await?;
    Ok(Json(json!({ "deleted": id })))
}
