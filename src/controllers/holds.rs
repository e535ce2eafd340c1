use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

use super::{validated, zones_of};
use crate::error::EngineError;
use crate::middleware::Tenant;
use crate::models::{Hold, HoldId, SessionId};
use crate::services::LockItem;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/holds/lock", post(lock))
        .route("/holds/release", post(release))
        .route("/holds/extend", post(extend))
}

#[derive(Debug, Serialize)]
struct HoldsResponse {
    holds: Vec<Hold>,
}

// POST /api/holds/lock
#[derive(Debug, Deserialize, Validate)]
struct LockRequest {
    #[validate(length(min = 1, max = 128))]
    session_id: String,
    #[validate(length(min = 1))]
    items: Vec<LockItem>,
}

async fn lock(
    State(state): State<Arc<AppState>>,
    Tenant(tenant): Tenant,
    Json(req): Json<LockRequest>,
) -> Result<impl IntoResponse, EngineError> {
    let req = validated(req)?;
    let session = SessionId::new(req.session_id);

    let holds = state.engine.reservations().lock(tenant, &session, &req.items).await?;
    state.cache.invalidate(tenant, zones_of(&holds)).await;

    Ok((StatusCode::CREATED, Json(HoldsResponse { holds })))
}

// POST /api/holds/release
#[derive(Debug, Deserialize, Validate)]
struct ReleaseRequest {
    #[validate(length(min = 1, max = 128))]
    session_id: String,
    #[serde(default)]
    hold_ids: Option<Vec<HoldId>>,
}

#[derive(Debug, Serialize)]
struct ReleaseResponse {
    released: Vec<Hold>,
}

async fn release(
    State(state): State<Arc<AppState>>,
    Tenant(tenant): Tenant,
    Json(req): Json<ReleaseRequest>,
) -> Result<impl IntoResponse, EngineError> {
    let req = validated(req)?;
    let session = SessionId::new(req.session_id);

    let released = state
        .engine
        .reservations()
        .release(tenant, &session, req.hold_ids.as_deref())
        .await?;
    state.cache.invalidate(tenant, zones_of(&released)).await;

    Ok(Json(ReleaseResponse { released }))
}

// POST /api/holds/extend
#[derive(Debug, Deserialize, Validate)]
struct ExtendRequest {
    #[validate(length(min = 1, max = 128))]
    session_id: String,
    #[validate(range(min = 1))]
    minutes: i64,
}

async fn extend(
    State(state): State<Arc<AppState>>,
    Tenant(tenant): Tenant,
    Json(req): Json<ExtendRequest>,
) -> Result<impl IntoResponse, EngineError> {
    let req = validated(req)?;
    let session = SessionId::new(req.session_id);

    let holds = state.engine.reservations().extend(tenant, &session, req.minutes).await?;
    Ok(Json(HoldsResponse { holds }))
}
