use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use validator::Validate;

use super::{validated, zones_of};
use crate::error::EngineError;
use crate::middleware::Tenant;
use crate::models::{Annotations, CustomerId, HoldId, Money, PlanType, SessionId, TransactionId};
use crate::services::NewPlan;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/transactions", post(open))
        .route("/transactions/{id}", get(get_transaction))
        .route("/transactions/{id}/reserve", post(reserve))
        .route("/transactions/{id}/pay", post(pay))
        .route("/transactions/{id}/cancel", post(cancel))
        .route("/transactions/{id}/plan", post(create_plan))
}

// POST /api/transactions
#[derive(Debug, Deserialize, Validate)]
struct OpenRequest {
    #[validate(length(min = 1, max = 128))]
    session_id: String,
    customer_id: CustomerId,
}

async fn open(
    State(state): State<Arc<AppState>>,
    Tenant(tenant): Tenant,
    Json(req): Json<OpenRequest>,
) -> Result<impl IntoResponse, EngineError> {
    let req = validated(req)?;
    let tx = state
        .engine
        .transactions()
        .open(tenant, SessionId::new(req.session_id), req.customer_id)
        .await?;
    Ok((StatusCode::CREATED, Json(tx)))
}

// GET /api/transactions/{id}
async fn get_transaction(
    State(state): State<Arc<AppState>>,
    Tenant(tenant): Tenant,
    Path(id): Path<TransactionId>,
) -> Result<impl IntoResponse, EngineError> {
    let view = state.engine.transactions().get(tenant, id).await?;
    Ok(Json(view))
}

// POST /api/transactions/{id}/reserve
#[derive(Debug, Default, Deserialize)]
struct ReserveRequest {
    #[serde(default)]
    hold_ids: Option<Vec<HoldId>>,
}

async fn reserve(
    State(state): State<Arc<AppState>>,
    Tenant(tenant): Tenant,
    Path(id): Path<TransactionId>,
    Json(req): Json<ReserveRequest>,
) -> Result<impl IntoResponse, EngineError> {
    let view = state
        .engine
        .transactions()
        .reserve(tenant, id, req.hold_ids.as_deref())
        .await?;
    Ok(Json(view))
}

// POST /api/transactions/{id}/pay
#[derive(Debug, Deserialize)]
struct PayRequest {
    amount: Money,
}

async fn pay(
    State(state): State<Arc<AppState>>,
    Tenant(tenant): Tenant,
    Path(id): Path<TransactionId>,
    Json(req): Json<PayRequest>,
) -> Result<impl IntoResponse, EngineError> {
    let view = state.engine.transactions().pay_in_full(tenant, id, req.amount).await?;
    state.cache.invalidate(tenant, zones_of(&view.holds)).await;
    Ok(Json(view))
}

// POST /api/transactions/{id}/cancel
async fn cancel(
    State(state): State<Arc<AppState>>,
    Tenant(tenant): Tenant,
    Path(id): Path<TransactionId>,
) -> Result<impl IntoResponse, EngineError> {
    let before = state.engine.transactions().get(tenant, id).await?;
    let tx = state.engine.transactions().cancel(tenant, id).await?;
    state.cache.invalidate(tenant, zones_of(&before.holds)).await;
    Ok(Json(tx))
}

// POST /api/transactions/{id}/plan
#[derive(Debug, Deserialize, Validate)]
struct PlanRequest {
    plan_type: Option<PlanType>,
    #[validate(range(min = 1, max = 48))]
    installment_count: Option<u32>,
    expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    annotations: Annotations,
}

async fn create_plan(
    State(state): State<Arc<AppState>>,
    Tenant(tenant): Tenant,
    Path(id): Path<TransactionId>,
    Json(req): Json<PlanRequest>,
) -> Result<impl IntoResponse, EngineError> {
    let req = validated(req)?;
    let params = NewPlan {
        plan_type: req.plan_type,
        installment_count: req.installment_count,
        expires_at: req.expires_at,
        annotations: req.annotations,
    };
    let plan = state.engine.plans().create_plan(tenant, id, params).await?;
    Ok((StatusCode::CREATED, Json(plan)))
}
