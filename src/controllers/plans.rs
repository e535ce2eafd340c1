use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;

use super::zones_of;
use crate::error::EngineError;
use crate::middleware::Tenant;
use crate::models::{Money, PlanId, PlanStatus, TenantId, TransactionId};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/plans/{id}", get(get_plan))
        .route("/plans/{id}/payments", post(add_payment))
        .route("/plans/{id}/extend", post(extend))
        .route("/plans/{id}/cancel", post(cancel))
}

async fn invalidate_transaction_zones(state: &AppState, tenant: TenantId, transaction_id: TransactionId) {
    // Кеш живёт несколько секунд, ошибку чтения только логируем
    match state.engine.transactions().get(tenant, transaction_id).await {
        Ok(view) => state.cache.invalidate(tenant, zones_of(&view.holds)).await,
        Err(e) => tracing::warn!(transaction = %transaction_id, error = %e, "Could not resolve zones to invalidate"),
    }
}

// GET /api/plans/{id}
async fn get_plan(
    State(state): State<Arc<AppState>>,
    Tenant(tenant): Tenant,
    Path(id): Path<PlanId>,
) -> Result<impl IntoResponse, EngineError> {
    let view = state.engine.plans().get_plan(tenant, id).await?;
    Ok(Json(view))
}

// POST /api/plans/{id}/payments
#[derive(Debug, Deserialize)]
struct PaymentRequest {
    amount: Money,
}

async fn add_payment(
    State(state): State<Arc<AppState>>,
    Tenant(tenant): Tenant,
    Path(id): Path<PlanId>,
    Json(req): Json<PaymentRequest>,
) -> Result<impl IntoResponse, EngineError> {
    let view = state.engine.plans().add_payment(tenant, id, req.amount).await?;
    if view.plan.status == PlanStatus::Completed {
        invalidate_transaction_zones(&state, tenant, view.plan.transaction_id).await;
    }
    Ok(Json(view))
}

// POST /api/plans/{id}/extend
#[derive(Debug, Deserialize)]
struct ExtendRequest {
    expires_at: DateTime<Utc>,
}

async fn extend(
    State(state): State<Arc<AppState>>,
    Tenant(tenant): Tenant,
    Path(id): Path<PlanId>,
    Json(req): Json<ExtendRequest>,
) -> Result<impl IntoResponse, EngineError> {
    let plan = state.engine.plans().extend_expiry(tenant, id, req.expires_at).await?;
    Ok(Json(plan))
}

// POST /api/plans/{id}/cancel
async fn cancel(
    State(state): State<Arc<AppState>>,
    Tenant(tenant): Tenant,
    Path(id): Path<PlanId>,
) -> Result<impl IntoResponse, EngineError> {
    let plan = state.engine.plans().cancel_plan(tenant, id).await?;
    invalidate_transaction_zones(&state, tenant, plan.transaction_id).await;
    Ok(Json(plan))
}
