use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::error::EngineError;
use crate::middleware::Tenant;
use crate::models::{RowAdjustment, Seat, SeatId, Zone, ZoneId};
use crate::services::{NewPriceStage, NewZone};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/admin/sweep", post(sweep))
        .route("/admin/zones", post(define_zone))
        .route("/admin/zones/{zone}/seats", get(seats))
        .route("/admin/zones/{zone}/row-pricing", post(add_row_pricing))
        .route("/admin/zones/{zone}/triggers", post(add_trigger))
        .route("/admin/stages", post(add_price_stage))
        .route("/admin/seats/{seat}/block", post(block_seat))
        .route("/admin/seats/{seat}/unblock", post(unblock_seat))
}

// POST /api/admin/sweep
async fn sweep(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, EngineError> {
    info!("🧹 Manual sweep requested");
    let report = state.sweeper.run_once().await?;
    Ok(Json(report))
}

/* ---------- CATALOG ---------- */

#[derive(Debug, Serialize)]
struct ZoneResponse {
    zone: Zone,
    seats: Vec<Seat>,
}

// POST /api/admin/zones
async fn define_zone(
    State(state): State<Arc<AppState>>,
    Tenant(tenant): Tenant,
    Json(req): Json<NewZone>,
) -> Result<impl IntoResponse, EngineError> {
    let (zone, seats) = state.engine.catalog().define_zone(tenant, req).await?;
    Ok((StatusCode::CREATED, Json(ZoneResponse { zone, seats })))
}

// GET /api/admin/zones/{zone}/seats
async fn seats(
    State(state): State<Arc<AppState>>,
    Tenant(tenant): Tenant,
    Path(zone_id): Path<ZoneId>,
) -> Result<impl IntoResponse, EngineError> {
    let seats = state.engine.catalog().seats(tenant, zone_id).await?;
    Ok(Json(seats))
}

// POST /api/admin/stages
async fn add_price_stage(
    State(state): State<Arc<AppState>>,
    Tenant(tenant): Tenant,
    Json(req): Json<NewPriceStage>,
) -> Result<impl IntoResponse, EngineError> {
    let stage = state.engine.catalog().add_price_stage(tenant, req).await?;
    Ok((StatusCode::CREATED, Json(stage)))
}

// POST /api/admin/zones/{zone}/row-pricing
#[derive(Debug, Deserialize)]
struct RowPricingRequest {
    row_from: i32,
    row_to: i32,
    adjustment: RowAdjustment,
}

async fn add_row_pricing(
    State(state): State<Arc<AppState>>,
    Tenant(tenant): Tenant,
    Path(zone_id): Path<ZoneId>,
    Json(req): Json<RowPricingRequest>,
) -> Result<impl IntoResponse, EngineError> {
    let rule = state
        .engine
        .catalog()
        .add_row_pricing(tenant, zone_id, req.row_from, req.row_to, req.adjustment)
        .await?;
    Ok((StatusCode::CREATED, Json(rule)))
}

// POST /api/admin/zones/{zone}/triggers
#[derive(Debug, Deserialize)]
struct TriggerRequest {
    threshold_pct: Decimal,
    surcharge_pct: Decimal,
}

async fn add_trigger(
    State(state): State<Arc<AppState>>,
    Tenant(tenant): Tenant,
    Path(zone_id): Path<ZoneId>,
    Json(req): Json<TriggerRequest>,
) -> Result<impl IntoResponse, EngineError> {
    let trigger = state
        .engine
        .catalog()
        .add_trigger(tenant, zone_id, req.threshold_pct, req.surcharge_pct)
        .await?;
    Ok((StatusCode::CREATED, Json(trigger)))
}

// POST /api/admin/seats/{seat}/block
async fn block_seat(
    State(state): State<Arc<AppState>>,
    Tenant(tenant): Tenant,
    Path(seat_id): Path<SeatId>,
) -> Result<impl IntoResponse, EngineError> {
    let seat = state.engine.catalog().block_seat(tenant, seat_id).await?;
    state.cache.invalidate(tenant, [seat.zone_id]).await;
    Ok(Json(seat))
}

// POST /api/admin/seats/{seat}/unblock
async fn unblock_seat(
    State(state): State<Arc<AppState>>,
    Tenant(tenant): Tenant,
    Path(seat_id): Path<SeatId>,
) -> Result<impl IntoResponse, EngineError> {
    let seat = state.engine.catalog().unblock_seat(tenant, seat_id).await?;
    state.cache.invalidate(tenant, [seat.zone_id]).await;
    Ok(Json(seat))
}
