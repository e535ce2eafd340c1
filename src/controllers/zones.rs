use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use validator::Validate;

use super::validated;
use crate::error::EngineError;
use crate::middleware::Tenant;
use crate::models::ZoneId;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/zones/{zone}/price", get(price))
        .route("/zones/{zone}/availability", get(availability))
}

fn one() -> u32 {
    1
}

// GET /api/zones/{zone}/price?row=3&quantity=2
#[derive(Debug, Deserialize, Validate)]
struct PriceQuery {
    row: Option<i32>,
    #[serde(default = "one")]
    #[validate(range(min = 1, max = 1000))]
    quantity: u32,
    at: Option<DateTime<Utc>>,
}

async fn price(
    State(state): State<Arc<AppState>>,
    Tenant(tenant): Tenant,
    Path(zone_id): Path<ZoneId>,
    Query(query): Query<PriceQuery>,
) -> Result<impl IntoResponse, EngineError> {
    let query = validated(query)?;
    let quote = state
        .engine
        .pricing()
        .price_for(tenant, zone_id, query.row, query.quantity, query.at)
        .await?;
    Ok(Json(quote))
}

// GET /api/zones/{zone}/availability
async fn availability(
    State(state): State<Arc<AppState>>,
    Tenant(tenant): Tenant,
    Path(zone_id): Path<ZoneId>,
) -> Result<impl IntoResponse, EngineError> {
    let snapshot = state.cache.snapshot(&state.engine, tenant, zone_id).await?;
    Ok(Json(snapshot))
}
