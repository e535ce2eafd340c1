pub mod admin;
pub mod holds;
pub mod plans;
pub mod transactions;
pub mod zones;

use axum::Router;
use std::collections::BTreeSet;
use std::sync::Arc;
use validator::Validate;

use crate::error::EngineError;
use crate::models::{Hold, ZoneId};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .merge(holds::routes())
        .merge(zones::routes())
        .merge(transactions::routes())
        .merge(plans::routes())
        .merge(admin::routes())
}

/* ---------- helpers ---------- */

pub(crate) fn validated<T: Validate>(req: T) -> Result<T, EngineError> {
    req.validate()
        .map_err(|e| EngineError::InvalidRequest(e.to_string()))?;
    Ok(req)
}

pub(crate) fn zones_of(holds: &[Hold]) -> BTreeSet<ZoneId> {
    holds.iter().map(|h| h.zone_id).collect()
}
