use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashSet;
use tracing::info;

use super::inventory::{load_zone, seat_is_free};
use super::{found, Engine};
use crate::error::{EngineError, EngineResult};
use crate::models::{
    AvailabilityTrigger, EventId, Money, PriceStage, RowAdjustment, RowPricing, RowPricingId, Seat, SeatId,
    SeatStatus, StageId, StageModifier, TenantId, TriggerId, Zone, ZoneId, ZoneKind,
};

/// One row of a numbered zone: `seats` seats numbered from 1.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RowLayout {
    pub row: i32,
    pub seats: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewZone {
    pub event_id: EventId,
    pub name: String,
    pub kind: ZoneKind,
    /// General admission only; numbered zones take their capacity from `rows`.
    pub capacity: Option<i64>,
    pub base_price: Money,
    #[serde(default)]
    pub rows: Vec<RowLayout>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewPriceStage {
    pub event_id: EventId,
    pub name: String,
    #[serde(default)]
    pub zone_ids: Vec<ZoneId>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub units_ceiling: Option<i64>,
    pub modifier: StageModifier,
    #[serde(default)]
    pub priority: i32,
}

/// Minimal event setup: zones with their seats and the pricing rules that
/// hang off them. Venue management proper lives outside the engine.
pub struct Catalog<'a> {
    engine: &'a Engine,
}

impl<'a> Catalog<'a> {
    pub(crate) fn new(engine: &'a Engine) -> Self {
        Self { engine }
    }

    pub async fn define_zone(&self, tenant: TenantId, request: NewZone) -> EngineResult<(Zone, Vec<Seat>)> {
        if request.base_price.is_negative() {
            return Err(EngineError::InvalidRequest("base price cannot be negative".into()));
        }
        let capacity = match request.kind {
            ZoneKind::Numbered => {
                if request.capacity.is_some() {
                    return Err(EngineError::InvalidRequest(
                        "numbered zones take their capacity from the seat layout".into(),
                    ));
                }
                let mut rows = HashSet::new();
                let mut total = 0i64;
                for layout in &request.rows {
                    if layout.seats <= 0 || !rows.insert(layout.row) {
                        return Err(EngineError::InvalidRequest(format!("invalid layout for row {}", layout.row)));
                    }
                    total += i64::from(layout.seats);
                }
                total
            }
            ZoneKind::General => {
                if !request.rows.is_empty() {
                    return Err(EngineError::InvalidRequest("general admission zones have no rows".into()));
                }
                match request.capacity {
                    Some(c) if c >= 0 => c,
                    _ => return Err(EngineError::InvalidRequest("capacity is required".into())),
                }
            }
        };

        let zone = Zone {
            id: ZoneId::new(),
            tenant_id: tenant,
            event_id: request.event_id,
            name: request.name,
            kind: request.kind,
            capacity,
            base_price: request.base_price,
            created_at: self.engine.now(),
        };
        let zone_id = zone.id;
        let seats: Vec<Seat> = request
            .rows
            .iter()
            .flat_map(|layout| {
                (1..=layout.seats).map(move |number| Seat {
                    id: SeatId::new(),
                    tenant_id: tenant,
                    zone_id,
                    row: layout.row,
                    number,
                    status: SeatStatus::Available,
                })
            })
            .collect();

        let mut uow = self.engine.begin().await?;
        uow.insert_zone(&zone).await?;
        for seat in &seats {
            uow.insert_seat(seat).await?;
        }
        uow.commit().await?;

        info!(tenant = %tenant, zone = %zone.id, kind = %zone.kind, capacity, "Zone defined");
        Ok((zone, seats))
    }

    pub async fn add_price_stage(&self, tenant: TenantId, request: NewPriceStage) -> EngineResult<PriceStage> {
        if request.starts_at >= request.ends_at {
            return Err(EngineError::InvalidRequest("stage must start before it ends".into()));
        }
        if matches!(request.units_ceiling, Some(c) if c < 0) {
            return Err(EngineError::InvalidRequest("units ceiling cannot be negative".into()));
        }
        if let StageModifier::Fixed(price) = request.modifier {
            if price.is_negative() {
                return Err(EngineError::InvalidRequest("fixed stage price cannot be negative".into()));
            }
        }

        let mut uow = self.engine.begin().await?;
        for zone_id in &request.zone_ids {
            let zone = load_zone(uow.as_mut(), tenant, *zone_id).await?;
            if zone.event_id != request.event_id {
                return Err(EngineError::InvalidRequest(format!(
                    "zone {} belongs to another event",
                    zone_id
                )));
            }
        }

        let stage = PriceStage {
            id: StageId::new(),
            tenant_id: tenant,
            event_id: request.event_id,
            name: request.name,
            zone_ids: request.zone_ids,
            starts_at: request.starts_at,
            ends_at: request.ends_at,
            units_ceiling: request.units_ceiling,
            modifier: request.modifier,
            priority: request.priority,
        };
        uow.insert_price_stage(&stage).await?;
        uow.commit().await?;

        info!(tenant = %tenant, stage = %stage.id, name = %stage.name, priority = stage.priority, "Price stage added");
        Ok(stage)
    }

    pub async fn add_row_pricing(
        &self,
        tenant: TenantId,
        zone_id: ZoneId,
        row_from: i32,
        row_to: i32,
        adjustment: RowAdjustment,
    ) -> EngineResult<RowPricing> {
        if row_from > row_to {
            return Err(EngineError::InvalidRequest("row range is empty".into()));
        }
        if adjustment.value().is_sign_negative() {
            return Err(EngineError::InvalidRequest("row adjustment cannot be negative".into()));
        }

        let mut uow = self.engine.begin().await?;
        let zone = load_zone(uow.as_mut(), tenant, zone_id).await?;
        if !zone.is_numbered() {
            return Err(EngineError::InvalidRequest("row pricing needs a numbered zone".into()));
        }
        let rule = RowPricing {
            id: RowPricingId::new(),
            tenant_id: tenant,
            zone_id,
            row_from,
            row_to,
            adjustment,
        };
        uow.insert_row_pricing(&rule).await?;
        uow.commit().await?;
        Ok(rule)
    }

    pub async fn add_trigger(
        &self,
        tenant: TenantId,
        zone_id: ZoneId,
        threshold_pct: Decimal,
        surcharge_pct: Decimal,
    ) -> EngineResult<AvailabilityTrigger> {
        if threshold_pct <= Decimal::ZERO || threshold_pct > Decimal::ONE_HUNDRED {
            return Err(EngineError::InvalidRequest("threshold must be in (0, 100]".into()));
        }

        let mut uow = self.engine.begin().await?;
        load_zone(uow.as_mut(), tenant, zone_id).await?;
        let trigger = AvailabilityTrigger {
            id: TriggerId::new(),
            tenant_id: tenant,
            zone_id,
            threshold_pct,
            surcharge_pct,
        };
        uow.insert_trigger(&trigger).await?;
        uow.commit().await?;
        Ok(trigger)
    }

    /// Takes a free seat out of sale.
    pub async fn block_seat(&self, tenant: TenantId, seat_id: SeatId) -> EngineResult<Seat> {
        let mut uow = self.engine.begin().await?;
        let seat = found(uow.seat(tenant, seat_id).await?, "seat", seat_id)?;
        uow.lock_zone(tenant, seat.zone_id).await?;
        if !seat_is_free(uow.as_mut(), tenant, seat_id).await? {
            return Err(EngineError::SeatUnavailable {
                zone_id: seat.zone_id,
                seat_id: Some(seat_id),
                requested: 1,
                available: 0,
            });
        }
        uow.set_seat_status(tenant, seat_id, SeatStatus::Blocked).await?;
        uow.commit().await?;

        info!(tenant = %tenant, seat = %seat_id, "Seat blocked");
        Ok(Seat {
            status: SeatStatus::Blocked,
            ..seat
        })
    }

    pub async fn unblock_seat(&self, tenant: TenantId, seat_id: SeatId) -> EngineResult<Seat> {
        let mut uow = self.engine.begin().await?;
        let seat = found(uow.seat(tenant, seat_id).await?, "seat", seat_id)?;
        if seat.status != SeatStatus::Blocked {
            return Err(EngineError::invalid_transition("seat", seat.status, SeatStatus::Available));
        }
        uow.set_seat_status(tenant, seat_id, SeatStatus::Available).await?;
        uow.commit().await?;
        Ok(Seat {
            status: SeatStatus::Available,
            ..seat
        })
    }

    pub async fn seats(&self, tenant: TenantId, zone_id: ZoneId) -> EngineResult<Vec<Seat>> {
        let mut uow = self.engine.begin().await?;
        load_zone(uow.as_mut(), tenant, zone_id).await?;
        Ok(uow.seats_in_zone(tenant, zone_id).await?)
    }
}
