use rust_decimal::Decimal;

use super::{found, Engine};
use crate::error::EngineResult;
use crate::models::{AvailabilitySnapshot, Occupancy, SeatId, SeatStatus, TenantId, Zone, ZoneId};
use crate::store::UnitOfWork;

/// Read side of inventory. Every figure is derived from hold records and
/// seat flags; there is no stored counter.
pub struct InventoryLedger<'a> {
    engine: &'a Engine,
}

impl<'a> InventoryLedger<'a> {
    pub(crate) fn new(engine: &'a Engine) -> Self {
        Self { engine }
    }

    /// Capacity minus sold units, active holds and blocked seats.
    pub async fn available_capacity(&self, tenant: TenantId, zone_id: ZoneId) -> EngineResult<i64> {
        let mut uow = self.engine.begin().await?;
        let zone = load_zone(uow.as_mut(), tenant, zone_id).await?;
        let occupancy = uow.occupancy(tenant, zone_id).await?;
        Ok(available(&zone, &occupancy).max(0))
    }

    /// No active hold references the seat and its status is `available`.
    pub async fn is_seat_free(&self, tenant: TenantId, seat_id: SeatId) -> EngineResult<bool> {
        let mut uow = self.engine.begin().await?;
        seat_is_free(uow.as_mut(), tenant, seat_id).await
    }

    pub async fn snapshot(&self, tenant: TenantId, zone_id: ZoneId) -> EngineResult<AvailabilitySnapshot> {
        let mut uow = self.engine.begin().await?;
        let zone = load_zone(uow.as_mut(), tenant, zone_id).await?;
        let occupancy = uow.occupancy(tenant, zone_id).await?;
        Ok(snapshot_of(&zone, &occupancy))
    }
}

pub(crate) async fn load_zone(uow: &mut dyn UnitOfWork, tenant: TenantId, zone_id: ZoneId) -> EngineResult<Zone> {
    found(uow.zone(tenant, zone_id).await?, "zone", zone_id)
}

pub(crate) async fn seat_is_free(uow: &mut dyn UnitOfWork, tenant: TenantId, seat_id: SeatId) -> EngineResult<bool> {
    let seat = found(uow.seat(tenant, seat_id).await?, "seat", seat_id)?;
    if seat.status != SeatStatus::Available {
        return Ok(false);
    }
    Ok(uow.active_hold_for_seat(tenant, seat_id).await?.is_none())
}

/// Raw availability. Negative only if the ledger is inconsistent.
pub(crate) fn available(zone: &Zone, occupancy: &Occupancy) -> i64 {
    zone.capacity - occupancy.taken() - occupancy.blocked
}

/// Share of capacity that is sold or held, in percent.
pub(crate) fn occupancy_pct(zone: &Zone, occupancy: &Occupancy) -> Decimal {
    if zone.capacity <= 0 {
        return Decimal::ONE_HUNDRED;
    }
    Decimal::from(occupancy.taken()) * Decimal::ONE_HUNDRED / Decimal::from(zone.capacity)
}

pub(crate) fn snapshot_of(zone: &Zone, occupancy: &Occupancy) -> AvailabilitySnapshot {
    AvailabilitySnapshot {
        zone_id: zone.id,
        capacity: zone.capacity,
        sold: occupancy.sold,
        held: occupancy.held,
        blocked: occupancy.blocked,
        available: available(zone, occupancy).max(0),
        occupancy_pct: occupancy_pct(zone, occupancy).round_dp(2),
    }
}
