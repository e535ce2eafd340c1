use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::{error, info, warn};

use super::inventory::{available, seat_is_free};
use super::pricing::{record_crossed_triggers, PricingContext};
use super::transaction::expire_in;
use super::{found, Engine, Notification};
use crate::error::{EngineError, EngineResult, StoreError};
use crate::models::{Hold, HoldId, HoldKind, HoldStatus, HoldTarget, SeatId, SeatStatus, SessionId, TenantId, TransactionId, Zone, ZoneId};
use crate::store::UnitOfWork;

/// One requested line of a lock: a seat or a general-admission quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockItem {
    pub zone_id: ZoneId,
    #[serde(flatten)]
    pub target: HoldTarget,
}

impl LockItem {
    pub fn seat(zone_id: ZoneId, seat_id: SeatId) -> Self {
        Self {
            zone_id,
            target: HoldTarget::Seat { seat_id },
        }
    }

    pub fn quantity(zone_id: ZoneId, quantity: u32) -> Self {
        Self {
            zone_id,
            target: HoldTarget::Quantity { quantity },
        }
    }
}

/// Outcome of one sweep pass over a tenant's cart locks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockSweep {
    pub locks_expired: usize,
    /// Reserved transactions that lost a cart lock and were expired with it.
    pub transactions_expired: Vec<TransactionId>,
}

/// Short-lived exclusive holds created when items enter a cart.
pub struct ReservationManager<'a> {
    engine: &'a Engine,
}

impl<'a> ReservationManager<'a> {
    pub(crate) fn new(engine: &'a Engine) -> Self {
        Self { engine }
    }

    /// Locks every item or none of them.
    ///
    /// Zones are locked in ascending id order, then each zone's seats and
    /// capacity are checked in the same unit of work the holds are written
    /// in. The captured price is the price at this instant.
    pub async fn lock(&self, tenant: TenantId, session: &SessionId, items: &[LockItem]) -> EngineResult<Vec<Hold>> {
        let batches = self.group(items)?;
        let now = self.engine.now();
        let expires_at = now + self.engine.config().cart_lock_ttl();

        let mut uow = self.engine.begin().await?;
        let mut created = Vec::new();

        for (zone_id, targets) in &batches {
            let zone = found(uow.lock_zone(tenant, *zone_id).await?, "zone", zone_id)?;
            let holds = lock_in_zone(uow.as_mut(), tenant, session, &zone, targets, now, expires_at).await?;
            created.extend(holds);
        }

        uow.commit().await?;

        info!(
            tenant = %tenant,
            session = %session,
            holds = created.len(),
            expires_at = %expires_at,
            "Cart locks created"
        );
        Ok(created)
    }

    /// Releases the session's active cart locks (all, or only `hold_ids`)
    /// and returns the ones it freed. Locks already claimed by a transaction
    /// are left alone. Idempotent.
    pub async fn release(
        &self,
        tenant: TenantId,
        session: &SessionId,
        hold_ids: Option<&[HoldId]>,
    ) -> EngineResult<Vec<Hold>> {
        let now = self.engine.now();
        let mut uow = self.engine.begin().await?;

        let mut released = Vec::new();
        for mut hold in uow.active_cart_locks(tenant, session).await? {
            if hold.transaction_id.is_some() {
                continue;
            }
            if let Some(ids) = hold_ids {
                if !ids.contains(&hold.id) {
                    continue;
                }
            }
            free_hold(uow.as_mut(), &mut hold, HoldStatus::Released, now).await?;
            released.push(hold);
        }

        uow.commit().await?;

        if !released.is_empty() {
            info!(tenant = %tenant, session = %session, released = released.len(), "Cart locks released");
        }
        Ok(released)
    }

    /// Pushes the expiry of all the session's active cart locks forward by
    /// `minutes`. Rejected as a whole if any of them is already past its TTL.
    pub async fn extend(&self, tenant: TenantId, session: &SessionId, minutes: i64) -> EngineResult<Vec<Hold>> {
        let config = self.engine.config();
        if minutes <= 0 || minutes > config.max_lock_extension_minutes {
            return Err(EngineError::InvalidRequest(format!(
                "extension must be between 1 and {} minutes",
                config.max_lock_extension_minutes
            )));
        }

        let now = self.engine.now();
        let mut uow = self.engine.begin().await?;

        let mut locks = uow.active_cart_locks(tenant, session).await?;
        if locks.is_empty() {
            return Err(EngineError::not_found("active cart lock of session", session));
        }
        if let Some(stale) = locks.iter().find(|h| !h.is_live_at(now)) {
            return Err(EngineError::LockExpired { hold_id: stale.id });
        }

        // A lock never lives longer than one full TTL plus one extension from now.
        let ceiling = now + config.cart_lock_ttl() + config.max_lock_extension();
        for hold in &mut locks {
            let pushed = (hold.expires_at + Duration::minutes(minutes)).min(ceiling);
            hold.expires_at = pushed.max(hold.expires_at);
            hold.updated_at = now;
            uow.update_hold(hold).await?;
        }

        uow.commit().await?;

        info!(tenant = %tenant, session = %session, minutes, holds = locks.len(), "Cart locks extended");
        Ok(locks)
    }

    /// Expires every active cart lock past its TTL, returning the units to
    /// the zone. A reserved transaction that owned such a lock expires with it.
    pub async fn sweep_expired(&self, tenant: TenantId) -> EngineResult<LockSweep> {
        let now = self.engine.now();
        let mut uow = self.engine.begin().await?;

        let candidates = uow.expired_cart_locks(tenant, now).await?;
        if candidates.is_empty() {
            return Ok(LockSweep::default());
        }

        // Row locks go transaction -> plan -> holds, as on every other write path.
        let owners: BTreeSet<TransactionId> = candidates.iter().filter_map(|h| h.transaction_id).collect();
        let mut locks_expired = 0;
        let mut transactions_expired = Vec::new();
        for tx_id in owners {
            if uow.transaction(tenant, tx_id).await?.is_none() {
                continue;
            }
            uow.plan_for_transaction(tenant, tx_id).await?;
            let stale: Vec<Hold> = uow
                .holds_for_transaction(tenant, tx_id)
                .await?
                .into_iter()
                .filter(|h| is_stale_cart_lock(h, now))
                .collect();
            if stale.is_empty() {
                continue;
            }
            for mut hold in stale {
                free_hold(uow.as_mut(), &mut hold, HoldStatus::Expired, now).await?;
                locks_expired += 1;
            }
            if let Some(tx) = expire_in(uow.as_mut(), tenant, tx_id, now).await? {
                transactions_expired.push(tx.id);
            }
        }

        for candidate in candidates.iter().filter(|h| h.transaction_id.is_none()) {
            // Re-read under the row lock: the lock may have been claimed or released meanwhile.
            let Some(mut hold) = uow.hold(tenant, candidate.id).await? else {
                continue;
            };
            if hold.transaction_id.is_some() || !is_stale_cart_lock(&hold, now) {
                continue;
            }
            free_hold(uow.as_mut(), &mut hold, HoldStatus::Expired, now).await?;
            locks_expired += 1;
        }

        uow.commit().await?;

        info!(
            tenant = %tenant,
            locks_expired,
            transactions_expired = transactions_expired.len(),
            "🧹 Expired cart locks swept"
        );
        self.engine.notify(
            transactions_expired
                .iter()
                .map(|id| Notification::TransactionExpired {
                    tenant_id: tenant,
                    transaction_id: *id,
                })
                .collect(),
        );
        Ok(LockSweep {
            locks_expired,
            transactions_expired,
        })
    }

    /// Groups items per zone in ascending zone order, merging
    /// general-admission quantities for the same zone.
    fn group(&self, items: &[LockItem]) -> EngineResult<BTreeMap<ZoneId, Vec<HoldTarget>>> {
        if items.is_empty() {
            return Err(EngineError::InvalidRequest("at least one item is required".into()));
        }
        let max = self.engine.config().max_items_per_lock;
        if items.len() > max {
            return Err(EngineError::InvalidRequest(format!("at most {} items per lock", max)));
        }

        let mut seen_seats = HashSet::new();
        let mut batches: BTreeMap<ZoneId, Vec<HoldTarget>> = BTreeMap::new();
        for item in items {
            let targets = batches.entry(item.zone_id).or_default();
            match item.target {
                HoldTarget::Seat { seat_id } => {
                    if !seen_seats.insert(seat_id) {
                        return Err(EngineError::InvalidRequest(format!("seat {} requested twice", seat_id)));
                    }
                    targets.push(item.target);
                }
                HoldTarget::Quantity { quantity: 0 } => {
                    return Err(EngineError::InvalidRequest("quantity must be at least 1".into()));
                }
                HoldTarget::Quantity { quantity } => {
                    let existing = targets.iter_mut().find_map(|t| match t {
                        HoldTarget::Quantity { quantity } => Some(quantity),
                        HoldTarget::Seat { .. } => None,
                    });
                    match existing {
                        Some(total) => {
                            *total = total
                                .checked_add(quantity)
                                .ok_or_else(|| EngineError::InvalidRequest("quantity out of range".into()))?;
                        }
                        None => targets.push(item.target),
                    }
                }
            }
        }
        Ok(batches)
    }
}

/// Checks and writes the holds of one zone. The zone row must already be
/// locked by the caller.
async fn lock_in_zone(
    uow: &mut dyn UnitOfWork,
    tenant: TenantId,
    session: &SessionId,
    zone: &Zone,
    targets: &[HoldTarget],
    now: DateTime<Utc>,
    expires_at: DateTime<Utc>,
) -> EngineResult<Vec<Hold>> {
    for target in targets {
        let matches_kind = match target {
            HoldTarget::Seat { .. } => zone.is_numbered(),
            HoldTarget::Quantity { .. } => !zone.is_numbered(),
        };
        if !matches_kind {
            return Err(EngineError::InvalidRequest(format!(
                "zone {} sells {} units",
                zone.id, zone.kind
            )));
        }
    }

    if !zone.is_numbered()
        && uow
            .active_cart_locks(tenant, session)
            .await?
            .iter()
            .any(|h| h.zone_id == zone.id)
    {
        return Err(EngineError::InvalidRequest(format!(
            "session already holds a cart lock in zone {}; release or extend it",
            zone.id
        )));
    }

    let occupancy = uow.occupancy(tenant, zone.id).await?;
    let remaining = available(zone, &occupancy);
    let requested: u32 = targets.iter().map(HoldTarget::units).sum();

    let unavailable = |seat_id: Option<SeatId>| EngineError::SeatUnavailable {
        zone_id: zone.id,
        seat_id,
        requested,
        available: remaining.max(0),
    };

    let mut rows = Vec::with_capacity(targets.len());
    for target in targets {
        match target.seat_id() {
            Some(seat_id) => {
                let seat = found(uow.seat(tenant, seat_id).await?, "seat", seat_id)?;
                if seat.zone_id != zone.id {
                    return Err(EngineError::InvalidRequest(format!(
                        "seat {} does not belong to zone {}",
                        seat_id, zone.id
                    )));
                }
                if !seat_is_free(uow, tenant, seat_id).await? {
                    warn!(tenant = %tenant, zone = %zone.id, seat = %seat_id, "Seat is not available");
                    return Err(unavailable(Some(seat_id)));
                }
                rows.push(Some(seat.row));
            }
            None => rows.push(None),
        }
    }

    if i64::from(requested) > remaining {
        warn!(tenant = %tenant, zone = %zone.id, requested, remaining, "Zone is out of capacity");
        return Err(unavailable(None));
    }

    let pricing = PricingContext::load(uow, tenant, zone.clone()).await?;

    let mut holds = Vec::with_capacity(targets.len());
    for (target, row) in targets.iter().zip(rows) {
        let quote = pricing.calculate(row, target.units(), now);
        let hold = Hold::cart_lock(
            tenant,
            session.clone(),
            zone.id,
            *target,
            quote.unit_price,
            quote.line_total,
            now,
            expires_at,
        );
        match uow.insert_hold(&hold).await {
            Ok(()) => {}
            Err(StoreError::Conflict(_)) => {
                warn!(tenant = %tenant, zone = %zone.id, seat = ?target.seat_id(), "Lost race for seat");
                return Err(unavailable(target.seat_id()));
            }
            Err(e) => return Err(e.into()),
        }
        if let Some(seat_id) = target.seat_id() {
            uow.set_seat_status(tenant, seat_id, SeatStatus::Locked).await?;
        }
        holds.push(hold);
    }

    let after = uow.occupancy(tenant, zone.id).await?;
    if available(zone, &after) < 0 {
        let detail = format!(
            "sold {} + held {} + blocked {} > capacity {}",
            after.sold, after.held, after.blocked, zone.capacity
        );
        error!(tenant = %tenant, zone = %zone.id, detail = %detail, "Capacity check failed after lock");
        return Err(EngineError::CapacityInconsistency {
            zone_id: zone.id,
            detail,
        });
    }

    let activated = record_crossed_triggers(uow, tenant, zone, now).await?;
    if !activated.is_empty() {
        info!(tenant = %tenant, zone = %zone.id, triggers = activated.len(), "Availability triggers activated");
    }

    Ok(holds)
}

fn is_stale_cart_lock(hold: &Hold, now: DateTime<Utc>) -> bool {
    hold.kind == HoldKind::CartLock && hold.is_active() && hold.expires_at < now
}

/// Ends an active hold without a sale and gives its seat back.
pub(crate) async fn free_hold(
    uow: &mut dyn UnitOfWork,
    hold: &mut Hold,
    status: HoldStatus,
    now: DateTime<Utc>,
) -> EngineResult<()> {
    hold.mark(status, now);
    uow.update_hold(hold).await?;
    if let Some(seat_id) = hold.seat_id() {
        uow.set_seat_status(hold.tenant_id, seat_id, SeatStatus::Available).await?;
    }
    Ok(())
}
