use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{Store, StoreResult, UnitOfWork};
use crate::error::StoreError;
use crate::models::{
    AvailabilityTrigger, Conversion, EventId, Hold, HoldId, HoldKind, HoldStatus, Occupancy, Payment,
    PaymentPlan, PlanId, PlanStatus, PriceStage, RowPricing, Seat, SeatId, SeatStatus, SessionId, StageId,
    TenantId, Transaction, TransactionId, TriggerActivation, TriggerId, Zone, ZoneId,
};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    zones: HashMap<ZoneId, Zone>,
    seats: HashMap<SeatId, Seat>,
    stages: HashMap<StageId, PriceStage>,
    row_pricing: Vec<RowPricing>,
    triggers: Vec<AvailabilityTrigger>,
    activations: Vec<TriggerActivation>,
    holds: HashMap<HoldId, Hold>,
    transactions: HashMap<TransactionId, Transaction>,
    plans: HashMap<PlanId, PaymentPlan>,
    payments: Vec<Payment>,
}

/// Store kept in process memory.
///
/// A unit of work takes the store-wide lock, works on a private copy and
/// publishes it on commit, so units are serializable. The one-active-hold-per-seat
/// rule is enforced on insert like the Postgres partial unique index.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn UnitOfWork>> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryUnit { guard, working }))
    }

    async fn tenants(&self) -> StoreResult<Vec<TenantId>> {
        let state = self.state.lock().await;
        let tenants: BTreeSet<TenantId> = state.zones.values().map(|z| z.tenant_id).collect();
        Ok(tenants.into_iter().collect())
    }
}

struct MemoryUnit {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

fn owned<T: Clone>(value: Option<&T>) -> Option<T> {
    value.cloned()
}

#[async_trait]
impl UnitOfWork for MemoryUnit {
    async fn insert_zone(&mut self, zone: &Zone) -> StoreResult<()> {
        if self.working.zones.contains_key(&zone.id) {
            return Err(StoreError::Conflict(format!("zone {} already exists", zone.id)));
        }
        self.working.zones.insert(zone.id, zone.clone());
        Ok(())
    }

    async fn zone(&mut self, tenant: TenantId, zone_id: ZoneId) -> StoreResult<Option<Zone>> {
        Ok(owned(self.working.zones.get(&zone_id).filter(|z| z.tenant_id == tenant)))
    }

    async fn lock_zone(&mut self, tenant: TenantId, zone_id: ZoneId) -> StoreResult<Option<Zone>> {
        // The whole unit already holds the store lock.
        self.zone(tenant, zone_id).await
    }

    async fn zones_for_event(&mut self, tenant: TenantId, event_id: EventId) -> StoreResult<Vec<Zone>> {
        let mut zones: Vec<Zone> = self
            .working
            .zones
            .values()
            .filter(|z| z.tenant_id == tenant && z.event_id == event_id)
            .cloned()
            .collect();
        zones.sort_by_key(|z| z.id);
        Ok(zones)
    }

    async fn insert_seat(&mut self, seat: &Seat) -> StoreResult<()> {
        let duplicate = self
            .working
            .seats
            .values()
            .any(|s| s.zone_id == seat.zone_id && s.row == seat.row && s.number == seat.number);
        if duplicate || self.working.seats.contains_key(&seat.id) {
            return Err(StoreError::Conflict(format!(
                "seat row {} number {} already exists in zone {}",
                seat.row, seat.number, seat.zone_id
            )));
        }
        self.working.seats.insert(seat.id, seat.clone());
        Ok(())
    }

    async fn seat(&mut self, tenant: TenantId, seat_id: SeatId) -> StoreResult<Option<Seat>> {
        Ok(owned(self.working.seats.get(&seat_id).filter(|s| s.tenant_id == tenant)))
    }

    async fn seats_in_zone(&mut self, tenant: TenantId, zone_id: ZoneId) -> StoreResult<Vec<Seat>> {
        let mut seats: Vec<Seat> = self
            .working
            .seats
            .values()
            .filter(|s| s.tenant_id == tenant && s.zone_id == zone_id)
            .cloned()
            .collect();
        seats.sort_by_key(|s| (s.row, s.number));
        Ok(seats)
    }

    async fn set_seat_status(&mut self, tenant: TenantId, seat_id: SeatId, status: SeatStatus) -> StoreResult<()> {
        match self.working.seats.get_mut(&seat_id).filter(|s| s.tenant_id == tenant) {
            Some(seat) => {
                seat.status = status;
                Ok(())
            }
            None => Err(StoreError::Corrupt(format!("seat {} vanished", seat_id))),
        }
    }

    async fn insert_price_stage(&mut self, stage: &PriceStage) -> StoreResult<()> {
        self.working.stages.insert(stage.id, stage.clone());
        Ok(())
    }

    async fn price_stages(&mut self, tenant: TenantId, event_id: EventId) -> StoreResult<Vec<PriceStage>> {
        let mut stages: Vec<PriceStage> = self
            .working
            .stages
            .values()
            .filter(|s| s.tenant_id == tenant && s.event_id == event_id)
            .cloned()
            .collect();
        stages.sort_by_key(|s| s.id);
        Ok(stages)
    }

    async fn insert_row_pricing(&mut self, rule: &RowPricing) -> StoreResult<()> {
        self.working.row_pricing.push(rule.clone());
        Ok(())
    }

    async fn row_pricing(&mut self, tenant: TenantId, zone_id: ZoneId) -> StoreResult<Vec<RowPricing>> {
        Ok(self
            .working
            .row_pricing
            .iter()
            .filter(|r| r.tenant_id == tenant && r.zone_id == zone_id)
            .cloned()
            .collect())
    }

    async fn insert_trigger(&mut self, trigger: &AvailabilityTrigger) -> StoreResult<()> {
        self.working.triggers.push(trigger.clone());
        Ok(())
    }

    async fn triggers(&mut self, tenant: TenantId, zone_id: ZoneId) -> StoreResult<Vec<AvailabilityTrigger>> {
        Ok(self
            .working
            .triggers
            .iter()
            .filter(|t| t.tenant_id == tenant && t.zone_id == zone_id)
            .cloned()
            .collect())
    }

    async fn trigger_activations(&mut self, tenant: TenantId, zone_id: ZoneId) -> StoreResult<Vec<TriggerId>> {
        Ok(self
            .working
            .activations
            .iter()
            .filter(|a| a.tenant_id == tenant && a.zone_id == zone_id)
            .map(|a| a.trigger_id)
            .collect())
    }

    async fn record_trigger_activation(&mut self, activation: &TriggerActivation) -> StoreResult<()> {
        let known = self
            .working
            .activations
            .iter()
            .any(|a| a.zone_id == activation.zone_id && a.trigger_id == activation.trigger_id);
        if !known {
            self.working.activations.push(activation.clone());
        }
        Ok(())
    }

    async fn occupancy(&mut self, tenant: TenantId, zone_id: ZoneId) -> StoreResult<Occupancy> {
        let mut occupancy = Occupancy::default();
        for hold in self
            .working
            .holds
            .values()
            .filter(|h| h.tenant_id == tenant && h.zone_id == zone_id)
        {
            match (hold.status, hold.conversion) {
                (HoldStatus::Active, _) => occupancy.held += i64::from(hold.units()),
                (HoldStatus::Converted, Some(Conversion::Sale)) => occupancy.sold += i64::from(hold.units()),
                _ => {}
            }
        }
        occupancy.blocked = self
            .working
            .seats
            .values()
            .filter(|s| s.tenant_id == tenant && s.zone_id == zone_id && s.status == SeatStatus::Blocked)
            .count() as i64;
        Ok(occupancy)
    }

    async fn units_sold(&mut self, tenant: TenantId, zone_ids: &[ZoneId]) -> StoreResult<i64> {
        Ok(self
            .working
            .holds
            .values()
            .filter(|h| {
                h.tenant_id == tenant
                    && zone_ids.contains(&h.zone_id)
                    && h.status == HoldStatus::Converted
                    && h.conversion == Some(Conversion::Sale)
            })
            .map(|h| i64::from(h.units()))
            .sum())
    }

    async fn insert_hold(&mut self, hold: &Hold) -> StoreResult<()> {
        if let (Some(seat_id), HoldStatus::Active) = (hold.seat_id(), hold.status) {
            let taken = self
                .working
                .holds
                .values()
                .any(|h| h.is_active() && h.seat_id() == Some(seat_id));
            if taken {
                return Err(StoreError::Conflict(format!("seat {} already has an active hold", seat_id)));
            }
        }
        self.working.holds.insert(hold.id, hold.clone());
        Ok(())
    }

    async fn update_hold(&mut self, hold: &Hold) -> StoreResult<()> {
        match self.working.holds.get_mut(&hold.id).filter(|h| h.tenant_id == hold.tenant_id) {
            Some(existing) => {
                *existing = hold.clone();
                Ok(())
            }
            None => Err(StoreError::Corrupt(format!("hold {} vanished", hold.id))),
        }
    }

    async fn hold(&mut self, tenant: TenantId, hold_id: HoldId) -> StoreResult<Option<Hold>> {
        Ok(owned(self.working.holds.get(&hold_id).filter(|h| h.tenant_id == tenant)))
    }

    async fn active_hold_for_seat(&mut self, tenant: TenantId, seat_id: SeatId) -> StoreResult<Option<Hold>> {
        Ok(self
            .working
            .holds
            .values()
            .find(|h| h.tenant_id == tenant && h.is_active() && h.seat_id() == Some(seat_id))
            .cloned())
    }

    async fn active_cart_locks(&mut self, tenant: TenantId, session: &SessionId) -> StoreResult<Vec<Hold>> {
        let mut holds: Vec<Hold> = self
            .working
            .holds
            .values()
            .filter(|h| {
                h.tenant_id == tenant && h.kind == HoldKind::CartLock && h.is_active() && &h.session_id == session
            })
            .cloned()
            .collect();
        holds.sort_by_key(|h| (h.created_at, h.id));
        Ok(holds)
    }

    async fn holds_for_transaction(&mut self, tenant: TenantId, transaction_id: TransactionId) -> StoreResult<Vec<Hold>> {
        let mut holds: Vec<Hold> = self
            .working
            .holds
            .values()
            .filter(|h| h.tenant_id == tenant && h.transaction_id == Some(transaction_id))
            .cloned()
            .collect();
        holds.sort_by_key(|h| (h.created_at, h.id));
        Ok(holds)
    }

    async fn expired_cart_locks(&mut self, tenant: TenantId, now: DateTime<Utc>) -> StoreResult<Vec<Hold>> {
        let mut holds: Vec<Hold> = self
            .working
            .holds
            .values()
            .filter(|h| h.tenant_id == tenant && h.kind == HoldKind::CartLock && h.is_active() && h.expires_at < now)
            .cloned()
            .collect();
        holds.sort_by_key(|h| (h.expires_at, h.id));
        Ok(holds)
    }

    async fn insert_transaction(&mut self, transaction: &Transaction) -> StoreResult<()> {
        self.working.transactions.insert(transaction.id, transaction.clone());
        Ok(())
    }

    async fn update_transaction(&mut self, transaction: &Transaction) -> StoreResult<()> {
        match self
            .working
            .transactions
            .get_mut(&transaction.id)
            .filter(|t| t.tenant_id == transaction.tenant_id)
        {
            Some(existing) => {
                *existing = transaction.clone();
                Ok(())
            }
            None => Err(StoreError::Corrupt(format!("transaction {} vanished", transaction.id))),
        }
    }

    async fn transaction(&mut self, tenant: TenantId, id: TransactionId) -> StoreResult<Option<Transaction>> {
        Ok(owned(self.working.transactions.get(&id).filter(|t| t.tenant_id == tenant)))
    }

    async fn insert_plan(&mut self, plan: &PaymentPlan) -> StoreResult<()> {
        let duplicate = self
            .working
            .plans
            .values()
            .any(|p| p.transaction_id == plan.transaction_id);
        if duplicate {
            return Err(StoreError::Conflict(format!(
                "transaction {} already has a payment plan",
                plan.transaction_id
            )));
        }
        self.working.plans.insert(plan.id, plan.clone());
        Ok(())
    }

    async fn update_plan(&mut self, plan: &PaymentPlan) -> StoreResult<()> {
        if plan.paid_amount > plan.total_amount {
            return Err(StoreError::Conflict(format!("plan {} would be overpaid", plan.id)));
        }
        match self.working.plans.get_mut(&plan.id).filter(|p| p.tenant_id == plan.tenant_id) {
            Some(existing) => {
                *existing = plan.clone();
                Ok(())
            }
            None => Err(StoreError::Corrupt(format!("plan {} vanished", plan.id))),
        }
    }

    async fn plan_owner(&mut self, tenant: TenantId, id: PlanId) -> StoreResult<Option<TransactionId>> {
        Ok(self
            .working
            .plans
            .get(&id)
            .filter(|p| p.tenant_id == tenant)
            .map(|p| p.transaction_id))
    }

    async fn plan(&mut self, tenant: TenantId, id: PlanId) -> StoreResult<Option<PaymentPlan>> {
        Ok(owned(self.working.plans.get(&id).filter(|p| p.tenant_id == tenant)))
    }

    async fn plan_for_transaction(&mut self, tenant: TenantId, transaction_id: TransactionId) -> StoreResult<Option<PaymentPlan>> {
        Ok(self
            .working
            .plans
            .values()
            .find(|p| p.tenant_id == tenant && p.transaction_id == transaction_id)
            .cloned())
    }

    async fn expired_plans(&mut self, tenant: TenantId, now: DateTime<Utc>) -> StoreResult<Vec<PaymentPlan>> {
        let mut plans: Vec<PaymentPlan> = self
            .working
            .plans
            .values()
            .filter(|p| p.tenant_id == tenant && p.status == PlanStatus::Active && p.expires_at < now)
            .cloned()
            .collect();
        plans.sort_by_key(|p| (p.expires_at, p.id));
        Ok(plans)
    }

    async fn insert_payment(&mut self, payment: &Payment) -> StoreResult<()> {
        self.working.payments.push(payment.clone());
        Ok(())
    }

    async fn payments_for_plan(&mut self, tenant: TenantId, plan_id: PlanId) -> StoreResult<Vec<Payment>> {
        Ok(self
            .working
            .payments
            .iter()
            .filter(|p| p.tenant_id == tenant && p.plan_id == Some(plan_id))
            .cloned()
            .collect())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryUnit { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}
