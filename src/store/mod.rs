//! Persistence seam of the engine.
//!
//! Every engine operation runs inside one [`UnitOfWork`]: a short atomic
//! read-check-write against the backing store. Writes become visible together
//! on [`UnitOfWork::commit`]; dropping the unit without committing rolls it back.
//!
//! Every read and write takes the [`TenantId`] explicitly. There is no ambient
//! tenant filter.
//!
//! Two implementations:
//! - [`PgStore`]: Postgres via sqlx. Zone rows are locked `FOR UPDATE` before
//!   capacity checks and a partial unique index allows one active hold per seat.
//! - [`MemoryStore`]: in-process store whose units of work are serialized over
//!   a copy-on-write snapshot. Used by tests and single-node embedding.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::models::{
    AvailabilityTrigger, EventId, Hold, HoldId, Occupancy, Payment, PaymentPlan, PlanId, PriceStage,
    RowPricing, Seat, SeatId, SeatStatus, SessionId, TenantId, Transaction, TransactionId, TriggerActivation,
    TriggerId, Zone, ZoneId,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait Store: Send + Sync {
    /// Opens a unit of work.
    async fn begin(&self) -> StoreResult<Box<dyn UnitOfWork>>;

    /// Tenants that own at least one zone. Used by the periodic sweep.
    async fn tenants(&self) -> StoreResult<Vec<TenantId>>;
}

#[async_trait]
pub trait UnitOfWork: Send {
    /* ---------- catalog ---------- */

    async fn insert_zone(&mut self, zone: &Zone) -> StoreResult<()>;

    async fn zone(&mut self, tenant: TenantId, zone_id: ZoneId) -> StoreResult<Option<Zone>>;

    /// Reads the zone and locks it until the unit of work ends. All capacity
    /// checks for a zone happen after this call.
    async fn lock_zone(&mut self, tenant: TenantId, zone_id: ZoneId) -> StoreResult<Option<Zone>>;

    async fn zones_for_event(&mut self, tenant: TenantId, event_id: EventId) -> StoreResult<Vec<Zone>>;

    async fn insert_seat(&mut self, seat: &Seat) -> StoreResult<()>;

    async fn seat(&mut self, tenant: TenantId, seat_id: SeatId) -> StoreResult<Option<Seat>>;

    async fn seats_in_zone(&mut self, tenant: TenantId, zone_id: ZoneId) -> StoreResult<Vec<Seat>>;

    async fn set_seat_status(&mut self, tenant: TenantId, seat_id: SeatId, status: SeatStatus) -> StoreResult<()>;

    async fn insert_price_stage(&mut self, stage: &PriceStage) -> StoreResult<()>;

    async fn price_stages(&mut self, tenant: TenantId, event_id: EventId) -> StoreResult<Vec<PriceStage>>;

    async fn insert_row_pricing(&mut self, rule: &RowPricing) -> StoreResult<()>;

    async fn row_pricing(&mut self, tenant: TenantId, zone_id: ZoneId) -> StoreResult<Vec<RowPricing>>;

    async fn insert_trigger(&mut self, trigger: &AvailabilityTrigger) -> StoreResult<()>;

    async fn triggers(&mut self, tenant: TenantId, zone_id: ZoneId) -> StoreResult<Vec<AvailabilityTrigger>>;

    async fn trigger_activations(&mut self, tenant: TenantId, zone_id: ZoneId) -> StoreResult<Vec<TriggerId>>;

    /// Idempotent: recording an already active trigger is a no-op.
    async fn record_trigger_activation(&mut self, activation: &TriggerActivation) -> StoreResult<()>;

    /* ---------- inventory aggregates ---------- */

    /// Sold and held units plus blocked seats of a zone, computed from hold records.
    async fn occupancy(&mut self, tenant: TenantId, zone_id: ZoneId) -> StoreResult<Occupancy>;

    /// Units sold across the given zones.
    async fn units_sold(&mut self, tenant: TenantId, zone_ids: &[ZoneId]) -> StoreResult<i64>;

    /* ---------- holds ---------- */

    /// Fails with [`StoreError::Conflict`] when the seat already has an active hold.
    async fn insert_hold(&mut self, hold: &Hold) -> StoreResult<()>;

    async fn update_hold(&mut self, hold: &Hold) -> StoreResult<()>;

    /// Reads and locks the hold row.
    async fn hold(&mut self, tenant: TenantId, hold_id: HoldId) -> StoreResult<Option<Hold>>;

    async fn active_hold_for_seat(&mut self, tenant: TenantId, seat_id: SeatId) -> StoreResult<Option<Hold>>;

    /// Active cart locks of a session, oldest first.
    async fn active_cart_locks(&mut self, tenant: TenantId, session: &SessionId) -> StoreResult<Vec<Hold>>;

    async fn holds_for_transaction(&mut self, tenant: TenantId, transaction_id: TransactionId) -> StoreResult<Vec<Hold>>;

    /// Active cart locks whose `expires_at` is before `now`. Not locked: callers
    /// lock the owning transaction first and re-read.
    async fn expired_cart_locks(&mut self, tenant: TenantId, now: DateTime<Utc>) -> StoreResult<Vec<Hold>>;

    /* ---------- transactions ---------- */

    async fn insert_transaction(&mut self, transaction: &Transaction) -> StoreResult<()>;

    async fn update_transaction(&mut self, transaction: &Transaction) -> StoreResult<()>;

    /// Reads and locks the transaction row.
    async fn transaction(&mut self, tenant: TenantId, id: TransactionId) -> StoreResult<Option<Transaction>>;

    /* ---------- payment plans ---------- */

    async fn insert_plan(&mut self, plan: &PaymentPlan) -> StoreResult<()>;

    async fn update_plan(&mut self, plan: &PaymentPlan) -> StoreResult<()>;

    /// Transaction owning the plan, read without locking. Plan writes lock
    /// that transaction before the plan row.
    async fn plan_owner(&mut self, tenant: TenantId, id: PlanId) -> StoreResult<Option<TransactionId>>;

    /// Reads and locks the plan row.
    async fn plan(&mut self, tenant: TenantId, id: PlanId) -> StoreResult<Option<PaymentPlan>>;

    async fn plan_for_transaction(&mut self, tenant: TenantId, transaction_id: TransactionId) -> StoreResult<Option<PaymentPlan>>;

    /// Active plans whose `expires_at` is before `now`.
    async fn expired_plans(&mut self, tenant: TenantId, now: DateTime<Utc>) -> StoreResult<Vec<PaymentPlan>>;

    async fn insert_payment(&mut self, payment: &Payment) -> StoreResult<()>;

    async fn payments_for_plan(&mut self, tenant: TenantId, plan_id: PlanId) -> StoreResult<Vec<Payment>>;

    /* ---------- lifecycle ---------- */

    async fn commit(self: Box<Self>) -> StoreResult<()>;
}
