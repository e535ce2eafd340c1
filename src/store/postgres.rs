use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{types::Json, PgPool, Postgres};
use uuid::Uuid;

use super::{Store, StoreResult, UnitOfWork};
use crate::database::Database;
use crate::error::StoreError;
use crate::models::{
    Annotations, AvailabilityTrigger, EventId, Hold, HoldId, HoldTarget, Money, Occupancy, Payment, PaymentPlan,
    PlanId, PriceStage, RowAdjustment, RowPricing, Seat, SeatId, SeatStatus, SessionId, StageModifier, TenantId,
    Transaction, TransactionId, TriggerActivation, TriggerId, Zone, ZoneId,
};

/// Postgres-backed store.
///
/// Units of work run at READ COMMITTED. Atomicity of capacity checks comes
/// from `SELECT ... FOR UPDATE` on the zone row and from the
/// `holds_one_active_per_seat` partial unique index.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(db: &Database) -> Self {
        Self { pool: db.pool.clone() }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> StoreResult<Box<dyn UnitOfWork>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgUnit { tx }))
    }

    async fn tenants(&self) -> StoreResult<Vec<TenantId>> {
        let ids: Vec<Uuid> = sqlx::query_scalar("SELECT DISTINCT tenant_id FROM zones ORDER BY tenant_id")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids.into_iter().map(TenantId::from).collect())
    }
}

struct PgUnit {
    tx: sqlx::Transaction<'static, Postgres>,
}

/* ---------- row types ---------- */

#[derive(sqlx::FromRow)]
struct ZoneRow {
    id: Uuid,
    tenant_id: Uuid,
    event_id: Uuid,
    name: String,
    kind: String,
    capacity: i64,
    base_price: Decimal,
    created_at: DateTime<Utc>,
}

impl TryFrom<ZoneRow> for Zone {
    type Error = StoreError;

    fn try_from(r: ZoneRow) -> Result<Self, Self::Error> {
        Ok(Zone {
            id: r.id.into(),
            tenant_id: r.tenant_id.into(),
            event_id: r.event_id.into(),
            name: r.name,
            kind: r.kind.parse()?,
            capacity: r.capacity,
            base_price: Money::new(r.base_price),
            created_at: r.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SeatRow {
    id: Uuid,
    tenant_id: Uuid,
    zone_id: Uuid,
    row: i32,
    number: i32,
    status: String,
}

impl TryFrom<SeatRow> for Seat {
    type Error = StoreError;

    fn try_from(r: SeatRow) -> Result<Self, Self::Error> {
        Ok(Seat {
            id: r.id.into(),
            tenant_id: r.tenant_id.into(),
            zone_id: r.zone_id.into(),
            row: r.row,
            number: r.number,
            status: r.status.parse()?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct HoldRow {
    id: Uuid,
    tenant_id: Uuid,
    kind: String,
    zone_id: Uuid,
    seat_id: Option<Uuid>,
    quantity: i32,
    session_id: String,
    transaction_id: Option<Uuid>,
    plan_id: Option<Uuid>,
    status: String,
    conversion: Option<String>,
    superseded_by: Option<Uuid>,
    unit_price: Decimal,
    price_at_lock: Decimal,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    annotations: Json<Annotations>,
}

impl TryFrom<HoldRow> for Hold {
    type Error = StoreError;

    fn try_from(r: HoldRow) -> Result<Self, Self::Error> {
        let target = match r.seat_id {
            Some(seat_id) => HoldTarget::Seat { seat_id: seat_id.into() },
            None => HoldTarget::Quantity {
                quantity: u32::try_from(r.quantity)
                    .map_err(|_| StoreError::Corrupt(format!("hold {} has negative quantity", r.id)))?,
            },
        };
        Ok(Hold {
            id: r.id.into(),
            tenant_id: r.tenant_id.into(),
            kind: r.kind.parse()?,
            zone_id: r.zone_id.into(),
            target,
            session_id: SessionId(r.session_id),
            transaction_id: r.transaction_id.map(Into::into),
            plan_id: r.plan_id.map(Into::into),
            status: r.status.parse()?,
            conversion: r.conversion.map(|c| c.parse()).transpose()?,
            superseded_by: r.superseded_by.map(Into::into),
            unit_price: Money::new(r.unit_price),
            price_at_lock: Money::new(r.price_at_lock),
            expires_at: r.expires_at,
            created_at: r.created_at,
            updated_at: r.updated_at,
            annotations: r.annotations.0,
        })
    }
}

#[derive(sqlx::FromRow)]
struct StageRow {
    id: Uuid,
    tenant_id: Uuid,
    event_id: Uuid,
    name: String,
    zone_ids: Vec<Uuid>,
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    units_ceiling: Option<i64>,
    modifier_kind: String,
    modifier_value: Decimal,
    priority: i32,
}

impl TryFrom<StageRow> for PriceStage {
    type Error = StoreError;

    fn try_from(r: StageRow) -> Result<Self, Self::Error> {
        let modifier = match r.modifier_kind.as_str() {
            "percentage" => StageModifier::Percentage(r.modifier_value),
            "fixed" => StageModifier::Fixed(Money::new(r.modifier_value)),
            other => return Err(StoreError::Corrupt(format!("unknown stage modifier '{}'", other))),
        };
        Ok(PriceStage {
            id: r.id.into(),
            tenant_id: r.tenant_id.into(),
            event_id: r.event_id.into(),
            name: r.name,
            zone_ids: r.zone_ids.into_iter().map(ZoneId::from).collect(),
            starts_at: r.starts_at,
            ends_at: r.ends_at,
            units_ceiling: r.units_ceiling,
            modifier,
            priority: r.priority,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RowPricingRow {
    id: Uuid,
    tenant_id: Uuid,
    zone_id: Uuid,
    row_from: i32,
    row_to: i32,
    adjustment_kind: String,
    adjustment_value: Decimal,
}

impl TryFrom<RowPricingRow> for RowPricing {
    type Error = StoreError;

    fn try_from(r: RowPricingRow) -> Result<Self, Self::Error> {
        let adjustment = match r.adjustment_kind.as_str() {
            "multiplier" => RowAdjustment::Multiplier(r.adjustment_value),
            "fixed" => RowAdjustment::Fixed(Money::new(r.adjustment_value)),
            other => return Err(StoreError::Corrupt(format!("unknown row adjustment '{}'", other))),
        };
        Ok(RowPricing {
            id: r.id.into(),
            tenant_id: r.tenant_id.into(),
            zone_id: r.zone_id.into(),
            row_from: r.row_from,
            row_to: r.row_to,
            adjustment,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TriggerRow {
    id: Uuid,
    tenant_id: Uuid,
    zone_id: Uuid,
    threshold_pct: Decimal,
    surcharge_pct: Decimal,
}

impl From<TriggerRow> for AvailabilityTrigger {
    fn from(r: TriggerRow) -> Self {
        AvailabilityTrigger {
            id: r.id.into(),
            tenant_id: r.tenant_id.into(),
            zone_id: r.zone_id.into(),
            threshold_pct: r.threshold_pct,
            surcharge_pct: r.surcharge_pct,
        }
    }
}

#[derive(sqlx::FromRow)]
struct TransactionRow {
    id: Uuid,
    tenant_id: Uuid,
    session_id: String,
    customer_id: Uuid,
    status: String,
    total_amount: Decimal,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = StoreError;

    fn try_from(r: TransactionRow) -> Result<Self, Self::Error> {
        Ok(Transaction {
            id: r.id.into(),
            tenant_id: r.tenant_id.into(),
            session_id: SessionId(r.session_id),
            customer_id: r.customer_id.into(),
            status: r.status.parse()?,
            total_amount: Money::new(r.total_amount),
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PlanRow {
    id: Uuid,
    tenant_id: Uuid,
    transaction_id: Uuid,
    plan_type: String,
    total_amount: Decimal,
    paid_amount: Decimal,
    installment_count: Option<i32>,
    status: String,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    annotations: Json<Annotations>,
}

impl TryFrom<PlanRow> for PaymentPlan {
    type Error = StoreError;

    fn try_from(r: PlanRow) -> Result<Self, Self::Error> {
        let installment_count = r
            .installment_count
            .map(u32::try_from)
            .transpose()
            .map_err(|_| StoreError::Corrupt(format!("plan {} has negative installment count", r.id)))?;
        Ok(PaymentPlan {
            id: r.id.into(),
            tenant_id: r.tenant_id.into(),
            transaction_id: r.transaction_id.into(),
            plan_type: r.plan_type.parse()?,
            total_amount: Money::new(r.total_amount),
            paid_amount: Money::new(r.paid_amount),
            installment_count,
            status: r.status.parse()?,
            expires_at: r.expires_at,
            created_at: r.created_at,
            updated_at: r.updated_at,
            annotations: r.annotations.0,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PaymentRow {
    id: Uuid,
    tenant_id: Uuid,
    transaction_id: Uuid,
    plan_id: Option<Uuid>,
    amount: Decimal,
    status: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = StoreError;

    fn try_from(r: PaymentRow) -> Result<Self, Self::Error> {
        Ok(Payment {
            id: r.id.into(),
            tenant_id: r.tenant_id.into(),
            transaction_id: r.transaction_id.into(),
            plan_id: r.plan_id.map(Into::into),
            amount: Money::new(r.amount),
            status: r.status.parse()?,
            created_at: r.created_at,
        })
    }
}

fn convert_all<R, T>(rows: Vec<R>) -> StoreResult<Vec<T>>
where
    T: TryFrom<R, Error = StoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

/// Unique violations become `Conflict`; everything else stays a database error.
fn map_write_error(e: sqlx::Error, what: &str) -> StoreError {
    if let sqlx::Error::Database(db) = &e {
        if db.code().as_deref() == Some("23505") || db.code().as_deref() == Some("23514") {
            return StoreError::Conflict(format!("{}: {}", what, db.message()));
        }
    }
    StoreError::Database(e)
}

fn quantity_column(target: &HoldTarget) -> StoreResult<i32> {
    i32::try_from(target.units()).map_err(|_| StoreError::Corrupt("hold quantity out of range".into()))
}

const HOLD_COLUMNS: &str = "id, tenant_id, kind, zone_id, seat_id, quantity, session_id, transaction_id, plan_id, \
     status, conversion, superseded_by, unit_price, price_at_lock, expires_at, created_at, updated_at, annotations";

const PLAN_COLUMNS: &str = "id, tenant_id, transaction_id, plan_type, total_amount, paid_amount, installment_count, \
     status, expires_at, created_at, updated_at, annotations";

const TRANSACTION_COLUMNS: &str = "id, tenant_id, session_id, customer_id, status, total_amount, created_at, updated_at";

#[async_trait]
impl UnitOfWork for PgUnit {
    /* ---------- catalog ---------- */

    async fn insert_zone(&mut self, zone: &Zone) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO zones (id, tenant_id, event_id, name, kind, capacity, base_price, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(zone.id.as_uuid())
        .bind(zone.tenant_id.as_uuid())
        .bind(zone.event_id.as_uuid())
        .bind(&zone.name)
        .bind(zone.kind.as_str())
        .bind(zone.capacity)
        .bind(zone.base_price.amount())
        .bind(zone.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_write_error(e, "insert zone"))?;
        Ok(())
    }

    async fn zone(&mut self, tenant: TenantId, zone_id: ZoneId) -> StoreResult<Option<Zone>> {
        let row: Option<ZoneRow> = sqlx::query_as(
            "SELECT id, tenant_id, event_id, name, kind, capacity, base_price, created_at
             FROM zones WHERE tenant_id = $1 AND id = $2",
        )
        .bind(tenant.as_uuid())
        .bind(zone_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(Zone::try_from).transpose()
    }

    async fn lock_zone(&mut self, tenant: TenantId, zone_id: ZoneId) -> StoreResult<Option<Zone>> {
        let row: Option<ZoneRow> = sqlx::query_as(
            "SELECT id, tenant_id, event_id, name, kind, capacity, base_price, created_at
             FROM zones WHERE tenant_id = $1 AND id = $2
             FOR UPDATE",
        )
        .bind(tenant.as_uuid())
        .bind(zone_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(Zone::try_from).transpose()
    }

    async fn zones_for_event(&mut self, tenant: TenantId, event_id: EventId) -> StoreResult<Vec<Zone>> {
        let rows: Vec<ZoneRow> = sqlx::query_as(
            "SELECT id, tenant_id, event_id, name, kind, capacity, base_price, created_at
             FROM zones WHERE tenant_id = $1 AND event_id = $2
             ORDER BY id",
        )
        .bind(tenant.as_uuid())
        .bind(event_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await?;
        convert_all(rows)
    }

    async fn insert_seat(&mut self, seat: &Seat) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO seats (id, tenant_id, zone_id, row, number, status)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(seat.id.as_uuid())
        .bind(seat.tenant_id.as_uuid())
        .bind(seat.zone_id.as_uuid())
        .bind(seat.row)
        .bind(seat.number)
        .bind(seat.status.as_str())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_write_error(e, "insert seat"))?;
        Ok(())
    }

    async fn seat(&mut self, tenant: TenantId, seat_id: SeatId) -> StoreResult<Option<Seat>> {
        let row: Option<SeatRow> = sqlx::query_as(
            "SELECT id, tenant_id, zone_id, row, number, status
             FROM seats WHERE tenant_id = $1 AND id = $2",
        )
        .bind(tenant.as_uuid())
        .bind(seat_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(Seat::try_from).transpose()
    }

    async fn seats_in_zone(&mut self, tenant: TenantId, zone_id: ZoneId) -> StoreResult<Vec<Seat>> {
        let rows: Vec<SeatRow> = sqlx::query_as(
            "SELECT id, tenant_id, zone_id, row, number, status
             FROM seats WHERE tenant_id = $1 AND zone_id = $2
             ORDER BY row, number",
        )
        .bind(tenant.as_uuid())
        .bind(zone_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await?;
        convert_all(rows)
    }

    async fn set_seat_status(&mut self, tenant: TenantId, seat_id: SeatId, status: SeatStatus) -> StoreResult<()> {
        let result = sqlx::query("UPDATE seats SET status = $3 WHERE tenant_id = $1 AND id = $2")
            .bind(tenant.as_uuid())
            .bind(seat_id.as_uuid())
            .bind(status.as_str())
            .execute(&mut *self.tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Corrupt(format!("seat {} vanished", seat_id)));
        }
        Ok(())
    }

    async fn insert_price_stage(&mut self, stage: &PriceStage) -> StoreResult<()> {
        let zone_ids: Vec<Uuid> = stage.zone_ids.iter().map(ZoneId::as_uuid).collect();
        sqlx::query(
            "INSERT INTO price_stages
               (id, tenant_id, event_id, name, zone_ids, starts_at, ends_at, units_ceiling,
                modifier_kind, modifier_value, priority)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(stage.id.as_uuid())
        .bind(stage.tenant_id.as_uuid())
        .bind(stage.event_id.as_uuid())
        .bind(&stage.name)
        .bind(zone_ids)
        .bind(stage.starts_at)
        .bind(stage.ends_at)
        .bind(stage.units_ceiling)
        .bind(stage.modifier.kind())
        .bind(stage.modifier.value())
        .bind(stage.priority)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_write_error(e, "insert price stage"))?;
        Ok(())
    }

    async fn price_stages(&mut self, tenant: TenantId, event_id: EventId) -> StoreResult<Vec<PriceStage>> {
        let rows: Vec<StageRow> = sqlx::query_as(
            "SELECT id, tenant_id, event_id, name, zone_ids, starts_at, ends_at, units_ceiling,
                    modifier_kind, modifier_value, priority
             FROM price_stages WHERE tenant_id = $1 AND event_id = $2
             ORDER BY id",
        )
        .bind(tenant.as_uuid())
        .bind(event_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await?;
        convert_all(rows)
    }

    async fn insert_row_pricing(&mut self, rule: &RowPricing) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO row_pricing (id, tenant_id, zone_id, row_from, row_to, adjustment_kind, adjustment_value)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(rule.id.as_uuid())
        .bind(rule.tenant_id.as_uuid())
        .bind(rule.zone_id.as_uuid())
        .bind(rule.row_from)
        .bind(rule.row_to)
        .bind(rule.adjustment.kind())
        .bind(rule.adjustment.value())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_write_error(e, "insert row pricing"))?;
        Ok(())
    }

    async fn row_pricing(&mut self, tenant: TenantId, zone_id: ZoneId) -> StoreResult<Vec<RowPricing>> {
        let rows: Vec<RowPricingRow> = sqlx::query_as(
            "SELECT id, tenant_id, zone_id, row_from, row_to, adjustment_kind, adjustment_value
             FROM row_pricing WHERE tenant_id = $1 AND zone_id = $2",
        )
        .bind(tenant.as_uuid())
        .bind(zone_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await?;
        convert_all(rows)
    }

    async fn insert_trigger(&mut self, trigger: &AvailabilityTrigger) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO availability_triggers (id, tenant_id, zone_id, threshold_pct, surcharge_pct)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(trigger.id.as_uuid())
        .bind(trigger.tenant_id.as_uuid())
        .bind(trigger.zone_id.as_uuid())
        .bind(trigger.threshold_pct)
        .bind(trigger.surcharge_pct)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_write_error(e, "insert trigger"))?;
        Ok(())
    }

    async fn triggers(&mut self, tenant: TenantId, zone_id: ZoneId) -> StoreResult<Vec<AvailabilityTrigger>> {
        let rows: Vec<TriggerRow> = sqlx::query_as(
            "SELECT id, tenant_id, zone_id, threshold_pct, surcharge_pct
             FROM availability_triggers WHERE tenant_id = $1 AND zone_id = $2",
        )
        .bind(tenant.as_uuid())
        .bind(zone_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn trigger_activations(&mut self, tenant: TenantId, zone_id: ZoneId) -> StoreResult<Vec<TriggerId>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            "SELECT trigger_id FROM trigger_activations WHERE tenant_id = $1 AND zone_id = $2",
        )
        .bind(tenant.as_uuid())
        .bind(zone_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(ids.into_iter().map(TriggerId::from).collect())
    }

    async fn record_trigger_activation(&mut self, activation: &TriggerActivation) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO trigger_activations (tenant_id, zone_id, trigger_id, activated_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (zone_id, trigger_id) DO NOTHING",
        )
        .bind(activation.tenant_id.as_uuid())
        .bind(activation.zone_id.as_uuid())
        .bind(activation.trigger_id.as_uuid())
        .bind(activation.activated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    /* ---------- inventory aggregates ---------- */

    async fn occupancy(&mut self, tenant: TenantId, zone_id: ZoneId) -> StoreResult<Occupancy> {
        let (sold, held): (i64, i64) = sqlx::query_as(
            "SELECT
               COALESCE(SUM(quantity) FILTER (WHERE status = 'converted' AND conversion = 'sale'), 0)::BIGINT,
               COALESCE(SUM(quantity) FILTER (WHERE status = 'active'), 0)::BIGINT
             FROM holds
             WHERE tenant_id = $1 AND zone_id = $2",
        )
        .bind(tenant.as_uuid())
        .bind(zone_id.as_uuid())
        .fetch_one(&mut *self.tx)
        .await?;

        let blocked: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM seats WHERE tenant_id = $1 AND zone_id = $2 AND status = 'blocked'",
        )
        .bind(tenant.as_uuid())
        .bind(zone_id.as_uuid())
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(Occupancy { sold, held, blocked })
    }

    async fn units_sold(&mut self, tenant: TenantId, zone_ids: &[ZoneId]) -> StoreResult<i64> {
        let ids: Vec<Uuid> = zone_ids.iter().map(ZoneId::as_uuid).collect();
        let sold: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(quantity), 0)::BIGINT
             FROM holds
             WHERE tenant_id = $1 AND zone_id = ANY($2)
               AND status = 'converted' AND conversion = 'sale'",
        )
        .bind(tenant.as_uuid())
        .bind(ids)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(sold)
    }

    /* ---------- holds ---------- */

    async fn insert_hold(&mut self, hold: &Hold) -> StoreResult<()> {
        let sql = format!(
            "INSERT INTO holds ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)",
            HOLD_COLUMNS
        );
        sqlx::query(&sql)
            .bind(hold.id.as_uuid())
            .bind(hold.tenant_id.as_uuid())
            .bind(hold.kind.as_str())
            .bind(hold.zone_id.as_uuid())
            .bind(hold.seat_id().map(|s| s.as_uuid()))
            .bind(quantity_column(&hold.target)?)
            .bind(hold.session_id.as_str())
            .bind(hold.transaction_id.map(|t| t.as_uuid()))
            .bind(hold.plan_id.map(|p| p.as_uuid()))
            .bind(hold.status.as_str())
            .bind(hold.conversion.map(|c| c.as_str()))
            .bind(hold.superseded_by.map(|h| h.as_uuid()))
            .bind(hold.unit_price.amount())
            .bind(hold.price_at_lock.amount())
            .bind(hold.expires_at)
            .bind(hold.created_at)
            .bind(hold.updated_at)
            .bind(Json(&hold.annotations))
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_write_error(e, "insert hold"))?;
        Ok(())
    }

    async fn update_hold(&mut self, hold: &Hold) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE holds
             SET transaction_id = $3, plan_id = $4, status = $5, conversion = $6, superseded_by = $7,
                 expires_at = $8, updated_at = $9, annotations = $10
             WHERE tenant_id = $1 AND id = $2",
        )
        .bind(hold.tenant_id.as_uuid())
        .bind(hold.id.as_uuid())
        .bind(hold.transaction_id.map(|t| t.as_uuid()))
        .bind(hold.plan_id.map(|p| p.as_uuid()))
        .bind(hold.status.as_str())
        .bind(hold.conversion.map(|c| c.as_str()))
        .bind(hold.superseded_by.map(|h| h.as_uuid()))
        .bind(hold.expires_at)
        .bind(hold.updated_at)
        .bind(Json(&hold.annotations))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_write_error(e, "update hold"))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Corrupt(format!("hold {} vanished", hold.id)));
        }
        Ok(())
    }

    async fn hold(&mut self, tenant: TenantId, hold_id: HoldId) -> StoreResult<Option<Hold>> {
        let sql = format!("SELECT {} FROM holds WHERE tenant_id = $1 AND id = $2 FOR UPDATE", HOLD_COLUMNS);
        let row: Option<HoldRow> = sqlx::query_as(&sql)
            .bind(tenant.as_uuid())
            .bind(hold_id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await?;
        row.map(Hold::try_from).transpose()
    }

    async fn active_hold_for_seat(&mut self, tenant: TenantId, seat_id: SeatId) -> StoreResult<Option<Hold>> {
        let sql = format!(
            "SELECT {} FROM holds WHERE tenant_id = $1 AND seat_id = $2 AND status = 'active'",
            HOLD_COLUMNS
        );
        let row: Option<HoldRow> = sqlx::query_as(&sql)
            .bind(tenant.as_uuid())
            .bind(seat_id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await?;
        row.map(Hold::try_from).transpose()
    }

    async fn active_cart_locks(&mut self, tenant: TenantId, session: &SessionId) -> StoreResult<Vec<Hold>> {
        let sql = format!(
            "SELECT {} FROM holds
             WHERE tenant_id = $1 AND session_id = $2 AND kind = 'cart_lock' AND status = 'active'
             ORDER BY created_at, id
             FOR UPDATE",
            HOLD_COLUMNS
        );
        let rows: Vec<HoldRow> = sqlx::query_as(&sql)
            .bind(tenant.as_uuid())
            .bind(session.as_str())
            .fetch_all(&mut *self.tx)
            .await?;
        convert_all(rows)
    }

    async fn holds_for_transaction(&mut self, tenant: TenantId, transaction_id: TransactionId) -> StoreResult<Vec<Hold>> {
        let sql = format!(
            "SELECT {} FROM holds
             WHERE tenant_id = $1 AND transaction_id = $2
             ORDER BY created_at, id
             FOR UPDATE",
            HOLD_COLUMNS
        );
        let rows: Vec<HoldRow> = sqlx::query_as(&sql)
            .bind(tenant.as_uuid())
            .bind(transaction_id.as_uuid())
            .fetch_all(&mut *self.tx)
            .await?;
        convert_all(rows)
    }

    async fn expired_cart_locks(&mut self, tenant: TenantId, now: DateTime<Utc>) -> StoreResult<Vec<Hold>> {
        let sql = format!(
            "SELECT {} FROM holds
             WHERE tenant_id = $1 AND kind = 'cart_lock' AND status = 'active' AND expires_at < $2
             ORDER BY expires_at, id",
            HOLD_COLUMNS
        );
        let rows: Vec<HoldRow> = sqlx::query_as(&sql)
            .bind(tenant.as_uuid())
            .bind(now)
            .fetch_all(&mut *self.tx)
            .await?;
        convert_all(rows)
    }

    /* ---------- transactions ---------- */

    async fn insert_transaction(&mut self, t: &Transaction) -> StoreResult<()> {
        let sql = format!(
            "INSERT INTO transactions ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            TRANSACTION_COLUMNS
        );
        sqlx::query(&sql)
            .bind(t.id.as_uuid())
            .bind(t.tenant_id.as_uuid())
            .bind(t.session_id.as_str())
            .bind(t.customer_id.as_uuid())
            .bind(t.status.as_str())
            .bind(t.total_amount.amount())
            .bind(t.created_at)
            .bind(t.updated_at)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_write_error(e, "insert transaction"))?;
        Ok(())
    }

    async fn update_transaction(&mut self, t: &Transaction) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE transactions SET status = $3, total_amount = $4, updated_at = $5
             WHERE tenant_id = $1 AND id = $2",
        )
        .bind(t.tenant_id.as_uuid())
        .bind(t.id.as_uuid())
        .bind(t.status.as_str())
        .bind(t.total_amount.amount())
        .bind(t.updated_at)
        .execute(&mut *self.tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Corrupt(format!("transaction {} vanished", t.id)));
        }
        Ok(())
    }

    async fn transaction(&mut self, tenant: TenantId, id: TransactionId) -> StoreResult<Option<Transaction>> {
        let sql = format!(
            "SELECT {} FROM transactions WHERE tenant_id = $1 AND id = $2 FOR UPDATE",
            TRANSACTION_COLUMNS
        );
        let row: Option<TransactionRow> = sqlx::query_as(&sql)
            .bind(tenant.as_uuid())
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await?;
        row.map(Transaction::try_from).transpose()
    }

    /* ---------- payment plans ---------- */

    async fn insert_plan(&mut self, plan: &PaymentPlan) -> StoreResult<()> {
        let sql = format!(
            "INSERT INTO payment_plans ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
            PLAN_COLUMNS
        );
        let installments = plan
            .installment_count
            .map(i32::try_from)
            .transpose()
            .map_err(|_| StoreError::Corrupt("installment count out of range".into()))?;
        sqlx::query(&sql)
            .bind(plan.id.as_uuid())
            .bind(plan.tenant_id.as_uuid())
            .bind(plan.transaction_id.as_uuid())
            .bind(plan.plan_type.as_str())
            .bind(plan.total_amount.amount())
            .bind(plan.paid_amount.amount())
            .bind(installments)
            .bind(plan.status.as_str())
            .bind(plan.expires_at)
            .bind(plan.created_at)
            .bind(plan.updated_at)
            .bind(Json(&plan.annotations))
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_write_error(e, "insert payment plan"))?;
        Ok(())
    }

    async fn update_plan(&mut self, plan: &PaymentPlan) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE payment_plans
             SET paid_amount = $3, status = $4, expires_at = $5, updated_at = $6, annotations = $7
             WHERE tenant_id = $1 AND id = $2",
        )
        .bind(plan.tenant_id.as_uuid())
        .bind(plan.id.as_uuid())
        .bind(plan.paid_amount.amount())
        .bind(plan.status.as_str())
        .bind(plan.expires_at)
        .bind(plan.updated_at)
        .bind(Json(&plan.annotations))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_write_error(e, "update payment plan"))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Corrupt(format!("plan {} vanished", plan.id)));
        }
        Ok(())
    }

    async fn plan_owner(&mut self, tenant: TenantId, id: PlanId) -> StoreResult<Option<TransactionId>> {
        let owner: Option<Uuid> =
            sqlx::query_scalar("SELECT transaction_id FROM payment_plans WHERE tenant_id = $1 AND id = $2")
                .bind(tenant.as_uuid())
                .bind(id.as_uuid())
                .fetch_optional(&mut *self.tx)
                .await?;
        Ok(owner.map(TransactionId::from))
    }

    async fn plan(&mut self, tenant: TenantId, id: PlanId) -> StoreResult<Option<PaymentPlan>> {
        let sql = format!(
            "SELECT {} FROM payment_plans WHERE tenant_id = $1 AND id = $2 FOR UPDATE",
            PLAN_COLUMNS
        );
        let row: Option<PlanRow> = sqlx::query_as(&sql)
            .bind(tenant.as_uuid())
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await?;
        row.map(PaymentPlan::try_from).transpose()
    }

    async fn plan_for_transaction(&mut self, tenant: TenantId, transaction_id: TransactionId) -> StoreResult<Option<PaymentPlan>> {
        let sql = format!(
            "SELECT {} FROM payment_plans WHERE tenant_id = $1 AND transaction_id = $2 FOR UPDATE",
            PLAN_COLUMNS
        );
        let row: Option<PlanRow> = sqlx::query_as(&sql)
            .bind(tenant.as_uuid())
            .bind(transaction_id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await?;
        row.map(PaymentPlan::try_from).transpose()
    }

    async fn expired_plans(&mut self, tenant: TenantId, now: DateTime<Utc>) -> StoreResult<Vec<PaymentPlan>> {
        let sql = format!(
            "SELECT {} FROM payment_plans
             WHERE tenant_id = $1 AND status = 'active' AND expires_at < $2
             ORDER BY expires_at, id",
            PLAN_COLUMNS
        );
        let rows: Vec<PlanRow> = sqlx::query_as(&sql)
            .bind(tenant.as_uuid())
            .bind(now)
            .fetch_all(&mut *self.tx)
            .await?;
        convert_all(rows)
    }

    async fn insert_payment(&mut self, payment: &Payment) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO payments (id, tenant_id, transaction_id, plan_id, amount, status, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(payment.id.as_uuid())
        .bind(payment.tenant_id.as_uuid())
        .bind(payment.transaction_id.as_uuid())
        .bind(payment.plan_id.map(|p| p.as_uuid()))
        .bind(payment.amount.amount())
        .bind(payment.status.as_str())
        .bind(payment.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_write_error(e, "insert payment"))?;
        Ok(())
    }

    async fn payments_for_plan(&mut self, tenant: TenantId, plan_id: PlanId) -> StoreResult<Vec<Payment>> {
        let rows: Vec<PaymentRow> = sqlx::query_as(
            "SELECT id, tenant_id, transaction_id, plan_id, amount, status, created_at
             FROM payments WHERE tenant_id = $1 AND plan_id = $2
             ORDER BY created_at, id",
        )
        .bind(tenant.as_uuid())
        .bind(plan_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await?;
        convert_all(rows)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
