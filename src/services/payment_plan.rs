use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::transaction::{load_transaction, transition};
use super::{found, Engine, Notification};
use crate::error::{EngineError, EngineResult};
use crate::models::{
    payment_plan::completed_total, Annotations, Conversion, HoldKind, HoldStatus, Money, Payment, PaymentPlan,
    PaymentStatus, PlanId, PlanStatus, PlanType, SeatStatus, TenantId, Transaction, TransactionId,
    TransactionStatus,
};
use crate::store::UnitOfWork;

/// Parameters of a new plan.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewPlan {
    pub plan_type: Option<PlanType>,
    pub installment_count: Option<u32>,
    /// Defaults to now plus the configured plan TTL.
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub annotations: Annotations,
}

impl NewPlan {
    pub fn installments(count: u32) -> Self {
        Self {
            plan_type: Some(PlanType::Installment),
            installment_count: Some(count),
            ..Self::default()
        }
    }

    pub fn flexible() -> Self {
        Self {
            plan_type: Some(PlanType::Flexible),
            ..Self::default()
        }
    }

    pub fn expiring_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }
}

/// A plan with its payments and the amount the next installment must have.
#[derive(Debug, Clone, Serialize)]
pub struct PlanView {
    pub plan: PaymentPlan,
    pub payments: Vec<Payment>,
    pub remaining_balance: Money,
    pub next_installment_amount: Option<Money>,
}

impl PlanView {
    fn new(plan: PaymentPlan, payments: Vec<Payment>) -> Self {
        let next_installment_amount = next_installment(&plan, &payments);
        Self {
            remaining_balance: plan.remaining_balance(),
            plan,
            payments,
            next_installment_amount,
        }
    }
}

const MAX_INSTALLMENTS: u32 = 48;

/// Longer-lived holds backing partial payment of a transaction.
pub struct PaymentPlanManager<'a> {
    engine: &'a Engine,
}

impl<'a> PaymentPlanManager<'a> {
    pub(crate) fn new(engine: &'a Engine) -> Self {
        Self { engine }
    }

    /// Converts the reserved transaction's cart locks into reservations
    /// scoped to a new plan. Every lock must still be live and belong to the
    /// transaction's session.
    pub async fn create_plan(&self, tenant: TenantId, transaction_id: TransactionId, params: NewPlan) -> EngineResult<PaymentPlan> {
        let now = self.engine.now();
        let plan_type = params
            .plan_type
            .ok_or_else(|| EngineError::InvalidRequest("plan_type is required".into()))?;
        let installment_count = match (plan_type, params.installment_count) {
            (PlanType::Installment, Some(n)) if (1..=MAX_INSTALLMENTS).contains(&n) => Some(n),
            (PlanType::Installment, _) => {
                return Err(EngineError::InvalidRequest(format!(
                    "installment plans need between 1 and {} installments",
                    MAX_INSTALLMENTS
                )))
            }
            (PlanType::Flexible, None) => None,
            (PlanType::Flexible, Some(_)) => {
                return Err(EngineError::InvalidRequest(
                    "flexible plans have no installment count".into(),
                ))
            }
        };
        let expires_at = params
            .expires_at
            .unwrap_or_else(|| now + self.engine.config().default_plan_ttl());
        if expires_at <= now {
            return Err(EngineError::InvalidRequest("plan expiry must be in the future".into()));
        }

        let mut uow = self.engine.begin().await?;
        let tx = load_transaction(uow.as_mut(), tenant, transaction_id).await?;
        if tx.status != TransactionStatus::Reserved {
            return Err(EngineError::invalid_transition("transaction", tx.status, "payment plan"));
        }
        if uow.plan_for_transaction(tenant, transaction_id).await?.is_some() {
            return Err(EngineError::InvalidRequest("transaction already has a payment plan".into()));
        }
        if !tx.total_amount.is_positive() {
            return Err(EngineError::InvalidRequest("nothing to pay for".into()));
        }
        if let Some(n) = installment_count {
            if !tx.total_amount.split_floor(n).is_positive() {
                return Err(EngineError::InvalidRequest(format!(
                    "{} cannot be split into {} installments of at least one cent",
                    tx.total_amount, n
                )));
            }
        }

        let locks: Vec<_> = uow
            .holds_for_transaction(tenant, transaction_id)
            .await?
            .into_iter()
            .filter(|h| h.kind == HoldKind::CartLock && h.conversion.is_none())
            .collect();
        if locks.is_empty() {
            return Err(EngineError::InvalidRequest("transaction has no cart locks".into()));
        }
        for lock in &locks {
            if !lock.is_live_at(now) {
                return Err(EngineError::LockExpired { hold_id: lock.id });
            }
            if lock.session_id != tx.session_id {
                return Err(EngineError::InvalidRequest(format!(
                    "cart lock {} belongs to another session",
                    lock.id
                )));
            }
        }

        let plan = PaymentPlan {
            id: PlanId::new(),
            tenant_id: tenant,
            transaction_id,
            plan_type,
            total_amount: tx.total_amount,
            paid_amount: Money::ZERO,
            installment_count,
            status: PlanStatus::Active,
            expires_at,
            created_at: now,
            updated_at: now,
            annotations: params.annotations,
        };
        uow.insert_plan(&plan).await?;

        for mut lock in locks {
            let reservation = lock.reservation_for(plan.id, now, expires_at);
            // The lock must stop being active before the reservation takes its seat.
            lock.mark_converted(Conversion::Reservation, Some(reservation.id), now);
            uow.update_hold(&lock).await?;
            uow.insert_hold(&reservation).await?;
            if let Some(seat_id) = reservation.seat_id() {
                uow.set_seat_status(tenant, seat_id, SeatStatus::Reserved).await?;
            }
        }

        uow.commit().await?;

        info!(
            tenant = %tenant,
            plan = %plan.id,
            transaction = %transaction_id,
            plan_type = %plan.plan_type,
            total = %plan.total_amount,
            expires_at = %plan.expires_at,
            "Payment plan created"
        );
        self.engine.notify(vec![Notification::PlanCreated {
            tenant_id: tenant,
            plan_id: plan.id,
            transaction_id,
            total_amount: plan.total_amount,
            expires_at: plan.expires_at,
        }]);
        Ok(plan)
    }

    /// Validates `amount` against the plan rules and records it. Paying the
    /// last cent completes the plan and its transaction and turns the
    /// reservations into sales.
    ///
    /// Installment payments may differ from the scheduled amount by the
    /// configured tolerance and are recorded as submitted. The last
    /// installment must settle the open balance exactly.
    pub async fn add_payment(&self, tenant: TenantId, plan_id: PlanId, amount: Money) -> EngineResult<PlanView> {
        let now = self.engine.now();
        let mut uow = self.engine.begin().await?;
        let (mut tx, mut plan) = lock_plan(uow.as_mut(), tenant, plan_id).await?;
        ensure_payable(&plan, now)?;

        let mut payments = uow.payments_for_plan(tenant, plan_id).await?;
        let paid = completed_total(&payments);
        let remaining = plan.total_amount - paid;

        let reject = |expected: Option<Money>, reason: &str| EngineError::InvalidPaymentAmount {
            submitted: amount,
            expected,
            remaining,
            reason: reason.to_string(),
        };
        if !amount.is_positive() {
            return Err(reject(next_installment(&plan, &payments), "amount must be positive"));
        }
        if amount.round_cents() != amount {
            return Err(reject(next_installment(&plan, &payments), "amount has more than two decimals"));
        }

        let expected = next_installment(&plan, &payments);
        if amount > remaining {
            return Err(reject(expected, "amount exceeds the remaining balance"));
        }
        if plan.plan_type == PlanType::Installment {
            let expected = expected.ok_or(EngineError::PlanAlreadyCompleted { plan_id })?;
            if expected == remaining {
                if amount != expected {
                    return Err(reject(Some(expected), "last installment must settle the remaining balance"));
                }
            } else if amount.abs_diff(expected).amount() > self.engine.config().installment_tolerance {
                return Err(reject(Some(expected), "installment must match the scheduled amount"));
            }
        }

        let payment = Payment::completed(tenant, plan.transaction_id, Some(plan.id), amount, now);
        uow.insert_payment(&payment).await?;
        payments.push(payment);

        plan.paid_amount = completed_total(&payments);
        plan.updated_at = now;

        let mut notifications = vec![Notification::PaymentReceived {
            tenant_id: tenant,
            transaction_id: plan.transaction_id,
            plan_id: Some(plan.id),
            amount,
            remaining: plan.remaining_balance(),
        }];

        if plan.is_paid_off() {
            plan.status = PlanStatus::Completed;
            transition(uow.as_mut(), &mut tx, TransactionStatus::Completed, now).await?;
            notifications.push(Notification::PlanCompleted {
                tenant_id: tenant,
                plan_id: plan.id,
                transaction_id: plan.transaction_id,
            });
        }
        uow.update_plan(&plan).await?;

        uow.commit().await?;

        info!(
            tenant = %tenant,
            plan = %plan.id,
            amount = %amount,
            remaining = %plan.remaining_balance(),
            status = %plan.status,
            "Plan payment recorded"
        );
        self.engine.notify(notifications);
        Ok(PlanView::new(plan, payments))
    }

    /// Expires an active plan whose deadline has passed, releasing its
    /// reservations and expiring its transaction. Returns whether anything
    /// changed; calling it again is a no-op.
    pub async fn expire_plan(&self, tenant: TenantId, plan_id: PlanId) -> EngineResult<bool> {
        let now = self.engine.now();
        let mut uow = self.engine.begin().await?;
        let (mut tx, mut plan) = lock_plan(uow.as_mut(), tenant, plan_id).await?;
        if plan.status != PlanStatus::Active || plan.expires_at >= now {
            return Ok(false);
        }

        end_plan(uow.as_mut(), &mut tx, &mut plan, PlanStatus::Expired, now).await?;
        uow.commit().await?;

        info!(tenant = %tenant, plan = %plan.id, transaction = %plan.transaction_id, "Payment plan expired");
        self.engine.notify(vec![
            Notification::PlanExpired {
                tenant_id: tenant,
                plan_id: plan.id,
                transaction_id: plan.transaction_id,
            },
            Notification::TransactionExpired {
                tenant_id: tenant,
                transaction_id: plan.transaction_id,
            },
        ]);
        Ok(true)
    }

    /// Administrative cancellation of an active plan.
    pub async fn cancel_plan(&self, tenant: TenantId, plan_id: PlanId) -> EngineResult<PaymentPlan> {
        let now = self.engine.now();
        let mut uow = self.engine.begin().await?;
        let (mut tx, mut plan) = lock_plan(uow.as_mut(), tenant, plan_id).await?;
        match plan.status {
            PlanStatus::Active => {}
            PlanStatus::Completed => return Err(EngineError::PlanAlreadyCompleted { plan_id }),
            PlanStatus::Expired => return Err(EngineError::plan_expired(plan_id)),
            PlanStatus::Cancelled => {
                return Err(EngineError::invalid_transition("payment plan", plan.status, PlanStatus::Cancelled))
            }
        }

        end_plan(uow.as_mut(), &mut tx, &mut plan, PlanStatus::Cancelled, now).await?;
        uow.commit().await?;

        info!(tenant = %tenant, plan = %plan.id, "Payment plan cancelled");
        self.engine.notify(vec![Notification::TransactionCancelled {
            tenant_id: tenant,
            transaction_id: plan.transaction_id,
        }]);
        Ok(plan)
    }

    /// Administrative deadline override. Moves the plan and its reservations
    /// to `new_expires_at`; an earlier deadline than the current one is refused.
    pub async fn extend_expiry(
        &self,
        tenant: TenantId,
        plan_id: PlanId,
        new_expires_at: DateTime<Utc>,
    ) -> EngineResult<PaymentPlan> {
        let now = self.engine.now();
        let mut uow = self.engine.begin().await?;
        let (_, mut plan) = lock_plan(uow.as_mut(), tenant, plan_id).await?;
        match plan.status {
            PlanStatus::Active => {}
            PlanStatus::Completed => return Err(EngineError::PlanAlreadyCompleted { plan_id }),
            PlanStatus::Expired => return Err(EngineError::plan_expired(plan_id)),
            PlanStatus::Cancelled => {
                return Err(EngineError::invalid_transition("payment plan", plan.status, PlanStatus::Active))
            }
        }
        if new_expires_at < plan.expires_at || new_expires_at <= now {
            return Err(EngineError::InvalidRequest(format!(
                "new expiry must be in the future and not before {}",
                plan.expires_at
            )));
        }

        plan.expires_at = new_expires_at;
        plan.updated_at = now;
        uow.update_plan(&plan).await?;
        for mut hold in uow.holds_for_transaction(tenant, plan.transaction_id).await? {
            if hold.plan_id == Some(plan.id) && hold.is_active() {
                hold.expires_at = new_expires_at;
                hold.updated_at = now;
                uow.update_hold(&hold).await?;
            }
        }

        uow.commit().await?;

        info!(tenant = %tenant, plan = %plan.id, expires_at = %new_expires_at, "Payment plan extended");
        Ok(plan)
    }

    pub async fn get_plan(&self, tenant: TenantId, plan_id: PlanId) -> EngineResult<PlanView> {
        let mut uow = self.engine.begin().await?;
        let plan = load_plan(uow.as_mut(), tenant, plan_id).await?;
        let payments = uow.payments_for_plan(tenant, plan_id).await?;
        Ok(PlanView::new(plan, payments))
    }

    /// Amount the next installment must have; `None` for flexible or finished plans.
    pub async fn next_installment_amount(&self, tenant: TenantId, plan_id: PlanId) -> EngineResult<Option<Money>> {
        Ok(self.get_plan(tenant, plan_id).await?.next_installment_amount)
    }

    /// Ids of active plans past their deadline.
    pub async fn overdue(&self, tenant: TenantId) -> EngineResult<Vec<PlanId>> {
        let now = self.engine.now();
        let mut uow = self.engine.begin().await?;
        let plans = uow.expired_plans(tenant, now).await?;
        Ok(plans.into_iter().map(|p| p.id).collect())
    }
}

async fn load_plan(uow: &mut dyn UnitOfWork, tenant: TenantId, plan_id: PlanId) -> EngineResult<PaymentPlan> {
    found(uow.plan(tenant, plan_id).await?, "payment plan", plan_id)
}

/// Locks the owning transaction, then the plan: same order as every
/// transaction-level write.
async fn lock_plan(
    uow: &mut dyn UnitOfWork,
    tenant: TenantId,
    plan_id: PlanId,
) -> EngineResult<(Transaction, PaymentPlan)> {
    let owner = found(uow.plan_owner(tenant, plan_id).await?, "payment plan", plan_id)?;
    let tx = load_transaction(uow, tenant, owner).await?;
    let plan = load_plan(uow, tenant, plan_id).await?;
    Ok((tx, plan))
}

/// Status re-check under the plan row lock, before any payment is appended.
fn ensure_payable(plan: &PaymentPlan, now: DateTime<Utc>) -> EngineResult<()> {
    match plan.status {
        PlanStatus::Completed => Err(EngineError::PlanAlreadyCompleted { plan_id: plan.id }),
        PlanStatus::Expired => Err(EngineError::plan_expired(plan.id)),
        PlanStatus::Cancelled => Err(EngineError::invalid_transition("payment plan", plan.status, "paid")),
        PlanStatus::Active if plan.expires_at <= now => {
            warn!(plan = %plan.id, expires_at = %plan.expires_at, "Payment against overdue plan refused");
            Err(EngineError::plan_expired(plan.id))
        }
        PlanStatus::Active => Ok(()),
    }
}

fn next_installment(plan: &PaymentPlan, payments: &[Payment]) -> Option<Money> {
    if plan.status != PlanStatus::Active {
        return None;
    }
    let paid_installments = payments
        .iter()
        .filter(|p| p.status == PaymentStatus::Completed)
        .count();
    plan.next_installment_amount(u32::try_from(paid_installments).ok()?)
}

/// Moves an active plan to `expired` or `cancelled`; the transaction follows
/// and the reservations are released with it.
async fn end_plan(
    uow: &mut dyn UnitOfWork,
    tx: &mut Transaction,
    plan: &mut PaymentPlan,
    status: PlanStatus,
    now: DateTime<Utc>,
) -> EngineResult<()> {
    if !plan.status.can_transition_to(status) {
        return Err(EngineError::invalid_transition("payment plan", plan.status, status));
    }
    plan.status = status;
    plan.updated_at = now;
    uow.update_plan(plan).await?;

    let tx_status = match status {
        PlanStatus::Expired => TransactionStatus::Expired,
        _ => TransactionStatus::Cancelled,
    };
    if tx.status.can_transition_to(tx_status) {
        transition(uow, tx, tx_status, now).await?;
    } else {
        // Transaction already terminal: still make sure no reservation stays active.
        for mut hold in uow.holds_for_transaction(plan.tenant_id, plan.transaction_id).await? {
            if hold.plan_id == Some(plan.id) && hold.is_active() {
                super::reservation::free_hold(uow, &mut hold, HoldStatus::Released, now).await?;
            }
        }
    }
    Ok(())
}
