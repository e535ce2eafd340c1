use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use super::reservation::free_hold;
use super::{found, Engine, Notification};
use crate::error::{EngineError, EngineResult};
use crate::models::{
    Conversion, CustomerId, Hold, HoldId, HoldKind, HoldStatus, Money, Payment, PaymentPlan, PlanStatus,
    SeatStatus, SessionId, TenantId, Transaction, TransactionId, TransactionStatus,
};
use crate::store::UnitOfWork;

/// A transaction with the holds and plan it owns.
#[derive(Debug, Clone, Serialize)]
pub struct TransactionView {
    pub transaction: Transaction,
    pub holds: Vec<Hold>,
    pub plan: Option<PaymentPlan>,
}

/// Lifecycle of a sale:
///
/// ```text
/// pending ──► reserved ──► completed
///    │           ├──────► expired
///    └───────────┴──────► cancelled
/// ```
///
/// Every move into a terminal state goes through [`transition`], which
/// releases or converts the owned holds in the same unit of work.
pub struct TransactionStateMachine<'a> {
    engine: &'a Engine,
}

impl<'a> TransactionStateMachine<'a> {
    pub(crate) fn new(engine: &'a Engine) -> Self {
        Self { engine }
    }

    pub async fn open(&self, tenant: TenantId, session: SessionId, customer: CustomerId) -> EngineResult<Transaction> {
        let now = self.engine.now();
        let tx = Transaction::open(tenant, session, customer, now);

        let mut uow = self.engine.begin().await?;
        uow.insert_transaction(&tx).await?;
        uow.commit().await?;

        info!(tenant = %tenant, transaction = %tx.id, "Transaction opened");
        Ok(tx)
    }

    /// `pending → reserved`: claims the session's unclaimed cart locks (all of
    /// them, or exactly `hold_ids`) and fixes the total from their captured
    /// prices. Every claimed lock must still be live.
    pub async fn reserve(
        &self,
        tenant: TenantId,
        id: TransactionId,
        hold_ids: Option<&[HoldId]>,
    ) -> EngineResult<TransactionView> {
        let now = self.engine.now();
        let mut uow = self.engine.begin().await?;
        let mut tx = load_transaction(uow.as_mut(), tenant, id).await?;
        if tx.status != TransactionStatus::Pending {
            return Err(EngineError::invalid_transition("transaction", tx.status, TransactionStatus::Reserved));
        }

        let unclaimed: Vec<Hold> = uow
            .active_cart_locks(tenant, &tx.session_id)
            .await?
            .into_iter()
            .filter(|h| h.transaction_id.is_none())
            .collect();

        let mut selected = match hold_ids {
            None => unclaimed,
            Some(ids) => {
                let mut picked = Vec::with_capacity(ids.len());
                for hold_id in ids {
                    match unclaimed.iter().find(|h| h.id == *hold_id) {
                        Some(h) => picked.push(h.clone()),
                        None => {
                            let hold = uow.hold(tenant, *hold_id).await?;
                            return Err(match hold {
                                Some(h) if h.session_id == tx.session_id => EngineError::LockExpired { hold_id: h.id },
                                _ => EngineError::not_found("cart lock", hold_id),
                            });
                        }
                    }
                }
                picked
            }
        };

        if selected.is_empty() {
            return Err(EngineError::InvalidRequest("no active cart locks to reserve".into()));
        }
        if let Some(stale) = selected.iter().find(|h| !h.is_live_at(now)) {
            return Err(EngineError::LockExpired { hold_id: stale.id });
        }

        for hold in &mut selected {
            hold.transaction_id = Some(tx.id);
            hold.updated_at = now;
            uow.update_hold(hold).await?;
        }
        tx.total_amount = selected.iter().map(|h| h.price_at_lock).sum();
        transition(uow.as_mut(), &mut tx, TransactionStatus::Reserved, now).await?;

        uow.commit().await?;

        info!(
            tenant = %tenant,
            transaction = %tx.id,
            holds = selected.len(),
            total = %tx.total_amount,
            "Transaction reserved"
        );
        Ok(TransactionView {
            transaction: tx,
            holds: selected,
            plan: None,
        })
    }

    /// `reserved → completed` with a single payment of the full total,
    /// bypassing payment plans.
    pub async fn pay_in_full(&self, tenant: TenantId, id: TransactionId, amount: Money) -> EngineResult<TransactionView> {
        let now = self.engine.now();
        let mut uow = self.engine.begin().await?;
        let mut tx = load_transaction(uow.as_mut(), tenant, id).await?;
        if tx.status != TransactionStatus::Reserved {
            return Err(EngineError::invalid_transition("transaction", tx.status, TransactionStatus::Completed));
        }
        if uow.plan_for_transaction(tenant, id).await?.is_some() {
            return Err(EngineError::InvalidRequest(
                "transaction is paid through its payment plan".into(),
            ));
        }

        let holds = uow.holds_for_transaction(tenant, id).await?;
        if let Some(stale) = holds.iter().find(|h| h.kind == HoldKind::CartLock && !h.is_live_at(now)) {
            return Err(EngineError::LockExpired { hold_id: stale.id });
        }
        if amount != tx.total_amount {
            return Err(EngineError::InvalidPaymentAmount {
                submitted: amount,
                expected: Some(tx.total_amount),
                remaining: tx.total_amount,
                reason: "full payment must equal the transaction total".into(),
            });
        }

        // Free events complete without a payment row.
        if !amount.is_zero() {
            uow.insert_payment(&Payment::completed(tenant, tx.id, None, amount, now)).await?;
        }
        transition(uow.as_mut(), &mut tx, TransactionStatus::Completed, now).await?;
        let holds = uow.holds_for_transaction(tenant, id).await?;

        uow.commit().await?;

        info!(tenant = %tenant, transaction = %tx.id, amount = %amount, "Transaction paid in full");
        if !amount.is_zero() {
            self.engine.notify(vec![Notification::PaymentReceived {
                tenant_id: tenant,
                transaction_id: tx.id,
                plan_id: None,
                amount,
                remaining: Money::ZERO,
            }]);
        }
        Ok(TransactionView {
            transaction: tx,
            holds,
            plan: None,
        })
    }

    /// Explicit cancellation from `pending` or `reserved`. Every active hold
    /// is released and an active plan is cancelled in the same unit of work.
    pub async fn cancel(&self, tenant: TenantId, id: TransactionId) -> EngineResult<Transaction> {
        let now = self.engine.now();
        let mut uow = self.engine.begin().await?;
        let mut tx = load_transaction(uow.as_mut(), tenant, id).await?;

        if let Some(mut plan) = uow.plan_for_transaction(tenant, id).await? {
            if plan.status == PlanStatus::Active {
                plan.status = PlanStatus::Cancelled;
                plan.updated_at = now;
                uow.update_plan(&plan).await?;
            }
        }
        transition(uow.as_mut(), &mut tx, TransactionStatus::Cancelled, now).await?;

        uow.commit().await?;

        info!(tenant = %tenant, transaction = %tx.id, "Transaction cancelled");
        self.engine.notify(vec![Notification::TransactionCancelled {
            tenant_id: tenant,
            transaction_id: tx.id,
        }]);
        Ok(tx)
    }

    pub async fn get(&self, tenant: TenantId, id: TransactionId) -> EngineResult<TransactionView> {
        let mut uow = self.engine.begin().await?;
        let transaction = load_transaction(uow.as_mut(), tenant, id).await?;
        let holds = uow.holds_for_transaction(tenant, id).await?;
        let plan = uow.plan_for_transaction(tenant, id).await?;
        Ok(TransactionView {
            transaction,
            holds,
            plan,
        })
    }
}

pub(crate) async fn load_transaction(
    uow: &mut dyn UnitOfWork,
    tenant: TenantId,
    id: TransactionId,
) -> EngineResult<Transaction> {
    found(uow.transaction(tenant, id).await?, "transaction", id)
}

/// Moves `tx` to `to` and applies the inventory consequence: `completed`
/// turns every active hold into a sale, `cancelled` and `expired` release
/// them.
pub(crate) async fn transition(
    uow: &mut dyn UnitOfWork,
    tx: &mut Transaction,
    to: TransactionStatus,
    now: DateTime<Utc>,
) -> EngineResult<()> {
    if !tx.status.can_transition_to(to) {
        return Err(EngineError::invalid_transition("transaction", tx.status, to));
    }

    match to {
        TransactionStatus::Completed => convert_to_sales(uow, tx, now).await?,
        TransactionStatus::Cancelled | TransactionStatus::Expired => release_holds(uow, tx, now).await?,
        TransactionStatus::Pending | TransactionStatus::Reserved => {}
    }

    tx.status = to;
    tx.updated_at = now;
    uow.update_transaction(tx).await?;
    Ok(())
}

/// Expires a reserved transaction together with its active plan, if any.
/// Returns `None` when the transaction is missing or not reserved.
pub(crate) async fn expire_in(
    uow: &mut dyn UnitOfWork,
    tenant: TenantId,
    id: TransactionId,
    now: DateTime<Utc>,
) -> EngineResult<Option<Transaction>> {
    let Some(mut tx) = uow.transaction(tenant, id).await? else {
        return Ok(None);
    };
    if tx.status != TransactionStatus::Reserved {
        return Ok(None);
    }
    if let Some(mut plan) = uow.plan_for_transaction(tenant, id).await? {
        if plan.status == PlanStatus::Active {
            plan.status = PlanStatus::Expired;
            plan.updated_at = now;
            uow.update_plan(&plan).await?;
        }
    }
    transition(uow, &mut tx, TransactionStatus::Expired, now).await?;
    info!(tenant = %tenant, transaction = %tx.id, "Transaction expired");
    Ok(Some(tx))
}

async fn release_holds(uow: &mut dyn UnitOfWork, tx: &Transaction, now: DateTime<Utc>) -> EngineResult<()> {
    for mut hold in uow.holds_for_transaction(tx.tenant_id, tx.id).await? {
        if hold.is_active() {
            free_hold(uow, &mut hold, HoldStatus::Released, now).await?;
        }
    }
    Ok(())
}

async fn convert_to_sales(uow: &mut dyn UnitOfWork, tx: &Transaction, now: DateTime<Utc>) -> EngineResult<()> {
    for mut hold in uow.holds_for_transaction(tx.tenant_id, tx.id).await? {
        if !hold.is_active() {
            continue;
        }
        hold.mark_converted(Conversion::Sale, None, now);
        uow.update_hold(&hold).await?;
        if let Some(seat_id) = hold.seat_id() {
            uow.set_seat_status(tx.tenant_id, seat_id, SeatStatus::Sold).await?;
        }
    }
    Ok(())
}
