//! Core components of the reservation and pricing engine.
//!
//! [`Engine`] owns the shared collaborators (store, clock, policy, notifier)
//! and hands out cheap borrowed views for each component:
//!
//! | view | component |
//! |---|---|
//! | [`Engine::inventory`] | [`InventoryLedger`] |
//! | [`Engine::pricing`] | [`PricingEngine`] |
//! | [`Engine::reservations`] | [`ReservationManager`] |
//! | [`Engine::plans`] | [`PaymentPlanManager`] |
//! | [`Engine::transactions`] | [`TransactionStateMachine`] |
//! | [`Engine::catalog`] | [`Catalog`] |
//!
//! Each operation is one unit of work against the store. Notifications are
//! dispatched only after that unit of work has committed.

use std::sync::Arc;

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::store::{Store, UnitOfWork};

pub mod catalog;
pub mod inventory;
pub mod notifier;
pub mod payment_plan;
pub mod pricing;
pub mod reservation;
pub mod sweeper;
pub mod transaction;

pub use catalog::{Catalog, NewPriceStage, NewZone, RowLayout};
pub use inventory::InventoryLedger;
pub use notifier::{
    CircuitBreaker, CircuitState, LogNotifier, Notification, NotificationDispatcher, Notifier, NotifyError, WebhookNotifier,
};
pub use payment_plan::{NewPlan, PaymentPlanManager, PlanView};
pub use pricing::{PricingContext, PricingEngine};
pub use reservation::{LockItem, LockSweep, ReservationManager};
pub use sweeper::{RetryPolicy, ScheduledHandle, ScheduledTask, Scheduler, SweepReport, SweepService, TokioScheduler};
pub use transaction::{TransactionStateMachine, TransactionView};

#[derive(Clone)]
pub struct Engine {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    config: Arc<EngineConfig>,
    notifier: NotificationDispatcher,
}

impl Engine {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, config: EngineConfig) -> Self {
        Self {
            store,
            clock,
            config: Arc::new(config),
            notifier: NotificationDispatcher::new(Arc::new(LogNotifier)),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = NotificationDispatcher::new(notifier);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }

    pub fn inventory(&self) -> InventoryLedger<'_> {
        InventoryLedger::new(self)
    }

    pub fn pricing(&self) -> PricingEngine<'_> {
        PricingEngine::new(self)
    }

    pub fn reservations(&self) -> ReservationManager<'_> {
        ReservationManager::new(self)
    }

    pub fn plans(&self) -> PaymentPlanManager<'_> {
        PaymentPlanManager::new(self)
    }

    pub fn transactions(&self) -> TransactionStateMachine<'_> {
        TransactionStateMachine::new(self)
    }

    pub fn catalog(&self) -> Catalog<'_> {
        Catalog::new(self)
    }

    pub(crate) async fn begin(&self) -> EngineResult<Box<dyn UnitOfWork>> {
        Ok(self.store.begin().await?)
    }

    pub(crate) fn notify(&self, notifications: Vec<Notification>) {
        for notification in notifications {
            self.notifier.dispatch(notification);
        }
    }
}

/// Turns a missing row into `NotFound`.
pub(crate) fn found<T>(value: Option<T>, entity: &'static str, id: impl ToString) -> EngineResult<T> {
    value.ok_or_else(|| EngineError::not_found(entity, id))
}
