//! sweeper.rs
//!
//! Фоновая очистка: истёкшие корзинные блокировки и просроченные планы.
//!
//! 1.  **Блокировки**: `ReservationManager::sweep_expired` по каждому тенанту.
//! 2.  **Планы**: `PaymentPlanManager::overdue` + `expire_plan` по одному плану
//!     за единицу работы, чтобы сбой одного не откатывал остальные.
//!
//! Временные ошибки хранилища повторяются по [`RetryPolicy`]; всё прочее
//! логируется, и проход продолжается со следующего элемента.

use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::Engine;
use crate::config::SweeperConfig;
use crate::error::{EngineError, EngineResult};
use crate::models::TransactionId;

/// Exponential backoff for transient store failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &SweeperConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            ..Self::default()
        }
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(i32::try_from(attempt).unwrap_or(i32::MAX));
        let millis = self.initial_backoff.as_millis() as f64 * factor;
        if !millis.is_finite() || millis >= self.max_backoff.as_millis() as f64 {
            self.max_backoff
        } else {
            Duration::from_millis(millis as u64)
        }
    }

    /// Runs `operation` until it succeeds, fails permanently, or the retry
    /// budget is spent. Only transient store errors are retried.
    pub async fn retry<F, Fut, T>(&self, mut operation: F) -> EngineResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = EngineResult<T>>,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        info!(attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(EngineError::Store(e)) if e.is_transient() && attempt < self.max_retries => {
                    let delay = self.delay_for(attempt);
                    warn!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "Transient store error, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub cart_locks_expired: usize,
    pub transactions_expired: Vec<TransactionId>,
    pub plans_expired: usize,
}

pub struct SweepService {
    engine: Engine,
    retry: RetryPolicy,
}

impl SweepService {
    pub fn new(engine: Engine, retry: RetryPolicy) -> Self {
        Self { engine, retry }
    }

    /// Запускает полный проход по всем тенантам.
    pub async fn run_once(&self) -> EngineResult<SweepReport> {
        debug!("🧹 Starting expiry sweep");
        let tenants = self
            .retry
            .retry(|| async move { self.engine.store().tenants().await.map_err(EngineError::from) })
            .await?;

        let mut report = SweepReport::default();
        for tenant in tenants {
            // Истёкшие корзинные блокировки
            match self
                .retry
                .retry(|| async move { self.engine.reservations().sweep_expired(tenant).await })
                .await
            {
                Ok(sweep) => {
                    report.cart_locks_expired += sweep.locks_expired;
                    report.transactions_expired.extend(sweep.transactions_expired);
                }
                Err(e) => error!(tenant = %tenant, error = %e, "🧹 Cart lock sweep failed"),
            }

            // Просроченные планы платежей
            let overdue = match self.retry.retry(|| async move { self.engine.plans().overdue(tenant).await }).await {
                Ok(ids) => ids,
                Err(e) => {
                    error!(tenant = %tenant, error = %e, "💳 Could not list overdue plans");
                    continue;
                }
            };
            for plan_id in overdue {
                match self
                    .retry
                    .retry(|| async move { self.engine.plans().expire_plan(tenant, plan_id).await })
                    .await
                {
                    Ok(true) => report.plans_expired += 1,
                    Ok(false) => {}
                    Err(e) => error!(tenant = %tenant, plan = %plan_id, error = %e, "💳 Plan expiry failed"),
                }
            }
        }

        if report.cart_locks_expired > 0 || report.plans_expired > 0 {
            info!(
                cart_locks = report.cart_locks_expired,
                transactions = report.transactions_expired.len(),
                plans = report.plans_expired,
                "✅ Expiry sweep completed"
            );
        }
        Ok(report)
    }

    /// Registers the sweep with `scheduler` to run every `interval`.
    pub fn start(self: Arc<Self>, scheduler: &dyn Scheduler, interval: Duration) -> ScheduledHandle {
        let task: ScheduledTask = Arc::new(move || {
            let service = self.clone();
            async move {
                if let Err(e) = service.run_once().await {
                    error!(error = %e, "🧹 Expiry sweep failed");
                }
            }
            .boxed()
        });
        scheduler.every("expiry-sweep", interval, task)
    }
}

pub type ScheduledTask = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Runs a task periodically until its handle is shut down.
pub trait Scheduler: Send + Sync {
    fn every(&self, name: &'static str, interval: Duration, task: ScheduledTask) -> ScheduledHandle;
}

pub struct ScheduledHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl ScheduledHandle {
    /// Stops the loop after the current run, if any, finishes.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.join.await {
            error!(error = %e, "Scheduled task panicked");
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn every(&self, name: &'static str, interval: Duration, task: ScheduledTask) -> ScheduledHandle {
        let (shutdown, mut stop) = watch::channel(false);
        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!(task = name, interval_secs = interval.as_secs(), "Scheduled task started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => task().await,
                    _ = stop.changed() => {
                        info!(task = name, "Scheduled task stopping");
                        break;
                    }
                }
            }
        });
        ScheduledHandle { shutdown, join }
    }
}
