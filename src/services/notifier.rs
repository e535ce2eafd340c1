//! notifier.rs
//!
//! Уведомления о жизненном цикле планов и транзакций.
//!
//! Движок вызывает [`NotificationDispatcher::dispatch`] только после коммита
//! единицы работы; доставка идёт в отдельной задаче (fire-and-forget) и
//! никогда не держит открытой транзакцию хранилища.
//!
//! 1.  **LogNotifier**: пишет уведомления в лог.
//! 2.  **WebhookNotifier**: POST JSON на внешний URL с подписью `X-Signature`,
//!     все вызовы идут через [`CircuitBreaker`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::CircuitBreakerConfig;
use crate::models::{Money, PlanId, TenantId, TransactionId};

/// Event published by the engine after a state change committed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    PlanCreated {
        tenant_id: TenantId,
        plan_id: PlanId,
        transaction_id: TransactionId,
        total_amount: Money,
        expires_at: DateTime<Utc>,
    },
    PaymentReceived {
        tenant_id: TenantId,
        transaction_id: TransactionId,
        plan_id: Option<PlanId>,
        amount: Money,
        remaining: Money,
    },
    PlanCompleted {
        tenant_id: TenantId,
        plan_id: PlanId,
        transaction_id: TransactionId,
    },
    PlanExpired {
        tenant_id: TenantId,
        plan_id: PlanId,
        transaction_id: TransactionId,
    },
    TransactionExpired {
        tenant_id: TenantId,
        transaction_id: TransactionId,
    },
    TransactionCancelled {
        tenant_id: TenantId,
        transaction_id: TransactionId,
    },
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::PlanCreated { .. } => "plan_created",
            Notification::PaymentReceived { .. } => "payment_received",
            Notification::PlanCompleted { .. } => "plan_completed",
            Notification::PlanExpired { .. } => "plan_expired",
            Notification::TransactionExpired { .. } => "transaction_expired",
            Notification::TransactionCancelled { .. } => "transaction_cancelled",
        }
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("circuit breaker is open - notification endpoint temporarily unavailable")]
    CircuitOpen,

    #[error("notification endpoint error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("notification endpoint answered {0}")]
    Rejected(reqwest::StatusCode),

    #[error("could not encode notification: {0}")]
    Encode(#[from] serde_json::Error),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Fire-and-forget front of a [`Notifier`].
#[derive(Clone)]
pub struct NotificationDispatcher {
    notifier: Arc<dyn Notifier>,
}

impl NotificationDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }

    pub fn dispatch(&self, notification: Notification) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(event = notification.kind(), "No async runtime, notification dropped");
            return;
        };
        let notifier = self.notifier.clone();
        runtime.spawn(async move {
            if let Err(e) = notifier.notify(&notification).await {
                warn!(event = notification.kind(), error = %e, "Notification delivery failed");
            }
        });
    }
}

/// Пишет уведомления в лог. Используется, когда внешний адрес не настроен.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        info!(event = notification.kind(), payload = ?notification, "📣 Notification");
        Ok(())
    }
}

/// Состояния "Автоматического выключателя" (Circuit Breaker).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Нормальный режим, запросы разрешены.
    Closed,
    /// После серии сбоев запросы блокируются до истечения таймаута.
    Open,
    /// Пропускаем пробный запрос, чтобы проверить, восстановился ли сервис.
    HalfOpen,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    state: RwLock<CircuitState>,
    /// Счетчик последовательных сбоев.
    failure_count: AtomicU32,
    /// Момент последнего сбоя, в миллисекундах от `epoch`.
    last_failure_ms: AtomicU64,
    epoch: Instant,
    failure_threshold: u32,
    timeout: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, timeout_seconds: u64) -> Self {
        Self {
            state: RwLock::new(CircuitState::Closed),
            failure_count: AtomicU32::new(0),
            last_failure_ms: AtomicU64::new(0),
            epoch: Instant::now(),
            failure_threshold: failure_threshold.max(1),
            timeout: Duration::from_secs(timeout_seconds),
        }
    }

    pub fn from_config(config: &CircuitBreakerConfig) -> Self {
        Self::new(config.failure_threshold, config.timeout_seconds)
    }

    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Можно ли выполнить следующий запрос.
    pub fn can_execute(&self) -> bool {
        let current = *self.state.read().unwrap_or_else(|p| p.into_inner());
        match current {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let since_failure = self.elapsed_ms().saturating_sub(self.last_failure_ms.load(Ordering::Relaxed));
                if u128::from(since_failure) >= self.timeout.as_millis() {
                    *self.state.write().unwrap_or_else(|p| p.into_inner()) = CircuitState::HalfOpen;
                    info!("Circuit breaker transitioning to HalfOpen state");
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut state = self.state.write().unwrap_or_else(|p| p.into_inner());
        self.failure_count.store(0, Ordering::Relaxed);
        if *state == CircuitState::HalfOpen {
            *state = CircuitState::Closed;
            info!("Circuit breaker recovered - transitioning to Closed state");
        }
    }

    pub fn record_failure(&self) {
        let failures = self.failure_count.fetch_add(1, Ordering::Relaxed) + 1;
        self.last_failure_ms.store(self.elapsed_ms(), Ordering::Relaxed);

        let mut state = self.state.write().unwrap_or_else(|p| p.into_inner());
        match *state {
            CircuitState::Closed if failures >= self.failure_threshold => {
                *state = CircuitState::Open;
                error!(failures, threshold = self.failure_threshold, "Circuit breaker OPENED");
            }
            CircuitState::HalfOpen => {
                *state = CircuitState::Open;
                warn!("Circuit breaker test failed - returning to Open state");
            }
            _ => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        *self.state.read().unwrap_or_else(|p| p.into_inner())
    }
}

/// Отправляет уведомления POST-запросом на внешний URL.
///
/// Подпись: `X-Signature = sha256_hex(body + secret)`.
pub struct WebhookNotifier {
    http_client: reqwest::Client,
    url: String,
    secret: String,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, secret: impl Into<String>, circuit_breaker: Arc<CircuitBreaker>) -> Result<Self, NotifyError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http_client,
            url: url.into(),
            secret: secret.into(),
            circuit_breaker,
        })
    }

    pub fn sign(&self, body: &str) -> String {
        sign_body(body, &self.secret)
    }
}

pub fn sign_body(body: &str, secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body.as_bytes());
    hasher.update(secret.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        if !self.circuit_breaker.can_execute() {
            warn!(event = notification.kind(), "Circuit breaker is OPEN - notification skipped");
            return Err(NotifyError::CircuitOpen);
        }

        let body = serde_json::to_string(notification)?;
        let signature = self.sign(&body);

        let result = self
            .http_client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header("X-Signature", signature)
            .body(body)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                self.circuit_breaker.record_success();
                Ok(())
            }
            Ok(response) => {
                let status = response.status();
                if status.is_server_error() {
                    self.circuit_breaker.record_failure();
                }
                Err(NotifyError::Rejected(status))
            }
            Err(e) => {
                error!(event = notification.kind(), error = %e, "Notification request failed");
                self.circuit_breaker.record_failure();
                Err(NotifyError::Http(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_and_recovers_through_half_open() {
        let cb = CircuitBreaker::new(2, 0);
        assert!(cb.can_execute());
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        // Zero timeout: the next check lets a trial call through.
        assert!(cb.can_execute());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn stays_open_until_timeout() {
        let cb = CircuitBreaker::new(1, 3600);
        cb.record_failure();
        assert!(!cb.can_execute());
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn failed_trial_call_reopens() {
        let cb = CircuitBreaker::new(1, 0);
        cb.record_failure();
        assert!(cb.can_execute());
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn signature_covers_body_and_secret() {
        let a = sign_body("{}", "s1");
        assert_eq!(a.len(), 64);
        assert_ne!(a, sign_body("{}", "s2"));
        assert_ne!(a, sign_body("{ }", "s1"));
    }

    #[test]
    fn notifications_are_tagged() {
        let n = Notification::TransactionExpired {
            tenant_id: TenantId::new(),
            transaction_id: TransactionId::new(),
        };
        let json = serde_json::to_value(&n).unwrap();
        assert_eq!(json["event"], "transaction_expired");
        assert_eq!(n.kind(), "transaction_expired");
    }
}
