#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::{Arc, Mutex};

use ticket_engine::clock::ManualClock;
use ticket_engine::config::EngineConfig;
use ticket_engine::models::{
    CustomerId, EventId, Hold, Money, Seat, SessionId, TenantId, Transaction, Zone, ZoneKind,
};
use ticket_engine::services::{
    Engine, LockItem, NewZone, Notification, Notifier, NotifyError, RowLayout, TransactionView,
};
use ticket_engine::store::MemoryStore;

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 4, 10, 0, 0).unwrap()
}

/// Collects notifications instead of sending them anywhere.
#[derive(Default)]
pub struct RecordingNotifier {
    seen: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn kinds(&self) -> Vec<&'static str> {
        self.seen.lock().unwrap().iter().map(Notification::kind).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.seen.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

/// One tenant and one event on an in-memory store with a hand-driven clock.
pub struct Fixture {
    pub engine: Engine,
    pub clock: Arc<ManualClock>,
    pub notifier: Arc<RecordingNotifier>,
    pub tenant: TenantId,
    pub event: EventId,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let clock = Arc::new(ManualClock::new(t0()));
        let notifier = Arc::new(RecordingNotifier::default());
        let engine = Engine::new(Arc::new(MemoryStore::new()), clock.clone(), config).with_notifier(notifier.clone());
        Self {
            engine,
            clock,
            notifier,
            tenant: TenantId::new(),
            event: EventId::new(),
        }
    }

    pub fn advance(&self, minutes: i64) {
        self.clock.advance(Duration::minutes(minutes));
    }

    pub async fn numbered_zone(&self, rows: &[(i32, i32)], base: i64) -> (Zone, Vec<Seat>) {
        let layout = NewZone {
            event_id: self.event,
            name: "Stalls".into(),
            kind: ZoneKind::Numbered,
            capacity: None,
            base_price: Money::from_major(base),
            rows: rows.iter().map(|&(row, seats)| RowLayout { row, seats }).collect(),
        };
        self.engine.catalog().define_zone(self.tenant, layout).await.unwrap()
    }

    pub async fn general_zone(&self, capacity: i64, base: i64) -> Zone {
        self.general_zone_at(capacity, Money::from_major(base)).await
    }

    pub async fn general_zone_at(&self, capacity: i64, base_price: Money) -> Zone {
        let layout = NewZone {
            event_id: self.event,
            name: "Standing".into(),
            kind: ZoneKind::General,
            capacity: Some(capacity),
            base_price,
            rows: Vec::new(),
        };
        self.engine.catalog().define_zone(self.tenant, layout).await.unwrap().0
    }

    pub async fn lock(&self, session: &str, items: &[LockItem]) -> Vec<Hold> {
        self.engine
            .reservations()
            .lock(self.tenant, &SessionId::new(session), items)
            .await
            .unwrap()
    }

    pub async fn open(&self, session: &str) -> Transaction {
        self.engine
            .transactions()
            .open(self.tenant, SessionId::new(session), CustomerId::new())
            .await
            .unwrap()
    }

    /// Locks `items` for `session` and moves a fresh transaction to `reserved`.
    pub async fn reserved(&self, session: &str, items: &[LockItem]) -> TransactionView {
        self.lock(session, items).await;
        let tx = self.open(session).await;
        self.engine.transactions().reserve(self.tenant, tx.id, None).await.unwrap()
    }

    /// Waits for fire-and-forget notifications to land.
    pub async fn settle(&self) {
        for _ in 0..20 {
            tokio::task::yield_now().await;
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    }
}
