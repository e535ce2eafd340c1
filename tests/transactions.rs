mod common;

use common::Fixture;
use ticket_engine::error::EngineError;
use ticket_engine::models::{Conversion, HoldStatus, Money, SeatStatus, SessionId, TransactionStatus};
use ticket_engine::services::{LockItem, NewPlan};

#[tokio::test]
async fn reserve_claims_the_sessions_locks() {
    let fx = Fixture::new();
    let (zone, seats) = fx.numbered_zone(&[(1, 3)], 45).await;
    fx.lock(
        "alice",
        &[LockItem::seat(zone.id, seats[0].id), LockItem::seat(zone.id, seats[1].id)],
    )
    .await;
    let tx = fx.open("alice").await;
    assert_eq!(tx.status, TransactionStatus::Pending);

    let view = fx.engine.transactions().reserve(fx.tenant, tx.id, None).await.unwrap();
    assert_eq!(view.transaction.status, TransactionStatus::Reserved);
    assert_eq!(view.transaction.total_amount, Money::from_major(90));
    assert_eq!(view.holds.len(), 2);
    assert!(view.holds.iter().all(|h| h.transaction_id == Some(tx.id)));

    // Claimed locks are not released by a cart release.
    let released = fx
        .engine
        .reservations()
        .release(fx.tenant, &SessionId::new("alice"), None)
        .await
        .unwrap();
    assert!(released.is_empty());
}

#[tokio::test]
async fn reserve_needs_locks() {
    let fx = Fixture::new();
    let tx = fx.open("alice").await;
    let err = fx.engine.transactions().reserve(fx.tenant, tx.id, None).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidRequest(_)));
}

#[tokio::test]
async fn reserve_with_a_stale_lock_fails() {
    let fx = Fixture::new();
    let zone = fx.general_zone(5, 10).await;
    let holds = fx.lock("alice", &[LockItem::quantity(zone.id, 1)]).await;
    let tx = fx.open("alice").await;

    fx.advance(16);
    let err = fx
        .engine
        .transactions()
        .reserve(fx.tenant, tx.id, Some(&[holds[0].id]))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::LockExpired { hold_id } if hold_id == holds[0].id));
}

#[tokio::test]
async fn pay_in_full_sells_the_seats() {
    let fx = Fixture::new();
    let (zone, seats) = fx.numbered_zone(&[(1, 2)], 70).await;
    let view = fx.reserved("alice", &[LockItem::seat(zone.id, seats[0].id)]).await;

    let err = fx
        .engine
        .transactions()
        .pay_in_full(fx.tenant, view.transaction.id, Money::from_major(69))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidPaymentAmount { .. }));

    let paid = fx
        .engine
        .transactions()
        .pay_in_full(fx.tenant, view.transaction.id, Money::from_major(70))
        .await
        .unwrap();
    assert_eq!(paid.transaction.status, TransactionStatus::Completed);
    assert!(paid
        .holds
        .iter()
        .all(|h| h.status == HoldStatus::Converted && h.conversion == Some(Conversion::Sale)));

    let all = fx.engine.catalog().seats(fx.tenant, zone.id).await.unwrap();
    assert_eq!(all.iter().find(|s| s.id == seats[0].id).map(|s| s.status), Some(SeatStatus::Sold));

    let snapshot = fx.engine.inventory().snapshot(fx.tenant, zone.id).await.unwrap();
    assert_eq!(snapshot.sold, 1);
    assert_eq!(snapshot.held, 0);

    // Completed is terminal.
    let err = fx.engine.transactions().cancel(fx.tenant, view.transaction.id).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition { .. }));
}

#[tokio::test]
async fn free_transaction_completes_without_a_payment() {
    let fx = Fixture::new();
    let zone = fx.general_zone(10, 0).await;
    let view = fx.reserved("alice", &[LockItem::quantity(zone.id, 2)]).await;
    assert_eq!(view.transaction.total_amount, Money::ZERO);

    let paid = fx
        .engine
        .transactions()
        .pay_in_full(fx.tenant, view.transaction.id, Money::ZERO)
        .await
        .unwrap();
    assert_eq!(paid.transaction.status, TransactionStatus::Completed);
    assert!(paid.holds.iter().all(|h| h.conversion == Some(Conversion::Sale)));

    let snapshot = fx.engine.inventory().snapshot(fx.tenant, zone.id).await.unwrap();
    assert_eq!(snapshot.sold, 2);

    fx.settle().await;
    assert!(!fx.notifier.kinds().contains(&"payment_received"));
}

#[tokio::test]
async fn pay_in_full_is_refused_when_a_plan_exists() {
    let fx = Fixture::new();
    let zone = fx.general_zone(5, 10).await;
    let view = fx.reserved("alice", &[LockItem::quantity(zone.id, 1)]).await;
    fx.engine
        .plans()
        .create_plan(fx.tenant, view.transaction.id, NewPlan::flexible())
        .await
        .unwrap();

    let err = fx
        .engine
        .transactions()
        .pay_in_full(fx.tenant, view.transaction.id, Money::from_major(10))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidRequest(_)));
}

#[tokio::test]
async fn cancel_releases_everything() {
    let fx = Fixture::new();
    let zone = fx.general_zone(5, 10).await;
    let view = fx.reserved("alice", &[LockItem::quantity(zone.id, 5)]).await;
    assert_eq!(fx.engine.inventory().available_capacity(fx.tenant, zone.id).await.unwrap(), 0);

    let cancelled = fx.engine.transactions().cancel(fx.tenant, view.transaction.id).await.unwrap();
    assert_eq!(cancelled.status, TransactionStatus::Cancelled);
    assert_eq!(fx.engine.inventory().available_capacity(fx.tenant, zone.id).await.unwrap(), 5);

    let err = fx.engine.transactions().cancel(fx.tenant, view.transaction.id).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition { .. }));

    fx.settle().await;
    assert!(fx.notifier.kinds().contains(&"transaction_cancelled"));
}

#[tokio::test]
async fn pending_transaction_can_be_cancelled() {
    let fx = Fixture::new();
    let tx = fx.open("alice").await;
    let cancelled = fx.engine.transactions().cancel(fx.tenant, tx.id).await.unwrap();
    assert_eq!(cancelled.status, TransactionStatus::Cancelled);
}

#[tokio::test]
async fn unknown_transaction_is_not_found() {
    let fx = Fixture::new();
    let err = fx
        .engine
        .transactions()
        .get(fx.tenant, ticket_engine::models::TransactionId::new())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound { entity: "transaction", .. }));
}
