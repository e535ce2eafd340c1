mod common;

use common::Fixture;
use futures::future::join_all;
use ticket_engine::error::EngineError;
use ticket_engine::models::SessionId;
use ticket_engine::services::LockItem;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_buyers_get_a_seat_exactly_once() {
    let fx = Fixture::new();
    let (zone, seats) = fx.numbered_zone(&[(1, 1)], 90).await;
    let item = LockItem::seat(zone.id, seats[0].id);

    let attempts = (0..32).map(|i| {
        let engine = fx.engine.clone();
        let tenant = fx.tenant;
        tokio::spawn(async move {
            engine
                .reservations()
                .lock(tenant, &SessionId::new(format!("buyer-{i}")), &[item])
                .await
        })
    });
    let results: Vec<_> = join_all(attempts).await.into_iter().map(|r| r.unwrap()).collect();

    let won = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(won, 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, EngineError::SeatUnavailable { .. })));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn general_admission_never_oversells() {
    let fx = Fixture::new();
    let zone = fx.general_zone(10, 15).await;

    let attempts = (0..25).map(|i| {
        let engine = fx.engine.clone();
        let tenant = fx.tenant;
        let zone_id = zone.id;
        tokio::spawn(async move {
            engine
                .reservations()
                .lock(tenant, &SessionId::new(format!("buyer-{i}")), &[LockItem::quantity(zone_id, 1)])
                .await
        })
    });
    let results: Vec<_> = join_all(attempts).await.into_iter().map(|r| r.unwrap()).collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 10);
    let snapshot = fx.engine.inventory().snapshot(fx.tenant, zone.id).await.unwrap();
    assert_eq!(snapshot.held, 10);
    assert_eq!(snapshot.available, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn last_unit_goes_to_one_of_two_buyers() {
    let fx = Fixture::new();
    let zone = fx.general_zone(5, 15).await;
    fx.lock("early", &[LockItem::quantity(zone.id, 4)]).await;

    let a = {
        let engine = fx.engine.clone();
        let tenant = fx.tenant;
        tokio::spawn(async move {
            engine
                .reservations()
                .lock(tenant, &SessionId::new("a"), &[LockItem::quantity(zone.id, 1)])
                .await
        })
    };
    let b = {
        let engine = fx.engine.clone();
        let tenant = fx.tenant;
        tokio::spawn(async move {
            engine
                .reservations()
                .lock(tenant, &SessionId::new("b"), &[LockItem::quantity(zone.id, 1)])
                .await
        })
    };
    let (a, b) = (a.await.unwrap(), b.await.unwrap());
    assert!(a.is_ok() ^ b.is_ok());
    assert_eq!(fx.engine.inventory().available_capacity(fx.tenant, zone.id).await.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_payments_never_overpay_a_plan() {
    let fx = Fixture::new();
    let zone = fx.general_zone(5, 100).await;
    let view = fx.reserved("alice", &[LockItem::quantity(zone.id, 1)]).await;
    let plan = fx
        .engine
        .plans()
        .create_plan(fx.tenant, view.transaction.id, ticket_engine::services::NewPlan::flexible())
        .await
        .unwrap();

    let payments = (0..8).map(|_| {
        let engine = fx.engine.clone();
        let tenant = fx.tenant;
        let plan_id = plan.id;
        tokio::spawn(async move {
            engine
                .plans()
                .add_payment(tenant, plan_id, ticket_engine::models::Money::from_major(30))
                .await
        })
    });
    let results: Vec<_> = join_all(payments).await.into_iter().map(|r| r.unwrap()).collect();
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 3);

    let after = fx.engine.plans().get_plan(fx.tenant, plan.id).await.unwrap();
    assert_eq!(after.plan.paid_amount, ticket_engine::models::Money::from_major(90));
    assert!(after.plan.paid_amount <= after.plan.total_amount);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancel_and_last_payment_settle_one_way() {
    use ticket_engine::models::{Money, TransactionStatus};
    use ticket_engine::services::NewPlan;

    let fx = Fixture::new();
    let zone = fx.general_zone(10, 40).await;

    for round in 0..10 {
        let view = fx.reserved(&format!("buyer-{round}"), &[LockItem::quantity(zone.id, 1)]).await;
        let plan = fx
            .engine
            .plans()
            .create_plan(fx.tenant, view.transaction.id, NewPlan::flexible())
            .await
            .unwrap();

        let pay = {
            let engine = fx.engine.clone();
            let tenant = fx.tenant;
            tokio::spawn(async move { engine.plans().add_payment(tenant, plan.id, Money::from_major(40)).await })
        };
        let cancel = {
            let engine = fx.engine.clone();
            let tenant = fx.tenant;
            let plan_id = plan.id;
            tokio::spawn(async move { engine.plans().cancel_plan(tenant, plan_id).await })
        };
        let (paid, cancelled) = (pay.await.unwrap(), cancel.await.unwrap());
        assert!(paid.is_ok() ^ cancelled.is_ok());

        let tx = fx.engine.transactions().get(fx.tenant, view.transaction.id).await.unwrap();
        let expected = if paid.is_ok() { TransactionStatus::Completed } else { TransactionStatus::Cancelled };
        assert_eq!(tx.transaction.status, expected);
    }
}
