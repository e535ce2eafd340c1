mod common;

use chrono::Duration;
use common::Fixture;
use std::sync::Arc;
use ticket_engine::models::{Money, TransactionStatus};
use ticket_engine::services::{LockItem, NewPlan, RetryPolicy, Scheduler, SweepService, TokioScheduler};

#[tokio::test]
async fn one_pass_expires_locks_and_overdue_plans() {
    let fx = Fixture::new();
    let zone = fx.general_zone(10, 20).await;

    fx.lock("cart", &[LockItem::quantity(zone.id, 2)]).await;
    let planned = fx.reserved("plan", &[LockItem::quantity(zone.id, 3)]).await;
    let plan = fx
        .engine
        .plans()
        .create_plan(
            fx.tenant,
            planned.transaction.id,
            NewPlan::flexible().expiring_at(fx.engine.now() + Duration::hours(1)),
        )
        .await
        .unwrap();
    fx.engine.plans().add_payment(fx.tenant, plan.id, Money::from_major(10)).await.unwrap();
    assert_eq!(fx.engine.inventory().available_capacity(fx.tenant, zone.id).await.unwrap(), 5);

    let sweeper = SweepService::new(fx.engine.clone(), RetryPolicy::default());

    fx.advance(20);
    let report = sweeper.run_once().await.unwrap();
    assert_eq!(report.cart_locks_expired, 1);
    assert_eq!(report.plans_expired, 0);

    fx.advance(60);
    let report = sweeper.run_once().await.unwrap();
    assert_eq!(report.cart_locks_expired, 0);
    assert_eq!(report.plans_expired, 1);

    let tx = fx.engine.transactions().get(fx.tenant, planned.transaction.id).await.unwrap();
    assert_eq!(tx.transaction.status, TransactionStatus::Expired);
    assert_eq!(fx.engine.inventory().available_capacity(fx.tenant, zone.id).await.unwrap(), 10);

    let report = sweeper.run_once().await.unwrap();
    assert_eq!(report, Default::default());
}

#[tokio::test]
async fn scheduled_sweep_runs_in_the_background() {
    let fx = Fixture::new();
    let zone = fx.general_zone(4, 20).await;
    fx.lock("cart", &[LockItem::quantity(zone.id, 4)]).await;
    fx.advance(30);

    let sweeper = Arc::new(SweepService::new(fx.engine.clone(), RetryPolicy::default()));
    let handle = sweeper.start(&TokioScheduler as &dyn Scheduler, std::time::Duration::from_millis(10));

    let mut freed = false;
    for _ in 0..50 {
        if fx.engine.inventory().available_capacity(fx.tenant, zone.id).await.unwrap() == 4 {
            freed = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    handle.shutdown().await;
    assert!(freed, "background sweep never freed the expired lock");
}
