mod common;

use chrono::Duration;
use common::Fixture;
use rust_decimal::Decimal;
use ticket_engine::models::{Money, RowAdjustment, SessionId, StageModifier};
use ticket_engine::services::{LockItem, NewPriceStage};

fn stage(fx: &Fixture, name: &str, modifier: StageModifier, priority: i32) -> NewPriceStage {
    NewPriceStage {
        event_id: fx.event,
        name: name.into(),
        zone_ids: Vec::new(),
        starts_at: fx.engine.now() - Duration::days(1),
        ends_at: fx.engine.now() + Duration::days(30),
        units_ceiling: None,
        modifier,
        priority,
    }
}

#[tokio::test]
async fn stage_then_trigger_stack_on_the_row_base() {
    let fx = Fixture::new();
    let (zone, _) = fx.numbered_zone(&[(1, 5), (2, 5)], 100).await;
    let catalog = fx.engine.catalog();
    catalog
        .add_row_pricing(fx.tenant, zone.id, 1, 1, RowAdjustment::Multiplier(Decimal::new(15, 1)))
        .await
        .unwrap();
    catalog
        .add_price_stage(fx.tenant, stage(&fx, "early bird", StageModifier::Percentage(Decimal::from(-20)), 0))
        .await
        .unwrap();

    let front = fx.engine.pricing().price_for(fx.tenant, zone.id, Some(1), 2, None).await.unwrap();
    assert_eq!(front.base_price, Money::from_major(150));
    assert_eq!(front.unit_price, Money::from_major(120));
    assert_eq!(front.line_total, Money::from_major(240));

    let back = fx.engine.pricing().price_for(fx.tenant, zone.id, Some(2), 1, None).await.unwrap();
    assert_eq!(back.unit_price, Money::from_major(80));
}

#[tokio::test]
async fn crossed_trigger_stays_applied_after_units_return() {
    let fx = Fixture::new();
    let zone = fx.general_zone(10, 100).await;
    fx.engine
        .catalog()
        .add_trigger(fx.tenant, zone.id, Decimal::from(50), Decimal::from(10))
        .await
        .unwrap();

    let before = fx.engine.pricing().price_for(fx.tenant, zone.id, None, 1, None).await.unwrap();
    assert_eq!(before.unit_price, Money::from_major(100));

    // The lock itself is priced before it fills the zone.
    let holds = fx.lock("alice", &[LockItem::quantity(zone.id, 5)]).await;
    assert_eq!(holds[0].unit_price, Money::from_major(100));

    let during = fx.engine.pricing().price_for(fx.tenant, zone.id, None, 1, None).await.unwrap();
    assert_eq!(during.unit_price, Money::from_major(110));
    assert_eq!(during.triggers_applied.len(), 1);

    fx.engine
        .reservations()
        .release(fx.tenant, &SessionId::new("alice"), None)
        .await
        .unwrap();
    let after = fx.engine.pricing().price_for(fx.tenant, zone.id, None, 1, None).await.unwrap();
    assert_eq!(after.unit_price, Money::from_major(110));
}

#[tokio::test]
async fn sold_out_stage_gives_way() {
    let fx = Fixture::new();
    let zone = fx.general_zone(10, 100).await;
    let mut limited = stage(&fx, "first two", StageModifier::Fixed(Money::from_major(60)), 10);
    limited.units_ceiling = Some(2);
    fx.engine.catalog().add_price_stage(fx.tenant, limited).await.unwrap();
    fx.engine
        .catalog()
        .add_price_stage(fx.tenant, stage(&fx, "regular", StageModifier::Percentage(Decimal::ZERO), 0))
        .await
        .unwrap();

    let view = fx.reserved("alice", &[LockItem::quantity(zone.id, 2)]).await;
    assert_eq!(view.transaction.total_amount, Money::from_major(120));
    fx.engine
        .transactions()
        .pay_in_full(fx.tenant, view.transaction.id, Money::from_major(120))
        .await
        .unwrap();

    let quote = fx.engine.pricing().price_for(fx.tenant, zone.id, None, 1, None).await.unwrap();
    assert_eq!(quote.unit_price, Money::from_major(100));
}

#[tokio::test]
async fn quotes_for_another_instant_use_that_instants_stage() {
    let fx = Fixture::new();
    let zone = fx.general_zone(10, 100).await;
    let mut later = stage(&fx, "last minute", StageModifier::Percentage(Decimal::from(25)), 0);
    later.starts_at = fx.engine.now() + Duration::days(10);
    fx.engine.catalog().add_price_stage(fx.tenant, later).await.unwrap();

    let now = fx.engine.pricing().price_for(fx.tenant, zone.id, None, 1, None).await.unwrap();
    assert_eq!(now.unit_price, Money::from_major(100));
    assert_eq!(now.stage_id, None);

    let at = fx.engine.now() + Duration::days(11);
    let then = fx.engine.pricing().price_for(fx.tenant, zone.id, None, 1, Some(at)).await.unwrap();
    assert_eq!(then.unit_price, Money::from_major(125));
}

#[tokio::test]
async fn zero_quantity_is_rejected() {
    let fx = Fixture::new();
    let zone = fx.general_zone(10, 100).await;
    let err = fx.engine.pricing().price_for(fx.tenant, zone.id, None, 0, None).await.unwrap_err();
    assert!(matches!(err, ticket_engine::error::EngineError::InvalidRequest(_)));
}
