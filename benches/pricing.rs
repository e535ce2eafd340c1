use chrono::{Duration, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rust_decimal::Decimal;

use ticket_engine::models::{
    AvailabilityTrigger, EventId, Money, PriceStage, RowAdjustment, RowPricing, RowPricingId, StageId, StageModifier,
    TenantId, TriggerId, Zone, ZoneId, ZoneKind,
};
use ticket_engine::services::pricing::StageCandidate;
use ticket_engine::services::PricingContext;

// Numbered zone with a realistic rule set: row bands, overlapping stages, triggers
fn busy_context() -> PricingContext {
    let now = Utc.with_ymd_and_hms(2026, 9, 1, 12, 0, 0).unwrap();
    let tenant_id = TenantId::new();
    let zone = Zone {
        id: ZoneId::new(),
        tenant_id,
        event_id: EventId::new(),
        name: "Stalls".into(),
        kind: ZoneKind::Numbered,
        capacity: 1200,
        base_price: Money::from_major(85),
        created_at: now,
    };

    let row_rules = (0..10)
        .map(|band| RowPricing {
            id: RowPricingId::new(),
            tenant_id,
            zone_id: zone.id,
            row_from: band * 4 + 1,
            row_to: band * 4 + 4,
            adjustment: RowAdjustment::Multiplier(Decimal::new(200 - i64::from(band) * 10, 2)),
        })
        .collect();

    let stages = (0..8)
        .map(|i| StageCandidate {
            stage: PriceStage {
                id: StageId::new(),
                tenant_id,
                event_id: zone.event_id,
                name: format!("stage {i}"),
                zone_ids: vec![],
                starts_at: now - Duration::days(i),
                ends_at: now + Duration::days(10 - i),
                units_ceiling: Some(100 * (i + 1)),
                modifier: StageModifier::Percentage(Decimal::from(-5 * i)),
                priority: (i % 3) as i32,
            },
            units_sold: 150,
        })
        .collect();

    let triggers = [50, 70, 90]
        .into_iter()
        .map(|threshold| AvailabilityTrigger {
            id: TriggerId::new(),
            tenant_id,
            zone_id: zone.id,
            threshold_pct: Decimal::from(threshold),
            surcharge_pct: Decimal::from(threshold / 10),
        })
        .collect();

    PricingContext {
        zone,
        row_rules,
        stages,
        triggers,
        activated: vec![],
        occupancy_pct: Decimal::new(7512, 2),
    }
}

fn benchmark_calculate(c: &mut Criterion) {
    let mut group = c.benchmark_group("price_calculation");
    let ctx = busy_context();
    let at = Utc.with_ymd_and_hms(2026, 9, 1, 12, 0, 0).unwrap();

    group.bench_function("general_row", |b| {
        b.iter(|| black_box(ctx.calculate(black_box(None), 2, at)))
    });

    group.bench_function("front_row", |b| {
        b.iter(|| black_box(ctx.calculate(black_box(Some(3)), 2, at)))
    });

    group.finish();
}

criterion_group!(benches, benchmark_calculate);
criterion_main!(benches);
