//! Layered price calculation.
//!
//! The price of a line is computed in a fixed order, each step working on the
//! result of the previous one:
//!
//! 1. base price: the row rule covering the row, else the zone base price;
//! 2. the single winning [`PriceStage`] open at the given instant;
//! 3. every applicable [`AvailabilityTrigger`], ascending by threshold, compounding;
//! 4. rounding to cents, then multiplication by quantity.
//!
//! [`PricingContext::calculate`] is pure. [`PricingEngine::price_for`] only reads
//! the store to build the context.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::cmp::Ordering;

use super::inventory::{load_zone, occupancy_pct};
use super::Engine;
use crate::error::{EngineError, EngineResult};
use crate::models::{
    AvailabilityTrigger, Money, PriceQuote, PriceStage, RowPricing, TenantId, TriggerActivation, TriggerId, Zone,
    ZoneId,
};
use crate::store::UnitOfWork;

/// A stage together with the units sold in its scope.
#[derive(Debug, Clone)]
pub struct StageCandidate {
    pub stage: PriceStage,
    pub units_sold: i64,
}

/// Everything the calculation needs for one zone, read in one unit of work.
#[derive(Debug, Clone)]
pub struct PricingContext {
    pub zone: Zone,
    pub row_rules: Vec<RowPricing>,
    pub stages: Vec<StageCandidate>,
    pub triggers: Vec<AvailabilityTrigger>,
    /// Triggers recorded as crossed earlier; they stay applied.
    pub activated: Vec<TriggerId>,
    pub occupancy_pct: Decimal,
}

impl PricingContext {
    pub(crate) async fn load(uow: &mut dyn UnitOfWork, tenant: TenantId, zone: Zone) -> EngineResult<Self> {
        let row_rules = uow.row_pricing(tenant, zone.id).await?;

        let mut event_zones: Option<Vec<ZoneId>> = None;
        let mut stages = Vec::new();
        for stage in uow.price_stages(tenant, zone.event_id).await? {
            if !stage.applies_to_zone(zone.id) {
                continue;
            }
            let units_sold = match stage.units_ceiling {
                // Sold count only matters for stages with a ceiling.
                None => 0,
                Some(_) if !stage.zone_ids.is_empty() => uow.units_sold(tenant, &stage.zone_ids).await?,
                Some(_) => {
                    if event_zones.is_none() {
                        let ids = uow
                            .zones_for_event(tenant, zone.event_id)
                            .await?
                            .into_iter()
                            .map(|z| z.id)
                            .collect();
                        event_zones = Some(ids);
                    }
                    let scope = event_zones.as_deref().unwrap_or_default();
                    uow.units_sold(tenant, scope).await?
                }
            };
            stages.push(StageCandidate { stage, units_sold });
        }

        let triggers = uow.triggers(tenant, zone.id).await?;
        let activated = uow.trigger_activations(tenant, zone.id).await?;
        let occupancy = uow.occupancy(tenant, zone.id).await?;

        Ok(Self {
            occupancy_pct: occupancy_pct(&zone, &occupancy),
            zone,
            row_rules,
            stages,
            triggers,
            activated,
        })
    }

    pub fn calculate(&self, row: Option<i32>, quantity: u32, at: DateTime<Utc>) -> PriceQuote {
        let base_price = resolve_base(self.zone.base_price, &self.row_rules, row);

        let (stage_id, after_stage) = match winning_stage(&self.stages, self.zone.id, at, base_price) {
            Some((stage, price)) => (Some(stage.id), price),
            None => (None, base_price),
        };

        let triggers = applicable_triggers(&self.triggers, self.occupancy_pct, &self.activated);
        let surcharged = triggers
            .iter()
            .fold(after_stage, |running, t| running.apply_percent(t.surcharge_pct));

        let unit_price = surcharged.round_cents().max(Money::ZERO);

        PriceQuote {
            zone_id: self.zone.id,
            row,
            quantity,
            base_price: base_price.round_cents(),
            stage_id,
            price_after_stage: after_stage.round_cents(),
            triggers_applied: triggers.iter().map(|t| t.id).collect(),
            unit_price,
            line_total: unit_price * quantity,
            priced_at: at,
        }
    }
}

/// Row rule covering `row`, narrowest range first, then lowest `row_from`.
pub fn resolve_base(zone_base: Money, rules: &[RowPricing], row: Option<i32>) -> Money {
    let Some(row) = row else {
        return zone_base;
    };
    rules
        .iter()
        .filter(|r| r.covers(row))
        .min_by_key(|r| (r.width(), r.row_from))
        .map_or(zone_base, |r| r.adjustment.apply(zone_base))
}

/// Total order over competing stages. `Less` means `a` wins.
///
/// Higher priority first; then the lower resulting price; then the earlier
/// start; then the smaller id.
pub fn compare_stages(a: &PriceStage, a_price: Money, b: &PriceStage, b_price: Money) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| a_price.cmp(&b_price))
        .then_with(|| a.starts_at.cmp(&b.starts_at))
        .then_with(|| a.id.cmp(&b.id))
}

/// The stage that applies to `zone_id` at `at`, with the price it yields.
pub fn winning_stage(
    candidates: &[StageCandidate],
    zone_id: ZoneId,
    at: DateTime<Utc>,
    running: Money,
) -> Option<(&PriceStage, Money)> {
    candidates
        .iter()
        .filter(|c| c.stage.applies_to_zone(zone_id) && c.stage.is_open_at(at) && c.stage.under_ceiling(c.units_sold))
        .map(|c| (&c.stage, c.stage.modifier.apply(running)))
        .min_by(|(a, a_price), (b, b_price)| compare_stages(a, *a_price, b, *b_price))
}

/// Triggers crossed by the given occupancy.
pub fn crossed_triggers(triggers: &[AvailabilityTrigger], occupancy_pct: Decimal) -> Vec<&AvailabilityTrigger> {
    triggers.iter().filter(|t| occupancy_pct >= t.threshold_pct).collect()
}

/// Triggers crossed now or activated earlier, ascending by threshold.
pub fn applicable_triggers<'t>(
    triggers: &'t [AvailabilityTrigger],
    occupancy_pct: Decimal,
    activated: &[TriggerId],
) -> Vec<&'t AvailabilityTrigger> {
    let mut applicable: Vec<&AvailabilityTrigger> = triggers
        .iter()
        .filter(|t| occupancy_pct >= t.threshold_pct || activated.contains(&t.id))
        .collect();
    applicable.sort_by(|a, b| a.threshold_pct.cmp(&b.threshold_pct).then_with(|| a.id.cmp(&b.id)));
    applicable
}

/// Records every trigger the zone's current occupancy crosses. Runs on the
/// write path inside the caller's unit of work.
pub(crate) async fn record_crossed_triggers(
    uow: &mut dyn UnitOfWork,
    tenant: TenantId,
    zone: &Zone,
    now: DateTime<Utc>,
) -> EngineResult<Vec<TriggerId>> {
    let triggers = uow.triggers(tenant, zone.id).await?;
    if triggers.is_empty() {
        return Ok(Vec::new());
    }
    let occupancy = uow.occupancy(tenant, zone.id).await?;
    let pct = occupancy_pct(zone, &occupancy);
    let already = uow.trigger_activations(tenant, zone.id).await?;

    let mut recorded = Vec::new();
    for trigger in crossed_triggers(&triggers, pct) {
        if already.contains(&trigger.id) {
            continue;
        }
        uow.record_trigger_activation(&TriggerActivation {
            tenant_id: tenant,
            zone_id: zone.id,
            trigger_id: trigger.id,
            activated_at: now,
        })
        .await?;
        recorded.push(trigger.id);
    }
    Ok(recorded)
}

pub struct PricingEngine<'a> {
    engine: &'a Engine,
}

impl<'a> PricingEngine<'a> {
    pub(crate) fn new(engine: &'a Engine) -> Self {
        Self { engine }
    }

    /// Price of `quantity` units in `zone_id` (optionally in `row`) at `at`,
    /// defaulting to now. Reads only.
    pub async fn price_for(
        &self,
        tenant: TenantId,
        zone_id: ZoneId,
        row: Option<i32>,
        quantity: u32,
        at: Option<DateTime<Utc>>,
    ) -> EngineResult<PriceQuote> {
        if quantity == 0 {
            return Err(EngineError::InvalidRequest("quantity must be at least 1".into()));
        }
        let at = at.unwrap_or_else(|| self.engine.now());
        let mut uow = self.engine.begin().await?;
        let zone = load_zone(uow.as_mut(), tenant, zone_id).await?;
        let ctx = PricingContext::load(uow.as_mut(), tenant, zone).await?;
        Ok(ctx.calculate(row, quantity, at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EventId, RowAdjustment, RowPricingId, StageId, StageModifier, ZoneKind};
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn zone(base: i64) -> Zone {
        Zone {
            id: ZoneId::new(),
            tenant_id: TenantId::new(),
            event_id: EventId::new(),
            name: "Parterre".into(),
            kind: ZoneKind::Numbered,
            capacity: 100,
            base_price: Money::from_major(base),
            created_at: t0(),
        }
    }

    fn stage(z: &Zone, priority: i32, modifier: StageModifier) -> PriceStage {
        PriceStage {
            id: StageId::new(),
            tenant_id: z.tenant_id,
            event_id: z.event_id,
            name: "stage".into(),
            zone_ids: vec![],
            starts_at: t0() - Duration::days(1),
            ends_at: t0() + Duration::days(1),
            units_ceiling: None,
            modifier,
            priority,
        }
    }

    fn trigger(z: &Zone, threshold: i64, surcharge: i64) -> AvailabilityTrigger {
        AvailabilityTrigger {
            id: TriggerId::new(),
            tenant_id: z.tenant_id,
            zone_id: z.id,
            threshold_pct: Decimal::from(threshold),
            surcharge_pct: Decimal::from(surcharge),
        }
    }

    fn ctx(z: Zone) -> PricingContext {
        PricingContext {
            zone: z,
            row_rules: vec![],
            stages: vec![],
            triggers: vec![],
            activated: vec![],
            occupancy_pct: Decimal::ZERO,
        }
    }

    fn candidate(stage: PriceStage) -> StageCandidate {
        StageCandidate { stage, units_sold: 0 }
    }

    fn pct(v: i64) -> StageModifier {
        StageModifier::Percentage(Decimal::from(v))
    }

    #[test]
    fn stage_and_trigger_stack() {
        let z = zone(100);
        let mut c = ctx(z.clone());
        c.stages.push(candidate(stage(&z, 0, pct(-20))));
        c.triggers.push(trigger(&z, 50, 15));
        c.occupancy_pct = Decimal::from(60);

        let quote = c.calculate(None, 1, t0());
        assert_eq!(quote.price_after_stage, Money::from_major(80));
        assert_eq!(quote.unit_price, Money::from_cents(9200));
    }

    #[test]
    fn no_stage_leaves_price_unchanged() {
        let quote = ctx(zone(100)).calculate(None, 2, t0());
        assert_eq!(quote.stage_id, None);
        assert_eq!(quote.unit_price, Money::from_major(100));
        assert_eq!(quote.line_total, Money::from_major(200));
    }

    #[test]
    fn higher_priority_wins_even_if_more_expensive() {
        let z = zone(100);
        let cheap = stage(&z, 1, pct(-50));
        let pricey = stage(&z, 5, pct(10));
        let mut c = ctx(z);
        c.stages = vec![candidate(cheap), candidate(pricey.clone())];
        let quote = c.calculate(None, 1, t0());
        assert_eq!(quote.stage_id, Some(pricey.id));
        assert_eq!(quote.unit_price, Money::from_major(110));
    }

    #[test]
    fn equal_priority_resolves_to_lower_price() {
        let z = zone(100);
        let ten_off = stage(&z, 3, pct(-10));
        let fixed = stage(&z, 3, StageModifier::Fixed(Money::from_major(75)));
        let mut c = ctx(z);
        c.stages = vec![candidate(ten_off), candidate(fixed.clone())];
        let quote = c.calculate(None, 1, t0());
        assert_eq!(quote.stage_id, Some(fixed.id));
        assert_eq!(quote.unit_price, Money::from_major(75));
    }

    #[test]
    fn full_tie_falls_back_to_start_then_id() {
        let z = zone(100);
        let mut early = stage(&z, 1, pct(-10));
        early.starts_at -= Duration::hours(1);
        let late = stage(&z, 1, pct(-10));
        let price = Money::from_major(90);
        assert_eq!(compare_stages(&early, price, &late, price), Ordering::Less);
        assert_eq!(compare_stages(&late, price, &early, price), Ordering::Greater);

        let mut twin = late.clone();
        twin.id = StageId::new();
        let expected = late.id.cmp(&twin.id);
        assert_eq!(compare_stages(&late, price, &twin, price), expected);
    }

    #[test]
    fn stage_window_is_half_open() {
        let z = zone(100);
        let s = stage(&z, 0, pct(-20));
        let end = s.ends_at;
        let mut c = ctx(z);
        c.stages.push(candidate(s));
        assert_eq!(c.calculate(None, 1, end - Duration::seconds(1)).unit_price, Money::from_major(80));
        assert_eq!(c.calculate(None, 1, end).unit_price, Money::from_major(100));
    }

    #[test]
    fn stage_past_its_ceiling_is_skipped() {
        let z = zone(100);
        let mut early_bird = stage(&z, 9, pct(-30));
        early_bird.units_ceiling = Some(50);
        let regular = stage(&z, 1, pct(-5));
        let mut c = ctx(z);
        c.stages = vec![
            StageCandidate { stage: early_bird.clone(), units_sold: 49 },
            candidate(regular.clone()),
        ];
        assert_eq!(c.calculate(None, 1, t0()).stage_id, Some(early_bird.id));

        c.stages[0].units_sold = 50;
        assert_eq!(c.calculate(None, 1, t0()).stage_id, Some(regular.id));
    }

    #[test]
    fn stage_scoped_to_other_zone_does_not_apply() {
        let z = zone(100);
        let mut s = stage(&z, 0, pct(-20));
        s.zone_ids = vec![ZoneId::new()];
        let mut c = ctx(z);
        c.stages.push(candidate(s));
        assert_eq!(c.calculate(None, 1, t0()).unit_price, Money::from_major(100));
    }

    #[test]
    fn narrowest_row_rule_wins() {
        let z = zone(100);
        let rule = |from, to, adjustment| RowPricing {
            id: RowPricingId::new(),
            tenant_id: z.tenant_id,
            zone_id: z.id,
            row_from: from,
            row_to: to,
            adjustment,
        };
        let rules = vec![
            rule(1, 10, RowAdjustment::Multiplier(Decimal::new(12, 1))),
            rule(1, 2, RowAdjustment::Fixed(Money::from_major(150))),
        ];
        assert_eq!(resolve_base(z.base_price, &rules, Some(1)), Money::from_major(150));
        assert_eq!(resolve_base(z.base_price, &rules, Some(5)), Money::from_major(120));
        assert_eq!(resolve_base(z.base_price, &rules, Some(11)), Money::from_major(100));
        assert_eq!(resolve_base(z.base_price, &rules, None), Money::from_major(100));
    }

    #[test]
    fn row_price_feeds_the_stage() {
        let z = zone(100);
        let mut c = ctx(z.clone());
        c.row_rules.push(RowPricing {
            id: RowPricingId::new(),
            tenant_id: z.tenant_id,
            zone_id: z.id,
            row_from: 1,
            row_to: 3,
            adjustment: RowAdjustment::Multiplier(Decimal::from(2)),
        });
        c.stages.push(candidate(stage(&z, 0, pct(-25))));
        assert_eq!(c.calculate(Some(2), 1, t0()).unit_price, Money::from_major(150));
    }

    #[test]
    fn triggers_compound_in_ascending_order() {
        let z = zone(100);
        let mut c = ctx(z.clone());
        c.triggers = vec![trigger(&z, 90, 10), trigger(&z, 50, 10), trigger(&z, 95, 50)];
        c.occupancy_pct = Decimal::from(92);
        let quote = c.calculate(None, 1, t0());
        assert_eq!(quote.unit_price, Money::from_major(121));
        assert_eq!(quote.triggers_applied.len(), 2);
        assert_eq!(quote.triggers_applied[0], c.triggers[1].id);
    }

    #[test]
    fn activated_trigger_sticks_below_threshold() {
        let z = zone(100);
        let t = trigger(&z, 80, 20);
        let mut c = ctx(z);
        c.triggers.push(t.clone());
        c.occupancy_pct = Decimal::from(10);
        assert_eq!(c.calculate(None, 1, t0()).unit_price, Money::from_major(100));

        c.activated.push(t.id);
        assert_eq!(c.calculate(None, 1, t0()).unit_price, Money::from_major(120));
    }

    #[test]
    fn rounding_happens_before_quantity() {
        let z = zone(100);
        let mut c = ctx(z.clone());
        c.stages.push(candidate(stage(&z, 0, StageModifier::Fixed(Money::new(Decimal::new(33335, 3))))));
        let quote = c.calculate(None, 3, t0());
        assert_eq!(quote.unit_price, Money::from_cents(3334));
        assert_eq!(quote.line_total, Money::from_cents(10002));
    }

    #[test]
    fn discount_never_goes_negative() {
        let z = zone(100);
        let mut c = ctx(z.clone());
        c.stages.push(candidate(stage(&z, 0, pct(-150))));
        assert_eq!(c.calculate(None, 1, t0()).unit_price, Money::ZERO);
    }

    #[test]
    fn calculation_is_deterministic() {
        let z = zone(100);
        let mut c = ctx(z.clone());
        c.stages.push(candidate(stage(&z, 2, pct(-7))));
        c.triggers.push(trigger(&z, 10, 3));
        c.occupancy_pct = Decimal::from(40);
        assert_eq!(c.calculate(Some(4), 5, t0()), c.calculate(Some(4), 5, t0()));
    }
}
