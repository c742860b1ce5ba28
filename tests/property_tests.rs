//! Property-based tests for measurement conversion and quantity adjustment.
//!
//! These tests use proptest to verify invariants across a wide range of inputs,
//! helping to catch edge cases that unit tests might miss.

use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use catering_allocations::services::{
    measurement_graph::{CustomRange, MeasurementUnit},
    requirement_calculator::FunctionShare,
    CompanySettings, MeasurementGraph, Quantity, QuantityAdjuster, RequirementCalculator,
};

const KG: i64 = 1;
const G: i64 = 2;
const MG: i64 = 3;
const STEP: i64 = 4;
const BUCKET: i64 = 5;

fn graph() -> MeasurementGraph {
    MeasurementGraph::new(vec![
        MeasurementUnit::base(KG, "kg").with_decimal_limit(3),
        MeasurementUnit::derived(G, "g", KG, dec!(0.001)).with_decimal_limit(0),
        MeasurementUnit::derived(MG, "mg", G, dec!(0.001)).with_decimal_limit(0),
        MeasurementUnit::base(STEP, "kg-step")
            .with_decimal_limit(3)
            .with_step(dec!(0.25)),
        MeasurementUnit::base(BUCKET, "crate")
            .with_decimal_limit(2)
            .with_ranges(vec![
                CustomRange::new(dec!(1), dec!(2)),
                CustomRange::new(dec!(5), dec!(10)),
            ]),
    ])
}

// Quantities with up to three decimals, as entered on recipes.
fn quantity_strategy() -> impl Strategy<Value = Decimal> {
    (0i64..10_000_000).prop_map(|milli| Decimal::new(milli, 3))
}

fn unit_strategy() -> impl Strategy<Value = i64> {
    prop_oneof![Just(KG), Just(G), Just(MG)]
}

// Property: converting there and back returns the original quantity
proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn convert_round_trips(q in quantity_strategy(), from in unit_strategy(), to in unit_strategy()) {
        let graph = graph();
        let there = graph.convert(q, from, to).unwrap();
        let back = graph.convert(there, to, from).unwrap();
        prop_assert_eq!(back.normalize(), q.normalize());
    }
}

// Property: adjusting an already adjusted quantity changes nothing
proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn adjust_is_idempotent(
        q in quantity_strategy(),
        unit in prop_oneof![Just(KG), Just(STEP), Just(BUCKET)],
        apply in any::<bool>(),
    ) {
        let graph = graph();
        let settings = CompanySettings::default();
        let adjuster = QuantityAdjuster::new(&graph, &settings);

        let once = adjuster.adjust(q, unit, apply).unwrap();
        let twice = adjuster.adjust(once.amount, unit, apply).unwrap();
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn split_never_loses_quantity_below_the_top_bucket(q in (0i64..1_000).prop_map(|c| Decimal::new(c, 2))) {
        let graph = graph();
        let settings = CompanySettings::default();
        let adjuster = QuantityAdjuster::new(&graph, &settings);

        let split = adjuster.split_adjusted_and_extra(q, BUCKET, true, false).unwrap();
        prop_assert!(!split.has_extra());
        prop_assert!(split.adjusted.amount >= q);
    }
}

// Property: apportioned parts always add back up to the rounded total
proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn apportion_conserves_total(
        q in quantity_strategy(),
        persons in prop::collection::vec(0u32..1_000, 1..6),
    ) {
        prop_assume!(persons.iter().any(|p| *p > 0));

        let graph = graph();
        let settings = CompanySettings::default();
        let calculator = RequirementCalculator::new(&graph, &settings);
        let shares: Vec<FunctionShare> = persons
            .iter()
            .enumerate()
            .map(|(i, p)| FunctionShare { function_id: i as i64, person_count: *p })
            .collect();

        let parts = calculator.apportion(Quantity::new(q, KG), &shares).unwrap();
        let sum: Decimal = parts.iter().map(|(_, part)| part.amount).sum();
        prop_assert_eq!(sum, q);
        for ((_, part), share) in parts.iter().zip(&shares) {
            if share.person_count == 0 {
                prop_assert!(part.amount.is_zero());
            }
        }
    }
}
